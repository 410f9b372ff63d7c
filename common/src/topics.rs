pub const DEFAULT_NAMESPACE: &str = "swissairdry";

/// Every topic a device publishes or subscribes to, precomputed once from
/// the deployment namespace and the device id.
#[derive(Debug, Clone)]
pub struct Topics {
    pub status: String,
    pub discovery: String,
    pub ota_progress: String,
    pub ota_status: String,
    pub config: String,
    pub config_ack: String,
    pub control: String,
    pub command: String,
    pub ota_update: String,
}

impl Topics {
    pub fn new(namespace: &str, device_id: &str) -> Self {
        let base = format!("{namespace}/{device_id}");
        Self {
            status: format!("{base}/status"),
            discovery: format!("{base}/discovery"),
            ota_progress: format!("{base}/ota/progress"),
            ota_status: format!("{base}/ota/status"),
            config: format!("{base}/config"),
            config_ack: format!("{base}/config/ack"),
            control: format!("{base}/control"),
            command: format!("{base}/command"),
            ota_update: format!("{base}/ota/update"),
        }
    }

    /// Inbound command topics, in the order the device subscribes to them.
    pub fn command_subscriptions(&self) -> [&str; 4] {
        [&self.config, &self.control, &self.command, &self.ota_update]
    }
}
