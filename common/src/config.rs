use serde::{Deserialize, Serialize};

use crate::topics::DEFAULT_NAMESPACE;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MqttConfig {
    pub host: String,
    pub port: u16,
    pub username: String,
    pub password: String,
}

impl Default for MqttConfig {
    fn default() -> Self {
        Self {
            host: "mqtt".to_string(),
            port: 1883,
            username: String::new(),
            password: String::new(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OtaConfig {
    pub enabled: bool,
    pub restart_grace_ms: u64,
}

impl Default for OtaConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            restart_grace_ms: 1_000,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionTuning {
    pub reconnect_backoff_ms: u64,
    pub keep_alive_secs: u64,
    pub connect_timeout_ms: u64,
}

impl Default for SessionTuning {
    fn default() -> Self {
        Self {
            reconnect_backoff_ms: 5_000,
            keep_alive_secs: 30,
            connect_timeout_ms: 10_000,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DeviceConfig {
    pub device_id: String,
    pub device_name: String,
    pub namespace: String,
    pub mqtt: MqttConfig,
    #[serde(default)]
    pub ota: OtaConfig,
    #[serde(default)]
    pub session: SessionTuning,
    pub update_interval_secs: u32,
}

impl Default for DeviceConfig {
    fn default() -> Self {
        Self {
            device_id: "airdry-dev".to_string(),
            device_name: "SwissAirDry".to_string(),
            namespace: DEFAULT_NAMESPACE.to_string(),
            mqtt: MqttConfig::default(),
            ota: OtaConfig::default(),
            session: SessionTuning::default(),
            update_interval_secs: 60,
        }
    }
}

impl DeviceConfig {
    /// Broker client identifier, derived from the device id.
    pub fn client_id(&self) -> String {
        format!("airdry-{}", self.device_id)
    }

    pub fn sanitize(&mut self) {
        self.device_id = self.device_id.trim().to_string();
        if self.device_id.is_empty() {
            self.device_id = "airdry-dev".to_string();
        }

        self.device_name = self.device_name.trim().to_string();
        if self.device_name.is_empty() {
            self.device_name = "SwissAirDry".to_string();
        }

        self.namespace = self.namespace.trim().trim_matches('/').to_string();
        if self.namespace.is_empty() {
            self.namespace = DEFAULT_NAMESPACE.to_string();
        }

        if self.mqtt.host.trim().is_empty() {
            self.mqtt.host = MqttConfig::default().host;
        }
        if self.mqtt.port == 0 {
            self.mqtt.port = MqttConfig::default().port;
        }

        self.update_interval_secs = self.update_interval_secs.clamp(5, 3_600);
        self.ota.restart_grace_ms = self.ota.restart_grace_ms.clamp(250, 10_000);
        self.session.reconnect_backoff_ms = self.session.reconnect_backoff_ms.clamp(1_000, 60_000);
        self.session.keep_alive_secs = self.session.keep_alive_secs.clamp(5, 300);
        self.session.connect_timeout_ms = self.session.connect_timeout_ms.clamp(1_000, 60_000);
    }
}
