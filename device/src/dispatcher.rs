use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use airdry_common::{
    BrokerTransport, DeviceAction, DeviceConfig, DiscoveryPayload, FirmwareTransfer,
    InboundMessage, PresencePayload, SessionManager, Topics, UpdateOrchestrator, UpdateRequest,
};

use crate::store::ConfigStore;

// Matches the broker-side client buffer; anything larger is not a command.
const MAX_PAYLOAD_BYTES: usize = 1024;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Route {
    Config,
    Control,
    Command,
    OtaUpdate,
}

fn route(topics: &Topics, topic: &str) -> Option<Route> {
    if topic == topics.config {
        Some(Route::Config)
    } else if topic == topics.control {
        Some(Route::Control)
    } else if topic == topics.command {
        Some(Route::Command)
    } else if topic == topics.ota_update {
        Some(Route::OtaUpdate)
    } else {
        None
    }
}

#[derive(Debug, Deserialize)]
struct OtaUpdateCommand {
    url: String,
    #[serde(alias = "md5_hash", alias = "sha256", default)]
    checksum: String,
    version: String,
}

#[derive(Debug, Deserialize)]
struct DeviceCommand {
    action: String,
}

#[derive(Debug, Deserialize)]
struct ConfigUpdate {
    update_interval: Option<u32>,
    ota_enabled: Option<bool>,
}

#[derive(Debug, Serialize)]
struct AckPayload {
    status: &'static str,
    message: &'static str,
}

/// Routes one inbound broker message to the owning handler and returns the
/// device actions it produced. Malformed payloads are logged and dropped;
/// they never take the firmware down.
pub fn handle_message<T, F>(
    session: &mut SessionManager<T>,
    orchestrator: &mut UpdateOrchestrator,
    transfer: &mut F,
    config: &mut DeviceConfig,
    store: &ConfigStore,
    topics: &Topics,
    message: InboundMessage,
) -> Vec<DeviceAction>
where
    T: BrokerTransport,
    F: FirmwareTransfer,
{
    if message.payload.len() > MAX_PAYLOAD_BYTES {
        warn!(
            "dropping oversized payload on topic {} ({} bytes)",
            message.topic,
            message.payload.len()
        );
        return Vec::new();
    }

    let Some(route) = route(topics, &message.topic) else {
        debug!("ignoring message on unrouted topic {}", message.topic);
        return Vec::new();
    };

    match route {
        Route::Config => {
            handle_config(session, orchestrator, config, store, topics, &message.payload);
            Vec::new()
        }
        Route::Control => {
            // Fan and power actuation belongs to the hardware build.
            debug!("control message ignored: no actuators on this target");
            Vec::new()
        }
        Route::Command => handle_command(session, orchestrator, config, topics, &message.payload),
        Route::OtaUpdate => {
            handle_ota_update(session, orchestrator, transfer, &message.payload)
        }
    }
}

/// Retained presence plus the discovery document; published on demand and
/// on every fresh connection.
pub fn announce<T: BrokerTransport>(
    session: &mut SessionManager<T>,
    config: &DeviceConfig,
    firmware_version: &str,
    topics: &Topics,
) {
    let presence = PresencePayload { online: true };
    match serde_json::to_vec(&presence) {
        Ok(body) => {
            if let Err(err) = session.publish(&topics.status, &body, true) {
                warn!("presence publish failed: {err}");
            }
        }
        Err(err) => warn!("presence serialization failed: {err}"),
    }

    let discovery = DiscoveryPayload {
        device_id: config.device_id.clone(),
        name: config.device_name.clone(),
        device_type: "air-dryer",
        firmware_version: firmware_version.to_string(),
    };
    match serde_json::to_vec(&discovery) {
        Ok(body) => {
            if let Err(err) = session.publish(&topics.discovery, &body, true) {
                warn!("discovery publish failed: {err}");
            }
        }
        Err(err) => warn!("discovery serialization failed: {err}"),
    }
}

fn handle_config<T: BrokerTransport>(
    session: &mut SessionManager<T>,
    orchestrator: &mut UpdateOrchestrator,
    config: &mut DeviceConfig,
    store: &ConfigStore,
    topics: &Topics,
    payload: &[u8],
) {
    let update: ConfigUpdate = match serde_json::from_slice(payload) {
        Ok(update) => update,
        Err(err) => {
            warn!("invalid config payload: {err}");
            return;
        }
    };

    if let Some(interval) = update.update_interval {
        config.update_interval_secs = interval;
    }
    if let Some(enabled) = update.ota_enabled {
        config.ota.enabled = enabled;
    }
    config.sanitize();
    orchestrator.set_ota_enabled(config.ota.enabled);

    if let Err(err) = store.save(config) {
        warn!("failed to persist config update: {err:#}");
        return;
    }
    info!("configuration updated");

    let ack = AckPayload {
        status: "success",
        message: "Configuration updated",
    };
    match serde_json::to_vec(&ack) {
        Ok(body) => {
            if let Err(err) = session.publish(&topics.config_ack, &body, false) {
                warn!("config ack publish failed: {err}");
            }
        }
        Err(err) => warn!("config ack serialization failed: {err}"),
    }
}

fn handle_command<T: BrokerTransport>(
    session: &mut SessionManager<T>,
    orchestrator: &UpdateOrchestrator,
    config: &DeviceConfig,
    topics: &Topics,
    payload: &[u8],
) -> Vec<DeviceAction> {
    let command: DeviceCommand = match serde_json::from_slice(payload) {
        Ok(command) => command,
        Err(err) => {
            warn!("invalid command payload: {err}");
            return Vec::new();
        }
    };

    match command.action.as_str() {
        "status_update" => {
            announce(session, config, orchestrator.current_version(), topics);
            Vec::new()
        }
        "reboot" => {
            info!("reboot requested over broker");
            vec![
                DeviceAction::Delay(config.ota.restart_grace_ms),
                DeviceAction::Restart,
            ]
        }
        other => {
            warn!("unknown command action '{other}'");
            Vec::new()
        }
    }
}

fn handle_ota_update<T, F>(
    session: &mut SessionManager<T>,
    orchestrator: &mut UpdateOrchestrator,
    transfer: &mut F,
    payload: &[u8],
) -> Vec<DeviceAction>
where
    T: BrokerTransport,
    F: FirmwareTransfer,
{
    let command: OtaUpdateCommand = match serde_json::from_slice(payload) {
        Ok(command) => command,
        Err(err) => {
            warn!("invalid ota update payload: {err}");
            return Vec::new();
        }
    };

    let request = UpdateRequest {
        source_url: command.url,
        expected_checksum: command.checksum,
        target_version: command.version,
    };

    // Rejections have already been narrated on the ota/status topic by the
    // orchestrator; nothing more to do here.
    match orchestrator.start_update(session, transfer, request) {
        Ok(actions) => actions,
        Err(err) => {
            info!("update request rejected: {err}");
            Vec::new()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn routes_the_device_command_topics() {
        let topics = Topics::new("swissairdry", "abc123");

        assert_eq!(
            route(&topics, "swissairdry/abc123/config"),
            Some(Route::Config)
        );
        assert_eq!(
            route(&topics, "swissairdry/abc123/control"),
            Some(Route::Control)
        );
        assert_eq!(
            route(&topics, "swissairdry/abc123/command"),
            Some(Route::Command)
        );
        assert_eq!(
            route(&topics, "swissairdry/abc123/ota/update"),
            Some(Route::OtaUpdate)
        );
        assert_eq!(route(&topics, "swissairdry/other/config"), None);
        assert_eq!(route(&topics, "swissairdry/abc123/ota/status"), None);
    }

    #[test]
    fn ota_command_accepts_the_legacy_checksum_key() {
        let command: OtaUpdateCommand = serde_json::from_str(
            r#"{"url":"http://x/fw.bin","md5_hash":"deadbeef","version":"2.0.0"}"#,
        )
        .unwrap();

        assert_eq!(command.url, "http://x/fw.bin");
        assert_eq!(command.checksum, "deadbeef");
        assert_eq!(command.version, "2.0.0");
    }

    #[test]
    fn ota_command_checksum_is_optional() {
        let command: OtaUpdateCommand =
            serde_json::from_str(r#"{"url":"http://x/fw.bin","version":"2.0.0"}"#).unwrap();

        assert_eq!(command.checksum, "");
    }

    #[test]
    fn config_update_fields_are_all_optional() {
        let update: ConfigUpdate = serde_json::from_str(r#"{"ota_enabled":false}"#).unwrap();

        assert_eq!(update.update_interval, None);
        assert_eq!(update.ota_enabled, Some(false));
    }
}
