use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    Disconnected,
    Connected,
}

impl ConnectionState {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Disconnected => "DISCONNECTED",
            Self::Connected => "CONNECTED",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UpdateStatus {
    Idle,
    InProgress,
    Success,
    Failed,
    Skipped,
    Disabled,
}

impl UpdateStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Idle => "IDLE",
            Self::InProgress => "IN_PROGRESS",
            Self::Success => "SUCCESS",
            Self::Failed => "FAILED",
            Self::Skipped => "SKIPPED",
            Self::Disabled => "DISABLED",
        }
    }

    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            Self::Success | Self::Failed | Self::Skipped | Self::Disabled
        )
    }
}

/// One message delivered by the broker, handed out of `SessionManager::tick`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InboundMessage {
    pub topic: String,
    pub payload: Vec<u8>,
}

/// Retained presence document on `<ns>/<deviceId>/status`.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct PresencePayload {
    pub online: bool,
}

/// Per-callback progress document on `<ns>/<deviceId>/ota/progress`.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct ProgressPayload {
    pub progress: u8,
}

/// Update narration on `<ns>/<deviceId>/ota/status`. The `error` form
/// carries no version, `started` carries no message.
#[derive(Debug, Clone, Serialize)]
pub struct OtaStatusPayload {
    pub status: &'static str,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub version: Option<String>,
}

/// Retained discovery document published once per connection.
#[derive(Debug, Clone, Serialize)]
pub struct DiscoveryPayload {
    pub device_id: String,
    pub name: String,
    #[serde(rename = "type")]
    pub device_type: &'static str,
    pub firmware_version: String,
}
