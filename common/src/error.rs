use thiserror::Error;

/// Failures reported by a broker transport implementation.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum TransportError {
    #[error("connection attempt failed: {0}")]
    ConnectFailed(String),
    #[error("connection lost: {0}")]
    ConnectionLost(String),
    #[error("request rejected: {0}")]
    Rejected(String),
}

/// Caller-visible session failures. Connection trouble is retried
/// internally by `tick` and never surfaces here.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum SessionError {
    #[error("not connected to broker")]
    NotConnected,
    #[error(transparent)]
    Transport(#[from] TransportError),
}

/// Pre-flight rejections from `UpdateOrchestrator::start_update`.
#[derive(Debug, Clone, Copy, Error, PartialEq, Eq)]
pub enum StartError {
    #[error("OTA updates are disabled")]
    Disabled,
    #[error("an update is already in progress")]
    AlreadyInProgress,
    #[error("target version matches the running firmware")]
    NoVersionChange,
}
