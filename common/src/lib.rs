pub mod config;
pub mod error;
pub mod session;
pub mod topics;
pub mod types;
pub mod update;

#[cfg(test)]
mod testutil;

pub use config::{DeviceConfig, MqttConfig, OtaConfig, SessionTuning};
pub use error::{SessionError, StartError, TransportError};
pub use session::{BrokerTransport, ConnectOptions, LastWill, SessionManager};
pub use topics::{Topics, DEFAULT_NAMESPACE};
pub use types::{
    ConnectionState, DiscoveryPayload, InboundMessage, OtaStatusPayload, PresencePayload,
    ProgressPayload, UpdateStatus,
};
pub use update::{
    DeviceAction, FirmwareTransfer, ProgressSink, TransferOutcome, UpdateOrchestrator,
    UpdateRequest,
};
