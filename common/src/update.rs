use tracing::{info, warn};

use crate::{
    error::StartError,
    session::{BrokerTransport, SessionManager},
    topics::Topics,
    types::{OtaStatusPayload, ProgressPayload, UpdateStatus},
};

/// Side effects the orchestrator asks the device loop to perform after a
/// job reaches a terminal state.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DeviceAction {
    Delay(u64),
    Restart,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UpdateRequest {
    pub source_url: String,
    pub expected_checksum: String,
    pub target_version: String,
}

/// Terminal classification reported by the transfer collaborator.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TransferOutcome {
    Complete,
    NoUpdate,
    Failed(String),
}

/// Receives one progress report per chunk the transfer moves. Implementors
/// must tolerate arbitrary (transferred, total) pairs, including zero
/// totals and overshoot.
pub trait ProgressSink {
    fn on_progress(&mut self, bytes_transferred: u64, bytes_total: u64);
}

/// The byte-moving collaborator. Blocking: `download` returns only once the
/// artifact is fully fetched and staged (or the attempt is classified).
pub trait FirmwareTransfer {
    fn download(&mut self, url: &str, sink: &mut dyn ProgressSink) -> TransferOutcome;
}

/// Record of the most recent update request and its outcome.
#[derive(Debug, Clone)]
pub struct UpdateJob {
    status: UpdateStatus,
    target_version: String,
    source_url: String,
    expected_checksum: String,
    progress_percent: u8,
    error_message: Option<String>,
}

impl UpdateJob {
    fn idle() -> Self {
        Self {
            status: UpdateStatus::Idle,
            target_version: String::new(),
            source_url: String::new(),
            expected_checksum: String::new(),
            progress_percent: 0,
            error_message: None,
        }
    }

    fn for_request(status: UpdateStatus, request: &UpdateRequest) -> Self {
        Self {
            status,
            target_version: request.target_version.clone(),
            source_url: request.source_url.clone(),
            expected_checksum: request.expected_checksum.clone(),
            progress_percent: 0,
            error_message: None,
        }
    }
}

/// Drives exactly one firmware update to a terminal outcome and narrates it
/// over the session. The transfer runs on the caller's thread; no broker
/// traffic is processed while it is in flight.
pub struct UpdateOrchestrator {
    current_version: String,
    ota_enabled: bool,
    restart_grace_ms: u64,
    topics: Topics,
    job: UpdateJob,
}

impl UpdateOrchestrator {
    pub fn new(
        current_version: &str,
        ota_enabled: bool,
        restart_grace_ms: u64,
        topics: Topics,
    ) -> Self {
        Self {
            current_version: current_version.to_string(),
            ota_enabled,
            restart_grace_ms,
            topics,
            job: UpdateJob::idle(),
        }
    }

    pub fn is_in_progress(&self) -> bool {
        self.job.status == UpdateStatus::InProgress
    }

    pub fn current_version(&self) -> &str {
        &self.current_version
    }

    pub fn status(&self) -> UpdateStatus {
        self.job.status
    }

    pub fn progress_percent(&self) -> u8 {
        self.job.progress_percent
    }

    pub fn error_message(&self) -> Option<&str> {
        self.job.error_message.as_deref()
    }

    pub fn target_version(&self) -> &str {
        &self.job.target_version
    }

    pub fn source_url(&self) -> &str {
        &self.job.source_url
    }

    /// Accepted with the request and recorded for diagnostics; nothing in
    /// this component compares it against the fetched artifact.
    pub fn expected_checksum(&self) -> &str {
        &self.job.expected_checksum
    }

    /// Single writer: the config dispatcher flips this when a retained
    /// config document changes `ota_enabled`.
    pub fn set_ota_enabled(&mut self, enabled: bool) {
        self.ota_enabled = enabled;
    }

    /// Runs one update job to completion. Pre-flight rejections return the
    /// matching `StartError`; an accepted job always reaches exactly one
    /// terminal status before this returns. The returned actions are the
    /// restart sequence the device loop must execute on success.
    pub fn start_update<T, F>(
        &mut self,
        session: &mut SessionManager<T>,
        transfer: &mut F,
        request: UpdateRequest,
    ) -> Result<Vec<DeviceAction>, StartError>
    where
        T: BrokerTransport,
        F: FirmwareTransfer + ?Sized,
    {
        if !self.ota_enabled {
            self.publish_status(
                session,
                &OtaStatusPayload {
                    status: "error",
                    message: Some("OTA updates are disabled".to_string()),
                    version: None,
                },
            );
            self.job = UpdateJob::for_request(UpdateStatus::Disabled, &request);
            self.job.error_message = Some("OTA updates are disabled".to_string());
            return Err(StartError::Disabled);
        }

        if self.job.status == UpdateStatus::InProgress {
            return Err(StartError::AlreadyInProgress);
        }

        if request.target_version == self.current_version {
            self.publish_status(
                session,
                &OtaStatusPayload {
                    status: "skipped",
                    message: Some("Already on the latest version".to_string()),
                    version: Some(request.target_version.clone()),
                },
            );
            self.job = UpdateJob::for_request(UpdateStatus::Skipped, &request);
            return Err(StartError::NoVersionChange);
        }

        info!(
            "starting firmware update {} -> {} from {}",
            self.current_version, request.target_version, request.source_url
        );
        self.job = UpdateJob::for_request(UpdateStatus::InProgress, &request);
        self.publish_status(
            session,
            &OtaStatusPayload {
                status: "started",
                message: None,
                version: Some(request.target_version.clone()),
            },
        );

        let mut reporter = ProgressPublisher {
            session: &mut *session,
            topic: &self.topics.ota_progress,
            percent: 0,
        };
        let outcome = transfer.download(&request.source_url, &mut reporter);
        let percent = reporter.percent;
        self.job.progress_percent = percent;

        match outcome {
            TransferOutcome::Complete => {
                self.job.status = UpdateStatus::Success;
                self.job.progress_percent = 100;
                self.publish_status(
                    session,
                    &OtaStatusPayload {
                        status: "completed",
                        message: Some("Update successful".to_string()),
                        version: Some(request.target_version.clone()),
                    },
                );
                info!(
                    "firmware update to {} complete, restart scheduled",
                    request.target_version
                );
                Ok(vec![
                    DeviceAction::Delay(self.restart_grace_ms),
                    DeviceAction::Restart,
                ])
            }
            TransferOutcome::NoUpdate => {
                self.job.status = UpdateStatus::Skipped;
                self.publish_status(
                    session,
                    &OtaStatusPayload {
                        status: "no_updates",
                        message: Some("No updates available".to_string()),
                        version: Some(self.current_version.clone()),
                    },
                );
                Ok(Vec::new())
            }
            TransferOutcome::Failed(message) => {
                warn!("firmware update failed: {message}");
                self.job.status = UpdateStatus::Failed;
                self.job.error_message = Some(message.clone());
                self.publish_status(
                    session,
                    &OtaStatusPayload {
                        status: "failed",
                        message: Some(message),
                        version: Some(request.target_version.clone()),
                    },
                );
                Ok(Vec::new())
            }
        }
    }

    // Narration failures are logged and swallowed; the call-boundary signal
    // is the returned result plus the queryable job state.
    fn publish_status<T: BrokerTransport>(
        &self,
        session: &mut SessionManager<T>,
        payload: &OtaStatusPayload,
    ) {
        match serde_json::to_vec(payload) {
            Ok(body) => {
                if let Err(err) = session.publish(&self.topics.ota_status, &body, false) {
                    warn!("ota status publish failed: {err}");
                }
            }
            Err(err) => warn!("ota status serialization failed: {err}"),
        }
    }
}

/// Publishes one progress document per transfer callback, clamped to
/// [0, 100] and non-decreasing within the job. A zero total holds the
/// previous value rather than dividing by it.
struct ProgressPublisher<'a, T> {
    session: &'a mut SessionManager<T>,
    topic: &'a str,
    percent: u8,
}

impl<T: BrokerTransport> ProgressSink for ProgressPublisher<'_, T> {
    fn on_progress(&mut self, bytes_transferred: u64, bytes_total: u64) {
        if bytes_total > 0 {
            let computed = (bytes_transferred.saturating_mul(100) / bytes_total).min(100) as u8;
            if computed > self.percent {
                self.percent = computed;
            }
        }

        match serde_json::to_vec(&ProgressPayload {
            progress: self.percent,
        }) {
            Ok(body) => {
                if let Err(err) = self.session.publish(self.topic, &body, false) {
                    warn!("ota progress publish failed: {err}");
                }
            }
            Err(err) => warn!("ota progress serialization failed: {err}"),
        }
    }
}
