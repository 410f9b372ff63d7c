use tracing::{debug, info, warn};

use crate::{
    config::DeviceConfig,
    error::{SessionError, TransportError},
    topics::Topics,
    types::{ConnectionState, InboundMessage, PresencePayload},
};

/// Last-will message registered with the broker at connect time. Derived
/// once from the device identity and never mutated afterward.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LastWill {
    pub topic: String,
    pub payload: Vec<u8>,
    pub retain: bool,
}

impl LastWill {
    /// Offline presence marker, delivered by the broker on unclean teardown.
    pub fn presence(status_topic: &str) -> Self {
        Self {
            topic: status_topic.to_string(),
            payload: b"{\"online\":false}".to_vec(),
            retain: true,
        }
    }
}

/// Everything a transport needs to open one broker session.
#[derive(Debug, Clone)]
pub struct ConnectOptions {
    pub host: String,
    pub port: u16,
    pub username: String,
    pub password: String,
    pub client_id: String,
    pub keep_alive_secs: u64,
    pub connect_timeout_ms: u64,
    pub last_will: LastWill,
}

impl ConnectOptions {
    pub fn for_device(config: &DeviceConfig, topics: &Topics) -> Self {
        Self {
            host: config.mqtt.host.clone(),
            port: config.mqtt.port,
            username: config.mqtt.username.clone(),
            password: config.mqtt.password.clone(),
            client_id: config.client_id(),
            keep_alive_secs: config.session.keep_alive_secs,
            connect_timeout_ms: config.session.connect_timeout_ms,
            last_will: LastWill::presence(&topics.status),
        }
    }
}

/// Capability surface of the underlying broker client. The session manager
/// owns the policy (backoff, replay, presence); implementations own the
/// wire. `poll` must be non-blocking and report session loss as
/// `TransportError::ConnectionLost`.
pub trait BrokerTransport {
    fn connect(&mut self, options: &ConnectOptions) -> Result<(), TransportError>;
    fn disconnect(&mut self);
    fn publish(&mut self, topic: &str, payload: &[u8], retain: bool)
        -> Result<(), TransportError>;
    fn subscribe(&mut self, topic: &str) -> Result<(), TransportError>;
    fn unsubscribe(&mut self, topic: &str) -> Result<(), TransportError>;
    fn is_connected(&self) -> bool;
    fn poll(&mut self) -> Result<Vec<InboundMessage>, TransportError>;
}

/// Keeps one logical broker session alive across disconnects.
///
/// Drive it by calling `tick` with a monotonic timestamp; inbound messages
/// are returned from `tick` rather than delivered through callbacks. All
/// parameters are fixed at construction; nothing touches the network until
/// the first `tick`.
pub struct SessionManager<T> {
    pub(crate) transport: T,
    options: ConnectOptions,
    presence_topic: String,
    backoff_ms: u64,
    last_attempt_ms: Option<u64>,
    state: ConnectionState,
    subscriptions: Vec<String>,
}

impl<T: BrokerTransport> SessionManager<T> {
    pub fn new(transport: T, options: ConnectOptions, backoff_ms: u64) -> Self {
        let presence_topic = options.last_will.topic.clone();
        Self {
            transport,
            options,
            presence_topic,
            backoff_ms,
            last_attempt_ms: None,
            state: ConnectionState::Disconnected,
            subscriptions: Vec::new(),
        }
    }

    pub fn state(&self) -> ConnectionState {
        self.state
    }

    pub fn is_connected(&self) -> bool {
        self.state == ConnectionState::Connected
    }

    /// Registered topics in replay order.
    pub fn subscriptions(&self) -> &[String] {
        &self.subscriptions
    }

    /// One scheduling slice. Connected: drain inbound delivery. Disconnected:
    /// at most one connection attempt per backoff window, completing the
    /// subscription replay and retained presence publish before reporting
    /// the session connected.
    pub fn tick(&mut self, now_ms: u64) -> Vec<InboundMessage> {
        match self.state {
            ConnectionState::Connected => match self.transport.poll() {
                Ok(messages) => messages,
                Err(err) => {
                    warn!("broker session lost: {err}");
                    self.demote();
                    Vec::new()
                }
            },
            ConnectionState::Disconnected => {
                if !self.backoff_elapsed(now_ms) {
                    return Vec::new();
                }
                self.last_attempt_ms = Some(now_ms);
                self.attempt_connect();
                Vec::new()
            }
        }
    }

    /// Fails immediately when not connected; no queueing, no side effect.
    pub fn publish(
        &mut self,
        topic: &str,
        payload: &[u8],
        retain: bool,
    ) -> Result<(), SessionError> {
        if self.state != ConnectionState::Connected {
            return Err(SessionError::NotConnected);
        }

        match self.transport.publish(topic, payload, retain) {
            Ok(()) => Ok(()),
            Err(err) => {
                if matches!(err, TransportError::ConnectionLost(_)) {
                    warn!("broker session lost during publish: {err}");
                    self.demote();
                }
                Err(err.into())
            }
        }
    }

    /// Registers the topic for replay on every (re)connect; issues a live
    /// subscription request as well when currently connected.
    pub fn subscribe(&mut self, topic: &str) -> Result<(), SessionError> {
        if !self.subscriptions.iter().any(|existing| existing == topic) {
            self.subscriptions.push(topic.to_string());
        }

        if self.state == ConnectionState::Connected {
            self.transport.subscribe(topic).map_err(SessionError::from)?;
        }
        Ok(())
    }

    /// Removes the topic from the replay registry; no error if absent.
    pub fn unsubscribe(&mut self, topic: &str) -> Result<(), SessionError> {
        self.subscriptions.retain(|existing| existing != topic);

        if self.state == ConnectionState::Connected {
            self.transport
                .unsubscribe(topic)
                .map_err(SessionError::from)?;
        }
        Ok(())
    }

    fn backoff_elapsed(&self, now_ms: u64) -> bool {
        self.last_attempt_ms
            .map(|last| now_ms.saturating_sub(last) >= self.backoff_ms)
            .unwrap_or(true)
    }

    fn attempt_connect(&mut self) {
        debug!(
            "attempting broker connection to {}:{}",
            self.options.host, self.options.port
        );

        if let Err(err) = self.transport.connect(&self.options) {
            warn!("broker connection attempt failed: {err}");
            return;
        }

        if let Err(err) = self.replay_and_announce() {
            warn!("broker session setup failed: {err}");
            self.transport.disconnect();
            return;
        }

        self.state = ConnectionState::Connected;
        self.last_attempt_ms = None;
        info!("broker session established as {}", self.options.client_id);
    }

    fn replay_and_announce(&mut self) -> Result<(), TransportError> {
        for topic in &self.subscriptions {
            self.transport.subscribe(topic)?;
        }

        let payload = serde_json::to_vec(&PresencePayload { online: true })
            .map_err(|err| TransportError::Rejected(err.to_string()))?;
        self.transport.publish(&self.presence_topic, &payload, true)
    }

    fn demote(&mut self) {
        self.state = ConnectionState::Disconnected;
        // Immediate retry eligibility on loss; the backoff window only
        // spaces out consecutive failed attempts.
        self.last_attempt_ms = None;
        self.transport.disconnect();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testutil::{FakeTransport, Op};
    use pretty_assertions::assert_eq;

    const BACKOFF_MS: u64 = 5_000;

    fn manager(transport: FakeTransport) -> SessionManager<FakeTransport> {
        let config = DeviceConfig {
            device_id: "abc123".to_string(),
            ..DeviceConfig::default()
        };
        let topics = Topics::new(&config.namespace, &config.device_id);
        let options = ConnectOptions::for_device(&config, &topics);
        SessionManager::new(transport, options, BACKOFF_MS)
    }

    #[test]
    fn first_connect_publishes_retained_presence_with_no_replay() {
        let mut session = manager(FakeTransport::default());

        let _ = session.tick(0);

        assert!(session.is_connected());
        assert_eq!(
            session.transport.published,
            vec![(
                "swissairdry/abc123/status".to_string(),
                b"{\"online\":true}".to_vec(),
                true,
            )]
        );
        assert_eq!(
            session.transport.ops,
            vec![
                Op::Connect,
                Op::Publish("swissairdry/abc123/status".to_string()),
            ]
        );
    }

    #[test]
    fn replay_is_net_effect_of_calls_in_order_with_duplicates_collapsed() {
        let mut session = manager(FakeTransport::default());

        session.subscribe("swissairdry/abc123/config").unwrap();
        session.subscribe("swissairdry/abc123/control").unwrap();
        session.subscribe("swissairdry/abc123/config").unwrap();
        session.subscribe("swissairdry/abc123/command").unwrap();
        session.unsubscribe("swissairdry/abc123/control").unwrap();

        let _ = session.tick(0);

        assert_eq!(
            session.transport.ops,
            vec![
                Op::Connect,
                Op::Subscribe("swissairdry/abc123/config".to_string()),
                Op::Subscribe("swissairdry/abc123/command".to_string()),
                Op::Publish("swissairdry/abc123/status".to_string()),
            ]
        );
    }

    #[test]
    fn failed_attempts_respect_the_backoff_window() {
        let mut transport = FakeTransport::default();
        transport.connect_results = vec![false, false, true].into();
        let mut session = manager(transport);

        let _ = session.tick(1_000);
        assert_eq!(session.transport.connect_attempts, 1);

        // Within the window: no new attempt regardless of polling frequency.
        for now in [1_001, 3_000, 5_999] {
            let _ = session.tick(now);
            assert_eq!(session.transport.connect_attempts, 1);
        }

        let _ = session.tick(6_000);
        assert_eq!(session.transport.connect_attempts, 2);

        let _ = session.tick(11_000);
        assert_eq!(session.transport.connect_attempts, 3);
        assert!(session.is_connected());
    }

    #[test]
    fn publish_while_disconnected_fails_without_side_effects() {
        let mut session = manager(FakeTransport::default());

        let result = session.publish("swissairdry/abc123/ota/status", b"{}", false);

        assert_eq!(result, Err(SessionError::NotConnected));
        assert!(session.transport.published.is_empty());
    }

    #[test]
    fn session_loss_demotes_and_retries_without_waiting_out_the_backoff() {
        let mut session = manager(FakeTransport::default());
        let _ = session.tick(0);
        assert!(session.is_connected());

        session.transport.drop_session = true;
        let _ = session.tick(100);
        assert!(!session.is_connected());

        // Loss resets the timer: the next tick may attempt immediately.
        let _ = session.tick(200);
        assert!(session.is_connected());
        assert_eq!(session.transport.connect_attempts, 2);
    }

    #[test]
    fn inbound_messages_are_returned_from_tick() {
        let mut session = manager(FakeTransport::default());
        let _ = session.tick(0);

        session.transport.inbound.push_back(InboundMessage {
            topic: "swissairdry/abc123/command".to_string(),
            payload: b"{\"action\":\"status_update\"}".to_vec(),
        });

        let messages = session.tick(100);
        assert_eq!(messages.len(), 1);
        assert_eq!(messages[0].topic, "swissairdry/abc123/command");
    }

    #[test]
    fn subscribe_while_connected_issues_a_live_request() {
        let mut session = manager(FakeTransport::default());
        let _ = session.tick(0);

        session.subscribe("swissairdry/abc123/ota/update").unwrap();
        session.subscribe("swissairdry/abc123/ota/update").unwrap();

        let live: Vec<_> = session
            .transport
            .ops
            .iter()
            .filter(|op| matches!(op, Op::Subscribe(_)))
            .collect();
        // Registry keeps one entry; the live request is repeated per call.
        assert_eq!(live.len(), 2);
        assert_eq!(session.subscriptions().len(), 1);
    }

    #[test]
    fn unsubscribe_of_unknown_topic_is_not_an_error() {
        let mut session = manager(FakeTransport::default());
        let _ = session.tick(0);

        assert_eq!(session.unsubscribe("swissairdry/abc123/nope"), Ok(()));
    }

    #[test]
    fn replay_failure_aborts_the_attempt_and_restarts_the_backoff() {
        let mut transport = FakeTransport::default();
        transport.fail_subscribe = true;
        let mut session = manager(transport);
        session.subscribe("swissairdry/abc123/config").unwrap();

        let _ = session.tick(1_000);
        assert!(!session.is_connected());
        assert_eq!(session.transport.connect_attempts, 1);

        // Still inside the window after the aborted attempt.
        let _ = session.tick(2_000);
        assert_eq!(session.transport.connect_attempts, 1);
    }

    #[test]
    fn transport_receives_the_offline_last_will_on_connect() {
        let mut session = manager(FakeTransport::default());

        let _ = session.tick(0);

        let options = session.transport.last_options.as_ref().unwrap();
        assert_eq!(
            options.last_will,
            LastWill {
                topic: "swissairdry/abc123/status".to_string(),
                payload: b"{\"online\":false}".to_vec(),
                retain: true,
            }
        );
        assert_eq!(options.client_id, "airdry-abc123");
    }
}
