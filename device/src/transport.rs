use std::collections::VecDeque;
use std::time::{Duration, Instant};

use rumqttc::{Client, Connection, Event, Incoming, MqttOptions, Outgoing, QoS};
use tracing::debug;

use airdry_common::{BrokerTransport, ConnectOptions, InboundMessage, TransportError};

/// How long a single publish may pump the event loop waiting for the
/// packet to leave the socket.
const FLUSH_BUDGET: Duration = Duration::from_millis(1_000);
const PUMP_SLICE: Duration = Duration::from_millis(50);
const REQUEST_CAP: usize = 16;

struct Link {
    client: Client,
    connection: Connection,
}

enum Pumped {
    Event(Event),
    Lost(String),
    Idle,
}

/// `BrokerTransport` over the synchronous rumqttc client.
///
/// Each connection attempt builds a fresh client/connection pair and pumps
/// it to the broker acknowledgement; a connection error anywhere tears the
/// pair down so the session manager decides when to try again, rather than
/// rumqttc's internal retry loop.
pub struct RumqttTransport {
    link: Option<Link>,
    inbox: VecDeque<InboundMessage>,
}

impl RumqttTransport {
    pub fn new() -> Self {
        Self {
            link: None,
            inbox: VecDeque::new(),
        }
    }

    fn pump_once(&mut self, wait: Duration) -> Pumped {
        let Some(link) = self.link.as_mut() else {
            return Pumped::Idle;
        };
        match link.connection.recv_timeout(wait) {
            Ok(Ok(event)) => Pumped::Event(event),
            Ok(Err(err)) => Pumped::Lost(err.to_string()),
            Err(_) => Pumped::Idle,
        }
    }

    /// Drives the event loop, stashing inbound publishes, until the given
    /// predicate matches an event, the budget runs out, or the link dies.
    fn pump_until(
        &mut self,
        budget: Duration,
        mut stop: impl FnMut(&Event) -> bool,
    ) -> Result<(), TransportError> {
        let deadline = Instant::now() + budget;
        loop {
            let remaining = deadline.saturating_duration_since(Instant::now());
            if remaining.is_zero() {
                return Ok(());
            }
            match self.pump_once(remaining.min(PUMP_SLICE)) {
                Pumped::Event(event) => {
                    if let Event::Incoming(Incoming::Publish(publish)) = &event {
                        self.inbox.push_back(InboundMessage {
                            topic: publish.topic.clone(),
                            payload: publish.payload.to_vec(),
                        });
                    }
                    if stop(&event) {
                        return Ok(());
                    }
                }
                Pumped::Lost(reason) => {
                    self.link = None;
                    return Err(TransportError::ConnectionLost(reason));
                }
                Pumped::Idle => return Ok(()),
            }
        }
    }
}

impl Default for RumqttTransport {
    fn default() -> Self {
        Self::new()
    }
}

impl BrokerTransport for RumqttTransport {
    fn connect(&mut self, options: &ConnectOptions) -> Result<(), TransportError> {
        self.link = None;
        self.inbox.clear();

        let mut mqtt_options =
            MqttOptions::new(&options.client_id, &options.host, options.port);
        mqtt_options.set_keep_alive(Duration::from_secs(options.keep_alive_secs));
        if !options.username.is_empty() {
            mqtt_options.set_credentials(&options.username, &options.password);
        }
        mqtt_options.set_last_will(rumqttc::LastWill::new(
            &options.last_will.topic,
            options.last_will.payload.clone(),
            QoS::AtLeastOnce,
            options.last_will.retain,
        ));

        let (client, connection) = Client::new(mqtt_options, REQUEST_CAP);
        self.link = Some(Link { client, connection });

        let deadline = Instant::now() + Duration::from_millis(options.connect_timeout_ms);
        loop {
            let remaining = deadline.saturating_duration_since(Instant::now());
            if remaining.is_zero() {
                self.link = None;
                return Err(TransportError::ConnectFailed(
                    "timed out waiting for broker acknowledgement".to_string(),
                ));
            }
            match self.pump_once(remaining) {
                Pumped::Event(Event::Incoming(Incoming::ConnAck(_))) => {
                    debug!("broker acknowledged connection");
                    return Ok(());
                }
                Pumped::Event(_) => {}
                Pumped::Lost(reason) => {
                    self.link = None;
                    return Err(TransportError::ConnectFailed(reason));
                }
                Pumped::Idle => {}
            }
        }
    }

    fn disconnect(&mut self) {
        if let Some(link) = self.link.take() {
            let _ = link.client.disconnect();
        }
        self.inbox.clear();
    }

    fn publish(
        &mut self,
        topic: &str,
        payload: &[u8],
        retain: bool,
    ) -> Result<(), TransportError> {
        let link = self
            .link
            .as_mut()
            .ok_or_else(|| TransportError::Rejected("no active broker link".to_string()))?;
        link.client
            .publish(topic, QoS::AtLeastOnce, retain, payload.to_vec())
            .map_err(|err| TransportError::Rejected(err.to_string()))?;

        // The sync client only enqueues; drive the event loop until the
        // packet is actually written out.
        self.pump_until(FLUSH_BUDGET, |event| {
            matches!(event, Event::Outgoing(Outgoing::Publish(_)))
        })
    }

    fn subscribe(&mut self, topic: &str) -> Result<(), TransportError> {
        let link = self
            .link
            .as_mut()
            .ok_or_else(|| TransportError::Rejected("no active broker link".to_string()))?;
        link.client
            .subscribe(topic, QoS::AtMostOnce)
            .map_err(|err| TransportError::Rejected(err.to_string()))?;

        self.pump_until(FLUSH_BUDGET, |event| {
            matches!(event, Event::Outgoing(Outgoing::Subscribe(_)))
        })
    }

    fn unsubscribe(&mut self, topic: &str) -> Result<(), TransportError> {
        let link = self
            .link
            .as_mut()
            .ok_or_else(|| TransportError::Rejected("no active broker link".to_string()))?;
        link.client
            .unsubscribe(topic)
            .map_err(|err| TransportError::Rejected(err.to_string()))?;

        self.pump_until(FLUSH_BUDGET, |event| {
            matches!(event, Event::Outgoing(Outgoing::Unsubscribe(_)))
        })
    }

    fn is_connected(&self) -> bool {
        self.link.is_some()
    }

    fn poll(&mut self) -> Result<Vec<InboundMessage>, TransportError> {
        if self.link.is_none() {
            return Ok(Vec::new());
        }

        // Drain whatever the event loop has ready without blocking the
        // firmware tick for more than one empty slice.
        loop {
            match self.pump_once(Duration::from_millis(1)) {
                Pumped::Event(Event::Incoming(Incoming::Publish(publish))) => {
                    self.inbox.push_back(InboundMessage {
                        topic: publish.topic.clone(),
                        payload: publish.payload.to_vec(),
                    });
                }
                Pumped::Event(_) => {}
                Pumped::Lost(reason) => {
                    self.link = None;
                    self.inbox.clear();
                    return Err(TransportError::ConnectionLost(reason));
                }
                Pumped::Idle => break,
            }
        }

        Ok(self.inbox.drain(..).collect())
    }
}
