use std::collections::VecDeque;

use crate::error::TransportError;
use crate::session::{BrokerTransport, ConnectOptions};
use crate::types::InboundMessage;

#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) enum Op {
    Connect,
    Disconnect,
    Publish(String),
    Subscribe(String),
    Unsubscribe(String),
}

/// Scriptable in-memory transport standing in for the broker client.
#[derive(Debug, Default)]
pub(crate) struct FakeTransport {
    pub connected: bool,
    /// Outcome per connect attempt, oldest first; empty means succeed.
    pub connect_results: VecDeque<bool>,
    pub connect_attempts: usize,
    pub last_options: Option<ConnectOptions>,
    pub ops: Vec<Op>,
    pub published: Vec<(String, Vec<u8>, bool)>,
    pub inbound: VecDeque<InboundMessage>,
    /// Next poll reports the session as lost.
    pub drop_session: bool,
    pub fail_subscribe: bool,
}

impl BrokerTransport for FakeTransport {
    fn connect(&mut self, options: &ConnectOptions) -> Result<(), TransportError> {
        self.connect_attempts += 1;
        self.ops.push(Op::Connect);
        self.last_options = Some(options.clone());

        let succeed = self.connect_results.pop_front().unwrap_or(true);
        if !succeed {
            return Err(TransportError::ConnectFailed("broker unreachable".into()));
        }
        self.connected = true;
        Ok(())
    }

    fn disconnect(&mut self) {
        self.connected = false;
        self.ops.push(Op::Disconnect);
    }

    fn publish(
        &mut self,
        topic: &str,
        payload: &[u8],
        retain: bool,
    ) -> Result<(), TransportError> {
        self.ops.push(Op::Publish(topic.to_string()));
        self.published
            .push((topic.to_string(), payload.to_vec(), retain));
        Ok(())
    }

    fn subscribe(&mut self, topic: &str) -> Result<(), TransportError> {
        if self.fail_subscribe {
            return Err(TransportError::Rejected("subscribe refused".into()));
        }
        self.ops.push(Op::Subscribe(topic.to_string()));
        Ok(())
    }

    fn unsubscribe(&mut self, topic: &str) -> Result<(), TransportError> {
        self.ops.push(Op::Unsubscribe(topic.to_string()));
        Ok(())
    }

    fn is_connected(&self) -> bool {
        self.connected
    }

    fn poll(&mut self) -> Result<Vec<InboundMessage>, TransportError> {
        if self.drop_session {
            self.drop_session = false;
            self.connected = false;
            return Err(TransportError::ConnectionLost("link reset by peer".into()));
        }
        Ok(self.inbound.drain(..).collect())
    }
}
