//! In-memory transport for tests, shared with `board-test-support` through
//! the `test-util` feature.

use std::collections::VecDeque;
use std::sync::{Arc, Mutex, MutexGuard};

use crate::{
    error::ConnectionError,
    stanza::Stanza,
    transport::{
        ConnectEndpoint, StanzaTransport, TransportEvent, TransportEventSender, TransportStatus,
    },
};

#[derive(Default)]
struct Recorded {
    connect_outcomes: VecDeque<Result<(), ConnectionError>>,
    endpoints: Vec<ConnectEndpoint>,
    events: Option<TransportEventSender>,
    sent: Vec<Stanza>,
    disconnect_calls: usize,
    fail_sends: bool,
}

/// A `StanzaTransport` that records outbound traffic and lets the test
/// play the server side. Clones share state, so keep one clone and move
/// the other into the session manager.
#[derive(Clone, Default)]
pub struct RecordingTransport {
    state: Arc<Mutex<Recorded>>,
}

impl RecordingTransport {
    pub fn new() -> Self {
        Self::default()
    }

    /// Outcome of the next `connect` call; defaults to success.
    pub fn queue_connect_outcome(&self, outcome: Result<(), ConnectionError>) {
        self.lock().connect_outcomes.push_back(outcome);
    }

    /// Makes every following `send` fail with `NotConnected`.
    pub fn fail_sends(&self, fail: bool) {
        self.lock().fail_sends = fail;
    }

    pub fn connect_calls(&self) -> usize {
        self.lock().endpoints.len()
    }

    pub fn endpoints(&self) -> Vec<ConnectEndpoint> {
        self.lock().endpoints.clone()
    }

    pub fn disconnect_calls(&self) -> usize {
        self.lock().disconnect_calls
    }

    pub fn sent(&self) -> Vec<Stanza> {
        self.lock().sent.clone()
    }

    pub fn take_sent(&self) -> Vec<Stanza> {
        std::mem::take(&mut self.lock().sent)
    }

    /// Delivers an event on the channel registered by the latest
    /// `connect`. Returns `false` when no live channel exists.
    pub fn deliver(&self, event: TransportEvent) -> bool {
        match self.lock().events.as_ref() {
            Some(events) => events.send(event).is_ok(),
            None => false,
        }
    }

    pub fn deliver_status(&self, status: TransportStatus) -> bool {
        self.deliver(TransportEvent::Status(status))
    }

    pub fn deliver_stanza(&self, stanza: Stanza) -> bool {
        self.deliver(TransportEvent::Stanza(stanza))
    }

    fn lock(&self) -> MutexGuard<'_, Recorded> {
        self.state
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

impl StanzaTransport for RecordingTransport {
    async fn connect(
        &mut self,
        endpoint: &ConnectEndpoint,
        events: TransportEventSender,
    ) -> Result<(), ConnectionError> {
        let mut state = self.lock();
        state.endpoints.push(endpoint.clone());
        state.events = Some(events);
        state.connect_outcomes.pop_front().unwrap_or(Ok(()))
    }

    async fn send(&mut self, stanza: &Stanza) -> Result<(), ConnectionError> {
        let mut state = self.lock();
        if state.fail_sends {
            return Err(ConnectionError::NotConnected);
        }
        state.sent.push(stanza.clone());
        Ok(())
    }

    async fn disconnect(&mut self) -> Result<(), ConnectionError> {
        self.lock().disconnect_calls += 1;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::transport::transport_event_channel;

    fn endpoint() -> ConnectEndpoint {
        ConnectEndpoint {
            server: "wss://localhost".to_string(),
            domain: "localhost".to_string(),
            resource: None,
        }
    }

    #[tokio::test(flavor = "current_thread")]
    async fn queued_outcomes_are_consumed_in_order() {
        let mut transport = RecordingTransport::new();
        transport.queue_connect_outcome(Err(ConnectionError::Timeout));

        let (events, _receiver) = transport_event_channel();
        assert!(transport.connect(&endpoint(), events.clone()).await.is_err());
        assert!(transport.connect(&endpoint(), events).await.is_ok());
        assert_eq!(transport.connect_calls(), 2);
    }

    #[tokio::test(flavor = "current_thread")]
    async fn failing_sends_are_not_recorded() {
        let mut transport = RecordingTransport::new();
        let stanza = Stanza::parse(b"<presence xmlns='jabber:client'/>").unwrap();

        transport.fail_sends(true);
        assert!(matches!(
            transport.send(&stanza).await,
            Err(ConnectionError::NotConnected)
        ));
        transport.fail_sends(false);
        transport.send(&stanza).await.unwrap();
        assert_eq!(transport.take_sent(), vec![stanza]);
        assert!(transport.sent().is_empty());
    }
}
