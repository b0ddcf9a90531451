use tokio::sync::mpsc;

use crate::{error::ConnectionError, stanza::Stanza};

/// Where the transport should connect.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConnectEndpoint {
    /// Decoded server URL.
    pub server: String,
    /// Routing domain the session authenticates against.
    pub domain: String,
    pub resource: Option<String>,
}

/// Connection status reported by the transport. Maps one to one onto
/// [`SessionStatus`](crate::session::SessionStatus).
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TransportStatus {
    Connecting,
    Connected { jid: String },
    Disconnecting,
    Disconnected,
    ConnectionFailed { reason: String },
}

#[derive(Debug, Clone, PartialEq)]
pub enum TransportEvent {
    Status(TransportStatus),
    Stanza(Stanza),
}

pub type TransportEventSender = mpsc::UnboundedSender<TransportEvent>;
pub type TransportEventReceiver = mpsc::UnboundedReceiver<TransportEvent>;

pub fn transport_event_channel() -> (TransportEventSender, TransportEventReceiver) {
    mpsc::unbounded_channel()
}

/// Wire-level connection to the chat server.
///
/// Implementations own socket handling, framing and anonymous
/// authentication. Everything they observe after `connect` is pushed onto
/// the supplied `events` sender; the session core never polls.
pub trait StanzaTransport: Send + 'static {
    fn connect(
        &mut self,
        endpoint: &ConnectEndpoint,
        events: TransportEventSender,
    ) -> impl Future<Output = Result<(), ConnectionError>> + Send;

    fn send(&mut self, stanza: &Stanza) -> impl Future<Output = Result<(), ConnectionError>> + Send;

    fn disconnect(&mut self) -> impl Future<Output = Result<(), ConnectionError>> + Send;
}
