pub mod address;
pub mod error;
pub mod handle;
pub mod ids;
pub mod liveness;
pub mod messaging;
pub mod publisher;
pub mod reconnect;
pub mod router;
pub mod session;
pub mod settings;
pub mod stanza;
pub mod transport;

#[cfg(any(test, feature = "test-util"))]
pub mod testing;

pub use error::{ConnectionError, PipelineError, SessionError};
pub use handle::{SessionCommand, SessionHandle};
pub use liveness::{LivenessMonitor, PendingPing};
pub use messaging::{DiscoKind, JoinOptions, MessagingClient};
pub use publisher::EventPublisher;
pub use reconnect::ReconnectPolicy;
pub use router::{RouteContext, StanzaRouter};
pub use session::{
    ConnectionSessionManager, ScheduledReconnect, Session, SessionSnapshot, SessionStatus,
};
pub use settings::SessionSettings;
pub use stanza::{ErrorReport, Stanza};
pub use transport::{
    ConnectEndpoint, StanzaTransport, TransportEvent, TransportEventReceiver,
    TransportEventSender, TransportStatus, transport_event_channel,
};
