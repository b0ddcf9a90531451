use std::sync::Arc;

use board_core::event::{Channel, Event, EventBus, EventPayload, EventSource};
use tracing::{debug, warn};

use crate::error::SessionError;

/// Optional event bus handle shared by the session components. Without a
/// bus every emit is a no-op and components only log.
#[derive(Clone, Default)]
pub struct EventPublisher {
    event_bus: Option<Arc<dyn EventBus>>,
}

impl EventPublisher {
    pub fn new(event_bus: Option<Arc<dyn EventBus>>) -> Self {
        Self { event_bus }
    }

    pub fn disabled() -> Self {
        Self::default()
    }

    pub fn emit(&self, channel_name: &str, source: EventSource, payload: EventPayload) {
        let Some(event_bus) = &self.event_bus else {
            return;
        };

        let Ok(channel) = Channel::new(channel_name) else {
            debug!(channel = channel_name, "dropping event for invalid channel");
            return;
        };

        let _ = event_bus.publish(Event::new(channel, source, payload));
    }

    pub fn xmpp(&self, channel_name: &str, payload: EventPayload) {
        self.emit(channel_name, EventSource::Xmpp, payload);
    }

    pub fn room(&self, channel_name: &str, payload: EventPayload) {
        self.emit(channel_name, EventSource::Room, payload);
    }

    pub fn connection(&self, channel_name: &str, payload: EventPayload) {
        self.emit(
            channel_name,
            EventSource::System("connection".to_string()),
            payload,
        );
    }

    /// Log a soft error and publish it as recoverable.
    pub fn soft_error(&self, component: &str, error: &SessionError) {
        warn!(component, %error, "recoverable session error");
        self.emit(
            "system.error.occurred",
            EventSource::System(component.to_string()),
            EventPayload::ErrorOccurred {
                component: component.to_string(),
                message: error.to_string(),
                recoverable: true,
            },
        );
    }
}

impl std::fmt::Debug for EventPublisher {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EventPublisher")
            .field("enabled", &self.event_bus.is_some())
            .finish()
    }
}
