use chrono::{DateTime, Utc};
use globset::{Glob, GlobMatcher};
use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;
use uuid::Uuid;

use crate::error::EventBusError;
use crate::room::RoomEvent;

/// Hierarchical channel name validation and parsing.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct Channel(String);

impl Channel {
    /// Create a new channel, validating its format.
    pub fn new(name: impl Into<String>) -> std::result::Result<Self, EventBusError> {
        let name = name.into();
        if Self::is_valid(&name) {
            Ok(Self(name))
        } else {
            Err(EventBusError::InvalidChannel(name))
        }
    }

    /// Check if a channel name is valid.
    pub fn is_valid(name: &str) -> bool {
        if name.is_empty() || name.starts_with('.') || name.ends_with('.') || name.contains("..") {
            return false;
        }

        // Must be lowercase and only contain a-z, 0-9, and dots
        if name
            .chars()
            .any(|c| !matches!(c, 'a'..='z' | '0'..='9' | '.'))
        {
            return false;
        }

        matches!(
            name.split('.').next(),
            Some("system") | Some("xmpp") | Some("room")
        )
    }

    /// Get the domain of the channel.
    pub fn domain(&self) -> &str {
        self.0.split('.').next().unwrap_or("")
    }

    /// Get the full channel name.
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for Channel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<Channel> for String {
    fn from(channel: Channel) -> Self {
        channel.0
    }
}

/// The standard event envelope wrapping all events in the system.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Event {
    /// Hierarchical channel name (e.g., "room.event.appended")
    pub channel: Channel,

    /// When the event was created (UTC)
    pub timestamp: DateTime<Utc>,

    /// Unique identifier for this event
    pub id: Uuid,

    /// Source component that emitted this event
    pub source: EventSource,

    /// The typed event payload
    pub payload: EventPayload,
}

impl Event {
    pub fn new(channel: Channel, source: EventSource, payload: EventPayload) -> Self {
        Self {
            channel,
            timestamp: Utc::now(),
            id: Uuid::new_v4(),
            source,
            payload,
        }
    }
}

/// Identifies the source of an event
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", content = "id", rename_all = "camelCase")]
pub enum EventSource {
    /// Core system component
    System(String),
    /// XMPP subsystem
    Xmpp,
    /// Room state model
    Room,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum MessageType {
    Chat,
    Groupchat,
    Normal,
    Headline,
    Error,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", content = "data", rename_all = "camelCase")]
pub enum EventPayload {
    // ── Connection lifecycle ──────────────────────────────────────
    ConnectionConnecting {
        server: String,
    },
    ConnectionEstablished {
        jid: String,
    },
    ConnectionLost {
        reason: String,
        will_retry: bool,
    },
    ConnectionFailed {
        reason: String,
    },
    ConnectionReconnecting {
        attempt: u32,
        delay_ms: u64,
    },
    ErrorOccurred {
        component: String,
        message: String,
        recoverable: bool,
    },

    // ── XMPP ──────────────────────────────────────────────────────
    PingCompleted {
        id: String,
        latency_ms: u64,
    },
    PingTimedOut {
        id: String,
    },
    SubscriptionRequest {
        from: String,
    },
    MessageSent {
        id: String,
        to: String,
        message_type: MessageType,
    },
    DiscoResult {
        id: String,
        from: Option<String>,
        payload: Option<String>,
        is_error: bool,
    },

    // ── Room ──────────────────────────────────────────────────────
    RoomJoinRequested {
        room: String,
        nick: String,
    },
    ParticipantJoined {
        room: String,
        nick: String,
    },
    ParticipantLeft {
        room: String,
        nick: String,
    },
    RoomEventAppended {
        room: String,
        event: RoomEvent,
    },
}

pub trait EventBus: Send + Sync + 'static {
    fn publish(&self, event: Event) -> std::result::Result<(), EventBusError>;
    fn subscribe(&self, pattern: &str) -> std::result::Result<EventSubscription, EventBusError>;
}

#[derive(Clone)]
pub struct BroadcastEventBus {
    sender: broadcast::Sender<Event>,
}

impl BroadcastEventBus {
    pub const DEFAULT_CHANNEL_CAPACITY: usize = 1024;

    pub fn new(channel_capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(channel_capacity.max(1));
        Self { sender }
    }
}

impl Default for BroadcastEventBus {
    fn default() -> Self {
        Self::new(Self::DEFAULT_CHANNEL_CAPACITY)
    }
}

impl EventBus for BroadcastEventBus {
    fn publish(&self, event: Event) -> std::result::Result<(), EventBusError> {
        if !Channel::is_valid(event.channel.as_str()) {
            return Err(EventBusError::InvalidChannel(event.channel.to_string()));
        }

        // No subscribers is not an error.
        let _ = self.sender.send(event);
        Ok(())
    }

    fn subscribe(&self, pattern: &str) -> std::result::Result<EventSubscription, EventBusError> {
        if pattern.split('.').next().unwrap_or_default().is_empty() {
            return Err(EventBusError::InvalidPattern(pattern.to_string()));
        }

        let matcher = Glob::new(pattern)
            .map_err(|_| EventBusError::InvalidPattern(pattern.to_string()))?
            .compile_matcher();

        Ok(EventSubscription {
            matcher,
            receiver: self.sender.subscribe(),
        })
    }
}

pub struct EventSubscription {
    matcher: GlobMatcher,
    receiver: broadcast::Receiver<Event>,
}

impl EventSubscription {
    pub async fn recv(&mut self) -> std::result::Result<Event, EventBusError> {
        loop {
            match self.receiver.recv().await {
                Ok(event) if self.matcher.is_match(event.channel.as_str()) => return Ok(event),
                Ok(_) => {}
                Err(broadcast::error::RecvError::Closed) => {
                    return Err(EventBusError::ChannelClosed);
                }
                Err(broadcast::error::RecvError::Lagged(count)) => {
                    return Err(EventBusError::Lagged(count));
                }
            }
        }
    }

    /// Drain already-published matching events without waiting.
    pub fn try_recv(&mut self) -> Option<Event> {
        loop {
            match self.receiver.try_recv() {
                Ok(event) if self.matcher.is_match(event.channel.as_str()) => return Some(event),
                Ok(_) => {}
                Err(broadcast::error::TryRecvError::Lagged(_)) => {}
                Err(_) => return None,
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn event(channel: &str, payload: EventPayload) -> Event {
        Event::new(Channel::new(channel).unwrap(), EventSource::Xmpp, payload)
    }

    #[test]
    fn test_channel_validation() {
        assert!(Channel::is_valid("system.connection.established"));
        assert!(Channel::is_valid("xmpp.ping.completed"));
        assert!(Channel::is_valid("room.event.appended"));

        assert!(!Channel::is_valid("ui.theme.changed"));
        assert!(!Channel::is_valid("system..double.dot"));
        assert!(!Channel::is_valid(".starts.with.dot"));
        assert!(!Channel::is_valid("ends.with.dot."));
        assert!(!Channel::is_valid("UpperCase"));
        assert!(!Channel::is_valid("with-hyphen"));
        assert!(!Channel::is_valid(""));
    }

    #[test]
    fn test_channel_domain() {
        let c = Channel::new("room.participant.joined").unwrap();
        assert_eq!(c.domain(), "room");
        assert_eq!(c.to_string(), "room.participant.joined");
    }

    #[test]
    fn payload_serializes_with_type_tag() {
        let json = serde_json::to_value(EventPayload::PingTimedOut {
            id: "ping:1".to_string(),
        })
        .unwrap();
        assert_eq!(json["type"], "pingTimedOut");
        assert_eq!(json["data"]["id"], "ping:1");
    }

    #[tokio::test(flavor = "current_thread")]
    async fn subscription_filters_by_glob() {
        let bus = BroadcastEventBus::default();
        let mut room_events = bus.subscribe("room.*").unwrap();

        bus.publish(event(
            "xmpp.ping.timeout",
            EventPayload::PingTimedOut {
                id: "ping:1".to_string(),
            },
        ))
        .unwrap();
        bus.publish(event(
            "room.participant.left",
            EventPayload::ParticipantLeft {
                room: "test1@muc.localhost".to_string(),
                nick: "alice".to_string(),
            },
        ))
        .unwrap();

        let received = room_events.recv().await.unwrap();
        assert_eq!(received.channel.as_str(), "room.participant.left");
        assert!(room_events.try_recv().is_none());
    }

    #[test]
    fn publish_without_subscribers_is_ok() {
        let bus = BroadcastEventBus::new(4);
        bus.publish(event(
            "system.connection.failed",
            EventPayload::ConnectionFailed {
                reason: "refused".to_string(),
            },
        ))
        .unwrap();
    }

    #[test]
    fn subscribe_rejects_empty_domain() {
        let bus = BroadcastEventBus::default();
        assert!(matches!(
            bus.subscribe(".foo"),
            Err(EventBusError::InvalidPattern(_))
        ));
    }
}
