//! In-memory model of the single joined chat room.
//!
//! The roster holds exactly the nicknames that have joined and not yet left;
//! departures remove the entry outright. The event log is append-only and its
//! insertion order is the chronological order shown to the user.

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum EventKind {
    Message,
    Presence,
}

/// One entry of the room's event log. Immutable once appended.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RoomEvent {
    pub timestamp: DateTime<Utc>,
    pub kind: EventKind,
    pub nickname: Option<String>,
    pub text: String,
}

impl RoomEvent {
    pub fn message(nickname: Option<String>, text: impl Into<String>) -> Self {
        Self {
            timestamp: Utc::now(),
            kind: EventKind::Message,
            nickname,
            text: text.into(),
        }
    }

    pub fn joined(nickname: &str) -> Self {
        Self {
            timestamp: Utc::now(),
            kind: EventKind::Presence,
            nickname: None,
            text: format!("{nickname} joined room"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Participant {
    pub joined_at: DateTime<Utc>,
    /// `#rrggbb`, fixed for the lifetime of the roster entry.
    pub display_color: String,
    pub event_count: u32,
}

impl Participant {
    pub fn new() -> Self {
        Self {
            joined_at: Utc::now(),
            display_color: random_color_hex(),
            event_count: 0,
        }
    }
}

impl Default for Participant {
    fn default() -> Self {
        Self::new()
    }
}

fn random_color_hex() -> String {
    format!("#{:06x}", rand::random::<u32>() & 0x00ff_ffff)
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Room {
    /// Bare room address (`room@muc-domain`), unset until joined.
    pub address: Option<String>,
    pub own_nickname: Option<String>,
    /// Keyed by nickname; iteration order is the display order.
    pub participants: BTreeMap<String, Participant>,
    pub events: Vec<RoomEvent>,
}

/// Mutation surface over [`Room`]. Every operation is total: nicknames are
/// used as literal keys, whatever their shape.
#[derive(Debug, Default)]
pub struct RoomState {
    room: Room,
}

impl RoomState {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn reset(&mut self) {
        self.room = Room::default();
    }

    pub fn set_joined(&mut self, address: impl Into<String>, nickname: impl Into<String>) {
        self.room.address = Some(address.into());
        self.room.own_nickname = Some(nickname.into());
    }

    pub fn room(&self) -> &Room {
        &self.room
    }

    pub fn address(&self) -> Option<&str> {
        self.room.address.as_deref()
    }

    pub fn own_nickname(&self) -> Option<&str> {
        self.room.own_nickname.as_deref()
    }

    pub fn participant(&self, nickname: &str) -> Option<&Participant> {
        self.room.participants.get(nickname)
    }

    pub fn contains(&self, nickname: &str) -> bool {
        self.room.participants.contains_key(nickname)
    }

    pub fn events(&self) -> &[RoomEvent] {
        &self.room.events
    }

    /// Inserts a fresh participant unless one already exists. Returns `true`
    /// when a new roster entry was created.
    pub fn upsert_participant(&mut self, nickname: &str) -> bool {
        if self.contains(nickname) {
            return false;
        }
        self.room
            .participants
            .insert(nickname.to_string(), Participant::new());
        true
    }

    pub fn remove_participant(&mut self, nickname: &str) -> Option<Participant> {
        self.room.participants.remove(nickname)
    }

    pub fn append_event(&mut self, event: RoomEvent) {
        self.room.events.push(event);
    }

    /// Bumps the message counter of a known participant. Unknown nicknames
    /// are left alone.
    pub fn record_message(&mut self, nickname: &str) {
        if let Some(participant) = self.room.participants.get_mut(nickname) {
            participant.event_count = participant.event_count.saturating_add(1);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn new_room_is_unjoined_and_empty() {
        let state = RoomState::new();
        assert!(state.address().is_none());
        assert!(state.own_nickname().is_none());
        assert!(state.room().participants.is_empty());
        assert!(state.events().is_empty());
    }

    #[test]
    fn upsert_creates_once() {
        let mut state = RoomState::new();
        assert!(state.upsert_participant("alice"));
        let color = state.participant("alice").unwrap().display_color.clone();

        assert!(!state.upsert_participant("alice"));
        assert_eq!(state.room().participants.len(), 1);
        assert_eq!(state.participant("alice").unwrap().display_color, color);
    }

    #[test]
    fn display_color_is_hex_rgb() {
        let participant = Participant::new();
        assert_eq!(participant.display_color.len(), 7);
        assert!(participant.display_color.starts_with('#'));
        assert!(
            participant.display_color[1..]
                .chars()
                .all(|c| c.is_ascii_hexdigit())
        );
    }

    #[test]
    fn remove_unknown_participant_is_noop() {
        let mut state = RoomState::new();
        state.upsert_participant("alice");
        assert!(state.remove_participant("bob").is_none());
        assert!(state.contains("alice"));
    }

    #[test]
    fn record_message_counts_known_participants_only() {
        let mut state = RoomState::new();
        state.upsert_participant("alice");
        state.record_message("alice");
        state.record_message("alice");
        state.record_message("ghost");

        assert_eq!(state.participant("alice").unwrap().event_count, 2);
        assert!(!state.contains("ghost"));
    }

    #[test]
    fn malformed_nickname_is_a_literal_key() {
        let mut state = RoomState::new();
        assert!(state.upsert_participant(""));
        assert!(state.upsert_participant("a/b@c"));
        assert!(state.contains(""));
        assert!(state.contains("a/b@c"));
    }

    #[test]
    fn events_keep_insertion_order() {
        let mut state = RoomState::new();
        state.append_event(RoomEvent::joined("alice"));
        state.append_event(RoomEvent::message(Some("alice".to_string()), "hi"));

        let kinds: Vec<EventKind> = state.events().iter().map(|e| e.kind).collect();
        assert_eq!(kinds, vec![EventKind::Presence, EventKind::Message]);
        assert_eq!(state.events()[0].text, "alice joined room");
        assert!(state.events()[0].nickname.is_none());
    }

    #[test]
    fn reset_clears_everything() {
        let mut state = RoomState::new();
        state.set_joined("test1@muc.localhost", "bob");
        state.upsert_participant("alice");
        state.append_event(RoomEvent::joined("alice"));

        state.reset();
        assert_eq!(state.room(), &Room::default());
    }
}
