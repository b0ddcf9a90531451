//! Inbound stanza classification and room-state updates.
//!
//! The router holds no session state of its own. Everything it mutates is
//! handed in per call through [`RouteContext`], and replies it wants sent are
//! returned to the caller.

use board_core::event::EventPayload;
use board_core::room::{RoomEvent, RoomState};
use tokio::time::Instant;
use tracing::{debug, info};
use xmpp_parsers::{
    iq::Iq,
    message::{Message, MessageType as XmppMessageType},
    minidom::Element,
    presence::{Presence, Type as PresenceType},
};

use crate::{
    error::SessionError, liveness::LivenessMonitor, messaging::MessagingClient,
    publisher::EventPublisher, stanza::Stanza,
};

const PING_NS: &str = "urn:xmpp:ping";

pub struct RouteContext<'a> {
    pub room: &'a mut RoomState,
    pub liveness: &'a mut LivenessMonitor,
    pub messaging: &'a mut MessagingClient,
    pub now: Instant,
}

#[derive(Debug, Clone, Default)]
pub struct StanzaRouter {
    publisher: EventPublisher,
}

impl StanzaRouter {
    pub fn new(publisher: EventPublisher) -> Self {
        Self { publisher }
    }

    /// Dispatches one inbound stanza by kind. Returns a reply to send, if
    /// the stanza calls for one.
    pub fn route(&self, stanza: &Stanza, ctx: &mut RouteContext<'_>) -> Option<Stanza> {
        self.report_errors(stanza);

        match stanza {
            Stanza::Presence(presence) => {
                if presence.type_ == PresenceType::Subscribe {
                    self.route_subscription_request(presence);
                } else {
                    self.route_presence(presence, ctx.room);
                }
                None
            }
            Stanza::Message(message) => {
                self.route_message(message, ctx.room);
                None
            }
            Stanza::Iq(iq) => self.route_iq(iq, ctx),
        }
    }

    pub fn route_presence(&self, presence: &Presence, room: &mut RoomState) {
        let Some(from) = presence.from.as_ref() else {
            debug!("presence without sender ignored");
            return;
        };

        let bare = from.to_bare().to_string();
        if room.address() != Some(bare.as_str()) {
            debug!(from = %from, "non-room presence");
            return;
        }

        let Some(nickname) = from.resource() else {
            debug!(room = %bare, "presence from bare room address ignored");
            return;
        };

        self.apply_room_presence(room, &nickname.to_string(), &presence.type_);
    }

    /// Applies an occupant presence to the roster. Departures remove the
    /// participant without appending a room event.
    pub fn apply_room_presence(
        &self,
        room: &mut RoomState,
        nickname: &str,
        presence_type: &PresenceType,
    ) {
        let address = room.address().unwrap_or_default().to_string();
        let leaving = *presence_type == PresenceType::Unavailable;

        if room.contains(nickname) {
            if leaving && room.remove_participant(nickname).is_some() {
                info!(room = %address, nick = %nickname, "participant left");
                self.publisher.room(
                    "room.participant.left",
                    EventPayload::ParticipantLeft {
                        room: address,
                        nick: nickname.to_string(),
                    },
                );
            }
            return;
        }

        if leaving {
            return;
        }

        room.upsert_participant(nickname);
        info!(room = %address, nick = %nickname, "participant joined");
        self.publisher.room(
            "room.participant.joined",
            EventPayload::ParticipantJoined {
                room: address.clone(),
                nick: nickname.to_string(),
            },
        );
        self.append_event(room, address, RoomEvent::joined(nickname));
    }

    pub fn route_message(&self, message: &Message, room: &mut RoomState) {
        if message.type_ != XmppMessageType::Groupchat {
            debug!(type_ = ?message.type_, "non-groupchat message left to the view layer");
            return;
        }

        let Some(from) = message.from.as_ref() else {
            return;
        };
        let address = from.to_bare().to_string();
        if room.address() != Some(address.as_str()) {
            debug!(from = %from, "groupchat message for another room ignored");
            return;
        }

        let body = message
            .get_best_body(vec![])
            .map(|(_, body)| body.clone())
            .unwrap_or_default();

        let Some(nickname) = from.resource().map(|r| r.to_string()) else {
            if !body.is_empty() {
                self.append_event(room, address, RoomEvent::message(None, body));
            }
            return;
        };

        if room.upsert_participant(&nickname) {
            self.publisher.room(
                "room.participant.joined",
                EventPayload::ParticipantJoined {
                    room: address.clone(),
                    nick: nickname.clone(),
                },
            );
        }

        if body.is_empty() {
            debug!(room = %address, nick = %nickname, "groupchat message without body");
            return;
        }

        room.record_message(&nickname);
        self.append_event(room, address, RoomEvent::message(Some(nickname), body));
    }

    pub fn route_subscription_request(&self, presence: &Presence) {
        let from = presence
            .from
            .as_ref()
            .map(|j| j.to_string())
            .unwrap_or_default();
        debug!(from = %from, "subscription request");
        self.publisher.xmpp(
            "xmpp.subscription.request",
            EventPayload::SubscriptionRequest { from },
        );
    }

    pub fn route_iq(&self, iq: &Iq, ctx: &mut RouteContext<'_>) -> Option<Stanza> {
        match iq {
            Iq::Get {
                from, id, payload, ..
            } if payload.is("ping", PING_NS) => {
                debug!(id = %id, "answering server ping");
                let reply = Iq::Result {
                    from: None,
                    to: from.clone(),
                    id: id.clone(),
                    payload: None,
                };
                Some(Stanza::Iq(Box::new(reply)))
            }
            Iq::Get { id, .. } | Iq::Set { id, .. } => {
                debug!(id = %id, "unhandled iq request");
                None
            }
            Iq::Result {
                from, id, payload, ..
            } => {
                let from = from.as_ref().map(|j| j.to_string());
                self.resolve_response(id, from, payload.as_ref(), false, ctx);
                None
            }
            Iq::Error { from, id, .. } => {
                let from = from.as_ref().map(|j| j.to_string());
                self.resolve_response(id, from, None, true, ctx);
                None
            }
        }
    }

    fn resolve_response(
        &self,
        id: &str,
        from: Option<String>,
        payload: Option<&Element>,
        is_error: bool,
        ctx: &mut RouteContext<'_>,
    ) {
        if ctx.liveness.is_pending(id) {
            if is_error {
                if ctx.liveness.on_error(id).is_ok() {
                    debug!(id = %id, "liveness probe answered with error");
                }
            } else if let Ok(latency) = ctx.liveness.on_response(id, ctx.now) {
                self.publisher.xmpp(
                    "xmpp.ping.completed",
                    EventPayload::PingCompleted {
                        id: id.to_string(),
                        latency_ms: latency.as_millis() as u64,
                    },
                );
            }
            return;
        }

        if ctx.messaging.resolve_query(id).is_some() {
            self.publisher.xmpp(
                "xmpp.disco.result",
                EventPayload::DiscoResult {
                    id: id.to_string(),
                    from,
                    payload: payload.map(element_to_string),
                    is_error,
                },
            );
            return;
        }

        self.publisher.soft_error(
            "router",
            &SessionError::CorrelationMismatch { id: id.to_string() },
        );
    }

    fn report_errors(&self, stanza: &Stanza) {
        for report in stanza.error_reports() {
            self.publisher.soft_error(
                "router",
                &SessionError::Stanza {
                    condition: report.condition,
                    text: report.text,
                },
            );
        }
    }

    fn append_event(&self, room: &mut RoomState, address: String, event: RoomEvent) {
        room.append_event(event.clone());
        self.publisher.room(
            "room.event.appended",
            EventPayload::RoomEventAppended {
                room: address,
                event,
            },
        );
    }
}

fn element_to_string(element: &Element) -> String {
    let mut buffer = Vec::new();
    match element.write_to(&mut buffer) {
        Ok(()) => String::from_utf8_lossy(&buffer).into_owned(),
        Err(_) => String::new(),
    }
}
