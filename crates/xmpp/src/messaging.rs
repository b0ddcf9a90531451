use std::{collections::HashMap, time::Duration};

use board_core::event::{EventPayload, MessageType};
use tokio::time::Instant;
use tracing::{debug, info};
use xmpp_parsers::{
    chatstates::ChatState as XmppChatState,
    disco,
    iq::Iq,
    jid::Jid,
    message::{Id, Lang, Message, MessageType as XmppMessageType},
    minidom::Element,
    muc::{Muc, muc::History},
    presence::{Presence, Type as PresenceType},
};

use crate::{
    error::SessionError, ids::unique_id, publisher::EventPublisher, stanza::Stanza,
    transport::StanzaTransport,
};

pub const LEAVE_STATUS: &str = "Window closed";

/// Room-join metadata carried in the join presence.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct JoinOptions {
    pub password: Option<String>,
    /// Replay filter sent as-is; any combination of `maxchars`,
    /// `maxstanzas`, `seconds` and `since`.
    pub history: Option<History>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DiscoKind {
    Info,
    Items,
}

#[derive(Debug, Clone)]
struct PendingQuery {
    kind: DiscoKind,
    deadline: Instant,
}

/// Composes outbound stanzas and tracks outstanding disco queries.
#[derive(Debug)]
pub struct MessagingClient {
    publisher: EventPublisher,
    query_timeout: Duration,
    pending_queries: HashMap<String, PendingQuery>,
}

impl MessagingClient {
    pub fn new(publisher: EventPublisher, query_timeout: Duration) -> Self {
        Self {
            publisher,
            query_timeout,
            pending_queries: HashMap::new(),
        }
    }

    /// Sends a message and returns its id. Nothing is retried.
    pub async fn send_message<T: StanzaTransport>(
        &mut self,
        transport: &mut T,
        to: &str,
        body: &str,
        message_type: MessageType,
    ) -> Result<String, SessionError> {
        let (id, stanza) = build_message_stanza(to, body, message_type)?;
        transport.send(&stanza).await?;

        debug!(id = %id, to = %to, "message sent");
        self.publisher.xmpp(
            "xmpp.message.sent",
            EventPayload::MessageSent {
                id: id.clone(),
                to: to.to_string(),
                message_type,
            },
        );
        Ok(id)
    }

    pub async fn send_initial_presence<T: StanzaTransport>(
        &self,
        transport: &mut T,
    ) -> Result<(), SessionError> {
        let presence = Presence::new(PresenceType::None);
        transport
            .send(&Stanza::Presence(Box::new(presence)))
            .await?;
        Ok(())
    }

    /// Sends the join presence followed by an `active` chat state. The join
    /// itself is not awaited; the roster fills from inbound presence.
    pub async fn join_room<T: StanzaTransport>(
        &mut self,
        transport: &mut T,
        room: &str,
        nickname: &str,
        options: &JoinOptions,
    ) -> Result<(), SessionError> {
        let join = build_join_stanza(room, nickname, options)?;
        let active = build_active_state_stanza(room)?;

        transport.send(&join).await?;
        transport.send(&active).await?;

        info!(room = %room, nick = %nickname, "room join requested");
        self.publisher.room(
            "room.join.requested",
            EventPayload::RoomJoinRequested {
                room: room.to_string(),
                nick: nickname.to_string(),
            },
        );
        Ok(())
    }

    pub async fn leave_room<T: StanzaTransport>(
        &mut self,
        transport: &mut T,
        room: &str,
        nickname: &str,
    ) -> Result<(), SessionError> {
        let stanza = build_leave_stanza(room, nickname)?;
        transport.send(&stanza).await?;
        info!(room = %room, nick = %nickname, "room leave sent");
        Ok(())
    }

    pub async fn discover_info<T: StanzaTransport>(
        &mut self,
        transport: &mut T,
        to: &str,
        node: Option<String>,
    ) -> Result<String, SessionError> {
        let to_jid = parse_jid(to)?;
        let id = unique_id(Some("disco"));
        let iq = Iq::from_get(id.clone(), disco::DiscoInfoQuery { node }).with_to(to_jid);
        self.send_query(transport, id, DiscoKind::Info, iq).await
    }

    pub async fn discover_items<T: StanzaTransport>(
        &mut self,
        transport: &mut T,
        to: &str,
        node: Option<String>,
    ) -> Result<String, SessionError> {
        let to_jid = parse_jid(to)?;
        let id = unique_id(Some("disco"));
        let query = disco::DiscoItemsQuery { node, rsm: None };
        let iq = Iq::from_get(id.clone(), query).with_to(to_jid);
        self.send_query(transport, id, DiscoKind::Items, iq).await
    }

    /// Removes and returns the query matching a response id.
    pub fn resolve_query(&mut self, id: &str) -> Option<DiscoKind> {
        self.pending_queries.remove(id).map(|query| query.kind)
    }

    pub fn has_pending_query(&self, id: &str) -> bool {
        self.pending_queries.contains_key(id)
    }

    pub fn next_query_deadline(&self) -> Option<Instant> {
        self.pending_queries.values().map(|query| query.deadline).min()
    }

    /// Drops every query whose deadline has passed and returns their ids.
    pub fn expire_queries(&mut self, now: Instant) -> Vec<String> {
        let expired: Vec<String> = self
            .pending_queries
            .iter()
            .filter(|(_, query)| query.deadline <= now)
            .map(|(id, _)| id.clone())
            .collect();
        for id in &expired {
            self.pending_queries.remove(id);
            debug!(id = %id, "disco query expired without response");
        }
        expired
    }

    pub fn clear_queries(&mut self) {
        self.pending_queries.clear();
    }

    async fn send_query<T: StanzaTransport>(
        &mut self,
        transport: &mut T,
        id: String,
        kind: DiscoKind,
        iq: Iq,
    ) -> Result<String, SessionError> {
        transport.send(&Stanza::Iq(Box::new(iq))).await?;
        self.pending_queries.insert(
            id.clone(),
            PendingQuery {
                kind,
                deadline: Instant::now() + self.query_timeout,
            },
        );
        debug!(id = %id, ?kind, "disco query sent");
        Ok(id)
    }
}

fn parse_jid(jid: &str) -> Result<Jid, SessionError> {
    jid.parse()
        .map_err(|_| SessionError::InvalidJid(jid.to_string()))
}

fn occupant_jid(room: &str, nickname: &str) -> Result<Jid, SessionError> {
    parse_jid(&format!("{room}/{nickname}"))
}

fn build_message_stanza(
    to: &str,
    body: &str,
    message_type: MessageType,
) -> Result<(String, Stanza), SessionError> {
    let to_jid = parse_jid(to)?;

    let xmpp_type = match message_type {
        MessageType::Chat => XmppMessageType::Chat,
        MessageType::Groupchat => XmppMessageType::Groupchat,
        MessageType::Normal => XmppMessageType::Normal,
        MessageType::Headline => XmppMessageType::Headline,
        MessageType::Error => XmppMessageType::Error,
    };

    let id = unique_id(None);
    let mut msg = Message::new_with_type(xmpp_type, Some(to_jid));
    msg.id = Some(Id(id.clone()));
    msg.bodies.insert(Lang::new(), body.to_string());

    Ok((id, Stanza::Message(Box::new(msg))))
}

fn build_join_stanza(
    room: &str,
    nickname: &str,
    options: &JoinOptions,
) -> Result<Stanza, SessionError> {
    let mut presence = Presence::new(PresenceType::None);
    presence.to = Some(occupant_jid(room, nickname)?);

    let mut muc = Muc::new();
    if let Some(password) = options.password.as_ref().filter(|p| !p.is_empty()) {
        muc = muc.with_password(password.clone());
    }
    if let Some(history) = options.history.clone() {
        muc = muc.with_history(history);
    }
    let muc_element: Element = muc.into();
    presence.payloads.push(muc_element);

    Ok(Stanza::Presence(Box::new(presence)))
}

fn build_active_state_stanza(room: &str) -> Result<Stanza, SessionError> {
    let room_jid = parse_jid(room)?;
    let mut msg = Message::new_with_type(XmppMessageType::Groupchat, Some(room_jid));
    msg.id = Some(Id(unique_id(None)));
    let state: Element = XmppChatState::Active.into();
    msg.payloads.push(state);
    Ok(Stanza::Message(Box::new(msg)))
}

fn build_leave_stanza(room: &str, nickname: &str) -> Result<Stanza, SessionError> {
    let mut presence = Presence::new(PresenceType::Unavailable);
    presence.to = Some(occupant_jid(room, nickname)?);
    presence
        .statuses
        .insert(Lang::new(), LEAVE_STATUS.to_string());
    Ok(Stanza::Presence(Box::new(presence)))
}
