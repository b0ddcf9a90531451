//! Connection lifecycle, reconnect backoff and liveness scheduling.
//!
//! [`ConnectionSessionManager`] exclusively owns the session and room state.
//! All mutation happens on one sequential timeline: either through direct
//! method calls or through the control loop started by
//! [`ConnectionSessionManager::spawn`].

use std::future::pending;
use std::sync::Arc;
use std::time::Duration;

use board_core::config::Config;
use board_core::event::{BroadcastEventBus, EventBus, EventPayload, MessageType};
use board_core::room::{Room, RoomState};
use serde::Serialize;
use tokio::sync::mpsc;
use tokio::time::{self, Instant, MissedTickBehavior};
use tracing::{debug, info, warn};

use crate::{
    address::decode_server_address,
    error::{ConnectionError, SessionError},
    handle::{SessionCommand, SessionHandle},
    ids::random_nickname,
    liveness::{LivenessMonitor, PendingPing},
    messaging::MessagingClient,
    publisher::EventPublisher,
    reconnect::ReconnectPolicy,
    router::{RouteContext, StanzaRouter},
    settings::SessionSettings,
    stanza::Stanza,
    transport::{
        ConnectEndpoint, StanzaTransport, TransportEvent, TransportEventReceiver,
        TransportStatus, transport_event_channel,
    },
};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub enum SessionStatus {
    Connecting,
    Connected,
    Disconnecting,
    Disconnected,
    ConnectionFailed,
}

impl From<&TransportStatus> for SessionStatus {
    fn from(status: &TransportStatus) -> Self {
        match status {
            TransportStatus::Connecting => SessionStatus::Connecting,
            TransportStatus::Connected { .. } => SessionStatus::Connected,
            TransportStatus::Disconnecting => SessionStatus::Disconnecting,
            TransportStatus::Disconnected => SessionStatus::Disconnected,
            TransportStatus::ConnectionFailed { .. } => SessionStatus::ConnectionFailed,
        }
    }
}

/// Point-in-time view of the session.
#[derive(Debug, Clone, PartialEq)]
pub struct Session {
    pub status: SessionStatus,
    pub own_identity: Option<String>,
    /// Delay the next automatic reconnect will use.
    pub reconnect_delay: Duration,
    pub pending_ping: Option<PendingPing>,
    pub last_latency: Option<Duration>,
    pub server: Option<String>,
    pub generation: u64,
}

#[derive(Debug, Clone, PartialEq)]
pub struct SessionSnapshot {
    pub session: Session,
    pub room: Room,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ScheduledReconnect {
    pub generation: u64,
    pub delay: Duration,
    pub at: Instant,
}

pub struct ConnectionSessionManager<T>
where
    T: StanzaTransport,
{
    transport: T,
    settings: SessionSettings,
    publisher: EventPublisher,
    router: StanzaRouter,
    messaging: MessagingClient,
    liveness: LivenessMonitor,
    reconnect: ReconnectPolicy,
    room: RoomState,
    status: SessionStatus,
    own_identity: Option<String>,
    server: Option<String>,
    generation: u64,
    local_disconnect: bool,
    events: Option<TransportEventReceiver>,
    scheduled: Option<ScheduledReconnect>,
}

impl<T> ConnectionSessionManager<T>
where
    T: StanzaTransport,
{
    const COMMAND_BUFFER: usize = 32;

    pub fn new(transport: T, settings: SessionSettings) -> Self {
        Self::with_publisher(transport, settings, EventPublisher::disabled())
    }

    pub fn with_event_bus(
        transport: T,
        settings: SessionSettings,
        event_bus: Arc<dyn EventBus>,
    ) -> Self {
        Self::with_publisher(transport, settings, EventPublisher::new(Some(event_bus)))
    }

    /// Builds a manager from loaded configuration, along with the event bus
    /// it publishes on. Subscribe before driving the session.
    pub fn from_config(transport: T, config: &Config) -> (Self, Arc<dyn EventBus>) {
        let event_bus: Arc<dyn EventBus> =
            Arc::new(BroadcastEventBus::new(config.event_bus.channel_capacity));
        let manager = Self::with_event_bus(
            transport,
            SessionSettings::from_config(config),
            event_bus.clone(),
        );
        (manager, event_bus)
    }

    fn with_publisher(transport: T, settings: SessionSettings, publisher: EventPublisher) -> Self {
        Self {
            transport,
            router: StanzaRouter::new(publisher.clone()),
            messaging: MessagingClient::new(publisher.clone(), settings.query_timeout),
            liveness: LivenessMonitor::new(
                settings.liveness_target.clone(),
                settings.liveness_timeout,
            ),
            reconnect: ReconnectPolicy::new(settings.reconnect_step, settings.reconnect_ceiling),
            room: RoomState::new(),
            status: SessionStatus::Disconnected,
            own_identity: None,
            server: None,
            generation: 0,
            local_disconnect: false,
            events: None,
            scheduled: None,
            settings,
            publisher,
        }
    }

    pub fn status(&self) -> SessionStatus {
        self.status
    }

    pub fn generation(&self) -> u64 {
        self.generation
    }

    pub fn room(&self) -> &RoomState {
        &self.room
    }

    pub fn scheduled_reconnect(&self) -> Option<ScheduledReconnect> {
        self.scheduled
    }

    pub fn session(&self) -> Session {
        Session {
            status: self.status,
            own_identity: self.own_identity.clone(),
            reconnect_delay: self.reconnect.current_delay(),
            pending_ping: self.liveness.pending().cloned(),
            last_latency: self.liveness.last_latency(),
            server: self.server.clone(),
            generation: self.generation,
        }
    }

    pub fn snapshot(&self) -> SessionSnapshot {
        SessionSnapshot {
            session: self.session(),
            room: self.room.room().clone(),
        }
    }

    /// Starts a fresh session against `encoded_address`, discarding all
    /// previous session and room state.
    pub async fn initialize(&mut self, encoded_address: &str) -> Result<(), SessionError> {
        let server = decode_server_address(encoded_address)?;

        if self.events.take().is_some() {
            if let Err(error) = self.transport.disconnect().await {
                debug!(%error, "tearing down previous connection failed");
            }
        }

        self.generation = self.generation.wrapping_add(1);
        self.room.reset();
        self.reconnect.reset();
        self.liveness = LivenessMonitor::new(
            self.settings.liveness_target.clone(),
            self.settings.liveness_timeout,
        );
        self.messaging.clear_queries();
        self.status = SessionStatus::Disconnected;
        self.own_identity = None;
        self.local_disconnect = false;
        self.scheduled = None;
        self.server = Some(server);

        info!(generation = self.generation, "session initialized");
        self.connect().await
    }

    /// Runs [`Self::initialize`] against the configured server address.
    pub async fn initialize_configured(&mut self) -> Result<(), SessionError> {
        let address = self.settings.server_address.clone().ok_or_else(|| {
            SessionError::InvalidAddress("no server address configured".to_string())
        })?;
        self.initialize(&address).await
    }

    /// Opens a transport connection for the current generation. The event
    /// channel exists before `connect` is issued so no status or stanza is
    /// missed.
    pub async fn connect(&mut self) -> Result<(), SessionError> {
        let Some(server) = self.server.clone() else {
            return Err(SessionError::InvalidAddress(
                "session has not been initialized".to_string(),
            ));
        };

        let (events_tx, events_rx) = transport_event_channel();
        self.events = Some(events_rx);
        self.status = SessionStatus::Connecting;

        info!(server = %server, "connecting");
        self.publisher.connection(
            "system.connection.connecting",
            EventPayload::ConnectionConnecting {
                server: server.clone(),
            },
        );

        let endpoint = ConnectEndpoint {
            server,
            domain: self.settings.domain.clone(),
            resource: self.settings.resource.clone(),
        };

        if let Err(error) = self.transport.connect(&endpoint, events_tx).await {
            self.handle_connect_error(error).await;
        }
        Ok(())
    }

    /// A connect call that fails outright ends the attempt. Reconnects are
    /// only ever scheduled from a `Disconnected` the transport reports.
    async fn handle_connect_error(&mut self, error: ConnectionError) {
        warn!(%error, "transport connect failed");
        self.on_status(TransportStatus::ConnectionFailed {
            reason: SessionError::TransportConnect(error.to_string()).to_string(),
        })
        .await;
    }

    pub async fn handle_event(&mut self, event: TransportEvent) {
        match event {
            TransportEvent::Status(status) => self.on_status(status).await,
            TransportEvent::Stanza(stanza) => self.handle_stanza(stanza).await,
        }
    }

    pub async fn on_status(&mut self, status: TransportStatus) {
        self.status = SessionStatus::from(&status);

        match status {
            TransportStatus::Connecting => debug!("transport connecting"),
            TransportStatus::Connected { jid } => self.on_connected(jid).await,
            TransportStatus::Disconnecting => info!("transport disconnecting"),
            TransportStatus::Disconnected => self.on_disconnected(),
            TransportStatus::ConnectionFailed { reason } => {
                warn!(reason = %reason, "connection failed");
                self.publisher.connection(
                    "system.connection.failed",
                    EventPayload::ConnectionFailed { reason },
                );
            }
        }
    }

    async fn on_connected(&mut self, jid: String) {
        self.reconnect.reset();
        self.scheduled = None;
        self.own_identity = Some(jid.clone());

        info!(jid = %jid, "connected");
        self.publisher.connection(
            "system.connection.established",
            EventPayload::ConnectionEstablished { jid },
        );

        self.room.reset();
        if let Err(error) = self.messaging.send_initial_presence(&mut self.transport).await {
            self.publisher.soft_error("session", &error);
        }

        let room = self.settings.room_address();
        let nickname = self
            .settings
            .nickname
            .clone()
            .unwrap_or_else(random_nickname);
        let options = self.settings.join_options();
        self.room.set_joined(room.clone(), nickname.clone());

        if let Err(error) = self
            .messaging
            .join_room(&mut self.transport, &room, &nickname, &options)
            .await
        {
            self.publisher.soft_error("session", &error);
        }
    }

    fn on_disconnected(&mut self) {
        self.own_identity = None;
        self.liveness.clear();
        self.messaging.clear_queries();

        if self.local_disconnect {
            info!("disconnected locally, not reconnecting");
            self.publisher.connection(
                "system.connection.lost",
                EventPayload::ConnectionLost {
                    reason: "user requested disconnect".to_string(),
                    will_retry: false,
                },
            );
            return;
        }

        let delay = self.reconnect.next_delay();
        let attempt = self.reconnect.attempt();
        self.scheduled = Some(ScheduledReconnect {
            generation: self.generation,
            delay,
            at: Instant::now() + delay,
        });

        let delay_ms = delay.as_millis() as u64;
        info!(attempt, delay_ms, "disconnected, reconnect scheduled");
        self.publisher.connection(
            "system.connection.lost",
            EventPayload::ConnectionLost {
                reason: "transport disconnected".to_string(),
                will_retry: true,
            },
        );
        self.publisher.connection(
            "system.connection.reconnecting",
            EventPayload::ConnectionReconnecting { attempt, delay_ms },
        );
    }

    /// Runs a scheduled reconnect. Reconnects scheduled by an earlier
    /// generation are discarded.
    pub async fn fire_reconnect(&mut self, generation: u64) {
        if generation != self.generation {
            debug!(
                generation,
                current = self.generation,
                "discarding stale reconnect"
            );
            return;
        }
        self.scheduled = None;

        if let Err(error) = self.connect().await {
            warn!(%error, "reconnect failed");
        }
    }

    /// User-initiated shutdown: leaves the room and tears the transport down
    /// without scheduling a reconnect.
    pub async fn disconnect(&mut self) -> Result<(), SessionError> {
        self.local_disconnect = true;
        self.scheduled = None;

        if self.status == SessionStatus::Connected {
            if let (Some(room), Some(nickname)) = (
                self.room.address().map(str::to_string),
                self.room.own_nickname().map(str::to_string),
            ) {
                if let Err(error) = self
                    .messaging
                    .leave_room(&mut self.transport, &room, &nickname)
                    .await
                {
                    warn!(%error, "failed to send room leave presence");
                }
            }
        }

        self.transport.disconnect().await?;
        Ok(())
    }

    pub async fn check_liveness(&mut self) {
        match self.liveness.check(self.status, Instant::now()) {
            Ok(Some(probe)) => {
                if let Err(error) = self.transport.send(&probe).await {
                    self.liveness.clear();
                    self.publisher.soft_error("liveness", &SessionError::from(error));
                }
            }
            Ok(None) => {}
            Err(error) => self.publisher.soft_error("liveness", &error),
        }
    }

    pub fn expire_liveness(&mut self, now: Instant) {
        let Some(error) = self.liveness.expire(now) else {
            return;
        };

        if let SessionError::LivenessTimeout { id } = &error {
            self.publisher.xmpp(
                "xmpp.ping.timeout",
                EventPayload::PingTimedOut { id: id.clone() },
            );
        }
        self.publisher.soft_error("liveness", &error);
    }

    pub fn expire_queries(&mut self, now: Instant) {
        self.messaging.expire_queries(now);
    }

    pub async fn handle_stanza(&mut self, stanza: Stanza) {
        debug!(kind = stanza.name(), "routing inbound stanza");
        let mut ctx = RouteContext {
            room: &mut self.room,
            liveness: &mut self.liveness,
            messaging: &mut self.messaging,
            now: Instant::now(),
        };

        if let Some(reply) = self.router.route(&stanza, &mut ctx) {
            if let Err(error) = self.transport.send(&reply).await {
                self.publisher.soft_error("router", &SessionError::from(error));
            }
        }
    }

    pub async fn send_message(
        &mut self,
        to: &str,
        body: &str,
        message_type: MessageType,
    ) -> Result<String, SessionError> {
        self.messaging
            .send_message(&mut self.transport, to, body, message_type)
            .await
    }

    pub async fn send_room_message(&mut self, body: &str) -> Result<String, SessionError> {
        let room = self
            .room
            .address()
            .map(str::to_string)
            .ok_or(SessionError::NotJoined)?;
        self.send_message(&room, body, MessageType::Groupchat).await
    }

    /// Sends a disco#info query. Without `to` the server domain is asked.
    pub async fn discover_info(
        &mut self,
        to: Option<&str>,
        node: Option<String>,
    ) -> Result<String, SessionError> {
        let to = to.unwrap_or(self.settings.domain.as_str()).to_string();
        self.messaging
            .discover_info(&mut self.transport, &to, node)
            .await
    }

    pub async fn discover_items(
        &mut self,
        to: Option<&str>,
        node: Option<String>,
    ) -> Result<String, SessionError> {
        let to = to.unwrap_or(self.settings.domain.as_str()).to_string();
        self.messaging
            .discover_items(&mut self.transport, &to, node)
            .await
    }

    /// Moves the manager onto its own task and returns the handle that
    /// drives it.
    pub fn spawn(self) -> SessionHandle {
        let (commands_tx, commands_rx) = mpsc::channel(Self::COMMAND_BUFFER);
        tokio::spawn(self.run(commands_rx));
        SessionHandle::new(commands_tx)
    }

    /// The control loop. Returns when every handle is dropped or on
    /// shutdown.
    pub async fn run(mut self, mut commands: mpsc::Receiver<SessionCommand>) {
        let period = self.settings.liveness_period;
        let mut liveness_tick = time::interval_at(Instant::now() + period, period);
        liveness_tick.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            let scheduled = self.scheduled;
            let ping_deadline = self.liveness.deadline();
            let query_deadline = self.messaging.next_query_deadline();

            // Transport events and timers drain before new commands.
            tokio::select! {
                biased;

                event = next_event(&mut self.events) => match event {
                    Some(event) => self.handle_event(event).await,
                    None => {
                        debug!("transport event channel closed");
                        self.events = None;
                    }
                },
                _ = sleep_until(scheduled.map(|s| s.at)) => {
                    if let Some(scheduled) = scheduled {
                        self.fire_reconnect(scheduled.generation).await;
                    }
                }
                _ = sleep_until(ping_deadline) => self.expire_liveness(Instant::now()),
                _ = sleep_until(query_deadline) => self.expire_queries(Instant::now()),
                _ = liveness_tick.tick() => self.check_liveness().await,
                command = commands.recv() => {
                    let Some(command) = command else {
                        break;
                    };
                    if !self.handle_command(command).await {
                        break;
                    }
                }
            }
        }

        debug!("session control loop stopped");
    }

    async fn handle_command(&mut self, command: SessionCommand) -> bool {
        match command {
            SessionCommand::Initialize { address, reply } => {
                let _ = reply.send(self.initialize(&address).await);
            }
            SessionCommand::InitializeConfigured { reply } => {
                let _ = reply.send(self.initialize_configured().await);
            }
            SessionCommand::SendMessage {
                to,
                body,
                message_type,
                reply,
            } => {
                let _ = reply.send(self.send_message(&to, &body, message_type).await);
            }
            SessionCommand::SendRoomMessage { body, reply } => {
                let _ = reply.send(self.send_room_message(&body).await);
            }
            SessionCommand::Disconnect { reply } => {
                let _ = reply.send(self.disconnect().await);
            }
            SessionCommand::DiscoverInfo { to, node, reply } => {
                let _ = reply.send(self.discover_info(to.as_deref(), node).await);
            }
            SessionCommand::DiscoverItems { to, node, reply } => {
                let _ = reply.send(self.discover_items(to.as_deref(), node).await);
            }
            SessionCommand::Snapshot { reply } => {
                let _ = reply.send(self.snapshot());
            }
            SessionCommand::Shutdown { reply } => {
                let _ = reply.send(());
                return false;
            }
        }
        true
    }
}

async fn next_event(events: &mut Option<TransportEventReceiver>) -> Option<TransportEvent> {
    match events {
        Some(receiver) => receiver.recv().await,
        None => pending().await,
    }
}

async fn sleep_until(deadline: Option<Instant>) {
    match deadline {
        Some(deadline) => time::sleep_until(deadline).await,
        None => pending().await,
    }
}
