//! XMPP session lifecycle and event dispatch.
//!
//! One [`XmppConnection`] owns the transport and runs the event loop. Every
//! other task talks to it through a cloneable [`XmppHandle`].

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{anyhow, Result};
use tokio::sync::{mpsc, watch};
use tokio_xmpp::parsers::BareJid;
use tracing::{debug, error, info, warn};

use crate::bridge::mapper::ChannelMapper;
use crate::common::error::{RelayError, RelayResult};
use crate::common::MucMessage;

use super::rooms::RoomSessionManager;
use super::state::ConnectionState;
use super::transport::{TransportEvent, XmppTransport, BRIDGE_EXTENSIONS};

/// Requests funneled into the event loop.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConnectionCommand {
    Join { room: BareJid },
    GroupMessage { room: BareJid, body: String },
}

/// Event kinds subscribers can register for.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EventKind {
    SessionStart,
    MucMessage,
}

/// Events delivered to subscribers.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum XmppEvent {
    SessionStart,
    MucMessage(MucMessage),
}

impl XmppEvent {
    fn kind(&self) -> EventKind {
        match self {
            XmppEvent::SessionStart => EventKind::SessionStart,
            XmppEvent::MucMessage(_) => EventKind::MucMessage,
        }
    }
}

/// Owns the XMPP session and its single event loop.
pub struct XmppConnection<T> {
    transport: T,
    nickname: String,
    state_tx: watch::Sender<ConnectionState>,
    rooms: Arc<RoomSessionManager>,
    commands_rx: mpsc::UnboundedReceiver<ConnectionCommand>,
    subscribers: HashMap<EventKind, Vec<mpsc::UnboundedSender<XmppEvent>>>,
    flush_timeout: Duration,
    shutdown_rx: watch::Receiver<bool>,
    established: bool,
}

/// Cloneable front door to a running [`XmppConnection`].
#[derive(Debug, Clone)]
pub struct XmppHandle {
    state_rx: watch::Receiver<ConnectionState>,
    rooms: Arc<RoomSessionManager>,
    mapper: Arc<ChannelMapper>,
    commands_tx: mpsc::UnboundedSender<ConnectionCommand>,
}

impl<T: XmppTransport> XmppConnection<T> {
    pub fn new(
        transport: T,
        nickname: impl Into<String>,
        mapper: Arc<ChannelMapper>,
        join_timeout: Duration,
        flush_timeout: Duration,
        shutdown_rx: watch::Receiver<bool>,
    ) -> (Self, XmppHandle) {
        let (state_tx, state_rx) = watch::channel(ConnectionState::Disconnected);
        let (commands_tx, commands_rx) = mpsc::unbounded_channel();
        let rooms = Arc::new(RoomSessionManager::new(commands_tx.clone(), join_timeout));

        let handle = XmppHandle {
            state_rx,
            rooms: Arc::clone(&rooms),
            mapper,
            commands_tx,
        };

        let connection = Self {
            transport,
            nickname: nickname.into(),
            state_tx,
            rooms,
            commands_rx,
            subscribers: HashMap::new(),
            flush_timeout,
            shutdown_rx,
            established: false,
        };

        (connection, handle)
    }

    /// Register for the given event kinds on one channel.
    ///
    /// Subscriptions survive reconnects.
    pub fn subscribe(&mut self, kinds: &[EventKind]) -> mpsc::UnboundedReceiver<XmppEvent> {
        let (tx, rx) = mpsc::unbounded_channel();
        for kind in kinds {
            self.subscribers.entry(*kind).or_default().push(tx.clone());
        }
        rx
    }

    /// Whether the last `run` reached `Ready`.
    pub fn was_established(&self) -> bool {
        self.established
    }

    pub fn state(&self) -> ConnectionState {
        *self.state_tx.borrow()
    }

    /// Run one full session: connect, serve until disconnect or shutdown.
    ///
    /// Returns `Ok` after a graceful shutdown and an error when the session
    /// ended any other way, so the caller can decide to reconnect.
    pub async fn run(&mut self) -> Result<()> {
        if *self.shutdown_rx.borrow() {
            return Ok(());
        }

        self.established = false;
        self.transition(ConnectionState::Connecting);
        info!("Connecting to XMPP server");
        if let Err(e) = self.transport.connect().await {
            self.teardown(&e.to_string()).await;
            return Err(e.into());
        }

        loop {
            tokio::select! {
                biased;

                changed = self.shutdown_rx.changed() => {
                    if changed.is_err() || *self.shutdown_rx.borrow() {
                        self.shutdown().await;
                        return Ok(());
                    }
                }

                event = self.transport.next_event() => {
                    let Some(event) = event else {
                        return self.fail("transport closed").await;
                    };
                    if let TransportEvent::Disconnected { reason } = event {
                        return self.fail(&reason).await;
                    }
                    if let Err(e) = self.handle_event(event).await {
                        error!("XMPP session setup failed: {}", e);
                        self.teardown(&e.to_string()).await;
                        return Err(e);
                    }
                }

                Some(command) = self.commands_rx.recv() => {
                    self.handle_command(command).await;
                }
            }
        }
    }

    async fn handle_event(&mut self, event: TransportEvent) -> Result<()> {
        match event {
            TransportEvent::Authenticated { bound_jid } => {
                info!(jid = %bound_jid, "Authenticated");
                self.transition(ConnectionState::Authenticated);
            }
            TransportEvent::SessionStart => self.on_session_start().await?,
            TransportEvent::GroupMessage(msg) => {
                if self.state().accepts_sends() {
                    self.publish(XmppEvent::MucMessage(msg));
                } else {
                    debug!(room = %msg.room, state = %self.state(), "Dropping room message before ready");
                }
            }
            TransportEvent::RoomJoined { room } => self.rooms.confirm_joined(&room).await,
            TransportEvent::RoomJoinFailed { room, reason } => {
                self.rooms.reject(&room, &reason).await;
            }
            TransportEvent::Disconnected { .. } => {}
        }
        Ok(())
    }

    async fn on_session_start(&mut self) -> Result<()> {
        if self.state() != ConnectionState::Authenticated {
            return Err(anyhow!("Session started in state {}", self.state()));
        }

        self.transport.fetch_roster().await?;
        self.transport.send_presence().await?;
        self.transition(ConnectionState::Ready);
        self.established = true;
        self.transport.register_extensions(&BRIDGE_EXTENSIONS).await?;

        info!("XMPP session ready");
        self.publish(XmppEvent::SessionStart);
        Ok(())
    }

    async fn handle_command(&mut self, command: ConnectionCommand) {
        let state = self.state();

        match command {
            ConnectionCommand::Join { room } => {
                if !state.accepts_sends() {
                    self.rooms.fail_pending(&room, RelayError::NotReady { state }).await;
                    return;
                }
                info!(room = %room, "Joining room");
                if let Err(e) = self.transport.join_room(&room, &self.nickname).await {
                    self.rooms.reject(&room, &e.to_string()).await;
                }
            }
            ConnectionCommand::GroupMessage { room, body } => {
                if !state.accepts_sends() {
                    warn!(room = %room, state = %state, "Dropping queued message, connection not ready");
                    return;
                }
                self.send_to_room(&room, &body).await;
            }
        }
    }

    /// Send to a room joined in this session. Anything else is stale.
    async fn send_to_room(&mut self, room: &BareJid, body: &str) {
        if !self.rooms.is_joined(room).await {
            warn!(room = %room, "Dropping message for a room not joined in this session");
            return;
        }
        match self.transport.send_group_message(room, body).await {
            Ok(()) => debug!(room = %room, "Sent group message"),
            Err(e) => warn!(room = %room, "Failed to send group message: {}", e),
        }
    }

    /// Deliver an event to every subscriber of its kind, in order.
    fn publish(&mut self, event: XmppEvent) {
        if let Some(subscribers) = self.subscribers.get_mut(&event.kind()) {
            subscribers.retain(|tx| tx.send(event.clone()).is_ok());
        }
    }

    /// Drain queued sends within the flush window, then close the transport.
    async fn shutdown(&mut self) {
        info!("Disconnecting from XMPP server");
        let was_ready = self.state().accepts_sends();
        let flush_timeout = self.flush_timeout;
        self.transition(ConnectionState::Disconnecting);

        if was_ready {
            let flush = async {
                while let Ok(command) = self.commands_rx.try_recv() {
                    match command {
                        ConnectionCommand::GroupMessage { room, body } => {
                            self.send_to_room(&room, &body).await;
                        }
                        ConnectionCommand::Join { room } => {
                            self.rooms
                                .fail_pending(
                                    &room,
                                    RelayError::NotReady {
                                        state: ConnectionState::Disconnecting,
                                    },
                                )
                                .await;
                        }
                    }
                }
            };
            if tokio::time::timeout(flush_timeout, flush).await.is_err() {
                warn!("Flush timed out after {:?}, dropping remaining messages", flush_timeout);
            }
        }

        if let Err(e) = self.transport.disconnect().await {
            warn!("Error while closing XMPP stream: {}", e);
        }
        self.teardown("shutdown").await;
    }

    async fn fail(&mut self, reason: &str) -> Result<()> {
        error!(reason = %reason, "XMPP session lost");
        self.teardown(reason).await;
        Err(RelayError::TransportDisconnect {
            reason: reason.to_string(),
        }
        .into())
    }

    /// Forget the session: rooms, pending joins and queued commands.
    async fn teardown(&mut self, reason: &str) {
        self.rooms.reset(reason).await;

        let mut dropped = 0;
        while let Ok(command) = self.commands_rx.try_recv() {
            match command {
                ConnectionCommand::GroupMessage { .. } => dropped += 1,
                ConnectionCommand::Join { room } => {
                    self.rooms
                        .fail_pending(
                            &room,
                            RelayError::TransportDisconnect {
                                reason: reason.to_string(),
                            },
                        )
                        .await;
                }
            }
        }
        if dropped > 0 {
            warn!(dropped, reason = %reason, "Dropped queued messages from the closed session");
        }

        self.transition(ConnectionState::Disconnected);
    }

    fn transition(&self, next: ConnectionState) {
        let current = self.state();
        if current == next {
            return;
        }
        if !current.can_transition_to(next) {
            warn!(from = %current, to = %next, "Unexpected connection state transition");
        }
        debug!(from = %current, to = %next, "Connection state changed");
        self.state_tx.send_replace(next);
    }
}

impl XmppHandle {
    pub fn state(&self) -> ConnectionState {
        *self.state_rx.borrow()
    }

    /// Watch for state changes.
    #[cfg(test)]
    pub fn state_changes(&self) -> watch::Receiver<ConnectionState> {
        self.state_rx.clone()
    }

    /// Send `body` to the room mapped from `channel`, joining it first.
    ///
    /// Returns the room the message was queued for.
    pub async fn send_group_message(&self, body: &str, channel: &str) -> RelayResult<BareJid> {
        let state = self.state();
        if !state.accepts_sends() {
            return Err(RelayError::NotReady { state });
        }

        let address = self.mapper.to_room(channel);
        let room: BareJid = address.parse().map_err(|e| RelayError::InvalidRoom {
            room: address.clone(),
            reason: format!("{}", e),
        })?;
        let room = self.rooms.ensure_joined(&room).await?;

        self.commands_tx
            .send(ConnectionCommand::GroupMessage {
                room: room.clone(),
                body: body.to_string(),
            })
            .map_err(|_| RelayError::TransportDisconnect {
                reason: "connection loop has stopped".to_string(),
            })?;
        Ok(room)
    }

    #[cfg(test)]
    pub async fn joined_rooms(&self) -> Vec<BareJid> {
        self.rooms.joined_rooms().await
    }

    pub fn mapper(&self) -> &ChannelMapper {
        &self.mapper
    }
}
