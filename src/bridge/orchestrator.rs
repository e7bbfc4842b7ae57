//! Bridge orchestrator that ties team chat and XMPP together.
//!
//! Manages the bidirectional message flow: translation, room resolution
//! and delivery. Each direction runs as its own serial relay task.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

use crate::common::{MucMessage, TeamChatMessage};
use crate::xmpp::{XmppEvent, XmppHandle};

use super::formatter::split_message;
use super::team_chat::TeamChat;
use super::translator::MessageTranslator;

/// Result of relaying a single event.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RelayOutcome {
    /// Delivered to the named room or channel.
    Relayed { destination: String },
    /// Deliberately not relayed (own message, not addressed, filtered).
    Suppressed,
    /// Delivery failed; the message was dropped.
    Failed { reason: String },
}

/// The main bridge that orchestrates message flow.
pub struct BridgeOrchestrator<C> {
    xmpp: XmppHandle,
    team_chat: Arc<C>,
    translator: MessageTranslator,
}

impl<C: TeamChat> BridgeOrchestrator<C> {
    pub fn new(xmpp: XmppHandle, team_chat: Arc<C>, translator: MessageTranslator) -> Self {
        Self {
            xmpp,
            team_chat,
            translator,
        }
    }

    /// Relay one team-chat message into its XMPP room.
    pub async fn on_team_chat_message(&self, event: TeamChatMessage) -> RelayOutcome {
        let Some(msg) = self.translator.outbound(&event) else {
            return RelayOutcome::Suppressed;
        };
        let Some(text) = self.translator.render_for_xmpp(&msg) else {
            return RelayOutcome::Suppressed;
        };

        match self
            .xmpp
            .send_group_message(&text, &event.source_channel_name)
            .await
        {
            Ok(room) => {
                info!(channel = %event.source_channel_name, room = %room, "Team chat -> XMPP: {}", text);
                RelayOutcome::Relayed {
                    destination: room.to_string(),
                }
            }
            Err(e) if e.is_fatal() => {
                error!(channel = %event.source_channel_name, "Dropping team-chat message: {}", e);
                RelayOutcome::Failed {
                    reason: e.to_string(),
                }
            }
            Err(e) => {
                warn!(channel = %event.source_channel_name, "Dropping team-chat message: {}", e);
                RelayOutcome::Failed {
                    reason: e.to_string(),
                }
            }
        }
    }

    /// Relay one room message into its team-chat channel.
    pub async fn on_muc_message(&self, event: MucMessage) -> RelayOutcome {
        let Some(msg) = self.translator.inbound(&event) else {
            return RelayOutcome::Suppressed;
        };
        let Some(text) = self.translator.render_for_team_chat(&msg) else {
            return RelayOutcome::Suppressed;
        };

        let local_part = event.room.node_str().unwrap_or_else(|| event.room.domain_str());
        let channel = self.xmpp.mapper().to_channel(local_part);
        let identifier = match self.team_chat.resolve_identifier(&channel).await {
            Ok(identifier) => identifier,
            Err(e) => {
                warn!(room = %event.room, channel = %channel, "Dropping room message: {}", e);
                return RelayOutcome::Failed {
                    reason: e.to_string(),
                };
            }
        };

        for chunk in split_message(&text, C::MAX_MESSAGE_LEN) {
            if let Err(e) = self.team_chat.send_message(&identifier, &chunk).await {
                warn!(room = %event.room, channel = %channel, "Failed to send to team chat: {}", e);
                return RelayOutcome::Failed {
                    reason: e.to_string(),
                };
            }
        }

        info!(room = %event.room, channel = %channel, "XMPP -> team chat: {}", text);
        RelayOutcome::Relayed {
            destination: channel,
        }
    }

    /// Spawn the two relay tasks.
    ///
    /// Each ends once its input channel closes, after relaying everything
    /// already queued.
    pub fn spawn(
        self: Arc<Self>,
        mut team_chat_rx: mpsc::UnboundedReceiver<TeamChatMessage>,
        mut xmpp_rx: mpsc::UnboundedReceiver<XmppEvent>,
    ) -> RelayTasks {
        let outbound = tokio::spawn({
            let bridge = Arc::clone(&self);
            async move {
                while let Some(event) = team_chat_rx.recv().await {
                    bridge.on_team_chat_message(event).await;
                }
                debug!("Team-chat relay task finished");
            }
        });

        let inbound = tokio::spawn(async move {
            while let Some(event) = xmpp_rx.recv().await {
                match event {
                    XmppEvent::MucMessage(msg) => {
                        self.on_muc_message(msg).await;
                    }
                    XmppEvent::SessionStart => info!("XMPP session ready, relaying room messages"),
                }
            }
            debug!("XMPP relay task finished");
        });

        RelayTasks { outbound, inbound }
    }
}

/// The two running relay tasks.
pub struct RelayTasks {
    outbound: JoinHandle<()>,
    inbound: JoinHandle<()>,
}

impl RelayTasks {
    /// Drain both directions in dependency order.
    ///
    /// Call once the team-chat side has stopped producing. Waits up to
    /// `grace` for the team-chat relay to hand its queue to XMPP, then
    /// signals `xmpp_shutdown` so the session flushes and closes, then
    /// waits up to `grace` for the room relay to finish.
    pub async fn shutdown(mut self, xmpp_shutdown: &watch::Sender<bool>, grace: Duration) {
        if tokio::time::timeout(grace, &mut self.outbound).await.is_err() {
            warn!("Team-chat relay did not drain in {:?}, aborting", grace);
            self.outbound.abort();
        }

        let _ = xmpp_shutdown.send(true);

        if tokio::time::timeout(grace, &mut self.inbound).await.is_err() {
            warn!("XMPP relay did not finish in {:?}, aborting", grace);
            self.inbound.abort();
        }
    }
}
