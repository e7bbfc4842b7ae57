//! Discord bot client.
//!
//! Runs the serenity gateway connection, keeps a name -> channel directory
//! from guild data, forwards guild messages as [`TeamChatMessage`]s and
//! implements [`TeamChat`] for sending.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use backon::BackoffBuilder;
use serenity::async_trait;
use serenity::http::{Http, HttpBuilder};
use serenity::model::channel::{ChannelType, Message};
use serenity::model::gateway::Ready;
use serenity::model::guild::Guild;
use serenity::model::id::{ChannelId, UserId};
use serenity::prelude::*;
use serenity::Client;
use tokio::sync::{mpsc, watch, RwLock};
use tokio::time::sleep;
use tracing::{debug, error, info, warn};

use crate::bridge::mapper::CHANNEL_MARKER;
use crate::bridge::TeamChat;
use crate::common::error::TeamChatError;
use crate::common::TeamChatMessage;

/// Discord's message length limit, in bytes.
pub const DISCORD_MAX_MESSAGE_LEN: usize = 2000;

#[derive(Debug, Clone)]
enum DiscordBotEvent {
    Ready(Ready),
    GuildCreate(Guild),
    Message(Message),
    Disconnected,
}

struct DiscordBotEvents {
    events_tx: mpsc::UnboundedSender<DiscordBotEvent>,
}

#[async_trait]
impl EventHandler for DiscordBotEvents {
    async fn ready(&self, _context: Context, ready: Ready) {
        if let Err(error) = self.events_tx.send(DiscordBotEvent::Ready(ready)) {
            warn!("Failed to process discord event: {}", error);
        }
    }

    async fn guild_create(&self, _context: Context, guild: Guild, _is_new: Option<bool>) {
        if let Err(error) = self.events_tx.send(DiscordBotEvent::GuildCreate(guild)) {
            warn!("Failed to process discord event: {}", error);
        }
    }

    async fn message(&self, _context: Context, message: Message) {
        if let Err(error) = self.events_tx.send(DiscordBotEvent::Message(message)) {
            warn!("Failed to process discord event: {}", error);
        }
    }
}

/// Text channels known from guild data, by name and by id.
#[derive(Debug, Default)]
pub struct ChannelDirectory {
    by_name: HashMap<String, ChannelId>,
    by_id: HashMap<ChannelId, String>,
}

impl ChannelDirectory {
    /// Record a channel. The first channel seen with a given name wins.
    pub fn insert(&mut self, id: ChannelId, name: &str) {
        match self.by_name.get(name) {
            Some(existing) if *existing != id => {
                warn!(channel = %name, "Duplicate channel name, keeping the first one seen");
            }
            _ => {
                self.by_name.insert(name.to_string(), id);
                self.by_id.insert(id, name.to_string());
            }
        }
    }

    pub fn id(&self, name: &str) -> Option<ChannelId> {
        self.by_name.get(name).copied()
    }

    pub fn name(&self, id: ChannelId) -> Option<&str> {
        self.by_id.get(&id).map(String::as_str)
    }

    pub fn len(&self) -> usize {
        self.by_name.len()
    }
}

/// Sending side of the Discord integration.
#[derive(Clone)]
pub struct DiscordTeamChat {
    http: Arc<Http>,
    directory: Arc<RwLock<ChannelDirectory>>,
}

#[async_trait]
impl TeamChat for DiscordTeamChat {
    type Identifier = ChannelId;

    const MAX_MESSAGE_LEN: usize = DISCORD_MAX_MESSAGE_LEN;

    async fn resolve_identifier(&self, channel_name: &str) -> Result<ChannelId, TeamChatError> {
        let name = channel_name
            .strip_prefix(CHANNEL_MARKER)
            .unwrap_or(channel_name);

        self.directory
            .read()
            .await
            .id(name)
            .ok_or_else(|| TeamChatError::UnknownChannel {
                channel: channel_name.to_string(),
            })
    }

    async fn send_message(&self, identifier: &ChannelId, body: &str) -> Result<(), TeamChatError> {
        identifier.say(&self.http, body).await?;
        Ok(())
    }
}

fn build_http(token: &str) -> anyhow::Result<Http> {
    let reqwest_client = reqwest::Client::builder()
        .timeout(Duration::from_secs(15))
        .connect_timeout(Duration::from_secs(10))
        .build()?;

    Ok(HttpBuilder::new(token).client(reqwest_client).build())
}

async fn build_client(
    token: &str,
    events_tx: mpsc::UnboundedSender<DiscordBotEvent>,
) -> anyhow::Result<Client> {
    let intents =
        GatewayIntents::GUILD_MESSAGES | GatewayIntents::MESSAGE_CONTENT | GatewayIntents::GUILDS;

    let events = DiscordBotEvents { events_tx };
    let client = serenity::client::ClientBuilder::new_with_http(build_http(token)?, intents)
        .event_handler(events)
        .await?;
    Ok(client)
}

/// Create an exponential backoff iterator for Discord reconnection.
/// 5s initial, 5min max, factor 1.1, with jitter, unlimited retries.
fn discord_backoff() -> impl Iterator<Item = Duration> {
    backon::ExponentialBuilder::default()
        .with_min_delay(Duration::from_secs(5))
        .with_max_delay(Duration::from_secs(300))
        .with_factor(1.1)
        .with_jitter()
        .without_max_times()
        .build()
}

/// Gateway side of the Discord integration.
pub struct DiscordBot {
    client: Option<Client>,
    token: String,
    directory: Arc<RwLock<ChannelDirectory>>,
    events_rx: mpsc::UnboundedReceiver<DiscordBotEvent>,
    events_tx: mpsc::UnboundedSender<DiscordBotEvent>,
    messages_tx: mpsc::UnboundedSender<TeamChatMessage>,
    shutdown_rx: watch::Receiver<bool>,
}

impl DiscordBot {
    /// Build the bot and its sending half.
    ///
    /// Inbound guild messages are forwarded to `messages_tx`.
    pub async fn build(
        token: String,
        messages_tx: mpsc::UnboundedSender<TeamChatMessage>,
        shutdown_rx: watch::Receiver<bool>,
    ) -> anyhow::Result<(Self, DiscordTeamChat)> {
        let (events_tx, events_rx) = mpsc::unbounded_channel();
        let client = build_client(&token, events_tx.clone()).await?;
        let directory = Arc::new(RwLock::new(ChannelDirectory::default()));

        let team_chat = DiscordTeamChat {
            http: Arc::new(build_http(&token)?),
            directory: Arc::clone(&directory),
        };

        let bot = Self {
            client: Some(client),
            token,
            directory,
            events_rx,
            events_tx,
            messages_tx,
            shutdown_rx,
        };
        Ok((bot, team_chat))
    }

    pub async fn run(mut self) {
        let shard_manager = self.client.as_ref().map(|c| c.shard_manager.clone());
        let mut shutdown_rx = self.shutdown_rx.clone();

        tokio::select! {
            _ = Self::run_connection(&mut self.client, &self.token, &self.events_tx) => {},
            _ = Self::process_events(
                &mut self.events_rx,
                &self.directory,
                &self.messages_tx,
                &mut self.shutdown_rx,
            ) => {},
            _ = async {
                loop {
                    if shutdown_rx.changed().await.is_err() || *shutdown_rx.borrow() {
                        break;
                    }
                }
                if let Some(ref manager) = shard_manager {
                    info!("Initiating graceful Discord shutdown...");
                    manager.shutdown_all().await;
                    info!("Discord shutdown complete");
                }
            } => {}
        }
        info!("Discord task ended");
    }

    async fn run_connection(
        client: &mut Option<Client>,
        token: &str,
        events_tx: &mpsc::UnboundedSender<DiscordBotEvent>,
    ) {
        let mut backoff = discord_backoff();

        loop {
            info!("Connecting to Discord...");

            let mut client = match client.take() {
                Some(client) => client,
                None => match build_client(token, events_tx.clone()).await {
                    Ok(client) => {
                        backoff = discord_backoff();
                        client
                    }
                    Err(e) => {
                        error!("Failed to rebuild Discord client: {}", e);
                        let delay = backoff.next().unwrap_or(Duration::from_secs(300));
                        warn!("Retrying in {:.1}s...", delay.as_secs_f64());
                        sleep(delay).await;
                        continue;
                    }
                },
            };

            let result = client.start().await;
            if let Err(error) = events_tx.send(DiscordBotEvent::Disconnected) {
                warn!("Failed to process discord event: {}", error);
            }
            match result {
                Ok(()) => {
                    info!("Discord client disconnected normally");
                    break;
                }
                Err(e) => {
                    error!("Discord client error: {}", e);
                    let delay = backoff.next().unwrap_or(Duration::from_secs(300));
                    warn!(
                        "Discord disconnected. Reconnecting in {:.1}s...",
                        delay.as_secs_f64(),
                    );
                    sleep(delay).await;
                }
            }
        }
    }

    async fn process_events(
        events_rx: &mut mpsc::UnboundedReceiver<DiscordBotEvent>,
        directory: &RwLock<ChannelDirectory>,
        messages_tx: &mpsc::UnboundedSender<TeamChatMessage>,
        shutdown_rx: &mut watch::Receiver<bool>,
    ) {
        let mut self_id: Option<UserId> = None;

        loop {
            tokio::select! {
                event = events_rx.recv() => {
                    let Some(event) = event else {
                        debug!("Discord events channel closed.");
                        break;
                    };
                    match event {
                        DiscordBotEvent::Ready(ready) => {
                            info!("Discord bot connected as {}", ready.user.name);
                            self_id = Some(ready.user.id);
                        }
                        DiscordBotEvent::GuildCreate(guild) => {
                            let mut directory = directory.write().await;
                            for (id, channel) in &guild.channels {
                                if channel.kind == ChannelType::Text {
                                    directory.insert(*id, &channel.name);
                                }
                            }
                            info!(guild = %guild.name, channels = directory.len(), "Guild channels loaded");
                        }
                        DiscordBotEvent::Message(message) => {
                            let channel_name = directory.read().await.name(message.channel_id).map(str::to_string);
                            let Some(channel_name) = channel_name else {
                                debug!(channel_id = %message.channel_id, "Ignoring message from unknown channel");
                                continue;
                            };
                            if message.guild_id.is_none() || message.content.trim().is_empty() {
                                continue;
                            }

                            let event = TeamChatMessage {
                                sender_nickname: display_name(&message),
                                body: message.content.clone(),
                                source_channel_name: channel_name,
                                is_from_self: Some(message.author.id) == self_id,
                            };
                            if let Err(e) = messages_tx.send(event) {
                                warn!("Failed to forward Discord message: {}", e);
                            }
                        }
                        DiscordBotEvent::Disconnected => {
                            self_id = None;
                        }
                    }
                }

                changed = shutdown_rx.changed() => {
                    if changed.is_err() || *shutdown_rx.borrow() {
                        info!("Shutdown signal received, stopping event processing");
                        break;
                    }
                }
            }
        }
    }
}

/// Guild nickname, then global display name, then username.
fn display_name(message: &Message) -> String {
    pick_display_name(
        message.member.as_ref().and_then(|m| m.nick.as_deref()),
        message.author.global_name.as_deref(),
        &message.author.name,
    )
}

fn pick_display_name(nick: Option<&str>, global_name: Option<&str>, username: &str) -> String {
    nick.or(global_name).unwrap_or(username).to_string()
}
