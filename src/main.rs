//! mucbridge - team chat to XMPP multi-user chat bridge
//!
//! Relays messages between Discord channels and XMPP MUC rooms. Messages
//! from XMPP are only relayed when they mention the bridge's nickname.

mod bridge;
mod common;
mod config;
mod discord;
mod xmpp;

use std::sync::Arc;
use std::time::Duration;

use anyhow::Result;
use backon::{BackoffBuilder, ExponentialBuilder};
use tokio::signal;
use tokio::sync::{mpsc, watch};
use tracing::{error, info, warn};

use bridge::{BridgeOrchestrator, ChannelMapper, MessageTranslator};
use common::TeamChatMessage;
use config::{env::get_config_path, load_and_validate};
use discord::DiscordBot;
use xmpp::{EventKind, TokioXmppTransport, XmppConnection};

/// Grace period for each task after the shutdown signal, on top of the flush timeout.
const SHUTDOWN_GRACE: Duration = Duration::from_secs(5);

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize logging
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive(tracing::Level::INFO.into()),
        )
        .init();

    info!("mucbridge v{} starting...", env!("CARGO_PKG_VERSION"));

    // Load configuration
    let config_path = get_config_path();
    info!("Loading configuration from {}...", config_path);

    let config = load_and_validate(&config_path).map_err(|e| {
        error!("Failed to load configuration: {}", e);
        error!("Please ensure {} exists and is properly formatted.", config_path);
        e
    })?;

    info!("Configuration loaded successfully");
    info!("  XMPP JID: {}", config.xmpp.jid);
    info!("  Nickname: {}", config.xmpp.nick);

    // Discord intake stops first; XMPP flushes and closes after the relay drains.
    let (intake_tx, intake_rx) = watch::channel(false);
    let (shutdown_tx, shutdown_rx) = watch::channel(false);

    // ============================================================
    // Bridge core
    // ============================================================

    let mapper = Arc::new(ChannelMapper::new(config.channel_pairs(), &config.xmpp.host)?);
    if mapper.is_empty() {
        warn!("No channel mappings configured, channels map to rooms of the same name");
    }
    info!("  Conference host: {}", mapper.host());
    info!("  Channel mappings: {}", mapper.len());
    let translator = MessageTranslator::from_config(&config)?;

    let transport = TokioXmppTransport::new(
        config.xmpp.jid.clone(),
        config.xmpp.password.clone(),
    );
    let (mut connection, xmpp_handle) = XmppConnection::new(
        transport,
        config.xmpp.nick.clone(),
        mapper,
        config.xmpp.join_timeout(),
        config.xmpp.flush_timeout(),
        shutdown_rx.clone(),
    );
    let xmpp_rx = connection.subscribe(&[EventKind::SessionStart, EventKind::MucMessage]);

    // Discord -> XMPP channel
    let (team_chat_tx, team_chat_rx) = mpsc::unbounded_channel::<TeamChatMessage>();

    let (discord_bot, team_chat) =
        DiscordBot::build(config.discord.token.clone(), team_chat_tx, intake_rx).await?;

    let orchestrator = Arc::new(BridgeOrchestrator::new(
        xmpp_handle,
        Arc::new(team_chat),
        translator,
    ));
    let relay_tasks = orchestrator.spawn(team_chat_rx, xmpp_rx);

    // ============================================================
    // Spawn tasks
    // ============================================================

    let mut discord_task = tokio::spawn(discord_bot.run());

    let mut xmpp_shutdown_rx = shutdown_rx.clone();
    let mut xmpp_task = tokio::spawn(async move {
        let mut backoff = xmpp_backoff();

        loop {
            match connection.run().await {
                Ok(()) => {
                    info!("XMPP connection closed");
                    break;
                }
                Err(e) => error!("XMPP connection lost: {:#}", e),
            }

            if connection.was_established() {
                backoff = xmpp_backoff();
            }

            let delay = backoff.next().unwrap_or(Duration::from_secs(300));
            warn!("Reconnecting to XMPP in {:.1}s...", delay.as_secs_f64());

            tokio::select! {
                _ = tokio::time::sleep(delay) => {}
                changed = xmpp_shutdown_rx.changed() => {
                    if changed.is_err() || *xmpp_shutdown_rx.borrow() {
                        info!("Shutdown requested during XMPP reconnect wait");
                        break;
                    }
                }
            }
        }
    });

    info!("Bridge running. Press Ctrl+C to stop.");

    // ============================================================
    // Wait for shutdown
    // ============================================================

    tokio::select! {
        biased;

        _ = shutdown_signal() => {
            info!("Received shutdown signal, shutting down gracefully...");
        }
        _ = &mut xmpp_task => {
            warn!("XMPP task exited unexpectedly");
        }
        _ = &mut discord_task => {
            warn!("Discord task exited unexpectedly");
        }
    }

    // 1. Stop taking messages from Discord. The bot drops its sender on exit.
    let _ = intake_tx.send(true);
    if !discord_task.is_finished()
        && tokio::time::timeout(SHUTDOWN_GRACE, &mut discord_task).await.is_err()
    {
        warn!("Discord shutdown timed out, aborting");
        discord_task.abort();
    }

    // 2. Drain queued team-chat messages, then 3. let XMPP flush and close.
    let flush_timeout = config.xmpp.flush_timeout();
    relay_tasks
        .shutdown(&shutdown_tx, flush_timeout + SHUTDOWN_GRACE)
        .await;

    if !xmpp_task.is_finished() {
        match tokio::time::timeout(flush_timeout + SHUTDOWN_GRACE, &mut xmpp_task).await {
            Ok(_) => info!("XMPP connection closed cleanly"),
            Err(_) => {
                warn!("XMPP shutdown timed out, aborting");
                xmpp_task.abort();
            }
        }
    }

    info!("mucbridge stopped");
    Ok(())
}

/// Backoff between XMPP reconnect attempts.
fn xmpp_backoff() -> impl Iterator<Item = Duration> {
    ExponentialBuilder::default()
        .with_min_delay(Duration::from_secs(5))
        .with_max_delay(Duration::from_secs(300))
        .with_factor(1.1)
        .with_jitter()
        .without_max_times()
        .build()
}

/// Wait for Ctrl+C or SIGTERM.
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            error!("Failed to listen for Ctrl+C: {}", e);
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut sigterm) => {
                sigterm.recv().await;
            }
            Err(e) => {
                error!("Failed to install SIGTERM handler: {}", e);
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }
}
