//! Configuration type definitions.

use std::time::Duration;

use serde::Deserialize;

use crate::bridge::formatter::DEFAULT_FORMAT;

/// Default seconds to wait for a MUC join confirmation.
pub const DEFAULT_JOIN_TIMEOUT_SECS: u64 = 10;

/// Default seconds to wait for queued sends to flush on shutdown.
pub const DEFAULT_FLUSH_TIMEOUT_SECS: u64 = 5;

/// Root configuration structure.
#[derive(Debug, Clone, Deserialize)]
pub struct Config {
    pub xmpp: XmppConfig,
    pub discord: DiscordConfig,
    #[serde(default)]
    pub channels: Vec<ChannelMappingConfig>,
    #[serde(default)]
    pub format: FormatConfig,
    #[serde(default)]
    pub filters: Option<FiltersConfig>,
}

/// XMPP account and MUC settings.
#[derive(Debug, Clone, Deserialize)]
pub struct XmppConfig {
    /// Bare JID of the bridge account, e.g. `bridge@example.com`.
    pub jid: String,
    pub password: String,
    /// Nickname used in every room. Also the mention the bridge reacts to.
    pub nick: String,
    /// Conference host suffix, e.g. `conference.example.com`.
    pub host: String,
    #[serde(default = "default_join_timeout")]
    pub join_timeout: u64,
    #[serde(default = "default_flush_timeout")]
    pub flush_timeout: u64,
}

impl XmppConfig {
    pub fn join_timeout(&self) -> Duration {
        Duration::from_secs(self.join_timeout)
    }

    pub fn flush_timeout(&self) -> Duration {
        Duration::from_secs(self.flush_timeout)
    }
}

fn default_join_timeout() -> u64 {
    DEFAULT_JOIN_TIMEOUT_SECS
}

fn default_flush_timeout() -> u64 {
    DEFAULT_FLUSH_TIMEOUT_SECS
}

/// Discord bot configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct DiscordConfig {
    pub token: String,
}

/// One team-chat channel to XMPP room pair.
#[derive(Debug, Clone, Deserialize)]
pub struct ChannelMappingConfig {
    /// Team-chat channel name, without `#`.
    pub channel: String,
    /// Local part of the XMPP room.
    pub room: String,
}

/// Format strings per direction.
#[derive(Debug, Clone, Deserialize)]
pub struct FormatConfig {
    #[serde(default = "default_format")]
    pub team_chat_to_xmpp: String,
    #[serde(default = "default_format")]
    pub xmpp_to_team_chat: String,
}

impl Default for FormatConfig {
    fn default() -> Self {
        Self {
            team_chat_to_xmpp: default_format(),
            xmpp_to_team_chat: default_format(),
        }
    }
}

fn default_format() -> String {
    DEFAULT_FORMAT.to_string()
}

/// Message filtering configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct FiltersConfig {
    #[serde(default = "default_true")]
    pub enabled: bool,
    /// Patterns blocking messages going to XMPP.
    pub team_chat_to_xmpp: Option<Vec<String>>,
    /// Patterns blocking messages going to team chat.
    pub xmpp_to_team_chat: Option<Vec<String>>,
}

fn default_true() -> bool {
    true
}

impl Config {
    /// Ordered (channel, room) pairs as configured.
    pub fn channel_pairs(&self) -> Vec<(String, String)> {
        self.channels
            .iter()
            .map(|m| (m.channel.clone(), m.room.clone()))
            .collect()
    }
}
