//! Message translation between team chat and XMPP rooms.
//!
//! Decides which events are relayed, strips the self-addressed mention
//! prefix from room messages and renders bodies with the configured
//! format strings and filters.

use fancy_regex::Regex;
use tracing::debug;

use crate::common::error::ConfigError;
use crate::common::{BridgeMessage, MucMessage, Platform, TeamChatMessage};
use crate::config::types::Config;

use super::filter::{FilterDirection, MessageFilter};
use super::formatter::{FormatContext, MessageFormatter};

/// Translates and gates messages for both relay directions.
#[derive(Debug, Clone)]
pub struct MessageTranslator {
    nickname: String,
    /// Nickname as a standalone token anywhere in the body.
    mention: Regex,
    /// `<nick>:` or `<nick>,` plus whitespace at the start of the body.
    address_prefix: Regex,
    filter: MessageFilter,
    to_xmpp: MessageFormatter,
    to_team_chat: MessageFormatter,
}

impl MessageTranslator {
    /// Create a translator for the given bridge nickname.
    ///
    /// The nickname is matched literally; regex metacharacters in it carry
    /// no special meaning.
    pub fn new(
        nickname: impl Into<String>,
        filter: MessageFilter,
        to_xmpp: MessageFormatter,
        to_team_chat: MessageFormatter,
    ) -> Result<Self, ConfigError> {
        let nickname = nickname.into();
        let escaped = fancy_regex::escape(&nickname);

        let compile = |pattern: String| {
            Regex::new(&pattern).map_err(|e| ConfigError::InvalidValue {
                field: "xmpp.nick".to_string(),
                message: e.to_string(),
            })
        };

        Ok(Self {
            mention: compile(format!(r"(?<!\w){}(?!\w)", escaped))?,
            address_prefix: compile(format!(r"^{}[,:]\s+", escaped))?,
            nickname,
            filter,
            to_xmpp,
            to_team_chat,
        })
    }

    /// Build a translator from the bridge configuration.
    pub fn from_config(config: &Config) -> Result<Self, ConfigError> {
        let filter = MessageFilter::from_config(config.filters.as_ref());
        if filter.has_patterns() {
            debug!("Message filters active");
        }

        Self::new(
            config.xmpp.nick.clone(),
            filter,
            MessageFormatter::new(config.format.team_chat_to_xmpp.clone()),
            MessageFormatter::new(config.format.xmpp_to_team_chat.clone()),
        )
    }

    /// Translate a room message for relay into team chat.
    ///
    /// Returns `None` for the bridge's own messages, anonymous service
    /// messages, messages that do not mention the bridge and messages with
    /// nothing left after the address prefix.
    pub fn inbound(&self, msg: &MucMessage) -> Option<BridgeMessage> {
        if msg.sender_nickname.is_empty() {
            debug!(room = %msg.room, "Ignoring room message without sender");
            return None;
        }
        if msg.sender_nickname == self.nickname {
            debug!(room = %msg.room, "Ignoring echo of own room message");
            return None;
        }
        if !self.mentions_bridge(&msg.body) {
            debug!(room = %msg.room, sender = %msg.sender_nickname, "Ignoring room message not addressed to bridge");
            return None;
        }

        let body = self.strip_address(&msg.body);
        if body.trim().is_empty() {
            debug!(room = %msg.room, sender = %msg.sender_nickname, "Ignoring bare mention without content");
            return None;
        }

        Some(BridgeMessage {
            sender_display_name: msg.sender_nickname.clone(),
            body: body.to_string(),
            source_platform: Platform::Xmpp,
            source_channel_or_room: msg.room.to_string(),
        })
    }

    /// Translate a team-chat message for relay into an XMPP room.
    ///
    /// Returns `None` for anything authored by the bridge.
    pub fn outbound(&self, msg: &TeamChatMessage) -> Option<BridgeMessage> {
        if msg.is_from_self || msg.sender_nickname == self.nickname {
            debug!(channel = %msg.source_channel_name, "Ignoring own team-chat message");
            return None;
        }

        Some(BridgeMessage {
            sender_display_name: msg.sender_nickname.clone(),
            body: msg.body.clone(),
            source_platform: Platform::TeamChat,
            source_channel_or_room: msg.source_channel_name.clone(),
        })
    }

    /// Render a message for the XMPP room, or `None` if a filter blocks it.
    pub fn render_for_xmpp(&self, msg: &BridgeMessage) -> Option<String> {
        self.render(msg, &self.to_xmpp, FilterDirection::TeamChatToXmpp)
    }

    /// Render a message for team chat, or `None` if a filter blocks it.
    pub fn render_for_team_chat(&self, msg: &BridgeMessage) -> Option<String> {
        self.render(msg, &self.to_team_chat, FilterDirection::XmppToTeamChat)
    }

    fn render(
        &self,
        msg: &BridgeMessage,
        formatter: &MessageFormatter,
        direction: FilterDirection,
    ) -> Option<String> {
        let ctx = FormatContext::new(&msg.sender_display_name, &msg.body)
            .with_channel(&msg.source_channel_or_room);
        let text = formatter.format(&ctx);

        if self.filter.should_filter(direction, &text) {
            debug!(?direction, "Message blocked by filter");
            return None;
        }
        Some(text)
    }

    fn mentions_bridge(&self, body: &str) -> bool {
        self.mention.is_match(body).unwrap_or(false)
    }

    /// Strip one leading address prefix, if present.
    fn strip_address<'a>(&self, body: &'a str) -> &'a str {
        match self.address_prefix.find(body) {
            Ok(Some(m)) => &body[m.end()..],
            _ => body,
        }
    }
}
