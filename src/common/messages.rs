//! Canonical message types for bridge communication.
//!
//! This module defines the single source of truth for the event shapes
//! exchanged between the team-chat side, the XMPP side and the bridge.

use std::fmt;

use tokio_xmpp::parsers::BareJid;

/// Platform a relayed message originated on.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Platform {
    TeamChat,
    Xmpp,
}

impl fmt::Display for Platform {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Platform::TeamChat => write!(f, "team-chat"),
            Platform::Xmpp => write!(f, "xmpp"),
        }
    }
}

/// Inbound message event from the team-chat platform.
#[derive(Debug, Clone)]
pub struct TeamChatMessage {
    /// Sender's nickname on the team-chat platform.
    pub sender_nickname: String,
    /// Message content.
    pub body: String,
    /// Channel name, without the `#` marker.
    pub source_channel_name: String,
    /// True when the platform reports the message as authored by the bridge itself.
    pub is_from_self: bool,
}

/// Inbound groupchat message from an XMPP MUC room.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MucMessage {
    /// Occupant nickname of the sender (resource part of the room JID).
    pub sender_nickname: String,
    /// Message body.
    pub body: String,
    /// Bare room JID, normalized, e.g. `team@conf.example.com`.
    pub room: BareJid,
}

/// Transient value object for one relayed message.
///
/// Created per relayed event and consumed immediately.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BridgeMessage {
    /// Display name of the original author.
    pub sender_display_name: String,
    /// Body after translation (mention prefix stripped for inbound messages).
    pub body: String,
    /// Where the message came from.
    pub source_platform: Platform,
    /// Channel name or room identifier it came from.
    pub source_channel_or_room: String,
}
