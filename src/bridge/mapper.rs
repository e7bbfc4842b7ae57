//! Bidirectional mapping between team-chat channels and XMPP rooms.
//!
//! Channels without an explicit mapping fall back to a room with the same
//! local part, so the mapper is total in both directions. Room local parts
//! and the host are stored the way `BareJid` normalizes them.

use std::collections::HashMap;

use tokio_xmpp::parsers::BareJid;

use crate::common::error::ConfigError;

/// Prefix team-chat clients display in front of channel names.
pub const CHANNEL_MARKER: char = '#';

/// Pure channel <-> room resolver built once from validated configuration.
#[derive(Debug, Clone)]
pub struct ChannelMapper {
    host: String,
    /// Channel name -> normalized room local part.
    forward: HashMap<String, String>,
    /// Normalized room local part -> channel name.
    inverse: HashMap<String, String>,
}

impl ChannelMapper {
    /// Build a mapper from ordered (channel, room local part) pairs.
    ///
    /// Fails when a channel or room appears twice, or when a name or the
    /// host cannot form a valid room JID. `Team` and `team` are the same room.
    pub fn new(pairs: Vec<(String, String)>, host: &str) -> Result<Self, ConfigError> {
        let host = normalize_host(host)?;

        let mut forward = HashMap::with_capacity(pairs.len());
        let mut inverse = HashMap::with_capacity(pairs.len());

        for (channel, room) in pairs {
            if channel.is_empty() || room.is_empty() {
                return Err(ConfigError::InvalidValue {
                    field: "channels".to_string(),
                    message: format!("empty name in mapping '{}' -> '{}'", channel, room),
                });
            }
            let room = normalize_local_part(&room, &host)?;
            if forward.contains_key(&channel) {
                return Err(ConfigError::AmbiguousMapping {
                    message: format!("channel '{}' is mapped more than once", channel),
                });
            }
            if let Some(existing) = inverse.get(&room) {
                return Err(ConfigError::AmbiguousMapping {
                    message: format!(
                        "room '{}' is the target of both '{}' and '{}'",
                        room, existing, channel
                    ),
                });
            }

            forward.insert(channel.clone(), room.clone());
            inverse.insert(room, channel);
        }

        Ok(Self {
            host,
            forward,
            inverse,
        })
    }

    /// Resolve a team-chat channel name to a full room JID.
    ///
    /// Unmapped names are not validated here; the XMPP side parses the result.
    pub fn to_room(&self, channel: &str) -> String {
        let local = self
            .forward
            .get(channel)
            .map(String::as_str)
            .unwrap_or(channel);
        format!("{}@{}", local, self.host)
    }

    /// Resolve a normalized room local part to a marked team-chat channel name.
    pub fn to_channel(&self, room_local_part: &str) -> String {
        let name = self
            .inverse
            .get(room_local_part)
            .map(String::as_str)
            .unwrap_or(room_local_part);
        format!("{}{}", CHANNEL_MARKER, name)
    }

    /// The conference host suffix.
    pub fn host(&self) -> &str {
        &self.host
    }

    /// Number of explicit mappings.
    pub fn len(&self) -> usize {
        self.forward.len()
    }

    pub fn is_empty(&self) -> bool {
        self.forward.is_empty()
    }
}

fn normalize_local_part(room: &str, host: &str) -> Result<String, ConfigError> {
    let invalid = |reason: String| ConfigError::InvalidValue {
        field: "channels".to_string(),
        message: format!("room '{}' is not a valid room name: {}", room, reason),
    };

    if room.contains(['@', '/']) {
        return Err(invalid("contains '@' or '/'".to_string()));
    }
    let jid = BareJid::new(&format!("{}@{}", room, host)).map_err(|e| invalid(e.to_string()))?;
    jid.node_str()
        .map(str::to_string)
        .ok_or_else(|| invalid("empty".to_string()))
}

fn normalize_host(host: &str) -> Result<String, ConfigError> {
    let invalid = |reason: String| ConfigError::InvalidValue {
        field: "xmpp.host".to_string(),
        message: format!("'{}' is not a valid conference host: {}", host, reason),
    };

    let jid = BareJid::new(host).map_err(|e| invalid(e.to_string()))?;
    if jid.node_str().is_some() {
        return Err(invalid("must not contain a local part".to_string()));
    }
    Ok(jid.domain_str().to_string())
}
