//! Configuration validation.
//!
//! Validates configuration values and provides helpful error messages.

use fancy_regex::Regex;
use tokio_xmpp::parsers::BareJid;

use crate::bridge::mapper::ChannelMapper;
use crate::common::error::ConfigError;
use crate::config::types::Config;

/// Validate a configuration and return detailed errors.
pub fn validate_config(config: &Config) -> Result<(), ConfigError> {
    let mut errors = Vec::new();

    // Validate Discord config
    if config.discord.token.is_empty() {
        errors.push("discord.token is required".to_string());
    }
    if config.discord.token == "YOUR_DISCORD_TOKEN_HERE" {
        errors.push("discord.token has not been configured (still using placeholder)".to_string());
    }

    // Validate XMPP account
    let jid = &config.xmpp.jid;
    if jid.is_empty() {
        errors.push("xmpp.jid is required".to_string());
    } else if !is_bare_jid(jid) {
        errors.push(format!("xmpp.jid '{}' must look like user@domain", jid));
    }
    if config.xmpp.password.is_empty() {
        errors.push("xmpp.password is required".to_string());
    }
    if config.xmpp.nick.trim().is_empty() {
        errors.push("xmpp.nick is required".to_string());
    }
    if config.xmpp.nick.contains('/') {
        errors.push("xmpp.nick must not contain '/'".to_string());
    }
    if config.xmpp.host.is_empty() {
        errors.push("xmpp.host is required".to_string());
    }
    if config.xmpp.join_timeout == 0 {
        errors.push("xmpp.join_timeout must be non-zero".to_string());
    }

    // Validate channel mappings (uniqueness in both directions)
    if let Err(e) = ChannelMapper::new(config.channel_pairs(), &config.xmpp.host) {
        errors.push(e.to_string());
    }

    // Validate format strings
    if !config.format.team_chat_to_xmpp.contains("%message") {
        errors.push("format.team_chat_to_xmpp must contain %message".to_string());
    }
    if !config.format.xmpp_to_team_chat.contains("%message") {
        errors.push("format.xmpp_to_team_chat must contain %message".to_string());
    }

    // Validate filter patterns (try to compile them)
    if let Some(ref filters) = config.filters {
        for (direction, patterns) in [
            ("team_chat_to_xmpp", &filters.team_chat_to_xmpp),
            ("xmpp_to_team_chat", &filters.xmpp_to_team_chat),
        ] {
            for (i, pattern) in patterns.iter().flatten().enumerate() {
                if Regex::new(pattern).is_err() {
                    errors.push(format!(
                        "filters.{}[{}] is not a valid regex: '{}'",
                        direction, i, pattern
                    ));
                }
            }
        }
    }

    if errors.is_empty() {
        Ok(())
    } else {
        Err(ConfigError::ValidationError {
            message: errors.join("\n"),
        })
    }
}

fn is_bare_jid(jid: &str) -> bool {
    jid.parse::<BareJid>()
        .map(|bare| bare.node_str().is_some())
        .unwrap_or(false)
}
