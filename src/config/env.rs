//! Environment overrides, mostly for secrets:
//! - `MUCBRIDGE_XMPP_JID` - XMPP account JID
//! - `MUCBRIDGE_XMPP_PASSWORD` - XMPP account password
//! - `MUCBRIDGE_XMPP_NICK` - Bridge nickname in rooms
//! - `MUCBRIDGE_XMPP_HOST` - Conference host suffix
//! - `MUCBRIDGE_DISCORD_TOKEN` - Discord bot token

use std::env;

use crate::config::types::Config;

const ENV_PREFIX: &str = "MUCBRIDGE";

/// Replace config values with any `MUCBRIDGE_*` variables that are set.
pub fn apply_env_overrides(mut config: Config) -> Config {
    let fields = [
        ("XMPP_JID", &mut config.xmpp.jid),
        ("XMPP_PASSWORD", &mut config.xmpp.password),
        ("XMPP_NICK", &mut config.xmpp.nick),
        ("XMPP_HOST", &mut config.xmpp.host),
        ("DISCORD_TOKEN", &mut config.discord.token),
    ];
    for (suffix, field) in fields {
        if let Ok(value) = env::var(format!("{}_{}", ENV_PREFIX, suffix)) {
            *field = value;
        }
    }
    config
}

/// Config file path from `MUCBRIDGE_CONFIG`, defaulting to `mucbridge.conf`.
pub fn get_config_path() -> String {
    env::var(format!("{}_CONFIG", ENV_PREFIX)).unwrap_or_else(|_| "mucbridge.conf".to_string())
}
