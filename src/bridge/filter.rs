//! Regex filters applied to rendered messages before they are relayed.

use fancy_regex::Regex;
use tracing::warn;

use crate::config::types::FiltersConfig;

/// Direction of message flow for filtering.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FilterDirection {
    /// Team chat to an XMPP room.
    TeamChatToXmpp,
    /// XMPP room to team chat.
    XmppToTeamChat,
}

/// Regex filters for both relay directions.
///
/// A message is blocked when any pattern for its direction matches.
#[derive(Debug, Clone, Default)]
pub struct MessageFilter {
    to_xmpp: PatternSet,
    to_team_chat: PatternSet,
}

#[derive(Debug, Clone, Default)]
struct PatternSet(Vec<(String, Regex)>);

impl PatternSet {
    /// Invalid patterns are logged and left out.
    fn compile(patterns: Option<Vec<String>>) -> Self {
        let mut compiled = Vec::new();
        for pattern in patterns.unwrap_or_default() {
            match Regex::new(&pattern) {
                Ok(regex) => compiled.push((pattern, regex)),
                Err(e) => warn!(pattern = %pattern, "Skipping invalid filter pattern: {}", e),
            }
        }
        Self(compiled)
    }

    fn blocks(&self, message: &str) -> bool {
        self.0.iter().any(|(pattern, regex)| match regex.is_match(message) {
            Ok(matched) => matched,
            Err(e) => {
                warn!(pattern = %pattern, "Filter pattern failed to run: {}", e);
                false
            }
        })
    }
}

impl MessageFilter {
    pub fn new(
        team_chat_to_xmpp: Option<Vec<String>>,
        xmpp_to_team_chat: Option<Vec<String>>,
    ) -> Self {
        Self {
            to_xmpp: PatternSet::compile(team_chat_to_xmpp),
            to_team_chat: PatternSet::compile(xmpp_to_team_chat),
        }
    }

    /// A missing or disabled section yields a filter that allows everything.
    pub fn from_config(config: Option<&FiltersConfig>) -> Self {
        match config {
            Some(filters) if filters.enabled => Self::new(
                filters.team_chat_to_xmpp.clone(),
                filters.xmpp_to_team_chat.clone(),
            ),
            _ => Self::empty(),
        }
    }

    pub fn empty() -> Self {
        Self::default()
    }

    /// True when `message` must not be relayed in `direction`.
    pub fn should_filter(&self, direction: FilterDirection, message: &str) -> bool {
        match direction {
            FilterDirection::TeamChatToXmpp => self.to_xmpp.blocks(message),
            FilterDirection::XmppToTeamChat => self.to_team_chat.blocks(message),
        }
    }

    pub fn has_patterns(&self) -> bool {
        !self.to_xmpp.0.is_empty() || !self.to_team_chat.0.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_empty_filter_allows_all() {
        let filter = MessageFilter::empty();
        assert!(!filter.has_patterns());
        assert!(!filter.should_filter(FilterDirection::TeamChatToXmpp, "any message"));
        assert!(!filter.should_filter(FilterDirection::XmppToTeamChat, "any message"));
    }

    #[test]
    fn test_partial_match_filter() {
        let filter = MessageFilter::new(Some(vec!["free.*crypto".to_string()]), None);
        assert!(filter.should_filter(FilterDirection::TeamChatToXmpp, "alice: free crypto here"));
        assert!(!filter.should_filter(FilterDirection::TeamChatToXmpp, "alice: crypto is free"));
    }

    #[test]
    fn test_directions_are_independent() {
        let filter = MessageFilter::new(None, Some(vec!["blocked".to_string()]));
        assert!(!filter.should_filter(FilterDirection::TeamChatToXmpp, "blocked"));
        assert!(filter.should_filter(FilterDirection::XmppToTeamChat, "blocked"));
    }

    #[test]
    fn test_invalid_regex_skipped() {
        let filter = MessageFilter::new(
            Some(vec!["[invalid".to_string(), "valid".to_string()]),
            None,
        );
        assert!(filter.should_filter(FilterDirection::TeamChatToXmpp, "valid pattern"));
    }

    #[test]
    fn test_negative_lookahead() {
        let filter = MessageFilter::new(
            None,
            Some(vec!["(?i)deploy(?!.*staging)".to_string()]),
        );
        assert!(filter.should_filter(FilterDirection::XmppToTeamChat, "Deploy to prod"));
        assert!(!filter.should_filter(FilterDirection::XmppToTeamChat, "deploy to staging"));
    }

    #[test]
    fn test_disabled_config_allows_all() {
        let config = FiltersConfig {
            enabled: false,
            team_chat_to_xmpp: Some(vec![".*".to_string()]),
            xmpp_to_team_chat: None,
        };
        let filter = MessageFilter::from_config(Some(&config));
        assert!(!filter.has_patterns());

        let filter = MessageFilter::from_config(None);
        assert!(!filter.should_filter(FilterDirection::TeamChatToXmpp, "anything"));
    }
}
