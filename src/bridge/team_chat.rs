//! Seam to the team-chat platform.

use std::fmt::Debug;

use async_trait::async_trait;

use crate::common::error::TeamChatError;

/// Send primitives of a team-chat platform.
///
/// Inbound events arrive separately as
/// [`TeamChatMessage`](crate::common::TeamChatMessage)s on a channel.
#[async_trait]
pub trait TeamChat: Send + Sync + 'static {
    /// Platform-native channel handle.
    type Identifier: Clone + Debug + Send + Sync;

    /// Largest message body the platform accepts, in bytes.
    const MAX_MESSAGE_LEN: usize;

    /// Look up a channel by its marked name, e.g. `#general`.
    async fn resolve_identifier(&self, channel_name: &str) -> Result<Self::Identifier, TeamChatError>;

    async fn send_message(&self, identifier: &Self::Identifier, body: &str) -> Result<(), TeamChatError>;
}
