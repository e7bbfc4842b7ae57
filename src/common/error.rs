//! Error types for the application.

use std::time::Duration;

use thiserror::Error;

use crate::xmpp::ConnectionState;

/// Configuration-related errors. All of these are fatal at startup.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Failed to read config file '{path}': {message}")]
    IoError { path: String, message: String },

    #[error("Failed to parse config: {message}")]
    ParseError { message: String },

    #[error("Config validation failed: {message}")]
    ValidationError { message: String },

    #[error("Ambiguous channel mapping: {message}")]
    AmbiguousMapping { message: String },

    #[error("Invalid value for '{field}': {message}")]
    InvalidValue { field: String, message: String },
}

/// Per-message relay failures and session-level disconnects.
///
/// Everything except `TransportDisconnect` is isolated to the single relay
/// that triggered it.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum RelayError {
    #[error("Timed out after {waited:?} waiting to join room {room}")]
    JoinTimeout { room: String, waited: Duration },

    #[error("Join to room {room} rejected: {reason}")]
    JoinRejected { room: String, reason: String },

    #[error("'{room}' is not a valid room address: {reason}")]
    InvalidRoom { room: String, reason: String },

    #[error("Connection not ready (state: {state})")]
    NotReady { state: ConnectionState },

    #[error("Transport disconnected: {reason}")]
    TransportDisconnect { reason: String },
}

impl RelayError {
    /// Returns true for errors that end the whole XMPP session.
    pub fn is_fatal(&self) -> bool {
        matches!(self, RelayError::TransportDisconnect { .. })
    }
}

/// Errors raised by an XMPP transport implementation.
#[derive(Debug, Error)]
pub enum TransportError {
    #[error("Invalid JID '{jid}': {message}")]
    InvalidJid { jid: String, message: String },

    #[error("Not connected")]
    NotConnected,

    #[error("Failed to send stanza: {message}")]
    SendFailed { message: String },
}

/// Errors raised by a team-chat platform implementation.
#[derive(Debug, Error)]
pub enum TeamChatError {
    #[error("Unknown channel: {channel}")]
    UnknownChannel { channel: String },

    #[error("Serenity error: {0}")]
    Serenity(#[from] serenity::Error),
}

/// Result type alias for relay operations.
pub type RelayResult<T> = std::result::Result<T, RelayError>;

/// Result type alias for transport operations.
pub type TransportResult<T> = std::result::Result<T, TransportError>;
