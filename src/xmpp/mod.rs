//! XMPP side of the bridge.
//!
//! This module contains:
//! - Session lifecycle and event loop (`connection`)
//! - Joined-room tracking (`rooms`)
//! - The transport seam and its tokio-xmpp implementation
//! - Stanza builders and parsers

pub mod client;
pub mod connection;
#[cfg(test)]
pub mod mock;
pub mod rooms;
pub mod stanza;
pub mod state;
pub mod transport;

pub use client::TokioXmppTransport;
pub use connection::{EventKind, XmppConnection, XmppEvent, XmppHandle};
pub use state::ConnectionState;
