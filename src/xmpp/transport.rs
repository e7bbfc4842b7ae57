//! Seam between the session lifecycle and the XMPP wire protocol.

use async_trait::async_trait;
use tokio_xmpp::parsers::BareJid;

use crate::common::error::TransportResult;
use crate::common::MucMessage;

/// Protocol extensions registered once the session is ready.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Extension {
    /// XEP-0030
    ServiceDiscovery,
    /// XEP-0045
    MultiUserChat,
    /// XEP-0199
    Ping,
}

/// The extensions every bridge session registers.
pub const BRIDGE_EXTENSIONS: [Extension; 3] = [
    Extension::ServiceDiscovery,
    Extension::MultiUserChat,
    Extension::Ping,
];

/// Events surfaced by a transport.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TransportEvent {
    /// SASL and resource binding completed.
    Authenticated { bound_jid: String },
    /// The session is established and may fetch the roster.
    SessionStart,
    /// A groupchat message from an occupant.
    GroupMessage(MucMessage),
    /// The room echoed our own presence back.
    RoomJoined { room: BareJid },
    /// The room refused our presence.
    RoomJoinFailed { room: BareJid, reason: String },
    /// The stream is gone. No further events follow.
    Disconnected { reason: String },
}

/// XMPP client primitives used by [`XmppConnection`](super::XmppConnection).
///
/// `next_event` must be cancel safe: it is polled inside `tokio::select!`.
#[async_trait]
pub trait XmppTransport: Send {
    /// Open the stream and start authentication.
    async fn connect(&mut self) -> TransportResult<()>;

    /// Wait for the next event. `None` means the transport is closed.
    async fn next_event(&mut self) -> Option<TransportEvent>;

    async fn fetch_roster(&mut self) -> TransportResult<()>;

    /// Broadcast initial availability.
    async fn send_presence(&mut self) -> TransportResult<()>;

    async fn register_extensions(&mut self, extensions: &[Extension]) -> TransportResult<()>;

    /// Issue a room join. Returns once the request is written; the outcome
    /// arrives later as `RoomJoined` or `RoomJoinFailed`.
    async fn join_room(&mut self, room: &BareJid, nick: &str) -> TransportResult<()>;

    async fn send_group_message(&mut self, room: &BareJid, body: &str) -> TransportResult<()>;

    /// Close the stream.
    async fn disconnect(&mut self) -> TransportResult<()>;
}
