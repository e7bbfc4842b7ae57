//! Bridge between team chat and XMPP rooms.
//!
//! ## Module Structure
//!
//! - `mapper`: channel <-> room resolution
//! - `translator`: relay gating, mention stripping, rendering
//! - `formatter` / `filter`: format strings and regex filters
//! - `team_chat`: the team-chat platform seam
//! - `orchestrator`: wires both sides together (`BridgeOrchestrator`)

pub mod filter;
pub mod formatter;
pub mod mapper;
pub mod orchestrator;
pub mod team_chat;
pub mod translator;

pub use mapper::ChannelMapper;
pub use orchestrator::BridgeOrchestrator;
pub use team_chat::TeamChat;
pub use translator::MessageTranslator;
