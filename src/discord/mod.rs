//! Discord as the team-chat platform.

pub mod client;

pub use client::DiscordBot;
