//! # Audio Module
//!
//! Everything between a command and the Lavalink node.
//!
//! - [`track`]: the track value the rest of the bot passes around
//! - [`session`]: the playback session capability and its lifecycle events
//! - [`lavalink`]: sessions backed by a Lavalink v4 node
//! - [`history`]: per-guild record of naturally finished tracks
//! - [`fallback`]: alternative-source retries for tracks that fail to play
//!
//! The node owns queue advancement. The bot only issues commands and reacts
//! to the events a session emits.

pub mod fallback;
pub mod history;
pub mod lavalink;
pub mod session;
pub mod track;
