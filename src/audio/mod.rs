//! # Audio Module
//!
//! Per-guild playback for the bot.
//!
//! ## Architecture
//!
//! ### [`player`] - Playback engine
//! - One [`player::GuildPlayer`] per guild, owned by [`registry::PlayerRegistry`]
//! - Restarts the transcoder at the last position when a stream is interrupted
//! - Switches to a local copy once [`cache`] finishes downloading it
//!
//! ### [`voice`] - Voice connections
//! - Join with bounded retries and exponential backoff
//!
//! ### [`transcoder`] - Capabilities
//! - ffmpeg options, encode/stream traits and local duration probing
//! - [`songbird_backend`] implements them on top of songbird
//!
//! ### [`signals`] - Single-slot channels
//! - Actions in (Stop, Skip, Swap, PauseResume), status out

pub mod cache;
pub mod player;
pub mod queue;
pub mod registry;
pub mod signals;
pub mod songbird_backend;
pub mod transcoder;
pub mod voice;
