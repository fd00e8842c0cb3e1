//! Error types for resolution, voice and playback.
//!
//! Glue code (bootstrap, commands, external tools) works with [`anyhow`];
//! the engine and the resolution pipeline surface these typed errors so the
//! caller can tell which reference, guild or song failed.

use serenity::model::id::{ChannelId, GuildId};
use std::{path::PathBuf, time::Duration};

use crate::{audio::signals::ActionSignal, sources::ExtractorKind};

/// Errores de un backend extractor (nativo o yt-dlp)
#[derive(Debug, thiserror::Error)]
pub enum ExtractError {
    /// The backend does not know how to handle this URL
    #[error("{backend} does not handle {url}")]
    Unsupported { backend: ExtractorKind, url: String },

    /// The origin refused to play the media
    #[error("{backend} reports {url} as unplayable: {reason}")]
    Unplayable {
        backend: ExtractorKind,
        url: String,
        reason: String,
    },

    /// The external tool exited with an error
    #[error("{backend} failed for {url}: {message}")]
    Tool {
        backend: ExtractorKind,
        url: String,
        message: String,
    },

    /// The external tool did not answer in time
    #[error("{backend} timed out after {after:?} for {url}")]
    Timeout {
        backend: ExtractorKind,
        url: String,
        after: Duration,
    },

    /// No playable audio stream was found
    #[error("no playable audio stream found for {0}")]
    NoStream(String),

    #[error("HTTP request failed: {0}")]
    Http(#[from] reqwest::Error),

    #[error("JSON parsing failed: {0}")]
    Json(#[from] serde_json::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Why a single reference could not be turned into a song
#[derive(Debug, thiserror::Error)]
pub enum SourceError {
    #[error("invalid URL: {0}")]
    InvalidUrl(#[from] url::ParseError),

    #[error("unsupported reference: {0}")]
    Unsupported(String),

    #[error(transparent)]
    Extract(#[from] ExtractError),

    #[error("not a valid stream due to invalid content-type: {0}")]
    ContentType(String),

    #[error("content-type probe failed: {0}")]
    Probe(#[source] anyhow::Error),

    #[error("local file not found: {}", .0.display())]
    MissingFile(PathBuf),
}

/// Errores del pipeline de resolución
#[derive(Debug, thiserror::Error)]
pub enum ResolveError {
    #[error("no song title or URL provided")]
    EmptyInput,

    #[error("no video found for \"{0}\"")]
    NoMatch(String),

    #[error("title search failed for \"{title}\": {source}")]
    Search {
        title: String,
        #[source]
        source: anyhow::Error,
    },

    /// Una referencia concreta del lote falló; el lote entero se descarta
    #[error("could not resolve {reference}: {source}")]
    Reference {
        reference: String,
        #[source]
        source: SourceError,
    },

    #[error("resolution task aborted: {0}")]
    Join(#[from] tokio::task::JoinError),
}

impl ResolveError {
    /// The reference that voided the batch, when the error is tied to one
    pub fn reference(&self) -> Option<&str> {
        match self {
            Self::Reference { reference, .. } => Some(reference),
            _ => None,
        }
    }
}

/// Errores del gestor de conexiones de voz
#[derive(Debug, thiserror::Error)]
pub enum VoiceError {
    #[error("failed to join voice channel {channel} in guild {guild} after {attempts} attempts: {source}")]
    Join {
        guild: GuildId,
        channel: ChannelId,
        attempts: u32,
        #[source]
        source: anyhow::Error,
    },

    #[error("failed to stop transmitting: {0}")]
    Transmit(#[source] anyhow::Error),

    #[error("failed to disconnect: {0}")]
    Disconnect(#[source] anyhow::Error),
}

/// Errores terminales del motor de reproducción
#[derive(Debug, thiserror::Error)]
pub enum PlaybackError {
    #[error("queue is empty")]
    QueueEmpty,

    #[error("player is already running in guild {0}")]
    AlreadyPlaying(GuildId),

    #[error("no voice channel selected for guild {0}")]
    NoChannel(GuildId),

    #[error(transparent)]
    Voice(#[from] VoiceError),

    #[error("transcoder failed for \"{title}\": {source}")]
    Transcoder {
        title: String,
        #[source]
        source: anyhow::Error,
    },

    #[error("stream bridge failed for \"{title}\": {source}")]
    Bridge {
        title: String,
        #[source]
        source: anyhow::Error,
    },

    #[error("stream failed for \"{title}\": {message}")]
    Stream { title: String, message: String },

    #[error("playback could not be started: \"{0}\"")]
    StartFailed(String),

    #[error("failed to parse local file duration for {}: {source}", .path.display())]
    Probe {
        path: PathBuf,
        #[source]
        source: anyhow::Error,
    },

    #[error("storage error: {0}")]
    Storage(#[source] anyhow::Error),
}

/// Errores de las señales de un solo hueco
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum SignalError {
    #[error("player is not running")]
    NotRunning,

    #[error("a {0} signal is still pending")]
    Busy(ActionSignal),

    #[error("status listener not ready")]
    ListenerNotReady,
}
