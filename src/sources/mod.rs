//! # Sources Module
//!
//! Turns user references (platform links, radio streams, local files or a
//! free-text title) into [`Song`] descriptors the playback engine can feed
//! to the transcoder.
//!
//! - [`classifier`] decides what kind of reference we are looking at
//! - [`extractor`] holds the extractor capability and the fallback chain
//! - [`youtube_native`] / [`ytdlp`] are the two extractor backends
//! - [`probe`] answers HEAD requests (4xx checks, content-type allow-list)
//! - [`search`] maps a title to a URL
//! - [`resolver`] fans out over a batch of references

pub mod classifier;
pub mod extractor;
pub mod probe;
pub mod resolver;
pub mod search;
pub mod youtube_native;
pub mod ytdlp;

use std::{fmt, path::PathBuf, time::Duration};

pub use classifier::{classify, Reference};
pub use extractor::{Extractor, ExtractorChain, Metadata};
pub use probe::{HttpProbe, ReqwestProbe};
pub use resolver::SongResolver;
pub use search::{TitleSearch, YouTubeSearch};
pub use youtube_native::NativeYouTubeClient;
pub use ytdlp::YtDlpClient;

/// De dónde viene el audio de una canción
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SourceKind {
    /// Página de una plataforma (YouTube, SoundCloud...)
    Platform,
    /// Stream HTTP crudo (radio por internet)
    InternetStream,
    /// Archivo en disco
    LocalFile,
}

impl fmt::Display for SourceKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Platform => "Platform",
            Self::InternetStream => "InternetStream",
            Self::LocalFile => "LocalFile",
        };
        f.write_str(name)
    }
}

/// Backend que produjo la URL de stream
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ExtractorKind {
    /// Cliente HTTP nativo, rápido
    Fast,
    /// Herramienta externa (yt-dlp), más lenta pero con mayor cobertura
    General,
}

impl fmt::Display for ExtractorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Fast => f.write_str("native"),
            Self::General => f.write_str("yt-dlp"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Thumbnail {
    pub url: String,
    pub width: u32,
    pub height: u32,
}

/// A resolved, playable song.
///
/// Immutable after resolution, except for [`Song::switch_to_cached`] which the
/// playback loop calls once when a local copy becomes available.
#[derive(Debug, Clone, PartialEq)]
pub struct Song {
    title: String,
    public_link: String,
    stream_locator: String,
    thumbnail: Option<Thumbnail>,
    duration: Option<Duration>,
    song_id: String,
    kind: SourceKind,
    extractor: Option<ExtractorKind>,
    cached: bool,
}

impl Song {
    pub fn new(
        title: impl Into<String>,
        public_link: impl Into<String>,
        stream_locator: impl Into<String>,
        song_id: impl Into<String>,
        kind: SourceKind,
    ) -> Self {
        Self {
            title: title.into(),
            public_link: public_link.into(),
            stream_locator: stream_locator.into(),
            thumbnail: None,
            duration: None,
            song_id: song_id.into(),
            kind,
            extractor: None,
            cached: false,
        }
    }

    /// Construye una canción de plataforma a partir de la metadata del extractor
    pub fn from_metadata(meta: Metadata, stream_url: String, extractor: ExtractorKind) -> Self {
        let mut song = Self::new(
            meta.title,
            meta.canonical_url,
            stream_url,
            meta.id,
            SourceKind::Platform,
        )
        .with_extractor(extractor);

        if let Some(duration) = meta.duration {
            song = song.with_duration(duration);
        }
        if let Some(thumbnail) = meta.thumbnail {
            song = song.with_thumbnail(thumbnail);
        }
        song
    }

    // Getters
    pub fn title(&self) -> &str {
        &self.title
    }
    pub fn public_link(&self) -> &str {
        &self.public_link
    }
    pub fn stream_locator(&self) -> &str {
        &self.stream_locator
    }
    pub fn thumbnail(&self) -> Option<&Thumbnail> {
        self.thumbnail.as_ref()
    }
    /// `None` for live streams and for files whose length is probed at playback
    pub fn duration(&self) -> Option<Duration> {
        self.duration
    }
    pub fn song_id(&self) -> &str {
        &self.song_id
    }
    pub fn kind(&self) -> SourceKind {
        self.kind
    }
    pub fn extractor(&self) -> Option<ExtractorKind> {
        self.extractor
    }
    pub fn is_cached(&self) -> bool {
        self.cached
    }

    // Builders
    pub fn with_duration(mut self, duration: Duration) -> Self {
        self.duration = Some(duration);
        self
    }

    pub fn with_thumbnail(mut self, thumbnail: Thumbnail) -> Self {
        self.thumbnail = Some(thumbnail);
        self
    }

    pub fn with_extractor(mut self, extractor: ExtractorKind) -> Self {
        self.extractor = Some(extractor);
        self
    }

    /// Only platform pages can be re-downloaded by the extraction tool
    pub fn is_cacheable(&self) -> bool {
        self.kind == SourceKind::Platform && !self.cached
    }

    /// Cambia el locator al archivo local. Solo ocurre una vez por canción;
    /// devuelve `false` si ya estaba cacheada.
    pub fn switch_to_cached(&mut self, path: PathBuf) -> bool {
        if self.cached {
            return false;
        }
        self.stream_locator = path.to_string_lossy().into_owned();
        self.cached = true;
        true
    }
}
