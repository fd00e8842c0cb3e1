use async_trait::async_trait;
use std::{sync::Arc, time::Duration};
use tracing::{debug, info, warn};

use super::{probe::HttpProbe, ExtractorKind, Song, Thumbnail};
use crate::error::ExtractError;

/// Metadata devuelta por un extractor
#[derive(Debug, Clone, PartialEq)]
pub struct Metadata {
    pub id: String,
    pub title: String,
    pub duration: Option<Duration>,
    pub canonical_url: String,
    pub thumbnail: Option<Thumbnail>,
}

/// Capacidad común a todos los backends extractores.
///
/// Implementations must be safe to call concurrently; the only shared state
/// allowed is their HTTP client.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait Extractor: Send + Sync {
    /// Tag used to mark which backend produced a song
    fn kind(&self) -> ExtractorKind;

    async fn resolve_metadata(&self, url: &str) -> Result<Metadata, ExtractError>;

    async fn resolve_stream_url(&self, url: &str) -> Result<String, ExtractError>;
}

/// Ordered fallback over extractor backends.
///
/// The first backend is tried; if it fails outright, or if the stream URL it
/// returns answers 4xx when probed, the next one is tried. At most
/// `max_fallbacks` fallbacks happen per URL.
#[derive(Clone)]
pub struct ExtractorChain {
    backends: Vec<Arc<dyn Extractor>>,
    probe: Arc<dyn HttpProbe>,
    max_fallbacks: usize,
}

impl ExtractorChain {
    pub fn new(backends: Vec<Arc<dyn Extractor>>, probe: Arc<dyn HttpProbe>) -> Self {
        Self {
            backends,
            probe,
            max_fallbacks: 1,
        }
    }

    /// Resuelve una URL de plataforma recorriendo la cadena de backends
    pub async fn resolve(&self, url: &str) -> Result<Song, ExtractError> {
        let attempts = self.backends.len().min(self.max_fallbacks + 1);
        let mut last_error = None;

        for (position, backend) in self.backends.iter().take(attempts).enumerate() {
            let is_last = position + 1 == attempts;

            match self.try_backend(backend.as_ref(), url, is_last).await {
                Ok(song) => {
                    info!("✅ {} resuelto con {}", url, backend.kind());
                    return Ok(song);
                }
                Err(e) => {
                    warn!("❌ {} falló para {}: {}", backend.kind(), url, e);
                    last_error = Some(e);
                }
            }
        }

        Err(last_error.unwrap_or_else(|| ExtractError::NoStream(url.to_string())))
    }

    async fn try_backend(
        &self,
        backend: &dyn Extractor,
        url: &str,
        is_last: bool,
    ) -> Result<Song, ExtractError> {
        let meta = backend.resolve_metadata(url).await?;
        let stream_url = backend.resolve_stream_url(url).await?;

        // El último backend no se sondea: no hay a quién caer después
        if !is_last {
            self.reject_client_errors(backend.kind(), url, &stream_url).await?;
        }

        Ok(Song::from_metadata(meta, stream_url, backend.kind()))
    }

    /// Comprueba que la URL de stream no responda 4xx
    async fn reject_client_errors(
        &self,
        backend: ExtractorKind,
        url: &str,
        stream_url: &str,
    ) -> Result<(), ExtractError> {
        match self.probe.head(stream_url).await {
            Ok(response) if response.is_client_error() => Err(ExtractError::Tool {
                backend,
                url: url.to_string(),
                message: format!("stream URL answered HTTP {}", response.status),
            }),
            Ok(response) => {
                debug!("🔎 Stream URL responde HTTP {}", response.status);
                Ok(())
            }
            Err(e) => {
                // Un fallo de red al sondear no descarta el resultado
                debug!("⚠️ No se pudo sondear la URL de stream: {}", e);
                Ok(())
            }
        }
    }
}
