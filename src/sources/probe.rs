use anyhow::{Context, Result};
use async_trait::async_trait;
use reqwest::{Client, StatusCode};
use std::time::Duration;
use tracing::debug;

/// Content-types aceptados para streams de internet
const ALLOWED_CONTENT_TYPES: &[&str] = &[
    "application/flv",
    "application/vnd.ms-wpl",
    "audio/aac",
    "audio/basic",
    "audio/flac",
    "audio/mp4",
    "audio/mpeg",
    "audio/mpeg3",
    "audio/ogg",
    "audio/vorbis",
    "audio/wav",
    "audio/webm",
    "audio/x-aac",
    "audio/x-aiff",
    "audio/x-flac",
    "audio/x-m4a",
    "audio/x-matroska",
    "audio/x-mpeg-3",
    "audio/x-mpegurl",
    "audio/x-ms-wax",
    "audio/x-ms-wma",
    "audio/x-wav",
    "video/mp4",
    "video/mpeg",
    "video/ogg",
    "video/webm",
    "video/x-flv",
    "video/x-matroska",
    "video/x-ms-asf",
    "video/x-ms-wmv",
    "video/x-msvideo",
];

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProbeResponse {
    pub status: u16,
    pub content_type: Option<String>,
}

impl ProbeResponse {
    pub fn is_client_error(&self) -> bool {
        (400..500).contains(&self.status)
    }

    /// True when the content-type is on the audio/video allow-list
    pub fn is_streamable(&self) -> bool {
        self.content_type.as_deref().is_some_and(is_allowed_content_type)
    }
}

/// Compara el content-type sin parámetros (`; charset=...`) y en minúsculas
pub fn is_allowed_content_type(content_type: &str) -> bool {
    let essence = content_type
        .split(';')
        .next()
        .unwrap_or_default()
        .trim()
        .to_ascii_lowercase();

    ALLOWED_CONTENT_TYPES.contains(&essence.as_str())
}

/// Consulta ligera de una URL: estado y content-type
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait HttpProbe: Send + Sync {
    async fn head(&self, url: &str) -> Result<ProbeResponse>;
}

/// Sonda basada en reqwest
#[derive(Clone)]
pub struct ReqwestProbe {
    client: Client,
}

impl ReqwestProbe {
    pub fn new(timeout: Duration) -> Result<Self> {
        let client = Client::builder()
            .timeout(timeout)
            .build()
            .context("Error al crear cliente HTTP")?;
        Ok(Self { client })
    }

    fn to_response(response: &reqwest::Response) -> ProbeResponse {
        let content_type = response
            .headers()
            .get(reqwest::header::CONTENT_TYPE)
            .and_then(|value| value.to_str().ok())
            .map(str::to_string);

        ProbeResponse {
            status: response.status().as_u16(),
            content_type,
        }
    }
}

#[async_trait]
impl HttpProbe for ReqwestProbe {
    async fn head(&self, url: &str) -> Result<ProbeResponse> {
        match self.client.head(url).send().await {
            Ok(response)
                if response.status() != StatusCode::METHOD_NOT_ALLOWED
                    && response.status() != StatusCode::NOT_IMPLEMENTED =>
            {
                return Ok(Self::to_response(&response));
            }
            Ok(response) => debug!("🔁 HEAD no soportado ({}), usando GET", response.status()),
            Err(e) => debug!("🔁 HEAD falló para {}: {}, usando GET", url, e),
        }

        // Algunas radios no aceptan HEAD: se leen solo las cabeceras del GET
        let response = self
            .client
            .get(url)
            .send()
            .await
            .with_context(|| format!("Error al consultar {}", url))?;

        Ok(Self::to_response(&response))
    }
}
