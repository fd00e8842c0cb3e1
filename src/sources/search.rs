use anyhow::{Context, Result};
use async_trait::async_trait;
use regex::Regex;
use reqwest::Client;
use std::time::Duration;
use tracing::info;

const YOUTUBE_BASE: &str = "https://www.youtube.com";

/// Convierte un título libre en la URL de un resultado
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait TitleSearch: Send + Sync {
    /// `Ok(None)` cuando la búsqueda no devuelve resultados
    async fn find_url(&self, title: &str) -> Result<Option<String>>;
}

/// Búsqueda por scraping de la página de resultados de YouTube
pub struct YouTubeSearch {
    client: Client,
    base_url: String,
}

impl YouTubeSearch {
    pub fn new(timeout: Duration) -> Result<Self> {
        let client = Client::builder()
            .timeout(timeout)
            .user_agent("Mozilla/5.0 (Windows NT 10.0; Win64; x64) AppleWebKit/537.36")
            .build()
            .context("Error al crear cliente HTTP")?;

        Ok(Self {
            client,
            base_url: YOUTUBE_BASE.to_string(),
        })
    }
}

#[async_trait]
impl TitleSearch for YouTubeSearch {
    async fn find_url(&self, title: &str) -> Result<Option<String>> {
        info!("🔍 Buscando en YouTube: {}", title);

        let search_url = format!(
            "{}/results?search_query={}",
            self.base_url,
            urlencoding::encode(title)
        );

        let html = self
            .client
            .get(&search_url)
            .send()
            .await
            .context("Error en request a YouTube")?
            .error_for_status()
            .context("YouTube rechazó la búsqueda")?
            .text()
            .await
            .context("Error leyendo respuesta")?;

        Ok(first_video_url(&html, &self.base_url))
    }
}

/// Primer enlace `/watch?v=` de la página de resultados
pub fn first_video_url(html: &str, base_url: &str) -> Option<String> {
    let video_url = Regex::new(r#""url":"/watch\?v=([a-zA-Z0-9_-]{11})"#).ok()?;

    video_url
        .captures(html)
        .and_then(|caps| caps.get(1))
        .map(|id| format!("{}/watch?v={}", base_url, id.as_str()))
}
