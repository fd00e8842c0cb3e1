use anyhow::Context;
use async_process::{Command, Output};
use async_trait::async_trait;
use serde::Deserialize;
use std::{
    path::{Path, PathBuf},
    time::Duration,
};
use tracing::{debug, info, warn};

use super::{extractor::Extractor, ExtractorKind, Metadata, Thumbnail};
use crate::{audio::cache::MediaDownloader, error::ExtractError};

/// Extractor general basado en yt-dlp.
///
/// Cada operación es una invocación independiente del binario, con timeout.
#[derive(Debug, Clone)]
pub struct YtDlpClient {
    binary: PathBuf,
    timeout: Duration,
    download_timeout: Duration,
    cache_dir: PathBuf,
}

/// Información extraída de yt-dlp
#[derive(Debug, Deserialize)]
struct YtDlpInfo {
    id: String,
    title: String,
    duration: Option<f64>,
    webpage_url: String,
    #[serde(default)]
    is_live: Option<bool>,
    #[serde(default)]
    thumbnails: Vec<YtDlpThumbnail>,
}

#[derive(Debug, Deserialize)]
struct YtDlpThumbnail {
    url: String,
    width: Option<u32>,
    height: Option<u32>,
}

impl YtDlpClient {
    pub fn new(
        binary: impl Into<PathBuf>,
        timeout: Duration,
        download_timeout: Duration,
        cache_dir: impl Into<PathBuf>,
    ) -> Self {
        Self {
            binary: binary.into(),
            timeout,
            download_timeout,
            cache_dir: cache_dir.into(),
        }
    }

    /// Ejecuta yt-dlp y devuelve stdout; stderr va en el error
    async fn run(&self, url: &str, args: &[&str], timeout: Duration) -> Result<String, ExtractError> {
        debug!("🔧 yt-dlp {:?} {}", args, url);

        let child = Command::new(&self.binary)
            .args(args)
            .args(["--no-playlist", "--no-warnings", url])
            .kill_on_drop(true)
            .output();

        let output: Output = match tokio::time::timeout(timeout, child).await {
            Ok(result) => result?,
            Err(_) => {
                return Err(ExtractError::Timeout {
                    backend: ExtractorKind::General,
                    url: url.to_string(),
                    after: timeout,
                })
            }
        };

        if !output.status.success() {
            let error = String::from_utf8_lossy(&output.stderr);
            return Err(ExtractError::Tool {
                backend: ExtractorKind::General,
                url: url.to_string(),
                message: error.trim().to_string(),
            });
        }

        Ok(String::from_utf8_lossy(&output.stdout).into_owned())
    }

    fn download_target(&self) -> PathBuf {
        let timestamp = chrono::Local::now().format("%Y%m%d_%H%M%S_%3f");
        self.cache_dir.join(format!("{}.webm", timestamp))
    }
}

#[async_trait]
impl Extractor for YtDlpClient {
    fn kind(&self) -> ExtractorKind {
        ExtractorKind::General
    }

    async fn resolve_metadata(&self, url: &str) -> Result<Metadata, ExtractError> {
        let stdout = self
            .run(url, &["--dump-json", "--skip-download"], self.timeout)
            .await?;

        let info: YtDlpInfo = serde_json::from_str(stdout.trim())?;
        info!("📊 Metadata yt-dlp: {}", info.title);
        Ok(info.into())
    }

    async fn resolve_stream_url(&self, url: &str) -> Result<String, ExtractError> {
        let stdout = self
            .run(url, &["-f", "bestaudio/best", "--get-url"], self.timeout)
            .await?;

        last_url_line(&stdout).ok_or_else(|| ExtractError::NoStream(url.to_string()))
    }
}

#[async_trait]
impl MediaDownloader for YtDlpClient {
    async fn download(&self, url: &str) -> anyhow::Result<PathBuf> {
        tokio::fs::create_dir_all(&self.cache_dir)
            .await
            .with_context(|| format!("Error al crear {}", self.cache_dir.display()))?;

        let target = PartialDownload::new(self.download_target());
        let target_arg = target.path().to_string_lossy().into_owned();

        self.run(
                url,
                &[
                    "-f",
                    "bestaudio/best",
                    "--no-part",
                    "--no-overwrites",
                    "-o",
                    &target_arg,
                ],
                self.download_timeout,
            )
            .await
            .with_context(|| format!("Error al descargar {}", url))?;

        let path = tokio::fs::canonicalize(target.path())
            .await
            .with_context(|| format!("Descarga sin archivo de salida: {}", target.path().display()))?;
        target.keep();

        info!("💾 Descargado en caché: {}", path.display());
        Ok(path)
    }
}

/// Archivo de destino de una descarga en curso. Se borra al soltarlo salvo
/// que la descarga termine: error, timeout o cancelación del intento.
struct PartialDownload {
    path: PathBuf,
    complete: bool,
}

impl PartialDownload {
    fn new(path: PathBuf) -> Self {
        Self {
            path,
            complete: false,
        }
    }

    fn path(&self) -> &Path {
        &self.path
    }

    fn keep(mut self) {
        self.complete = true;
    }
}

impl Drop for PartialDownload {
    fn drop(&mut self) {
        if self.complete {
            return;
        }

        match std::fs::remove_file(&self.path) {
            Ok(()) => debug!("🧹 Descarga parcial borrada: {}", self.path.display()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
            Err(e) => warn!("⚠️ No se pudo borrar descarga parcial {}: {}", self.path.display(), e),
        }
    }
}

/// yt-dlp puede imprimir avisos antes de la URL: se toma la última línea HTTP
fn last_url_line(stdout: &str) -> Option<String> {
    stdout
        .lines()
        .map(str::trim)
        .rev()
        .find(|line| line.starts_with("http://") || line.starts_with("https://"))
        .map(str::to_string)
}

impl From<YtDlpInfo> for Metadata {
    fn from(info: YtDlpInfo) -> Self {
        let duration = if info.is_live.unwrap_or(false) {
            None
        } else {
            info.duration
                .filter(|secs| *secs > 0.0)
                .map(Duration::from_secs_f64)
        };

        let thumbnail = info
            .thumbnails
            .into_iter()
            .filter(|t| t.width.is_some())
            .max_by_key(|t| t.width.unwrap_or_default())
            .map(|t| Thumbnail {
                url: t.url,
                width: t.width.unwrap_or_default(),
                height: t.height.unwrap_or_default(),
            });

        Metadata {
            id: info.id,
            title: info.title,
            duration,
            canonical_url: info.webpage_url,
            thumbnail,
        }
    }
}
