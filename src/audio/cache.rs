use anyhow::{Context, Result};
use async_trait::async_trait;
use std::{
    path::{Path, PathBuf},
    sync::Arc,
};
use tokio::sync::oneshot;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

/// Descarga completa de un medio al directorio de caché
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait MediaDownloader: Send + Sync {
    /// Devuelve la ruta absoluta del archivo descargado
    async fn download(&self, url: &str) -> Result<PathBuf>;
}

/// Lanza la descarga en segundo plano.
///
/// The receiver yields the local path once the file is ready. A failed or
/// cancelled download just drops the sender, so the loop keeps streaming
/// from the network.
pub fn spawn_fetch(
    downloader: Arc<dyn MediaDownloader>,
    public_link: String,
    token: CancellationToken,
) -> oneshot::Receiver<PathBuf> {
    let (ready_tx, ready_rx) = oneshot::channel();

    tokio::spawn(async move {
        debug!("💾 Cacheando {}", public_link);

        tokio::select! {
            _ = token.cancelled() => {
                debug!("🚫 Caché cancelada para {}", public_link);
            }
            result = downloader.download(&public_link) => match result {
                Ok(path) => {
                    if ready_tx.send(path).is_err() {
                        debug!("Caché lista pero el intento ya terminó");
                    }
                }
                Err(e) => warn!("⚠️ Error al cachear {}: {:#}", public_link, e),
            },
        }
    });

    ready_rx
}

/// Vacía el directorio de caché. Devuelve cuántos archivos se borraron.
pub async fn purge(dir: &Path) -> Result<usize> {
    let mut entries = match tokio::fs::read_dir(dir).await {
        Ok(entries) => entries,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(0),
        Err(e) => return Err(e).with_context(|| format!("Error al leer {}", dir.display())),
    };

    let mut removed = 0;
    while let Some(entry) = entries.next_entry().await? {
        let path = entry.path();
        let result = if entry.file_type().await?.is_dir() {
            tokio::fs::remove_dir_all(&path).await
        } else {
            tokio::fs::remove_file(&path).await
        };

        match result {
            Ok(()) => removed += 1,
            Err(e) => warn!("⚠️ No se pudo borrar {}: {}", path.display(), e),
        }
    }

    info!("🧹 Caché vaciada: {} archivos", removed);
    Ok(removed)
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use std::time::Duration;

    #[tokio::test]
    async fn test_ready_path_is_delivered() {
        let mut downloader = MockMediaDownloader::new();
        downloader
            .expect_download()
            .withf(|url: &str| url == "https://youtu.be/abc")
            .times(1)
            .returning(|_| Ok(PathBuf::from("/cache/abc.webm")));

        let rx = spawn_fetch(
            Arc::new(downloader),
            "https://youtu.be/abc".to_string(),
            CancellationToken::new(),
        );

        assert_eq!(rx.await.unwrap(), PathBuf::from("/cache/abc.webm"));
    }

    #[tokio::test]
    async fn test_failure_never_signals() {
        let mut downloader = MockMediaDownloader::new();
        downloader
            .expect_download()
            .returning(|_| Err(anyhow::anyhow!("HTTP Error 403")));

        let rx = spawn_fetch(
            Arc::new(downloader),
            "https://youtu.be/abc".to_string(),
            CancellationToken::new(),
        );

        assert!(rx.await.is_err());
    }

    struct SlowDownloader;

    #[async_trait]
    impl MediaDownloader for SlowDownloader {
        async fn download(&self, _url: &str) -> Result<PathBuf> {
            tokio::time::sleep(Duration::from_secs(600)).await;
            Ok(PathBuf::from("/cache/late.webm"))
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_cancelled_fetch_drops_sender() {
        let token = CancellationToken::new();
        let rx = spawn_fetch(
            Arc::new(SlowDownloader),
            "https://youtu.be/abc".to_string(),
            token.clone(),
        );

        token.cancel();
        assert!(rx.await.is_err());
    }

    #[tokio::test]
    async fn test_purge() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("a.webm"), b"a").unwrap();
        std::fs::write(dir.path().join("b.webm"), b"b").unwrap();

        assert_eq!(purge(dir.path()).await.unwrap(), 2);
        assert_eq!(std::fs::read_dir(dir.path()).unwrap().count(), 0);
        assert_eq!(purge(&dir.path().join("missing")).await.unwrap(), 0);
    }
}
