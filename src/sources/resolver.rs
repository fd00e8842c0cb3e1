use std::{path::PathBuf, sync::Arc};
use tokio::task::JoinSet;
use tracing::{debug, info, warn};
use url::Url;

use super::{
    classify, extractor::ExtractorChain, probe::HttpProbe, search::TitleSearch, Reference, Song,
    SourceKind,
};
use crate::error::{ResolveError, SourceError};

/// Pipeline de resolución: referencias o título → canciones reproducibles.
///
/// Cloning is cheap; every collaborator sits behind an `Arc`.
#[derive(Clone)]
pub struct SongResolver {
    chain: ExtractorChain,
    probe: Arc<dyn HttpProbe>,
    search: Arc<dyn TitleSearch>,
}

impl SongResolver {
    pub fn new(
        chain: ExtractorChain,
        probe: Arc<dyn HttpProbe>,
        search: Arc<dyn TitleSearch>,
    ) -> Self {
        Self {
            chain,
            probe,
            search,
        }
    }

    /// Resuelve el texto del usuario.
    ///
    /// Text without any URL or path is treated as a title and searched once.
    /// Otherwise each whitespace-separated reference is resolved in its own
    /// task; any failure voids the whole batch. Songs come back in input order.
    pub async fn resolve(&self, input: &str) -> Result<Vec<Song>, ResolveError> {
        let input = input.trim();
        if input.is_empty() {
            return Err(ResolveError::EmptyInput);
        }

        let references: Vec<&str> = input.split_whitespace().collect();
        let is_title = references
            .iter()
            .all(|reference| classify(reference) == Reference::Title);

        if is_title {
            let url = self.search_title(input).await?;
            return self.resolve_batch(vec![url]).await;
        }

        self.resolve_batch(references.into_iter().map(str::to_string).collect())
            .await
    }

    async fn search_title(&self, title: &str) -> Result<String, ResolveError> {
        match self.search.find_url(title).await {
            Ok(Some(url)) => {
                debug!("🔍 \"{}\" → {}", title, url);
                Ok(url)
            }
            Ok(None) => Err(ResolveError::NoMatch(title.to_string())),
            Err(source) => Err(ResolveError::Search {
                title: title.to_string(),
                source,
            }),
        }
    }

    async fn resolve_batch(&self, references: Vec<String>) -> Result<Vec<Song>, ResolveError> {
        let mut tasks = JoinSet::new();

        for (index, reference) in references.into_iter().enumerate() {
            let resolver = self.clone();
            tasks.spawn(async move {
                let result = resolver.resolve_one(&reference).await;
                (index, reference, result)
            });
        }

        let mut songs = Vec::with_capacity(tasks.len());
        let mut first_error = None;

        while let Some(joined) = tasks.join_next().await {
            let (index, reference, result) = joined?;

            match result {
                Ok(song) => songs.push((index, song)),
                Err(source) => {
                    warn!("❌ No se pudo resolver {}: {}", reference, source);
                    first_error.get_or_insert(ResolveError::Reference { reference, source });
                }
            }
        }

        if let Some(error) = first_error {
            return Err(error);
        }

        songs.sort_by_key(|(index, _)| *index);
        info!("✅ {} canciones resueltas", songs.len());
        Ok(songs.into_iter().map(|(_, song)| song).collect())
    }

    async fn resolve_one(&self, reference: &str) -> Result<Song, SourceError> {
        match classify(reference) {
            Reference::Platform(platform) => {
                debug!("🎬 {} ({})", reference, platform);
                Ok(self.chain.resolve(reference).await?)
            }
            Reference::InternetStream => self.resolve_stream(reference).await,
            Reference::LocalFile => resolve_local_file(reference).await,
            Reference::Title => Err(SourceError::Unsupported(reference.to_string())),
        }
    }

    async fn resolve_stream(&self, reference: &str) -> Result<Song, SourceError> {
        let url = Url::parse(reference)?;
        let host = url
            .host_str()
            .ok_or_else(|| SourceError::Unsupported(reference.to_string()))?
            .to_string();

        let response = self
            .probe
            .head(reference)
            .await
            .map_err(SourceError::Probe)?;

        if !response.is_streamable() {
            let content_type = response.content_type.unwrap_or_else(|| "none".to_string());
            return Err(SourceError::ContentType(content_type));
        }

        debug!("📻 Stream válido en {}", host);
        Ok(Song::new(
            host.clone(),
            reference,
            reference,
            format!("stream:{}", host),
            SourceKind::InternetStream,
        ))
    }
}

/// Archivo local: la duración se consulta al reproducir
async fn resolve_local_file(reference: &str) -> Result<Song, SourceError> {
    let path = if reference.starts_with("file://") {
        Url::parse(reference)?
            .to_file_path()
            .map_err(|_| SourceError::Unsupported(reference.to_string()))?
    } else {
        PathBuf::from(reference)
    };

    let path = match tokio::fs::canonicalize(&path).await {
        Ok(path) if path.is_file() => path,
        _ => return Err(SourceError::MissingFile(path)),
    };

    let title = path
        .file_stem()
        .map(|stem| stem.to_string_lossy().into_owned())
        .unwrap_or_else(|| reference.to_string());
    let location = path.to_string_lossy().into_owned();

    Ok(Song::new(
        title,
        location.clone(),
        location.clone(),
        location,
        SourceKind::LocalFile,
    ))
}
