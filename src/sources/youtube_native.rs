use async_trait::async_trait;
use reqwest::Client;
use serde::Deserialize;
use serde_json::json;
use std::time::Duration;
use tracing::{debug, info};
use url::Url;

use super::{
    classifier::platform_for_host, extractor::Extractor, ExtractorKind, Metadata, Thumbnail,
};
use crate::error::ExtractError;

const PLAYER_ENDPOINT: &str = "https://www.youtube.com/youtubei/v1/player";
const CLIENT_NAME: &str = "ANDROID";
const CLIENT_VERSION: &str = "19.09.37";
const ANDROID_SDK: u32 = 30;
const USER_AGENT: &str = "com.google.android.youtube/19.09.37 (Linux; U; Android 11) gzip";

/// Extractor rápido: habla directamente con la API interna del reproductor
/// de YouTube en lugar de lanzar un proceso externo.
pub struct NativeYouTubeClient {
    client: Client,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct PlayerResponse {
    playability_status: Option<PlayabilityStatus>,
    video_details: Option<VideoDetails>,
    streaming_data: Option<StreamingData>,
}

#[derive(Debug, Deserialize)]
struct PlayabilityStatus {
    status: String,
    reason: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct VideoDetails {
    video_id: String,
    title: String,
    length_seconds: Option<String>,
    #[serde(default)]
    is_live_content: bool,
    thumbnail: Option<ThumbnailList>,
}

#[derive(Debug, Deserialize)]
struct ThumbnailList {
    #[serde(default)]
    thumbnails: Vec<RawThumbnail>,
}

#[derive(Debug, Deserialize)]
struct RawThumbnail {
    url: String,
    #[serde(default)]
    width: u32,
    #[serde(default)]
    height: u32,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct StreamingData {
    #[serde(default)]
    adaptive_formats: Vec<AdaptiveFormat>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct AdaptiveFormat {
    url: Option<String>,
    mime_type: String,
    #[serde(default)]
    bitrate: u64,
}

impl NativeYouTubeClient {
    pub fn new(timeout: Duration) -> Result<Self, ExtractError> {
        let client = Client::builder()
            .timeout(timeout)
            .user_agent(USER_AGENT)
            .build()?;

        Ok(Self { client })
    }

    async fn fetch_player(&self, url: &str) -> Result<PlayerResponse, ExtractError> {
        let video_id = extract_video_id(url).ok_or_else(|| ExtractError::Unsupported {
            backend: ExtractorKind::Fast,
            url: url.to_string(),
        })?;

        debug!("📡 Consultando player API para {}", video_id);

        let body = json!({
            "videoId": video_id,
            "context": {
                "client": {
                    "clientName": CLIENT_NAME,
                    "clientVersion": CLIENT_VERSION,
                    "androidSdkVersion": ANDROID_SDK,
                    "hl": "en",
                    "gl": "US",
                }
            },
            "contentCheckOk": true,
            "racyCheckOk": true,
        });

        let response = self
            .client
            .post(PLAYER_ENDPOINT)
            .json(&body)
            .send()
            .await?
            .error_for_status()?;

        let player: PlayerResponse = response.json().await?;
        ensure_playable(&player, url)?;
        Ok(player)
    }
}

#[async_trait]
impl Extractor for NativeYouTubeClient {
    fn kind(&self) -> ExtractorKind {
        ExtractorKind::Fast
    }

    async fn resolve_metadata(&self, url: &str) -> Result<Metadata, ExtractError> {
        let player = self.fetch_player(url).await?;
        let meta = metadata_from(player, url)?;
        info!("📊 Metadata nativa: {}", meta.title);
        Ok(meta)
    }

    async fn resolve_stream_url(&self, url: &str) -> Result<String, ExtractError> {
        let player = self.fetch_player(url).await?;
        best_audio_url(&player).ok_or_else(|| ExtractError::NoStream(url.to_string()))
    }
}

/// Extrae el ID de un enlace de YouTube (`watch?v=`, `youtu.be/`, `shorts/`)
pub fn extract_video_id(url: &str) -> Option<String> {
    let parsed = Url::parse(url).ok()?;
    let host = parsed.host_str()?;

    if platform_for_host(host) != Some("YouTube") {
        return None;
    }

    if let Some((_, id)) = parsed.query_pairs().find(|(key, _)| key == "v") {
        return Some(id.into_owned());
    }

    let mut segments = parsed.path_segments()?;
    let first = segments.next()?;
    let id = if host.ends_with("youtu.be") {
        first
    } else if matches!(first, "shorts" | "embed" | "live") {
        segments.next()?
    } else {
        return None;
    };

    (!id.is_empty()).then(|| id.to_string())
}

fn ensure_playable(player: &PlayerResponse, url: &str) -> Result<(), ExtractError> {
    match &player.playability_status {
        Some(status) if status.status != "OK" => Err(ExtractError::Unplayable {
            backend: ExtractorKind::Fast,
            url: url.to_string(),
            reason: status
                .reason
                .clone()
                .unwrap_or_else(|| status.status.clone()),
        }),
        _ => Ok(()),
    }
}

fn metadata_from(player: PlayerResponse, url: &str) -> Result<Metadata, ExtractError> {
    let details = player
        .video_details
        .ok_or_else(|| ExtractError::NoStream(url.to_string()))?;

    // Los directos no tienen duración
    let duration = if details.is_live_content {
        None
    } else {
        details
            .length_seconds
            .as_deref()
            .and_then(|secs| secs.parse::<u64>().ok())
            .filter(|secs| *secs > 0)
            .map(Duration::from_secs)
    };

    let thumbnail = details
        .thumbnail
        .and_then(|list| list.thumbnails.into_iter().max_by_key(|t| t.width))
        .map(|t| Thumbnail {
            url: t.url,
            width: t.width,
            height: t.height,
        });

    Ok(Metadata {
        canonical_url: format!("https://www.youtube.com/watch?v={}", details.video_id),
        id: details.video_id,
        title: details.title,
        duration,
        thumbnail,
    })
}

/// Formato de solo audio con mayor bitrate que traiga URL directa
fn best_audio_url(player: &PlayerResponse) -> Option<String> {
    player
        .streaming_data
        .as_ref()?
        .adaptive_formats
        .iter()
        .filter(|format| format.mime_type.starts_with("audio/"))
        .filter(|format| format.url.is_some())
        .max_by_key(|format| format.bitrate)
        .and_then(|format| format.url.clone())
}
