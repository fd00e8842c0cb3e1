use anyhow::{Context, Result};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serenity::model::id::GuildId;
use std::{collections::HashMap, path::PathBuf, time::Duration};
use tokio::{fs, sync::Mutex};
use tracing::{debug, info, warn};
use url::Url;

use crate::sources::Song;

/// Máximo de canciones recordadas por guild
const TRACK_HISTORY_LIMIT: usize = 100;

/// Contadores de una canción en una guild
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TrackRecord {
    pub id: String,
    pub title: String,
    pub source_type: String,
    pub public_link: String,
    pub total_count: u64,
    /// Segundos
    pub total_duration: f64,
    pub last_played: DateTime<Utc>,
}

/// Registro persistido por guild
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct GuildRecord {
    pub guild_id: u64,
    #[serde(default)]
    pub cache_enabled: bool,
    #[serde(default)]
    pub tracks_history: Vec<TrackRecord>,
}

/// Identidad de una canción en el historial
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TrackKey {
    pub id: String,
    pub title: String,
    pub source: String,
    pub link: String,
}

impl TrackKey {
    /// El origen es el host del enlace público sin `www.`; los archivos locales
    /// usan el tipo de fuente.
    pub fn from_song(song: &Song) -> Self {
        let source = Url::parse(song.public_link())
            .ok()
            .and_then(|url| url.host_str().map(|host| host.trim_start_matches("www.").to_string()))
            .unwrap_or_else(|| song.kind().to_string());

        Self {
            id: song.song_id().to_string(),
            title: song.title().to_string(),
            source,
            link: song.public_link().to_string(),
        }
    }
}

/// Lo que el motor de reproducción necesita del almacenamiento
#[async_trait]
pub trait TrackStore: Send + Sync {
    async fn is_cache_enabled(&self, guild: GuildId) -> Result<bool>;
    async fn add_track_count_by_one(&self, guild: GuildId, track: &TrackKey) -> Result<()>;
    async fn add_track_duration(
        &self,
        guild: GuildId,
        track: &TrackKey,
        delta: Duration,
    ) -> Result<()>;
}

/// Manager de almacenamiento basado en archivos JSON
pub struct JsonStorage {
    data_dir: PathBuf,
    guilds: HashMap<u64, GuildRecord>,
}

impl JsonStorage {
    pub async fn new(data_dir: PathBuf) -> Result<Self> {
        let servers_dir = data_dir.join("servers");
        fs::create_dir_all(&servers_dir)
            .await
            .with_context(|| format!("Error al crear {}", servers_dir.display()))?;

        info!("📁 Storage inicializado en: {}", data_dir.display());

        let mut storage = Self {
            data_dir,
            guilds: HashMap::new(),
        };
        storage.load_all_guilds().await?;

        Ok(storage)
    }

    pub fn cache_enabled(&self, guild: GuildId) -> bool {
        self.guilds
            .get(&guild.get())
            .is_some_and(|record| record.cache_enabled)
    }

    pub async fn set_cache_enabled(&mut self, guild: GuildId, enabled: bool) -> Result<()> {
        let record = self.record_mut(guild);
        record.cache_enabled = enabled;
        self.save(guild).await?;

        info!(
            "💾 Caché {} para guild {}",
            if enabled { "activada" } else { "desactivada" },
            guild
        );
        Ok(())
    }

    /// Historial ordenado por última reproducción, más reciente primero
    pub fn track_history(&self, guild: GuildId) -> Vec<TrackRecord> {
        let mut history = self
            .guilds
            .get(&guild.get())
            .map(|record| record.tracks_history.clone())
            .unwrap_or_default();
        history.sort_by(|a, b| b.last_played.cmp(&a.last_played));
        history
    }

    pub async fn increment_play_count(&mut self, guild: GuildId, track: &TrackKey) -> Result<()> {
        let entry = self.track_entry(guild, track);
        entry.total_count += 1;
        self.save(guild).await
    }

    pub async fn add_play_time(
        &mut self,
        guild: GuildId,
        track: &TrackKey,
        delta: Duration,
    ) -> Result<()> {
        let entry = self.track_entry(guild, track);
        entry.total_duration += delta.as_secs_f64();
        self.save(guild).await
    }

    fn record_mut(&mut self, guild: GuildId) -> &mut GuildRecord {
        self.guilds
            .entry(guild.get())
            .or_insert_with(|| GuildRecord {
                guild_id: guild.get(),
                ..GuildRecord::default()
            })
    }

    /// Busca o crea la entrada y refresca título, enlace y fecha
    fn track_entry(&mut self, guild: GuildId, track: &TrackKey) -> &mut TrackRecord {
        let history = &mut self.record_mut(guild).tracks_history;
        let now = Utc::now();

        let index = match history.iter().position(|record| record.id == track.id) {
            Some(index) => index,
            None => {
                if history.len() >= TRACK_HISTORY_LIMIT {
                    evict_oldest(history);
                }
                history.push(TrackRecord {
                    id: track.id.clone(),
                    title: track.title.clone(),
                    source_type: track.source.clone(),
                    public_link: track.link.clone(),
                    total_count: 0,
                    total_duration: 0.0,
                    last_played: now,
                });
                history.len() - 1
            }
        };

        let entry = &mut history[index];
        entry.title.clone_from(&track.title);
        entry.public_link.clone_from(&track.link);
        entry.last_played = now;
        entry
    }

    async fn save(&self, guild: GuildId) -> Result<()> {
        let Some(record) = self.guilds.get(&guild.get()) else {
            return Ok(());
        };

        let file_path = self.guild_file_path(guild.get());
        let content = serde_json::to_string_pretty(record)?;
        fs::write(&file_path, content)
            .await
            .with_context(|| format!("Error al escribir {}", file_path.display()))?;

        debug!("💾 Guardado {}", file_path.display());
        Ok(())
    }

    async fn load_all_guilds(&mut self) -> Result<()> {
        let servers_dir = self.data_dir.join("servers");
        let mut files = fs::read_dir(&servers_dir).await?;
        let mut loaded_count = 0;

        while let Some(entry) = files.next_entry().await? {
            let path = entry.path();
            if path.extension().is_none_or(|ext| ext != "json") {
                continue;
            }

            let Some(guild_id) = path
                .file_stem()
                .and_then(|name| name.to_str())
                .and_then(|name| name.strip_prefix("guild_"))
                .and_then(|id| id.parse::<u64>().ok())
            else {
                continue;
            };

            let parsed = fs::read_to_string(&path)
                .await
                .map_err(anyhow::Error::from)
                .and_then(|content| Ok(serde_json::from_str::<GuildRecord>(&content)?));

            match parsed {
                Ok(record) => {
                    self.guilds.insert(guild_id, record);
                    loaded_count += 1;
                }
                Err(e) => warn!("Error cargando datos de guild {}: {}", guild_id, e),
            }
        }

        if loaded_count > 0 {
            info!("📂 Cargados datos de {} servidores", loaded_count);
        }

        Ok(())
    }

    fn guild_file_path(&self, guild_id: u64) -> PathBuf {
        self.data_dir
            .join("servers")
            .join(format!("guild_{}.json", guild_id))
    }
}

fn evict_oldest(history: &mut Vec<TrackRecord>) {
    if let Some(oldest) = history
        .iter()
        .enumerate()
        .min_by_key(|(_, record)| record.last_played)
        .map(|(index, _)| index)
    {
        let removed = history.remove(oldest);
        debug!("🗑️ Historial lleno, se descarta {}", removed.title);
    }
}

#[async_trait]
impl TrackStore for Mutex<JsonStorage> {
    async fn is_cache_enabled(&self, guild: GuildId) -> Result<bool> {
        Ok(self.lock().await.cache_enabled(guild))
    }

    async fn add_track_count_by_one(&self, guild: GuildId, track: &TrackKey) -> Result<()> {
        self.lock().await.increment_play_count(guild, track).await
    }

    async fn add_track_duration(
        &self,
        guild: GuildId,
        track: &TrackKey,
        delta: Duration,
    ) -> Result<()> {
        self.lock().await.add_play_time(guild, track, delta).await
    }
}
