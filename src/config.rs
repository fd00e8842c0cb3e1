use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::{path::PathBuf, str::FromStr, time::Duration};

use crate::audio::{player::PlayerSettings, transcoder::EncodeOptions, voice::VoiceManager};

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct Config {
    // Discord
    pub discord_token: String,
    pub command_prefix: String,

    // Paths
    pub data_dir: PathBuf,
    pub cache_dir: PathBuf,
    pub ytdlp_path: PathBuf,
    pub ffmpeg_path: PathBuf,

    // Tiempos (segundos)
    pub extractor_timeout: u64,
    pub download_timeout: u64,

    // Voz
    pub voice_join_attempts: u32,
    pub voice_join_backoff_ms: u64,
    pub duration_tick_secs: u64,

    // Transcodificador
    pub encode_application: String,
    pub encode_bitrate: u32, // kbps
    pub encode_channels: u32,
    pub encode_frame_rate: u32,
    pub encode_frame_duration: u32, // ms
    pub encode_compression_level: u32,
    pub encode_packet_loss: u32,
    pub encode_volume: f32,
    pub encode_reconnect: bool,
    pub encode_reconnect_delay_max: u64, // segundos
    pub encode_reconnect_on_http_error: String,
    pub encode_user_agent: String,
    pub encode_raw_output: bool,
}

impl Config {
    pub fn load() -> Result<Self> {
        dotenvy::dotenv().ok();

        let config = Self::from_lookup(|key| std::env::var(key).ok())?;

        // Create directories if they don't exist
        std::fs::create_dir_all(&config.data_dir)
            .with_context(|| format!("Error al crear {}", config.data_dir.display()))?;
        std::fs::create_dir_all(&config.cache_dir)
            .with_context(|| format!("Error al crear {}", config.cache_dir.display()))?;

        config.validate()?;

        Ok(config)
    }

    /// Construye la configuración leyendo cada clave con `lookup`
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self> {
        let defaults = Self::default();

        let text = |key: &str, default: &str| -> String {
            lookup(key)
                .filter(|value| !value.trim().is_empty())
                .unwrap_or_else(|| default.to_string())
        };

        Ok(Self {
            // Discord
            discord_token: lookup("DISCORD_TOKEN").context("DISCORD_TOKEN no está definido")?,
            command_prefix: text("COMMAND_PREFIX", &defaults.command_prefix),

            // Paths
            data_dir: text("DATA_DIR", &defaults.data_dir.to_string_lossy()).into(),
            cache_dir: text("CACHE_DIR", &defaults.cache_dir.to_string_lossy()).into(),
            ytdlp_path: text("YTDLP_PATH", &defaults.ytdlp_path.to_string_lossy()).into(),
            ffmpeg_path: text("FFMPEG_PATH", &defaults.ffmpeg_path.to_string_lossy()).into(),

            // Tiempos
            extractor_timeout: parse_or(&lookup, "EXTRACTOR_TIMEOUT", defaults.extractor_timeout)?,
            download_timeout: parse_or(&lookup, "DOWNLOAD_TIMEOUT", defaults.download_timeout)?,

            // Voz
            voice_join_attempts: parse_or(&lookup, "VOICE_JOIN_ATTEMPTS", defaults.voice_join_attempts)?,
            voice_join_backoff_ms: parse_or(&lookup, "VOICE_JOIN_BACKOFF_MS", defaults.voice_join_backoff_ms)?,
            duration_tick_secs: parse_or(&lookup, "DURATION_TICK_SECS", defaults.duration_tick_secs)?,

            // Transcodificador
            encode_application: text("ENCODE_APPLICATION", &defaults.encode_application),
            encode_bitrate: parse_or(&lookup, "ENCODE_BITRATE", defaults.encode_bitrate)?,
            encode_channels: parse_or(&lookup, "ENCODE_CHANNELS", defaults.encode_channels)?,
            encode_frame_rate: parse_or(&lookup, "ENCODE_FRAME_RATE", defaults.encode_frame_rate)?,
            encode_frame_duration: parse_or(&lookup, "ENCODE_FRAME_DURATION", defaults.encode_frame_duration)?,
            encode_compression_level: parse_or(
                &lookup,
                "ENCODE_COMPRESSION_LEVEL",
                defaults.encode_compression_level,
            )?,
            encode_packet_loss: parse_or(&lookup, "ENCODE_PACKET_LOSS", defaults.encode_packet_loss)?,
            encode_volume: parse_or(&lookup, "ENCODE_VOLUME", defaults.encode_volume)?,
            encode_reconnect: parse_or(&lookup, "ENCODE_RECONNECT", defaults.encode_reconnect)?,
            encode_reconnect_delay_max: parse_or(
                &lookup,
                "ENCODE_RECONNECT_DELAY_MAX",
                defaults.encode_reconnect_delay_max,
            )?,
            encode_reconnect_on_http_error: text(
                "ENCODE_RECONNECT_ON_HTTP_ERROR",
                &defaults.encode_reconnect_on_http_error,
            ),
            encode_user_agent: text("ENCODE_USER_AGENT", &defaults.encode_user_agent),
            encode_raw_output: parse_or(&lookup, "ENCODE_RAW_OUTPUT", defaults.encode_raw_output)?,
        })
    }

    /// Validates configuration values for correctness.
    ///
    /// # Validation Rules
    ///
    /// - Bitrate between 8 and 510 kbps (Opus limits)
    /// - Frame duration one of the Opus frame sizes
    /// - Compression level 0-10, packet loss 0-100
    /// - Volume between 0.0 and 2.0
    /// - At least one voice join attempt and a non-zero duration tick
    pub fn validate(&self) -> Result<()> {
        if self.discord_token.trim().is_empty() {
            anyhow::bail!("DISCORD_TOKEN cannot be empty");
        }

        if self.command_prefix.is_empty() {
            anyhow::bail!("Command prefix cannot be empty");
        }

        if !(8..=510).contains(&self.encode_bitrate) {
            anyhow::bail!("Bitrate must be between 8 and 510 kbps, got: {}", self.encode_bitrate);
        }

        if !matches!(self.encode_channels, 1 | 2) {
            anyhow::bail!("Channels must be 1 or 2, got: {}", self.encode_channels);
        }

        if !matches!(self.encode_frame_duration, 20 | 40 | 60) {
            anyhow::bail!("Frame duration must be 20, 40 or 60 ms, got: {}", self.encode_frame_duration);
        }

        if self.encode_compression_level > 10 {
            anyhow::bail!("Compression level must be 0-10, got: {}", self.encode_compression_level);
        }

        if self.encode_packet_loss > 100 {
            anyhow::bail!("Packet loss must be 0-100, got: {}", self.encode_packet_loss);
        }

        if !(0.0..=2.0).contains(&self.encode_volume) {
            anyhow::bail!("Volume must be between 0.0 and 2.0, got: {}", self.encode_volume);
        }

        if self.voice_join_attempts == 0 {
            anyhow::bail!("Voice join attempts must be greater than 0");
        }

        if self.duration_tick_secs == 0 {
            anyhow::bail!("Duration tick must be greater than 0");
        }

        Ok(())
    }

    /// Resumen sin datos sensibles, para logs
    pub fn summary(&self) -> String {
        format!(
            "Config Summary:\n  \
            Prefix: {}\n  \
            Paths: data={} cache={}\n  \
            Tools: yt-dlp={} ffmpeg={}\n  \
            Timeouts: extractor {}s, download {}s\n  \
            Voice: {} attempts, {}ms backoff\n  \
            Encode: {} {}kbps, {}ch @ {}Hz, {}ms frames, raw={}",
            self.command_prefix,
            self.data_dir.display(),
            self.cache_dir.display(),
            self.ytdlp_path.display(),
            self.ffmpeg_path.display(),
            self.extractor_timeout,
            self.download_timeout,
            self.voice_join_attempts,
            self.voice_join_backoff_ms,
            self.encode_application,
            self.encode_bitrate,
            self.encode_channels,
            self.encode_frame_rate,
            self.encode_frame_duration,
            self.encode_raw_output,
        )
    }

    pub fn extractor_timeout(&self) -> Duration {
        Duration::from_secs(self.extractor_timeout)
    }

    pub fn download_timeout(&self) -> Duration {
        Duration::from_secs(self.download_timeout)
    }

    pub fn encode_options(&self) -> EncodeOptions {
        EncodeOptions {
            application: self.encode_application.clone(),
            bitrate_kbps: self.encode_bitrate,
            channels: self.encode_channels,
            frame_rate: self.encode_frame_rate,
            frame_duration_ms: self.encode_frame_duration,
            compression_level: self.encode_compression_level,
            packet_loss: self.encode_packet_loss,
            volume: self.encode_volume,
            reconnect: self.encode_reconnect,
            reconnect_delay_max: Duration::from_secs(self.encode_reconnect_delay_max),
            reconnect_on_http_error: self.encode_reconnect_on_http_error.clone(),
            user_agent: self.encode_user_agent.clone(),
            raw_output: self.encode_raw_output,
            start_time: Duration::ZERO,
        }
    }

    pub fn player_settings(&self) -> PlayerSettings {
        PlayerSettings {
            voice: VoiceManager::new(
                self.voice_join_attempts,
                Duration::from_millis(self.voice_join_backoff_ms),
            ),
            encode: self.encode_options(),
            duration_tick: Duration::from_secs(self.duration_tick_secs),
        }
    }
}

fn parse_or<T>(lookup: &impl Fn(&str) -> Option<String>, key: &str, default: T) -> Result<T>
where
    T: FromStr,
    T::Err: std::error::Error + Send + Sync + 'static,
{
    match lookup(key) {
        Some(value) if !value.trim().is_empty() => value
            .trim()
            .parse()
            .with_context(|| format!("Valor inválido para {}: {:?}", key, value)),
        _ => Ok(default),
    }
}

/// Default configuration values.
///
/// Used as fallbacks when environment variables are not provided.
impl Default for Config {
    fn default() -> Self {
        let encode = EncodeOptions::default();

        Self {
            // Discord (el token no tiene valor por defecto)
            discord_token: String::new(),
            command_prefix: "!".to_string(),

            data_dir: "/app/data".into(),
            cache_dir: "/app/cache".into(),
            ytdlp_path: "yt-dlp".into(),
            ffmpeg_path: "ffmpeg".into(),

            extractor_timeout: 30,
            download_timeout: 300,

            voice_join_attempts: 5,
            voice_join_backoff_ms: 100,
            duration_tick_secs: 2,

            encode_application: encode.application,
            encode_bitrate: encode.bitrate_kbps,
            encode_channels: encode.channels,
            encode_frame_rate: encode.frame_rate,
            encode_frame_duration: encode.frame_duration_ms,
            encode_compression_level: encode.compression_level,
            encode_packet_loss: encode.packet_loss,
            encode_volume: encode.volume,
            encode_reconnect: encode.reconnect,
            encode_reconnect_delay_max: encode.reconnect_delay_max.as_secs(),
            encode_reconnect_on_http_error: encode.reconnect_on_http_error,
            encode_user_agent: encode.user_agent,
            encode_raw_output: encode.raw_output,
        }
    }
}
