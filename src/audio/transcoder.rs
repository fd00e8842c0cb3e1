//! Transcoder and streaming-bridge capabilities.
//!
//! The playback loop only talks to these traits; the songbird/ffmpeg
//! implementation lives in [`super::songbird_backend`].

use anyhow::{Context, Result};
use async_process::Command;
use async_trait::async_trait;
use regex::Regex;
use std::{path::PathBuf, time::Duration};
use tokio::sync::oneshot;
use tracing::debug;

use super::voice::VoiceGateway;

/// Opciones del transcodificador. Todas configurables por entorno.
#[derive(Debug, Clone, PartialEq)]
pub struct EncodeOptions {
    pub application: String,
    pub bitrate_kbps: u32,
    pub channels: u32,
    pub frame_rate: u32,
    pub frame_duration_ms: u32,
    pub compression_level: u32,
    pub packet_loss: u32,
    pub volume: f32,
    pub reconnect: bool,
    pub reconnect_delay_max: Duration,
    pub reconnect_on_http_error: String,
    pub user_agent: String,
    /// Opus ya codificado en Ogg; si es `false` se emite PCM en WAV y el
    /// driver de voz codifica.
    pub raw_output: bool,
    pub start_time: Duration,
}

impl Default for EncodeOptions {
    fn default() -> Self {
        Self {
            application: "lowdelay".to_string(),
            bitrate_kbps: 96,
            channels: 2,
            frame_rate: 48000,
            frame_duration_ms: 20,
            compression_level: 10,
            packet_loss: 1,
            volume: 1.0,
            reconnect: true,
            reconnect_delay_max: Duration::from_secs(5),
            reconnect_on_http_error: "4xx,5xx".to_string(),
            user_agent: "Mozilla/5.0 (Windows NT 10.0; Win64; x64) AppleWebKit/537.36".to_string(),
            raw_output: true,
            start_time: Duration::ZERO,
        }
    }
}

impl EncodeOptions {
    pub fn with_start_time(mut self, start_time: Duration) -> Self {
        self.start_time = start_time;
        self
    }

    /// Argumentos de ffmpeg para transcodificar `locator` hacia stdout
    pub fn ffmpeg_args(&self, locator: &str) -> Vec<String> {
        let mut args: Vec<String> = vec!["-hide_banner".into(), "-loglevel".into(), "error".into()];

        let is_remote = locator.starts_with("http://") || locator.starts_with("https://");
        if is_remote {
            if self.reconnect {
                args.extend([
                    "-reconnect".into(),
                    "1".into(),
                    "-reconnect_at_eof".into(),
                    "1".into(),
                    "-reconnect_streamed".into(),
                    "1".into(),
                    "-reconnect_on_network_error".into(),
                    "1".into(),
                    "-reconnect_on_http_error".into(),
                    self.reconnect_on_http_error.clone(),
                    "-reconnect_delay_max".into(),
                    self.reconnect_delay_max.as_secs().to_string(),
                ]);
            }
            args.extend(["-user_agent".into(), self.user_agent.clone()]);
        }

        if !self.start_time.is_zero() {
            args.extend([
                "-ss".into(),
                format!("{:.3}", self.start_time.as_secs_f64()),
            ]);
        }

        args.extend([
            "-i".into(),
            locator.to_string(),
            "-vn".into(),
            "-map".into(),
            "0:a".into(),
            "-filter:a".into(),
            format!("volume={}", self.volume),
            "-ac".into(),
            self.channels.to_string(),
            "-ar".into(),
            self.frame_rate.to_string(),
        ]);

        if self.raw_output {
            args.extend([
                "-c:a".into(),
                "libopus".into(),
                "-b:a".into(),
                format!("{}k", self.bitrate_kbps),
                "-application".into(),
                self.application.clone(),
                "-frame_duration".into(),
                self.frame_duration_ms.to_string(),
                "-compression_level".into(),
                self.compression_level.to_string(),
                "-packet_loss".into(),
                self.packet_loss.to_string(),
                "-f".into(),
                "ogg".into(),
            ]);
        } else {
            args.extend(["-f".into(), "wav".into()]);
        }

        args.push("pipe:1".into());
        args
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct EncodeStats {
    /// Tiempo desde que arrancó el transcodificador
    pub duration: Duration,
}

/// Sesión del transcodificador para un intento de reproducción
pub trait EncodeSession: Send + Sync + 'static {
    fn options(&self) -> &EncodeOptions;
    fn stats(&self) -> EncodeStats;
    fn stop(&mut self);
    /// Libera lo que haya quedado del proceso
    fn cleanup(&mut self);
}

/// Cómo terminó un stream
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StreamEnd {
    /// EOF o interrupción sin error
    Finished,
    Failed(String),
}

/// Puente transcodificador → conexión de voz
#[async_trait]
pub trait StreamingSession: Send + Sync + 'static {
    /// Tiempo reproducido desde el inicio de este stream
    async fn playback_position(&self) -> Duration;
    async fn paused(&self) -> bool;
    async fn set_paused(&self, paused: bool) -> Result<()>;
}

/// Everything the playback loop needs from the outside world: voice,
/// transcoding and the bridge between them.
#[async_trait]
pub trait AudioBackend: VoiceGateway {
    type Encoding: EncodeSession;
    type Stream: StreamingSession;

    async fn encode(&self, locator: &str, options: &EncodeOptions) -> Result<Self::Encoding>;

    /// Starts pushing the encoded audio into the connection. The receiver
    /// fires once when the stream ends; a dropped sender counts as EOF.
    async fn new_stream(
        &self,
        encoding: &mut Self::Encoding,
        connection: &Self::Connection,
    ) -> Result<(Self::Stream, oneshot::Receiver<StreamEnd>)>;
}

/// Consulta la duración de un archivo local
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait DurationProbe: Send + Sync {
    async fn probe(&self, path: &str) -> Result<Duration>;
}

/// Sonda de duración basada en `ffmpeg -i`
#[derive(Debug, Clone)]
pub struct FfmpegProbe {
    binary: PathBuf,
    timeout: Duration,
}

impl FfmpegProbe {
    pub fn new(binary: impl Into<PathBuf>, timeout: Duration) -> Self {
        Self {
            binary: binary.into(),
            timeout,
        }
    }
}

#[async_trait]
impl DurationProbe for FfmpegProbe {
    async fn probe(&self, path: &str) -> Result<Duration> {
        debug!("⏱️ Consultando duración de {}", path);

        // Sin salida ffmpeg termina con error, pero imprime la cabecera en stderr
        let output = Command::new(&self.binary)
            .args(["-hide_banner", "-i", path])
            .kill_on_drop(true)
            .output();

        let output = tokio::time::timeout(self.timeout, output)
            .await
            .context("ffmpeg no respondió a tiempo")?
            .context("Error al ejecutar ffmpeg")?;

        let stderr = String::from_utf8_lossy(&output.stderr);
        parse_duration(&stderr)
            .with_context(|| format!("ffmpeg no informó duración para {}", path))
    }
}

/// Extrae `Duration: HH:MM:SS` de la salida de ffmpeg
pub fn parse_duration(ffmpeg_output: &str) -> Option<Duration> {
    let re = Regex::new(r"Duration: (\d{2}):(\d{2}):(\d{2})\.\d+").ok()?;
    let caps = re.captures(ffmpeg_output)?;

    let field = |index: usize| -> Option<u64> { caps.get(index)?.as_str().parse().ok() };
    let (hours, minutes, seconds) = (field(1)?, field(2)?, field(3)?);

    Some(Duration::from_secs(hours * 3600 + minutes * 60 + seconds))
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn test_parse_duration() {
        let output = "Input #0, mp3, from 'song.mp3':\n  Duration: 01:02:03.45, start: 0.025057, bitrate: 320 kb/s\n";
        assert_eq!(parse_duration(output), Some(Duration::from_secs(3723)));
        assert_eq!(parse_duration("Duration: N/A, bitrate: N/A"), None);
    }

    #[test]
    fn test_remote_args_carry_reconnect_and_offset() {
        let options = EncodeOptions::default().with_start_time(Duration::from_millis(83_500));
        let args = options.ffmpeg_args("https://cdn.example/audio");

        let position = |flag: &str| args.iter().position(|arg| arg == flag);
        assert_eq!(args[position("-ss").unwrap() + 1], "83.500");
        assert_eq!(args[position("-reconnect_on_http_error").unwrap() + 1], "4xx,5xx");
        assert!(position("-ss").unwrap() < position("-i").unwrap());
        assert_eq!(args[position("-b:a").unwrap() + 1], "96k");
        assert_eq!(args.last().map(String::as_str), Some("pipe:1"));
    }

    #[test]
    fn test_local_pcm_args() {
        let options = EncodeOptions {
            raw_output: false,
            ..EncodeOptions::default()
        };
        let args = options.ffmpeg_args("/cache/20240101_120000_000.webm");

        assert!(!args.iter().any(|arg| arg == "-reconnect"));
        assert!(!args.iter().any(|arg| arg == "-ss"));
        assert!(args.windows(2).any(|pair| pair == ["-f", "wav"]));
    }
}
