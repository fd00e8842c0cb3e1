//! Songbird + ffmpeg implementation of the audio backend.

use anyhow::{Context, Result};
use async_trait::async_trait;
use serenity::model::id::{ChannelId, GuildId};
use songbird::{
    driver::Bitrate,
    error::JoinError,
    input::{ChildContainer, Input},
    tracks::{PlayMode, TrackHandle},
    Call, Event, EventContext, EventHandler as VoiceEventHandler, Songbird, TrackEvent,
};
use std::{
    path::PathBuf,
    process::{Command, Stdio},
    sync::{
        atomic::{AtomicBool, AtomicU64, Ordering},
        Arc,
    },
    time::{Duration, Instant},
};
use tokio::sync::{oneshot, Mutex};
use tracing::{debug, info, warn};

use super::{
    transcoder::{
        AudioBackend, EncodeOptions, EncodeSession, EncodeStats, StreamEnd, StreamingSession,
    },
    voice::{VoiceConnection, VoiceGateway},
};

pub struct SongbirdBackend {
    manager: Arc<Songbird>,
    ffmpeg: PathBuf,
}

impl SongbirdBackend {
    pub fn new(manager: Arc<Songbird>, ffmpeg: impl Into<PathBuf>) -> Self {
        Self {
            manager,
            ffmpeg: ffmpeg.into(),
        }
    }
}

/// Llamada de voz de una guild
#[derive(Clone)]
pub struct SongbirdConnection {
    guild: GuildId,
    manager: Arc<Songbird>,
    call: Arc<Mutex<Call>>,
}

#[async_trait]
impl VoiceConnection for SongbirdConnection {
    async fn set_transmitting(&self, transmitting: bool) -> Result<()> {
        let mut call = self.call.lock().await;
        call.mute(!transmitting)
            .await
            .context("Error al cambiar el estado de transmisión")
    }

    async fn disconnect(&self) -> Result<()> {
        match self.manager.remove(self.guild).await {
            Ok(()) | Err(JoinError::NoCall) => Ok(()),
            Err(e) => Err(e).context("Error al salir del canal de voz"),
        }
    }
}

#[async_trait]
impl VoiceGateway for SongbirdBackend {
    type Connection = SongbirdConnection;

    async fn join_voice(&self, guild: GuildId, channel: ChannelId) -> Result<Self::Connection> {
        let call = self
            .manager
            .join(guild, channel)
            .await
            .context("Error al unirse al canal de voz")?;

        Ok(SongbirdConnection {
            guild,
            manager: self.manager.clone(),
            call,
        })
    }
}

/// Proceso ffmpeg listo para reproducirse
pub struct FfmpegEncoding {
    options: EncodeOptions,
    input: parking_lot::Mutex<Option<Input>>,
    track: Option<TrackHandle>,
    started: Instant,
}

impl EncodeSession for FfmpegEncoding {
    fn options(&self) -> &EncodeOptions {
        &self.options
    }

    fn stats(&self) -> EncodeStats {
        EncodeStats {
            duration: self.started.elapsed(),
        }
    }

    fn stop(&mut self) {
        if let Some(track) = self.track.take() {
            if let Err(e) = track.stop() {
                debug!("Track ya detenido: {}", e);
            }
        }
    }

    fn cleanup(&mut self) {
        // Soltar el input mata el proceso hijo si nunca llegó a reproducirse
        *self.input.get_mut() = None;
        self.track = None;
    }
}

/// Stream activo en la llamada
pub struct SongbirdStream {
    track: TrackHandle,
    last_position: Arc<AtomicU64>,
    paused: AtomicBool,
}

#[async_trait]
impl StreamingSession for SongbirdStream {
    async fn playback_position(&self) -> Duration {
        match self.track.get_info().await {
            Ok(state) => state.position,
            // El track ya terminó: usar la posición registrada por el evento
            Err(_) => Duration::from_millis(self.last_position.load(Ordering::SeqCst)),
        }
    }

    async fn paused(&self) -> bool {
        self.paused.load(Ordering::SeqCst)
    }

    async fn set_paused(&self, paused: bool) -> Result<()> {
        if paused {
            self.track.pause().context("Error al pausar")?;
        } else {
            self.track.play().context("Error al reanudar")?;
        }
        self.paused.store(paused, Ordering::SeqCst);
        Ok(())
    }
}

/// Avisa al loop cuando el track termina o falla
struct StreamEndNotifier {
    done: Arc<parking_lot::Mutex<Option<oneshot::Sender<StreamEnd>>>>,
    last_position: Arc<AtomicU64>,
}

#[async_trait]
impl VoiceEventHandler for StreamEndNotifier {
    async fn act(&self, ctx: &EventContext<'_>) -> Option<Event> {
        let EventContext::Track(tracks) = ctx else {
            return None;
        };

        let end = match tracks.first() {
            Some((state, _)) => {
                let millis = u64::try_from(state.position.as_millis()).unwrap_or(u64::MAX);
                self.last_position.store(millis, Ordering::SeqCst);

                match &state.playing {
                    PlayMode::Errored(e) => StreamEnd::Failed(format!("{:?}", e)),
                    _ => StreamEnd::Finished,
                }
            }
            None => StreamEnd::Finished,
        };

        if let Some(done) = self.done.lock().take() {
            debug!("🏁 Stream terminado: {:?}", end);
            let _ = done.send(end);
        }

        None
    }
}

#[async_trait]
impl AudioBackend for SongbirdBackend {
    type Encoding = FfmpegEncoding;
    type Stream = SongbirdStream;

    async fn encode(&self, locator: &str, options: &EncodeOptions) -> Result<Self::Encoding> {
        let args = options.ffmpeg_args(locator);
        debug!("🎛️ ffmpeg {}", args.join(" "));

        let child = Command::new(&self.ffmpeg)
            .args(&args)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::null())
            .spawn()
            .context("Error al lanzar ffmpeg")?;

        Ok(FfmpegEncoding {
            options: options.clone(),
            input: parking_lot::Mutex::new(Some(Input::from(ChildContainer::from(child)))),
            track: None,
            started: Instant::now(),
        })
    }

    async fn new_stream(
        &self,
        encoding: &mut Self::Encoding,
        connection: &Self::Connection,
    ) -> Result<(Self::Stream, oneshot::Receiver<StreamEnd>)> {
        let input = encoding
            .input
            .get_mut()
            .take()
            .context("La sesión de ffmpeg ya se está reproduciendo")?;

        let track = {
            let mut call = connection.call.lock().await;
            let bitrate = i32::try_from(encoding.options.bitrate_kbps * 1000).unwrap_or(i32::MAX);
            call.set_bitrate(Bitrate::BitsPerSecond(bitrate));
            call.play_input(input)
        };

        let (done_tx, done_rx) = oneshot::channel();
        let done = Arc::new(parking_lot::Mutex::new(Some(done_tx)));
        let last_position = Arc::new(AtomicU64::new(0));

        for event in [TrackEvent::End, TrackEvent::Error] {
            let notifier = StreamEndNotifier {
                done: done.clone(),
                last_position: last_position.clone(),
            };
            track
                .add_event(Event::Track(event), notifier)
                .map_err(|e| anyhow::anyhow!("Error al agregar event handler: {}", e))?;
        }

        encoding.track = Some(track.clone());
        info!("▶️ Stream iniciado en guild {}", connection.guild);

        Ok((
            SongbirdStream {
                track,
                last_position,
                paused: AtomicBool::new(false),
            },
            done_rx,
        ))
    }
}

impl Drop for FfmpegEncoding {
    fn drop(&mut self) {
        if self.track.is_some() {
            warn!("⚠️ Sesión de ffmpeg soltada sin detener");
            self.stop();
        }
    }
}
