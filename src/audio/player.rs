use parking_lot::{Mutex, RwLock};
use serenity::model::id::{ChannelId, GuildId};
use std::{
    path::PathBuf,
    sync::{
        atomic::{AtomicBool, Ordering},
        Arc,
    },
    time::Duration,
};
use tokio::sync::{mpsc, oneshot};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use super::{
    cache::{self, MediaDownloader},
    queue::SongQueue,
    signals::{self, ActionChannel, ActionSignal, StatusChannel, StatusSignal},
    transcoder::{
        AudioBackend, DurationProbe, EncodeOptions, EncodeSession, StreamEnd, StreamingSession,
    },
    voice::{VoiceConnection, VoiceManager},
};
use crate::{
    error::{PlaybackError, SignalError},
    sources::{Song, SourceKind},
    storage::{TrackKey, TrackStore},
};

/// Ajustes compartidos por todos los players
#[derive(Debug, Clone)]
pub struct PlayerSettings {
    pub voice: VoiceManager,
    pub encode: EncodeOptions,
    /// Cada cuánto se suma tiempo de reproducción al historial
    pub duration_tick: Duration,
}

impl Default for PlayerSettings {
    fn default() -> Self {
        Self {
            voice: VoiceManager::default(),
            encode: EncodeOptions::default(),
            duration_tick: Duration::from_secs(2),
        }
    }
}

/// Colaboradores compartidos por todos los players del proceso
pub struct PlayerContext<B: AudioBackend> {
    pub backend: Arc<B>,
    pub store: Arc<dyn TrackStore>,
    pub downloader: Arc<dyn MediaDownloader>,
    pub duration_probe: Arc<dyn DurationProbe>,
    pub settings: PlayerSettings,
}

/// What to do once a stream ends cleanly
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Completion {
    /// Interrumpido antes del final: reiniciar en esta posición
    Resume(Duration),
    /// No se reprodujo nada
    StartFailed,
    /// Siguiente canción, o fin si la cola está vacía
    Advance,
}

/// Decide qué hacer al terminar un stream sin error.
///
/// `offset` is where the transcoder started, `played` what the stream
/// reports. An unknown duration (live streams) always advances.
///
/// StartFailed looks at `played`, not at the absolute position: a resumed
/// stream that dies without producing audio would otherwise restart at the
/// same offset forever.
pub fn classify_completion(
    offset: Duration,
    played: Duration,
    duration: Option<Duration>,
) -> Completion {
    if played.is_zero() {
        return Completion::StartFailed;
    }

    let position = offset + played;
    match duration {
        Some(duration) if position < duration => Completion::Resume(position),
        _ => Completion::Advance,
    }
}

#[derive(Debug, Default)]
struct Session {
    current: Option<Song>,
    queue: SongQueue,
    /// Hay un loop que atenderá la cola. Se apaga con el mismo lock que
    /// decide terminar, así `enqueue` nunca deja canciones huérfanas.
    running: bool,
}

enum Wake {
    Ended(StreamEnd),
    CacheReady(PathBuf),
    Action(ActionSignal),
}

/// Dónde arranca el próximo intento
#[derive(Debug, Clone, Copy, Default)]
struct Start {
    offset: Duration,
    /// Arrancar pausado (la pausa sobrevive al cambio de caché y al swap)
    paused: bool,
}

/// Resultado de un intento: seguir en el loop o terminar
enum Next {
    Restart(Start),
    Finish,
}

/// Detiene y limpia el transcodificador al salir del intento
struct Attempt<E: EncodeSession> {
    encoding: E,
}

impl<E: EncodeSession> Drop for Attempt<E> {
    fn drop(&mut self) {
        self.encoding.stop();
        self.encoding.cleanup();
    }
}

/// Playback engine for one guild.
///
/// `play()` runs the loop until the queue is exhausted, a Stop arrives or an
/// error ends the session. Only one loop may run at a time; callers talk to it
/// through [`GuildPlayer::send_action`] and [`GuildPlayer::listen_status`].
pub struct GuildPlayer<B: AudioBackend> {
    guild: GuildId,
    ctx: Arc<PlayerContext<B>>,
    channel: RwLock<Option<ChannelId>>,
    session: Mutex<Session>,
    actions: ActionChannel,
    status: StatusChannel,
}

impl<B: AudioBackend> GuildPlayer<B> {
    pub fn new(guild: GuildId, ctx: Arc<PlayerContext<B>>) -> Self {
        Self {
            guild,
            ctx,
            channel: RwLock::new(None),
            session: Mutex::new(Session::default()),
            actions: ActionChannel::new(),
            status: StatusChannel::new(),
        }
    }

    pub fn channel(&self) -> Option<ChannelId> {
        *self.channel.read()
    }

    /// Canal de voz para el próximo (re)inicio
    pub fn set_channel(&self, channel: ChannelId) {
        *self.channel.write() = Some(channel);
    }

    pub fn current_song(&self) -> Option<Song> {
        self.session.lock().current.clone()
    }

    pub fn queue(&self) -> Vec<Song> {
        self.session.lock().queue.snapshot()
    }

    pub fn is_playing(&self) -> bool {
        self.session.lock().running
    }

    /// Agrega canciones al final de la cola.
    ///
    /// Devuelve `true` cuando no hay loop que las vaya a reproducir y el
    /// llamador tiene que lanzar [`GuildPlayer::play`].
    pub fn enqueue(&self, songs: Vec<Song>) -> bool {
        let (added, running) = {
            let mut session = self.session.lock();
            (session.queue.enqueue_all(songs), session.running)
        };

        if added > 0 && running {
            self.emit(StatusSignal::Added);
        }
        added > 0 && !running
    }

    pub fn send_action(&self, action: ActionSignal) -> Result<(), SignalError> {
        if !self.is_playing() {
            return Err(SignalError::NotRunning);
        }
        self.actions.send(action)
    }

    /// Nuevo oyente de estados; reemplaza al anterior
    pub fn listen_status(&self) -> mpsc::Receiver<StatusSignal> {
        self.status.listen()
    }

    /// Detiene el loop (si corre) y espera a que termine
    pub async fn shutdown(&self, timeout: Duration) {
        let deadline = tokio::time::Instant::now() + timeout;

        while self.is_playing() && tokio::time::Instant::now() < deadline {
            match self.send_action(ActionSignal::Stop) {
                Ok(()) | Err(SignalError::Busy(_)) => {}
                Err(_) => break,
            }
            tokio::time::sleep(Duration::from_millis(50)).await;
        }

        if self.is_playing() {
            warn!("⚠️ El player de guild {} no se detuvo a tiempo", self.guild);
        }
    }

    /// Reproduce la cola hasta vaciarla o recibir Stop
    pub async fn play(&self) -> Result<(), PlaybackError> {
        {
            let mut session = self.session.lock();
            if session.running {
                return Err(PlaybackError::AlreadyPlaying(self.guild));
            }
            session.running = true;
        }

        let mut actions = self.actions.claim().await;
        info!("🎶 Iniciando reproducción en guild {}", self.guild);

        let mut connection = None;
        let result = self.run(&mut actions, &mut connection).await;

        // Los finales normales y QueueEmpty ya apagaron `running` al decidir
        if matches!(&result, Err(e) if !matches!(e, PlaybackError::QueueEmpty)) {
            let mut session = self.session.lock();
            session.running = false;
            session.current = None;
        }

        if let Some(connection) = connection.take() {
            if let Err(e) = self.ctx.settings.voice.leave(&connection).await {
                warn!("⚠️ Error al salir del canal de voz: {}", e);
            }
        }
        signals::drain_stale(&mut actions);

        match &result {
            Ok(()) => info!("⏹️ Reproducción terminada en guild {}", self.guild),
            Err(PlaybackError::QueueEmpty) => debug!("📭 Nada que reproducir en guild {}", self.guild),
            Err(e) => {
                error!("❌ Reproducción fallida en guild {}: {}", self.guild, e);
                self.emit(StatusSignal::Error);
            }
        }

        result
    }

    async fn run(
        &self,
        actions: &mut mpsc::Receiver<ActionSignal>,
        connection: &mut Option<B::Connection>,
    ) -> Result<(), PlaybackError> {
        let mut start = Start::default();

        loop {
            let song = self.current_or_next()?;
            match self.attempt(song, start, actions, connection).await? {
                Next::Restart(next) => start = next,
                Next::Finish => return Ok(()),
            }
        }
    }

    fn current_or_next(&self) -> Result<Song, PlaybackError> {
        let mut session = self.session.lock();
        if let Some(song) = &session.current {
            return Ok(song.clone());
        }

        let Some(song) = session.queue.dequeue() else {
            session.running = false;
            return Err(PlaybackError::QueueEmpty);
        };
        session.current = Some(song.clone());
        Ok(song)
    }

    /// Un intento: transcodificar desde `start.offset` y esperar a que algo pase
    async fn attempt(
        &self,
        song: Song,
        start: Start,
        actions: &mut mpsc::Receiver<ActionSignal>,
        connection: &mut Option<B::Connection>,
    ) -> Result<Next, PlaybackError> {
        let channel = self.channel().ok_or(PlaybackError::NoChannel(self.guild))?;
        let backend = &self.ctx.backend;
        let options = self.ctx.settings.encode.clone().with_start_time(start.offset);
        // Cancela la descarga y el contador al terminar el intento, con o sin error
        let token = CancellationToken::new();
        let _cancel = token.clone().drop_guard();

        let mut cache_rx = if song.is_cacheable() && self.cache_enabled().await? {
            Some(cache::spawn_fetch(
                self.ctx.downloader.clone(),
                song.public_link().to_string(),
                token.child_token(),
            ))
        } else {
            None
        };

        let encoding = backend
            .encode(song.stream_locator(), &options)
            .await
            .map_err(|source| PlaybackError::Transcoder {
                title: song.title().to_string(),
                source,
            })?;
        let mut attempt = Attempt { encoding };
        let offset = attempt.encoding.options().start_time;

        let joined = self
            .ctx
            .settings
            .voice
            .join(backend.as_ref(), self.guild, channel)
            .await?;
        let connection = connection.insert(joined);

        let (stream, mut done) = backend
            .new_stream(&mut attempt.encoding, connection)
            .await
            .map_err(|source| PlaybackError::Bridge {
                title: song.title().to_string(),
                source,
            })?;

        let key = TrackKey::from_song(&song);
        if offset.is_zero() {
            if let Err(e) = self.ctx.store.add_track_count_by_one(self.guild, &key).await {
                warn!("⚠️ No se pudo guardar el contador de {}: {}", song.title(), e);
            }
        }

        let paused = Arc::new(AtomicBool::new(false));
        if start.paused {
            debug!("⏸️ {} sigue en pausa tras reiniciar", song.title());
            self.set_pause(&stream, connection, &paused, true).await;
        } else if offset.is_zero() {
            info!("🎵 Reproduciendo: {}", song.title());
            self.emit(StatusSignal::Playing);
        } else {
            info!("⏯️ Reanudando {} desde {:?}", song.title(), offset);
            self.emit(StatusSignal::Resuming);
        }

        self.spawn_duration_ticker(key, paused.clone(), token.child_token());

        let wake = loop {
            tokio::select! {
                end = &mut done => break Wake::Ended(end.unwrap_or(StreamEnd::Finished)),
                path = cache_ready(&mut cache_rx) => break Wake::CacheReady(path),
                action = actions.recv() => match action {
                    Some(ActionSignal::PauseResume) => {
                        let pause = !stream.paused().await;
                        self.set_pause(&stream, connection, &paused, pause).await;
                    }
                    Some(action) => break Wake::Action(action),
                    None => break Wake::Action(ActionSignal::Stop),
                },
            }
        };

        let played = stream.playback_position().await;
        let was_paused = paused.load(Ordering::SeqCst);
        debug!(
            "📍 Offset {:?}, reproducido {:?}, transcodificado {:?}",
            offset,
            played,
            attempt.encoding.stats().duration
        );
        drop(stream);
        drop(attempt);

        match wake {
            Wake::Ended(StreamEnd::Failed(message)) => Err(PlaybackError::Stream {
                title: song.title().to_string(),
                message,
            }),
            Wake::Ended(StreamEnd::Finished) => {
                let duration = self.song_duration(&song).await?;
                match classify_completion(offset, played, duration) {
                    Completion::Resume(position) => {
                        info!("🔄 Reproducción interrumpida, reiniciando \"{}\" en {:?}", song.title(), position);
                        Ok(Next::Restart(Start {
                            offset: position,
                            paused: false,
                        }))
                    }
                    Completion::StartFailed => Err(PlaybackError::StartFailed(song.title().to_string())),
                    Completion::Advance => Ok(self.advance()),
                }
            }
            Wake::CacheReady(path) => {
                if let Some(current) = self.session.lock().current.as_mut() {
                    if current.switch_to_cached(path) {
                        info!("💾 Cambiando a la copia en caché de \"{}\"", current.title());
                    }
                }
                Ok(Next::Restart(Start {
                    offset: offset + played,
                    paused: was_paused,
                }))
            }
            Wake::Action(ActionSignal::Skip) => {
                info!("⏭️ Saltando \"{}\"", song.title());
                Ok(self.advance())
            }
            Wake::Action(ActionSignal::Stop) => {
                self.stop_session();
                Ok(Next::Finish)
            }
            Wake::Action(ActionSignal::Swap) => {
                debug!("🔀 Reentrando al canal de voz");
                Ok(Next::Restart(Start {
                    offset,
                    paused: was_paused,
                }))
            }
            // La pausa se atiende dentro del intento; no llega hasta aquí
            Wake::Action(ActionSignal::PauseResume) => Ok(Next::Restart(Start {
                offset: offset + played,
                paused: was_paused,
            })),
        }
    }

    /// Suelta la canción actual. Con la cola vacía la sesión termina en el
    /// mismo paso, antes de que otro `enqueue` pueda verla corriendo.
    fn advance(&self) -> Next {
        let mut session = self.session.lock();
        session.current = None;

        if session.queue.is_empty() {
            session.running = false;
            drop(session);
            info!("✅ Cola terminada en guild {}", self.guild);
            self.emit(StatusSignal::Resting);
            Next::Finish
        } else {
            Next::Restart(Start::default())
        }
    }

    fn stop_session(&self) {
        {
            let mut session = self.session.lock();
            session.current = None;
            session.queue.clear();
            session.running = false;
        }
        info!("⏹️ Reproducción detenida en guild {}", self.guild);
        self.emit(StatusSignal::Resting);
    }

    async fn set_pause(
        &self,
        stream: &B::Stream,
        connection: &B::Connection,
        paused: &AtomicBool,
        pause: bool,
    ) {
        if let Err(e) = stream.set_paused(pause).await {
            warn!("⚠️ No se pudo cambiar la pausa: {}", e);
            return;
        }
        paused.store(pause, Ordering::SeqCst);

        if let Err(e) = connection.set_transmitting(!pause).await {
            warn!("⚠️ No se pudo actualizar la transmisión: {}", e);
        }

        if pause {
            info!("⏸️ Reproducción pausada");
            self.emit(StatusSignal::Paused);
        } else {
            info!("▶️ Reproducción reanudada");
            self.emit(StatusSignal::Playing);
        }
    }

    async fn cache_enabled(&self) -> Result<bool, PlaybackError> {
        self.ctx
            .store
            .is_cache_enabled(self.guild)
            .await
            .map_err(PlaybackError::Storage)
    }

    /// Duración para decidir entre reanudar y avanzar
    async fn song_duration(&self, song: &Song) -> Result<Option<Duration>, PlaybackError> {
        match song.kind() {
            SourceKind::Platform => Ok(song.duration()),
            SourceKind::InternetStream => Ok(None),
            SourceKind::LocalFile => self
                .ctx
                .duration_probe
                .probe(song.stream_locator())
                .await
                .map(Some)
                .map_err(|source| PlaybackError::Probe {
                    path: PathBuf::from(song.stream_locator()),
                    source,
                }),
        }
    }

    fn spawn_duration_ticker(&self, key: TrackKey, paused: Arc<AtomicBool>, token: CancellationToken) {
        let store = self.ctx.store.clone();
        let guild = self.guild;
        let tick = self.ctx.settings.duration_tick;

        tokio::spawn(async move {
            let mut interval = tokio::time::interval_at(tokio::time::Instant::now() + tick, tick);

            loop {
                tokio::select! {
                    _ = token.cancelled() => break,
                    _ = interval.tick() => {
                        if paused.load(Ordering::SeqCst) {
                            continue;
                        }
                        if let Err(e) = store.add_track_duration(guild, &key, tick).await {
                            warn!("⚠️ Error al guardar duración de {}: {}", key.title, e);
                        }
                    }
                }
            }
        });
    }

    fn emit(&self, signal: StatusSignal) {
        if let Err(e) = self.status.emit(signal) {
            debug!("📪 Estado {} descartado: {}", signal, e);
        }
    }
}

/// Se resuelve con la ruta cacheada; queda pendiente si no hay descarga
/// o si la descarga falló
async fn cache_ready(rx: &mut Option<oneshot::Receiver<PathBuf>>) -> PathBuf {
    if let Some(receiver) = rx {
        match receiver.await {
            Ok(path) => return path,
            Err(_) => *rx = None,
        }
    }
    std::future::pending().await
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        audio::{
            cache::MockMediaDownloader,
            transcoder::{EncodeStats, MockDurationProbe},
            voice::VoiceGateway,
        },
        storage::JsonStorage,
    };
    use async_trait::async_trait;
    use pretty_assertions::assert_eq;
    use std::{collections::VecDeque, sync::atomic::AtomicU32};
    use tempfile::TempDir;
    use tokio::sync::{Mutex as AsyncMutex, Notify};

    const CHANNEL: ChannelId = ChannelId::new(10);

    /// Guion de un stream: posición reportada y cómo termina.
    /// `None` mantiene el stream abierto hasta el teardown.
    struct Run {
        played: Duration,
        end: Option<StreamEnd>,
    }

    fn ends_at(secs: u64) -> Run {
        Run {
            played: Duration::from_secs(secs),
            end: Some(StreamEnd::Finished),
        }
    }

    fn open_at(secs: u64) -> Run {
        Run {
            played: Duration::from_secs(secs),
            end: None,
        }
    }

    #[derive(Default)]
    struct ConnectionState {
        transmitting: AtomicBool,
        disconnected: AtomicBool,
        /// Simula un `remove` lento del gateway de voz
        disconnect_delay: Duration,
    }

    #[async_trait]
    impl VoiceConnection for Arc<ConnectionState> {
        async fn set_transmitting(&self, transmitting: bool) -> anyhow::Result<()> {
            self.transmitting.store(transmitting, Ordering::SeqCst);
            Ok(())
        }

        async fn disconnect(&self) -> anyhow::Result<()> {
            if !self.disconnect_delay.is_zero() {
                tokio::time::sleep(self.disconnect_delay).await;
            }
            self.disconnected.store(true, Ordering::SeqCst);
            Ok(())
        }
    }

    struct FakeEncoding {
        options: EncodeOptions,
    }

    impl EncodeSession for FakeEncoding {
        fn options(&self) -> &EncodeOptions {
            &self.options
        }
        fn stats(&self) -> EncodeStats {
            EncodeStats::default()
        }
        fn stop(&mut self) {}
        fn cleanup(&mut self) {}
    }

    struct FakeStream {
        played: Duration,
        paused: Arc<AtomicBool>,
    }

    #[async_trait]
    impl StreamingSession for FakeStream {
        async fn playback_position(&self) -> Duration {
            self.played
        }
        async fn paused(&self) -> bool {
            self.paused.load(Ordering::SeqCst)
        }
        async fn set_paused(&self, paused: bool) -> anyhow::Result<()> {
            self.paused.store(paused, Ordering::SeqCst);
            Ok(())
        }
    }

    #[derive(Default)]
    struct FakeBackend {
        runs: Mutex<VecDeque<Run>>,
        encodes: Mutex<Vec<(String, Duration)>>,
        joins: Mutex<Vec<ChannelId>>,
        connection: Arc<ConnectionState>,
        stream_paused: Arc<AtomicBool>,
        open_streams: Mutex<Vec<oneshot::Sender<StreamEnd>>>,
        join_failures: AtomicU32,
    }

    impl FakeBackend {
        fn new(runs: Vec<Run>) -> Self {
            Self {
                runs: Mutex::new(runs.into()),
                ..Self::default()
            }
        }

        fn with_slow_disconnect(mut self, delay: Duration) -> Self {
            self.connection = Arc::new(ConnectionState {
                disconnect_delay: delay,
                ..ConnectionState::default()
            });
            self
        }

        /// Los próximos `failures` joins fallan
        fn with_join_failures(self, failures: u32) -> Self {
            self.join_failures.store(failures, Ordering::SeqCst);
            self
        }

        fn encodes(&self) -> Vec<(String, u64)> {
            self.encodes
                .lock()
                .iter()
                .map(|(locator, start)| (locator.clone(), start.as_secs()))
                .collect()
        }
    }

    #[async_trait]
    impl VoiceGateway for FakeBackend {
        type Connection = Arc<ConnectionState>;

        async fn join_voice(&self, _guild: GuildId, channel: ChannelId) -> anyhow::Result<Self::Connection> {
            self.joins.lock().push(channel);
            if self
                .join_failures
                .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |left| left.checked_sub(1))
                .is_ok()
            {
                anyhow::bail!("voice gateway timed out");
            }
            self.connection.disconnected.store(false, Ordering::SeqCst);
            Ok(self.connection.clone())
        }
    }

    #[async_trait]
    impl AudioBackend for FakeBackend {
        type Encoding = FakeEncoding;
        type Stream = FakeStream;

        async fn encode(&self, locator: &str, options: &EncodeOptions) -> anyhow::Result<FakeEncoding> {
            self.encodes
                .lock()
                .push((locator.to_string(), options.start_time));
            Ok(FakeEncoding {
                options: options.clone(),
            })
        }

        async fn new_stream(
            &self,
            _encoding: &mut FakeEncoding,
            _connection: &Self::Connection,
        ) -> anyhow::Result<(FakeStream, oneshot::Receiver<StreamEnd>)> {
            let run = self
                .runs
                .lock()
                .pop_front()
                .ok_or_else(|| anyhow::anyhow!("no more scripted runs"))?;
            let (tx, rx) = oneshot::channel();

            match run.end {
                Some(end) => {
                    let _ = tx.send(end);
                }
                None => self.open_streams.lock().push(tx),
            }

            self.stream_paused.store(false, Ordering::SeqCst);
            Ok((
                FakeStream {
                    played: run.played,
                    paused: self.stream_paused.clone(),
                },
                rx,
            ))
        }
    }

    /// Guarda las duraciones en memoria, sin tocar disco
    #[derive(Default)]
    struct RecordingStore {
        durations: Mutex<Vec<Duration>>,
    }

    #[async_trait]
    impl TrackStore for RecordingStore {
        async fn is_cache_enabled(&self, _guild: GuildId) -> anyhow::Result<bool> {
            Ok(false)
        }
        async fn add_track_count_by_one(&self, _guild: GuildId, _track: &TrackKey) -> anyhow::Result<()> {
            Ok(())
        }
        async fn add_track_duration(
            &self,
            _guild: GuildId,
            _track: &TrackKey,
            delta: Duration,
        ) -> anyhow::Result<()> {
            self.durations.lock().push(delta);
            Ok(())
        }
    }

    /// La descarga termina cuando el test abre la compuerta
    struct GatedDownloader {
        gate: Arc<Notify>,
        path: PathBuf,
    }

    #[async_trait]
    impl MediaDownloader for GatedDownloader {
        async fn download(&self, _url: &str) -> anyhow::Result<PathBuf> {
            self.gate.notified().await;
            Ok(self.path.clone())
        }
    }

    struct Harness {
        player: Arc<GuildPlayer<FakeBackend>>,
        backend: Arc<FakeBackend>,
        storage: Arc<AsyncMutex<JsonStorage>>,
        _dir: TempDir,
    }

    struct Setup {
        backend: FakeBackend,
        downloader: Arc<dyn MediaDownloader>,
        probe: MockDurationProbe,
        /// `None` usa el JsonStorage del harness
        store: Option<Arc<dyn TrackStore>>,
        duration_tick: Duration,
    }

    impl Setup {
        fn new(runs: Vec<Run>) -> Self {
            Self {
                backend: FakeBackend::new(runs),
                downloader: Arc::new(MockMediaDownloader::new()),
                probe: MockDurationProbe::new(),
                store: None,
                duration_tick: Duration::from_secs(3600),
            }
        }

        async fn build(self) -> Harness {
            let dir = tempfile::tempdir().unwrap();
            let storage = Arc::new(AsyncMutex::new(
                JsonStorage::new(dir.path().to_path_buf()).await.unwrap(),
            ));
            let backend = Arc::new(self.backend);
            let store: Arc<dyn TrackStore> = match self.store {
                Some(store) => store,
                None => storage.clone(),
            };

            let ctx = Arc::new(PlayerContext {
                backend: backend.clone(),
                store,
                downloader: self.downloader,
                duration_probe: Arc::new(self.probe),
                settings: PlayerSettings {
                    duration_tick: self.duration_tick,
                    ..PlayerSettings::default()
                },
            });

            let player = Arc::new(GuildPlayer::new(GuildId::new(1), ctx));
            player.set_channel(CHANNEL);

            Harness {
                player,
                backend,
                storage,
                _dir: dir,
            }
        }
    }

    async fn harness(
        runs: Vec<Run>,
        downloader: MockMediaDownloader,
        probe: MockDurationProbe,
    ) -> Harness {
        Setup {
            downloader: Arc::new(downloader),
            probe,
            ..Setup::new(runs)
        }
        .build()
        .await
    }

    async fn simple_harness(runs: Vec<Run>) -> Harness {
        Setup::new(runs).build().await
    }

    fn locators(backend: &FakeBackend) -> Vec<String> {
        backend.encodes().into_iter().map(|(locator, _)| locator).collect()
    }

    fn platform(id: &str, secs: u64) -> Song {
        Song::new(
            format!("Song {id}"),
            format!("https://www.youtube.com/watch?v={id}"),
            format!("https://cdn.example/{id}"),
            id,
            SourceKind::Platform,
        )
        .with_duration(Duration::from_secs(secs))
    }

    fn spawn_play(
        player: &Arc<GuildPlayer<FakeBackend>>,
    ) -> tokio::task::JoinHandle<Result<(), PlaybackError>> {
        let player = player.clone();
        tokio::spawn(async move { player.play().await })
    }

    #[test]
    fn test_classify_completion() {
        let secs = Duration::from_secs;
        let d = Some(secs(200));

        assert_eq!(classify_completion(secs(0), secs(80), d), Completion::Resume(secs(80)));
        assert_eq!(classify_completion(secs(80), secs(40), d), Completion::Resume(secs(120)));
        assert_eq!(classify_completion(secs(0), secs(0), d), Completion::StartFailed);
        // Un reinicio que muere sin sonar no vuelve a reanudarse en el mismo punto
        assert_eq!(classify_completion(secs(80), secs(0), d), Completion::StartFailed);
        assert_eq!(classify_completion(secs(0), secs(200), d), Completion::Advance);
        assert_eq!(classify_completion(secs(150), secs(60), d), Completion::Advance);
        assert_eq!(classify_completion(secs(0), secs(30), None), Completion::Advance);
    }

    #[tokio::test]
    async fn test_empty_queue_is_an_error() {
        let h = simple_harness(vec![]).await;
        let err = h.player.play().await.unwrap_err();
        assert!(matches!(err, PlaybackError::QueueEmpty));
    }

    #[tokio::test]
    async fn test_interruption_resumes_same_song() {
        let h = simple_harness(vec![ends_at(80), ends_at(120)]).await;
        h.player.enqueue(vec![platform("a", 200)]);

        h.player.play().await.unwrap();

        assert_eq!(
            h.backend.encodes(),
            vec![
                ("https://cdn.example/a".to_string(), 0),
                ("https://cdn.example/a".to_string(), 80),
            ]
        );
        // El contador solo sube al empezar desde cero
        let history = h.storage.lock().await.track_history(GuildId::new(1));
        assert_eq!(history[0].total_count, 1);
        assert!(h.player.current_song().is_none());
        assert!(h.backend.connection.disconnected.load(Ordering::SeqCst));
    }

    #[tokio::test(start_paused = true)]
    async fn test_zero_position_fails_without_advancing() {
        let h = Setup {
            backend: FakeBackend::new(vec![ends_at(0)]).with_slow_disconnect(Duration::from_millis(300)),
            ..Setup::new(vec![])
        }
        .build()
        .await;
        h.player.enqueue(vec![platform("a", 200), platform("b", 200)]);
        let mut status = h.player.listen_status();

        let task = spawn_play(&h.player);
        assert_eq!(status.recv().await, Some(StatusSignal::Playing));
        assert_eq!(status.recv().await, Some(StatusSignal::Error));

        let err = task.await.unwrap().unwrap_err();
        assert!(matches!(err, PlaybackError::StartFailed(ref title) if title == "Song a"));
        assert_eq!(h.backend.encodes().len(), 1);
        assert_eq!(h.player.queue().len(), 1);
        assert!(h.player.current_song().is_none());
        assert!(!h.player.is_playing());
    }

    #[tokio::test]
    async fn test_finished_songs_advance_through_queue() {
        let h = simple_harness(vec![ends_at(10), ends_at(12)]).await;
        h.player.enqueue(vec![platform("a", 10), platform("b", 12)]);

        h.player.play().await.unwrap();

        assert_eq!(locators(&h.backend), vec!["https://cdn.example/a", "https://cdn.example/b"]);
        assert!(h.player.queue().is_empty());
    }

    #[tokio::test]
    async fn test_live_stream_end_advances() {
        let h = simple_harness(vec![ends_at(30), ends_at(10)]).await;
        let radio = Song::new(
            "radio.example.com",
            "http://radio.example.com/live",
            "http://radio.example.com/live",
            "stream:radio.example.com",
            SourceKind::InternetStream,
        );
        h.player.enqueue(vec![radio, platform("b", 10)]);

        h.player.play().await.unwrap();

        assert_eq!(
            h.backend.encodes(),
            vec![
                ("http://radio.example.com/live".to_string(), 0),
                ("https://cdn.example/b".to_string(), 0),
            ]
        );
    }

    #[tokio::test]
    async fn test_local_file_uses_probed_duration() {
        let mut probe = MockDurationProbe::new();
        probe
            .expect_probe()
            .withf(|path: &str| path == "/music/intro.mp3")
            .times(2)
            .returning(|_| Ok(Duration::from_secs(100)));

        let h = harness(vec![ends_at(40), ends_at(60)], MockMediaDownloader::new(), probe).await;
        h.player.enqueue(vec![Song::new(
            "intro",
            "/music/intro.mp3",
            "/music/intro.mp3",
            "/music/intro.mp3",
            SourceKind::LocalFile,
        )]);

        h.player.play().await.unwrap();

        let starts: Vec<u64> = h.backend.encodes().into_iter().map(|(_, s)| s).collect();
        assert_eq!(starts, vec![0, 40]);
    }

    #[tokio::test(start_paused = true)]
    async fn test_stream_error_is_fatal() {
        let failing = Run {
            played: Duration::from_secs(5),
            end: Some(StreamEnd::Failed("decoder exploded".to_string())),
        };
        let h = Setup {
            backend: FakeBackend::new(vec![failing]).with_slow_disconnect(Duration::from_millis(300)),
            ..Setup::new(vec![])
        }
        .build()
        .await;
        h.player.enqueue(vec![platform("a", 200), platform("b", 200)]);
        let mut status = h.player.listen_status();

        let task = spawn_play(&h.player);
        assert_eq!(status.recv().await, Some(StatusSignal::Playing));
        assert_eq!(status.recv().await, Some(StatusSignal::Error));

        let err = task.await.unwrap().unwrap_err();
        assert!(matches!(err, PlaybackError::Stream { ref message, .. } if message == "decoder exploded"));
        assert_eq!(h.player.queue().len(), 1);
    }

    #[tokio::test]
    async fn test_skip_moves_to_next_song() {
        let h = simple_harness(vec![open_at(15), ends_at(30)]).await;
        h.player.enqueue(vec![platform("a", 200), platform("b", 30)]);
        let mut status = h.player.listen_status();

        let task = spawn_play(&h.player);
        assert_eq!(status.recv().await, Some(StatusSignal::Playing));
        h.player.send_action(ActionSignal::Skip).unwrap();

        task.await.unwrap().unwrap();
        assert_eq!(locators(&h.backend), vec!["https://cdn.example/a", "https://cdn.example/b"]);
    }

    #[tokio::test]
    async fn test_skip_on_last_song_behaves_as_stop() {
        let h = simple_harness(vec![open_at(15)]).await;
        h.player.enqueue(vec![platform("a", 200)]);
        let mut status = h.player.listen_status();

        let task = spawn_play(&h.player);
        assert_eq!(status.recv().await, Some(StatusSignal::Playing));
        h.player.send_action(ActionSignal::Skip).unwrap();

        assert_eq!(status.recv().await, Some(StatusSignal::Resting));
        task.await.unwrap().unwrap();
        assert!(h.player.current_song().is_none());
        assert!(h.backend.connection.disconnected.load(Ordering::SeqCst));
    }

    #[tokio::test]
    async fn test_stop_clears_everything() {
        let h = simple_harness(vec![open_at(15)]).await;
        h.player
            .enqueue(vec![platform("a", 200), platform("b", 200), platform("c", 200)]);
        let mut status = h.player.listen_status();

        let task = spawn_play(&h.player);
        assert_eq!(status.recv().await, Some(StatusSignal::Playing));
        assert!(h.player.is_playing());
        h.player.send_action(ActionSignal::Stop).unwrap();

        task.await.unwrap().unwrap();
        assert!(h.player.queue().is_empty());
        assert!(h.player.current_song().is_none());
        assert!(!h.player.is_playing());
        assert!(h.backend.connection.disconnected.load(Ordering::SeqCst));
        assert_eq!(h.backend.encodes().len(), 1);
    }

    #[tokio::test]
    async fn test_pause_resume_toggles_stream_and_transmission() {
        let h = simple_harness(vec![open_at(15)]).await;
        h.player.enqueue(vec![platform("a", 200)]);
        let mut status = h.player.listen_status();

        let task = spawn_play(&h.player);
        assert_eq!(status.recv().await, Some(StatusSignal::Playing));

        h.player.send_action(ActionSignal::PauseResume).unwrap();
        assert_eq!(status.recv().await, Some(StatusSignal::Paused));
        assert!(h.backend.stream_paused.load(Ordering::SeqCst));
        assert!(!h.backend.connection.transmitting.load(Ordering::SeqCst));

        h.player.send_action(ActionSignal::PauseResume).unwrap();
        assert_eq!(status.recv().await, Some(StatusSignal::Playing));
        assert!(!h.backend.stream_paused.load(Ordering::SeqCst));
        assert!(h.backend.connection.transmitting.load(Ordering::SeqCst));

        h.player.send_action(ActionSignal::Stop).unwrap();
        task.await.unwrap().unwrap();
        assert_eq!(h.backend.encodes().len(), 1);
    }

    #[tokio::test]
    async fn test_swap_rejoins_at_same_offset() {
        let h = simple_harness(vec![open_at(50), ends_at(200)]).await;
        h.player.enqueue(vec![platform("a", 200)]);
        let mut status = h.player.listen_status();

        let task = spawn_play(&h.player);
        assert_eq!(status.recv().await, Some(StatusSignal::Playing));

        h.player.set_channel(ChannelId::new(20));
        h.player.send_action(ActionSignal::Swap).unwrap();
        // Mismo offset que el intento anterior: vuelve a empezar desde cero
        assert_eq!(status.recv().await, Some(StatusSignal::Playing));

        task.await.unwrap().unwrap();
        assert_eq!(
            *h.backend.joins.lock(),
            vec![CHANNEL, ChannelId::new(20)]
        );
        let starts: Vec<u64> = h.backend.encodes().into_iter().map(|(_, s)| s).collect();
        assert_eq!(starts, vec![0, 0]);
    }

    #[tokio::test]
    async fn test_cache_switchover_restarts_once_from_local_file() {
        let mut downloader = MockMediaDownloader::new();
        downloader
            .expect_download()
            .withf(|url: &str| url == "https://www.youtube.com/watch?v=a")
            .times(1)
            .returning(|_| Ok(PathBuf::from("/cache/a.webm")));

        let h = harness(
            vec![open_at(30), ends_at(170)],
            downloader,
            MockDurationProbe::new(),
        )
        .await;
        h.storage
            .lock()
            .await
            .set_cache_enabled(GuildId::new(1), true)
            .await
            .unwrap();
        h.player.enqueue(vec![platform("a", 200)]);

        h.player.play().await.unwrap();

        assert_eq!(
            h.backend.encodes(),
            vec![
                ("https://cdn.example/a".to_string(), 0),
                ("/cache/a.webm".to_string(), 30),
            ]
        );
    }

    #[tokio::test]
    async fn test_second_play_is_rejected_while_running() {
        let h = simple_harness(vec![open_at(15)]).await;
        h.player.enqueue(vec![platform("a", 200)]);
        let mut status = h.player.listen_status();

        let task = spawn_play(&h.player);
        assert_eq!(status.recv().await, Some(StatusSignal::Playing));

        let err = h.player.play().await.unwrap_err();
        assert!(matches!(err, PlaybackError::AlreadyPlaying(_)));

        // El loop activo se hará cargo: no hay que lanzar otro
        assert!(!h.player.enqueue(vec![platform("b", 200)]));
        assert_eq!(status.recv().await, Some(StatusSignal::Added));

        h.player.send_action(ActionSignal::Stop).unwrap();
        task.await.unwrap().unwrap();
    }

    #[tokio::test]
    async fn test_missing_channel() {
        let h = simple_harness(vec![]).await;
        let player = GuildPlayer::new(GuildId::new(2), h.player.ctx.clone());
        player.enqueue(vec![platform("a", 200)]);

        let err = player.play().await.unwrap_err();
        assert!(matches!(err, PlaybackError::NoChannel(_)));
    }

    #[tokio::test(start_paused = true)]
    async fn test_song_added_while_leaving_voice_is_played() {
        let h = Setup {
            backend: FakeBackend::new(vec![ends_at(200), ends_at(30)])
                .with_slow_disconnect(Duration::from_millis(300)),
            store: Some(Arc::new(RecordingStore::default())),
            ..Setup::new(vec![])
        }
        .build()
        .await;
        assert!(h.player.enqueue(vec![platform("a", 200)]));
        let first = spawn_play(&h.player);

        // La primera sesión ya terminó la cola y sigue saliendo del canal
        tokio::time::sleep(Duration::from_millis(100)).await;
        assert!(!h.backend.connection.disconnected.load(Ordering::SeqCst));
        assert!(!h.player.is_playing());
        assert_eq!(
            h.player.send_action(ActionSignal::Skip),
            Err(SignalError::NotRunning)
        );

        assert!(h.player.enqueue(vec![platform("b", 30)]));
        let second = spawn_play(&h.player);

        first.await.unwrap().unwrap();
        second.await.unwrap().unwrap();
        assert_eq!(locators(&h.backend), vec!["https://cdn.example/a", "https://cdn.example/b"]);
        assert!(h.player.queue().is_empty());
        assert!(!h.player.is_playing());
    }

    #[tokio::test(start_paused = true)]
    async fn test_duration_ticker_skips_paused_time() {
        let store = Arc::new(RecordingStore::default());
        let h = Setup {
            store: Some(store.clone()),
            duration_tick: Duration::from_secs(2),
            ..Setup::new(vec![open_at(13)])
        }
        .build()
        .await;
        h.player.enqueue(vec![platform("a", 200)]);
        let mut status = h.player.listen_status();

        let task = spawn_play(&h.player);
        assert_eq!(status.recv().await, Some(StatusSignal::Playing));

        // t=5: ticks en 2 y 4
        tokio::time::sleep(Duration::from_secs(5)).await;
        assert_eq!(store.durations.lock().len(), 2);

        // t=11: los ticks en pausa no suman
        h.player.send_action(ActionSignal::PauseResume).unwrap();
        assert_eq!(status.recv().await, Some(StatusSignal::Paused));
        tokio::time::sleep(Duration::from_secs(6)).await;
        assert_eq!(store.durations.lock().len(), 2);

        // t=13: tick en 12
        h.player.send_action(ActionSignal::PauseResume).unwrap();
        assert_eq!(status.recv().await, Some(StatusSignal::Playing));
        tokio::time::sleep(Duration::from_secs(2)).await;
        assert_eq!(store.durations.lock().len(), 3);

        h.player.send_action(ActionSignal::Stop).unwrap();
        task.await.unwrap().unwrap();
        tokio::time::sleep(Duration::from_secs(10)).await;

        assert_eq!(*store.durations.lock(), vec![Duration::from_secs(2); 3]);
    }

    #[tokio::test(start_paused = true)]
    async fn test_join_failure_keeps_player_usable() {
        let h = Setup {
            backend: FakeBackend::new(vec![ends_at(30)]).with_join_failures(5),
            ..Setup::new(vec![])
        }
        .build()
        .await;
        h.player.enqueue(vec![platform("a", 200), platform("b", 30)]);
        let mut status = h.player.listen_status();

        let err = h.player.play().await.unwrap_err();
        assert!(matches!(err, PlaybackError::Voice(_)));
        assert_eq!(status.recv().await, Some(StatusSignal::Error));
        assert_eq!(h.backend.joins.lock().len(), 5);
        assert!(!h.player.is_playing());
        assert!(h.player.current_song().is_none());

        h.player.play().await.unwrap();
        assert_eq!(locators(&h.backend), vec!["https://cdn.example/a", "https://cdn.example/b"]);
    }

    #[tokio::test]
    async fn test_cache_switch_while_paused_stays_paused() {
        let gate = Arc::new(Notify::new());
        let h = Setup {
            downloader: Arc::new(GatedDownloader {
                gate: gate.clone(),
                path: PathBuf::from("/cache/a.webm"),
            }),
            ..Setup::new(vec![open_at(30), open_at(5)])
        }
        .build()
        .await;
        h.storage
            .lock()
            .await
            .set_cache_enabled(GuildId::new(1), true)
            .await
            .unwrap();
        h.player.enqueue(vec![platform("a", 200)]);
        let mut status = h.player.listen_status();

        let task = spawn_play(&h.player);
        assert_eq!(status.recv().await, Some(StatusSignal::Playing));
        h.player.send_action(ActionSignal::PauseResume).unwrap();
        assert_eq!(status.recv().await, Some(StatusSignal::Paused));

        gate.notify_one();
        assert_eq!(status.recv().await, Some(StatusSignal::Paused));
        assert!(h.backend.stream_paused.load(Ordering::SeqCst));
        assert!(!h.backend.connection.transmitting.load(Ordering::SeqCst));
        assert_eq!(
            h.backend.encodes(),
            vec![
                ("https://cdn.example/a".to_string(), 0),
                ("/cache/a.webm".to_string(), 30),
            ]
        );

        h.player.send_action(ActionSignal::Stop).unwrap();
        task.await.unwrap().unwrap();
    }
}
