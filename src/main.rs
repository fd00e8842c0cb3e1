use anyhow::Result;
use serenity::{model::gateway::GatewayIntents, Client};
use songbird::{SerenityInit, Songbird};
use std::{sync::Arc, time::Duration};
use tracing::{error, info, warn};

mod audio;
mod bot;
mod config;
mod error;
mod sources;
mod storage;

use crate::audio::{
    cache,
    player::PlayerContext,
    registry::PlayerRegistry,
    songbird_backend::SongbirdBackend,
    transcoder::FfmpegProbe,
};
use crate::bot::MusicBot;
use crate::config::Config;
use crate::sources::{
    Extractor, ExtractorChain, NativeYouTubeClient, ReqwestProbe, SongResolver, YouTubeSearch,
    YtDlpClient,
};
use crate::storage::JsonStorage;

const SHUTDOWN_TIMEOUT: Duration = Duration::from_secs(5);

#[tokio::main]
async fn main() -> Result<()> {
    // Inicializar logging
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive("guild_player=debug".parse()?)
                .add_directive("serenity=info".parse()?)
                .add_directive("songbird=info".parse()?),
        )
        .init();

    info!("🎵 Iniciando guild-player v{}", env!("CARGO_PKG_VERSION"));

    // Cargar configuración
    let config = Arc::new(Config::load()?);
    info!("{}", config.summary());

    if std::env::args().any(|arg| arg == "--health-check") {
        return health_check(&config).await;
    }

    // Inicializar almacenamiento JSON
    let storage = Arc::new(tokio::sync::Mutex::new(
        JsonStorage::new(config.data_dir.clone()).await?,
    ));

    // Extractores: nativo primero, yt-dlp como respaldo
    let ytdlp = Arc::new(YtDlpClient::new(
        &config.ytdlp_path,
        config.extractor_timeout(),
        config.download_timeout(),
        &config.cache_dir,
    ));
    let native: Arc<dyn Extractor> = Arc::new(NativeYouTubeClient::new(config.extractor_timeout())?);
    let fallback: Arc<dyn Extractor> = ytdlp.clone();
    let probe = Arc::new(ReqwestProbe::new(config.extractor_timeout())?);
    let chain = ExtractorChain::new(vec![native, fallback], probe.clone());
    let resolver = SongResolver::new(
        chain,
        probe,
        Arc::new(YouTubeSearch::new(config.extractor_timeout())?),
    );

    // Motor de reproducción sobre songbird
    let songbird = Songbird::serenity();
    let registry = Arc::new(PlayerRegistry::new(PlayerContext {
        backend: Arc::new(SongbirdBackend::new(songbird.clone(), &config.ffmpeg_path)),
        store: storage.clone(),
        downloader: ytdlp,
        duration_probe: Arc::new(FfmpegProbe::new(&config.ffmpeg_path, config.extractor_timeout())),
        settings: config.player_settings(),
    }));

    // Configurar intents mínimos necesarios
    let intents = GatewayIntents::GUILDS
        | GatewayIntents::GUILD_VOICE_STATES
        | GatewayIntents::GUILD_MESSAGES
        | GatewayIntents::MESSAGE_CONTENT;

    let handler = MusicBot::new(config.clone(), storage, resolver, registry.clone());

    let mut client = Client::builder(&config.discord_token, intents)
        .event_handler(handler)
        .register_songbird_with(songbird)
        .await?;

    // Manejar shutdown graceful
    let shard_manager = client.shard_manager.clone();
    let cache_dir = config.cache_dir.clone();
    tokio::spawn(async move {
        if let Err(e) = tokio::signal::ctrl_c().await {
            error!("Error al registrar Ctrl+C: {}", e);
            return;
        }
        info!("⚠️ Señal de shutdown recibida, cerrando...");

        registry.shutdown_all(SHUTDOWN_TIMEOUT).await;
        if let Err(e) = cache::purge(&cache_dir).await {
            warn!("⚠️ No se pudo vaciar la caché: {:#}", e);
        }
        shard_manager.shutdown_all().await;
    });

    info!("🚀 Bot iniciado exitosamente");
    if let Err(why) = client.start().await {
        error!("Error al ejecutar cliente: {:?}", why);
    }

    Ok(())
}

async fn health_check(config: &Config) -> Result<()> {
    // Verificar dependencias críticas
    let yt_dlp = async_process::Command::new(&config.ytdlp_path)
        .arg("--version")
        .output()
        .await?;

    let ffmpeg = async_process::Command::new(&config.ffmpeg_path)
        .arg("-version")
        .output()
        .await?;

    if yt_dlp.status.success() && ffmpeg.status.success() {
        println!("OK");
        Ok(())
    } else {
        anyhow::bail!("Dependencias faltantes");
    }
}
