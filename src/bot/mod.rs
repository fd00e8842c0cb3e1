//! # Bot Module
//!
//! Thin serenity glue around the playback engine: prefixed text commands in,
//! status messages out. All playback logic lives in [`crate::audio`].

use serenity::{
    all::{Context, EventHandler, Guild, Message, Ready, UnavailableGuild, VoiceState},
    async_trait,
};
use std::sync::Arc;
use tracing::{debug, error, info};

pub mod commands;
pub mod handlers;

use crate::{
    audio::{
        player::GuildPlayer, registry::PlayerRegistry, signals::ActionSignal,
        songbird_backend::SongbirdBackend,
    },
    config::Config,
    sources::SongResolver,
    storage::JsonStorage,
};

pub type Player = GuildPlayer<SongbirdBackend>;

/// Main Discord event handler.
///
/// - `config`: prefix and runtime settings
/// - `storage`: per-guild JSON records (cache flag, track history)
/// - `resolver`: turns command text into songs
/// - `registry`: one player per guild
pub struct MusicBot {
    config: Arc<Config>,
    storage: Arc<tokio::sync::Mutex<JsonStorage>>,
    resolver: SongResolver,
    registry: Arc<PlayerRegistry<SongbirdBackend>>,
}

impl MusicBot {
    pub fn new(
        config: Arc<Config>,
        storage: Arc<tokio::sync::Mutex<JsonStorage>>,
        resolver: SongResolver,
        registry: Arc<PlayerRegistry<SongbirdBackend>>,
    ) -> Self {
        Self {
            config,
            storage,
            resolver,
            registry,
        }
    }
}

#[async_trait]
impl EventHandler for MusicBot {
    async fn ready(&self, _ctx: Context, ready: Ready) {
        info!("🤖 {} está en línea!", ready.user.name);
        info!("📊 Conectado a {} servidores", ready.guilds.len());
    }

    async fn message(&self, ctx: Context, msg: Message) {
        if msg.author.bot {
            return;
        }

        let Some(command) = commands::parse(&msg.content, &self.config.command_prefix) else {
            return;
        };

        if let Err(e) = handlers::handle_command(&ctx, &msg, self, command).await {
            error!("Error manejando comando: {:?}", e);
        }
    }

    /// El bot salió del servidor: se descarta su player
    async fn guild_delete(&self, _ctx: Context, incomplete: UnavailableGuild, _full: Option<Guild>) {
        // `unavailable` es una caída de Discord, no una expulsión
        if incomplete.unavailable {
            return;
        }

        if self.registry.remove(incomplete.id).is_some() {
            info!("👋 Player descartado para guild {}", incomplete.id);
        }
    }

    /// Si alguien desconecta al bot a mano, la sesión se detiene
    async fn voice_state_update(&self, ctx: Context, old: Option<VoiceState>, new: VoiceState) {
        let current_user_id = ctx.cache.current_user().id;
        if new.user_id != current_user_id || old.is_none() || new.channel_id.is_some() {
            return;
        }

        let Some(guild_id) = new.guild_id else {
            return;
        };

        info!("🔌 Bot desconectado en guild {}", guild_id);
        if let Some(player) = self.registry.get(guild_id) {
            if let Err(e) = player.send_action(ActionSignal::Stop) {
                debug!("Nada que detener en guild {}: {}", guild_id, e);
            }
        }
    }
}
