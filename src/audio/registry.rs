use dashmap::DashMap;
use futures::future::join_all;
use serenity::model::id::GuildId;
use std::{sync::Arc, time::Duration};
use tracing::{debug, info};

use super::{
    player::{GuildPlayer, PlayerContext},
    signals::ActionSignal,
    transcoder::AudioBackend,
};

/// Un player por guild, creado a demanda
pub struct PlayerRegistry<B: AudioBackend> {
    ctx: Arc<PlayerContext<B>>,
    players: DashMap<GuildId, Arc<GuildPlayer<B>>>,
}

impl<B: AudioBackend> PlayerRegistry<B> {
    pub fn new(ctx: PlayerContext<B>) -> Self {
        Self {
            ctx: Arc::new(ctx),
            players: DashMap::new(),
        }
    }

    pub fn get(&self, guild: GuildId) -> Option<Arc<GuildPlayer<B>>> {
        self.players.get(&guild).map(|player| player.clone())
    }

    pub fn get_or_create(&self, guild: GuildId) -> Arc<GuildPlayer<B>> {
        self.players
            .entry(guild)
            .or_insert_with(|| {
                info!("🆕 Nuevo player para guild {}", guild);
                Arc::new(GuildPlayer::new(guild, self.ctx.clone()))
            })
            .clone()
    }

    /// Quita el player de la guild. Si está sonando, se le envía Stop.
    pub fn remove(&self, guild: GuildId) -> Option<Arc<GuildPlayer<B>>> {
        let (_, player) = self.players.remove(&guild)?;
        if player.is_playing() {
            if let Err(e) = player.send_action(ActionSignal::Stop) {
                debug!("No se pudo detener el player de guild {}: {}", guild, e);
            }
        }
        Some(player)
    }

    pub fn len(&self) -> usize {
        self.players.len()
    }

    /// Detiene todos los players activos y espera a que terminen
    pub async fn shutdown_all(&self, timeout: Duration) {
        // Copia para no retener el lock del mapa durante los await
        let players: Vec<_> = self.players.iter().map(|entry| entry.value().clone()).collect();
        let active = players.iter().filter(|player| player.is_playing()).count();

        info!("⏹️ Deteniendo {} de {} players", active, self.len());
        join_all(players.iter().map(|player| player.shutdown(timeout))).await;
    }
}
