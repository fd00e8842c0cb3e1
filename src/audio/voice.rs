use anyhow::Result;
use async_trait::async_trait;
use serenity::model::id::{ChannelId, GuildId};
use std::time::Duration;
use tracing::{debug, info, warn};

use crate::error::VoiceError;

/// Conexión de voz abierta
#[async_trait]
pub trait VoiceConnection: Send + Sync + 'static {
    /// Indicador de transmisión ("speaking")
    async fn set_transmitting(&self, transmitting: bool) -> Result<()>;
    async fn disconnect(&self) -> Result<()>;
}

/// Cliente de voz capaz de unirse a canales
#[async_trait]
pub trait VoiceGateway: Send + Sync + 'static {
    type Connection: VoiceConnection;

    async fn join_voice(&self, guild: GuildId, channel: ChannelId) -> Result<Self::Connection>;
}

/// Join/leave with bounded retries and exponential backoff
#[derive(Debug, Clone, Copy)]
pub struct VoiceManager {
    attempts: u32,
    initial_backoff: Duration,
}

impl Default for VoiceManager {
    fn default() -> Self {
        Self::new(5, Duration::from_millis(100))
    }
}

impl VoiceManager {
    pub fn new(attempts: u32, initial_backoff: Duration) -> Self {
        Self {
            attempts: attempts.max(1),
            initial_backoff,
        }
    }

    /// Se une al canal. Tras cada fallo espera y duplica la espera.
    pub async fn join<G: VoiceGateway>(
        &self,
        gateway: &G,
        guild: GuildId,
        channel: ChannelId,
    ) -> Result<G::Connection, VoiceError> {
        let mut backoff = self.initial_backoff;
        let mut last_error = None;

        for attempt in 1..=self.attempts {
            match gateway.join_voice(guild, channel).await {
                Ok(connection) => {
                    if let Err(e) = connection.set_transmitting(true).await {
                        warn!("⚠️ No se pudo activar transmisión: {}", e);
                    }
                    info!("🔊 Conectado al canal {} (intento {})", channel, attempt);
                    return Ok(connection);
                }
                Err(e) => {
                    warn!(
                        "❌ Error al unirse al canal {} (intento {}/{}): {}",
                        channel, attempt, self.attempts, e
                    );
                    last_error = Some(e);
                    tokio::time::sleep(backoff).await;
                    backoff *= 2;
                }
            }
        }

        Err(VoiceError::Join {
            guild,
            channel,
            attempts: self.attempts,
            source: last_error.unwrap_or_else(|| anyhow::anyhow!("no join attempt was made")),
        })
    }

    /// Deja de transmitir y desconecta; ambos pasos se intentan siempre.
    /// Devuelve el primer error.
    pub async fn leave<C: VoiceConnection>(&self, connection: &C) -> Result<(), VoiceError> {
        let transmit = connection
            .set_transmitting(false)
            .await
            .map_err(VoiceError::Transmit);
        let disconnect = connection
            .disconnect()
            .await
            .map_err(VoiceError::Disconnect);

        debug!("👋 Conexión de voz cerrada");
        transmit.and(disconnect)
    }
}
