use anyhow::Result;
use serenity::{
    http::Http,
    model::{
        channel::Message,
        id::{ChannelId, GuildId},
    },
    prelude::Context,
};
use std::sync::Arc;
use tracing::{debug, error, info, warn};

use super::{
    commands::{self, Command},
    MusicBot, Player,
};
use crate::{
    audio::signals::{ActionSignal, StatusSignal},
    error::{PlaybackError, SignalError},
};

const QUEUE_PAGE: usize = 10;

/// Ejecuta un comando ya interpretado
pub async fn handle_command(ctx: &Context, msg: &Message, bot: &MusicBot, command: Command) -> Result<()> {
    let guild_id = msg
        .guild_id
        .ok_or_else(|| anyhow::anyhow!("Comando usado fuera de un servidor"))?;

    info!("📝 {:?} pedido por {} en guild {}", command, msg.author.name, guild_id);

    let reply = match command {
        Command::Play(input) => handle_play(ctx, msg, bot, guild_id, &input).await?,
        Command::Skip => action_reply(bot, guild_id, ActionSignal::Skip, "⏭️ Saltando"),
        Command::Stop => action_reply(bot, guild_id, ActionSignal::Stop, "⏹️ Deteniendo"),
        Command::Pause => action_reply(bot, guild_id, ActionSignal::PauseResume, "⏯️ Ok"),
        Command::Summon => handle_summon(ctx, msg, bot, guild_id),
        Command::Now => match bot.registry.get(guild_id).and_then(|p| p.current_song()) {
            Some(song) => commands::now_text(&song),
            None => "🔇 No hay nada sonando".to_string(),
        },
        Command::Queue => {
            let songs = bot.registry.get(guild_id).map(|p| p.queue()).unwrap_or_default();
            commands::queue_text(&songs, QUEUE_PAGE)
        }
        Command::Cache(enabled) => {
            bot.storage
                .lock()
                .await
                .set_cache_enabled(guild_id, enabled)
                .await?;
            if enabled {
                "💾 Caché activada".to_string()
            } else {
                "💾 Caché desactivada".to_string()
            }
        }
        Command::Help => commands::help_text(&bot.config.command_prefix),
    };

    msg.channel_id.say(&ctx.http, reply).await?;
    Ok(())
}

async fn handle_play(
    ctx: &Context,
    msg: &Message,
    bot: &MusicBot,
    guild_id: GuildId,
    input: &str,
) -> Result<String> {
    let player = bot.registry.get_or_create(guild_id);

    if !player.is_playing() {
        let Some(channel) = author_voice_channel(ctx, msg) else {
            return Ok("❌ Debes estar en un canal de voz".to_string());
        };
        player.set_channel(channel);
    }

    let typing = msg.channel_id.start_typing(&ctx.http);
    let resolved = bot.resolver.resolve(input).await;
    typing.stop();

    let songs = match resolved {
        Ok(songs) => songs,
        Err(e) => {
            warn!("❌ No se pudo resolver {:?}: {}", input, e);
            return Ok(format!("❌ {}", e));
        }
    };

    let reply = match songs.as_slice() {
        [song] => format!("➕ Agregada: {}", commands::song_line(song)),
        songs => format!("➕ Agregadas {} canciones", songs.len()),
    };

    if player.enqueue(songs) {
        start_session(ctx.http.clone(), msg.channel_id, player);
    }

    Ok(reply)
}

fn handle_summon(ctx: &Context, msg: &Message, bot: &MusicBot, guild_id: GuildId) -> String {
    let Some(channel) = author_voice_channel(ctx, msg) else {
        return "❌ Debes estar en un canal de voz".to_string();
    };

    let player = bot.registry.get_or_create(guild_id);
    player.set_channel(channel);

    if !player.is_playing() {
        return format!("🔊 Listo para sonar en <#{}>", channel);
    }

    match player.send_action(ActionSignal::Swap) {
        Ok(()) => format!("🔀 Moviéndome a <#{}>", channel),
        Err(e) => signal_reply(&e),
    }
}

fn action_reply(bot: &MusicBot, guild_id: GuildId, action: ActionSignal, ok: &str) -> String {
    let Some(player) = bot.registry.get(guild_id) else {
        return signal_reply(&SignalError::NotRunning);
    };

    match player.send_action(action) {
        Ok(()) => ok.to_string(),
        Err(e) => signal_reply(&e),
    }
}

fn signal_reply(error: &SignalError) -> String {
    match error {
        SignalError::NotRunning => "🔇 No hay nada sonando".to_string(),
        SignalError::Busy(pending) => format!("⏳ Todavía se está procesando {}", pending),
        SignalError::ListenerNotReady => "⏳ Intenta de nuevo".to_string(),
    }
}

/// Canal de voz del autor del mensaje, según la caché
fn author_voice_channel(ctx: &Context, msg: &Message) -> Option<ChannelId> {
    let guild = msg.guild(&ctx.cache)?;
    guild
        .voice_states
        .get(&msg.author.id)
        .and_then(|state| state.channel_id)
}

/// Lanza el loop de reproducción y el reenvío de estados al canal de texto
fn start_session(http: Arc<Http>, text_channel: ChannelId, player: Arc<Player>) {
    let mut status = player.listen_status();

    {
        let http = http.clone();
        let player = player.clone();
        tokio::spawn(async move {
            // Termina cuando otra sesión reemplaza al oyente
            while let Some(signal) = status.recv().await {
                let Some(text) = status_text(signal, &player) else {
                    continue;
                };
                if let Err(e) = text_channel.say(&http, text).await {
                    warn!("⚠️ No se pudo enviar estado {}: {}", signal, e);
                }
            }
            debug!("📪 Oyente de estados cerrado");
        });
    }

    tokio::spawn(async move {
        match player.play().await {
            Ok(()) | Err(PlaybackError::QueueEmpty) => {}
            Err(PlaybackError::AlreadyPlaying(guild)) => {
                debug!("El player de guild {} ya estaba corriendo", guild);
            }
            Err(e) => {
                error!("❌ Sesión terminada con error: {}", e);
                if let Err(send_error) = text_channel.say(&http, format!("❌ {}", e)).await {
                    warn!("⚠️ No se pudo reportar el fallo: {}", send_error);
                }
            }
        }
    });
}

fn status_text(signal: StatusSignal, player: &Player) -> Option<String> {
    let song = player.current_song();
    let text = match signal {
        StatusSignal::Playing => format!("🎵 Reproduciendo: {}", commands::song_line(song.as_ref()?)),
        StatusSignal::Resuming => format!("🔄 Reanudando: **{}**", song.as_ref()?.title()),
        StatusSignal::Paused => "⏸️ Pausado".to_string(),
        StatusSignal::Resting => "💤 Cola terminada".to_string(),
        // Lo reporta la tarea del loop con el detalle del error
        StatusSignal::Added | StatusSignal::Error => return None,
    };
    Some(text)
}
