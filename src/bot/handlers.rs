use anyhow::{Context as _, Result};
use serenity::{
    model::id::{ChannelId, GuildId, UserId},
    prelude::Context,
};
use std::{sync::Arc, time::{Duration, Instant}};
use tokio::time::timeout;
use tracing::{info, warn};

use super::{
    context::{CommandContext, Reply},
    playlist, JukeboxBot,
};
use crate::{
    audio::{voice::SongbirdTransport, PlaybackTarget, StartOutcome, TrackRecord},
    sources::{CollectionRef, SpotifyLink},
    storage::EventKind,
    ui::{
        buttons::{self, ButtonAction},
        embeds,
    },
};

const HISTORY_RECENT: usize = 10;
const HISTORY_TOP: usize = 5;

/// Ejecuta un comando por nombre; los errores se responden como embed
pub async fn dispatch(ctx: &Context, cmd: &dyn CommandContext, bot: &JukeboxBot, name: &str, args: &str) {
    let result = match name {
        "play" => handle_play(ctx, cmd, bot, args).await,
        "stop" => handle_stop(ctx, cmd, bot).await,
        "skip" => handle_skip(cmd, bot).await,
        "pause" => handle_pause(cmd, bot).await,
        "resume" => handle_resume(cmd, bot).await,
        "queue" => handle_queue(cmd, bot).await,
        "nowplaying" => handle_nowplaying(cmd, bot).await,
        "shuffle" => handle_shuffle(cmd, bot).await,
        "loop" => handle_loop(cmd, bot).await,
        "seek" => handle_seek(cmd, bot, args).await,
        "previous" => handle_previous(ctx, cmd, bot).await,
        "history" => handle_history(cmd, bot).await,
        "ping" => handle_ping(cmd).await,
        _ => cmd.reply(Reply::text("❌ Comando no reconocido")).await,
    };

    if let Err(e) = result {
        warn!("❌ Error en comando {}: {:?}", name, e);
        let embed = embeds::create_error_embed("Error", &e.to_string());
        if let Err(e) = cmd.reply(Reply::Embed(embed)).await {
            warn!("No se pudo responder el error: {:?}", e);
        }
    }
}

/// Maneja los botones del reproductor con los mismos handlers
pub async fn handle_button(ctx: &Context, cmd: &dyn CommandContext, bot: &JukeboxBot, action: ButtonAction) {
    let name = match action {
        ButtonAction::Previous => "previous",
        ButtonAction::PauseResume => {
            let paused = match cmd.guild_id() {
                Some(guild_id) => bot.playback.is_paused(guild_id).await,
                None => false,
            };
            if paused {
                "resume"
            } else {
                "pause"
            }
        }
        ButtonAction::Skip => "skip",
        ButtonAction::Stop => "stop",
        ButtonAction::Loop => "loop",
    };
    dispatch(ctx, cmd, bot, name, "").await;
}

fn nothing_to_do(description: &str) -> Reply {
    Reply::Embed(embeds::create_warning_embed("Sin cambios", description))
}

fn require_guild(cmd: &dyn CommandContext) -> Result<GuildId> {
    cmd.guild_id()
        .context("Este comando sólo funciona dentro de un servidor")
}

async fn handle_play(ctx: &Context, cmd: &dyn CommandContext, bot: &JukeboxBot, query: &str) -> Result<()> {
    let guild_id = require_guild(cmd)?;
    let query = query.trim();
    if query.is_empty() {
        anyhow::bail!("Indica una URL o un término de búsqueda");
    }

    cmd.defer().await?;
    let target = voice_target(ctx, cmd, guild_id).await?;

    if let Some(collection) = SpotifyLink::parse(query) {
        return play_collection(cmd, bot, guild_id, collection, target).await;
    }

    let lookup = bot.playback.acquirer().lookup();
    let resolved = timeout(bot.playback.acquirer().timeout(), lookup.resolve(query))
        .await
        .context("La búsqueda tardó demasiado")??
        .context("No se encontraron resultados")?;

    let track = TrackRecord::from_resolved(resolved, cmd.requesting_user());
    info!("🔍 {} pidió en guild {}: {}", cmd.requesting_user(), guild_id, track.title());

    match bot.playback.start_or_enqueue(guild_id, track.clone(), target)? {
        StartOutcome::Started => {
            cmd.reply(Reply::text(format!("🎵 Reproduciendo **{}**", track.title())))
                .await
        }
        StartOutcome::Enqueued { position } => {
            cmd.reply(Reply::Embed(embeds::create_track_added_embed(&track, position)))
                .await
        }
    }
}

/// Reproduce la primera entrada de la colección y carga el resto en segundo plano
async fn play_collection(
    cmd: &dyn CommandContext,
    bot: &JukeboxBot,
    guild_id: GuildId,
    collection: CollectionRef,
    target: PlaybackTarget,
) -> Result<()> {
    let catalog = bot
        .catalog
        .clone()
        .context("Spotify no está configurado en este bot")?;

    let entries = catalog.expand_collection(&collection).await?;
    if entries.is_empty() {
        anyhow::bail!("La colección está vacía o no está disponible");
    }

    let requested_by = cmd.requesting_user();
    let limit = bot.playback.acquirer().timeout();
    let lookup = Arc::clone(bot.playback.acquirer().lookup());

    // un `/stop` durante la carga termina esta sesión
    let session = bot.playback.session_token(guild_id);

    let (index, first) = playlist::resolve_first(lookup.as_ref(), &entries, requested_by, limit)
        .await
        .context("No se pudo encontrar ninguna de las primeras canciones")?;
    bot.playback
        .start_or_enqueue_in_session(guild_id, first.clone(), target.clone(), &session)?;

    let rest: Vec<_> = entries
        .into_iter()
        .skip(index + 1)
        .take(bot.config.max_playlist_tracks)
        .collect();
    let pending = rest.len();

    cmd.reply(Reply::text(format!(
        "🎵 **{}** en camino, cargando {} canciones más",
        first.title(),
        pending
    )))
    .await?;

    if pending == 0 {
        return Ok(());
    }

    let playback = bot.playback.clone();
    let channel = cmd.channel_id();
    tokio::spawn(async move {
        let summary = playlist::feed_in_batches(lookup.as_ref(), rest, requested_by, limit, |track| {
            playback.start_or_enqueue_in_session(guild_id, track, target.clone(), &session)
        })
        .await;
        if session.is_cancelled() {
            return;
        }
        // las entradas previas a la primera reproducible también fallaron
        let summary = playlist::BatchSummary {
            failed: summary.failed + index,
            ..summary
        };

        info!(
            "📋 Colección cargada en guild {}: {} agregadas, {} fallidas",
            guild_id, summary.added, summary.failed
        );
        playback.announcer().notice(channel, &summary.message()).await;
    });

    Ok(())
}

async fn handle_stop(ctx: &Context, cmd: &dyn CommandContext, bot: &JukeboxBot) -> Result<()> {
    let guild_id = require_guild(cmd)?;

    if let Some(current) = bot.playback.current_track(guild_id) {
        bot.playback
            .record_event(guild_id, cmd.requesting_user(), EventKind::Stop, current.title());
    }
    bot.playback.clear(guild_id).await;

    if let Some(manager) = songbird::get(ctx).await {
        if manager.get(guild_id).is_some() {
            manager.remove(guild_id).await?;
            info!("👋 Desconectado del canal de voz en guild {}", guild_id);
        }
    }

    cmd.reply(Reply::Embed(embeds::create_success_embed(
        "Reproducción detenida",
        "⏹️ Cola limpiada y canal de voz liberado",
    )))
    .await
}

async fn handle_skip(cmd: &dyn CommandContext, bot: &JukeboxBot) -> Result<()> {
    let guild_id = require_guild(cmd)?;
    let skipped = bot.playback.skip(guild_id).await?;

    bot.playback
        .record_event(guild_id, cmd.requesting_user(), EventKind::Skip, skipped.title());
    cmd.reply(Reply::text(format!("⏭️ Saltada: **{}**", skipped.title())))
        .await
}

async fn handle_pause(cmd: &dyn CommandContext, bot: &JukeboxBot) -> Result<()> {
    let guild_id = require_guild(cmd)?;
    if bot.playback.pause(guild_id).await {
        cmd.reply(Reply::text("⏸️ Reproducción pausada")).await
    } else {
        cmd.reply(nothing_to_do("No hay nada reproduciéndose")).await
    }
}

async fn handle_resume(cmd: &dyn CommandContext, bot: &JukeboxBot) -> Result<()> {
    let guild_id = require_guild(cmd)?;
    if bot.playback.resume(guild_id).await {
        cmd.reply(Reply::text("▶️ Reproducción reanudada")).await
    } else {
        cmd.reply(nothing_to_do("No hay nada pausado")).await
    }
}

async fn handle_queue(cmd: &dyn CommandContext, bot: &JukeboxBot) -> Result<()> {
    let guild_id = require_guild(cmd)?;
    let queue_info = bot.playback.queue_info(guild_id);
    let embed = embeds::create_queue_embed(&queue_info, bot.config.max_queue_display);
    cmd.reply(Reply::Embed(embed)).await
}

async fn handle_nowplaying(cmd: &dyn CommandContext, bot: &JukeboxBot) -> Result<()> {
    let guild_id = require_guild(cmd)?;
    let Some(track) = bot.playback.current_track(guild_id) else {
        return cmd.reply(nothing_to_do("No hay nada reproduciéndose")).await;
    };

    let loop_mode = bot.playback.loop_mode(guild_id);
    let upcoming = bot.playback.pending_queue(guild_id).len();
    let is_paused = bot.playback.is_paused(guild_id).await;

    cmd.reply(Reply::Controls(
        embeds::create_now_playing_embed(&track, upcoming, loop_mode),
        buttons::player_controls(is_paused, loop_mode),
    ))
    .await
}

async fn handle_shuffle(cmd: &dyn CommandContext, bot: &JukeboxBot) -> Result<()> {
    let guild_id = require_guild(cmd)?;
    let pending = bot.playback.shuffle(guild_id);
    if pending < 2 {
        return cmd
            .reply(Reply::text("❌ No hay suficientes canciones en la cola para mezclar"))
            .await;
    }
    cmd.reply(Reply::text(format!("🔀 Cola mezclada ({} canciones)", pending)))
        .await
}

async fn handle_loop(cmd: &dyn CommandContext, bot: &JukeboxBot) -> Result<()> {
    let guild_id = require_guild(cmd)?;
    let mode = bot.playback.cycle_loop_mode(guild_id);
    cmd.reply(Reply::text(format!("{} Modo de repetición: **{}**", mode.emoji(), mode)))
        .await
}

async fn handle_seek(cmd: &dyn CommandContext, bot: &JukeboxBot, position: &str) -> Result<()> {
    let guild_id = require_guild(cmd)?;
    let offset = parse_position(position)
        .context("Posición inválida. Usa `90`, `1:30` o `1m30s`")?;

    if let Some(duration) = bot.playback.current_track(guild_id).and_then(|t| t.duration()) {
        if offset >= duration {
            anyhow::bail!(
                "La posición {} supera la duración de la canción ({})",
                embeds::format_duration(offset),
                embeds::format_duration(duration)
            );
        }
    }

    cmd.defer().await?;
    let track = bot.playback.seek(guild_id, offset).await?;

    bot.playback
        .record_event(guild_id, cmd.requesting_user(), EventKind::Seek, track.title());
    cmd.reply(Reply::text(format!(
        "⏩ **{}** en {}",
        track.title(),
        embeds::format_duration(offset)
    )))
    .await
}

async fn handle_previous(ctx: &Context, cmd: &dyn CommandContext, bot: &JukeboxBot) -> Result<()> {
    let guild_id = require_guild(cmd)?;
    if bot.playback.history(guild_id).is_empty() {
        return cmd.reply(Reply::text("❌ No hay canciones anteriores")).await;
    }

    let target = voice_target(ctx, cmd, guild_id).await?;
    let previous = bot.playback.previous(guild_id, target).await?;

    bot.playback
        .record_event(guild_id, cmd.requesting_user(), EventKind::Previous, previous.title());
    cmd.reply(Reply::text(format!("⏮️ Volviendo a: **{}**", previous.title())))
        .await
}

async fn handle_history(cmd: &dyn CommandContext, bot: &JukeboxBot) -> Result<()> {
    let guild_id = require_guild(cmd)?;
    let session = bot.playback.history(guild_id);

    let recent = bot
        .play_log
        .recent(guild_id, HISTORY_RECENT)
        .await
        .unwrap_or_else(|e| {
            warn!("⚠️ No se pudo leer el historial de guild {}: {:?}", guild_id, e);
            Vec::new()
        });
    let top = bot
        .play_log
        .top_tracks(guild_id, HISTORY_TOP)
        .await
        .unwrap_or_else(|e| {
            warn!("⚠️ No se pudo leer el ranking de guild {}: {:?}", guild_id, e);
            Vec::new()
        });

    cmd.reply(Reply::Embed(embeds::create_history_embed(&session, &recent, &top)))
        .await
}

async fn handle_ping(cmd: &dyn CommandContext) -> Result<()> {
    let started = Instant::now();
    cmd.defer().await?;
    cmd.reply(Reply::text(format!(
        "🏓 Pong! {}ms",
        started.elapsed().as_millis()
    )))
    .await
}

/// Transporte de la guild; se une al canal de voz del usuario si hace falta
async fn voice_target(ctx: &Context, cmd: &dyn CommandContext, guild_id: GuildId) -> Result<PlaybackTarget> {
    let manager = songbird::get(ctx)
        .await
        .context("Songbird no inicializado")?;

    let connected = match manager.get(guild_id) {
        Some(call) => call.lock().await.current_channel().is_some(),
        None => false,
    };

    if !connected {
        let channel_id = get_user_voice_channel(ctx, guild_id, cmd.requesting_user())?;
        manager
            .join(guild_id, channel_id)
            .await
            .context("Error al conectar al canal de voz")?;
        info!("🔊 Conectado al canal de voz {} en guild {}", channel_id, guild_id);
    }

    let transport = Arc::new(SongbirdTransport::new(manager, guild_id));
    Ok(PlaybackTarget::new(transport, cmd.channel_id()))
}

fn get_user_voice_channel(ctx: &Context, guild_id: GuildId, user_id: UserId) -> Result<ChannelId> {
    let guild = guild_id
        .to_guild_cached(&ctx.cache)
        .context("Guild no encontrada en caché")?;

    guild
        .voice_states
        .get(&user_id)
        .and_then(|voice_state| voice_state.channel_id)
        .context("Debes estar en un canal de voz")
}

/// Posición de seek: `90`, `1:30`, `1:02:03` o humantime (`1m30s`)
pub fn parse_position(input: &str) -> Option<Duration> {
    let input = input.trim();
    if input.is_empty() {
        return None;
    }

    if input.chars().all(|c| c.is_ascii_digit()) {
        return input.parse().ok().map(Duration::from_secs);
    }

    if input.contains(':') {
        let parts: Vec<u64> = input
            .split(':')
            .map(|part| part.parse().ok())
            .collect::<Option<_>>()?;
        let seconds = match parts.as_slice() {
            [minutes, seconds] if *seconds < 60 => minutes * 60 + seconds,
            [hours, minutes, seconds] if *minutes < 60 && *seconds < 60 => {
                hours * 3600 + minutes * 60 + seconds
            }
            _ => return None,
        };
        return Some(Duration::from_secs(seconds));
    }

    humantime::parse_duration(input).ok()
}

/// Separa `!!play algo` en (`play`, `algo`)
pub fn parse_prefixed<'a>(content: &'a str, prefix: &str) -> Option<(String, &'a str)> {
    let rest = content.trim_start().strip_prefix(prefix)?;
    let mut parts = rest.splitn(2, char::is_whitespace);
    let name = parts.next().filter(|name| !name.is_empty())?;
    Some((name.to_lowercase(), parts.next().unwrap_or("").trim()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn parses_seek_positions() {
        assert_eq!(parse_position("90"), Some(Duration::from_secs(90)));
        assert_eq!(parse_position(" 1:30 "), Some(Duration::from_secs(90)));
        assert_eq!(parse_position("1:02:03"), Some(Duration::from_secs(3723)));
        assert_eq!(parse_position("1m30s"), Some(Duration::from_secs(90)));
    }

    #[test]
    fn rejects_malformed_positions() {
        assert_eq!(parse_position(""), None);
        assert_eq!(parse_position("1:75"), None);
        assert_eq!(parse_position("a:10"), None);
        assert_eq!(parse_position("soon"), None);
    }

    #[test]
    fn splits_prefixed_commands() {
        assert_eq!(
            parse_prefixed("!!play never gonna give you up", "!!"),
            Some(("play".to_string(), "never gonna give you up"))
        );
        assert_eq!(parse_prefixed("!!SKIP", "!!"), Some(("skip".to_string(), "")));
        assert_eq!(parse_prefixed("!! play", "!!"), None);
        assert_eq!(parse_prefixed("hola !!play", "!!"), None);
    }
}
