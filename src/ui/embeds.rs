use serenity::{
    all::Timestamp,
    builder::{CreateEmbed, CreateEmbedFooter},
};
use std::time::Duration;

use crate::{
    audio::{queue::QueueInfo, LoopMode, TrackRecord},
    storage::PlayEntry,
};

/// Paleta de colores estandarizada para el bot
pub mod colors {
    use serenity::all::Colour;

    pub const SUCCESS_GREEN: Colour = Colour::from_rgb(67, 181, 129);
    pub const ERROR_RED: Colour = Colour::from_rgb(220, 53, 69);
    pub const WARNING_ORANGE: Colour = Colour::from_rgb(255, 193, 7);
    pub const INFO_BLUE: Colour = Colour::from_rgb(52, 144, 220);
    pub const MUSIC_PURPLE: Colour = Colour::from_rgb(138, 43, 226);
    pub const NEUTRAL_GRAY: Colour = Colour::from_rgb(108, 117, 125);
}

/// Footer estandarizado para todos los embeds
const STANDARD_FOOTER: &str = "🎵 Open Jukebox";

/// Crea un embed para mostrar la canción actual
pub fn create_now_playing_embed(track: &TrackRecord, upcoming: usize, loop_mode: LoopMode) -> CreateEmbed {
    let mut embed = CreateEmbed::default()
        .title("🎵 Reproduciendo Ahora")
        .description(format!("**{}**", track.title()))
        .color(colors::SUCCESS_GREEN);

    embed = match track.duration() {
        Some(duration) => embed.field("⏱️ Duración", format_duration(duration), true),
        None => embed.field("⏱️ Duración", "🔴 En vivo", true),
    };

    embed = embed
        .field("👤 Solicitado por", format!("<@{}>", track.requested_by()), true)
        .field("📋 En cola", upcoming.to_string(), true);

    if loop_mode != LoopMode::Off {
        embed = embed.field("Loop", format!("{} {}", loop_mode.emoji(), loop_mode), true);
    }

    if let Some(thumbnail) = track.thumbnail() {
        embed = embed.thumbnail(thumbnail);
    }

    if track.page_url().is_some() {
        embed = embed.url(track.display_url());
    }

    embed
        .timestamp(Timestamp::now())
        .footer(CreateEmbedFooter::new(STANDARD_FOOTER))
}

/// Crea un embed para mostrar que se agregó una canción
pub fn create_track_added_embed(track: &TrackRecord, position: usize) -> CreateEmbed {
    let mut embed = CreateEmbed::default()
        .title("✅ Canción Agregada")
        .description(format!("**{}** se ha agregado a la cola", track.title()))
        .color(colors::SUCCESS_GREEN)
        .field("📍 Posición", position.to_string(), true);

    if let Some(duration) = track.duration() {
        embed = embed.field("⏱️ Duración", format_duration(duration), true);
    }

    if let Some(thumbnail) = track.thumbnail() {
        embed = embed.thumbnail(thumbnail);
    }

    embed
        .timestamp(Timestamp::now())
        .footer(CreateEmbedFooter::new(STANDARD_FOOTER))
}

/// Crea un embed para mostrar la cola de reproducción
pub fn create_queue_embed(queue_info: &QueueInfo, max_display: usize) -> CreateEmbed {
    let mut embed = CreateEmbed::default()
        .title("📋 Cola de Reproducción")
        .color(colors::INFO_BLUE);

    if queue_info.current.is_none() && queue_info.total_items == 0 {
        return embed
            .description("😴 **La cola está vacía**\n\n💡 Usa `/play <canción>` para agregar música")
            .color(colors::NEUTRAL_GRAY)
            .footer(CreateEmbedFooter::new(STANDARD_FOOTER))
            .timestamp(Timestamp::now());
    }

    if let Some(current) = &queue_info.current {
        embed = embed.field(
            format!("{} Reproduciendo", queue_info.loop_mode.emoji()),
            format!("**{}**", current.title()),
            false,
        );
    }

    let upcoming = upcoming_lines(queue_info, max_display);
    if !upcoming.is_empty() {
        embed = embed.field("Siguientes:", upcoming, false);
    }

    let mut info = format!("**Total:** {} canciones", queue_info.total_items);
    if queue_info.total_duration > Duration::ZERO {
        info.push_str(&format!(
            " • **Duración:** {}",
            format_duration(queue_info.total_duration)
        ));
    }
    info.push_str(&format!(" • **Loop:** {}", queue_info.loop_mode));

    embed
        .field("Información", info, false)
        .footer(CreateEmbedFooter::new(STANDARD_FOOTER))
        .timestamp(Timestamp::now())
}

/// Lista numerada de las primeras `max_display` pendientes
fn upcoming_lines(queue_info: &QueueInfo, max_display: usize) -> String {
    let page = queue_info.get_page(1, max_display);
    let mut lines = String::new();

    for (i, item) in page.items.iter().enumerate() {
        let duration = item
            .duration()
            .map(|d| format!(" `[{}]`", format_duration(d)))
            .unwrap_or_default();
        lines.push_str(&format!("**{}**. {}{}\n", i + 1, item.title(), duration));
    }

    if page.remaining > 0 {
        lines.push_str(&format!("*Y {} más...*", page.remaining));
    }

    lines
}

/// Historial de la sesión más el registro persistente de la guild
pub fn create_history_embed(
    session: &[TrackRecord],
    recent: &[PlayEntry],
    top: &[(String, usize)],
) -> CreateEmbed {
    let mut embed = CreateEmbed::default()
        .title("📜 Historial")
        .color(colors::MUSIC_PURPLE);

    if session.is_empty() && recent.is_empty() {
        return embed
            .description("Todavía no se reprodujo nada")
            .color(colors::NEUTRAL_GRAY)
            .footer(CreateEmbedFooter::new(STANDARD_FOOTER));
    }

    if !session.is_empty() {
        let lines: Vec<String> = session
            .iter()
            .enumerate()
            .map(|(i, track)| format!("**{}**. {}", i + 1, track.title()))
            .collect();
        embed = embed.field("⏮️ Esta sesión", lines.join("\n"), false);
    }

    if !recent.is_empty() {
        let lines: Vec<String> = recent
            .iter()
            .map(|entry| format!("<t:{}:R> {} (<@{}>)", entry.at.timestamp(), entry.title, entry.user_id))
            .collect();
        embed = embed.field("🕘 Recientes", lines.join("\n"), false);
    }

    if !top.is_empty() {
        let lines: Vec<String> = top
            .iter()
            .map(|(title, plays)| format!("{} • {} reproducciones", title, plays))
            .collect();
        embed = embed.field("🏆 Más escuchadas", lines.join("\n"), false);
    }

    embed
        .timestamp(Timestamp::now())
        .footer(CreateEmbedFooter::new(STANDARD_FOOTER))
}

/// Crea un embed de error
pub fn create_error_embed(title: &str, description: &str) -> CreateEmbed {
    CreateEmbed::default()
        .title(format!("❌ {}", title))
        .description(description)
        .color(colors::ERROR_RED)
        .timestamp(Timestamp::now())
        .footer(CreateEmbedFooter::new(STANDARD_FOOTER))
}

/// Crea un embed de éxito
pub fn create_success_embed(title: &str, description: &str) -> CreateEmbed {
    CreateEmbed::default()
        .title(format!("✅ {}", title))
        .description(description)
        .color(colors::SUCCESS_GREEN)
        .timestamp(Timestamp::now())
        .footer(CreateEmbedFooter::new(STANDARD_FOOTER))
}

/// Crea un embed de advertencia
pub fn create_warning_embed(title: &str, description: &str) -> CreateEmbed {
    CreateEmbed::default()
        .title(format!("⚠️ {}", title))
        .description(description)
        .color(colors::WARNING_ORANGE)
        .timestamp(Timestamp::now())
        .footer(CreateEmbedFooter::new(STANDARD_FOOTER))
}

pub fn format_duration(duration: Duration) -> String {
    let total_seconds = duration.as_secs();
    let hours = total_seconds / 3600;
    let minutes = (total_seconds % 3600) / 60;
    let seconds = total_seconds % 60;

    if hours > 0 {
        format!("{}:{:02}:{:02}", hours, minutes, seconds)
    } else {
        format!("{}:{:02}", minutes, seconds)
    }
}
