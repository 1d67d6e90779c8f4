use async_trait::async_trait;
use serenity::{builder::CreateMessage, http::Http, model::id::ChannelId};
use std::sync::Arc;
use tracing::warn;

use crate::{
    audio::{Announcer, LoopMode, TrackRecord},
    ui::{buttons, embeds},
};

/// Publica los avisos de reproducción en el canal de texto
pub struct DiscordAnnouncer {
    http: Arc<Http>,
}

impl DiscordAnnouncer {
    pub fn new(http: Arc<Http>) -> Self {
        Self { http }
    }
}

#[async_trait]
impl Announcer for DiscordAnnouncer {
    async fn now_playing(&self, channel: ChannelId, track: &TrackRecord, upcoming: usize, loop_mode: LoopMode) {
        let message = CreateMessage::new()
            .embed(embeds::create_now_playing_embed(track, upcoming, loop_mode))
            .components(buttons::player_controls(false, loop_mode));

        if let Err(e) = channel.send_message(&self.http, message).await {
            warn!("⚠️ No se pudo anunciar en canal {}: {:?}", channel, e);
        }
    }

    async fn notice(&self, channel: ChannelId, message: &str) {
        if let Err(e) = channel.say(&self.http, message).await {
            warn!("⚠️ No se pudo enviar aviso a canal {}: {:?}", channel, e);
        }
    }
}
