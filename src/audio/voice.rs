use async_trait::async_trait;
use parking_lot::Mutex;
use serenity::model::id::GuildId;
use songbird::{
    tracks::{PlayMode, TrackHandle},
    Call, Event, EventContext, EventHandler as VoiceEventHandler, Songbird, TrackEvent,
};
use std::sync::Arc;
use tracing::{debug, error, info};

use super::{
    source::AudioSource,
    transport::{AudioTransport, CompletionSignal},
};
use crate::error::{PlaybackError, PlaybackResult};

const DEFAULT_VOLUME: f32 = 0.5;

/// Transporte de audio sobre la llamada de songbird de una guild
pub struct SongbirdTransport {
    manager: Arc<Songbird>,
    guild_id: GuildId,
    current: Mutex<Option<TrackHandle>>,
}

impl SongbirdTransport {
    pub fn new(manager: Arc<Songbird>, guild_id: GuildId) -> Self {
        Self {
            manager,
            guild_id,
            current: Mutex::new(None),
        }
    }

    fn call(&self) -> Option<Arc<tokio::sync::Mutex<Call>>> {
        self.manager.get(self.guild_id)
    }

    fn current_handle(&self) -> Option<TrackHandle> {
        self.current.lock().clone()
    }

    async fn play_mode(&self) -> Option<PlayMode> {
        let handle = self.current_handle()?;
        handle.get_info().await.ok().map(|info| info.playing)
    }
}

#[async_trait]
impl AudioTransport for SongbirdTransport {
    async fn start(&self, source: AudioSource, on_complete: CompletionSignal) -> PlaybackResult<()> {
        let call = self.call().ok_or(PlaybackError::TransportDisconnected)?;
        let start_at = source.start_at();

        let handle = {
            let mut call = call.lock().await;
            call.play_input(source.into_input())
        };
        let _ = handle.set_volume(DEFAULT_VOLUME);

        if let Some(offset) = start_at {
            debug!("⏩ Posición inicial {:?} en guild {}", offset, self.guild_id);
            let _ = handle.seek(offset);
        }

        let relay = CompletionRelay::new(on_complete, self.guild_id);
        let registered = handle
            .add_event(Event::Track(TrackEvent::End), relay.clone())
            .and_then(|_| handle.add_event(Event::Track(TrackEvent::Error), relay.clone()));

        if let Err(e) = registered {
            // sin relay no hay aviso de fin; la señal se descarta sin disparar
            relay.disarm();
            let _ = handle.stop();
            return Err(PlaybackError::Transport(format!(
                "Error al agregar event handler: {}",
                e
            )));
        }

        *self.current.lock() = Some(handle);
        Ok(())
    }

    async fn stop(&self) {
        if let Some(handle) = self.current.lock().take() {
            let _ = handle.stop();
            debug!("⏹️ Fuente detenida en guild {}", self.guild_id);
        }
    }

    async fn pause(&self) -> bool {
        if !self.is_playing().await {
            return false;
        }
        match self.current_handle().map(|handle| handle.pause()) {
            Some(Ok(())) => {
                info!("⏸️ Reproducción pausada en guild {}", self.guild_id);
                true
            }
            _ => false,
        }
    }

    async fn resume(&self) -> bool {
        if !self.is_paused().await {
            return false;
        }
        match self.current_handle().map(|handle| handle.play()) {
            Some(Ok(())) => {
                info!("▶️ Reproducción reanudada en guild {}", self.guild_id);
                true
            }
            _ => false,
        }
    }

    async fn is_playing(&self) -> bool {
        matches!(self.play_mode().await, Some(PlayMode::Play))
    }

    async fn is_paused(&self) -> bool {
        matches!(self.play_mode().await, Some(PlayMode::Pause))
    }

    async fn is_connected(&self) -> bool {
        match self.call() {
            Some(call) => call.lock().await.current_channel().is_some(),
            None => false,
        }
    }

    async fn disconnect(&self) -> anyhow::Result<()> {
        self.current.lock().take();
        if self.manager.get(self.guild_id).is_some() {
            self.manager.remove(self.guild_id).await?;
            info!("👋 Desconectado del canal de voz en guild {}", self.guild_id);
        }
        Ok(())
    }
}

/// Lleva el fin de pista del driver de voz al Player Loop, una sola vez
#[derive(Clone)]
struct CompletionRelay {
    signal: Arc<Mutex<Option<CompletionSignal>>>,
    guild_id: GuildId,
}

impl CompletionRelay {
    fn new(signal: CompletionSignal, guild_id: GuildId) -> Self {
        Self {
            signal: Arc::new(Mutex::new(Some(signal))),
            guild_id,
        }
    }

    fn disarm(&self) {
        self.signal.lock().take();
    }
}

#[async_trait]
impl VoiceEventHandler for CompletionRelay {
    async fn act(&self, ctx: &EventContext<'_>) -> Option<Event> {
        let error = match ctx {
            EventContext::Track(tracks) => tracks.iter().find_map(|(state, _)| match &state.playing {
                PlayMode::Errored(e) => Some(e.to_string()),
                _ => None,
            }),
            _ => None,
        };

        let Some(signal) = self.signal.lock().take() else {
            return None;
        };

        match &error {
            Some(e) => error!("❌ Error de reproducción en guild {}: {}", self.guild_id, e),
            None => debug!("Track terminado en guild {}", self.guild_id),
        }

        signal.fire(error);
        None
    }
}
