//! Dobles de prueba para el núcleo de reproducción.

use async_trait::async_trait;
use parking_lot::Mutex;
use reqwest::Client;
use serenity::model::id::{ChannelId, GuildId, UserId};
use songbird::input::{HttpRequest, Input};
use std::{collections::HashSet, sync::Arc, time::Duration};
use tokio::sync::Notify;

use super::{
    source::{AudioSource, Decoder},
    transport::{AudioTransport, CompletionSignal},
    Announcer, LoopMode, TrackRecord,
};
use crate::{
    error::{PlaybackError, PlaybackResult},
    storage::{EventKind, PlayLog},
};

pub fn fake_source(locator: &str, start_at: Option<Duration>) -> AudioSource {
    let input = Input::from(HttpRequest::new(Client::new(), locator.to_string()));
    AudioSource::new(input, locator.to_string(), start_at)
}

pub fn track(name: &str) -> TrackRecord {
    TrackRecord::new(
        name.to_string(),
        format!("https://stream.example/{name}"),
        UserId::new(7),
    )
    .with_page_url(format!("https://www.youtube.com/watch?v={name}"))
}

/// Espera a que la condición se cumpla dejando correr las demás tareas
pub async fn wait_until(mut condition: impl FnMut() -> bool) {
    for _ in 0..200 {
        if condition() {
            return;
        }
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
    panic!("la condición no se cumplió a tiempo");
}

/// Decoder en memoria: falla para locators marcados y puede retener aperturas
#[derive(Default)]
pub struct FakeDecoder {
    failing: Mutex<HashSet<String>>,
    fail_offsets: Mutex<bool>,
    opened: Mutex<Vec<(String, Option<Duration>)>>,
    gate: Mutex<Option<(String, Arc<Notify>)>>,
}

impl FakeDecoder {
    pub fn fail(&self, name: &str) {
        self.failing.lock().insert(format!("https://stream.example/{name}"));
    }

    pub fn fail_offsets(&self) {
        *self.fail_offsets.lock() = true;
    }

    /// Las aperturas de `name` esperan hasta que se notifique el `Notify`
    pub fn hold(&self, name: &str) -> Arc<Notify> {
        let notify = Arc::new(Notify::new());
        *self.gate.lock() = Some((format!("https://stream.example/{name}"), Arc::clone(&notify)));
        notify
    }

    pub fn opened(&self) -> Vec<(String, Option<Duration>)> {
        self.opened.lock().clone()
    }
}

#[async_trait]
impl Decoder for FakeDecoder {
    async fn open(&self, locator: &str, start_at: Option<Duration>) -> anyhow::Result<AudioSource> {
        let gate = self
            .gate
            .lock()
            .as_ref()
            .filter(|(held, _)| held == locator)
            .map(|(_, notify)| Arc::clone(notify));
        if let Some(notify) = gate {
            notify.notified().await;
        }

        self.opened.lock().push((locator.to_string(), start_at));

        if self.failing.lock().contains(locator) {
            anyhow::bail!("stream muerto: {locator}");
        }
        if start_at.is_some() && *self.fail_offsets.lock() {
            anyhow::bail!("no se pudo abrir en offset");
        }
        Ok(fake_source(locator, start_at))
    }
}

#[derive(Default)]
struct TransportState {
    connected: bool,
    playing: bool,
    paused: bool,
    pending: Option<CompletionSignal>,
    started: Vec<(String, Option<Duration>)>,
    overlapping_starts: usize,
    stops: usize,
    disconnects: usize,
    reject_next_start: bool,
    connection_gate: Option<(usize, Arc<Notify>)>,
}

/// Transporte en memoria que registra cada llamada
pub struct FakeTransport {
    state: Mutex<TransportState>,
}

impl FakeTransport {
    pub fn new() -> Arc<Self> {
        Arc::new(Self {
            state: Mutex::new(TransportState {
                connected: true,
                ..Default::default()
            }),
        })
    }

    /// Fin natural de la fuente actual
    pub fn finish(&self) {
        let signal = {
            let mut state = self.state.lock();
            state.playing = false;
            state.paused = false;
            state.pending.take()
        };
        if let Some(signal) = signal {
            signal.fire(None);
        }
    }

    pub fn started(&self) -> Vec<String> {
        self.state.lock().started.iter().map(|(l, _)| l.clone()).collect()
    }

    pub fn started_with_offsets(&self) -> Vec<(String, Option<Duration>)> {
        self.state.lock().started.clone()
    }

    pub fn start_count(&self) -> usize {
        self.state.lock().started.len()
    }

    pub fn overlapping_starts(&self) -> usize {
        self.state.lock().overlapping_starts
    }

    pub fn disconnects(&self) -> usize {
        self.state.lock().disconnects
    }

    pub fn is_live(&self) -> bool {
        self.state.lock().pending.is_some()
    }

    pub fn set_connected(&self, connected: bool) {
        self.state.lock().connected = connected;
    }

    pub fn reject_next_start(&self) {
        self.state.lock().reject_next_start = true;
    }

    /// Audio que suena fuera del loop, p. ej. otro cliente en el canal
    pub fn set_playing(&self, playing: bool) {
        self.state.lock().playing = playing;
    }

    /// Deja pasar `skip` consultas de conexión y retiene la siguiente
    /// hasta que se notifique el `Notify`
    pub fn hold_connection_check(&self, skip: usize) -> Arc<Notify> {
        let notify = Arc::new(Notify::new());
        self.state.lock().connection_gate = Some((skip, Arc::clone(&notify)));
        notify
    }
}

#[async_trait]
impl AudioTransport for FakeTransport {
    async fn start(&self, source: AudioSource, on_complete: CompletionSignal) -> PlaybackResult<()> {
        let mut state = self.state.lock();
        if std::mem::take(&mut state.reject_next_start) {
            return Err(PlaybackError::Transport("rechazado".into()));
        }
        if state.pending.is_some() {
            state.overlapping_starts += 1;
        }
        state
            .started
            .push((source.locator().to_string(), source.start_at()));
        state.pending = Some(on_complete);
        state.playing = true;
        state.paused = false;
        Ok(())
    }

    async fn stop(&self) {
        let signal = {
            let mut state = self.state.lock();
            state.stops += 1;
            state.playing = false;
            state.paused = false;
            state.pending.take()
        };
        if let Some(signal) = signal {
            signal.fire(None);
        }
    }

    async fn pause(&self) -> bool {
        let mut state = self.state.lock();
        if !state.playing {
            return false;
        }
        state.playing = false;
        state.paused = true;
        true
    }

    async fn resume(&self) -> bool {
        let mut state = self.state.lock();
        if !state.paused {
            return false;
        }
        state.playing = true;
        state.paused = false;
        true
    }

    async fn is_playing(&self) -> bool {
        self.state.lock().playing
    }

    async fn is_paused(&self) -> bool {
        self.state.lock().paused
    }

    async fn is_connected(&self) -> bool {
        let gate = {
            let mut state = self.state.lock();
            match state.connection_gate.take() {
                Some((0, notify)) => Some(notify),
                Some((skip, notify)) => {
                    state.connection_gate = Some((skip - 1, notify));
                    None
                }
                None => None,
            }
        };
        if let Some(notify) = gate {
            notify.notified().await;
        }
        self.state.lock().connected
    }

    async fn disconnect(&self) -> anyhow::Result<()> {
        let mut state = self.state.lock();
        state.connected = false;
        state.playing = false;
        state.paused = false;
        state.pending = None;
        state.disconnects += 1;
        Ok(())
    }
}

/// Announcer que guarda lo anunciado; puede entrar en pánico con un título
#[derive(Default)]
pub struct RecordingAnnouncer {
    announced: Mutex<Vec<String>>,
    notices: Mutex<Vec<String>>,
    panic_on: Mutex<Option<String>>,
}

impl RecordingAnnouncer {
    pub fn announced(&self) -> Vec<String> {
        self.announced.lock().clone()
    }

    pub fn notices(&self) -> Vec<String> {
        self.notices.lock().clone()
    }

    pub fn panic_on(&self, title: &str) {
        *self.panic_on.lock() = Some(title.to_string());
    }
}

#[async_trait]
impl Announcer for RecordingAnnouncer {
    async fn now_playing(&self, _channel: ChannelId, track: &TrackRecord, _upcoming: usize, _loop_mode: LoopMode) {
        let should_panic = self.panic_on.lock().as_deref() == Some(track.title());
        if should_panic {
            panic!("fallo al anunciar {}", track.title());
        }
        self.announced.lock().push(track.title().to_string());
    }

    async fn notice(&self, _channel: ChannelId, message: &str) {
        self.notices.lock().push(message.to_string());
    }
}

#[derive(Default)]
pub struct RecordingPlayLog {
    plays: Mutex<Vec<(GuildId, String)>>,
}

impl RecordingPlayLog {
    pub fn plays(&self) -> Vec<String> {
        self.plays.lock().iter().map(|(_, title)| title.clone()).collect()
    }
}

impl PlayLog for RecordingPlayLog {
    fn record_play(&self, guild_id: GuildId, _user_id: UserId, title: &str, _locator: &str) {
        self.plays.lock().push((guild_id, title.to_string()));
    }

    fn record_event(&self, _guild_id: GuildId, _user_id: UserId, _kind: EventKind, _title: &str) {}
}
