//! Player Loop por guild y las operaciones que lo controlan.
//!
//! Cada guild tiene un [`GuildPlayback`] con su propio lock; no hay contención
//! entre guilds. Dentro de una guild:
//!
//! - `session` (lock síncrono, nunca retenido a través de un `.await`) guarda
//!   cola, pista actual, epoch y token de cancelación.
//! - `control` (lock async) serializa las transiciones del transporte:
//!   arrancar pista, `stop`, `skip`, `seek`.
//!
//! Cada `start` del transporte lleva un epoch. Un seek incrementa el epoch
//! antes de detener la fuente vieja, así su aviso de fin llega obsoleto y el
//! loop lo descarta en vez de avanzar la cola.

use dashmap::DashMap;
use futures::FutureExt;
use parking_lot::Mutex;
use serenity::model::id::{ChannelId, GuildId, UserId};
use std::{
    panic::AssertUnwindSafe,
    sync::{
        atomic::{AtomicBool, Ordering},
        Arc,
    },
    time::Duration,
};
use tokio::{
    sync::mpsc::{self, UnboundedReceiver, UnboundedSender},
    task::JoinHandle,
};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use super::{
    acquire::SourceAcquirer,
    inactivity::IdleTimer,
    queue::{GuildQueue, LoopMode, QueueInfo},
    track::TrackRecord,
    transport::{AudioTransport, Completion, CompletionSignal},
    Announcer,
};
use crate::{
    config::PlaybackSettings,
    error::{PlaybackError, PlaybackResult},
    storage::{EventKind, PlayLog},
};

/// Dónde suena y dónde se anuncia la reproducción de una guild
#[derive(Clone)]
pub struct PlaybackTarget {
    pub transport: Arc<dyn AudioTransport>,
    pub announce_channel: ChannelId,
}

impl PlaybackTarget {
    pub fn new(transport: Arc<dyn AudioTransport>, announce_channel: ChannelId) -> Self {
        Self {
            transport,
            announce_channel,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StartOutcome {
    /// Se inició un Player Loop nuevo
    Started,
    /// Ya había un loop; la pista quedó en la cola
    Enqueued { position: usize },
}

/// Colaboradores compartidos por todas las guilds
pub struct PlaybackServices {
    pub acquirer: SourceAcquirer,
    pub announcer: Arc<dyn Announcer>,
    pub play_log: Arc<dyn PlayLog>,
    pub settings: PlaybackSettings,
}

struct Session {
    queue: GuildQueue,
    running: bool,
    epoch: u64,
    completions: Option<UnboundedSender<Completion>>,
    cancel: CancellationToken,
    target: Option<PlaybackTarget>,
}

/// Estado de reproducción de una guild
pub struct GuildPlayback {
    guild_id: GuildId,
    session: Mutex<Session>,
    control: tokio::sync::Mutex<()>,
    seeking: AtomicBool,
    loop_task: Mutex<Option<JoinHandle<()>>>,
    idle_timer: IdleTimer,
}

impl GuildPlayback {
    fn new(guild_id: GuildId, history_capacity: usize) -> Self {
        Self {
            guild_id,
            session: Mutex::new(Session {
                queue: GuildQueue::new(history_capacity),
                running: false,
                epoch: 0,
                completions: None,
                cancel: CancellationToken::new(),
                target: None,
            }),
            control: tokio::sync::Mutex::new(()),
            seeking: AtomicBool::new(false),
            loop_task: Mutex::new(None),
            idle_timer: IdleTimer::default(),
        }
    }

    pub fn guild_id(&self) -> GuildId {
        self.guild_id
    }

    pub fn is_running(&self) -> bool {
        self.session.lock().running
    }

    pub fn target(&self) -> Option<PlaybackTarget> {
        self.session.lock().target.clone()
    }

    pub(super) fn idle_timer(&self) -> &IdleTimer {
        &self.idle_timer
    }

    #[cfg(test)]
    fn has_loop_task(&self) -> bool {
        self.loop_task
            .lock()
            .as_ref()
            .is_some_and(|task| !task.is_finished())
    }

    fn current_epoch(&self) -> u64 {
        self.session.lock().epoch
    }

    /// Pista que no se pudo adquirir o arrancar: se salta sin loop ni historial
    fn skip_failed(&self, cancel: &CancellationToken) -> Step {
        let mut session = self.session.lock();
        if cancel.is_cancelled() {
            return Step::Cancelled;
        }
        let next = session.queue.skip_failed();
        if next.is_none() {
            session.running = false;
        }
        Step::Next(next)
    }

    /// Aplica la política de avance sobre la pista actual.
    ///
    /// Si no hay siguiente, `running` pasa a `false` bajo el mismo lock; un
    /// `start_or_enqueue` concurrente ve el loop terminado y arranca otro en vez
    /// de encolar en una cola que nadie va a leer.
    fn select_next(&self, cancel: &CancellationToken) -> Step {
        let mut session = self.session.lock();
        if cancel.is_cancelled() {
            return Step::Cancelled;
        }
        let next = match session.queue.take_current() {
            Some(finished) => session.queue.advance(finished),
            None => session.queue.dequeue_next(),
        };
        if next.is_none() {
            session.running = false;
        }
        Step::Next(next)
    }

    fn abort_session(&self, cancel: &CancellationToken) {
        let mut session = self.session.lock();
        if cancel.is_cancelled() {
            return;
        }
        session.running = false;
        session.queue.take_current();
        session.completions = None;
    }
}

enum Step {
    Next(Option<TrackRecord>),
    Aborted,
    Cancelled,
}

/// Restablece el flag de seek al salir, incluso por error
struct SeekGuard<'a>(&'a AtomicBool);

impl Drop for SeekGuard<'_> {
    fn drop(&mut self) {
        self.0.store(false, Ordering::SeqCst);
    }
}

/// Núcleo de reproducción: un Player Loop como máximo por guild
#[derive(Clone)]
pub struct PlaybackManager {
    guilds: Arc<DashMap<GuildId, Arc<GuildPlayback>>>,
    services: Arc<PlaybackServices>,
}

impl PlaybackManager {
    pub fn new(services: PlaybackServices) -> Self {
        Self {
            guilds: Arc::new(DashMap::new()),
            services: Arc::new(services),
        }
    }

    pub fn settings(&self) -> &PlaybackSettings {
        &self.services.settings
    }

    pub fn acquirer(&self) -> &SourceAcquirer {
        &self.services.acquirer
    }

    pub fn announcer(&self) -> &Arc<dyn Announcer> {
        &self.services.announcer
    }

    fn guild(&self, guild_id: GuildId) -> Option<Arc<GuildPlayback>> {
        self.guilds.get(&guild_id).map(|entry| Arc::clone(entry.value()))
    }

    fn get_or_create(&self, guild_id: GuildId) -> Arc<GuildPlayback> {
        let capacity = self.services.settings.history_capacity;
        self.guilds
            .entry(guild_id)
            .or_insert_with(|| Arc::new(GuildPlayback::new(guild_id, capacity)))
            .clone()
    }

    /// Token de la sesión actual de la guild; `clear` lo cancela.
    ///
    /// Quien encole en segundo plano lo toma antes de empezar y lo pasa a
    /// [`Self::start_or_enqueue_in_session`].
    pub fn session_token(&self, guild_id: GuildId) -> CancellationToken {
        self.get_or_create(guild_id).session.lock().cancel.clone()
    }

    /// Arranca un Player Loop con `track`, o la encola si ya hay uno activo
    pub fn start_or_enqueue(
        &self,
        guild_id: GuildId,
        track: TrackRecord,
        target: PlaybackTarget,
    ) -> PlaybackResult<StartOutcome> {
        self.enqueue_or_start(guild_id, track, target, None)
    }

    /// Como [`Self::start_or_enqueue`], pero falla con `SessionEnded` si
    /// `session` ya fue cancelado por un `clear`
    pub fn start_or_enqueue_in_session(
        &self,
        guild_id: GuildId,
        track: TrackRecord,
        target: PlaybackTarget,
        session: &CancellationToken,
    ) -> PlaybackResult<StartOutcome> {
        self.enqueue_or_start(guild_id, track, target, Some(session))
    }

    fn enqueue_or_start(
        &self,
        guild_id: GuildId,
        track: TrackRecord,
        target: PlaybackTarget,
        expected: Option<&CancellationToken>,
    ) -> PlaybackResult<StartOutcome> {
        let guild = self.get_or_create(guild_id);
        let mut session = guild.session.lock();

        // `clear` cancela bajo este mismo lock
        if expected.is_some_and(|token| token.is_cancelled()) {
            return Err(PlaybackError::SessionEnded);
        }

        guild.idle_timer.disarm();

        if session.running {
            let max = self.services.settings.max_queue_size;
            if session.queue.len() >= max {
                return Err(PlaybackError::QueueFull(max));
            }
            let position = session.queue.enqueue(track);
            return Ok(StartOutcome::Enqueued { position });
        }

        let (tx, rx) = mpsc::unbounded_channel();
        session.running = true;
        session.completions = Some(tx);
        session.target = Some(target);
        let cancel = session.cancel.clone();

        info!("▶️ Iniciando reproducción en guild {}: {}", guild_id, track.title());

        let task = tokio::spawn(self.clone().run_loop(Arc::clone(&guild), rx, cancel, track));
        *guild.loop_task.lock() = Some(task);

        Ok(StartOutcome::Started)
    }

    async fn run_loop(
        self,
        guild: Arc<GuildPlayback>,
        mut completions: UnboundedReceiver<Completion>,
        cancel: CancellationToken,
        first: TrackRecord,
    ) {
        let guild_id = guild.guild_id;
        let mut next = Some(first);

        let outcome = loop {
            let Some(track) = next.take() else {
                break Step::Next(None);
            };

            let step = AssertUnwindSafe(self.play_track(&guild, track, &mut completions, &cancel))
                .catch_unwind()
                .await;

            match step {
                Ok(Step::Next(selected)) => next = selected,
                Ok(other) => break other,
                Err(panic) => {
                    let reason = panic
                        .downcast_ref::<&str>()
                        .map(|s| s.to_string())
                        .or_else(|| panic.downcast_ref::<String>().cloned())
                        .unwrap_or_else(|| "desconocido".to_string());
                    error!("💥 Pánico en el loop de guild {}: {}", guild_id, reason);

                    match self.recover_after_panic(&guild, &cancel).await {
                        Step::Next(selected) => next = selected,
                        other => break other,
                    }
                }
            }
        };

        match outcome {
            Step::Next(_) => {
                info!("⏹️ Cola terminada en guild {}", guild_id);
                if cancel.is_cancelled() {
                    return;
                }
                let connected = match guild.target() {
                    Some(target) => target.transport.is_connected().await,
                    None => false,
                };
                if !connected {
                    return;
                }
                // armar bajo el lock de sesión: un `start_or_enqueue` posterior
                // ve el timer armado y lo desarma
                let session = guild.session.lock();
                if !session.running && !cancel.is_cancelled() {
                    self.arm_inactivity(&guild);
                }
            }
            Step::Aborted => {
                warn!("🔌 {} (guild {})", PlaybackError::TransportDisconnected, guild_id);
                guild.abort_session(&cancel);
            }
            Step::Cancelled => debug!("Loop de guild {} cancelado", guild_id),
        }
    }

    /// Loading → Playing → Advancing para una pista
    async fn play_track(
        &self,
        guild: &Arc<GuildPlayback>,
        mut track: TrackRecord,
        completions: &mut UnboundedReceiver<Completion>,
        cancel: &CancellationToken,
    ) -> Step {
        let guild_id = guild.guild_id;

        if cancel.is_cancelled() {
            return Step::Cancelled;
        }
        let Some(target) = guild.target() else {
            return Step::Aborted;
        };
        if !target.transport.is_connected().await {
            return Step::Aborted;
        }

        debug!("⏳ Cargando en guild {}: {}", guild_id, track.title());
        let source = match self.services.acquirer.acquire(&mut track).await {
            Ok(source) => source,
            Err(e) => {
                warn!("⏭️ Saltando pista en guild {}: {}", guild_id, e);
                return guild.skip_failed(cancel);
            }
        };

        let (upcoming, loop_mode) = {
            let _control = guild.control.lock().await;

            let signal = {
                let mut session = guild.session.lock();
                if cancel.is_cancelled() {
                    return Step::Cancelled;
                }
                let Some(tx) = session.completions.clone() else {
                    return Step::Cancelled;
                };
                session.queue.set_current(track.clone());
                session.epoch += 1;
                CompletionSignal::new(session.epoch, tx)
            };

            if let Err(e) = target.transport.start(source, signal).await {
                warn!("⏭️ El transporte rechazó la pista en guild {}: {}", guild_id, e);
                return guild.skip_failed(cancel);
            }

            let session = guild.session.lock();
            (session.queue.len(), session.queue.loop_mode())
        };

        if cancel.is_cancelled() {
            return Step::Cancelled;
        }

        info!("🎵 Reproduciendo en guild {}: {}", guild_id, track.title());
        self.services
            .announcer
            .now_playing(target.announce_channel, &track, upcoming, loop_mode)
            .await;
        self.services.play_log.record_play(
            guild_id,
            track.requested_by(),
            track.title(),
            track.display_url(),
        );

        loop {
            tokio::select! {
                biased;
                _ = cancel.cancelled() => return Step::Cancelled,
                received = completions.recv() => {
                    let Some(completion) = received else {
                        return Step::Cancelled;
                    };
                    if completion.epoch != guild.current_epoch() {
                        debug!(
                            "🔇 Aviso de fin obsoleto ignorado en guild {} (epoch {})",
                            guild_id, completion.epoch
                        );
                        continue;
                    }
                    if let Some(error) = completion.error {
                        warn!("⚠️ La pista terminó con error en guild {}: {}", guild_id, error);
                    }
                    break;
                }
            }
        }

        if !target.transport.is_connected().await {
            return Step::Aborted;
        }

        guild.select_next(cancel)
    }

    async fn recover_after_panic(&self, guild: &Arc<GuildPlayback>, cancel: &CancellationToken) -> Step {
        if let Some(target) = guild.target() {
            let _control = guild.control.lock().await;
            if cancel.is_cancelled() {
                return Step::Cancelled;
            }
            target.transport.stop().await;
        }
        guild.select_next(cancel)
    }

    /// Detiene todo y borra el estado de la guild. Idempotente.
    ///
    /// Devuelve si había algo que limpiar.
    pub async fn clear(&self, guild_id: GuildId) -> bool {
        let Some(guild) = self.guild(guild_id) else {
            return false;
        };

        let (had_state, target, task) = {
            let mut session = guild.session.lock();
            session.cancel.cancel();
            let had_queue = session.queue.clear();
            let had_state = had_queue || session.running || session.target.is_some();

            session.running = false;
            session.completions = None;
            session.cancel = CancellationToken::new();
            session.epoch += 1;
            let target = session.target.take();
            let task = guild.loop_task.lock().take();
            (had_state, target, task)
        };

        let had_timer = guild.idle_timer.disarm();
        if let Some(task) = task {
            task.abort();
        }

        if let Some(target) = target {
            let _control = guild.control.lock().await;
            target.transport.stop().await;
        }

        if had_state || had_timer {
            info!("🗑️ Estado de reproducción limpiado en guild {}", guild_id);
        }
        had_state || had_timer
    }

    /// Salta la pista actual; escapa del loop `track` una vez
    pub async fn skip(&self, guild_id: GuildId) -> PlaybackResult<TrackRecord> {
        let guild = self.guild(guild_id).ok_or(PlaybackError::NothingPlaying)?;
        let _control = guild.control.lock().await;

        let (skipped, target) = {
            let mut session = guild.session.lock();
            let current = session.queue.current().cloned();
            let (Some(current), Some(target)) = (current, session.target.clone()) else {
                return Err(PlaybackError::NothingPlaying);
            };
            session.queue.request_skip();
            (current, target)
        };

        info!("⏭️ Saltando en guild {}: {}", guild_id, skipped.title());
        target.transport.stop().await;
        Ok(skipped)
    }

    /// Vuelve a la pista más reciente del historial
    pub async fn previous(&self, guild_id: GuildId, target: PlaybackTarget) -> PlaybackResult<TrackRecord> {
        let guild = self.guild(guild_id).ok_or(PlaybackError::EmptyHistory)?;
        let _control = guild.control.lock().await;

        enum Plan {
            Interrupt(PlaybackTarget),
            Queued,
            Start,
        }

        let (previous, plan) = {
            let mut session = guild.session.lock();
            let previous = session.queue.pop_history().ok_or(PlaybackError::EmptyHistory)?;

            let plan = match (session.running, session.queue.current().cloned(), session.target.clone()) {
                (true, Some(current), Some(active)) => {
                    if session.queue.loop_mode() != LoopMode::Queue {
                        session.queue.enqueue_front(current);
                    }
                    session.queue.enqueue_front(previous.clone());
                    session.queue.mark_skip_history_once();
                    session.queue.request_skip();
                    Plan::Interrupt(active)
                }
                (true, _, _) => {
                    session.queue.enqueue_front(previous.clone());
                    Plan::Queued
                }
                _ => Plan::Start,
            };
            (previous, plan)
        };

        info!("⏮️ Volviendo en guild {} a: {}", guild_id, previous.title());
        match plan {
            Plan::Interrupt(active) => active.transport.stop().await,
            Plan::Queued => {}
            Plan::Start => {
                drop(_control);
                self.start_or_enqueue(guild_id, previous.clone(), target)?;
            }
        }
        Ok(previous)
    }

    /// Mueve la pista actual a `offset` sin avanzar la cola.
    ///
    /// El locator se refresca antes de abrir la nueva fuente. Si algo falla la
    /// pista queda detenida y el loop sigue con la siguiente.
    pub async fn seek(&self, guild_id: GuildId, offset: Duration) -> PlaybackResult<TrackRecord> {
        let guild = self.guild(guild_id).ok_or(PlaybackError::NothingPlaying)?;

        if guild.seeking.swap(true, Ordering::SeqCst) {
            return Err(PlaybackError::SeekInProgress);
        }
        let _seeking = SeekGuard(&guild.seeking);
        let _control = guild.control.lock().await;

        let (mut track, target, cancel) = {
            let session = guild.session.lock();
            match (session.queue.current().cloned(), session.target.clone()) {
                (Some(track), Some(target)) => (track, target, session.cancel.clone()),
                _ => return Err(PlaybackError::NothingPlaying),
            }
        };

        let transport = &target.transport;
        if !(transport.is_playing().await || transport.is_paused().await) {
            return Err(PlaybackError::NothingPlaying);
        }

        info!("⏩ Seek en guild {} a {:?}: {}", guild_id, offset, track.title());

        let source = match self.services.acquirer.acquire_for_seek(&mut track, offset).await {
            Ok(source) => source,
            Err(e) => {
                warn!("❌ Seek fallido en guild {}: {}", guild_id, e);
                transport.stop().await;
                return Err(PlaybackError::SeekFailed(e.to_string()));
            }
        };

        let (signal, fallback) = {
            let mut session = guild.session.lock();
            if cancel.is_cancelled() || session.queue.current().is_none() {
                return Err(PlaybackError::NothingPlaying);
            }
            let Some(tx) = session.completions.clone() else {
                return Err(PlaybackError::NothingPlaying);
            };
            session.queue.refresh_current_locator(track.stream_url());
            session.epoch += 1;
            (
                CompletionSignal::new(session.epoch, tx.clone()),
                CompletionSignal::new(session.epoch, tx),
            )
        };

        // el aviso de la fuente vieja llega con el epoch anterior
        transport.stop().await;
        tokio::time::sleep(self.services.settings.seek_settle).await;

        if cancel.is_cancelled() {
            return Err(PlaybackError::NothingPlaying);
        }

        if let Err(e) = transport.start(source, signal).await {
            warn!("❌ No se pudo reanudar tras seek en guild {}: {}", guild_id, e);
            fallback.fire(Some(e.to_string()));
            return Err(PlaybackError::SeekFailed(e.to_string()));
        }

        Ok(track)
    }

    pub async fn pause(&self, guild_id: GuildId) -> bool {
        match self.guild(guild_id).and_then(|guild| guild.target()) {
            Some(target) => target.transport.pause().await,
            None => false,
        }
    }

    pub async fn resume(&self, guild_id: GuildId) -> bool {
        match self.guild(guild_id).and_then(|guild| guild.target()) {
            Some(target) => target.transport.resume().await,
            None => false,
        }
    }

    pub async fn is_paused(&self, guild_id: GuildId) -> bool {
        match self.guild(guild_id).and_then(|guild| guild.target()) {
            Some(target) => target.transport.is_paused().await,
            None => false,
        }
    }

    pub fn cycle_loop_mode(&self, guild_id: GuildId) -> LoopMode {
        self.get_or_create(guild_id).session.lock().queue.cycle_loop_mode()
    }

    pub fn loop_mode(&self, guild_id: GuildId) -> LoopMode {
        self.guild(guild_id)
            .map(|guild| guild.session.lock().queue.loop_mode())
            .unwrap_or_default()
    }

    /// Mezcla los pendientes; devuelve cuántos hay
    pub fn shuffle(&self, guild_id: GuildId) -> usize {
        let Some(guild) = self.guild(guild_id) else {
            return 0;
        };
        let mut session = guild.session.lock();
        session.queue.shuffle();
        session.queue.len()
    }

    pub fn current_track(&self, guild_id: GuildId) -> Option<TrackRecord> {
        self.guild(guild_id)?.session.lock().queue.current().cloned()
    }

    pub fn pending_queue(&self, guild_id: GuildId) -> Vec<TrackRecord> {
        self.guild(guild_id)
            .map(|guild| guild.session.lock().queue.pending())
            .unwrap_or_default()
    }

    /// Historial, la más reciente primero
    pub fn history(&self, guild_id: GuildId) -> Vec<TrackRecord> {
        self.guild(guild_id)
            .map(|guild| guild.session.lock().queue.history())
            .unwrap_or_default()
    }

    pub fn queue_info(&self, guild_id: GuildId) -> QueueInfo {
        match self.guild(guild_id) {
            Some(guild) => guild.session.lock().queue.get_info(),
            None => GuildQueue::default().get_info(),
        }
    }

    /// Si hay un Player Loop vivo para la guild
    #[cfg(test)]
    pub fn is_active(&self, guild_id: GuildId) -> bool {
        self.guild(guild_id).is_some_and(|guild| guild.is_running())
    }

    #[cfg(test)]
    pub fn is_idle_timer_armed(&self, guild_id: GuildId) -> bool {
        self.guild(guild_id)
            .is_some_and(|guild| guild.idle_timer.is_armed())
    }

    #[cfg(test)]
    pub fn has_loop_task(&self, guild_id: GuildId) -> bool {
        self.guild(guild_id).is_some_and(|guild| guild.has_loop_task())
    }

    #[cfg(test)]
    fn tracked_guilds(&self) -> usize {
        self.guilds.len()
    }

    /// Registra un evento de usuario en el play log
    pub fn record_event(&self, guild_id: GuildId, user: UserId, kind: EventKind, title: &str) {
        self.services.play_log.record_event(guild_id, user, kind, title);
    }
}
