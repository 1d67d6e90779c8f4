use rand::seq::SliceRandom;
use std::{collections::VecDeque, fmt, time::Duration};
use tracing::{debug, info};

use super::track::TrackRecord;

pub const DEFAULT_HISTORY_CAPACITY: usize = 10;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum LoopMode {
    #[default]
    Off,
    Track,
    Queue,
}

impl LoopMode {
    /// Siguiente modo del ciclo `off → track → queue → off`
    pub fn next(self) -> Self {
        match self {
            LoopMode::Off => LoopMode::Track,
            LoopMode::Track => LoopMode::Queue,
            LoopMode::Queue => LoopMode::Off,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            LoopMode::Off => "off",
            LoopMode::Track => "track",
            LoopMode::Queue => "queue",
        }
    }

    pub fn emoji(&self) -> &'static str {
        match self {
            LoopMode::Off => "➡️",
            LoopMode::Track => "🔂",
            LoopMode::Queue => "🔁",
        }
    }
}

impl fmt::Display for LoopMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Estado de cola de una guild: pendientes, pista actual, modo loop e historial.
///
/// Estructura de datos pura. La sincronización la pone quien la posee
/// (ver [`crate::audio::player`]).
#[derive(Debug)]
pub struct GuildQueue {
    items: VecDeque<TrackRecord>,
    current: Option<TrackRecord>,
    // la más reciente al final
    history: VecDeque<TrackRecord>,
    loop_mode: LoopMode,
    skip_history_once: bool,
    skip_requested: bool,
    history_capacity: usize,
}

impl Default for GuildQueue {
    fn default() -> Self {
        Self::new(DEFAULT_HISTORY_CAPACITY)
    }
}

impl GuildQueue {
    pub fn new(history_capacity: usize) -> Self {
        Self {
            items: VecDeque::new(),
            current: None,
            history: VecDeque::with_capacity(history_capacity),
            loop_mode: LoopMode::Off,
            skip_history_once: false,
            skip_requested: false,
            history_capacity,
        }
    }

    /// Agrega al final y devuelve la posición (1 = siguiente)
    pub fn enqueue(&mut self, track: TrackRecord) -> usize {
        info!("➕ Agregado a la cola: {}", track.title());
        self.items.push_back(track);
        self.items.len()
    }

    pub fn enqueue_front(&mut self, track: TrackRecord) {
        debug!("⏮️ Agregado al frente de la cola: {}", track.title());
        self.items.push_front(track);
    }

    /// Saca la cabeza de la cola (FIFO)
    pub fn dequeue_next(&mut self) -> Option<TrackRecord> {
        let next = self.items.pop_front();
        match &next {
            Some(track) => info!("➡️ Siguiente en cola: {}", track.title()),
            None => info!("📭 Cola vacía, no hay siguiente track"),
        }
        next
    }

    /// Elimina todo el estado. Idempotente; devuelve si había algo.
    pub fn clear(&mut self) -> bool {
        let had_state = !self.items.is_empty()
            || self.current.is_some()
            || !self.history.is_empty()
            || self.loop_mode != LoopMode::Off;

        self.items.clear();
        self.current = None;
        self.history.clear();
        self.loop_mode = LoopMode::Off;
        self.skip_history_once = false;
        self.skip_requested = false;

        if had_state {
            info!("🗑️ Cola limpiada");
        }
        had_state
    }

    /// Mezcla sólo los pendientes; la pista actual no se toca
    pub fn shuffle(&mut self) {
        let mut items: Vec<_> = self.items.drain(..).collect();
        items.shuffle(&mut rand::thread_rng());
        self.items.extend(items);
        info!("🔀 Cola mezclada ({} canciones)", self.items.len());
    }

    pub fn cycle_loop_mode(&mut self) -> LoopMode {
        self.loop_mode = self.loop_mode.next();
        info!("{} Modo loop: {}", self.loop_mode.emoji(), self.loop_mode);
        self.loop_mode
    }

    pub fn loop_mode(&self) -> LoopMode {
        self.loop_mode
    }

    pub fn current(&self) -> Option<&TrackRecord> {
        self.current.as_ref()
    }

    pub fn set_current(&mut self, track: TrackRecord) {
        self.current = Some(track);
    }

    pub fn take_current(&mut self) -> Option<TrackRecord> {
        self.current.take()
    }

    /// Actualiza el locator de la pista actual tras un refresh
    pub fn refresh_current_locator(&mut self, stream_url: &str) {
        if let Some(current) = self.current.as_mut() {
            current.set_stream_url(stream_url.to_string());
        }
    }

    /// Aplica la política de avance sobre la pista que terminó.
    ///
    /// Orden: loop `track` repite la misma pista; si no, se registra en el
    /// historial (salvo el flag de una sola vez), loop `queue` la reencola al
    /// final y se saca la nueva cabeza.
    pub fn advance(&mut self, finished: TrackRecord) -> Option<TrackRecord> {
        let skip_requested = std::mem::take(&mut self.skip_requested);

        if self.loop_mode == LoopMode::Track && !skip_requested {
            info!("🔂 Repitiendo track: {}", finished.title());
            return Some(finished);
        }

        if std::mem::take(&mut self.skip_history_once) {
            debug!("⏮️ Historial omitido una vez para: {}", finished.title());
        } else {
            self.push_history(finished.clone());
        }

        if self.loop_mode == LoopMode::Queue {
            info!("🔁 Track agregado al final por loop de cola: {}", finished.title());
            self.items.push_back(finished);
        }

        self.dequeue_next()
    }

    /// Siguiente pista cuando la actual no se pudo adquirir: sin loop ni historial
    pub fn skip_failed(&mut self) -> Option<TrackRecord> {
        self.current = None;
        self.skip_requested = false;
        self.dequeue_next()
    }

    /// El próximo avance no repetirá la pista aunque el loop sea `track`
    pub fn request_skip(&mut self) {
        self.skip_requested = true;
    }

    pub fn mark_skip_history_once(&mut self) {
        self.skip_history_once = true;
    }

    /// Saca la entrada más reciente del historial
    pub fn pop_history(&mut self) -> Option<TrackRecord> {
        self.history.pop_back()
    }

    /// Historial, la más reciente primero
    pub fn history(&self) -> Vec<TrackRecord> {
        self.history.iter().rev().cloned().collect()
    }

    pub fn pending(&self) -> Vec<TrackRecord> {
        self.items.iter().cloned().collect()
    }

    pub fn len(&self) -> usize {
        self.items.len()
    }

    /// Obtiene información de la cola
    pub fn get_info(&self) -> QueueInfo {
        QueueInfo {
            current: self.current.clone(),
            items: self.pending(),
            total_items: self.items.len(),
            loop_mode: self.loop_mode,
            total_duration: self.calculate_total_duration(),
        }
    }

    // Funciones privadas

    fn push_history(&mut self, track: TrackRecord) {
        self.history.push_back(track);

        // Mantener solo los últimos N items
        while self.history.len() > self.history_capacity {
            self.history.pop_front();
        }
    }

    fn calculate_total_duration(&self) -> Duration {
        let queue_duration: Duration = self.items.iter().filter_map(|item| item.duration()).sum();

        let current_duration = self
            .current
            .as_ref()
            .and_then(|c| c.duration())
            .unwrap_or_default();

        queue_duration + current_duration
    }
}

#[derive(Debug, Clone)]
pub struct QueueInfo {
    pub current: Option<TrackRecord>,
    pub items: Vec<TrackRecord>,
    pub total_items: usize,
    pub loop_mode: LoopMode,
    pub total_duration: Duration,
}

impl QueueInfo {
    /// Obtiene una página específica de la cola
    pub fn get_page(&self, page: usize, items_per_page: usize) -> QueuePage {
        let items_per_page = items_per_page.max(1);
        let safe_page = page.max(1);
        let start = (safe_page - 1) * items_per_page;
        let end = (start + items_per_page).min(self.items.len());
        let total_pages = if self.total_items == 0 {
            1
        } else {
            self.total_items.div_ceil(items_per_page)
        };

        QueuePage {
            items: if start < self.items.len() {
                self.items[start..end].to_vec()
            } else {
                Vec::new()
            },
            current_page: safe_page,
            total_pages,
            remaining: self.items.len().saturating_sub(end),
        }
    }
}

#[derive(Debug, Clone)]
pub struct QueuePage {
    pub items: Vec<TrackRecord>,
    pub current_page: usize,
    pub total_pages: usize,
    pub remaining: usize,
}
