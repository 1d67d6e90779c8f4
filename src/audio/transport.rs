//! Contrato con el transporte de voz y el aviso de fin de pista.
//!
//! El driver de voz corre fuera del scheduler de tareas; el fin de una pista
//! vuelve al Player Loop como un mensaje por canal, nunca como mutación directa.

use async_trait::async_trait;
use tokio::sync::mpsc;
use tracing::debug;

use super::source::AudioSource;
use crate::error::PlaybackResult;

/// Fin de una reproducción iniciada con `start`
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Completion {
    pub epoch: u64,
    pub error: Option<String>,
}

/// Aviso de un solo uso asociado a un `start`.
///
/// `fire` consume el valor, así cada `start` produce como máximo un
/// `Completion`. El `epoch` permite al loop descartar avisos de fuentes viejas.
#[derive(Debug)]
pub struct CompletionSignal {
    epoch: u64,
    tx: mpsc::UnboundedSender<Completion>,
}

impl CompletionSignal {
    pub fn new(epoch: u64, tx: mpsc::UnboundedSender<Completion>) -> Self {
        Self { epoch, tx }
    }

    pub fn fire(self, error: Option<String>) {
        let completion = Completion {
            epoch: self.epoch,
            error,
        };
        // el loop puede haber terminado ya; no es un error
        if self.tx.send(completion).is_err() {
            debug!("Aviso de fin descartado (epoch {}): loop terminado", self.epoch);
        }
    }
}

/// Transporte de audio de una guild.
///
/// `start` entrega la fuente y la señal; la señal se dispara exactamente una
/// vez cuando la reproducción termina, ya sea por fin natural, `stop` o error.
#[async_trait]
pub trait AudioTransport: Send + Sync {
    async fn start(&self, source: AudioSource, on_complete: CompletionSignal) -> PlaybackResult<()>;
    async fn stop(&self);
    async fn pause(&self) -> bool;
    async fn resume(&self) -> bool;
    async fn is_playing(&self) -> bool;
    async fn is_paused(&self) -> bool;
    async fn is_connected(&self) -> bool;
    async fn disconnect(&self) -> anyhow::Result<()>;
}
