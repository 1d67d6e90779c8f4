use parking_lot::Mutex;
use std::{
    future::Future,
    sync::{
        atomic::{AtomicU64, Ordering},
        Arc,
    },
    time::Duration,
};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use super::player::{GuildPlayback, PlaybackManager};

/// Temporizador de inactividad de una guild. Como máximo uno armado.
#[derive(Default)]
pub struct IdleTimer {
    slot: Mutex<Option<(u64, JoinHandle<()>)>>,
    next_id: AtomicU64,
}

impl IdleTimer {
    /// Arma el temporizador; cancela el anterior si existía.
    ///
    /// `task` recibe el id del temporizador para poder liberarse con
    /// [`IdleTimer::release`] sin abortarse a sí mismo.
    pub fn arm<F, Fut>(&self, window: Duration, task: F)
    where
        F: FnOnce(u64) -> Fut,
        Fut: Future<Output = ()> + Send + 'static,
    {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed) + 1;
        let fire = task(id);
        let handle = tokio::spawn(async move {
            tokio::time::sleep(window).await;
            fire.await;
        });

        if let Some((old_id, old)) = self.slot.lock().replace((id, handle)) {
            debug!("⏲️ Temporizador {} reemplazado por {}", old_id, id);
            old.abort();
        }
    }

    /// Cancela el temporizador armado. Devuelve si había uno.
    pub fn disarm(&self) -> bool {
        match self.slot.lock().take() {
            Some((id, handle)) => {
                debug!("⏲️ Temporizador {} cancelado", id);
                handle.abort();
                true
            }
            None => false,
        }
    }

    /// Libera el slot si todavía pertenece a `id`, sin abortar la tarea
    pub fn release(&self, id: u64) {
        let mut slot = self.slot.lock();
        if slot.as_ref().is_some_and(|(armed, _)| *armed == id) {
            slot.take();
        }
    }

    pub fn is_armed(&self) -> bool {
        self.slot.lock().is_some()
    }
}

impl PlaybackManager {
    /// Arma el monitor de inactividad tras quedar la guild sin pistas
    pub(super) fn arm_inactivity(&self, guild: &Arc<GuildPlayback>) {
        let window = self.settings().inactivity_timeout;
        let manager = self.clone();
        let target = Arc::clone(guild);

        info!(
            "⏲️ Guild {} inactiva; desconexión en {:?} si nada suena",
            guild.guild_id(),
            window
        );
        guild
            .idle_timer()
            .arm(window, move |id| async move { manager.on_inactivity(target, id).await });
    }

    async fn on_inactivity(&self, guild: Arc<GuildPlayback>, id: u64) {
        guild.idle_timer().release(id);

        if guild.is_running() {
            debug!("Guild {} volvió a reproducir; no se desconecta", guild.guild_id());
            return;
        }

        let Some(target) = guild.target() else {
            return;
        };

        let transport = &target.transport;
        if !transport.is_connected().await {
            debug!("Guild {} ya está desconectada", guild.guild_id());
            return;
        }
        if transport.is_playing().await || transport.is_paused().await {
            debug!("Guild {} tiene audio activo; no se desconecta", guild.guild_id());
            return;
        }

        info!("💤 Desconectando guild {} por inactividad", guild.guild_id());
        self.announcer()
            .notice(target.announce_channel, "💤 Desconectado por inactividad")
            .await;

        if let Err(e) = transport.disconnect().await {
            warn!("⚠️ Error al desconectar guild {}: {:?}", guild.guild_id(), e);
        }

        self.clear(guild.guild_id()).await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicUsize;

    #[tokio::test(start_paused = true)]
    async fn arming_replaces_previous_timer() {
        let timer = IdleTimer::default();
        let fired = Arc::new(AtomicUsize::new(0));

        for _ in 0..3 {
            let fired = Arc::clone(&fired);
            timer.arm(Duration::from_secs(300), move |_| async move {
                fired.fetch_add(1, Ordering::SeqCst);
            });
        }

        tokio::time::sleep(Duration::from_secs(301)).await;
        assert_eq!(fired.load(Ordering::SeqCst), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn disarm_prevents_firing() {
        let timer = IdleTimer::default();
        let fired = Arc::new(AtomicUsize::new(0));

        let counter = Arc::clone(&fired);
        timer.arm(Duration::from_secs(300), move |_| async move {
            counter.fetch_add(1, Ordering::SeqCst);
        });

        tokio::time::sleep(Duration::from_secs(299)).await;
        assert!(timer.disarm());
        assert!(!timer.disarm());

        tokio::time::sleep(Duration::from_secs(10)).await;
        assert_eq!(fired.load(Ordering::SeqCst), 0);
        assert!(!timer.is_armed());
    }

    #[tokio::test(start_paused = true)]
    async fn release_only_clears_matching_timer() {
        let timer = IdleTimer::default();
        timer.arm(Duration::from_secs(300), |_| async {});
        timer.arm(Duration::from_secs(300), |_| async {});

        timer.release(1);
        assert!(timer.is_armed());

        timer.release(2);
        assert!(!timer.is_armed());
    }
}
