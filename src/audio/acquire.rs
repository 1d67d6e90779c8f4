use std::{sync::Arc, time::Duration};
use tokio::time::timeout;
use tracing::{debug, info, warn};

use super::{
    source::{AudioSource, Decoder},
    track::TrackRecord,
};
use crate::{
    error::{PlaybackError, PlaybackResult},
    sources::LookupService,
};

/// Abre fuentes de audio con un único refresh del locator ante fallos.
///
/// Toda llamada externa (decoder y lookup) está acotada por `timeout`; un
/// timeout cuenta como fallo de adquisición.
pub struct SourceAcquirer {
    decoder: Arc<dyn Decoder>,
    lookup: Arc<dyn LookupService>,
    timeout: Duration,
}

impl SourceAcquirer {
    pub fn new(decoder: Arc<dyn Decoder>, lookup: Arc<dyn LookupService>, timeout: Duration) -> Self {
        Self {
            decoder,
            lookup,
            timeout,
        }
    }

    pub fn lookup(&self) -> &Arc<dyn LookupService> {
        &self.lookup
    }

    pub fn timeout(&self) -> Duration {
        self.timeout
    }

    /// Abre la pista desde el inicio. Si falla y hay página, refresca una vez
    /// y reintenta una vez. Un refresh exitoso queda guardado en `track`.
    pub async fn acquire(&self, track: &mut TrackRecord) -> PlaybackResult<AudioSource> {
        self.acquire_with_refresh(track, None, false).await
    }

    /// Igual que `acquire` pero refresca siempre antes de abrir en `offset`
    pub async fn acquire_for_seek(
        &self,
        track: &mut TrackRecord,
        offset: Duration,
    ) -> PlaybackResult<AudioSource> {
        self.acquire_with_refresh(track, Some(offset), true).await
    }

    async fn acquire_with_refresh(
        &self,
        track: &mut TrackRecord,
        start_at: Option<Duration>,
        refresh_first: bool,
    ) -> PlaybackResult<AudioSource> {
        let mut refreshed = false;

        if refresh_first {
            refreshed = self.refresh_locator(track).await;
        }

        let first_error = match self.open(track.stream_url(), start_at).await {
            Ok(source) => return Ok(source),
            Err(e) => e,
        };

        warn!(
            "⚠️ {} ({})",
            PlaybackError::TransientAcquisition(first_error.clone()),
            track.title()
        );

        // a lo sumo un refresh por adquisición
        if refreshed || !self.refresh_locator(track).await {
            return Err(PlaybackError::TerminalAcquisition(format!(
                "{}: {}",
                track.title(),
                first_error
            )));
        }

        self.open(track.stream_url(), start_at).await.map_err(|e| {
            PlaybackError::TerminalAcquisition(format!("{}: {}", track.title(), e))
        })
    }

    async fn open(&self, locator: &str, start_at: Option<Duration>) -> Result<AudioSource, String> {
        match timeout(self.timeout, self.decoder.open(locator, start_at)).await {
            Ok(Ok(source)) => Ok(source),
            Ok(Err(e)) => Err(format!("{:#}", e)),
            Err(_) => Err(format!("timeout tras {:?}", self.timeout)),
        }
    }

    /// Pide un locator fresco a partir de la página; devuelve si se actualizó
    async fn refresh_locator(&self, track: &mut TrackRecord) -> bool {
        let Some(page_url) = track.page_url().map(str::to_string) else {
            debug!("Sin página para refrescar: {}", track.title());
            return false;
        };

        match timeout(self.timeout, self.lookup.refresh(&page_url)).await {
            Ok(Ok(Some(stream_url))) => {
                info!("🔄 Locator refrescado para: {}", track.title());
                track.set_stream_url(stream_url);
                true
            }
            Ok(Ok(None)) => {
                warn!("⚠️ El refresh no devolvió stream para: {}", track.title());
                false
            }
            Ok(Err(e)) => {
                warn!("⚠️ Error refrescando {}: {:?}", track.title(), e);
                false
            }
            Err(_) => {
                warn!("⏱️ Timeout refrescando: {}", track.title());
                false
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::audio::{source::MockDecoder, testing::fake_source};
    use crate::sources::MockLookupService;
    use async_trait::async_trait;
    use pretty_assertions::assert_eq;
    use serenity::model::id::UserId;

    fn track_with_page() -> TrackRecord {
        TrackRecord::new("Song".into(), "https://stream/old".into(), UserId::new(1))
            .with_page_url("https://www.youtube.com/watch?v=abc".into())
    }

    fn acquirer(decoder: impl Decoder + 'static, lookup: MockLookupService) -> SourceAcquirer {
        SourceAcquirer::new(Arc::new(decoder), Arc::new(lookup), Duration::from_secs(30))
    }

    #[tokio::test]
    async fn opens_directly_without_refresh() {
        let mut decoder = MockDecoder::new();
        decoder
            .expect_open()
            .times(1)
            .returning(|locator, start_at| Ok(fake_source(locator, start_at)));
        let mut lookup = MockLookupService::new();
        lookup.expect_refresh().times(0);

        let mut track = track_with_page();
        let source = acquirer(decoder, lookup).acquire(&mut track).await.expect("abre");

        assert_eq!(source.locator(), "https://stream/old");
        assert_eq!(track.stream_url(), "https://stream/old");
    }

    #[tokio::test]
    async fn refreshes_once_and_keeps_fresh_locator() {
        let mut decoder = MockDecoder::new();
        decoder.expect_open().times(2).returning(|locator, start_at| {
            if locator.ends_with("/old") {
                Err(anyhow::anyhow!("403 Forbidden"))
            } else {
                Ok(fake_source(locator, start_at))
            }
        });
        let mut lookup = MockLookupService::new();
        lookup
            .expect_refresh()
            .times(1)
            .returning(|_| Ok(Some("https://stream/fresh".to_string())));

        let mut track = track_with_page();
        let source = acquirer(decoder, lookup).acquire(&mut track).await.expect("reintento");

        assert_eq!(source.locator(), "https://stream/fresh");
        assert_eq!(track.stream_url(), "https://stream/fresh");
    }

    #[tokio::test]
    async fn second_failure_is_terminal() {
        let mut decoder = MockDecoder::new();
        decoder
            .expect_open()
            .times(2)
            .returning(|_, _| Err(anyhow::anyhow!("connection reset")));
        let mut lookup = MockLookupService::new();
        lookup
            .expect_refresh()
            .times(1)
            .returning(|_| Ok(Some("https://stream/fresh".to_string())));

        let mut track = track_with_page();
        let result = acquirer(decoder, lookup).acquire(&mut track).await;

        assert!(matches!(result, Err(PlaybackError::TerminalAcquisition(_))));
    }

    #[tokio::test]
    async fn without_page_locator_fails_after_one_attempt() {
        let mut decoder = MockDecoder::new();
        decoder
            .expect_open()
            .times(1)
            .returning(|_, _| Err(anyhow::anyhow!("404")));
        let mut lookup = MockLookupService::new();
        lookup.expect_refresh().times(0);

        let mut track = TrackRecord::new("Direct".into(), "https://cdn/file.mp3".into(), UserId::new(1));
        let result = acquirer(decoder, lookup).acquire(&mut track).await;

        assert!(matches!(result, Err(PlaybackError::TerminalAcquisition(_))));
    }

    #[tokio::test]
    async fn seek_refreshes_before_opening_at_offset() {
        let mut decoder = MockDecoder::new();
        decoder.expect_open().times(1).returning(|locator, start_at| {
            if locator.ends_with("/fresh") && start_at == Some(Duration::from_secs(90)) {
                Ok(fake_source(locator, start_at))
            } else {
                Err(anyhow::anyhow!("locator inesperado: {locator}"))
            }
        });
        let mut lookup = MockLookupService::new();
        lookup
            .expect_refresh()
            .times(1)
            .returning(|_| Ok(Some("https://stream/fresh".to_string())));

        let mut track = track_with_page();
        let source = acquirer(decoder, lookup)
            .acquire_for_seek(&mut track, Duration::from_secs(90))
            .await
            .expect("seek abre");

        assert_eq!(source.start_at(), Some(Duration::from_secs(90)));
        assert_eq!(track.stream_url(), "https://stream/fresh");
    }

    #[tokio::test]
    async fn seek_does_not_refresh_twice() {
        let mut decoder = MockDecoder::new();
        decoder
            .expect_open()
            .times(1)
            .returning(|_, _| Err(anyhow::anyhow!("expired")));
        let mut lookup = MockLookupService::new();
        lookup
            .expect_refresh()
            .times(1)
            .returning(|_| Ok(Some("https://stream/fresh".to_string())));

        let mut track = track_with_page();
        let result = acquirer(decoder, lookup)
            .acquire_for_seek(&mut track, Duration::from_secs(10))
            .await;

        assert!(matches!(result, Err(PlaybackError::TerminalAcquisition(_))));
    }

    struct StalledDecoder;

    #[async_trait]
    impl Decoder for StalledDecoder {
        async fn open(&self, _locator: &str, _start_at: Option<Duration>) -> anyhow::Result<AudioSource> {
            std::future::pending().await
        }
    }

    #[tokio::test(start_paused = true)]
    async fn stalled_decoder_counts_as_failure() {
        let mut lookup = MockLookupService::new();
        lookup.expect_refresh().times(1).returning(|_| Ok(None));

        let mut track = track_with_page();
        let result = acquirer(StalledDecoder, lookup).acquire(&mut track).await;

        assert!(matches!(result, Err(PlaybackError::TerminalAcquisition(_))));
        assert_eq!(track.stream_url(), "https://stream/old");
    }
}
