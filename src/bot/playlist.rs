use futures::future::join_all;
use serenity::model::id::UserId;
use std::time::Duration;
use tokio::time::timeout;
use tracing::{debug, info, warn};

use crate::{
    audio::{StartOutcome, TrackRecord},
    error::{PlaybackError, PlaybackResult},
    sources::{CatalogEntry, LookupService},
};

const BATCH_SIZE: usize = 5;
const FIRST_ATTEMPTS: usize = 2;

/// Resultado de cargar el resto de una colección
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct BatchSummary {
    pub added: usize,
    pub failed: usize,
}

impl BatchSummary {
    pub fn message(&self) -> String {
        if self.failed == 0 {
            format!("📋 {} canciones agregadas", self.added)
        } else {
            format!("📋 {} canciones agregadas ({} fallaron)", self.added, self.failed)
        }
    }
}

/// Busca la entrada del catálogo en el lookup
pub async fn resolve_entry(
    lookup: &dyn LookupService,
    entry: &CatalogEntry,
    requested_by: UserId,
    limit: Duration,
) -> Option<TrackRecord> {
    let resolved = match timeout(limit, lookup.resolve(&entry.search_term)).await {
        Ok(Ok(Some(resolved))) => resolved,
        Ok(Ok(None)) => {
            debug!("🔍 Sin resultados para: {}", entry.search_term);
            return None;
        }
        Ok(Err(e)) => {
            warn!("❌ Error buscando {}: {}", entry.search_term, e);
            return None;
        }
        Err(_) => {
            warn!("⏱️ Timeout buscando: {}", entry.search_term);
            return None;
        }
    };

    let mut track = TrackRecord::from_resolved(resolved, requested_by);
    if track.thumbnail().is_none() {
        if let Some(thumbnail) = &entry.thumbnail {
            track = track.with_thumbnail(thumbnail.clone());
        }
    }
    if track.duration().is_none() {
        if let Some(duration) = entry.duration {
            track = track.with_duration(duration);
        }
    }
    Some(track)
}

/// Primera entrada reproducible entre las dos primeras; devuelve su índice
pub async fn resolve_first(
    lookup: &dyn LookupService,
    entries: &[CatalogEntry],
    requested_by: UserId,
    limit: Duration,
) -> Option<(usize, TrackRecord)> {
    for (index, entry) in entries.iter().enumerate().take(FIRST_ATTEMPTS) {
        if let Some(track) = resolve_entry(lookup, entry, requested_by, limit).await {
            return Some((index, track));
        }
    }
    None
}

/// Resuelve `entries` en lotes de cinco y entrega cada pista en orden.
///
/// Si `enqueue` devuelve `QueueFull` lo que queda se cuenta como fallido.
/// Con `SessionEnded` se deja de cargar sin contar el resto.
pub async fn feed_in_batches(
    lookup: &dyn LookupService,
    entries: Vec<CatalogEntry>,
    requested_by: UserId,
    limit: Duration,
    mut enqueue: impl FnMut(TrackRecord) -> PlaybackResult<StartOutcome>,
) -> BatchSummary {
    let mut summary = BatchSummary::default();
    let total = entries.len();

    for (batch_index, batch) in entries.chunks(BATCH_SIZE).enumerate() {
        let resolved = join_all(
            batch
                .iter()
                .map(|entry| resolve_entry(lookup, entry, requested_by, limit)),
        )
        .await;

        for track in resolved {
            let Some(track) = track else {
                summary.failed += 1;
                continue;
            };
            match enqueue(track) {
                Ok(_) => summary.added += 1,
                Err(PlaybackError::QueueFull(max)) => {
                    warn!("📋 Cola llena ({}), se descarta el resto de la colección", max);
                    summary.failed = total - summary.added;
                    return summary;
                }
                Err(PlaybackError::SessionEnded) => {
                    info!("⏹️ Reproducción detenida, se deja de cargar la colección");
                    return summary;
                }
                Err(e) => {
                    warn!("❌ No se pudo encolar: {}", e);
                    summary.failed += 1;
                }
            }
        }

        debug!("📦 Lote {} procesado: {:?}", batch_index + 1, summary);
    }

    summary
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sources::{MockLookupService, ResolvedTrack};
    use pretty_assertions::assert_eq;

    fn entry(term: &str) -> CatalogEntry {
        CatalogEntry {
            title: term.to_string(),
            search_term: term.to_string(),
            duration: Some(Duration::from_secs(200)),
            thumbnail: Some("https://i.scdn.co/cover.jpg".to_string()),
        }
    }

    /// Resuelve todo salvo los términos que empiezan con "bad"
    fn lookup() -> MockLookupService {
        let mut lookup = MockLookupService::new();
        lookup.expect_resolve().returning(|query| {
            if query.starts_with("bad") {
                return Ok(None);
            }
            Ok(Some(ResolvedTrack {
                stream_url: format!("https://stream.example/{query}"),
                page_url: format!("https://www.youtube.com/watch?v={query}"),
                title: query.to_string(),
                duration: None,
                thumbnail: None,
            }))
        });
        lookup
    }

    #[tokio::test]
    async fn resolved_entry_keeps_catalog_metadata_as_fallback() {
        let track = resolve_entry(&lookup(), &entry("song"), UserId::new(1), Duration::from_secs(5))
            .await
            .expect("resuelta");

        assert_eq!(track.stream_url(), "https://stream.example/song");
        assert_eq!(track.duration(), Some(Duration::from_secs(200)));
        assert_eq!(track.thumbnail(), Some("https://i.scdn.co/cover.jpg"));
    }

    #[tokio::test]
    async fn first_playable_falls_back_to_second_entry_only() {
        let lookup = lookup();
        let entries = vec![entry("bad-1"), entry("ok-2"), entry("ok-3")];

        let (index, track) = resolve_first(&lookup, &entries, UserId::new(1), Duration::from_secs(5))
            .await
            .expect("segunda entrada");
        assert_eq!(index, 1);
        assert_eq!(track.title(), "ok-2");

        let entries = vec![entry("bad-1"), entry("bad-2"), entry("ok-3")];
        assert!(resolve_first(&lookup, &entries, UserId::new(1), Duration::from_secs(5))
            .await
            .is_none());
    }

    #[tokio::test]
    async fn feeds_in_order_and_counts_failures() {
        let entries: Vec<CatalogEntry> = (1..=12)
            .map(|i| if i % 4 == 0 { entry(&format!("bad-{i}")) } else { entry(&format!("ok-{i}")) })
            .collect();

        let mut fed = Vec::new();
        let summary = feed_in_batches(&lookup(), entries, UserId::new(1), Duration::from_secs(5), |track| {
            fed.push(track.title().to_string());
            Ok(StartOutcome::Enqueued { position: fed.len() })
        })
        .await;

        assert_eq!(summary, BatchSummary { added: 9, failed: 3 });
        assert_eq!(fed[..4], ["ok-1", "ok-2", "ok-3", "ok-5"]);
        assert_eq!(summary.message(), "📋 9 canciones agregadas (3 fallaron)");
    }

    #[tokio::test]
    async fn queue_full_stops_feeding() {
        let entries: Vec<CatalogEntry> = (1..=8).map(|i| entry(&format!("ok-{i}"))).collect();

        let mut accepted = 0;
        let summary = feed_in_batches(&lookup(), entries, UserId::new(1), Duration::from_secs(5), |_| {
            if accepted == 3 {
                return Err(PlaybackError::QueueFull(3));
            }
            accepted += 1;
            Ok(StartOutcome::Enqueued { position: accepted })
        })
        .await;

        assert_eq!(summary, BatchSummary { added: 3, failed: 5 });
    }

    #[tokio::test]
    async fn ended_session_stops_feeding_without_counting_rest() {
        let entries: Vec<CatalogEntry> = (1..=12).map(|i| entry(&format!("ok-{i}"))).collect();

        let mut offered = 0;
        let summary = feed_in_batches(&lookup(), entries, UserId::new(1), Duration::from_secs(5), |_| {
            offered += 1;
            if offered > 2 {
                return Err(PlaybackError::SessionEnded);
            }
            Ok(StartOutcome::Enqueued { position: offered })
        })
        .await;

        assert_eq!(summary, BatchSummary { added: 2, failed: 0 });
        assert_eq!(offered, 3);
    }
}
