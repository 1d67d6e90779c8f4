use serenity::model::id::UserId;
use std::time::Duration;

use crate::sources::ResolvedTrack;

/// Una pista reproducible por sí sola: locators y metadata de display.
///
/// Inmutable por convención; sólo el stream locator cambia cuando se refresca.
#[derive(Debug, Clone, PartialEq)]
pub struct TrackRecord {
    stream_url: String,
    page_url: Option<String>,
    title: String,
    duration: Option<Duration>,
    thumbnail: Option<String>,
    requested_by: UserId,
}

impl TrackRecord {
    pub fn new(title: String, stream_url: String, requested_by: UserId) -> Self {
        Self {
            stream_url,
            page_url: None,
            title,
            duration: None,
            thumbnail: None,
            requested_by,
        }
    }

    /// Construye el registro a partir del resultado del lookup
    pub fn from_resolved(resolved: ResolvedTrack, requested_by: UserId) -> Self {
        let mut track = Self::new(resolved.title, resolved.stream_url, requested_by)
            .with_page_url(resolved.page_url);

        if let Some(duration) = resolved.duration {
            track = track.with_duration(duration);
        }
        if let Some(thumbnail) = resolved.thumbnail {
            track = track.with_thumbnail(thumbnail);
        }

        track
    }

    // Getters
    pub fn stream_url(&self) -> &str {
        &self.stream_url
    }
    pub fn page_url(&self) -> Option<&str> {
        self.page_url.as_deref()
    }
    pub fn title(&self) -> &str {
        &self.title
    }
    pub fn duration(&self) -> Option<Duration> {
        self.duration
    }
    pub fn thumbnail(&self) -> Option<&str> {
        self.thumbnail.as_deref()
    }
    pub fn requested_by(&self) -> UserId {
        self.requested_by
    }

    /// URL estable para mostrar o registrar; cae al stream si no hay página
    pub fn display_url(&self) -> &str {
        self.page_url.as_deref().unwrap_or(&self.stream_url)
    }

    // Builders
    pub fn with_page_url(mut self, page_url: String) -> Self {
        self.page_url = Some(page_url);
        self
    }

    pub fn with_duration(mut self, duration: Duration) -> Self {
        self.duration = Some(duration);
        self
    }

    pub fn with_thumbnail(mut self, thumbnail: String) -> Self {
        self.thumbnail = Some(thumbnail);
        self
    }

    /// Reemplaza el stream locator tras un refresh exitoso
    pub(crate) fn set_stream_url(&mut self, stream_url: String) {
        self.stream_url = stream_url;
    }
}
