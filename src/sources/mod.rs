pub mod spotify;
pub mod youtube;

use anyhow::Result;
use async_trait::async_trait;
use std::time::Duration;

pub use spotify::{SpotifyCatalog, SpotifyLink};
pub use youtube::YtDlpLookup;

/// Resultado de resolver una búsqueda o URL a algo reproducible
#[derive(Debug, Clone, PartialEq)]
pub struct ResolvedTrack {
    pub stream_url: String,
    pub page_url: String,
    pub title: String,
    pub duration: Option<Duration>,
    pub thumbnail: Option<String>,
}

/// Servicio de lookup: término/URL → stream locator
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait LookupService: Send + Sync {
    /// `Ok(None)` cuando no hay resultados
    async fn resolve(&self, query: &str) -> Result<Option<ResolvedTrack>>;

    /// Deriva un stream locator fresco desde el locator de página
    async fn refresh(&self, page_url: &str) -> Result<Option<String>>;
}

/// Tipo de colección en el catálogo
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CollectionKind {
    Track,
    Playlist,
    Album,
}

/// Identificador de una colección (playlist, álbum o pista suelta)
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CollectionRef {
    pub kind: CollectionKind,
    pub id: String,
}

/// Entrada del catálogo; se reproduce buscando `search_term` en el lookup
#[derive(Debug, Clone, PartialEq)]
pub struct CatalogEntry {
    pub title: String,
    pub search_term: String,
    pub duration: Option<Duration>,
    pub thumbnail: Option<String>,
}

/// Servicio de catálogo: colección → lista ordenada de entradas
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait CatalogService: Send + Sync {
    async fn expand_collection(&self, collection: &CollectionRef) -> Result<Vec<CatalogEntry>>;
}

/// Verifica si el input es una URL http(s)
pub fn is_url(query: &str) -> bool {
    url::Url::parse(query)
        .map(|parsed| matches!(parsed.scheme(), "http" | "https"))
        .unwrap_or(false)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn detects_http_urls_only() {
        assert!(is_url("https://www.youtube.com/watch?v=dQw4w9WgXcQ"));
        assert!(is_url("http://example.com/song.mp3"));
        assert!(!is_url("never gonna give you up"));
        assert!(!is_url("ftp://example.com/song.mp3"));
    }
}
