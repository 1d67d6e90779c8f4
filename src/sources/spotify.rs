use anyhow::{Context, Result};
use async_trait::async_trait;
use base64::{engine::general_purpose::STANDARD, Engine as _};
use regex::Regex;
use reqwest::Client;
use serde::{de::DeserializeOwned, Deserialize};
use std::{
    sync::LazyLock,
    time::{Duration, Instant},
};
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

use super::{CatalogEntry, CatalogService, CollectionKind, CollectionRef};

const API_BASE: &str = "https://api.spotify.com/v1";
const TOKEN_URL: &str = "https://accounts.spotify.com/api/token";

static LINK_PATTERN: LazyLock<Option<Regex>> = LazyLock::new(|| {
    Regex::new(r"open\.spotify\.com/(?:intl-[a-z]+/)?(track|playlist|album)/([a-zA-Z0-9]+)").ok()
});

/// Link de Spotify reconocido en el input del usuario
pub struct SpotifyLink;

impl SpotifyLink {
    /// Extrae tipo e id de un link `open.spotify.com`
    pub fn parse(input: &str) -> Option<CollectionRef> {
        let captures = LINK_PATTERN.as_ref()?.captures(input)?;
        let kind = match &captures[1] {
            "track" => CollectionKind::Track,
            "playlist" => CollectionKind::Playlist,
            "album" => CollectionKind::Album,
            _ => return None,
        };

        Some(CollectionRef {
            kind,
            id: captures[2].to_string(),
        })
    }
}

/// Cliente del catálogo de Spotify con client credentials
pub struct SpotifyCatalog {
    client: Client,
    client_id: String,
    client_secret: String,
    market: String,
    token: Mutex<Option<CachedToken>>,
}

struct CachedToken {
    value: String,
    expires_at: Instant,
}

#[derive(Debug, Deserialize)]
struct TokenResponse {
    access_token: String,
    expires_in: u64,
}

#[derive(Debug, Deserialize)]
struct SpotifyTrack {
    name: Option<String>,
    #[serde(default)]
    artists: Vec<SpotifyArtist>,
    duration_ms: Option<u64>,
    album: Option<SpotifyAlbumRef>,
}

#[derive(Debug, Deserialize)]
struct SpotifyArtist {
    name: Option<String>,
}

#[derive(Debug, Deserialize)]
struct SpotifyAlbumRef {
    #[serde(default)]
    images: Vec<SpotifyImage>,
}

#[derive(Debug, Deserialize)]
struct SpotifyImage {
    url: String,
}

#[derive(Debug, Deserialize)]
struct Paging<T> {
    #[serde(default = "Vec::new")]
    items: Vec<T>,
    next: Option<String>,
}

#[derive(Debug, Deserialize)]
struct PlaylistItem {
    track: Option<SpotifyTrack>,
}

#[derive(Debug, Deserialize)]
struct SpotifyAlbum {
    #[serde(default)]
    images: Vec<SpotifyImage>,
    tracks: Paging<SpotifyTrack>,
}

impl SpotifyCatalog {
    pub fn new(client_id: String, client_secret: String, market: String) -> Self {
        Self {
            client: Client::new(),
            client_id,
            client_secret,
            market,
            token: Mutex::new(None),
        }
    }

    async fn access_token(&self) -> Result<String> {
        let mut cached = self.token.lock().await;

        if let Some(token) = cached.as_ref() {
            if token.expires_at > Instant::now() {
                return Ok(token.value.clone());
            }
        }

        debug!("🔑 Solicitando token de Spotify");
        let credentials = STANDARD.encode(format!("{}:{}", self.client_id, self.client_secret));

        let response: TokenResponse = self
            .client
            .post(TOKEN_URL)
            .header("Authorization", format!("Basic {}", credentials))
            .form(&[("grant_type", "client_credentials")])
            .send()
            .await
            .context("Error al pedir token de Spotify")?
            .error_for_status()?
            .json()
            .await?;

        // margen para no usar un token a punto de expirar
        let lifetime = Duration::from_secs(response.expires_in.saturating_sub(60));
        *cached = Some(CachedToken {
            value: response.access_token.clone(),
            expires_at: Instant::now() + lifetime,
        });

        Ok(response.access_token)
    }

    async fn get<T: DeserializeOwned>(&self, url: &str) -> Result<T> {
        let token = self.access_token().await?;

        let response = self
            .client
            .get(url)
            .bearer_auth(token)
            .query(&[("market", self.market.as_str())])
            .send()
            .await
            .with_context(|| format!("Error al consultar Spotify: {}", url))?
            .error_for_status()?;

        Ok(response.json().await?)
    }

    async fn fetch_track(&self, id: &str) -> Result<Vec<CatalogEntry>> {
        let track: SpotifyTrack = self.get(&format!("{}/tracks/{}", API_BASE, id)).await?;
        Ok(vec![entry_from_track(&track, None)])
    }

    async fn fetch_playlist(&self, id: &str) -> Result<Vec<CatalogEntry>> {
        let mut entries = Vec::new();
        let mut next = Some(format!("{}/playlists/{}/tracks?limit=100", API_BASE, id));

        while let Some(url) = next {
            let page: Paging<PlaylistItem> = self.get(&url).await?;
            entries.extend(
                page.items
                    .iter()
                    .filter_map(|item| item.track.as_ref())
                    .map(|track| entry_from_track(track, None)),
            );
            next = page.next;
        }

        info!("✅ {} canciones cargadas de la playlist", entries.len());
        Ok(entries)
    }

    async fn fetch_album(&self, id: &str) -> Result<Vec<CatalogEntry>> {
        let album: SpotifyAlbum = self.get(&format!("{}/albums/{}", API_BASE, id)).await?;
        let cover = album.images.first().map(|image| image.url.clone());

        let mut entries: Vec<CatalogEntry> = album
            .tracks
            .items
            .iter()
            .map(|track| entry_from_track(track, cover.clone()))
            .collect();

        let mut next = album.tracks.next;
        while let Some(url) = next {
            let page: Paging<SpotifyTrack> = self.get(&url).await?;
            entries.extend(page.items.iter().map(|track| entry_from_track(track, cover.clone())));
            next = page.next;
        }

        info!("✅ {} canciones cargadas del álbum", entries.len());
        Ok(entries)
    }
}

#[async_trait]
impl CatalogService for SpotifyCatalog {
    async fn expand_collection(&self, collection: &CollectionRef) -> Result<Vec<CatalogEntry>> {
        let result = match collection.kind {
            CollectionKind::Track => self.fetch_track(&collection.id).await,
            CollectionKind::Playlist => self.fetch_playlist(&collection.id).await,
            CollectionKind::Album => self.fetch_album(&collection.id).await,
        };

        if let Err(e) = &result {
            warn!("❌ Error consultando Spotify {:?} {}: {:?}", collection.kind, collection.id, e);
        }
        result
    }
}

/// Título `artista - nombre`; es también el término de búsqueda
fn entry_from_track(track: &SpotifyTrack, fallback_cover: Option<String>) -> CatalogEntry {
    let artist = track
        .artists
        .first()
        .and_then(|a| a.name.as_deref())
        .unwrap_or("Unknown");
    let name = track.name.as_deref().unwrap_or("Unknown");
    let title = format!("{} - {}", artist, name);

    let thumbnail = track
        .album
        .as_ref()
        .and_then(|album| album.images.first())
        .map(|image| image.url.clone())
        .or(fallback_cover);

    CatalogEntry {
        search_term: title.clone(),
        title,
        duration: track
            .duration_ms
            .filter(|ms| *ms > 0)
            .map(Duration::from_millis),
        thumbnail,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn parses_supported_links() {
        let playlist = SpotifyLink::parse("https://open.spotify.com/playlist/37i9dQZF1DXcBWIGoYBM5M?si=abc");
        assert_eq!(
            playlist,
            Some(CollectionRef {
                kind: CollectionKind::Playlist,
                id: "37i9dQZF1DXcBWIGoYBM5M".to_string(),
            })
        );

        let album = SpotifyLink::parse("https://open.spotify.com/intl-es/album/4aawyAB9vmqN3uQ7FjRGTy");
        assert_eq!(album.map(|c| c.kind), Some(CollectionKind::Album));

        assert!(SpotifyLink::parse("https://open.spotify.com/artist/0OdUWJ0sBjDrqHygGUXeCF").is_none());
        assert!(SpotifyLink::parse("https://www.youtube.com/watch?v=x").is_none());
    }

    #[test]
    fn link_pattern_is_built_once_and_reused() {
        assert!(LINK_PATTERN.is_some());
        for id in ["a1", "b2", "c3"] {
            let link = SpotifyLink::parse(&format!("https://open.spotify.com/track/{id}"));
            assert_eq!(link.map(|c| c.id), Some(id.to_string()));
        }
    }

    #[test]
    fn entry_uses_first_artist_and_album_cover() {
        let track: SpotifyTrack = serde_json::from_value(serde_json::json!({
            "name": "Song",
            "artists": [{ "name": "Artist" }, { "name": "Feat" }],
            "duration_ms": 215000,
            "album": { "images": [{ "url": "https://i/640" }, { "url": "https://i/300" }] }
        }))
        .expect("fixture válido");

        let entry = entry_from_track(&track, None);

        assert_eq!(entry.title, "Artist - Song");
        assert_eq!(entry.search_term, "Artist - Song");
        assert_eq!(entry.duration, Some(Duration::from_secs(215)));
        assert_eq!(entry.thumbnail.as_deref(), Some("https://i/640"));
    }

    #[test]
    fn album_tracks_fall_back_to_album_cover() {
        let track: SpotifyTrack = serde_json::from_value(serde_json::json!({
            "name": "Intro",
            "artists": []
        }))
        .expect("fixture válido");

        let entry = entry_from_track(&track, Some("https://cover".to_string()));

        assert_eq!(entry.title, "Unknown - Intro");
        assert_eq!(entry.duration, None);
        assert_eq!(entry.thumbnail.as_deref(), Some("https://cover"));
    }
}
