use anyhow::{Context, Result};
use async_trait::async_trait;
use reqwest::Client;
use songbird::input::{HttpRequest, Input};
use std::{fmt, time::Duration};
use tracing::debug;

/// Fuente de audio lista para entregar al transporte
pub struct AudioSource {
    input: Input,
    locator: String,
    start_at: Option<Duration>,
}

impl AudioSource {
    pub fn new(input: Input, locator: String, start_at: Option<Duration>) -> Self {
        Self {
            input,
            locator,
            start_at,
        }
    }

    pub fn locator(&self) -> &str {
        &self.locator
    }

    pub fn start_at(&self) -> Option<Duration> {
        self.start_at
    }

    pub fn into_input(self) -> Input {
        self.input
    }
}

impl fmt::Debug for AudioSource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AudioSource")
            .field("locator", &self.locator)
            .field("start_at", &self.start_at)
            .finish_non_exhaustive()
    }
}

/// Abre un stream locator como fuente decodificable
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait Decoder: Send + Sync {
    async fn open(&self, locator: &str, start_at: Option<Duration>) -> Result<AudioSource>;
}

/// Decoder sobre `HttpRequest` de songbird: abre la conexión HTTP al crear la
/// fuente, así un locator expirado falla dentro de la adquisición.
pub struct HttpDecoder {
    client: Client,
}

impl HttpDecoder {
    pub fn new(client: Client) -> Self {
        Self { client }
    }
}

impl Default for HttpDecoder {
    fn default() -> Self {
        Self::new(Client::new())
    }
}

#[async_trait]
impl Decoder for HttpDecoder {
    async fn open(&self, locator: &str, start_at: Option<Duration>) -> Result<AudioSource> {
        debug!("🎧 Abriendo stream: {}", locator.chars().take(80).collect::<String>());

        let request = HttpRequest::new(self.client.clone(), locator.to_string());
        let input = Input::from(request)
            .make_live_async()
            .await
            .context("No se pudo abrir el stream HTTP")?;

        Ok(AudioSource::new(input, locator.to_string(), start_at))
    }
}
