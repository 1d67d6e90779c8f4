use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::{path::PathBuf, str::FromStr, time::Duration};

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct Config {
    // Discord
    pub discord_token: String,
    pub application_id: u64,
    pub guild_id: Option<u64>, // Para comandos de desarrollo
    pub command_prefix: String,

    // Cola y reproducción
    pub max_queue_size: usize,
    pub max_playlist_tracks: usize,
    pub max_queue_display: usize,
    pub history_size: usize,
    pub inactivity_timeout: u64, // En segundos
    pub lookup_timeout: u64,     // En segundos
    pub seek_settle_ms: u64,

    // Paths
    pub data_dir: PathBuf,
    pub ytdlp_path: String,

    // Spotify (opcional)
    pub spotify_client_id: Option<String>,
    pub spotify_client_secret: Option<String>,
    pub spotify_market: String,
}

/// Parámetros que consume el núcleo de reproducción
#[derive(Debug, Clone, PartialEq)]
pub struct PlaybackSettings {
    pub inactivity_timeout: Duration,
    pub history_capacity: usize,
    pub seek_settle: Duration,
    pub max_queue_size: usize,
}

impl Default for PlaybackSettings {
    fn default() -> Self {
        Self::from(&Config::default())
    }
}

impl From<&Config> for PlaybackSettings {
    fn from(config: &Config) -> Self {
        Self {
            inactivity_timeout: Duration::from_secs(config.inactivity_timeout),
            history_capacity: config.history_size,
            seek_settle: Duration::from_millis(config.seek_settle_ms),
            max_queue_size: config.max_queue_size,
        }
    }
}

impl Config {
    pub fn load() -> Result<Self> {
        dotenvy::dotenv().ok();

        let config = Self::from_lookup(|key| std::env::var(key).ok())?;

        // Create directories if they don't exist
        std::fs::create_dir_all(&config.data_dir)?;

        config.validate()?;

        Ok(config)
    }

    /// Construye la configuración desde una fuente clave → valor
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self> {
        let get = |key: &str| lookup(key).filter(|value| !value.trim().is_empty());
        let defaults = Self::default();

        Ok(Self {
            // Discord
            discord_token: get("DISCORD_TOKEN")
                .or_else(|| get("DISCORD__TOKEN"))
                .context("DISCORD_TOKEN no está configurado")?,
            application_id: parse_or("APPLICATION_ID", get("APPLICATION_ID"), defaults.application_id)?,
            guild_id: get("GUILD_ID").and_then(|s| s.parse().ok()),
            command_prefix: get("COMMAND_PREFIX").unwrap_or(defaults.command_prefix),

            // Cola y reproducción
            max_queue_size: parse_or("MAX_QUEUE_SIZE", get("MAX_QUEUE_SIZE"), defaults.max_queue_size)?,
            max_playlist_tracks: parse_or(
                "MAX_PLAYLIST_TRACKS",
                get("MAX_PLAYLIST_TRACKS"),
                defaults.max_playlist_tracks,
            )?,
            max_queue_display: parse_or(
                "MAX_QUEUE_DISPLAY",
                get("MAX_QUEUE_DISPLAY"),
                defaults.max_queue_display,
            )?,
            history_size: parse_or("HISTORY_SIZE", get("HISTORY_SIZE"), defaults.history_size)?,
            inactivity_timeout: parse_or(
                "INACTIVITY_TIMEOUT",
                get("INACTIVITY_TIMEOUT"),
                defaults.inactivity_timeout,
            )?,
            lookup_timeout: parse_or("LOOKUP_TIMEOUT", get("LOOKUP_TIMEOUT"), defaults.lookup_timeout)?,
            seek_settle_ms: parse_or("SEEK_SETTLE_MS", get("SEEK_SETTLE_MS"), defaults.seek_settle_ms)?,

            // Paths
            data_dir: get("DATA_DIR").map(PathBuf::from).unwrap_or(defaults.data_dir),
            ytdlp_path: get("YTDLP_PATH").unwrap_or(defaults.ytdlp_path),

            // Spotify
            spotify_client_id: get("SPOTIFY_CLIENT_ID"),
            spotify_client_secret: get("SPOTIFY_CLIENT_SECRET"),
            spotify_market: get("SPOTIFY_MARKET").unwrap_or(defaults.spotify_market),
        })
    }

    /// Validates configuration values for correctness.
    ///
    /// # Validation Rules
    ///
    /// - Queue and history limits must be greater than 0
    /// - Inactivity and lookup timeouts must be greater than 0
    /// - Spotify credentials must be provided together
    pub fn validate(&self) -> Result<()> {
        if self.discord_token.is_empty() {
            anyhow::bail!("Discord token must be provided");
        }

        if self.max_queue_size == 0 {
            anyhow::bail!("Max queue size must be greater than 0");
        }

        if self.history_size == 0 {
            anyhow::bail!("History size must be greater than 0");
        }

        if self.max_queue_display == 0 {
            anyhow::bail!("Max queue display must be greater than 0");
        }

        if self.inactivity_timeout == 0 {
            anyhow::bail!("Inactivity timeout must be greater than 0");
        }

        if self.lookup_timeout == 0 {
            anyhow::bail!("Lookup timeout must be greater than 0");
        }

        if self.spotify_client_id.is_some() != self.spotify_client_secret.is_some() {
            anyhow::bail!("SPOTIFY_CLIENT_ID and SPOTIFY_CLIENT_SECRET must be set together");
        }

        if self.command_prefix.trim().is_empty() {
            anyhow::bail!("Command prefix cannot be empty");
        }

        Ok(())
    }

    pub fn spotify_enabled(&self) -> bool {
        self.spotify_client_id.is_some() && self.spotify_client_secret.is_some()
    }

    /// Returns a summary of the current configuration for logging.
    ///
    /// Excludes tokens and secrets.
    pub fn summary(&self) -> String {
        format!(
            "Config Summary:\n  \
            Discord: App ID {} (Guild: {}), prefix '{}'\n  \
            Queue: {} max, {} per playlist, {} shown, {} history\n  \
            Timers: {}s inactivity, {}s lookup, {}ms seek settle\n  \
            Paths: data={}, yt-dlp={}\n  \
            Spotify: {} (market {})",
            self.application_id,
            self.guild_id.map_or("global".to_string(), |id| id.to_string()),
            self.command_prefix,
            self.max_queue_size,
            self.max_playlist_tracks,
            self.max_queue_display,
            self.history_size,
            self.inactivity_timeout,
            self.lookup_timeout,
            self.seek_settle_ms,
            self.data_dir.display(),
            self.ytdlp_path,
            if self.spotify_enabled() { "enabled" } else { "disabled" },
            self.spotify_market,
        )
    }
}

fn parse_or<T>(key: &str, value: Option<String>, default: T) -> Result<T>
where
    T: FromStr,
    T::Err: std::error::Error + Send + Sync + 'static,
{
    match value {
        Some(raw) => raw
            .trim()
            .parse()
            .with_context(|| format!("Valor inválido para {}: {}", key, raw)),
        None => Ok(default),
    }
}

/// Default configuration values.
///
/// Used as fallbacks when environment variables are not provided.
impl Default for Config {
    fn default() -> Self {
        Self {
            // Discord (no defaults - must be provided)
            discord_token: String::new(),
            application_id: 0,
            guild_id: None,
            command_prefix: "!!".to_string(),

            // Queue defaults
            max_queue_size: 1000,
            max_playlist_tracks: 25,
            max_queue_display: 10,
            history_size: 10,
            inactivity_timeout: 300, // 5 minutos
            lookup_timeout: 30,
            seek_settle_ms: 250,

            // Path defaults
            data_dir: "/app/data".into(),
            ytdlp_path: "yt-dlp".to_string(),

            // Spotify
            spotify_client_id: None,
            spotify_client_secret: None,
            spotify_market: "US".to_string(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use std::collections::HashMap;

    fn from_pairs(pairs: &[(&str, &str)]) -> Result<Config> {
        let vars: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        Config::from_lookup(|key| vars.get(key).cloned())
    }

    #[test]
    fn applies_defaults_for_missing_keys() {
        let config = from_pairs(&[("DISCORD_TOKEN", "token")]).expect("config");

        assert_eq!(config.command_prefix, "!!");
        assert_eq!(config.max_queue_size, 1000);
        assert_eq!(config.history_size, 10);
        assert_eq!(config.inactivity_timeout, 300);
        assert!(!config.spotify_enabled());
        config.validate().expect("válida");
    }

    #[test]
    fn accepts_double_underscore_token() {
        let config = from_pairs(&[("DISCORD__TOKEN", "legacy")]).expect("config");
        assert_eq!(config.discord_token, "legacy");
    }

    #[test]
    fn rejects_missing_token_and_bad_numbers() {
        assert!(from_pairs(&[]).is_err());
        assert!(from_pairs(&[("DISCORD_TOKEN", "t"), ("MAX_QUEUE_SIZE", "lots")]).is_err());
    }

    #[test]
    fn validate_catches_inconsistent_values() {
        let mut config = from_pairs(&[("DISCORD_TOKEN", "t")]).expect("config");
        config.spotify_client_id = Some("id".into());
        assert!(config.validate().is_err());

        config.spotify_client_secret = Some("secret".into());
        config.validate().expect("spotify completo");

        config.inactivity_timeout = 0;
        assert!(config.validate().is_err());
    }

    #[test]
    fn playback_settings_follow_config() {
        let config = from_pairs(&[
            ("DISCORD_TOKEN", "t"),
            ("INACTIVITY_TIMEOUT", "120"),
            ("SEEK_SETTLE_MS", "500"),
        ])
        .expect("config");

        let settings = PlaybackSettings::from(&config);
        assert_eq!(settings.inactivity_timeout, Duration::from_secs(120));
        assert_eq!(settings.seek_settle, Duration::from_millis(500));
        assert_eq!(settings.history_capacity, 10);
    }
}
