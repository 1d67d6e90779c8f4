use anyhow::Result;
use serenity::{http::Http, model::gateway::GatewayIntents, Client};
use songbird::SerenityInit;
use std::{sync::Arc, time::Duration};
use tracing::{error, info, warn};

mod audio;
mod bot;
mod config;
mod error;
mod sources;
mod storage;
mod ui;

use crate::audio::{acquire::SourceAcquirer, source::HttpDecoder, PlaybackManager, PlaybackServices};
use crate::bot::{announcer::DiscordAnnouncer, JukeboxBot};
use crate::config::{Config, PlaybackSettings};
use crate::sources::{CatalogService, SpotifyCatalog, YtDlpLookup};
use crate::storage::JsonPlayLog;

#[tokio::main]
async fn main() -> Result<()> {
    // Inicializar logging
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive("open_jukebox=debug".parse()?)
                .add_directive("serenity=info".parse()?)
                .add_directive("songbird=info".parse()?),
        )
        .init();

    info!("🎵 Iniciando Open Jukebox v{}", env!("CARGO_PKG_VERSION"));

    // Cargar configuración
    let config = Config::load()?;
    info!("{}", config.summary());

    let lookup = Arc::new(YtDlpLookup::new(config.ytdlp_path.clone()));

    // Manejar health check si es necesario
    if std::env::args().any(|arg| arg == "--health-check") {
        return health_check(&lookup).await;
    }

    // Historial de reproducción
    let play_log = JsonPlayLog::new(config.data_dir.clone()).await?;

    let catalog: Option<Arc<dyn CatalogService>> = match (&config.spotify_client_id, &config.spotify_client_secret) {
        (Some(id), Some(secret)) => {
            info!("🟢 Spotify habilitado (market {})", config.spotify_market);
            Some(Arc::new(SpotifyCatalog::new(
                id.clone(),
                secret.clone(),
                config.spotify_market.clone(),
            )))
        }
        _ => {
            warn!("⚪ Spotify deshabilitado: faltan credenciales");
            None
        }
    };

    // Núcleo de reproducción
    let http = Arc::new(Http::new(&config.discord_token));
    let playback = PlaybackManager::new(PlaybackServices {
        acquirer: SourceAcquirer::new(
            Arc::new(HttpDecoder::default()),
            lookup,
            Duration::from_secs(config.lookup_timeout),
        ),
        announcer: Arc::new(DiscordAnnouncer::new(http)),
        play_log: Arc::new(play_log.clone()),
        settings: PlaybackSettings::from(&config),
    });

    // Configurar intents mínimos necesarios
    let intents = GatewayIntents::GUILDS
        | GatewayIntents::GUILD_VOICE_STATES
        | GatewayIntents::GUILD_MESSAGES
        | GatewayIntents::MESSAGE_CONTENT;

    // Crear handler del bot
    let handler = JukeboxBot::new(config.clone(), playback, catalog, play_log);

    // Construir cliente
    let mut client = Client::builder(&config.discord_token, intents)
        .event_handler(handler)
        .register_songbird()
        .await?;

    // Manejar shutdown graceful
    let shard_manager = client.shard_manager.clone();
    tokio::spawn(async move {
        if let Err(e) = tokio::signal::ctrl_c().await {
            error!("Error al registrar Ctrl+C: {:?}", e);
            return;
        }
        info!("⚠️ Señal de shutdown recibida, cerrando...");
        shard_manager.shutdown_all().await;
    });

    // Iniciar bot
    info!("🚀 Bot iniciado exitosamente");
    if let Err(why) = client.start().await {
        error!("Error al ejecutar cliente: {:?}", why);
    }

    Ok(())
}

async fn health_check(lookup: &YtDlpLookup) -> Result<()> {
    let version = lookup.verify().await?;
    println!("OK (yt-dlp {})", version);
    Ok(())
}
