//! # Bot Module
//!
//! Discord surface of Open Jukebox.
//!
//! - [`commands`]: slash command registration (global or per guild)
//! - [`context`]: one [`context::CommandContext`] for slash commands, `!!`
//!   prefix messages and player buttons
//! - [`handlers`]: the command handlers shared by every entry point
//! - [`playlist`]: batched loading of catalog collections
//! - [`announcer`]: now playing and notices posted to the text channel
//!
//! [`JukeboxBot`] implements Serenity's [`EventHandler`] and routes every
//! event to the per-guild [`PlaybackManager`].

use anyhow::Result;
use serenity::{
    all::{Context, EventHandler, GuildId, Interaction, Message, Ready, VoiceState},
    async_trait,
};
use std::sync::Arc;
use tracing::{error, info, warn};

pub mod announcer;
pub mod commands;
pub mod context;
pub mod handlers;
pub mod playlist;

use crate::{
    audio::PlaybackManager, config::Config, sources::CatalogService, storage::JsonPlayLog,
    ui::buttons::ButtonAction,
};
use context::{ButtonContext, PrefixContext, SlashContext};

/// Manejador de eventos de Discord
pub struct JukeboxBot {
    config: Arc<Config>,
    playback: PlaybackManager,
    /// `None` cuando Spotify no está configurado
    catalog: Option<Arc<dyn CatalogService>>,
    play_log: JsonPlayLog,
}

impl JukeboxBot {
    pub fn new(
        config: Config,
        playback: PlaybackManager,
        catalog: Option<Arc<dyn CatalogService>>,
        play_log: JsonPlayLog,
    ) -> Self {
        Self {
            config: Arc::new(config),
            playback,
            catalog,
            play_log,
        }
    }

    /// Registra los comandos slash, por guild si `GUILD_ID` está configurado
    async fn register_commands(&self, ctx: &Context) -> Result<()> {
        info!("📝 Registrando comandos slash...");

        match self.config.guild_id {
            Some(guild_id) => {
                let guild_id = GuildId::new(guild_id);
                info!("🏠 Registrando comandos para guild específica: {}", guild_id);

                if !ctx.cache.guilds().contains(&guild_id) {
                    warn!("⚠️ El bot no está en la guild especificada: {}", guild_id);
                    return Ok(());
                }

                commands::register_guild_commands(ctx, guild_id)
                    .await
                    .map_err(|e| {
                        error!("❌ Error registrando comandos de guild: {:?}", e);
                        anyhow::anyhow!("No se pudieron registrar comandos de guild. Verifica que el bot tenga permisos de 'applications.commands' en la guild.")
                    })?;
                info!("✅ Comandos de guild registrados para: {}", guild_id);
            }
            None => {
                info!("🌐 Registrando comandos globalmente");
                commands::register_global_commands(ctx).await.map_err(|e| {
                    error!("❌ Error registrando comandos globales: {:?}", e);
                    anyhow::anyhow!("No se pudieron registrar comandos globales. Verifica que el bot tenga permisos de 'applications.commands'.")
                })?;
                info!("✅ Comandos globales registrados");
            }
        }

        Ok(())
    }
}

#[async_trait]
impl EventHandler for JukeboxBot {
    async fn ready(&self, ctx: Context, ready: Ready) {
        info!("🤖 {} está en línea!", ready.user.name);
        info!("📊 Conectado a {} servidores", ready.guilds.len());

        if let Err(e) = self.register_commands(&ctx).await {
            error!("Error al registrar comandos: {:?}", e);
        }
    }

    async fn interaction_create(&self, ctx: Context, interaction: Interaction) {
        match interaction {
            Interaction::Command(command) => {
                let name = command.data.name.clone();
                let args = command
                    .data
                    .options
                    .iter()
                    .find(|opt| opt.name == "query" || opt.name == "position")
                    .and_then(|opt| opt.value.as_str())
                    .unwrap_or_default()
                    .to_string();

                info!("📝 Comando /{} usado por {}", name, command.user.name);
                let cmd = SlashContext::new(Arc::clone(&ctx.http), command);
                handlers::dispatch(&ctx, &cmd, self, &name, &args).await;
            }
            Interaction::Component(component) => {
                let Some(action) = ButtonAction::from_custom_id(&component.data.custom_id) else {
                    warn!("🔘 Botón desconocido: {}", component.data.custom_id);
                    return;
                };

                info!("🔘 Botón {:?} presionado por {}", action, component.user.name);
                let cmd = ButtonContext::new(Arc::clone(&ctx.http), component);
                handlers::handle_button(&ctx, &cmd, self, action).await;
            }
            _ => {}
        }
    }

    async fn message(&self, ctx: Context, message: Message) {
        if message.author.bot || message.guild_id.is_none() {
            return;
        }
        let Some((name, args)) = handlers::parse_prefixed(&message.content, &self.config.command_prefix) else {
            return;
        };
        let args = args.to_string();

        info!("💬 Comando {}{} usado por {}", self.config.command_prefix, name, message.author.name);
        let cmd = PrefixContext::new(Arc::clone(&ctx.http), message);
        handlers::dispatch(&ctx, &cmd, self, &name, &args).await;
    }

    /// Si el bot sale del canal de voz se limpia el estado de la guild
    async fn voice_state_update(&self, ctx: Context, old: Option<VoiceState>, new: VoiceState) {
        let current_user_id = ctx.cache.current_user().id;
        if new.user_id != current_user_id || old.is_none() || new.channel_id.is_some() {
            return;
        }

        if let Some(guild_id) = new.guild_id {
            info!("🔌 Bot desconectado en guild {}", guild_id);
            self.playback.clear(guild_id).await;

            if let Some(manager) = songbird::get(&ctx).await {
                if manager.get(guild_id).is_some() {
                    if let Err(e) = manager.remove(guild_id).await {
                        warn!("⚠️ No se pudo liberar la llamada de guild {}: {:?}", guild_id, e);
                    }
                }
            }
        }
    }
}
