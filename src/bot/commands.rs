use anyhow::Result;
use serenity::{
    builder::{CreateCommand, CreateCommandOption},
    model::{application::CommandOptionType, application::Command, id::GuildId},
    prelude::Context,
};

/// Registra comandos globales
pub async fn register_global_commands(ctx: &Context) -> Result<()> {
    Command::set_global_commands(&ctx.http, all_commands()).await?;
    Ok(())
}

/// Registra comandos para una guild específica (desarrollo)
pub async fn register_guild_commands(ctx: &Context, guild_id: GuildId) -> Result<()> {
    guild_id.set_commands(&ctx.http, all_commands()).await?;
    Ok(())
}

fn all_commands() -> Vec<CreateCommand> {
    vec![
        play_command(),
        simple("stop", "Detiene la reproducción y limpia la cola"),
        simple("skip", "Salta la canción actual"),
        simple("pause", "Pausa la reproducción"),
        simple("resume", "Reanuda la reproducción"),
        simple("queue", "Muestra la cola de reproducción"),
        simple("nowplaying", "Muestra la canción actual"),
        simple("shuffle", "Mezcla la cola"),
        simple("loop", "Cambia el modo de repetición (off → track → queue)"),
        seek_command(),
        simple("previous", "Vuelve a la canción anterior"),
        simple("history", "Muestra el historial de reproducción"),
        simple("ping", "Verifica la latencia del bot"),
    ]
}

fn simple(name: &str, description: &str) -> CreateCommand {
    CreateCommand::new(name).description(description)
}

fn play_command() -> CreateCommand {
    CreateCommand::new("play")
        .description("Reproduce una canción, playlist o álbum")
        .add_option(
            CreateCommandOption::new(
                CommandOptionType::String,
                "query",
                "URL o término de búsqueda",
            )
            .required(true),
        )
}

fn seek_command() -> CreateCommand {
    CreateCommand::new("seek")
        .description("Salta a una posición de la canción actual")
        .add_option(
            CreateCommandOption::new(
                CommandOptionType::String,
                "position",
                "Segundos, mm:ss o 1m30s",
            )
            .required(true),
        )
}
