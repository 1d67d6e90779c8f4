use anyhow::Result;
use async_trait::async_trait;
use serenity::{
    builder::{
        CreateActionRow, CreateEmbed, CreateInteractionResponse, CreateInteractionResponseMessage,
        CreateMessage, EditInteractionResponse,
    },
    http::Http,
    model::{
        application::{CommandInteraction, ComponentInteraction},
        channel::Message,
        id::{ChannelId, GuildId, UserId},
    },
};
use std::sync::{
    atomic::{AtomicBool, Ordering},
    Arc,
};

/// Respuesta a un comando
pub enum Reply {
    Text(String),
    Embed(CreateEmbed),
    Controls(CreateEmbed, Vec<CreateActionRow>),
}

impl Reply {
    pub fn text(content: impl Into<String>) -> Self {
        Self::Text(content.into())
    }
}

/// Origen de un comando: slash, prefijo o botón.
///
/// Los handlers sólo ven esta interfaz, así un mismo handler atiende
/// `/play` y `!!play`.
#[async_trait]
pub trait CommandContext: Send + Sync {
    fn guild_id(&self) -> Option<GuildId>;
    fn channel_id(&self) -> ChannelId;
    fn requesting_user(&self) -> UserId;

    /// Avisa que la respuesta va a tardar
    async fn defer(&self) -> Result<()>;

    async fn reply(&self, reply: Reply) -> Result<()>;
}

/// Comando slash
pub struct SlashContext {
    http: Arc<Http>,
    command: CommandInteraction,
    deferred: AtomicBool,
}

impl SlashContext {
    pub fn new(http: Arc<Http>, command: CommandInteraction) -> Self {
        Self {
            http,
            command,
            deferred: AtomicBool::new(false),
        }
    }
}

#[async_trait]
impl CommandContext for SlashContext {
    fn guild_id(&self) -> Option<GuildId> {
        self.command.guild_id
    }

    fn channel_id(&self) -> ChannelId {
        self.command.channel_id
    }

    fn requesting_user(&self) -> UserId {
        self.command.user.id
    }

    async fn defer(&self) -> Result<()> {
        if self.deferred.swap(true, Ordering::SeqCst) {
            return Ok(());
        }
        self.command
            .create_response(
                &self.http,
                CreateInteractionResponse::Defer(CreateInteractionResponseMessage::new()),
            )
            .await?;
        Ok(())
    }

    async fn reply(&self, reply: Reply) -> Result<()> {
        if self.deferred.load(Ordering::SeqCst) {
            let edit = match reply {
                Reply::Text(content) => EditInteractionResponse::new().content(content),
                Reply::Embed(embed) => EditInteractionResponse::new().embed(embed),
                Reply::Controls(embed, rows) => EditInteractionResponse::new().embed(embed).components(rows),
            };
            self.command.edit_response(&self.http, edit).await?;
        } else {
            self.command
                .create_response(&self.http, CreateInteractionResponse::Message(message(reply)))
                .await?;
        }
        Ok(())
    }
}

/// Comando de texto con prefijo (`!!play ...`)
pub struct PrefixContext {
    http: Arc<Http>,
    message: Message,
}

impl PrefixContext {
    pub fn new(http: Arc<Http>, message: Message) -> Self {
        Self { http, message }
    }
}

#[async_trait]
impl CommandContext for PrefixContext {
    fn guild_id(&self) -> Option<GuildId> {
        self.message.guild_id
    }

    fn channel_id(&self) -> ChannelId {
        self.message.channel_id
    }

    fn requesting_user(&self) -> UserId {
        self.message.author.id
    }

    async fn defer(&self) -> Result<()> {
        self.message.channel_id.broadcast_typing(&self.http).await?;
        Ok(())
    }

    async fn reply(&self, reply: Reply) -> Result<()> {
        let builder = match reply {
            Reply::Text(content) => CreateMessage::new().content(content),
            Reply::Embed(embed) => CreateMessage::new().embed(embed),
            Reply::Controls(embed, rows) => CreateMessage::new().embed(embed).components(rows),
        };
        self.message
            .channel_id
            .send_message(&self.http, builder.reference_message(&self.message))
            .await?;
        Ok(())
    }
}

/// Botón del reproductor; las respuestas son efímeras
pub struct ButtonContext {
    http: Arc<Http>,
    component: ComponentInteraction,
}

impl ButtonContext {
    pub fn new(http: Arc<Http>, component: ComponentInteraction) -> Self {
        Self { http, component }
    }
}

#[async_trait]
impl CommandContext for ButtonContext {
    fn guild_id(&self) -> Option<GuildId> {
        self.component.guild_id
    }

    fn channel_id(&self) -> ChannelId {
        self.component.channel_id
    }

    fn requesting_user(&self) -> UserId {
        self.component.user.id
    }

    async fn defer(&self) -> Result<()> {
        Ok(())
    }

    async fn reply(&self, reply: Reply) -> Result<()> {
        self.component
            .create_response(
                &self.http,
                CreateInteractionResponse::Message(message(reply).ephemeral(true)),
            )
            .await?;
        Ok(())
    }
}

fn message(reply: Reply) -> CreateInteractionResponseMessage {
    match reply {
        Reply::Text(content) => CreateInteractionResponseMessage::new().content(content),
        Reply::Embed(embed) => CreateInteractionResponseMessage::new().embed(embed),
        Reply::Controls(embed, rows) => CreateInteractionResponseMessage::new()
            .embed(embed)
            .components(rows),
    }
}
