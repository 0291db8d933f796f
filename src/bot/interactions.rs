//! Serenity glue between raw interactions and the command layer.
//!
//! Every interaction is acknowledged exactly once: either a direct response,
//! or a defer followed by an edit. Anything that goes wrong after the
//! acknowledgement is reported as a follow-up.

use anyhow::{Context as _, Result};
use serenity::{
    builder::{
        CreateEmbed, CreateInteractionResponse, CreateInteractionResponseFollowup,
        CreateInteractionResponseMessage, EditInteractionResponse,
    },
    model::{
        application::{CommandInteraction, ComponentInteraction},
        id::{ChannelId, GuildId, UserId},
    },
    prelude::Context,
};
use tracing::{debug, error, info, warn};

use super::{
    audit,
    handlers::{Invocation, MusicCommand, MusicContext, Reply},
};
use crate::{
    error::MusicError,
    ui::{
        buttons::ButtonAction,
        embeds::{error_embed, now_playing_embed, queue_embed, success_embed},
    },
};

pub const GENERIC_FAILURE: &str = "An error occurred while processing your request.";

/// Reads the invoker's voice channel and the bot's permissions there from the
/// gateway cache.
pub fn invocation_for(
    ctx: &Context,
    guild_id: Option<GuildId>,
    user_id: UserId,
    text_channel: ChannelId,
) -> Invocation {
    let bot_id = ctx.cache.current_user().id;

    let (user_voice, bot_voice_permissions) = guild_id
        .and_then(|id| ctx.cache.guild(id))
        .map(|guild| {
            let voice = guild
                .voice_states
                .get(&user_id)
                .and_then(|state| state.channel_id);

            let permissions = voice.and_then(|channel_id| {
                let channel = guild.channels.get(&channel_id)?;
                let member = guild.members.get(&bot_id)?;
                Some(guild.user_permissions_in(channel, member))
            });

            (voice, permissions)
        })
        .unwrap_or((None, None));

    Invocation {
        guild_id,
        user_id,
        user_voice,
        text_channel,
        bot_voice_permissions,
    }
}

/// Rendered answer.
#[derive(Debug, Clone, Default)]
pub struct Outgoing {
    pub content: Option<String>,
    pub embed: Option<CreateEmbed>,
    pub ephemeral: bool,
}

impl Outgoing {
    fn embed(embed: CreateEmbed, ephemeral: bool) -> Self {
        Self {
            embed: Some(embed),
            ephemeral,
            ..Default::default()
        }
    }

    fn text(content: impl Into<String>, ephemeral: bool) -> Self {
        Self {
            content: Some(content.into()),
            ephemeral,
            ..Default::default()
        }
    }

    fn message(self) -> CreateInteractionResponseMessage {
        let mut message = CreateInteractionResponseMessage::new().ephemeral(self.ephemeral);
        if let Some(content) = self.content {
            message = message.content(content);
        }
        if let Some(embed) = self.embed {
            message = message.embed(embed);
        }
        message
    }

    fn edit(self) -> EditInteractionResponse {
        let mut edit = EditInteractionResponse::new();
        if let Some(content) = self.content {
            edit = edit.content(content);
        }
        if let Some(embed) = self.embed {
            edit = edit.embed(embed);
        }
        edit
    }

    fn followup(self) -> CreateInteractionResponseFollowup {
        let mut followup = CreateInteractionResponseFollowup::new().ephemeral(self.ephemeral);
        if let Some(content) = self.content {
            followup = followup.content(content);
        }
        if let Some(embed) = self.embed {
            followup = followup.embed(embed);
        }
        followup
    }
}

/// Maps a command outcome to what the user sees. Failures are always private.
pub fn render(outcome: &Result<Reply, MusicError>) -> Outgoing {
    match outcome {
        Ok(Reply::Success(message)) => Outgoing::embed(success_embed(message), false),
        Ok(Reply::Notice { content, ephemeral }) => Outgoing::text(content.clone(), *ephemeral),
        Ok(Reply::NowPlaying(track)) => Outgoing::embed(now_playing_embed(track), false),
        Ok(Reply::Queue { current, upcoming }) => {
            Outgoing::embed(queue_embed(current, upcoming), false)
        }
        Err(e) => Outgoing::embed(error_embed(&e.user_message()), true),
    }
}

fn generic_failure() -> Outgoing {
    Outgoing::embed(error_embed(GENERIC_FAILURE), true)
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Ack {
    Pending,
    Deferred,
    Done,
}

#[derive(Clone, Copy)]
enum Target<'a> {
    Command(&'a CommandInteraction),
    Component(&'a ComponentInteraction),
}

/// Tracks whether the interaction has been acknowledged yet.
struct Responder<'a> {
    ctx: &'a Context,
    target: Target<'a>,
    ack: Ack,
}

impl<'a> Responder<'a> {
    fn new(ctx: &'a Context, target: Target<'a>) -> Self {
        Self {
            ctx,
            target,
            ack: Ack::Pending,
        }
    }

    async fn defer(&mut self) -> Result<()> {
        if let Target::Command(command) = self.target {
            command
                .defer(&self.ctx.http)
                .await
                .context("Error al diferir la respuesta")?;
            self.ack = Ack::Deferred;
        }
        Ok(())
    }

    /// Sends `outgoing` in whatever form the acknowledgement state allows.
    async fn send(&mut self, outgoing: Outgoing) -> Result<()> {
        let http = &self.ctx.http;
        match (self.ack, self.target) {
            (Ack::Pending, Target::Command(command)) => command
                .create_response(http, CreateInteractionResponse::Message(outgoing.message()))
                .await
                .context("Error al responder comando")?,
            (Ack::Pending, Target::Component(component)) => component
                .create_response(http, CreateInteractionResponse::Message(outgoing.message()))
                .await
                .context("Error al responder botón")?,
            (Ack::Deferred, Target::Command(command)) if !outgoing.ephemeral => {
                command
                    .edit_response(http, outgoing.edit())
                    .await
                    .context("Error al editar respuesta diferida")?;
            }
            (Ack::Deferred, Target::Command(command)) => {
                command
                    .create_followup(http, outgoing.followup())
                    .await
                    .context("Error al enviar follow-up")?;
                if let Err(e) = command.delete_response(http).await {
                    debug!("No se pudo borrar la respuesta diferida: {:?}", e);
                }
            }
            (Ack::Done, Target::Command(command)) => {
                command
                    .create_followup(http, outgoing.followup())
                    .await
                    .context("Error al enviar follow-up")?;
            }
            (Ack::Deferred | Ack::Done, Target::Component(component)) => {
                component
                    .create_followup(http, outgoing.followup())
                    .await
                    .context("Error al enviar follow-up")?;
            }
        }
        self.ack = Ack::Done;
        Ok(())
    }
}

/// Entry point for slash commands.
pub async fn handle_command(ctx: &Context, music: &MusicContext, command: &CommandInteraction) {
    let mut responder = Responder::new(ctx, Target::Command(command));

    if let Err(e) = run_command(&mut responder, music, command).await {
        error!("Error manejando comando /{}: {:?}", command.data.name, e);
        audit::interaction_failed(command.user.id, command.guild_id, &command.data.name, &e);
        if let Err(e) = responder.send(generic_failure()).await {
            warn!("No se pudo notificar el error al usuario: {:?}", e);
        }
    }
}

async fn run_command(
    responder: &mut Responder<'_>,
    music: &MusicContext,
    command: &CommandInteraction,
) -> Result<()> {
    let user_id = command.user.id;
    info!(
        "📝 Comando /{} usado por {} en guild {:?}",
        command.data.name, command.user.name, command.guild_id
    );

    let decision = music.rate_limiter.check(user_id);
    if decision.limited {
        audit::rate_limited(user_id, decision.retry_after);
        let status = music.rate_limiter.status(user_id);
        debug!(
            "⏳ {} sin tokens ({}/{}), próximo en {:?}",
            user_id, status.tokens, status.max_tokens, status.next_refill_in
        );
        let limited = Err(MusicError::RateLimited {
            retry_after: decision.retry_after,
        });
        return responder.send(render(&limited)).await;
    }

    let query = command
        .data
        .options
        .iter()
        .find(|option| option.name == "query")
        .and_then(|option| option.value.as_str());

    let Some(parsed) = MusicCommand::parse(&command.data.name, query) else {
        warn!("Comando desconocido: /{}", command.data.name);
        return responder.send(generic_failure()).await;
    };

    if parsed.defers() {
        responder.defer().await?;
    }

    let invocation = invocation_for(responder.ctx, command.guild_id, user_id, command.channel_id);
    audit::command_executed(user_id, command.guild_id, parsed.name());

    let outcome = music.execute(&invocation, parsed).await;
    log_outcome(&invocation, &command.data.name, &outcome);
    responder.send(render(&outcome)).await
}

/// Entry point for the transport buttons.
pub async fn handle_component(
    ctx: &Context,
    music: &MusicContext,
    component: &ComponentInteraction,
) {
    let mut responder = Responder::new(ctx, Target::Component(component));
    let custom_id = component.data.custom_id.as_str();

    let result = match ButtonAction::from_custom_id(custom_id) {
        Some(action) => {
            info!(
                "🔘 Botón {} presionado por {} en guild {:?}",
                custom_id, component.user.name, component.guild_id
            );
            let invocation =
                invocation_for(ctx, component.guild_id, component.user.id, component.channel_id);
            audit::command_executed(component.user.id, component.guild_id, custom_id);

            let outcome = music.press(&invocation, action).await;
            log_outcome(&invocation, custom_id, &outcome);
            responder.send(render(&outcome)).await
        }
        None => {
            warn!("Botón desconocido: {}", custom_id);
            responder.send(generic_failure()).await
        }
    };

    if let Err(e) = result {
        error!("Error manejando botón {}: {:?}", custom_id, e);
        audit::interaction_failed(component.user.id, component.guild_id, custom_id, &e);
        if let Err(e) = responder.send(generic_failure()).await {
            warn!("No se pudo notificar el error al usuario: {:?}", e);
        }
    }
}

fn log_outcome(invocation: &Invocation, name: &str, outcome: &Result<Reply, MusicError>) {
    match outcome {
        Ok(_) => debug!("✅ {} completado", name),
        Err(MusicError::InvalidQuery(reason)) => {
            audit::input_rejected(invocation.user_id, invocation.guild_id, reason)
        }
        Err(MusicError::UnsafeUrl(reason)) => {
            audit::input_rejected(invocation.user_id, invocation.guild_id, reason)
        }
        Err(e) if e.is_user_error() => debug!("{} rechazado: {}", name, e),
        Err(e) => {
            error!("Error en {}: {:?}", name, e);
            audit::interaction_failed(invocation.user_id, invocation.guild_id, name, e);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::audio::track::Track;
    use pretty_assertions::assert_eq;
    use std::time::Duration;

    fn description(outgoing: &Outgoing) -> String {
        let embed = serde_json::to_value(outgoing.embed.as_ref().unwrap()).unwrap();
        embed["description"].as_str().unwrap_or_default().to_string()
    }

    #[test]
    fn user_errors_are_private() {
        let outgoing = render(&Err(MusicError::NotInVoice));
        assert!(outgoing.ephemeral);
        assert_eq!(
            description(&outgoing),
            "Thou must dwell within a voice channel to summon the celestial harmonies."
        );
    }

    #[test]
    fn rate_limit_reply_names_the_wait() {
        let outgoing = render(&Err(MusicError::RateLimited {
            retry_after: Duration::from_millis(1500),
        }));
        assert!(outgoing.ephemeral);
        assert!(description(&outgoing).contains("Await 2 seconds"));
    }

    #[test]
    fn provider_failures_stay_vague() {
        let outgoing = render(&Err(MusicError::from(anyhow::anyhow!("node 10.0.0.5 refused"))));
        assert!(outgoing.ephemeral);
        assert!(!description(&outgoing).contains("10.0.0.5"));
    }

    #[test]
    fn successes_are_public() {
        let outgoing = render(&Ok(Reply::Success("Attuning to: **a**".into())));
        assert!(!outgoing.ephemeral);
        assert_eq!(description(&outgoing), "Attuning to: **a**");

        let outgoing = render(&Ok(Reply::Notice {
            content: "*Slumbers...*".into(),
            ephemeral: false,
        }));
        assert_eq!(outgoing.content.as_deref(), Some("*Slumbers...*"));
        assert!(outgoing.embed.is_none());

        let outgoing = render(&Ok(Reply::NowPlaying(Track::new("e", "Song", "Band"))));
        assert!(outgoing.embed.is_some());
    }
}
