//! # Bot Module
//!
//! Discord-facing half of Seraphim.
//!
//! - Slash command catalog and registration ([`commands`])
//! - Command and button semantics over a playback session ([`handlers`])
//! - Interaction plumbing: rate limiting, deferral, replies ([`interactions`])
//! - The per-guild lifecycle state machine ([`events`])
//!
//! [`SeraphimBot`] implements serenity's [`EventHandler`] and routes gateway
//! events to those pieces. Shared state lives in the client's type map as a
//! [`handlers::MusicContext`].

use anyhow::Result;
use dashmap::DashMap;
use serenity::{
    all::{ChannelId, Context, EventHandler, GuildId, Interaction, Ready, UserId, VoiceState},
    async_trait,
};
use std::{sync::Arc, time::Duration};
use tracing::{debug, error, info, warn};

pub mod audit;
pub mod commands;
pub mod events;
pub mod handlers;
pub mod interactions;
pub mod rate_limit;
pub mod validation;

use crate::{
    audio::{lavalink::LavalinkBridge, session::DestroyReason},
    config::Config,
};
use handlers::MusicContext;

const MAINTENANCE_INTERVAL: Duration = Duration::from_secs(3600);

pub struct SeraphimBot {
    config: Arc<Config>,
    bridge: Arc<LavalinkBridge>,
    /// Guilds with a pending empty-channel check.
    alone_checks: Arc<DashMap<GuildId, ()>>,
}

impl SeraphimBot {
    pub fn new(config: Arc<Config>, bridge: Arc<LavalinkBridge>) -> Self {
        Self {
            config,
            bridge,
            alone_checks: Arc::new(DashMap::new()),
        }
    }

    /// Registers the catalog per guild when `GUILD_ID` is set, globally
    /// otherwise.
    async fn register_commands(&self, ctx: &Context) -> Result<()> {
        info!("📝 Registrando comandos slash...");

        match self.config.guild_id {
            Some(guild_id) => {
                let guild_id = GuildId::new(guild_id);

                if !ctx.cache.guilds().contains(&guild_id) {
                    warn!("⚠️ El bot no está en la guild especificada: {}", guild_id);
                    return Ok(());
                }

                commands::register_guild_commands(ctx, guild_id).await?;
            }
            None => commands::register_global_commands(ctx).await?,
        }

        Ok(())
    }
}

async fn music_context(ctx: &Context) -> Option<Arc<MusicContext>> {
    let context = ctx.data.read().await.get::<MusicContext>().cloned();
    if context.is_none() {
        error!("MusicContext no registrado en el cliente");
    }
    context
}

#[async_trait]
impl EventHandler for SeraphimBot {
    async fn ready(&self, ctx: Context, ready: Ready) {
        info!("😇 {} está en línea!", ready.user.name);
        info!("📊 Conectado a {} servidores", ready.guilds.len());

        if let Err(e) = self.register_commands(&ctx).await {
            error!("Error al registrar comandos: {:?}", e);
        }

        let bridge = self.bridge.clone();
        tokio::spawn(async move {
            maintenance_tasks(bridge).await;
        });
    }

    async fn interaction_create(&self, ctx: Context, interaction: Interaction) {
        let Some(music) = music_context(&ctx).await else {
            return;
        };

        match interaction {
            Interaction::Command(command) => {
                interactions::handle_command(&ctx, &music, &command).await
            }
            Interaction::Component(component) => {
                interactions::handle_component(&ctx, &music, &component).await
            }
            _ => {}
        }
    }

    /// Tears the session down when the bot is removed from its voice channel,
    /// and watches for the bot being left alone in it.
    async fn voice_state_update(&self, ctx: Context, old: Option<VoiceState>, new: VoiceState) {
        let Some(guild_id) = new.guild_id else {
            return;
        };

        if new.user_id == ctx.cache.current_user().id {
            if old.is_some() && new.channel_id.is_none() {
                self.on_bot_disconnected(&ctx, guild_id).await;
            }
            return;
        }

        self.watch_for_empty_channel(&ctx, guild_id).await;
    }
}

impl SeraphimBot {
    async fn on_bot_disconnected(&self, ctx: &Context, guild_id: GuildId) {
        info!("🔌 Bot desconectado del canal de voz en guild {}", guild_id);

        let Some(music) = music_context(ctx).await else {
            return;
        };
        match music.provider.get(guild_id) {
            Some(session) => {
                if let Err(e) = session.destroy(DestroyReason::Disconnected).await {
                    error!("Error al cerrar sesión tras desconexión: {:?}", e);
                }
            }
            None => debug!("Guild {} sin sesión activa", guild_id),
        }
    }

    /// Once nobody but bots is left in the session's channel, waits out the
    /// grace period and closes the session if that is still the case.
    async fn watch_for_empty_channel(&self, ctx: &Context, guild_id: GuildId) {
        let Some(music) = music_context(ctx).await else {
            return;
        };
        let Some(session) = music.provider.get(guild_id) else {
            return;
        };
        let channel = session.voice_channel();
        if listeners_in(ctx, guild_id, channel) != Some(0) {
            return;
        }
        if self.alone_checks.insert(guild_id, ()).is_some() {
            return;
        }

        let grace = self.config.queue_end_grace();
        info!(
            "🚪 Programando auto-desconexión por inactividad en guild {} ({})",
            guild_id,
            humantime::format_duration(grace)
        );

        let ctx = ctx.clone();
        let pending = self.alone_checks.clone();
        tokio::spawn(async move {
            tokio::time::sleep(grace).await;
            pending.remove(&guild_id);

            let Some(session) = music.provider.get(guild_id) else {
                return;
            };
            if session.voice_channel() != channel
                || listeners_in(&ctx, guild_id, channel) != Some(0)
            {
                debug!("Guild {} recuperó oyentes, se mantiene la sesión", guild_id);
                return;
            }

            info!("💤 Canal de voz vacío en guild {}, cerrando sesión", guild_id);
            if let Err(e) = session.destroy(DestroyReason::Inactivity).await {
                error!("Error al cerrar sesión inactiva: {:?}", e);
            }
        });
    }
}

/// Non-bot users in `channel`, or `None` when the guild is not cached.
fn listeners_in(ctx: &Context, guild_id: GuildId, channel: ChannelId) -> Option<usize> {
    let bot_id = ctx.cache.current_user().id;
    let guild = ctx.cache.guild(guild_id)?;
    let states = guild.voice_states.values().map(|state| {
        let is_bot = state.member.as_ref().is_some_and(|member| member.user.bot);
        (state.channel_id, state.user_id, is_bot)
    });
    Some(count_listeners(states, channel, bot_id))
}

fn count_listeners(
    states: impl IntoIterator<Item = (Option<ChannelId>, UserId, bool)>,
    channel: ChannelId,
    bot_id: UserId,
) -> usize {
    states
        .into_iter()
        .filter(|(state_channel, user, is_bot)| {
            *state_channel == Some(channel) && *user != bot_id && !is_bot
        })
        .count()
}

/// Hourly housekeeping for the track payload cache.
async fn maintenance_tasks(bridge: Arc<LavalinkBridge>) {
    let mut interval = tokio::time::interval(MAINTENANCE_INTERVAL);

    loop {
        interval.tick().await;
        bridge.cache().cleanup_old_entries();
        debug!("🧹 Tareas de mantenimiento completadas");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn only_people_in_the_channel_count_as_listeners() {
        let channel = ChannelId::new(10);
        let bot = UserId::new(1);
        let states = vec![
            (Some(channel), bot, true),
            (Some(channel), UserId::new(2), true),
            (Some(ChannelId::new(11)), UserId::new(3), false),
            (None, UserId::new(4), false),
        ];
        assert_eq!(count_listeners(states.clone(), channel, bot), 0);

        let mut joined = states;
        joined.push((Some(channel), UserId::new(5), false));
        assert_eq!(count_listeners(joined, channel, bot), 1);
    }
}
