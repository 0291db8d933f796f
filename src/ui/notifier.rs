use anyhow::{Context, Result};
use async_trait::async_trait;
use serenity::{
    builder::{CreateMessage, EditMessage},
    http::Http,
    model::id::{ChannelId, MessageId},
};
use std::sync::Arc;

use super::{buttons::player_controls, embeds::now_playing_embed};
use crate::audio::track::Track;

/// What the now-playing card needs to render.
#[derive(Debug, Clone, PartialEq)]
pub struct NowPlayingCard {
    pub track: Track,
    pub has_previous: bool,
    pub paused: bool,
}

/// Outbound chat capability used by the session orchestrator.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait Notifier: Send + Sync {
    /// Sends a fresh now-playing card with transport controls.
    async fn now_playing(&self, channel: ChannelId, card: NowPlayingCard) -> Result<MessageId>;

    async fn notice(&self, channel: ChannelId, content: String) -> Result<()>;

    /// Strips the controls from an earlier card.
    async fn retire_controls(&self, channel: ChannelId, message: MessageId) -> Result<()>;
}

/// Notifier backed by the Discord REST client.
pub struct DiscordNotifier {
    http: Arc<Http>,
}

impl DiscordNotifier {
    pub fn new(http: Arc<Http>) -> Self {
        Self { http }
    }
}

#[async_trait]
impl Notifier for DiscordNotifier {
    async fn now_playing(&self, channel: ChannelId, card: NowPlayingCard) -> Result<MessageId> {
        let message = CreateMessage::new()
            .embed(now_playing_embed(&card.track))
            .components(vec![player_controls(card.has_previous, card.paused)]);

        let sent = channel
            .send_message(&self.http, message)
            .await
            .with_context(|| format!("Error enviando now playing al canal {}", channel))?;

        Ok(sent.id)
    }

    async fn notice(&self, channel: ChannelId, content: String) -> Result<()> {
        channel
            .say(&self.http, content)
            .await
            .with_context(|| format!("Error enviando aviso al canal {}", channel))?;
        Ok(())
    }

    async fn retire_controls(&self, channel: ChannelId, message: MessageId) -> Result<()> {
        channel
            .edit_message(&self.http, message, EditMessage::new().components(Vec::new()))
            .await
            .with_context(|| format!("Error retirando controles del mensaje {}", message))?;
        Ok(())
    }
}
