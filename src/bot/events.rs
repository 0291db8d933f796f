//! Per-guild lifecycle state machine driven by playback session events.

use dashmap::DashMap;
use serenity::model::id::{ChannelId, GuildId, MessageId};
use std::{sync::Arc, time::Instant};
use tracing::{debug, error, info, warn};

use crate::{
    audio::{
        fallback::{is_still_playing, FallbackTracker},
        history::TrackHistory,
        session::{DestroyReason, SessionEvent, SessionProvider},
        track::Track,
    },
    error::MusicError,
    ui::notifier::{NowPlayingCard, Notifier},
};

pub const JOIN_NOTICE: &str = "**Heed Seraphim! Be not afraid!**";
pub const QUEUE_END_NOTICE: &str =
    "*The celestial harmonies have ceased... Summon more vibrations with `/play`.*";
pub const CLOSING_NOTICE: &str = "**Cosmical vibrations' resonance attenuated...**";

/// Where a guild's session is in its lifecycle.
#[derive(Debug, Clone, PartialEq)]
pub enum SessionState {
    Idle,
    Connected,
    Playing { track: Track },
    Paused { track: Track },
    QueueEmpty { since: Instant },
    Destroyed { reason: DestroyReason },
}

impl SessionState {
    pub fn name(&self) -> &'static str {
        match self {
            Self::Idle => "idle",
            Self::Connected => "connected",
            Self::Playing { .. } => "playing",
            Self::Paused { .. } => "paused",
            Self::QueueEmpty { .. } => "queue-empty",
            Self::Destroyed { .. } => "destroyed",
        }
    }
}

/// Transition table. Anything not listed is rejected.
///
/// A destroyed session only accepts a fresh `Connected`.
pub fn transition(
    state: &SessionState,
    event: &SessionEvent,
    now: Instant,
) -> Result<SessionState, MusicError> {
    use SessionEvent as E;
    use SessionState as S;

    let next = match (state, event) {
        (S::Idle | S::Destroyed { .. }, E::Connected { .. }) => S::Connected,
        (S::Destroyed { .. }, _) => return Err(illegal(state, event)),

        (
            S::Connected | S::Playing { .. } | S::Paused { .. } | S::QueueEmpty { .. },
            E::TrackStart { track },
        ) => S::Playing {
            track: track.clone(),
        },
        (
            S::Connected | S::Playing { .. } | S::Paused { .. },
            E::TrackEnd { .. } | E::TrackStuck { .. } | E::TrackError { .. },
        ) => state.clone(),

        (S::Playing { track }, E::Paused) => S::Paused {
            track: track.clone(),
        },
        (S::Paused { track }, E::Resumed) => S::Playing {
            track: track.clone(),
        },

        (S::Connected | S::Playing { .. } | S::Paused { .. }, E::QueueEnd) => {
            S::QueueEmpty { since: now }
        }

        (_, E::PlayerDestroy { reason }) => S::Destroyed { reason: *reason },

        _ => return Err(illegal(state, event)),
    };

    Ok(next)
}

fn illegal(state: &SessionState, event: &SessionEvent) -> MusicError {
    MusicError::IllegalTransition {
        state: state.name(),
        event: event.name(),
    }
}

#[derive(Debug, Clone)]
struct GuildSession {
    state: SessionState,
    text_channel: Option<ChannelId>,
    now_playing: Option<MessageId>,
}

impl Default for GuildSession {
    fn default() -> Self {
        Self {
            state: SessionState::Idle,
            text_channel: None,
            now_playing: None,
        }
    }
}

/// Reacts to [`SessionEvent`]s: announces tracks, records history, runs the
/// source fallback and cleans up when a session is destroyed.
pub struct SessionOrchestrator {
    provider: Arc<dyn SessionProvider>,
    notifier: Arc<dyn Notifier>,
    history: Arc<TrackHistory>,
    fallback: Arc<FallbackTracker>,
    sessions: DashMap<GuildId, GuildSession>,
}

impl SessionOrchestrator {
    pub fn new(
        provider: Arc<dyn SessionProvider>,
        notifier: Arc<dyn Notifier>,
        history: Arc<TrackHistory>,
        fallback: Arc<FallbackTracker>,
    ) -> Self {
        Self {
            provider,
            notifier,
            history,
            fallback,
            sessions: DashMap::new(),
        }
    }

    pub fn state(&self, guild_id: GuildId) -> SessionState {
        self.sessions
            .get(&guild_id)
            .map(|session| session.state.clone())
            .unwrap_or(SessionState::Idle)
    }

    /// Applies one event. The new state is committed before any side effect
    /// runs; side-effect failures are logged and, for the player, returned.
    pub async fn handle(&self, guild_id: GuildId, event: SessionEvent) -> Result<(), MusicError> {
        let current = self.state(guild_id);
        let next = match transition(&current, &event, Instant::now()) {
            Ok(next) => next,
            Err(e) => {
                warn!("🚫 Guild {}: evento {} rechazado en estado {}", guild_id, event.name(), current.name());
                return Err(e);
            }
        };

        debug!(
            "🔄 Guild {}: {} --{}--> {}",
            guild_id,
            current.name(),
            event.name(),
            next.name()
        );
        self.sessions.entry(guild_id).or_default().state = next;

        match event {
            SessionEvent::Connected { text, .. } => self.on_connected(guild_id, text).await,
            SessionEvent::TrackStart { track } => self.on_track_start(guild_id, track).await,
            SessionEvent::TrackEnd { track, reason } => {
                if reason.is_natural() {
                    self.history.record(guild_id, track);
                } else {
                    debug!("Track \"{}\" terminó por {:?}, no se guarda en historial", track.title, reason);
                }
                Ok(())
            }
            SessionEvent::TrackStuck { track, threshold_ms } => {
                warn!("⚠️ Track atascado ({} ms) en guild {}: {}", threshold_ms, guild_id, track.title);
                self.recover(guild_id, &track).await
            }
            SessionEvent::TrackError { track, message } => {
                error!("❌ Error en track para guild {}: {} ({})", guild_id, track.title, message);
                self.recover(guild_id, &track).await
            }
            SessionEvent::Paused | SessionEvent::Resumed => Ok(()),
            SessionEvent::QueueEnd => {
                info!("📭 Cola terminada en guild {}", guild_id);
                self.notify(guild_id, QUEUE_END_NOTICE).await;
                Ok(())
            }
            SessionEvent::PlayerDestroy { reason } => self.on_destroy(guild_id, reason).await,
        }
    }

    async fn on_connected(&self, guild_id: GuildId, text: ChannelId) -> Result<(), MusicError> {
        if let Some(mut session) = self.sessions.get_mut(&guild_id) {
            session.text_channel = Some(text);
            session.now_playing = None;
        }
        info!("🔊 Sesión conectada en guild {}", guild_id);
        self.notify(guild_id, JOIN_NOTICE).await;
        Ok(())
    }

    async fn on_track_start(&self, guild_id: GuildId, track: Track) -> Result<(), MusicError> {
        info!("▶️ Reproduciendo: {} en guild {}", track.title, guild_id);
        self.fallback.reset(guild_id, &track);
        self.retire_card(guild_id).await;

        let Some(channel) = self.text_channel(guild_id) else {
            return Ok(());
        };

        let card = NowPlayingCard {
            has_previous: self.history.has_previous(guild_id),
            paused: false,
            track,
        };

        match self.notifier.now_playing(channel, card).await {
            Ok(message) => {
                if let Some(mut session) = self.sessions.get_mut(&guild_id) {
                    session.now_playing = Some(message);
                }
            }
            Err(e) => error!("Error al enviar mensaje now playing: {:?}", e),
        }
        Ok(())
    }

    /// Stuck or failed track: try another source, otherwise move on.
    async fn recover(&self, guild_id: GuildId, failed: &Track) -> Result<(), MusicError> {
        let Some(session) = self.provider.get(guild_id) else {
            debug!("Sin sesión activa en guild {}, nada que recuperar", guild_id);
            return Ok(());
        };

        if self.fallback.attempt_fallback(session.as_ref(), failed).await {
            return Ok(());
        }

        self.notify(
            guild_id,
            &format!(
                "*The harmony **{}** could not resonate... Transcending to the next.*",
                failed.title
            ),
        )
        .await;

        if is_still_playing(session.as_ref(), failed).await {
            session.skip().await?;
        } else {
            debug!("El player ya dejó \"{}\" en guild {}, no se salta", failed.title, guild_id);
        }
        Ok(())
    }

    async fn on_destroy(&self, guild_id: GuildId, reason: DestroyReason) -> Result<(), MusicError> {
        info!(
            "💤 Sesión destruida en guild {} ({}), {} canciones de historial descartadas",
            guild_id,
            reason,
            self.history.len(guild_id)
        );

        self.history.clear(guild_id);
        self.fallback.cleanup_guild(guild_id);
        self.retire_card(guild_id).await;

        if reason.announces_closing() {
            self.notify(guild_id, CLOSING_NOTICE).await;
        }
        Ok(())
    }

    /// Strips the controls from the last now-playing card, if any.
    async fn retire_card(&self, guild_id: GuildId) {
        let previous = self.sessions.get_mut(&guild_id).and_then(|mut session| {
            let message = session.now_playing.take()?;
            Some((session.text_channel?, message))
        });

        if let Some((channel, message)) = previous {
            if let Err(e) = self.notifier.retire_controls(channel, message).await {
                debug!("No se pudieron retirar los controles: {:?}", e);
            }
        }
    }

    fn text_channel(&self, guild_id: GuildId) -> Option<ChannelId> {
        self.sessions
            .get(&guild_id)
            .and_then(|session| session.text_channel)
            .or_else(|| self.provider.get(guild_id).map(|s| s.text_channel()))
    }

    async fn notify(&self, guild_id: GuildId, content: &str) {
        let Some(channel) = self.text_channel(guild_id) else {
            debug!("Guild {} sin canal de texto asociado", guild_id);
            return;
        };

        if let Err(e) = self.notifier.notice(channel, content.to_string()).await {
            warn!("Error al enviar aviso en guild {}: {:?}", guild_id, e);
        }
    }
}

/// Feeds every session event to the orchestrator, in arrival order, until all
/// senders are gone.
pub async fn run_event_pump(
    orchestrator: Arc<SessionOrchestrator>,
    events: flume::Receiver<(GuildId, SessionEvent)>,
) {
    info!("📡 Procesador de eventos de sesión iniciado");

    while let Ok((guild_id, event)) = events.recv_async().await {
        let name = event.name();
        if let Err(e) = orchestrator.handle(guild_id, event).await {
            warn!("Evento {} en guild {} no aplicado: {}", name, guild_id, e);
        }
    }

    info!("📡 Procesador de eventos detenido");
}
