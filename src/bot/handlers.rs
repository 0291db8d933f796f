use serenity::{
    model::{
        id::{ChannelId, GuildId, UserId},
        permissions::Permissions,
    },
    prelude::TypeMapKey,
};
use std::sync::Arc;
use tracing::info;

use super::{
    rate_limit::RateLimiter,
    validation::{missing_voice_permissions, validate_play_query},
};
use crate::{
    audio::{
        history::TrackHistory,
        session::{DestroyReason, PlaybackSession, SessionProvider},
        track::Track,
    },
    error::MusicError,
    ui::buttons::ButtonAction,
};

/// Registration data for one slash command.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CommandSpec {
    pub name: &'static str,
    pub description: &'static str,
    /// Required string option, as `(name, description)`.
    pub option: Option<(&'static str, &'static str)>,
}

pub const CATALOG: &[CommandSpec] = &[
    CommandSpec {
        name: "play",
        description: "Play a song from YouTube, Spotify, or SoundCloud",
        option: Some(("query", "Song name, URL, or playlist URL")),
    },
    CommandSpec {
        name: "pause",
        description: "Pause or resume playback",
        option: None,
    },
    CommandSpec {
        name: "skip",
        description: "Skip to the next track",
        option: None,
    },
    CommandSpec {
        name: "back",
        description: "Go back to the previous track",
        option: None,
    },
    CommandSpec {
        name: "shuffle",
        description: "Shuffle the queue",
        option: None,
    },
    CommandSpec {
        name: "queue",
        description: "Show the current music queue",
        option: None,
    },
    CommandSpec {
        name: "nowplaying",
        description: "Show the currently playing track",
        option: None,
    },
    CommandSpec {
        name: "stop",
        description: "Stop playback and clear the queue",
        option: None,
    },
];

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MusicCommand {
    Play { query: String },
    Pause,
    Skip,
    Back,
    Shuffle,
    Queue,
    NowPlaying,
    Stop,
}

impl MusicCommand {
    /// Builds a command from its registered name and `query` option.
    pub fn parse(name: &str, query: Option<&str>) -> Option<Self> {
        let command = match name {
            "play" => Self::Play {
                query: query?.to_string(),
            },
            "pause" => Self::Pause,
            "skip" => Self::Skip,
            "back" => Self::Back,
            "shuffle" => Self::Shuffle,
            "queue" => Self::Queue,
            "nowplaying" => Self::NowPlaying,
            "stop" => Self::Stop,
            _ => return None,
        };
        Some(command)
    }

    pub fn name(&self) -> &'static str {
        match self {
            Self::Play { .. } => "play",
            Self::Pause => "pause",
            Self::Skip => "skip",
            Self::Back => "back",
            Self::Shuffle => "shuffle",
            Self::Queue => "queue",
            Self::NowPlaying => "nowplaying",
            Self::Stop => "stop",
        }
    }

    /// Commands that talk to the audio node before answering.
    pub fn defers(&self) -> bool {
        matches!(self, Self::Play { .. })
    }
}

impl From<ButtonAction> for MusicCommand {
    fn from(action: ButtonAction) -> Self {
        match action {
            ButtonAction::Previous => Self::Back,
            ButtonAction::PauseToggle => Self::Pause,
            ButtonAction::Skip => Self::Skip,
            ButtonAction::Shuffle => Self::Shuffle,
            ButtonAction::Stop => Self::Stop,
        }
    }
}

/// Who invoked a command, and from where.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Invocation {
    pub guild_id: Option<GuildId>,
    pub user_id: UserId,
    pub user_voice: Option<ChannelId>,
    pub text_channel: ChannelId,
    /// Bot permissions in `user_voice`, when the cache could compute them.
    pub bot_voice_permissions: Option<Permissions>,
}

/// What to answer the interaction with.
#[derive(Debug, Clone, PartialEq)]
pub enum Reply {
    Success(String),
    Notice { content: String, ephemeral: bool },
    NowPlaying(Track),
    Queue { current: Track, upcoming: Vec<Track> },
}

impl Reply {
    /// Button answers are only shown to the presser.
    fn into_private(self) -> Self {
        match self {
            Self::Success(content) | Self::Notice { content, .. } => Self::Notice {
                content,
                ephemeral: true,
            },
            other => other,
        }
    }
}

/// Shared state the interaction layer needs.
pub struct MusicContext {
    pub provider: Arc<dyn SessionProvider>,
    pub history: Arc<TrackHistory>,
    pub rate_limiter: Arc<RateLimiter>,
}

impl TypeMapKey for MusicContext {
    type Value = Arc<MusicContext>;
}

impl MusicContext {
    pub async fn execute(
        &self,
        invocation: &Invocation,
        command: MusicCommand,
    ) -> Result<Reply, MusicError> {
        let guild_id = invocation.guild_id.ok_or(MusicError::NotInGuild)?;

        match command {
            MusicCommand::Play { query } => self.play(guild_id, invocation, &query).await,
            MusicCommand::Pause => self.pause(guild_id, invocation).await,
            MusicCommand::Skip => self.skip(guild_id, invocation).await,
            MusicCommand::Back => self.back(guild_id, invocation).await,
            MusicCommand::Shuffle => self.shuffle(guild_id, invocation).await,
            MusicCommand::Queue => self.queue(guild_id).await,
            MusicCommand::NowPlaying => self.now_playing(guild_id).await,
            MusicCommand::Stop => self.stop(guild_id, invocation).await,
        }
    }

    /// Transport buttons share the command guards; answers are ephemeral.
    pub async fn press(
        &self,
        invocation: &Invocation,
        action: ButtonAction,
    ) -> Result<Reply, MusicError> {
        self.execute(invocation, action.into())
            .await
            .map(Reply::into_private)
    }

    async fn play(
        &self,
        guild_id: GuildId,
        invocation: &Invocation,
        query: &str,
    ) -> Result<Reply, MusicError> {
        let query = validate_play_query(query)?;
        let voice = invocation.user_voice.ok_or(MusicError::NotInVoice)?;

        let session = match self.provider.get(guild_id) {
            Some(session) => session,
            None => {
                if let Some(permissions) = invocation.bot_voice_permissions {
                    let missing = missing_voice_permissions(permissions);
                    if !missing.is_empty() {
                        return Err(MusicError::MissingPermissions(missing));
                    }
                }
                info!("🔊 Creando sesión en guild {} (canal {})", guild_id, voice);
                self.provider
                    .create(guild_id, voice, invocation.text_channel)
                    .await?
            }
        };

        let result = session.search(&query, Some(invocation.user_id)).await?;
        if result.is_empty() {
            return Err(MusicError::NoResults);
        }

        let idle = session.current().await?.is_none();

        let message = match result.playlist {
            Some(name) => {
                let count = result.tracks.len();
                session.enqueue(result.tracks).await?;
                format!(
                    "Attuning to playlist **{}** - {} harmonies shall resonate through the cosmos.",
                    name, count
                )
            }
            None => {
                let Some(track) = result.tracks.into_iter().next() else {
                    return Err(MusicError::NoResults);
                };
                let title = track.title.clone();
                session.enqueue(vec![track]).await?;
                if idle {
                    format!("Attuning to: **{}**", title)
                } else {
                    format!(
                        "Attuning to: **{}**\n*This harmony shall join the celestial queue.*",
                        title
                    )
                }
            }
        };

        if idle {
            // Un player que quedó en pausa al vaciarse la cola no arrancaría
            if session.is_paused().await? {
                session.set_paused(false).await?;
            }
            session.start().await?;
        }

        Ok(Reply::Success(message))
    }

    async fn pause(&self, guild_id: GuildId, invocation: &Invocation) -> Result<Reply, MusicError> {
        let session = self.shared_session(guild_id, invocation)?;
        if session.current().await?.is_none() {
            return Err(MusicError::NothingPlaying);
        }

        let paused = !session.is_paused().await?;
        session.set_paused(paused).await?;

        let message = if paused {
            "⏸️ *The vibrations rest...*"
        } else {
            "▶️ *The harmonies flow anew!*"
        };
        Ok(Reply::Success(message.to_string()))
    }

    async fn skip(&self, guild_id: GuildId, invocation: &Invocation) -> Result<Reply, MusicError> {
        let session = self.shared_session(guild_id, invocation)?;
        if session.upcoming().await?.is_empty() {
            return Err(MusicError::EmptyQueue);
        }

        session.skip().await?;
        Ok(Reply::Success("⏭️ Transcending to the next harmony...".into()))
    }

    /// Requeues the last finished track in front and skips to it.
    async fn back(&self, guild_id: GuildId, invocation: &Invocation) -> Result<Reply, MusicError> {
        let session = self.shared_session(guild_id, invocation)?;
        let previous = self
            .history
            .previous(guild_id)
            .ok_or(MusicError::NoPreviousTrack)?;

        info!("⏮️ Volviendo a \"{}\" en guild {}", previous.title, guild_id);
        session.insert_front(previous).await?;
        session.skip().await?;

        Ok(Reply::Success("⏮️ *Returning to the echoes of the past...*".into()))
    }

    async fn shuffle(&self, guild_id: GuildId, invocation: &Invocation) -> Result<Reply, MusicError> {
        let session = self.shared_session(guild_id, invocation)?;
        let upcoming = session.upcoming().await?.len();
        if upcoming == 0 {
            return Err(MusicError::EmptyQueue);
        }

        session.shuffle().await?;
        Ok(Reply::Success(format!(
            "🔀 The cosmic order has been rearranged... {} harmonies shall flow in divine chaos.",
            upcoming
        )))
    }

    async fn queue(&self, guild_id: GuildId) -> Result<Reply, MusicError> {
        let session = self.provider.get(guild_id).ok_or(MusicError::NoSession)?;
        let current = session.current().await?.ok_or(MusicError::NothingPlaying)?;
        let upcoming = session.upcoming().await?;
        Ok(Reply::Queue { current, upcoming })
    }

    async fn now_playing(&self, guild_id: GuildId) -> Result<Reply, MusicError> {
        let session = self.provider.get(guild_id).ok_or(MusicError::NoSession)?;
        let current = session.current().await?.ok_or(MusicError::NoSession)?;
        Ok(Reply::NowPlaying(current))
    }

    async fn stop(&self, guild_id: GuildId, invocation: &Invocation) -> Result<Reply, MusicError> {
        let session = self.shared_session(guild_id, invocation)?;
        session.destroy(DestroyReason::Stopped).await?;
        Ok(Reply::Notice {
            content: "*Slumbers...*".into(),
            ephemeral: false,
        })
    }

    /// Active session whose voice channel the invoker is sitting in.
    fn shared_session(
        &self,
        guild_id: GuildId,
        invocation: &Invocation,
    ) -> Result<Arc<dyn PlaybackSession>, MusicError> {
        let session = self.provider.get(guild_id).ok_or(MusicError::NoSession)?;
        if invocation.user_voice != Some(session.voice_channel()) {
            return Err(MusicError::NotSameChannel);
        }
        Ok(session)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::audio::{
        session::fake::{FakeProvider, FakeSession},
        track::SearchResult,
    };
    use pretty_assertions::assert_eq;

    const GUILD: u64 = 1;
    const VOICE: u64 = 2;
    const TEXT: u64 = 3;

    fn song(name: &str) -> Track {
        Track::new(format!("enc-{}", name), name, "Band")
    }

    fn invocation() -> Invocation {
        Invocation {
            guild_id: Some(GuildId::new(GUILD)),
            user_id: UserId::new(42),
            user_voice: Some(ChannelId::new(VOICE)),
            text_channel: ChannelId::new(TEXT),
            bot_voice_permissions: Some(Permissions::CONNECT | Permissions::SPEAK),
        }
    }

    fn context(provider: FakeProvider) -> (MusicContext, Arc<FakeProvider>) {
        let provider = Arc::new(provider);
        let context = MusicContext {
            provider: provider.clone(),
            history: Arc::new(TrackHistory::default()),
            rate_limiter: Arc::new(RateLimiter::default()),
        };
        (context, provider)
    }

    fn with_session(session: FakeSession) -> (MusicContext, Arc<FakeSession>) {
        let session = Arc::new(session);
        let (context, _) = context(FakeProvider::with_session(session.clone()));
        (context, session)
    }

    #[test]
    fn catalog_names_parse_back() {
        for spec in CATALOG {
            let command = MusicCommand::parse(spec.name, Some("x")).unwrap();
            assert_eq!(command.name(), spec.name);
        }
        assert_eq!(MusicCommand::parse("play", None), None);
        assert_eq!(MusicCommand::parse("volume", None), None);
        assert!(MusicCommand::parse("play", Some("x")).unwrap().defers());
    }

    #[tokio::test]
    async fn play_creates_a_session_and_starts_when_idle() {
        let track = song("a");
        let prepared = FakeSession::new(GUILD, 99, 99)
            .with_result("daft punk", SearchResult::tracks(vec![track.clone(), song("b")]));
        let (ctx, provider) = context(FakeProvider::preparing(prepared));

        let reply = ctx
            .execute(&invocation(), MusicCommand::Play { query: "  daft punk ".into() })
            .await
            .unwrap();

        assert_eq!(reply, Reply::Success("Attuning to: **a**".into()));
        assert_eq!(
            provider.created.lock().unwrap().clone(),
            vec![(GuildId::new(GUILD), ChannelId::new(VOICE), ChannelId::new(TEXT))]
        );
        let session = provider.session().unwrap();
        session.snapshot(|s| {
            assert_eq!(s.starts, 1);
            assert_eq!(s.current.as_ref(), Some(&track));
            assert!(s.queue.is_empty());
        });
    }

    #[tokio::test]
    async fn play_while_busy_only_queues() {
        let (ctx, session) = with_session(
            FakeSession::new(GUILD, VOICE, TEXT)
                .with_result("next", SearchResult::tracks(vec![song("b")]))
                .playing(song("a")),
        );

        let reply = ctx
            .execute(&invocation(), MusicCommand::Play { query: "next".into() })
            .await
            .unwrap();

        assert_eq!(
            reply,
            Reply::Success("Attuning to: **b**\n*This harmony shall join the celestial queue.*".into())
        );
        session.snapshot(|s| {
            assert_eq!(s.starts, 0);
            assert_eq!(s.queue.len(), 1);
        });
    }

    #[tokio::test]
    async fn play_resumes_a_player_left_paused_on_an_empty_queue() {
        let (ctx, session) = with_session(
            FakeSession::new(GUILD, VOICE, TEXT)
                .with_result("again", SearchResult::tracks(vec![song("b")])),
        );
        session.state.lock().unwrap().paused = true;

        let reply = ctx
            .execute(&invocation(), MusicCommand::Play { query: "again".into() })
            .await
            .unwrap();

        assert_eq!(reply, Reply::Success("Attuning to: **b**".into()));
        session.snapshot(|s| {
            assert!(!s.paused);
            assert_eq!(s.starts, 1);
            assert_eq!(s.current.as_ref(), Some(&song("b")));
        });
    }

    #[tokio::test]
    async fn play_enqueues_whole_playlists() {
        let tracks = vec![song("a"), song("b"), song("c")];
        let (ctx, session) = with_session(
            FakeSession::new(GUILD, VOICE, TEXT)
                .with_result(
                    "https://www.youtube.com/playlist?list=x",
                    SearchResult::playlist("Mix", tracks),
                )
                .playing(song("z")),
        );

        let reply = ctx
            .execute(
                &invocation(),
                MusicCommand::Play {
                    query: "https://www.youtube.com/playlist?list=x".into(),
                },
            )
            .await
            .unwrap();

        assert_eq!(
            reply,
            Reply::Success(
                "Attuning to playlist **Mix** - 3 harmonies shall resonate through the cosmos."
                    .into()
            )
        );
        assert_eq!(session.snapshot(|s| s.queue.len()), 3);
    }

    #[tokio::test]
    async fn play_rejects_bad_input_before_touching_the_node() {
        let (ctx, provider) = context(FakeProvider::default());

        let mut dm = invocation();
        dm.guild_id = None;
        let result = ctx.execute(&dm, MusicCommand::Play { query: "a".into() }).await;
        assert!(matches!(result, Err(MusicError::NotInGuild)));

        let mut outside = invocation();
        outside.user_voice = None;
        let result = ctx.execute(&outside, MusicCommand::Play { query: "a".into() }).await;
        assert!(matches!(result, Err(MusicError::NotInVoice)));

        let result = ctx
            .execute(
                &invocation(),
                MusicCommand::Play {
                    query: "http://169.254.169.254/latest".into(),
                },
            )
            .await;
        assert!(matches!(result, Err(MusicError::UnsafeUrl(_))));

        let mut muted = invocation();
        muted.bot_voice_permissions = Some(Permissions::CONNECT);
        let result = ctx.execute(&muted, MusicCommand::Play { query: "a".into() }).await;
        assert!(matches!(result, Err(MusicError::MissingPermissions(ref m)) if m == &vec!["SPEAK"]));

        assert!(provider.created.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn empty_search_is_reported() {
        let (ctx, _) = with_session(FakeSession::new(GUILD, VOICE, TEXT));
        let result = ctx
            .execute(&invocation(), MusicCommand::Play { query: "nothing".into() })
            .await;
        assert!(matches!(result, Err(MusicError::NoResults)));
    }

    #[tokio::test]
    async fn controls_require_the_same_voice_channel() {
        let (ctx, session) = with_session(FakeSession::new(GUILD, VOICE, TEXT).playing(song("a")));
        let mut elsewhere = invocation();
        elsewhere.user_voice = Some(ChannelId::new(77));

        for command in [MusicCommand::Pause, MusicCommand::Skip, MusicCommand::Back, MusicCommand::Stop] {
            let result = ctx.execute(&elsewhere, command).await;
            assert!(matches!(result, Err(MusicError::NotSameChannel)));
        }
        assert_eq!(session.snapshot(|s| s.destroyed), None);
    }

    #[tokio::test]
    async fn commands_without_a_session() {
        let (ctx, _) = context(FakeProvider::default());
        for command in [MusicCommand::Skip, MusicCommand::Queue, MusicCommand::NowPlaying] {
            let result = ctx.execute(&invocation(), command).await;
            assert!(matches!(result, Err(MusicError::NoSession)));
        }
    }

    #[tokio::test]
    async fn pause_toggles() {
        let (ctx, session) = with_session(FakeSession::new(GUILD, VOICE, TEXT).playing(song("a")));

        let first = ctx.execute(&invocation(), MusicCommand::Pause).await.unwrap();
        assert_eq!(first, Reply::Success("⏸️ *The vibrations rest...*".into()));
        assert!(session.snapshot(|s| s.paused));

        let second = ctx.execute(&invocation(), MusicCommand::Pause).await.unwrap();
        assert_eq!(second, Reply::Success("▶️ *The harmonies flow anew!*".into()));
        assert!(!session.snapshot(|s| s.paused));
    }

    #[tokio::test]
    async fn skip_and_shuffle_need_upcoming_tracks() {
        let (ctx, session) = with_session(FakeSession::new(GUILD, VOICE, TEXT).playing(song("a")));

        let skip = ctx.execute(&invocation(), MusicCommand::Skip).await;
        assert!(matches!(skip, Err(MusicError::EmptyQueue)));
        let shuffle = ctx.execute(&invocation(), MusicCommand::Shuffle).await;
        assert!(matches!(shuffle, Err(MusicError::EmptyQueue)));
        assert_eq!(session.snapshot(|s| (s.skips, s.shuffles)), (0, 0));
    }

    #[tokio::test]
    async fn back_replays_the_last_finished_track() {
        let a = song("a");
        let b = song("b");
        let (ctx, session) = with_session(FakeSession::new(GUILD, VOICE, TEXT).playing(b.clone()));
        let guild = GuildId::new(GUILD);

        // A terminó de forma natural, B está sonando
        ctx.history.record(guild, a.clone());

        let reply = ctx.execute(&invocation(), MusicCommand::Back).await.unwrap();
        assert_eq!(reply, Reply::Success("⏮️ *Returning to the echoes of the past...*".into()));

        session.snapshot(|s| {
            assert_eq!(s.current.as_ref(), Some(&a));
            assert_eq!(s.skips, 1);
        });
        assert!(!ctx.history.has_previous(guild));

        let again = ctx.execute(&invocation(), MusicCommand::Back).await;
        assert!(matches!(again, Err(MusicError::NoPreviousTrack)));
    }

    #[tokio::test]
    async fn back_chain_through_session_events() {
        use crate::audio::{fallback::FallbackTracker, session::{EndReason, SessionEvent}};
        use crate::bot::events::SessionOrchestrator;
        use crate::ui::notifier::MockNotifier;
        use serenity::model::id::MessageId;

        let mut notifier = MockNotifier::new();
        notifier.expect_notice().returning(|_, _| Ok(()));
        notifier
            .expect_now_playing()
            .returning(|_, _| Ok(MessageId::new(1)));
        notifier.expect_retire_controls().returning(|_, _| Ok(()));

        let a = song("a");
        let b = song("b");
        let (ctx, session) = with_session(
            FakeSession::new(GUILD, VOICE, TEXT)
                .playing(a.clone())
                .queued(vec![b.clone()]),
        );
        let orchestrator = SessionOrchestrator::new(
            ctx.provider.clone(),
            Arc::new(notifier),
            ctx.history.clone(),
            Arc::new(FallbackTracker::default()),
        );
        let guild = GuildId::new(GUILD);

        let connected = SessionEvent::Connected {
            voice: ChannelId::new(VOICE),
            text: ChannelId::new(TEXT),
        };
        orchestrator.handle(guild, connected).await.unwrap();
        orchestrator
            .handle(guild, SessionEvent::TrackStart { track: a.clone() })
            .await
            .unwrap();

        // A termina de forma natural y el player pasa a B
        orchestrator
            .handle(
                guild,
                SessionEvent::TrackEnd {
                    track: a.clone(),
                    reason: EndReason::Finished,
                },
            )
            .await
            .unwrap();
        {
            let mut state = session.state.lock().unwrap();
            state.current = state.queue.pop_front();
        }
        orchestrator
            .handle(guild, SessionEvent::TrackStart { track: b.clone() })
            .await
            .unwrap();

        let reply = ctx.execute(&invocation(), MusicCommand::Back).await.unwrap();
        assert_eq!(reply, Reply::Success("⏮️ *Returning to the echoes of the past...*".into()));
        session.snapshot(|s| {
            assert_eq!(s.current.as_ref(), Some(&a));
            assert_eq!(s.skips, 1);
        });

        // B fue reemplazado, no terminó: no entra al historial
        orchestrator
            .handle(
                guild,
                SessionEvent::TrackEnd {
                    track: b,
                    reason: EndReason::Replaced,
                },
            )
            .await
            .unwrap();

        let again = ctx.execute(&invocation(), MusicCommand::Back).await;
        assert!(matches!(again, Err(MusicError::NoPreviousTrack)));
    }

    #[tokio::test]
    async fn queue_shows_current_and_upcoming() {
        let (ctx, _) = with_session(
            FakeSession::new(GUILD, VOICE, TEXT)
                .playing(song("a"))
                .queued(vec![song("b"), song("c")]),
        );

        let reply = ctx.execute(&invocation(), MusicCommand::Queue).await.unwrap();
        assert_eq!(
            reply,
            Reply::Queue {
                current: song("a"),
                upcoming: vec![song("b"), song("c")],
            }
        );
    }

    #[tokio::test]
    async fn stop_destroys_the_session() {
        let (ctx, session) = with_session(FakeSession::new(GUILD, VOICE, TEXT).playing(song("a")));

        let reply = ctx.execute(&invocation(), MusicCommand::Stop).await.unwrap();
        assert_eq!(
            reply,
            Reply::Notice {
                content: "*Slumbers...*".into(),
                ephemeral: false,
            }
        );
        assert_eq!(session.snapshot(|s| s.destroyed), Some(DestroyReason::Stopped));
    }

    #[tokio::test]
    async fn buttons_answer_privately() {
        let (ctx, session) = with_session(
            FakeSession::new(GUILD, VOICE, TEXT)
                .playing(song("a"))
                .queued(vec![song("b")]),
        );

        let reply = ctx.press(&invocation(), ButtonAction::Skip).await.unwrap();
        assert_eq!(
            reply,
            Reply::Notice {
                content: "⏭️ Transcending to the next harmony...".into(),
                ephemeral: true,
            }
        );
        assert_eq!(session.snapshot(|s| s.current.clone()), Some(song("b")));

        let previous = ctx.press(&invocation(), ButtonAction::Previous).await;
        assert!(matches!(previous, Err(MusicError::NoPreviousTrack)));
    }
}
