use anyhow::Result;
use async_trait::async_trait;
use serenity::model::id::{ChannelId, GuildId, UserId};
use std::{fmt, sync::Arc};

use super::track::{SearchResult, Track};

/// Why a track stopped playing.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EndReason {
    /// Played to the end.
    Finished,
    LoadFailed,
    Stopped,
    Replaced,
    Cleanup,
}

impl EndReason {
    /// Only natural completion counts towards history.
    pub fn is_natural(self) -> bool {
        matches!(self, Self::Finished)
    }

    /// Ends after which the player may have run out of tracks. A replaced
    /// track already has its successor; cleanup means the player is gone.
    pub fn may_drain_queue(self) -> bool {
        matches!(self, Self::Finished | Self::LoadFailed | Self::Stopped)
    }
}

/// Why a session was torn down.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DestroyReason {
    /// A user asked for it (stop command or button).
    Stopped,
    /// The queue stayed empty for the whole grace period.
    QueueEmpty,
    /// Nobody but bots was left in the voice channel for the grace period.
    Inactivity,
    /// The bot was removed from the voice channel.
    Disconnected,
}

impl DestroyReason {
    /// Reasons that deserve a closing notice in the text channel.
    pub fn announces_closing(self) -> bool {
        matches!(self, Self::QueueEmpty | Self::Inactivity)
    }
}

impl fmt::Display for DestroyReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Stopped => "stopped",
            Self::QueueEmpty => "queue-empty",
            Self::Inactivity => "inactivity",
            Self::Disconnected => "disconnected",
        };
        f.write_str(name)
    }
}

/// Lifecycle events emitted by a playback session.
#[derive(Debug, Clone, PartialEq)]
pub enum SessionEvent {
    Connected { voice: ChannelId, text: ChannelId },
    TrackStart { track: Track },
    TrackEnd { track: Track, reason: EndReason },
    TrackStuck { track: Track, threshold_ms: u64 },
    TrackError { track: Track, message: String },
    Paused,
    Resumed,
    QueueEnd,
    PlayerDestroy { reason: DestroyReason },
}

impl SessionEvent {
    pub fn name(&self) -> &'static str {
        match self {
            Self::Connected { .. } => "connected",
            Self::TrackStart { .. } => "track-start",
            Self::TrackEnd { .. } => "track-end",
            Self::TrackStuck { .. } => "track-stuck",
            Self::TrackError { .. } => "track-error",
            Self::Paused => "paused",
            Self::Resumed => "resumed",
            Self::QueueEnd => "queue-end",
            Self::PlayerDestroy { .. } => "player-destroy",
        }
    }
}

/// Capability set of a guild's playback session on the audio node.
///
/// The bot never owns queue transitions; it issues commands and reacts to the
/// [`SessionEvent`]s the implementation emits.
#[async_trait]
pub trait PlaybackSession: Send + Sync {
    fn guild_id(&self) -> GuildId;
    fn voice_channel(&self) -> ChannelId;
    fn text_channel(&self) -> ChannelId;

    /// Resolves a query (search prefix or url) into zero or more tracks.
    async fn search(&self, query: &str, requester: Option<UserId>) -> Result<SearchResult>;

    /// Appends tracks to the end of the upcoming queue.
    async fn enqueue(&self, tracks: Vec<Track>) -> Result<()>;

    /// Places a track at position 0 of the upcoming queue.
    async fn insert_front(&self, track: Track) -> Result<()>;

    async fn current(&self) -> Result<Option<Track>>;
    async fn upcoming(&self) -> Result<Vec<Track>>;
    async fn is_paused(&self) -> Result<bool>;

    /// Nothing playing and nothing queued.
    async fn is_idle(&self) -> Result<bool> {
        Ok(self.current().await?.is_none() && self.upcoming().await?.is_empty())
    }

    /// Starts the next queued track when nothing is playing.
    async fn start(&self) -> Result<()>;

    /// Ends the current track; the next queued track (if any) starts.
    async fn skip(&self) -> Result<()>;

    async fn set_paused(&self, paused: bool) -> Result<()>;
    async fn shuffle(&self) -> Result<()>;
    async fn destroy(&self, reason: DestroyReason) -> Result<()>;
}

/// Per-guild lookup and creation of playback sessions.
#[async_trait]
pub trait SessionProvider: Send + Sync {
    fn get(&self, guild_id: GuildId) -> Option<Arc<dyn PlaybackSession>>;

    /// Creates the session and connects it to `voice`, binding `text` for
    /// notifications.
    async fn create(
        &self,
        guild_id: GuildId,
        voice: ChannelId,
        text: ChannelId,
    ) -> Result<Arc<dyn PlaybackSession>>;
}

#[cfg(test)]
pub mod fake {
    //! In-memory session used by the unit tests.

    use super::*;
    use std::collections::{HashMap, VecDeque};
    use std::sync::Mutex;

    #[derive(Debug, Default)]
    pub struct FakeState {
        pub current: Option<Track>,
        pub queue: VecDeque<Track>,
        pub paused: bool,
        pub skips: usize,
        pub starts: usize,
        pub shuffles: usize,
        pub destroyed: Option<DestroyReason>,
        pub searches: Vec<String>,
    }

    /// Scripted search responses keyed by query; unknown queries return
    /// nothing. Queries listed in `failing` return an error.
    pub struct FakeSession {
        pub guild: GuildId,
        pub voice: ChannelId,
        pub text: ChannelId,
        pub state: Mutex<FakeState>,
        pub results: Mutex<HashMap<String, SearchResult>>,
        pub failing: Mutex<Vec<String>>,
    }

    impl FakeSession {
        pub fn new(guild: u64, voice: u64, text: u64) -> Self {
            Self {
                guild: GuildId::new(guild),
                voice: ChannelId::new(voice),
                text: ChannelId::new(text),
                state: Mutex::new(FakeState::default()),
                results: Mutex::new(HashMap::new()),
                failing: Mutex::new(Vec::new()),
            }
        }

        pub fn with_result(self, query: &str, result: SearchResult) -> Self {
            self.results.lock().unwrap().insert(query.to_string(), result);
            self
        }

        pub fn with_failing(self, query: &str) -> Self {
            self.failing.lock().unwrap().push(query.to_string());
            self
        }

        pub fn playing(self, track: Track) -> Self {
            self.state.lock().unwrap().current = Some(track);
            self
        }

        pub fn queued(self, tracks: Vec<Track>) -> Self {
            self.state.lock().unwrap().queue.extend(tracks);
            self
        }

        pub fn snapshot<R>(&self, f: impl FnOnce(&FakeState) -> R) -> R {
            f(&self.state.lock().unwrap())
        }

        fn advance(state: &mut FakeState) {
            state.current = state.queue.pop_front();
        }
    }

    #[async_trait]
    impl PlaybackSession for FakeSession {
        fn guild_id(&self) -> GuildId {
            self.guild
        }

        fn voice_channel(&self) -> ChannelId {
            self.voice
        }

        fn text_channel(&self) -> ChannelId {
            self.text
        }

        async fn search(&self, query: &str, _requester: Option<UserId>) -> Result<SearchResult> {
            self.state.lock().unwrap().searches.push(query.to_string());
            if self.failing.lock().unwrap().iter().any(|q| q == query) {
                anyhow::bail!("search backend unavailable");
            }
            Ok(self
                .results
                .lock()
                .unwrap()
                .get(query)
                .cloned()
                .unwrap_or_default())
        }

        async fn enqueue(&self, tracks: Vec<Track>) -> Result<()> {
            self.state.lock().unwrap().queue.extend(tracks);
            Ok(())
        }

        async fn insert_front(&self, track: Track) -> Result<()> {
            self.state.lock().unwrap().queue.push_front(track);
            Ok(())
        }

        async fn current(&self) -> Result<Option<Track>> {
            Ok(self.state.lock().unwrap().current.clone())
        }

        async fn upcoming(&self) -> Result<Vec<Track>> {
            Ok(self.state.lock().unwrap().queue.iter().cloned().collect())
        }

        async fn is_paused(&self) -> Result<bool> {
            Ok(self.state.lock().unwrap().paused)
        }

        async fn start(&self) -> Result<()> {
            let mut state = self.state.lock().unwrap();
            state.starts += 1;
            if state.current.is_none() {
                Self::advance(&mut state);
            }
            Ok(())
        }

        async fn skip(&self) -> Result<()> {
            let mut state = self.state.lock().unwrap();
            state.skips += 1;
            Self::advance(&mut state);
            Ok(())
        }

        async fn set_paused(&self, paused: bool) -> Result<()> {
            self.state.lock().unwrap().paused = paused;
            Ok(())
        }

        async fn shuffle(&self) -> Result<()> {
            let mut state = self.state.lock().unwrap();
            state.shuffles += 1;
            state.queue.make_contiguous().reverse();
            Ok(())
        }

        async fn destroy(&self, reason: DestroyReason) -> Result<()> {
            self.state.lock().unwrap().destroyed = Some(reason);
            Ok(())
        }
    }

    /// Provider over a single optional fake session.
    ///
    /// A `template` is not live yet; `create` turns it into the session,
    /// keeping its scripted search results.
    #[derive(Default)]
    pub struct FakeProvider {
        pub session: Mutex<Option<Arc<FakeSession>>>,
        pub template: Mutex<Option<FakeSession>>,
        pub created: Mutex<Vec<(GuildId, ChannelId, ChannelId)>>,
    }

    impl FakeProvider {
        pub fn with_session(session: Arc<FakeSession>) -> Self {
            Self {
                session: Mutex::new(Some(session)),
                ..Default::default()
            }
        }

        pub fn preparing(template: FakeSession) -> Self {
            Self {
                template: Mutex::new(Some(template)),
                ..Default::default()
            }
        }

        pub fn session(&self) -> Option<Arc<FakeSession>> {
            self.session.lock().unwrap().clone()
        }
    }

    #[async_trait]
    impl SessionProvider for FakeProvider {
        fn get(&self, guild_id: GuildId) -> Option<Arc<dyn PlaybackSession>> {
            self.session
                .lock()
                .unwrap()
                .as_ref()
                .filter(|s| s.guild == guild_id && s.state.lock().unwrap().destroyed.is_none())
                .map(|s| s.clone() as Arc<dyn PlaybackSession>)
        }

        async fn create(
            &self,
            guild_id: GuildId,
            voice: ChannelId,
            text: ChannelId,
        ) -> Result<Arc<dyn PlaybackSession>> {
            self.created.lock().unwrap().push((guild_id, voice, text));
            let mut session = FakeSession::new(guild_id.get(), voice.get(), text.get());
            if let Some(template) = self.template.lock().unwrap().take() {
                session.results = template.results;
                session.failing = template.failing;
            }
            let session = Arc::new(session);
            *self.session.lock().unwrap() = Some(session.clone());
            Ok(session)
        }
    }
}
