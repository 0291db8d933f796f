//! Playback sessions backed by a Lavalink v4 node.
//!
//! Node events arrive through `lavalink-rs` hooks, are translated into
//! [`SessionEvent`]s and pushed onto a single channel, so one task sees every
//! guild's events in the order the node produced them. The node has no notion
//! of "queue end" or "player destroyed"; both are synthesised here.

use anyhow::{Context, Result};
use async_trait::async_trait;
use dashmap::DashMap;
use lavalink_rs::{
    hook,
    model::{
        events::{self, TrackEndReason},
        player::ConnectionInfo,
        track::TrackData,
    },
    prelude::{
        LavalinkClient, NodeBuilder, NodeDistributionStrategy, PlayerContext, TrackInQueue,
        TrackLoadData,
    },
};
use rand::seq::SliceRandom;
use serenity::model::id::{ChannelId, GuildId, UserId};
use songbird::Songbird;
use std::{collections::VecDeque, sync::Arc, time::Duration};
use tracing::{debug, error, info, warn};

use super::{
    session::{DestroyReason, EndReason, PlaybackSession, SessionEvent, SessionProvider},
    track::{SearchResult, Track},
};
use crate::{cache::TrackCache, config::Config};

/// Time the player gets to start the next queued track after a track end.
const QUEUE_SETTLE: Duration = Duration::from_secs(1);

/// Live sessions by guild.
type Registry = Arc<DashMap<GuildId, Arc<LavalinkSession>>>;

/// Prefixes the node understands as "search on this platform".
const SEARCH_PREFIXES: &[&str] = &["ytsearch:", "ytmsearch:", "scsearch:", "spsearch:", "amsearch:", "dzsearch:"];

/// Turns user input into a node identifier: urls and prefixed searches pass
/// through, everything else becomes a YouTube search.
pub fn resolve_identifier(query: &str) -> String {
    let query = query.trim();
    if query.starts_with("http://")
        || query.starts_with("https://")
        || SEARCH_PREFIXES.iter().any(|prefix| query.starts_with(prefix))
    {
        query.to_string()
    } else {
        format!("ytsearch:{}", query)
    }
}

fn end_reason(reason: &TrackEndReason) -> EndReason {
    match reason {
        TrackEndReason::Finished => EndReason::Finished,
        TrackEndReason::LoadFailed => EndReason::LoadFailed,
        TrackEndReason::Stopped => EndReason::Stopped,
        TrackEndReason::Replaced => EndReason::Replaced,
        TrackEndReason::Cleanup => EndReason::Cleanup,
    }
}

/// Stores who asked for a track inside the payload's `userData`.
fn tag_requester(data: &mut TrackData, requester: Option<UserId>) {
    if let Some(user) = requester {
        data.user_data = Some(serde_json::json!({ "requester_id": user.get() }));
    }
}

fn requester_of(data: &TrackData) -> Option<UserId> {
    data.user_data
        .as_ref()
        .and_then(|value| value.get("requester_id"))
        .and_then(|id| id.as_u64())
        .filter(|id| *id != 0)
        .map(UserId::new)
}

pub fn to_track(data: &TrackData) -> Track {
    let info = &data.info;
    Track {
        encoded: data.encoded.clone(),
        identifier: info.identifier.clone(),
        title: info.title.clone(),
        author: info.author.clone(),
        duration: Duration::from_millis(info.length),
        uri: info.uri.clone(),
        source_name: info.source_name.clone(),
        artwork_url: info.artwork_url.clone(),
        requester: requester_of(data),
    }
}

/// Shared between the node hooks and the sessions.
pub struct LavalinkBridge {
    events: flume::Sender<(GuildId, SessionEvent)>,
    cache: TrackCache,
    registry: Registry,
    queue_end_grace: Duration,
}

impl LavalinkBridge {
    pub fn new(
        events: flume::Sender<(GuildId, SessionEvent)>,
        cache: TrackCache,
        queue_end_grace: Duration,
    ) -> Self {
        Self {
            events,
            cache,
            registry: Arc::new(DashMap::new()),
            queue_end_grace,
        }
    }

    pub fn cache(&self) -> &TrackCache {
        &self.cache
    }

    fn emit(&self, guild_id: GuildId, event: SessionEvent) {
        if self.events.send((guild_id, event)).is_err() {
            warn!("📪 Canal de eventos cerrado, evento descartado para guild {}", guild_id);
        }
    }

    /// After the grace period, destroys the guild's session if it is still the
    /// same one and still has nothing to play.
    fn schedule_idle_shutdown(&self, guild_id: GuildId) {
        let Some(session) = self.registry.get(&guild_id).map(|s| s.clone()) else {
            return;
        };
        let registry = self.registry.clone();
        let grace = self.queue_end_grace;

        debug!(
            "⏳ Desconexión programada en {} para guild {}",
            humantime::format_duration(grace),
            guild_id
        );

        tokio::spawn(async move {
            tokio::time::sleep(grace).await;

            let still_current = registry
                .get(&guild_id)
                .map(|current| Arc::ptr_eq(current.value(), &session))
                .unwrap_or(false);
            if !still_current {
                return;
            }

            match session.is_idle().await {
                Ok(true) => {
                    info!("🚪 Cola vacía durante el periodo de gracia en guild {}", guild_id);
                    if let Err(e) = session.destroy(DestroyReason::QueueEmpty).await {
                        error!("Error al cerrar sesión inactiva: {:?}", e);
                    }
                }
                Ok(false) => debug!("Guild {} volvió a reproducir, se mantiene la sesión", guild_id),
                Err(e) => warn!("No se pudo verificar el estado de guild {}: {:?}", guild_id, e),
            }
        });
    }
}

fn bridge(client: &LavalinkClient) -> Option<Arc<LavalinkBridge>> {
    match client.data::<LavalinkBridge>() {
        Ok(bridge) => Some(bridge),
        Err(e) => {
            error!("Datos del cliente Lavalink no disponibles: {:?}", e);
            None
        }
    }
}

#[hook]
async fn node_ready(_client: LavalinkClient, session_id: String, event: &events::Ready) {
    info!("🎼 Nodo Lavalink listo (sesión {}, resumed={})", session_id, event.resumed);
}

#[hook]
async fn track_start(client: LavalinkClient, _session_id: String, event: &events::TrackStart) {
    let Some(bridge) = bridge(&client) else { return };
    bridge.cache.remember(&event.track);
    bridge.emit(
        GuildId::new(event.guild_id.0),
        SessionEvent::TrackStart {
            track: to_track(&event.track),
        },
    );
}

#[hook]
async fn track_end(client: LavalinkClient, _session_id: String, event: &events::TrackEnd) {
    let Some(bridge) = bridge(&client) else { return };
    let guild_id = GuildId::new(event.guild_id.0);
    let reason = end_reason(&event.reason);

    bridge.emit(
        guild_id,
        SessionEvent::TrackEnd {
            track: to_track(&event.track),
            reason,
        },
    );

    if !reason.may_drain_queue() {
        return;
    }
    let Some(session) = bridge.registry.get(&guild_id).map(|s| s.clone()) else {
        return;
    };

    // El player avanza la cola por su cuenta; se revisa cuando ya terminó
    tokio::spawn(async move {
        tokio::time::sleep(QUEUE_SETTLE).await;
        if queue_drained(session.as_ref(), reason).await {
            bridge.emit(guild_id, SessionEvent::QueueEnd);
            bridge.schedule_idle_shutdown(guild_id);
        }
    });
}

/// Whether a track end left the session with nothing playing and nothing
/// queued.
async fn queue_drained(session: &dyn PlaybackSession, reason: EndReason) -> bool {
    if !reason.may_drain_queue() {
        return false;
    }
    match session.is_idle().await {
        Ok(idle) => idle,
        Err(e) => {
            warn!("No se pudo leer el estado de guild {}: {:?}", session.guild_id(), e);
            false
        }
    }
}

#[hook]
async fn track_exception(client: LavalinkClient, _session_id: String, event: &events::TrackException) {
    let Some(bridge) = bridge(&client) else { return };
    let exception = &event.exception;

    bridge.emit(
        GuildId::new(event.guild_id.0),
        SessionEvent::TrackError {
            track: to_track(&event.track),
            message: failure_message(&exception.message, &exception.cause),
        },
    );
}

/// The node leaves `message` empty for some failures; `cause` is always set.
fn failure_message(message: &str, cause: &str) -> String {
    if message.trim().is_empty() {
        cause.to_string()
    } else {
        message.to_string()
    }
}

#[hook]
async fn track_stuck(client: LavalinkClient, _session_id: String, event: &events::TrackStuck) {
    let Some(bridge) = bridge(&client) else { return };
    bridge.emit(
        GuildId::new(event.guild_id.0),
        SessionEvent::TrackStuck {
            track: to_track(&event.track),
            threshold_ms: event.threshold_ms,
        },
    );
}

/// One guild's player on the node.
pub struct LavalinkSession {
    guild_id: GuildId,
    voice: ChannelId,
    text: ChannelId,
    client: LavalinkClient,
    player: PlayerContext,
    bridge: Arc<LavalinkBridge>,
    songbird: Arc<Songbird>,
}

impl LavalinkSession {
    /// Full node payload for a track, from the cache or a decode round-trip.
    async fn payload(&self, track: &Track) -> Result<TrackData> {
        let mut data = match self.bridge.cache.get(&track.encoded) {
            Some(data) => data,
            None => {
                let data = self
                    .client
                    .decode_track(self.guild_id.get(), &track.encoded)
                    .await
                    .context("Error al decodificar track")?;
                self.bridge.cache.remember(&data);
                data
            }
        };
        tag_requester(&mut data, track.requester);
        Ok(data)
    }
}

#[async_trait]
impl PlaybackSession for LavalinkSession {
    fn guild_id(&self) -> GuildId {
        self.guild_id
    }

    fn voice_channel(&self) -> ChannelId {
        self.voice
    }

    fn text_channel(&self) -> ChannelId {
        self.text
    }

    async fn search(&self, query: &str, requester: Option<UserId>) -> Result<SearchResult> {
        let identifier = resolve_identifier(query);
        debug!("🔍 Buscando en Lavalink: {}", identifier);

        let loaded = self
            .client
            .load_tracks(self.guild_id.get(), &identifier)
            .await
            .with_context(|| format!("Error al buscar tracks: {}", identifier))?;

        let (playlist, found) = match loaded.data {
            Some(TrackLoadData::Track(track)) => (None, vec![track]),
            Some(TrackLoadData::Search(tracks)) => (None, tracks),
            Some(TrackLoadData::Playlist(playlist)) => (Some(playlist.info.name), playlist.tracks),
            Some(TrackLoadData::Error(e)) => {
                anyhow::bail!("Lavalink no pudo cargar {}: {:?}", identifier, e.message)
            }
            None => (None, Vec::new()),
        };

        let tracks = found
            .into_iter()
            .map(|mut data| {
                tag_requester(&mut data, requester);
                self.bridge.cache.remember(&data);
                to_track(&data)
            })
            .collect();

        Ok(SearchResult { tracks, playlist })
    }

    async fn enqueue(&self, tracks: Vec<Track>) -> Result<()> {
        let queue = self.player.get_queue();
        for track in &tracks {
            let data = self.payload(track).await?;
            queue.push_to_back(data).context("Error al agregar a la cola")?;
        }
        info!("📋 {} canciones agregadas a la cola de {}", tracks.len(), self.guild_id);
        Ok(())
    }

    async fn insert_front(&self, track: Track) -> Result<()> {
        let data = self.payload(&track).await?;
        self.player
            .get_queue()
            .push_to_front(data)
            .context("Error al insertar al inicio de la cola")?;
        Ok(())
    }

    async fn current(&self) -> Result<Option<Track>> {
        let player = self
            .player
            .get_player()
            .await
            .context("Error al consultar el player")?;
        Ok(player.track.as_ref().map(to_track))
    }

    async fn upcoming(&self) -> Result<Vec<Track>> {
        let queue = self
            .player
            .get_queue()
            .get_queue()
            .await
            .context("Error al leer la cola")?;
        Ok(queue.iter().map(|entry| to_track(&entry.track)).collect())
    }

    /// Reads the queue length without copying the queue.
    async fn is_idle(&self) -> Result<bool> {
        let playing = self
            .player
            .get_player()
            .await
            .context("Error al consultar el player")?
            .track
            .is_some();
        let queued = self
            .player
            .get_queue()
            .get_count()
            .await
            .context("Error al leer la cola")?;
        Ok(!playing && queued == 0)
    }

    async fn is_paused(&self) -> Result<bool> {
        let player = self
            .player
            .get_player()
            .await
            .context("Error al consultar el player")?;
        Ok(player.paused)
    }

    async fn start(&self) -> Result<()> {
        let player = self
            .player
            .get_player()
            .await
            .context("Error al consultar el player")?;
        if player.track.is_none() {
            // skip() arranca el siguiente track de la cola
            self.player.skip().context("Error al iniciar la reproducción")?;
        }
        Ok(())
    }

    async fn skip(&self) -> Result<()> {
        let queued = self
            .player
            .get_queue()
            .get_count()
            .await
            .context("Error al leer la cola")?;

        if queued == 0 {
            self.player
                .stop_now()
                .await
                .context("Error al detener el track")?;
        } else {
            self.player.skip().context("Error al saltar el track")?;
        }
        Ok(())
    }

    async fn set_paused(&self, paused: bool) -> Result<()> {
        self.player
            .set_pause(paused)
            .await
            .context("Error al cambiar la pausa")?;

        let event = if paused {
            SessionEvent::Paused
        } else {
            SessionEvent::Resumed
        };
        self.bridge.emit(self.guild_id, event);
        Ok(())
    }

    async fn shuffle(&self) -> Result<()> {
        let queue = self.player.get_queue();
        let mut tracks: Vec<TrackInQueue> = queue
            .get_queue()
            .await
            .context("Error al leer la cola")?
            .into();
        tracks.shuffle(&mut rand::thread_rng());
        queue
            .replace(VecDeque::from(tracks))
            .context("Error al reemplazar la cola")?;
        Ok(())
    }

    async fn destroy(&self, reason: DestroyReason) -> Result<()> {
        self.bridge.registry.remove(&self.guild_id);

        let deleted = self
            .client
            .delete_player(self.guild_id.get())
            .await
            .context("Error al eliminar el player");

        if let Err(e) = self.songbird.remove(self.guild_id).await {
            debug!("Songbird ya no tenía llamada en guild {}: {:?}", self.guild_id, e);
        }

        // El evento se emite aunque el nodo falle, la sesión ya no existe
        self.bridge
            .emit(self.guild_id, SessionEvent::PlayerDestroy { reason });
        info!("👋 Sesión cerrada en guild {} ({})", self.guild_id, reason);

        deleted
    }
}

/// Creates and tracks one [`LavalinkSession`] per guild.
pub struct LavalinkProvider {
    client: LavalinkClient,
    bridge: Arc<LavalinkBridge>,
    songbird: Arc<Songbird>,
    default_volume: u16,
}

impl LavalinkProvider {
    /// Connects to the node described by `config`.
    pub async fn connect(
        config: &Config,
        bot_user: UserId,
        songbird: Arc<Songbird>,
        bridge: Arc<LavalinkBridge>,
    ) -> Result<Self> {
        info!("🎼 Conectando a Lavalink en {}", config.lavalink_address());

        let events = events::Events {
            ready: Some(node_ready),
            track_start: Some(track_start),
            track_end: Some(track_end),
            track_exception: Some(track_exception),
            track_stuck: Some(track_stuck),
            ..Default::default()
        };

        let node = NodeBuilder {
            hostname: config.lavalink_address(),
            is_ssl: config.lavalink_ssl,
            events: events::Events::default(),
            password: config.lavalink_password.clone(),
            user_id: bot_user.get().into(),
            session_id: None,
        };

        let client = LavalinkClient::new_with_data(
            events,
            vec![node],
            NodeDistributionStrategy::new(),
            bridge.clone(),
        )
        .await;

        Ok(Self {
            client,
            bridge,
            songbird,
            default_volume: config.default_volume,
        })
    }

    /// Tears down every live session, e.g. on shutdown.
    pub async fn shutdown(&self) {
        let sessions: Vec<_> = self
            .bridge
            .registry
            .iter()
            .map(|entry| entry.value().clone())
            .collect();

        for session in sessions {
            if let Err(e) = session.destroy(DestroyReason::Stopped).await {
                warn!("Error al cerrar sesión en guild {}: {:?}", session.guild_id, e);
            }
        }
    }
}

#[async_trait]
impl SessionProvider for LavalinkProvider {
    fn get(&self, guild_id: GuildId) -> Option<Arc<dyn PlaybackSession>> {
        self.bridge
            .registry
            .get(&guild_id)
            .map(|session| session.clone() as Arc<dyn PlaybackSession>)
    }

    async fn create(
        &self,
        guild_id: GuildId,
        voice: ChannelId,
        text: ChannelId,
    ) -> Result<Arc<dyn PlaybackSession>> {
        let (info, _call) = self
            .songbird
            .join_gateway(guild_id, voice)
            .await
            .with_context(|| format!("Error al unirse al canal de voz {}", voice))?;

        let connection = ConnectionInfo {
            endpoint: info.endpoint,
            token: info.token,
            session_id: info.session_id,
        };

        let player = self
            .client
            .create_player_context(guild_id.get(), connection)
            .await
            .context("Error al crear el player en Lavalink")?;

        if let Err(e) = player.set_volume(self.default_volume).await {
            warn!("No se pudo fijar el volumen inicial: {:?}", e);
        }

        let session = Arc::new(LavalinkSession {
            guild_id,
            voice,
            text,
            client: self.client.clone(),
            player,
            bridge: self.bridge.clone(),
            songbird: self.songbird.clone(),
        });

        self.bridge.registry.insert(guild_id, session.clone());
        self.bridge
            .emit(guild_id, SessionEvent::Connected { voice, text });
        info!("🔊 Conectado al canal de voz {} en guild {}", voice, guild_id);

        Ok(session)
    }
}
