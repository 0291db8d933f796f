use anyhow::Result;
use dashmap::DashMap;
use serenity::model::id::GuildId;
use tracing::{debug, info, warn};

use super::{session::PlaybackSession, track::Track};

pub const MAX_RETRY_ATTEMPTS: u8 = 2;

/// Identity of a track for retry accounting: guild plus lower-cased
/// author and title, so the same song re-resolved from another source still
/// counts against one budget.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct RetryKey {
    guild_id: GuildId,
    author: String,
    title: String,
}

impl RetryKey {
    pub fn new(guild_id: GuildId, track: &Track) -> Self {
        Self {
            guild_id,
            author: track.author.to_lowercase(),
            title: track.title.to_lowercase(),
        }
    }
}

/// Caps how many times a failing track is swapped for an alternative source.
#[derive(Debug)]
pub struct FallbackTracker {
    attempts: DashMap<RetryKey, u8>,
    max_attempts: u8,
}

impl FallbackTracker {
    pub fn new(max_attempts: u8) -> Self {
        Self {
            attempts: DashMap::new(),
            max_attempts,
        }
    }

    /// Tries to replace `failed` with the same song from another source.
    ///
    /// Returns `true` when the substitute took the failed track's place. The cap is checked before any search is issued; once it
    /// is reached the entry is purged and `false` is returned.
    pub async fn attempt_fallback(&self, session: &dyn PlaybackSession, failed: &Track) -> bool {
        let key = RetryKey::new(session.guild_id(), failed);

        let attempt = {
            let mut count = self.attempts.entry(key.clone()).or_insert(0);
            if *count >= self.max_attempts {
                drop(count);
                self.attempts.remove(&key);
                warn!(
                    "⛔ Máximo de reintentos ({}) alcanzado para: {}",
                    self.max_attempts, failed.title
                );
                return false;
            }
            *count += 1;
            *count
        };

        info!(
            "🔁 Buscando fuente alternativa para \"{}\" (intento {}/{})",
            failed.title, attempt, self.max_attempts
        );

        for query in alternative_queries(failed) {
            debug!("Probando fuente alternativa: {}", query);

            match session.search(&query, failed.requester).await {
                Ok(result) => {
                    let Some(substitute) = result.tracks.into_iter().next() else {
                        continue;
                    };

                    info!(
                        "✅ Fuente alternativa encontrada: {} - {}",
                        substitute.source_name, substitute.title
                    );

                    if let Err(e) = splice(session, failed, substitute).await {
                        warn!("Error al colocar la alternativa: {:?}", e);
                        return false;
                    }

                    self.attempts.remove(&key);
                    return true;
                }
                Err(e) => {
                    debug!("Búsqueda alternativa falló para \"{}\": {:?}", query, e);
                }
            }
        }

        warn!("❌ Sin fuentes alternativas para: {}", failed.title);
        false
    }

    /// Forgets the retry count for a track that started playing.
    pub fn reset(&self, guild_id: GuildId, track: &Track) {
        self.attempts.remove(&RetryKey::new(guild_id, track));
    }

    /// Drops every retry entry belonging to `guild_id`.
    pub fn cleanup_guild(&self, guild_id: GuildId) {
        self.attempts.retain(|key, _| key.guild_id != guild_id);
        debug!("🧹 Reintentos limpiados para guild {}", guild_id);
    }

    #[cfg(test)]
    pub fn attempts(&self, guild_id: GuildId, track: &Track) -> u8 {
        self.attempts
            .get(&RetryKey::new(guild_id, track))
            .map(|count| *count)
            .unwrap_or(0)
    }
}

impl Default for FallbackTracker {
    fn default() -> Self {
        Self::new(MAX_RETRY_ATTEMPTS)
    }
}

/// Whether `track` is still the one the session is playing. A failed read
/// counts as "no".
pub async fn is_still_playing(session: &dyn PlaybackSession, track: &Track) -> bool {
    match session.current().await {
        Ok(current) => current.is_some_and(|current| current.encoded == track.encoded),
        Err(e) => {
            warn!("No se pudo consultar el track actual: {:?}", e);
            false
        }
    }
}

/// Puts `substitute` where `failed` was.
///
/// The player may already have moved past the failed track; the track it
/// advanced to goes back to the front of the queue, right after the
/// substitute.
async fn splice(session: &dyn PlaybackSession, failed: &Track, substitute: Track) -> Result<()> {
    match session.current().await? {
        Some(current) if current.encoded == failed.encoded => {
            session.insert_front(substitute).await?;
            session.skip().await?;
        }
        Some(advanced) => {
            debug!("El player ya avanzó a \"{}\", se devuelve a la cola", advanced.title);
            session.insert_front(advanced).await?;
            session.insert_front(substitute).await?;
            session.skip().await?;
        }
        None => {
            session.insert_front(substitute).await?;
            session.start().await?;
        }
    }
    Ok(())
}

/// Queries tried in order when a track fails.
pub fn alternative_queries(track: &Track) -> Vec<String> {
    let title = track.title.trim();
    let author = track.author.trim();
    let mut queries = Vec::with_capacity(4);

    if !author.is_empty() && !title.is_empty() {
        queries.push(format!("ytsearch:{} {}", author, title));
    }

    if !title.is_empty() {
        queries.push(format!("ytsearch:{}", title));
    }

    if let Some(uri) = track.uri.as_deref().filter(|_| !track.is_youtube()) {
        queries.push(uri.to_string());
    }

    if !author.is_empty() && !title.is_empty() {
        queries.push(format!("scsearch:{} {}", author, title));
    }

    queries
}
