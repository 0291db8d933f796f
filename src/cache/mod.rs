//! # Cache Module
//!
//! Keeps the audio node's full track payloads around so the bot can hand a
//! track back to the node (requeue from history, fallback substitutes)
//! without another decode round-trip.
//!
//! Entries are keyed by the encoded track string, which the node guarantees
//! to be unique per track and source.
//!
//! ```env
//! TRACK_CACHE_SIZE=500        # Maximum number of cached payloads
//! ```

pub mod lru_cache;

use lavalink_rs::model::track::TrackData;
use std::time::Duration;
use tracing::info;

use lru_cache::LRUCache;

/// Encoded track string → node payload.
pub type TrackCache = LRUCache<String, TrackData>;

/// Encoded payloads stay valid for a long time, but stale search results are
/// not worth the memory.
const PAYLOAD_TTL: Duration = Duration::from_secs(6 * 3600);

impl TrackCache {
    /// Stores a payload under its own encoded string.
    pub fn remember(&self, data: &TrackData) {
        self.insert_with_ttl(data.encoded.clone(), data.clone(), Some(PAYLOAD_TTL));
    }

    /// Periodic maintenance hook; logs only when something was removed.
    pub fn cleanup_old_entries(&self) {
        let removed = self.cleanup_expired();
        if removed > 0 {
            info!(
                "🧹 Cache cleanup: removed {} expired entries ({}/{} in use)",
                removed,
                self.len(),
                self.capacity()
            );
        }
    }
}
