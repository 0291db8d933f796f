use dashmap::DashMap;
use serenity::model::id::GuildId;
use std::collections::VecDeque;
use tracing::debug;

use super::track::Track;

pub const DEFAULT_MAX_HISTORY: usize = 50;

/// Bounded per-guild log of tracks that finished naturally.
///
/// Most recent entry is at the back. Skipped, stopped or replaced tracks are
/// never recorded, so "back" only ever returns something that actually
/// played to completion.
#[derive(Debug)]
pub struct TrackHistory {
    histories: DashMap<GuildId, VecDeque<Track>>,
    max_size: usize,
}

impl TrackHistory {
    pub fn new(max_size: usize) -> Self {
        Self {
            histories: DashMap::new(),
            max_size: max_size.max(1),
        }
    }

    /// Appends a finished track, dropping the oldest entry when full.
    pub fn record(&self, guild_id: GuildId, track: Track) {
        let mut history = self.histories.entry(guild_id).or_default();
        history.push_back(track);

        while history.len() > self.max_size {
            history.pop_front();
        }

        debug!("📜 Historial de {}: {} canciones", guild_id, history.len());
    }

    /// Pops the most recently recorded track.
    ///
    /// One-shot: calling it again walks further back in time.
    pub fn previous(&self, guild_id: GuildId) -> Option<Track> {
        self.histories
            .get_mut(&guild_id)
            .and_then(|mut history| history.pop_back())
    }

    pub fn has_previous(&self, guild_id: GuildId) -> bool {
        self.histories
            .get(&guild_id)
            .map(|history| !history.is_empty())
            .unwrap_or(false)
    }

    pub fn len(&self, guild_id: GuildId) -> usize {
        self.histories
            .get(&guild_id)
            .map(|history| history.len())
            .unwrap_or(0)
    }

    pub fn clear(&self, guild_id: GuildId) {
        self.histories.remove(&guild_id);
    }
}

impl Default for TrackHistory {
    fn default() -> Self {
        Self::new(DEFAULT_MAX_HISTORY)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    fn track(n: usize) -> Track {
        Track::new(format!("enc-{n}"), format!("Title {n}"), "Author")
    }

    #[test]
    fn keeps_only_the_most_recent_tracks_in_reverse_order() {
        let history = TrackHistory::new(3);
        let guild = GuildId::new(1);

        for n in 0..5 {
            history.record(guild, track(n));
        }

        let popped: Vec<String> = std::iter::from_fn(|| history.previous(guild))
            .map(|t| t.title)
            .collect();

        assert_eq!(popped, vec!["Title 4", "Title 3", "Title 2"]);
        assert!(!history.has_previous(guild));
    }

    #[test]
    fn record_then_previous_returns_the_same_track() {
        let history = TrackHistory::default();
        let guild = GuildId::new(7);

        history.record(guild, track(1));
        assert_eq!(history.previous(guild), Some(track(1)));
        assert!(!history.has_previous(guild));
        assert_eq!(history.previous(guild), None);
    }

    #[test]
    fn has_previous_does_not_consume() {
        let history = TrackHistory::default();
        let guild = GuildId::new(2);

        history.record(guild, track(1));
        assert!(history.has_previous(guild));
        assert!(history.has_previous(guild));
        assert_eq!(history.len(guild), 1);
    }

    #[test]
    fn guilds_are_isolated_and_clear_is_scoped() {
        let history = TrackHistory::default();
        let a = GuildId::new(10);
        let b = GuildId::new(11);

        history.record(a, track(1));
        history.record(b, track(2));
        history.clear(a);

        assert_eq!(history.previous(a), None);
        assert_eq!(history.previous(b), Some(track(2)));
    }

    #[test]
    fn untracked_guild_has_nothing() {
        let history = TrackHistory::default();
        let guild = GuildId::new(99);

        assert!(!history.has_previous(guild));
        assert_eq!(history.len(guild), 0);
        assert_eq!(history.previous(guild), None);
    }
}
