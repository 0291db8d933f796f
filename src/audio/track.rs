use serenity::model::id::UserId;
use std::time::Duration;

/// A playable track as seen by the bot.
///
/// `encoded` is the node's opaque playback payload; everything else is
/// display metadata. Only title, author, uri and source are inspected when
/// looking for an alternative source.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Track {
    pub encoded: String,
    pub identifier: String,
    pub title: String,
    pub author: String,
    pub duration: Duration,
    pub uri: Option<String>,
    pub source_name: String,
    pub artwork_url: Option<String>,
    pub requester: Option<UserId>,
}

impl Track {
    /// True when the track's uri already points at YouTube.
    pub fn is_youtube(&self) -> bool {
        self.uri
            .as_deref()
            .map(|uri| uri.contains("youtube.com") || uri.contains("youtu.be"))
            .unwrap_or(false)
    }

    /// Markdown link used in embeds; falls back to the bare title.
    pub fn markdown_link(&self) -> String {
        match &self.uri {
            Some(uri) => format!("[{}]({})", self.title, uri),
            None => self.title.clone(),
        }
    }
}

#[cfg(test)]
impl Track {
    pub fn new(encoded: impl Into<String>, title: impl Into<String>, author: impl Into<String>) -> Self {
        let encoded = encoded.into();
        Self {
            identifier: encoded.clone(),
            encoded,
            title: title.into(),
            author: author.into(),
            duration: Duration::ZERO,
            uri: None,
            source_name: "unknown".into(),
            artwork_url: None,
            requester: None,
        }
    }

    pub fn with_uri(mut self, uri: impl Into<String>) -> Self {
        self.uri = Some(uri.into());
        self
    }

    pub fn with_source(mut self, source_name: impl Into<String>) -> Self {
        self.source_name = source_name.into();
        self
    }

    pub fn with_duration(mut self, duration: Duration) -> Self {
        self.duration = duration;
        self
    }

    pub fn with_requester(mut self, requester: UserId) -> Self {
        self.requester = Some(requester);
        self
    }
}

/// Outcome of a search against the audio node.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SearchResult {
    pub tracks: Vec<Track>,
    /// Set when the node resolved the query to a playlist.
    pub playlist: Option<String>,
}

impl SearchResult {
    pub fn is_empty(&self) -> bool {
        self.tracks.is_empty()
    }
}

#[cfg(test)]
impl SearchResult {
    pub fn tracks(tracks: Vec<Track>) -> Self {
        Self {
            tracks,
            playlist: None,
        }
    }

    pub fn playlist(name: impl Into<String>, tracks: Vec<Track>) -> Self {
        Self {
            tracks,
            playlist: Some(name.into()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn youtube_detection_uses_the_uri() {
        let yt = Track::new("a", "Song", "Band").with_uri("https://www.youtube.com/watch?v=x");
        let short = Track::new("b", "Song", "Band").with_uri("https://youtu.be/x");
        let sc = Track::new("c", "Song", "Band").with_uri("https://soundcloud.com/band/song");
        let bare = Track::new("d", "Song", "Band");

        assert!(yt.is_youtube());
        assert!(short.is_youtube());
        assert!(!sc.is_youtube());
        assert!(!bare.is_youtube());
    }

    #[test]
    fn markdown_link_falls_back_to_title() {
        let linked = Track::new("a", "Song", "Band").with_uri("https://example.com/s");
        assert_eq!(linked.markdown_link(), "[Song](https://example.com/s)");
        assert_eq!(Track::new("a", "Song", "Band").markdown_link(), "Song");
    }
}
