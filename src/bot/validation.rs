//! Input checks applied before a query reaches the audio node.

use regex::Regex;
use serenity::model::permissions::Permissions;
use std::sync::LazyLock;
use url::Url;

use crate::error::MusicError;

pub const MAX_QUERY_LEN: usize = 500;

static DANGEROUS_SCHEMES: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?i)(javascript|data|vbscript):").expect("static regex"));

static BLOCKED_IP_PATTERNS: LazyLock<Vec<Regex>> = LazyLock::new(|| {
    [
        r"^127\.",                       // Loopback
        r"(?i)^localhost$",
        r"^10\.",                        // 10.0.0.0/8
        r"^172\.(1[6-9]|2[0-9]|3[01])\.", // 172.16.0.0/12
        r"^192\.168\.",                  // 192.168.0.0/16
        r"^169\.254\.",                  // Link-local
        r"^0\.",
        r"^\[?::1\]?$",
    ]
    .iter()
    .map(|pattern| Regex::new(pattern).expect("static regex"))
    .collect()
});

/// Cloud metadata endpoints.
const BLOCKED_HOSTS: &[&str] = &["169.254.169.254", "metadata.google.internal", "metadata"];

const PLATFORMS: &[(&str, &[&str])] = &[
    ("YouTube", &["youtube.com", "youtu.be"]),
    ("Spotify", &["open.spotify.com", "spotify.com"]),
    ("Apple Music", &["music.apple.com"]),
    ("Deezer", &["deezer.com"]),
    ("SoundCloud", &["soundcloud.com"]),
    ("Bandcamp", &["bandcamp.com"]),
    ("Twitch", &["twitch.tv"]),
];

/// Trims and sanitises a search query or url.
pub fn sanitize_query(query: &str) -> Result<String, MusicError> {
    let trimmed = query.trim();

    if trimmed.is_empty() {
        return Err(MusicError::InvalidQuery("The query whispers too softly to be heard."));
    }

    if trimmed.chars().count() > MAX_QUERY_LEN {
        return Err(MusicError::InvalidQuery(
            "The query resonates too powerfully - please shorten thy seeking.",
        ));
    }

    if trimmed.contains('\0') {
        return Err(MusicError::InvalidQuery("The query contains forbidden void characters."));
    }

    let without_brackets: String = trimmed.chars().filter(|c| !matches!(c, '<' | '>')).collect();
    let sanitized = DANGEROUS_SCHEMES.replace_all(&without_brackets, "").trim().to_string();

    if sanitized.is_empty() {
        return Err(MusicError::InvalidQuery("The query whispers too softly to be heard."));
    }

    Ok(sanitized)
}

/// Parses `query` as an http(s) url, if it is one.
pub fn as_url(query: &str) -> Option<Url> {
    Url::parse(query)
        .ok()
        .filter(|url| matches!(url.scheme(), "http" | "https"))
}

/// Names the streaming platform behind `url`, or checks an arbitrary http
/// stream against the SSRF denylist.
pub fn validate_music_url(url: &Url) -> Result<&'static str, MusicError> {
    let host = url
        .host_str()
        .map(|h| h.to_lowercase())
        .ok_or_else(|| MusicError::UnsafeUrl("Invalid hostname".into()))?;

    for (name, domains) in PLATFORMS {
        if domains
            .iter()
            .any(|domain| host == *domain || host.ends_with(&format!(".{}", domain)))
        {
            return Ok(name);
        }
    }

    check_url_safety(url)?;
    Ok("HTTP Stream")
}

/// Rejects urls pointing at private networks or cloud metadata services.
pub fn check_url_safety(url: &Url) -> Result<(), MusicError> {
    if !matches!(url.scheme(), "http" | "https") {
        return Err(MusicError::UnsafeUrl("Only HTTP and HTTPS protocols allowed".into()));
    }

    let host = url
        .host_str()
        .map(|h| h.to_lowercase())
        .filter(|h| !h.is_empty())
        .ok_or_else(|| MusicError::UnsafeUrl("Invalid hostname".into()))?;

    if BLOCKED_HOSTS.contains(&host.as_str()) {
        return Err(MusicError::UnsafeUrl("Cloud metadata endpoint blocked".into()));
    }

    if BLOCKED_IP_PATTERNS.iter().any(|pattern| pattern.is_match(&host)) {
        return Err(MusicError::UnsafeUrl("Private IP address blocked".into()));
    }

    Ok(())
}

/// Full check for the `play` query: sanitise, and when it is a url make sure
/// it is a known platform or a public stream.
pub fn validate_play_query(query: &str) -> Result<String, MusicError> {
    let sanitized = sanitize_query(query)?;
    if let Some(url) = as_url(&sanitized) {
        validate_music_url(&url)?;
    }
    Ok(sanitized)
}

/// Voice permissions the bot lacks in a channel.
pub fn missing_voice_permissions(permissions: Permissions) -> Vec<&'static str> {
    let mut missing = Vec::new();
    if !permissions.connect() {
        missing.push("CONNECT");
    }
    if !permissions.speak() {
        missing.push("SPEAK");
    }
    missing
}
