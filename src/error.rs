use std::time::Duration;
use thiserror::Error;

/// Errors surfaced to the user who triggered an interaction.
///
/// Everything except [`MusicError::Provider`] is a user-input condition:
/// it is answered privately and never retried.
#[derive(Debug, Error)]
pub enum MusicError {
    #[error("command used outside of a guild")]
    NotInGuild,
    #[error("no playback session for this guild")]
    NoSession,
    #[error("user is not in a voice channel")]
    NotInVoice,
    #[error("user is not in the session's voice channel")]
    NotSameChannel,
    #[error("the upcoming queue is empty")]
    EmptyQueue,
    #[error("nothing is playing")]
    NothingPlaying,
    #[error("no previous track in history")]
    NoPreviousTrack,
    #[error("search returned no tracks")]
    NoResults,
    #[error("invalid query: {0}")]
    InvalidQuery(&'static str),
    #[error("unsafe url: {0}")]
    UnsafeUrl(String),
    #[error("missing voice permissions: {0:?}")]
    MissingPermissions(Vec<&'static str>),
    #[error("rate limited for {retry_after:?}")]
    RateLimited { retry_after: Duration },
    #[error("event {event} rejected in state {state}")]
    IllegalTransition {
        state: &'static str,
        event: &'static str,
    },
    #[error("provider failure: {0:#}")]
    Provider(#[from] anyhow::Error),
}

impl MusicError {
    /// Text shown to the user. Provider failures stay generic so internals
    /// never leak into chat.
    pub fn user_message(&self) -> String {
        match self {
            Self::NotInGuild => {
                "This divine command may only be invoked within the sacred halls of a server.".into()
            }
            Self::NoSession => "No celestial harmonies resonate at this moment.".into(),
            Self::NotInVoice => {
                "Thou must dwell within a voice channel to summon the celestial harmonies.".into()
            }
            Self::NotSameChannel => "Thou must share the sacred chamber with Seraphim.".into(),
            Self::EmptyQueue => "No further vibrations await in the celestial queue.".into(),
            Self::NothingPlaying => "The queue is empty.".into(),
            Self::NoPreviousTrack => "No echoes of past vibrations remain.".into(),
            Self::NoResults => "The ethereal realm yielded no resonance for thy seeking.".into(),
            Self::InvalidQuery(reason) => (*reason).to_string(),
            Self::UnsafeUrl(reason) => format!("Security restriction: {}", reason),
            Self::MissingPermissions(missing) => {
                if missing.is_empty() {
                    "Unknown permission error.".into()
                } else {
                    format!(
                        "Seraphim lacks the divine authority to {} in this sacred chamber.",
                        missing.join(" and ")
                    )
                }
            }
            Self::RateLimited { retry_after } => format!(
                "Thou art invoking commands too swiftly. Await {} seconds before thy next summons.",
                retry_after_secs(*retry_after)
            ),
            Self::IllegalTransition { .. } | Self::Provider(_) => {
                "The cosmic forces have disrupted the resonance. Seek thy harmony anew.".into()
            }
        }
    }

    /// Whether the failure was caused by the request rather than the system.
    pub fn is_user_error(&self) -> bool {
        !matches!(self, Self::Provider(_) | Self::IllegalTransition { .. })
    }
}

/// Whole seconds to wait, rounded up so "0 seconds" is never shown.
pub fn retry_after_secs(retry_after: Duration) -> u64 {
    let millis = retry_after.as_millis() as u64;
    millis.div_ceil(1000).max(1)
}
