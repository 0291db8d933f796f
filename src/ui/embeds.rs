use serenity::{
    all::Timestamp,
    builder::{CreateEmbed, CreateEmbedFooter},
};
use std::time::Duration;

use crate::audio::track::Track;

/// Paleta de colores del bot
pub mod colors {
    use serenity::all::Colour;

    pub const CELESTIAL_GOLD: Colour = Colour::new(0xFFD700);
    pub const ERROR_CRIMSON: Colour = Colour::new(0x8B0000);
}

/// Upcoming tracks listed by the queue embed.
pub const QUEUE_PREVIEW_LEN: usize = 10;

/// Card sent to the text channel whenever a track starts.
pub fn now_playing_embed(track: &Track) -> CreateEmbed {
    let requester = track
        .requester
        .map(|user| format!("<@{}>", user))
        .unwrap_or_else(|| "Unknown".to_string());

    let author = if track.author.trim().is_empty() {
        "Unknown"
    } else {
        track.author.as_str()
    };

    let mut embed = CreateEmbed::default()
        .title("✧ Resonating with Cosmic Vibrations")
        .description(format!("**{}**", track.markdown_link()))
        .color(colors::CELESTIAL_GOLD)
        .field("Divine Creator", author, true)
        .field("Duration", format_duration(track.duration), true)
        .field("Summoned by", requester, true)
        .timestamp(Timestamp::now());

    if let Some(artwork) = &track.artwork_url {
        embed = embed.thumbnail(artwork);
    }

    embed
}

/// Current track plus the next [`QUEUE_PREVIEW_LEN`] entries.
pub fn queue_embed(current: &Track, upcoming: &[Track]) -> CreateEmbed {
    let mut description = format!(
        "**Current Resonance:**\n{}\n\n**Forthcoming Vibrations:**",
        current.markdown_link()
    );

    let listing = upcoming
        .iter()
        .take(QUEUE_PREVIEW_LEN)
        .enumerate()
        .map(|(i, track)| {
            format!(
                "{}. {} - {}",
                i + 1,
                track.markdown_link(),
                format_duration(track.duration)
            )
        })
        .collect::<Vec<_>>()
        .join("\n");

    if !listing.is_empty() {
        description.push('\n');
        description.push_str(&listing);
    }

    let mut embed = CreateEmbed::default()
        .title("✧ The Celestial Harmonies Await")
        .description(description)
        .color(colors::CELESTIAL_GOLD)
        .timestamp(Timestamp::now());

    if let Some(footer) = queue_footer(upcoming.len()) {
        embed = embed.footer(CreateEmbedFooter::new(footer));
    }

    embed
}

fn queue_footer(upcoming: usize) -> Option<String> {
    (upcoming > QUEUE_PREVIEW_LEN).then(|| {
        format!(
            "And {} more harmonies await...",
            upcoming - QUEUE_PREVIEW_LEN
        )
    })
}

pub fn error_embed(message: &str) -> CreateEmbed {
    CreateEmbed::default()
        .title("⚠ The Divine Frequencies Falter")
        .description(message)
        .color(colors::ERROR_CRIMSON)
        .timestamp(Timestamp::now())
}

pub fn success_embed(message: &str) -> CreateEmbed {
    CreateEmbed::default()
        .title("✧ Thy Request... is Worthy!")
        .description(message)
        .color(colors::CELESTIAL_GOLD)
        .timestamp(Timestamp::now())
}

/// Formatea una duración como `M:SS` o `H:MM:SS`
pub fn format_duration(duration: Duration) -> String {
    let total_seconds = duration.as_secs();
    let hours = total_seconds / 3600;
    let minutes = (total_seconds % 3600) / 60;
    let seconds = total_seconds % 60;

    if hours > 0 {
        format!("{}:{:02}:{:02}", hours, minutes, seconds)
    } else {
        format!("{}:{:02}", minutes, seconds)
    }
}
