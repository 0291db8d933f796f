//! Security-relevant events, emitted on the `audit` tracing target so they can
//! be filtered or routed separately (`RUST_LOG=audit=info`).

use serenity::model::id::{GuildId, UserId};
use std::time::Duration;
use tracing::{error, info, warn};

pub fn command_executed(user_id: UserId, guild_id: Option<GuildId>, command: &str) {
    info!(
        target: "audit",
        event = "COMMAND_EXECUTED",
        user_id = user_id.get(),
        guild_id = guild_id.map(|g| g.get()),
        command,
        "comando ejecutado"
    );
}

pub fn rate_limited(user_id: UserId, retry_after: Duration) {
    warn!(
        target: "audit",
        event = "RATE_LIMIT_EXCEEDED",
        user_id = user_id.get(),
        retry_after_ms = retry_after.as_millis() as u64,
        "usuario excedió el rate limit"
    );
}

pub fn input_rejected(user_id: UserId, guild_id: Option<GuildId>, reason: &str) {
    warn!(
        target: "audit",
        event = "INVALID_INPUT",
        user_id = user_id.get(),
        guild_id = guild_id.map(|g| g.get()),
        reason,
        "entrada rechazada"
    );
}

pub fn interaction_failed(
    user_id: UserId,
    guild_id: Option<GuildId>,
    interaction: &str,
    err: &dyn std::fmt::Display,
) {
    error!(
        target: "audit",
        event = "ERROR_OCCURRED",
        user_id = user_id.get(),
        guild_id = guild_id.map(|g| g.get()),
        interaction,
        error = %err,
        "error procesando interacción"
    );
}
