use anyhow::{Context as _, Result};
use serenity::{
    builder::{CreateCommand, CreateCommandOption},
    model::{application::CommandOptionType, id::GuildId},
    prelude::Context,
};
use tracing::info;

use super::handlers::{CommandSpec, CATALOG};

/// Builds the registration payload for one catalog entry.
pub fn build_command(spec: &CommandSpec) -> CreateCommand {
    let command = CreateCommand::new(spec.name).description(spec.description);

    match spec.option {
        Some((name, description)) => command.add_option(
            CreateCommandOption::new(CommandOptionType::String, name, description).required(true),
        ),
        None => command,
    }
}

pub fn catalog_commands() -> Vec<CreateCommand> {
    CATALOG.iter().map(build_command).collect()
}

/// Registra comandos globales
pub async fn register_global_commands(ctx: &Context) -> Result<()> {
    let registered = ctx
        .http
        .create_global_commands(&catalog_commands())
        .await
        .context("Error registrando comandos globales")?;

    info!("📝 {} comandos globales registrados", registered.len());
    Ok(())
}

/// Registra comandos para una guild específica (desarrollo)
pub async fn register_guild_commands(ctx: &Context, guild_id: GuildId) -> Result<()> {
    let registered = guild_id
        .set_commands(&ctx.http, catalog_commands())
        .await
        .with_context(|| format!("Error registrando comandos en guild {}", guild_id))?;

    info!("📝 {} comandos registrados en guild {}", registered.len(), guild_id);
    Ok(())
}
