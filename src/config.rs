use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::{path::PathBuf, time::Duration};
use tracing::{debug, warn};

/// Rotated log files kept on disk when file logging is enabled.
pub const DEFAULT_MAX_LOG_FILES: usize = 5;

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct Config {
    // Discord
    pub discord_token: String,
    pub application_id: u64,
    pub guild_id: Option<u64>, // Para comandos de desarrollo

    // Lavalink
    pub lavalink_host: String,
    pub lavalink_port: u16,
    pub lavalink_password: String,
    pub lavalink_ssl: bool,

    // Audio
    pub default_volume: u16,
    pub history_size: usize,
    pub track_cache_size: usize,
    pub queue_end_grace_secs: u64,

    // Límites
    pub rate_limit_max_tokens: u32,
    pub rate_limit_refill_ms: u64,
}

impl Config {
    pub fn load() -> Result<Self> {
        let config = Self {
            // Discord
            discord_token: secret("DISCORD_TOKEN").context(
                "Required secret DISCORD_TOKEN not found; set DISCORD_TOKEN or DISCORD_TOKEN_FILE",
            )?,
            application_id: std::env::var("APPLICATION_ID")?.parse()?,
            guild_id: std::env::var("GUILD_ID").ok().and_then(|s| s.parse().ok()),

            // Lavalink
            lavalink_host: std::env::var("LAVALINK_HOST")
                .unwrap_or_else(|_| "lavalink".to_string()),
            lavalink_port: std::env::var("LAVALINK_PORT")
                .unwrap_or_else(|_| "2333".to_string())
                .parse()?,
            lavalink_password: secret("LAVALINK_PASSWORD")
                .unwrap_or_else(|| "youshallnotpass".to_string()),
            lavalink_ssl: std::env::var("LAVALINK_SSL")
                .unwrap_or_else(|_| "false".to_string())
                .parse()?,

            // Audio
            default_volume: std::env::var("DEFAULT_VOLUME")
                .unwrap_or_else(|_| "50".to_string())
                .parse()?,
            history_size: std::env::var("HISTORY_SIZE")
                .unwrap_or_else(|_| "50".to_string())
                .parse()?,
            track_cache_size: std::env::var("TRACK_CACHE_SIZE")
                .unwrap_or_else(|_| "500".to_string())
                .parse()?,
            queue_end_grace_secs: std::env::var("QUEUE_END_GRACE_SECS")
                .unwrap_or_else(|_| "300".to_string()) // 5 minutos
                .parse()?,

            // Límites
            rate_limit_max_tokens: std::env::var("RATE_LIMIT_MAX_TOKENS")
                .unwrap_or_else(|_| "5".to_string())
                .parse()?,
            rate_limit_refill_ms: std::env::var("RATE_LIMIT_REFILL_MS")
                .unwrap_or_else(|_| "2000".to_string())
                .parse()?,
        };

        config.validate()?;

        Ok(config)
    }

    /// Validates configuration values for correctness.
    ///
    /// Catches the common mistakes (zero capacities, out-of-range volume)
    /// before any connection to Discord or Lavalink is attempted.
    pub fn validate(&self) -> Result<()> {
        if self.discord_token.trim().is_empty() {
            anyhow::bail!("DISCORD_TOKEN must not be empty");
        }

        if self.default_volume > 200 {
            anyhow::bail!("Default volume must be between 0 and 200, got: {}", self.default_volume);
        }

        if self.history_size == 0 {
            anyhow::bail!("History size must be greater than 0");
        }

        if self.track_cache_size == 0 {
            anyhow::bail!("Track cache size must be greater than 0");
        }

        if self.rate_limit_max_tokens == 0 {
            anyhow::bail!("Rate limit capacity must be greater than 0");
        }

        if self.rate_limit_refill_ms == 0 {
            anyhow::bail!("Rate limit refill interval must be greater than 0");
        }

        Ok(())
    }

    pub fn queue_end_grace(&self) -> Duration {
        Duration::from_secs(self.queue_end_grace_secs)
    }

    pub fn rate_limit_refill_interval(&self) -> Duration {
        Duration::from_millis(self.rate_limit_refill_ms)
    }

    /// Address of the Lavalink node, as `host:port`.
    pub fn lavalink_address(&self) -> String {
        format!("{}:{}", self.lavalink_host, self.lavalink_port)
    }

    /// Returns a summary of the current configuration for logging.
    ///
    /// Tokens and passwords only appear redacted.
    pub fn summary(&self) -> String {
        format!(
            "Config Summary:\n  \
            Discord: App ID {} (Guild: {}, token {})\n  \
            Lavalink: {} (ssl={}, password {})\n  \
            Audio: {}% vol, {} history, {} cached tracks, {} queue-end grace\n  \
            Limits: {} burst, 1 token every {}",
            self.application_id,
            self.guild_id.map_or("global".to_string(), |id| id.to_string()),
            redact(&self.discord_token),
            self.lavalink_address(),
            self.lavalink_ssl,
            redact(&self.lavalink_password),
            self.default_volume,
            self.history_size,
            self.track_cache_size,
            humantime::format_duration(self.queue_end_grace()),
            self.rate_limit_max_tokens,
            humantime::format_duration(self.rate_limit_refill_interval()),
        )
    }
}

/// Reads a credential, preferring the file named by `{name}_FILE`
/// (Docker secrets under `/run/secrets`) over the variable itself.
pub fn secret(name: &str) -> Option<String> {
    secret_from(name, |key| std::env::var(key).ok())
}

fn secret_from(name: &str, env: impl Fn(&str) -> Option<String>) -> Option<String> {
    let file_var = format!("{}_FILE", name);

    if let Some(path) = env(&file_var) {
        match std::fs::read_to_string(&path) {
            Ok(contents) => {
                debug!("🔐 Secreto {} cargado desde {}", name, path);
                return Some(contents.trim().to_string());
            }
            // Si el archivo falla se usa la variable de entorno
            Err(e) => warn!("⚠️ No se pudo leer {} ({}): {}", file_var, path, e),
        }
    }

    env(name).filter(|value| !value.is_empty())
}

/// Masks a credential for logs: first and last four characters, or `***`
/// when it is too short to show any of it.
pub fn redact(secret: &str) -> String {
    let chars: Vec<char> = secret.chars().collect();
    if chars.len() <= 8 {
        return "***".to_string();
    }

    let start: String = chars[..4].iter().collect();
    let end: String = chars[chars.len() - 4..].iter().collect();
    format!("{}...{}", start, end)
}

/// Where and how many log files to keep besides stdout.
///
/// ```env
/// LOG_DIR=/app/logs       # Enables daily-rotated files when set
/// LOG_MAX_FILES=5         # Oldest files beyond this are deleted
/// ```
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LogSettings {
    pub dir: Option<PathBuf>,
    pub max_files: usize,
}

impl LogSettings {
    pub fn from_env() -> Result<Self> {
        let settings = Self {
            dir: std::env::var("LOG_DIR")
                .ok()
                .filter(|dir| !dir.trim().is_empty())
                .map(PathBuf::from),
            max_files: std::env::var("LOG_MAX_FILES")
                .unwrap_or_else(|_| DEFAULT_MAX_LOG_FILES.to_string())
                .parse()?,
        };

        if settings.max_files == 0 {
            anyhow::bail!("LOG_MAX_FILES must be greater than 0");
        }

        Ok(settings)
    }
}

/// Default configuration values.
///
/// Used as fallbacks when environment variables are not provided.
impl Default for Config {
    fn default() -> Self {
        Self {
            // Discord (sin valores por defecto, deben proveerse)
            discord_token: String::new(),
            application_id: 0,
            guild_id: None,

            lavalink_host: "lavalink".into(),
            lavalink_port: 2333,
            lavalink_password: "youshallnotpass".into(),
            lavalink_ssl: false,

            default_volume: 50,
            history_size: 50,
            track_cache_size: 500,
            queue_end_grace_secs: 300,

            rate_limit_max_tokens: 5,
            rate_limit_refill_ms: 2000,
        }
    }
}
