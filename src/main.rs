use anyhow::{Context as _, Result};
use serenity::{model::gateway::GatewayIntents, Client};
use songbird::{SerenityInit, Songbird};
use std::sync::Arc;
use tracing::{error, info};
use tracing_appender::{
    non_blocking::WorkerGuard,
    rolling::{self, Rotation},
};
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

mod audio;
mod bot;
mod cache;
mod config;
mod error;
mod ui;

use crate::audio::{
    fallback::FallbackTracker,
    history::TrackHistory,
    lavalink::{LavalinkBridge, LavalinkProvider},
};
use crate::bot::{
    events::{run_event_pump, SessionOrchestrator},
    handlers::MusicContext,
    rate_limit::{RateLimitConfig, RateLimiter},
    SeraphimBot,
};
use crate::cache::TrackCache;
use crate::config::{Config, LogSettings};
use crate::ui::notifier::DiscordNotifier;

#[tokio::main]
async fn main() -> Result<()> {
    dotenvy::dotenv().ok();

    // Inicializar logging; el guard mantiene vivo el escritor de archivos
    let log_settings = LogSettings::from_env()?;
    let _log_guard = init_logging(&log_settings)?;

    info!("😇 Iniciando Seraphim v{}", env!("CARGO_PKG_VERSION"));
    if let Some(dir) = &log_settings.dir {
        info!(
            "📁 Logs en {} (máximo {} archivos)",
            dir.display(),
            log_settings.max_files
        );
    }

    // Cargar configuración
    let config = Arc::new(Config::load()?);

    if std::env::args().any(|arg| arg == "--health-check") {
        return health_check(&config).await;
    }

    info!("{}", config.summary());

    let (events_tx, events_rx) = flume::unbounded();
    let bridge = Arc::new(LavalinkBridge::new(
        events_tx,
        TrackCache::new(config.track_cache_size),
        config.queue_end_grace(),
    ));

    let intents = GatewayIntents::GUILDS | GatewayIntents::GUILD_VOICE_STATES;

    let songbird = Songbird::serenity();
    let handler = SeraphimBot::new(config.clone(), bridge.clone());
    let mut client = Client::builder(&config.discord_token, intents)
        .event_handler(handler)
        .register_songbird_with(songbird.clone())
        .await?;

    // Inicializar Lavalink
    let user_id = client
        .http
        .get_current_user()
        .await
        .context("No se pudo obtener el usuario del bot")?
        .id;
    let provider = Arc::new(
        LavalinkProvider::connect(&config, user_id, songbird, bridge.clone()).await?,
    );
    info!("✅ Lavalink inicializado");

    let history = Arc::new(TrackHistory::new(config.history_size));
    let orchestrator = Arc::new(SessionOrchestrator::new(
        provider.clone(),
        Arc::new(DiscordNotifier::new(client.http.clone())),
        history.clone(),
        Arc::new(FallbackTracker::default()),
    ));
    tokio::spawn(run_event_pump(orchestrator, events_rx));

    let rate_limiter = Arc::new(RateLimiter::new(RateLimitConfig {
        max_tokens: config.rate_limit_max_tokens,
        refill_interval: config.rate_limit_refill_interval(),
        ..RateLimitConfig::default()
    }));
    rate_limiter.clone().spawn_sweeper();

    {
        let mut data = client.data.write().await;
        data.insert::<MusicContext>(Arc::new(MusicContext {
            provider: provider.clone(),
            history,
            rate_limiter,
        }));
    }

    // Manejar shutdown graceful
    let shard_manager = client.shard_manager.clone();
    tokio::spawn(async move {
        if let Err(e) = tokio::signal::ctrl_c().await {
            error!("Error al registrar Ctrl+C: {:?}", e);
            return;
        }
        info!("⚠️ Señal de shutdown recibida, cerrando...");
        provider.shutdown().await;
        shard_manager.shutdown_all().await;
    });

    info!("🚀 Bot iniciado exitosamente");
    if let Err(why) = client.start().await {
        error!("Error al ejecutar cliente: {:?}", why);
    }

    Ok(())
}

/// Installs stdout logging plus, when `LOG_DIR` is set, a daily-rotated file
/// writer that keeps the newest `LOG_MAX_FILES` files.
fn init_logging(settings: &LogSettings) -> Result<Option<WorkerGuard>> {
    let filter = EnvFilter::from_default_env()
        .add_directive("seraphim=debug".parse()?)
        .add_directive("serenity=info".parse()?)
        .add_directive("songbird=info".parse()?)
        .add_directive("lavalink_rs=info".parse()?);

    let (file_layer, guard) = match &settings.dir {
        Some(dir) => {
            let appender = rolling::Builder::new()
                .rotation(Rotation::DAILY)
                .filename_prefix("seraphim")
                .filename_suffix("log")
                .max_log_files(settings.max_files)
                .build(dir)
                .with_context(|| format!("No se pudo abrir el directorio de logs {}", dir.display()))?;
            let (writer, guard) = tracing_appender::non_blocking(appender);
            (
                Some(fmt::layer().with_writer(writer).with_ansi(false)),
                Some(guard),
            )
        }
        None => (None, None),
    };

    tracing_subscriber::registry()
        .with(filter)
        .with(fmt::layer())
        .with(file_layer)
        .init();

    Ok(guard)
}

/// Checks that the Lavalink node answers `GET /version` with our password.
async fn health_check(config: &Config) -> Result<()> {
    let scheme = if config.lavalink_ssl { "https" } else { "http" };
    let url = format!("{}://{}/version", scheme, config.lavalink_address());

    let response = reqwest::Client::new()
        .get(&url)
        .header("Authorization", &config.lavalink_password)
        .timeout(std::time::Duration::from_secs(5))
        .send()
        .await
        .with_context(|| format!("Lavalink no responde en {}", url))?;

    if response.status().is_success() {
        let version = response.text().await.unwrap_or_default();
        println!("OK (Lavalink {})", version.trim());
        Ok(())
    } else {
        anyhow::bail!("Lavalink respondió {}", response.status());
    }
}
