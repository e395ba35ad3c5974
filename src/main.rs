use std::path::Path;
use std::sync::Arc;

use anyhow::Context;
use tokio::net::TcpListener;
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::EnvFilter;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;

use registration_bot::channels::{LineMessenger, LineSignatureVerifier};
use registration_bot::config::BotConfig;
use registration_bot::registration::{ConversationEngine, SessionStore, spawn_expiry_task};
use registration_bot::store::{Database, LibSqlBackend};
use registration_bot::webhook::{AppState, webhook_routes};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let config = BotConfig::from_env().context("loading configuration")?;

    // Keep the guard alive so buffered file logs are flushed on exit.
    let _log_guard = init_tracing(config.log_dir.as_deref());

    eprintln!("📝 Registration Bot v{}", env!("CARGO_PKG_VERSION"));
    eprintln!("   Webhook: http://0.0.0.0:{}/callback", config.port);
    eprintln!("   Database: {}", config.db_path.display());

    // ── Database ─────────────────────────────────────────────────────────
    let db: Arc<dyn Database> = Arc::new(
        LibSqlBackend::new_local(&config.db_path)
            .await
            .with_context(|| format!("opening database at {}", config.db_path.display()))?,
    );

    // ── Sessions ─────────────────────────────────────────────────────────
    let sessions = SessionStore::new();
    if let Some(max_idle) = config.session_idle_timeout {
        eprintln!("   Session idle timeout: {}s", max_idle.as_secs());
        spawn_expiry_task(sessions.clone(), max_idle);
    }

    let state = AppState {
        engine: Arc::new(ConversationEngine::new(sessions, db)),
        verifier: Arc::new(LineSignatureVerifier::new(config.channel_secret.clone())),
        sender: Arc::new(LineMessenger::new(config.access_token.clone())),
    };
    let app = webhook_routes(state);

    let listener = TcpListener::bind(("0.0.0.0", config.port))
        .await
        .with_context(|| format!("binding port {}", config.port))?;
    tracing::info!(port = config.port, "Webhook server started");

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .context("webhook server")?;

    tracing::info!("Webhook server stopped");
    Ok(())
}

/// Log to stderr, and to a daily rolling file when a directory is given.
fn init_tracing(log_dir: Option<&Path>) -> Option<WorkerGuard> {
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));

    let (file_layer, guard) = match log_dir {
        Some(dir) => {
            let appender = tracing_appender::rolling::daily(dir, "bot.log");
            let (writer, guard) = tracing_appender::non_blocking(appender);
            let layer = tracing_subscriber::fmt::layer()
                .with_target(false)
                .with_ansi(false)
                .with_writer(writer);
            (Some(layer), Some(guard))
        }
        None => (None, None),
    };

    tracing_subscriber::registry()
        .with(filter)
        .with(tracing_subscriber::fmt::layer().with_target(false))
        .with(file_layer)
        .init();

    guard
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::warn!(error = %e, "Could not listen for Ctrl-C");
        std::future::pending::<()>().await;
    }
    tracing::info!("Shutdown requested");
}
