//! callflow-ingest - Call Webhook Ingestion microservice
//!
//! Receives call-provider notifications, synthesizes CRM deals from first and
//! repeat contacts, and enriches them with call recordings and AI-extracted
//! fields in the background.

use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result};
use callflow_common::config::{Config, CONFIG_ENV_VAR};
use callflow_common::db::{init_database, resolve_stage};
use callflow_common::events::EventBus;
use callflow_ingest::enrichment::ai_client::OpenAiClient;
use callflow_ingest::provider::ProviderClient;
use callflow_ingest::{build_router, AppState};
use clap::Parser;
use tokio::signal;
use tracing::{info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

/// Command-line arguments for callflow-ingest
#[derive(Parser, Debug)]
#[command(name = "callflow-ingest")]
#[command(about = "Call webhook ingestion microservice")]
#[command(version)]
struct Args {
    /// Path to the TOML config file
    #[arg(short, long, env = CONFIG_ENV_VAR)]
    config: Option<PathBuf>,

    /// Port to listen on (overrides config)
    #[arg(short, long)]
    port: Option<u16>,

    /// SQLite database path (overrides config)
    #[arg(short, long)]
    database: Option<PathBuf>,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    let mut config = Config::load(args.config.as_deref()).context("Failed to load configuration")?;
    if let Some(port) = args.port {
        config.server.port = port;
    }
    if let Some(database) = args.database {
        config.database.path = database;
    }

    // RUST_LOG wins over the configured level
    tracing_subscriber::registry()
        .with(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new(&config.logging.level)),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    info!(
        "Starting callflow-ingest v{} [{}] built {} ({})",
        env!("CARGO_PKG_VERSION"),
        env!("GIT_HASH"),
        env!("BUILD_TIMESTAMP"),
        env!("BUILD_PROFILE"),
    );
    info!("Database: {}", config.database.path.display());

    let db_pool = init_database(&config.database.path)
        .await
        .context("Failed to open database")?;
    let intake_stage = resolve_stage(&db_pool, &config.pipeline.intake_stage_id)
        .await
        .context("Failed to resolve intake stage")?;
    info!("Intake stage: {} ({})", intake_stage.name, intake_stage.id);

    if config.webhook.secret.is_none() {
        warn!("No webhook secret configured, webhook is unauthenticated");
    }
    if config.webhook.target_lines.is_empty() {
        info!("No target lines configured, accepting every line");
    }
    if !config.provider.has_credentials() {
        warn!("Provider credentials not configured, recordings will not be fetched");
    }
    if config.ai.auto_transcribe && !config.ai.has_credentials() {
        warn!("auto_transcribe is enabled but no AI key is configured");
    }

    let config = Arc::new(config);
    let event_bus = EventBus::new(100);

    let provider = ProviderClient::new(Arc::new(config.provider.clone()))
        .context("Failed to build provider client")?;
    let ai = OpenAiClient::new(Arc::new(config.ai.clone())).context("Failed to build AI client")?;

    let (state, worker) = AppState::start(
        db_pool,
        Arc::clone(&config),
        &intake_stage,
        event_bus,
        Arc::new(provider),
        Arc::new(ai),
    );

    let app = build_router(state);

    let addr: SocketAddr = format!("{}:{}", config.server.host, config.server.port)
        .parse()
        .context("Invalid listen address")?;
    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .context("Failed to bind to address")?;
    info!("Listening on http://{}", addr);
    info!("Webhook: http://{}/webhook/calls", addr);

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .context("Server error")?;

    // The router (and with it the queue sender) is gone; let queued jobs finish
    if let Err(e) = worker.await {
        warn!("Enrichment worker ended abnormally: {}", e);
    }

    info!("Server shutdown complete");
    Ok(())
}

/// Graceful shutdown signal handler
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            warn!("Failed to listen for Ctrl+C: {}", e);
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut sigterm) => {
                sigterm.recv().await;
            }
            Err(e) => {
                warn!("Failed to install SIGTERM handler: {}", e);
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {
            info!("Received Ctrl+C, shutting down");
        },
        _ = terminate => {
            info!("Received terminate signal, shutting down");
        },
    }
}
