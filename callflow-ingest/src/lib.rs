//! callflow-ingest library interface
//!
//! Telephony webhook ingestion: turns call notifications into CRM deals and
//! enriches them with recordings, transcripts and extracted fields.

pub mod api;
pub mod db;
pub mod enrichment;
pub mod error;
pub mod pipeline;
pub mod provider;

pub use crate::error::{ApiError, ApiResult};

use axum::extract::DefaultBodyLimit;
use axum::Router;
use callflow_common::config::Config;
use callflow_common::db::Stage;
use callflow_common::events::EventBus;
use chrono::{DateTime, Utc};
use enrichment::ai_client::AiService;
use enrichment::extraction::Extractor;
use enrichment::recording::RecordingFetcher;
use enrichment::transcription::TranscriptionOrchestrator;
use enrichment::{EnrichmentQueue, EnrichmentWorker, DEFAULT_QUEUE_CAPACITY};
use pipeline::outcome::OutcomePublisher;
use pipeline::Pipeline;
use provider::RecordingSource;
use sqlx::SqlitePool;
use std::sync::Arc;
use tokio::sync::RwLock;
use tokio::task::JoinHandle;
use tower_http::trace::TraceLayer;

/// Application state shared across handlers
#[derive(Clone)]
pub struct AppState {
    /// Database connection pool
    pub db: SqlitePool,
    /// Immutable configuration loaded at startup
    pub config: Arc<Config>,
    /// Event bus for SSE broadcasting
    pub event_bus: EventBus,
    /// Notification pipeline
    pub pipeline: Arc<Pipeline>,
    /// Extractor behind `/api/extract`
    pub extractor: Extractor,
    /// Service startup timestamp for uptime tracking
    pub startup_time: DateTime<Utc>,
    /// Last error for diagnostic purposes
    pub last_error: Arc<RwLock<Option<String>>>,
}

impl AppState {
    /// Wire the pipeline to its collaborators and start the enrichment worker
    ///
    /// Must be called inside a tokio runtime. The returned handle finishes once
    /// every clone of the state (and with it the queue sender) is dropped.
    pub fn start(
        db: SqlitePool,
        config: Arc<Config>,
        intake_stage: &Stage,
        event_bus: EventBus,
        recordings: Arc<dyn RecordingSource>,
        ai: Arc<dyn AiService>,
    ) -> (Self, JoinHandle<()>) {
        let publisher = OutcomePublisher::new(event_bus.clone());
        let ai_config = Arc::new(config.ai.clone());

        let (queue, rx) = EnrichmentQueue::channel(DEFAULT_QUEUE_CAPACITY);
        let worker = Arc::new(build_enrichment_worker(
            db.clone(),
            &config,
            Arc::clone(&recordings),
            Arc::clone(&ai),
            publisher.clone(),
        ));
        let worker_handle = worker.spawn(rx);

        let pipeline = Pipeline::new(db.clone(), &config, intake_stage, queue, publisher);

        let state = Self {
            db,
            extractor: Extractor::new(ai, ai_config),
            config,
            event_bus,
            pipeline: Arc::new(pipeline),
            startup_time: Utc::now(),
            last_error: Arc::new(RwLock::new(None)),
        };

        (state, worker_handle)
    }
}

/// Build the enrichment worker from configuration
pub fn build_enrichment_worker(
    db: SqlitePool,
    config: &Config,
    recordings: Arc<dyn RecordingSource>,
    ai: Arc<dyn AiService>,
    publisher: OutcomePublisher,
) -> EnrichmentWorker {
    let fetcher = RecordingFetcher::new(
        db.clone(),
        Arc::clone(&recordings),
        publisher.clone(),
        config.pipeline.record_lookup_retries,
        config.pipeline.record_lookup_delay(),
        config.provider.timeout(),
    );
    let orchestrator = TranscriptionOrchestrator::new(
        db,
        Arc::new(config.ai.clone()),
        ai,
        recordings,
        publisher.clone(),
        config.provider.timeout(),
    );

    EnrichmentWorker::new(fetcher, orchestrator, publisher)
}

/// Build application router
///
/// Health, SSE and the provider's endpoint verification are public. The
/// webhook POST and the extraction endpoint require the shared secret.
pub fn build_router(state: AppState) -> Router {
    use axum::middleware;
    use axum::routing::{get, post};

    let protected = Router::new()
        .route("/webhook/calls", post(api::receive_notification))
        .route("/api/extract", post(api::extract_fields))
        .layer(middleware::from_fn_with_state(
            state.clone(),
            api::webhook_auth,
        ));

    let public = Router::new()
        .route("/webhook/calls", get(api::verify_endpoint))
        .route("/events", get(api::event_stream))
        .merge(api::health_routes());

    Router::new()
        .merge(protected)
        .merge(public)
        .layer(DefaultBodyLimit::max(state.config.webhook.max_body_bytes))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}
