//! Health check endpoint
//!
//! Reports `degraded` while recording notifications would be rejected: the
//! enrichment queue is full or its worker has stopped.

use axum::{extract::State, routing::get, Json, Router};
use chrono::Utc;
use serde::Serialize;

use crate::enrichment::QueueStatus;
use crate::AppState;

#[derive(Debug, Serialize)]
pub struct HealthResponse {
    /// "ok" or "degraded"
    pub status: &'static str,
    pub module: &'static str,
    pub version: &'static str,
    pub uptime_seconds: u64,
    /// Stage new and returning callers are routed to
    pub intake_stage: String,
    pub enrichment_queue: QueueStatus,
    /// Open `/events` streams
    pub event_subscribers: usize,
    /// Last pipeline failure, if any
    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_error: Option<String>,
}

/// GET /health
pub async fn health_check(State(state): State<AppState>) -> Json<HealthResponse> {
    let uptime_seconds = Utc::now()
        .signed_duration_since(state.startup_time)
        .num_seconds()
        .max(0) as u64;
    let enrichment_queue = state.pipeline.enrichment_queue().status();

    Json(HealthResponse {
        status: if enrichment_queue.is_blocked() { "degraded" } else { "ok" },
        module: "callflow-ingest",
        version: env!("CARGO_PKG_VERSION"),
        uptime_seconds,
        intake_stage: state.pipeline.intake_stage().id.clone(),
        enrichment_queue,
        event_subscribers: state.event_bus.subscriber_count(),
        last_error: state.last_error.read().await.clone(),
    })
}

pub fn health_routes() -> Router<AppState> {
    Router::new().route("/health", get(health_check))
}
