//! Server-Sent Events stream of pipeline outcomes

use axum::{
    extract::State,
    response::sse::{Event, Sse},
};
use futures::stream::Stream;
use std::convert::Infallible;

use crate::AppState;

/// GET /events
///
/// Streams `DealCreated`, `DealUpdated`, `CallSkipped`, `CallDuplicate`,
/// `RecordingAttached`, `EnrichmentCompleted` and `PipelineFailed`.
pub async fn event_stream(
    State(state): State<AppState>,
) -> Sse<impl Stream<Item = Result<Event, Infallible>>> {
    callflow_common::sse::create_event_sse_stream("callflow-ingest", &state.event_bus)
}
