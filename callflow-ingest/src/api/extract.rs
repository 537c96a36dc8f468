//! Free-text extraction endpoint

use axum::{extract::State, Json};
use serde::{Deserialize, Serialize};
use tracing::info;

use crate::enrichment::extraction::ExtractionResult;
use crate::error::{ApiError, ApiResult};
use crate::AppState;

#[derive(Debug, Deserialize)]
pub struct ExtractRequest {
    pub text: String,
}

#[derive(Debug, Serialize)]
pub struct ExtractResponse {
    #[serde(flatten)]
    pub result: ExtractionResult,
    /// `ai`, `fallback` or `none`
    pub source: &'static str,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub summary: Option<String>,
}

/// POST /api/extract
///
/// Runs the AI extractor with the regex fallback over `{text}`.
pub async fn extract_fields(
    State(state): State<AppState>,
    Json(request): Json<ExtractRequest>,
) -> ApiResult<Json<ExtractResponse>> {
    if request.text.trim().is_empty() {
        return Err(ApiError::BadRequest("text must not be empty".to_string()));
    }

    let extraction = state.extractor.extract(&request.text).await;
    info!(source = extraction.source.as_str(), "Extraction requested");

    Ok(Json(ExtractResponse {
        source: extraction.source.as_str(),
        result: extraction.result,
        summary: extraction.summary,
    }))
}
