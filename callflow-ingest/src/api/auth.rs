//! Shared-secret guard for provider-facing endpoints
//!
//! The provider sends the configured secret in a header (default
//! `X-Webhook-Secret`). When no secret is configured every request passes.

use axum::{
    extract::{Request, State},
    middleware::Next,
    response::Response,
};
use callflow_common::api::auth::validate_shared_secret;
use tracing::warn;

use crate::error::ApiError;
use crate::AppState;

/// Authentication middleware
///
/// Applied to the webhook POST and `/api/extract` only. `/health`, `/events`
/// and the `zd_echo` verification GET stay public.
pub async fn webhook_auth(
    State(state): State<AppState>,
    request: Request,
    next: Next,
) -> Result<Response, ApiError> {
    let webhook = &state.config.webhook;
    let provided = request
        .headers()
        .get(webhook.secret_header.as_str())
        .and_then(|value| value.to_str().ok());

    if let Err(e) = validate_shared_secret(webhook.secret.as_deref(), provided) {
        warn!(path = %request.uri().path(), error = %e, "Rejected unauthenticated request");
        return Err(ApiError::Unauthorized(e.to_string()));
    }

    Ok(next.run(request).await)
}
