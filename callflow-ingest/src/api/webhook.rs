//! Call-provider webhook
//!
//! `POST /webhook/calls` feeds the notification pipeline. Bodies arrive as
//! JSON or form-encoded depending on the provider's account settings, so the
//! [`Notification`] extractor accepts both.
//!
//! `GET /webhook/calls?zd_echo=<token>` answers the provider's endpoint
//! verification by echoing the token.

use axum::{
    async_trait,
    body::Bytes,
    extract::{FromRequest, Query, Request, State},
    http::header::CONTENT_TYPE,
    Form, Json,
};
use serde::{Deserialize, Serialize};
use tracing::{error, warn};

use crate::error::{ApiError, ApiResult};
use crate::pipeline::event::RawNotification;
use crate::pipeline::outcome::{ContactState, Outcome, SkipReason};
use crate::AppState;

/// Webhook body, JSON or `application/x-www-form-urlencoded`
#[derive(Debug)]
pub struct Notification(pub RawNotification);

#[async_trait]
impl<S> FromRequest<S> for Notification
where
    S: Send + Sync,
{
    type Rejection = ApiError;

    async fn from_request(req: Request, state: &S) -> Result<Self, Self::Rejection> {
        let is_form = req
            .headers()
            .get(CONTENT_TYPE)
            .and_then(|value| value.to_str().ok())
            .map(|ct| ct.starts_with("application/x-www-form-urlencoded"))
            .unwrap_or(false);

        if is_form {
            let Form(raw) = Form::<RawNotification>::from_request(req, state)
                .await
                .map_err(|e| ApiError::BadRequest(e.body_text()))?;
            return Ok(Self(raw));
        }

        let body = Bytes::from_request(req, state)
            .await
            .map_err(|e| ApiError::BadRequest(e.body_text()))?;
        let raw = serde_json::from_slice(&body)
            .map_err(|e| ApiError::BadRequest(format!("Invalid JSON: {}", e)))?;
        Ok(Self(raw))
    }
}

/// Webhook acknowledgement
#[derive(Debug, Serialize)]
pub struct WebhookResponse {
    pub success: bool,
    pub action: &'static str,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub deal_id: Option<i64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub call_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reason: Option<&'static str>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub state: Option<ContactState>,
}

impl From<&Outcome> for WebhookResponse {
    fn from(outcome: &Outcome) -> Self {
        Self {
            success: true,
            action: outcome.action(),
            deal_id: outcome.deal_id(),
            call_id: outcome.external_call_id().map(str::to_string),
            reason: outcome.reason(),
            state: outcome.contact_state(),
        }
    }
}

/// POST /webhook/calls
///
/// Every notification that can be handled is acknowledged with 200, skips
/// and duplicates included, so the provider stops redelivering. A malformed
/// body is acknowledged as a skip. Store and queue failures return 500 and
/// the provider retries.
pub async fn receive_notification(
    State(state): State<AppState>,
    notification: Result<Notification, ApiError>,
) -> ApiResult<Json<WebhookResponse>> {
    let raw = match notification {
        Ok(Notification(raw)) => raw,
        Err(e) => {
            warn!(error = %e, "Malformed webhook payload");
            let outcome = Outcome::Skipped {
                external_call_id: None,
                reason: SkipReason::MalformedPayload,
            };
            state.pipeline.publisher().publish(&outcome);
            return Ok(Json(WebhookResponse::from(&outcome)));
        }
    };

    match state.pipeline.handle(&raw).await {
        Ok(outcome) => Ok(Json(WebhookResponse::from(&outcome))),
        Err(e) => {
            error!(error = %e, "Webhook processing failed");
            *state.last_error.write().await = Some(e.to_string());
            Err(e.into())
        }
    }
}

#[derive(Debug, Deserialize)]
pub struct EchoQuery {
    pub zd_echo: Option<String>,
}

/// GET /webhook/calls?zd_echo=<token>
pub async fn verify_endpoint(Query(query): Query<EchoQuery>) -> ApiResult<String> {
    query
        .zd_echo
        .ok_or_else(|| ApiError::BadRequest("missing zd_echo parameter".to_string()))
}
