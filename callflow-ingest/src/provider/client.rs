//! Telephony provider API client
//!
//! Signed recording-link requests and recording downloads.

use super::signature::sign_request;
use async_trait::async_trait;
use callflow_common::config::ProviderConfig;
use serde::Deserialize;
use std::sync::Arc;
use thiserror::Error;
use tracing::debug;

const USER_AGENT: &str = concat!("callflow-ingest/", env!("CARGO_PKG_VERSION"));

/// Provider client errors
#[derive(Debug, Error)]
pub enum ProviderError {
    #[error("Network error: {0}")]
    Network(String),

    #[error("Request timed out")]
    Timeout,

    #[error("API error {0}: {1}")]
    Api(u16, String),

    #[error("Parse error: {0}")]
    Parse(String),

    #[error("Provider credentials not configured")]
    MissingCredentials,

    #[error("Request signing failed: {0}")]
    Signing(String),
}

impl From<reqwest::Error> for ProviderError {
    fn from(err: reqwest::Error) -> Self {
        if err.is_timeout() {
            ProviderError::Timeout
        } else {
            ProviderError::Network(err.to_string())
        }
    }
}

/// Where recordings come from
#[async_trait]
pub trait RecordingSource: Send + Sync {
    /// Download link for a call's recording; `None` while the provider has not staged it
    async fn recording_url(&self, call_id: &str) -> Result<Option<String>, ProviderError>;

    /// Fetch the audio behind a recording link
    async fn download(&self, url: &str) -> Result<Vec<u8>, ProviderError>;
}

/// Recording-request response body
#[derive(Debug, Clone, Default, Deserialize)]
pub struct RecordingResponse {
    #[serde(default)]
    pub status: Option<String>,
    #[serde(default)]
    pub record: Option<String>,
    #[serde(default)]
    pub link: Option<String>,
    #[serde(default)]
    pub links: Vec<String>,
    #[serde(default)]
    pub message: Option<String>,
}

impl RecordingResponse {
    /// `record`, then `link`, then the first of `links`
    pub fn url(self) -> Option<String> {
        self.record
            .or(self.link)
            .or_else(|| self.links.into_iter().next())
            .filter(|url| !url.trim().is_empty())
    }
}

/// HTTP client for the provider API
pub struct ProviderClient {
    http_client: reqwest::Client,
    config: Arc<ProviderConfig>,
}

impl ProviderClient {
    pub fn new(config: Arc<ProviderConfig>) -> Result<Self, ProviderError> {
        let http_client = reqwest::Client::builder()
            .user_agent(USER_AGENT)
            .timeout(config.timeout())
            .build()
            .map_err(|e| ProviderError::Network(e.to_string()))?;

        Ok(Self {
            http_client,
            config,
        })
    }
}

#[async_trait]
impl RecordingSource for ProviderClient {
    async fn recording_url(&self, call_id: &str) -> Result<Option<String>, ProviderError> {
        let (Some(app_id), Some(secret)) = (
            self.config.app_id.as_deref(),
            self.config.secret.as_deref(),
        ) else {
            return Err(ProviderError::MissingCredentials);
        };

        let path = self.config.recording_path.as_str();
        let signed = sign_request(
            self.config.signature,
            path,
            &[("call_id", call_id)],
            app_id,
            secret,
        )
        .map_err(|e| ProviderError::Signing(e.to_string()))?;

        let url = format!(
            "{}{}?{}",
            self.config.base_url.trim_end_matches('/'),
            path,
            signed.query
        );
        debug!(call_id, scheme = ?self.config.signature, "Requesting recording link");

        let mut request = self.http_client.get(&url);
        if let Some(authorization) = signed.authorization {
            request = request.header(reqwest::header::AUTHORIZATION, authorization);
        }

        let response = request.send().await?;
        let status = response.status();

        // The provider answers "not ready yet" with 404
        if status == reqwest::StatusCode::NOT_FOUND {
            return Ok(None);
        }

        if !status.is_success() {
            let error_text = response.text().await.unwrap_or_default();
            return Err(ProviderError::Api(status.as_u16(), error_text));
        }

        let body: RecordingResponse = response
            .json()
            .await
            .map_err(|e| ProviderError::Parse(e.to_string()))?;

        if body.status.as_deref() == Some("error") {
            debug!(call_id, message = body.message.as_deref().unwrap_or("-"), "Provider reported error");
            return Ok(None);
        }

        Ok(body.url())
    }

    async fn download(&self, url: &str) -> Result<Vec<u8>, ProviderError> {
        let response = self.http_client.get(url).send().await?;
        let status = response.status();
        if !status.is_success() {
            let error_text = response.text().await.unwrap_or_default();
            return Err(ProviderError::Api(status.as_u16(), error_text));
        }

        Ok(response.bytes().await?.to_vec())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_response_url_preference() {
        let both: RecordingResponse =
            serde_json::from_str(r#"{"status":"success","record":"https://r/1.mp3","link":"https://l/1.mp3"}"#)
                .unwrap();
        assert_eq!(both.url().as_deref(), Some("https://r/1.mp3"));

        let links: RecordingResponse =
            serde_json::from_str(r#"{"status":"success","links":["https://l/2.mp3"]}"#).unwrap();
        assert_eq!(links.url().as_deref(), Some("https://l/2.mp3"));

        let none: RecordingResponse = serde_json::from_str(r#"{"status":"success"}"#).unwrap();
        assert_eq!(none.url(), None);
    }

    #[tokio::test]
    async fn test_missing_credentials() {
        let client = ProviderClient::new(Arc::new(ProviderConfig::default())).unwrap();
        let result = client.recording_url("1700000000.1").await;
        assert!(matches!(result, Err(ProviderError::MissingCredentials)));
    }
}
