//! AI collaborator client (speech-to-text + structured field extraction)
//!
//! Speaks the OpenAI-compatible HTTP API: `POST {base}/audio/transcriptions`
//! (multipart) and `POST {base}/chat/completions` (JSON).

use async_trait::async_trait;
use callflow_common::config::AiConfig;
use reqwest::multipart::{Form, Part};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use thiserror::Error;
use tracing::debug;

/// AI client errors
#[derive(Debug, Error)]
pub enum AiError {
    #[error("Network error: {0}")]
    Network(String),

    #[error("Request timed out")]
    Timeout,

    #[error("API error {0}: {1}")]
    Api(u16, String),

    #[error("Parse error: {0}")]
    Parse(String),

    #[error("AI credentials not configured")]
    MissingCredentials,
}

impl From<reqwest::Error> for AiError {
    fn from(err: reqwest::Error) -> Self {
        if err.is_timeout() {
            AiError::Timeout
        } else {
            AiError::Network(err.to_string())
        }
    }
}

/// Speech-to-text and extraction collaborator
#[async_trait]
pub trait AiService: Send + Sync {
    /// Transcribe audio in the configured language
    async fn transcribe(&self, audio: Vec<u8>, file_name: &str) -> Result<String, AiError>;

    /// Run the extraction prompt over `text`; returns the raw completion content
    async fn extract_fields(&self, text: &str) -> Result<String, AiError>;
}

#[derive(Debug, Serialize)]
struct ChatMessage<'a> {
    role: &'a str,
    content: &'a str,
}

#[derive(Debug, Serialize)]
struct ChatRequest<'a> {
    model: &'a str,
    messages: Vec<ChatMessage<'a>>,
    temperature: f32,
}

#[derive(Debug, Deserialize)]
struct ChatResponse {
    #[serde(default)]
    choices: Vec<ChatChoice>,
}

#[derive(Debug, Deserialize)]
struct ChatChoice {
    message: ChatChoiceMessage,
}

#[derive(Debug, Deserialize)]
struct ChatChoiceMessage {
    #[serde(default)]
    content: Option<String>,
}

#[derive(Debug, Deserialize)]
struct TranscriptionResponse {
    text: String,
}

/// OpenAI-compatible HTTP client
pub struct OpenAiClient {
    http_client: reqwest::Client,
    config: Arc<AiConfig>,
}

impl OpenAiClient {
    pub fn new(config: Arc<AiConfig>) -> Result<Self, AiError> {
        let http_client = reqwest::Client::builder()
            .timeout(config.timeout())
            .build()
            .map_err(|e| AiError::Network(e.to_string()))?;

        Ok(Self {
            http_client,
            config,
        })
    }

    fn api_key(&self) -> Result<&str, AiError> {
        self.config
            .api_key
            .as_deref()
            .filter(|key| !key.trim().is_empty())
            .ok_or(AiError::MissingCredentials)
    }

    fn endpoint(&self, path: &str) -> String {
        format!("{}/{}", self.config.base_url.trim_end_matches('/'), path)
    }

    async fn check(response: reqwest::Response) -> Result<reqwest::Response, AiError> {
        let status = response.status();
        if status.is_success() {
            return Ok(response);
        }
        let error_text = response.text().await.unwrap_or_default();
        Err(AiError::Api(status.as_u16(), error_text))
    }
}

#[async_trait]
impl AiService for OpenAiClient {
    async fn transcribe(&self, audio: Vec<u8>, file_name: &str) -> Result<String, AiError> {
        let api_key = self.api_key()?;
        debug!(bytes = audio.len(), model = %self.config.transcription_model, "Requesting transcription");

        let file = Part::bytes(audio)
            .file_name(file_name.to_string())
            .mime_str("audio/mpeg")
            .map_err(|e| AiError::Parse(e.to_string()))?;
        let form = Form::new()
            .text("model", self.config.transcription_model.clone())
            .text("language", self.config.language.clone())
            .part("file", file);

        let response = self
            .http_client
            .post(self.endpoint("audio/transcriptions"))
            .bearer_auth(api_key)
            .multipart(form)
            .send()
            .await?;

        let body: TranscriptionResponse = Self::check(response)
            .await?
            .json()
            .await
            .map_err(|e| AiError::Parse(e.to_string()))?;

        Ok(body.text)
    }

    async fn extract_fields(&self, text: &str) -> Result<String, AiError> {
        let api_key = self.api_key()?;

        let request = ChatRequest {
            model: &self.config.model,
            messages: vec![
                ChatMessage {
                    role: "system",
                    content: &self.config.system_prompt,
                },
                ChatMessage {
                    role: "user",
                    content: text,
                },
            ],
            temperature: self.config.temperature,
        };

        let response = self
            .http_client
            .post(self.endpoint("chat/completions"))
            .bearer_auth(api_key)
            .json(&request)
            .send()
            .await?;

        let body: ChatResponse = Self::check(response)
            .await?
            .json()
            .await
            .map_err(|e| AiError::Parse(e.to_string()))?;

        body.choices
            .into_iter()
            .next()
            .and_then(|choice| choice.message.content)
            .filter(|content| !content.trim().is_empty())
            .ok_or_else(|| AiError::Parse("completion has no content".to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_missing_key_is_reported() {
        let client = OpenAiClient::new(Arc::new(AiConfig::default())).unwrap();
        assert!(matches!(
            client.extract_fields("text").await,
            Err(AiError::MissingCredentials)
        ));
        assert!(matches!(
            client.transcribe(vec![0u8; 4], "call.mp3").await,
            Err(AiError::MissingCredentials)
        ));
    }

    #[test]
    fn test_chat_request_shape() {
        let request = ChatRequest {
            model: "gpt-4o-mini",
            messages: vec![ChatMessage {
                role: "user",
                content: "привет",
            }],
            temperature: 0.1,
        };
        let json = serde_json::to_value(&request).unwrap();
        assert_eq!(json["model"], "gpt-4o-mini");
        assert_eq!(json["messages"][0]["role"], "user");
    }
}
