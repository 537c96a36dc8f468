//! Transcription and extraction orchestrator
//!
//! Download → speech-to-text → extraction → store transcript/summary → fill
//! empty deal fields. Each collaborator step is bounded by a timeout and
//! degrades instead of failing; only store errors are returned.

use super::ai_client::AiService;
use super::extraction::{merge_plan, Extraction, Extractor};
use crate::db::{call_records, deals};
use crate::pipeline::outcome::OutcomePublisher;
use crate::pipeline::synthesizer::PLACEHOLDER_NAMES;
use crate::provider::RecordingSource;
use callflow_common::config::AiConfig;
use callflow_common::db::CallRecord;
use callflow_common::events::PipelineEvent;
use callflow_common::Result;
use chrono::Utc;
use sqlx::SqlitePool;
use std::sync::Arc;
use std::time::Duration;
use tracing::{info, warn};

/// Whether a record qualifies for automatic transcription
///
/// Requires the auto-transcribe flag, an AI credential, a recording link and
/// a linked deal to write results into. A record already transcribed never
/// qualifies again.
pub fn should_transcribe(config: &AiConfig, record: &CallRecord) -> bool {
    config.auto_transcribe
        && config.has_credentials()
        && record.recording_url.is_some()
        && record.linked_deal_id.is_some()
        && record.transcript.is_none()
}

/// What one orchestrator run produced
#[derive(Debug, Clone, PartialEq)]
pub struct EnrichmentReport {
    pub deal_id: i64,
    pub transcript: Option<String>,
    pub extraction: Extraction,
    pub fields_applied: Vec<String>,
}

pub struct TranscriptionOrchestrator {
    db: SqlitePool,
    config: Arc<AiConfig>,
    ai: Arc<dyn AiService>,
    recordings: Arc<dyn RecordingSource>,
    extractor: Extractor,
    publisher: OutcomePublisher,
    download_timeout: Duration,
}

impl TranscriptionOrchestrator {
    pub fn new(
        db: SqlitePool,
        config: Arc<AiConfig>,
        ai: Arc<dyn AiService>,
        recordings: Arc<dyn RecordingSource>,
        publisher: OutcomePublisher,
        download_timeout: Duration,
    ) -> Self {
        Self {
            extractor: Extractor::new(ai.clone(), config.clone()),
            db,
            config,
            ai,
            recordings,
            publisher,
            download_timeout,
        }
    }

    async fn download(&self, url: &str) -> Option<Vec<u8>> {
        match tokio::time::timeout(self.download_timeout, self.recordings.download(url)).await {
            Ok(Ok(audio)) => Some(audio),
            Ok(Err(e)) => {
                warn!(error = %e, "Recording download failed");
                None
            }
            Err(_) => {
                warn!("Recording download timed out");
                None
            }
        }
    }

    async fn transcribe(&self, audio: Vec<u8>, file_name: &str) -> Option<String> {
        match tokio::time::timeout(self.config.timeout(), self.ai.transcribe(audio, file_name)).await {
            Ok(Ok(text)) => Some(text).filter(|t| !t.trim().is_empty()),
            Ok(Err(e)) => {
                warn!(error = %e, "Transcription failed");
                None
            }
            Err(_) => {
                warn!(timeout_secs = self.config.timeout_secs, "Transcription timed out");
                None
            }
        }
    }

    /// Enrich one call record; `None` when the record does not qualify
    pub async fn run(&self, record: &CallRecord) -> Result<Option<EnrichmentReport>> {
        if !should_transcribe(&self.config, record) {
            return Ok(None);
        }
        let (Some(url), Some(deal_id)) = (record.recording_url.as_deref(), record.linked_deal_id) else {
            return Ok(None);
        };
        let call_id = record.external_call_id.as_str();

        let transcript = match self.download(url).await {
            Some(audio) => self.transcribe(audio, &format!("{}.mp3", call_id)).await,
            None => None,
        };

        let extraction = self.extractor.extract(transcript.as_deref().unwrap_or("")).await;

        call_records::set_transcription(
            &self.db,
            call_id,
            transcript.as_deref(),
            extraction.summary.as_deref(),
            Utc::now(),
        )
        .await?;

        let fields_applied = match deals::get_deal(&self.db, deal_id).await? {
            Some(deal) => {
                let (patch, applied) = merge_plan(&deal, &extraction.result);
                deals::apply_patch(&self.db, deal_id, &patch, &PLACEHOLDER_NAMES, Utc::now()).await?;
                applied
            }
            None => {
                warn!(call_id, deal_id, "Linked deal no longer exists");
                Vec::new()
            }
        };

        info!(
            call_id,
            deal_id,
            source = extraction.source.as_str(),
            transcribed = transcript.is_some(),
            fields = ?fields_applied,
            "Enrichment completed"
        );
        self.publisher.publish_event(PipelineEvent::EnrichmentCompleted {
            external_call_id: call_id.to_string(),
            deal_id,
            extraction_source: extraction.source.as_str().to_string(),
            fields_applied: fields_applied.clone(),
            timestamp: Utc::now(),
        });

        Ok(Some(EnrichmentReport {
            deal_id,
            transcript,
            extraction,
            fields_applied,
        }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn record(url: Option<&str>, deal: Option<i64>) -> CallRecord {
        CallRecord {
            external_call_id: "in_1".to_string(),
            direction: callflow_common::db::CallDirection::Inbound,
            phone_number: "+79991112233".to_string(),
            duration_seconds: 40,
            disposition: "answered".to_string(),
            recording_url: url.map(str::to_string),
            transcript: None,
            ai_summary: None,
            linked_deal_id: deal,
            created_at: Utc::now(),
        }
    }

    #[test]
    fn test_guard_requires_all_conditions() {
        let enabled = AiConfig {
            api_key: Some("sk-test".to_string()),
            auto_transcribe: true,
            ..Default::default()
        };

        assert!(should_transcribe(&enabled, &record(Some("https://r/1.mp3"), Some(1))));
        assert!(!should_transcribe(&enabled, &record(Some("https://r/1.mp3"), None)));
        assert!(!should_transcribe(&enabled, &record(None, Some(1))));

        let transcribed = CallRecord {
            transcript: Some("алло".to_string()),
            ..record(Some("https://r/1.mp3"), Some(1))
        };
        assert!(!should_transcribe(&enabled, &transcribed));

        let no_flag = AiConfig {
            auto_transcribe: false,
            ..enabled.clone()
        };
        assert!(!should_transcribe(&no_flag, &record(Some("https://r/1.mp3"), Some(1))));

        let no_key = AiConfig {
            api_key: None,
            ..enabled
        };
        assert!(!should_transcribe(&no_key, &record(Some("https://r/1.mp3"), Some(1))));
    }
}
