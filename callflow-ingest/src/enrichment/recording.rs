//! Recording fetcher
//!
//! Resolves the call record a recording notification belongs to, asks the
//! provider for the download link, and stores it on the record.

use crate::db::call_records;
use crate::pipeline::outcome::OutcomePublisher;
use crate::provider::RecordingSource;
use callflow_common::db::CallRecord;
use callflow_common::events::PipelineEvent;
use callflow_common::Result;
use chrono::Utc;
use sqlx::SqlitePool;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, warn};

pub struct RecordingFetcher {
    db: SqlitePool,
    recordings: Arc<dyn RecordingSource>,
    publisher: OutcomePublisher,
    lookup_retries: u32,
    lookup_delay: Duration,
    provider_timeout: Duration,
}

impl RecordingFetcher {
    pub fn new(
        db: SqlitePool,
        recordings: Arc<dyn RecordingSource>,
        publisher: OutcomePublisher,
        lookup_retries: u32,
        lookup_delay: Duration,
        provider_timeout: Duration,
    ) -> Self {
        Self {
            db,
            recordings,
            publisher,
            lookup_retries,
            lookup_delay,
            provider_timeout,
        }
    }

    /// Find the call record, retrying while the call-ended notification may still be in flight
    pub async fn find_record(&self, candidates: &[String]) -> Result<Option<CallRecord>> {
        for attempt in 0..=self.lookup_retries {
            if let Some(record) = call_records::find_by_any_id(&self.db, candidates).await? {
                return Ok(Some(record));
            }
            if attempt < self.lookup_retries {
                debug!(attempt, ?candidates, "Call record not found yet, retrying");
                tokio::time::sleep(self.lookup_delay).await;
            }
        }
        Ok(None)
    }

    /// Ask the provider for each id in turn; first link wins
    ///
    /// Provider failures and timeouts are not errors here: the recording is
    /// simply not attached.
    pub async fn request_url(&self, request_ids: &[String]) -> Option<String> {
        for call_id in request_ids {
            match tokio::time::timeout(self.provider_timeout, self.recordings.recording_url(call_id)).await {
                Ok(Ok(Some(url))) => return Some(url),
                Ok(Ok(None)) => debug!(call_id = %call_id, "Recording not ready at provider"),
                Ok(Err(e)) => warn!(call_id = %call_id, error = %e, "Recording request failed"),
                Err(_) => warn!(call_id = %call_id, "Recording request timed out"),
            }
        }
        None
    }

    /// Attach the recording link to the matching call record
    ///
    /// Returns the updated record when this job attached the link, and `None`
    /// when the record or the link could not be found or the record already
    /// had one. Only a `Some` result goes on to transcription, so a
    /// redelivered recording notification never repeats the AI calls.
    pub async fn fetch_and_attach(
        &self,
        candidates: &[String],
        request_ids: &[String],
    ) -> Result<Option<CallRecord>> {
        let Some(record) = self.find_record(candidates).await? else {
            warn!(?candidates, "No call record for recording notification");
            return Ok(None);
        };

        if record.recording_url.is_some() {
            debug!(call_id = %record.external_call_id, "Recording already attached, redelivery ignored");
            return Ok(None);
        }

        let Some(url) = self.request_url(request_ids).await else {
            info!(call_id = %record.external_call_id, "Recording not available, skipped");
            return Ok(None);
        };

        let attached =
            call_records::attach_recording_url(&self.db, &record.external_call_id, &url, Utc::now())
                .await?;
        if !attached {
            debug!(call_id = %record.external_call_id, "Concurrent delivery attached the recording first");
            return Ok(None);
        }
        info!(call_id = %record.external_call_id, "Recording attached");

        self.publisher.publish_event(PipelineEvent::RecordingAttached {
            external_call_id: record.external_call_id.clone(),
            recording_url: url.clone(),
            timestamp: Utc::now(),
        });

        Ok(Some(CallRecord {
            recording_url: Some(url),
            ..record
        }))
    }
}
