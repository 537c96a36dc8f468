//! Call notification pipeline
//!
//! Parse → classify → line guard → call record dedup → correlate → synthesize
//! → publish. Recording notifications are handed to the enrichment queue and
//! acknowledged immediately.
//!
//! A call-ended notification is one database transaction: record insert,
//! correlation, deal mutation and link commit together or not at all. The
//! record insert takes SQLite's write lock, so a concurrent redelivery waits
//! for the first delivery to finish and then finds the record.

pub mod correlator;
pub mod event;
pub mod guard;
pub mod outcome;
pub mod synthesizer;

use crate::db::call_records::{self, NewCallRecord};
use crate::enrichment::{EnrichmentJob, EnrichmentQueue};
use crate::provider::correlation;
use callflow_common::config::Config;
use callflow_common::db::{CallDirection, Stage};
use callflow_common::Result;
use chrono::Utc;
use event::{classify, CallEnded, CallEvent, RawNotification, RecordingReady, Unclassified};
use guard::LineFilter;
use outcome::{Outcome, OutcomePublisher, SkipReason};
use sqlx::SqlitePool;
use synthesizer::DealSynthesizer;
use tracing::debug;

pub struct Pipeline {
    db: SqlitePool,
    intake_stage: Stage,
    line_filter: LineFilter,
    synthesizer: DealSynthesizer,
    enrichment: EnrichmentQueue,
    publisher: OutcomePublisher,
}

impl Pipeline {
    pub fn new(
        db: SqlitePool,
        config: &Config,
        intake_stage: &Stage,
        enrichment: EnrichmentQueue,
        publisher: OutcomePublisher,
    ) -> Self {
        Self {
            intake_stage: intake_stage.clone(),
            line_filter: LineFilter::new(config.webhook.target_lines.iter().cloned()),
            synthesizer: DealSynthesizer::new(intake_stage, &config.pipeline),
            db,
            enrichment,
            publisher,
        }
    }

    pub fn publisher(&self) -> &OutcomePublisher {
        &self.publisher
    }

    pub fn intake_stage(&self) -> &Stage {
        &self.intake_stage
    }

    pub fn enrichment_queue(&self) -> &EnrichmentQueue {
        &self.enrichment
    }

    /// Handle one webhook notification
    ///
    /// Skips and duplicates are successful outcomes. Errors are store or queue
    /// failures; nothing of a failed call-ended delivery is kept, so the
    /// provider's redelivery starts over cleanly.
    pub async fn handle(&self, raw: &RawNotification) -> Result<Outcome> {
        let event = classify(raw);
        debug!(kind = ?event.kind(), call_id = event.external_call_id().unwrap_or("-"), "Notification classified");

        match self.dispatch(&event).await {
            Ok(outcome) => {
                self.publisher.publish(&outcome);
                Ok(outcome)
            }
            Err(err) => {
                self.publisher.publish_failure(event.external_call_id(), &err);
                Err(err)
            }
        }
    }

    async fn dispatch(&self, event: &CallEvent) -> Result<Outcome> {
        let classified = !matches!(event, CallEvent::Unclassified(_));
        if classified && !self.passes_line_guard(event) {
            return Ok(Outcome::Skipped {
                external_call_id: event.external_call_id().map(str::to_string),
                reason: SkipReason::NotTargetLine,
            });
        }

        match event {
            CallEvent::Started(started) => Ok(Outcome::Acknowledged {
                external_call_id: started.external_call_id.clone(),
            }),
            CallEvent::Ended(ended) => self.call_ended(ended).await,
            CallEvent::RecordingReady(recording) => self.recording_ready(recording),
            CallEvent::Unclassified(reason) => Ok(Outcome::Skipped {
                external_call_id: None,
                reason: match reason {
                    Unclassified::MissingCallId => SkipReason::MissingCallId,
                    Unclassified::UnknownEvent(_) => SkipReason::UnrecognizedEvent,
                },
            }),
        }
    }

    /// Recording notifications usually carry no line fields; they are only
    /// filtered when they do.
    fn passes_line_guard(&self, event: &CallEvent) -> bool {
        let (line, callee) = event.line_fields();
        if matches!(event, CallEvent::RecordingReady(_)) && line.is_none() && callee.is_none() {
            return true;
        }
        self.line_filter.accepts(line, callee)
    }

    async fn call_ended(&self, ended: &CallEnded) -> Result<Outcome> {
        let Some(phone_number) = ended.phone_number.as_deref() else {
            return Ok(Outcome::Skipped {
                external_call_id: Some(ended.external_call_id.clone()),
                reason: SkipReason::MissingPhoneNumber,
            });
        };

        let now = Utc::now();
        let new_record = NewCallRecord {
            external_call_id: ended.external_call_id.clone(),
            direction: ended.direction,
            phone_number: phone_number.to_string(),
            duration_seconds: ended.duration_seconds,
            disposition: ended.disposition.as_stored().to_string(),
        };
        let mut tx = self.db.begin().await?;
        let (record, first_sight) =
            call_records::upsert_on_first_sight(&mut tx, &new_record, now).await?;

        if !first_sight {
            tx.rollback().await?;
            debug!(call_id = %record.external_call_id, "Call already processed");
            return Ok(Outcome::Duplicate {
                external_call_id: record.external_call_id,
                deal_id: record.linked_deal_id,
            });
        }

        let outcome = match ended.direction {
            CallDirection::Inbound => {
                self.synthesizer
                    .inbound(&mut tx, ended, phone_number, now)
                    .await?
            }
            CallDirection::Outbound => {
                self.synthesizer
                    .outbound(&mut tx, ended, phone_number, now)
                    .await?
            }
        };
        tx.commit().await?;

        Ok(outcome)
    }

    fn recording_ready(&self, recording: &RecordingReady) -> Result<Outcome> {
        let short_id = recording.short_id.as_deref();
        let recording_id = recording.recording_id.as_deref();

        let job = EnrichmentJob::FetchRecording {
            candidates: correlation::correlation_candidates(short_id, recording_id),
            request_ids: correlation::provider_request_ids(short_id, recording_id),
        };
        self.enrichment.enqueue(job)?;

        Ok(Outcome::RecordingQueued {
            external_call_id: short_id.or(recording_id).unwrap_or_default().to_string(),
        })
    }
}
