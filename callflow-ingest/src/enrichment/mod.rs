//! Detached enrichment work
//!
//! Recording notifications are acknowledged at once and queued here. A worker
//! task drains the queue; every job runs in its own task so one slow AI call
//! or one failure never holds up or takes down the others.

pub mod ai_client;
pub mod extraction;
pub mod recording;
pub mod transcription;

use crate::pipeline::outcome::OutcomePublisher;
use callflow_common::{Error, Result};
use recording::RecordingFetcher;
use serde::Serialize;
use std::sync::Arc;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, info};
use transcription::TranscriptionOrchestrator;

/// Default queue capacity
pub const DEFAULT_QUEUE_CAPACITY: usize = 256;

/// Unit of detached work
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EnrichmentJob {
    /// Attach the recording link, then transcribe if enabled
    FetchRecording {
        /// Store ids the call record may be kept under
        candidates: Vec<String>,
        /// Ids to ask the provider for, in order
        request_ids: Vec<String>,
    },
}

impl EnrichmentJob {
    fn label(&self) -> String {
        match self {
            EnrichmentJob::FetchRecording { candidates, .. } => {
                candidates.first().cloned().unwrap_or_default()
            }
        }
    }
}

/// Sending half of the enrichment queue
#[derive(Clone)]
pub struct EnrichmentQueue {
    tx: mpsc::Sender<EnrichmentJob>,
}

/// Point-in-time view of the queue for health reporting
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct QueueStatus {
    pub capacity: usize,
    pub free_slots: usize,
    pub worker_running: bool,
}

impl QueueStatus {
    /// New recording notifications would be rejected
    pub fn is_blocked(&self) -> bool {
        !self.worker_running || self.free_slots == 0
    }
}

impl EnrichmentQueue {
    pub fn channel(capacity: usize) -> (Self, mpsc::Receiver<EnrichmentJob>) {
        let (tx, rx) = mpsc::channel(capacity);
        (Self { tx }, rx)
    }

    /// Queue a job without waiting
    ///
    /// A full or closed queue is an error so the provider redelivers later.
    pub fn enqueue(&self, job: EnrichmentJob) -> Result<()> {
        self.tx.try_send(job).map_err(|e| match e {
            mpsc::error::TrySendError::Full(_) => Error::QueueUnavailable("full"),
            mpsc::error::TrySendError::Closed(_) => Error::QueueUnavailable("worker stopped"),
        })
    }

    pub fn status(&self) -> QueueStatus {
        QueueStatus {
            capacity: self.tx.max_capacity(),
            free_slots: self.tx.capacity(),
            worker_running: !self.tx.is_closed(),
        }
    }
}

/// Executes enrichment jobs
pub struct EnrichmentWorker {
    fetcher: RecordingFetcher,
    orchestrator: TranscriptionOrchestrator,
    publisher: OutcomePublisher,
}

impl EnrichmentWorker {
    pub fn new(
        fetcher: RecordingFetcher,
        orchestrator: TranscriptionOrchestrator,
        publisher: OutcomePublisher,
    ) -> Self {
        Self {
            fetcher,
            orchestrator,
            publisher,
        }
    }

    /// Run one job to completion
    pub async fn process_job(&self, job: EnrichmentJob) -> Result<()> {
        match job {
            EnrichmentJob::FetchRecording {
                candidates,
                request_ids,
            } => {
                let Some(record) = self.fetcher.fetch_and_attach(&candidates, &request_ids).await? else {
                    return Ok(());
                };

                if self.orchestrator.run(&record).await?.is_none() {
                    debug!(call_id = %record.external_call_id, "Transcription not applicable");
                }
                Ok(())
            }
        }
    }

    /// Drain the queue until every sender is dropped
    pub fn spawn(self: Arc<Self>, mut rx: mpsc::Receiver<EnrichmentJob>) -> JoinHandle<()> {
        tokio::spawn(async move {
            info!("Enrichment worker started");

            while let Some(job) = rx.recv().await {
                let worker = Arc::clone(&self);
                tokio::spawn(async move {
                    let label = job.label();
                    if let Err(e) = worker.process_job(job).await {
                        worker.publisher.publish_failure(Some(&label), &e);
                    }
                });
            }

            info!("Enrichment worker stopped");
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_enqueue_full_and_closed() {
        let (queue, rx) = EnrichmentQueue::channel(1);
        let job = EnrichmentJob::FetchRecording {
            candidates: vec!["in_1".to_string()],
            request_ids: vec!["in_1".to_string()],
        };

        assert!(queue.enqueue(job.clone()).is_ok());
        assert!(matches!(queue.enqueue(job.clone()), Err(Error::QueueUnavailable("full"))));

        drop(rx);
        assert!(matches!(queue.enqueue(job), Err(Error::QueueUnavailable("worker stopped"))));
    }

    #[test]
    fn test_status_tracks_free_slots_and_worker() {
        let (queue, rx) = EnrichmentQueue::channel(2);
        assert_eq!(
            queue.status(),
            QueueStatus { capacity: 2, free_slots: 2, worker_running: true }
        );

        let job = EnrichmentJob::FetchRecording {
            candidates: vec!["in_1".to_string()],
            request_ids: vec!["in_1".to_string()],
        };
        queue.enqueue(job.clone()).unwrap();
        queue.enqueue(job).unwrap();
        assert_eq!(queue.status().free_slots, 0);
        assert!(queue.status().is_blocked());

        drop(rx);
        assert!(!queue.status().worker_running);
    }
}
