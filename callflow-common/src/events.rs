//! Event types for the callflow outcome publisher
//!
//! Every terminal pipeline effect is broadcast on the [`EventBus`] so that
//! realtime consumers (SSE clients, board refreshers) can react. Emission is
//! lossy: having no subscribers is normal.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;

/// Pipeline outcome events
///
/// Serialized with a `type` tag for SSE transmission.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum PipelineEvent {
    /// A new deal was created in the intake stage from a first contact
    DealCreated {
        deal_id: i64,
        external_call_id: String,
        phone_number: String,
        stage_id: String,
        timestamp: DateTime<Utc>,
    },

    /// An existing deal was relocated and/or annotated
    DealUpdated {
        deal_id: i64,
        external_call_id: String,
        /// `repeat-contact` or `outbound-call`
        reason: String,
        timestamp: DateTime<Utc>,
    },

    /// Notification acknowledged without side effects
    CallSkipped {
        external_call_id: Option<String>,
        reason: String,
        timestamp: DateTime<Utc>,
    },

    /// Redelivery of an already processed call
    CallDuplicate {
        external_call_id: String,
        deal_id: Option<i64>,
        timestamp: DateTime<Utc>,
    },

    /// Recording URL persisted on a call record
    RecordingAttached {
        external_call_id: String,
        recording_url: String,
        timestamp: DateTime<Utc>,
    },

    /// Transcription / extraction finished (possibly degraded)
    EnrichmentCompleted {
        external_call_id: String,
        deal_id: i64,
        /// `ai`, `fallback` or `none`
        extraction_source: String,
        fields_applied: Vec<String>,
        timestamp: DateTime<Utc>,
    },

    /// Unexpected internal failure while handling a notification or job
    PipelineFailed {
        external_call_id: Option<String>,
        error: String,
        timestamp: DateTime<Utc>,
    },
}

impl PipelineEvent {
    /// Event name used as the SSE `event:` field
    pub fn event_type(&self) -> &'static str {
        match self {
            PipelineEvent::DealCreated { .. } => "DealCreated",
            PipelineEvent::DealUpdated { .. } => "DealUpdated",
            PipelineEvent::CallSkipped { .. } => "CallSkipped",
            PipelineEvent::CallDuplicate { .. } => "CallDuplicate",
            PipelineEvent::RecordingAttached { .. } => "RecordingAttached",
            PipelineEvent::EnrichmentCompleted { .. } => "EnrichmentCompleted",
            PipelineEvent::PipelineFailed { .. } => "PipelineFailed",
        }
    }
}

/// Broadcast bus for [`PipelineEvent`]s
#[derive(Clone)]
pub struct EventBus {
    tx: broadcast::Sender<PipelineEvent>,
}

impl EventBus {
    /// Creates a new EventBus with specified channel capacity
    ///
    /// Slow subscribers lag and lose the oldest events once `capacity` is exceeded.
    pub fn new(capacity: usize) -> Self {
        let (tx, _) = broadcast::channel(capacity);
        Self { tx }
    }

    /// Subscribe to all future events
    pub fn subscribe(&self) -> broadcast::Receiver<PipelineEvent> {
        self.tx.subscribe()
    }

    /// Emit an event, ignoring if no subscribers are listening
    pub fn emit_lossy(&self, event: PipelineEvent) {
        let _ = self.tx.send(event);
    }

    /// Open SSE streams and other live listeners
    pub fn subscriber_count(&self) -> usize {
        self.tx.receiver_count()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_emit_without_subscribers_is_silent() {
        let bus = EventBus::new(8);
        bus.emit_lossy(PipelineEvent::CallSkipped {
            external_call_id: None,
            reason: "not-target-line".to_string(),
            timestamp: Utc::now(),
        });

        let mut late = bus.subscribe();
        assert!(late.try_recv().is_err(), "events are not replayed to late subscribers");
    }

    #[tokio::test]
    async fn test_subscriber_receives_event() {
        let bus = EventBus::new(8);
        let mut rx = bus.subscribe();
        assert_eq!(bus.subscriber_count(), 1);

        bus.emit_lossy(PipelineEvent::CallDuplicate {
            external_call_id: "1700000000.1".to_string(),
            deal_id: Some(3),
            timestamp: Utc::now(),
        });

        let event = rx.recv().await.unwrap();
        assert_eq!(event.event_type(), "CallDuplicate");
    }

    #[test]
    fn test_serialized_with_type_tag() {
        let event = PipelineEvent::DealUpdated {
            deal_id: 7,
            external_call_id: "abc".to_string(),
            reason: "repeat-contact".to_string(),
            timestamp: Utc::now(),
        };
        let json = serde_json::to_value(&event).unwrap();
        assert_eq!(json["type"], "DealUpdated");
        assert_eq!(json["deal_id"], 7);
    }
}
