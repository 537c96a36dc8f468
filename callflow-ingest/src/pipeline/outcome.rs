//! Pipeline outcomes and their publication

use callflow_common::events::{EventBus, PipelineEvent};
use chrono::Utc;
use serde::Serialize;
use tracing::{error, info};

/// Why a notification was acknowledged without side effects
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "kebab-case")]
pub enum SkipReason {
    NotTargetLine,
    UnrecognizedEvent,
    MalformedPayload,
    MissingCallId,
    MissingPhoneNumber,
    /// Outbound call to a number with no deal; outbound calls are not leads
    UnknownOutboundNumber,
}

impl SkipReason {
    pub fn as_str(&self) -> &'static str {
        match self {
            SkipReason::NotTargetLine => "not-target-line",
            SkipReason::UnrecognizedEvent => "unrecognized-event",
            SkipReason::MalformedPayload => "malformed-payload",
            SkipReason::MissingCallId => "missing-call-id",
            SkipReason::MissingPhoneNumber => "missing-phone-number",
            SkipReason::UnknownOutboundNumber => "unknown-outbound-number",
        }
    }
}

/// Why an existing deal changed
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "kebab-case")]
pub enum UpdateReason {
    RepeatContact,
    OutboundCall,
}

impl UpdateReason {
    pub fn as_str(&self) -> &'static str {
        match self {
            UpdateReason::RepeatContact => "repeat-contact",
            UpdateReason::OutboundCall => "outbound-call",
        }
    }
}

/// Terminal state of one contact attempt
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ContactState {
    NewLead,
    RepeatRouted,
    SkippedNonTarget,
}

/// Final effect of handling one notification
#[derive(Debug, Clone, PartialEq)]
pub enum Outcome {
    DealCreated {
        deal_id: i64,
        external_call_id: String,
        phone_number: String,
        stage_id: String,
    },
    DealUpdated {
        deal_id: i64,
        external_call_id: String,
        reason: UpdateReason,
    },
    /// Redelivery, or a contact already turned into a deal inside the dedup window
    Duplicate {
        external_call_id: String,
        deal_id: Option<i64>,
    },
    Skipped {
        external_call_id: Option<String>,
        reason: SkipReason,
    },
    /// `call-started`: nothing to do until the call ends
    Acknowledged { external_call_id: Option<String> },
    RecordingQueued { external_call_id: String },
}

impl Outcome {
    /// `action` field of the webhook response
    pub fn action(&self) -> &'static str {
        match self {
            Outcome::DealCreated { .. } => "deal-created",
            Outcome::DealUpdated { .. } => "deal-updated",
            Outcome::Duplicate { .. } => "duplicate",
            Outcome::Skipped { .. } => "skipped",
            Outcome::Acknowledged { .. } => "acknowledged",
            Outcome::RecordingQueued { .. } => "recording-queued",
        }
    }

    pub fn deal_id(&self) -> Option<i64> {
        match self {
            Outcome::DealCreated { deal_id, .. } | Outcome::DealUpdated { deal_id, .. } => {
                Some(*deal_id)
            }
            Outcome::Duplicate { deal_id, .. } => *deal_id,
            _ => None,
        }
    }

    pub fn external_call_id(&self) -> Option<&str> {
        match self {
            Outcome::DealCreated { external_call_id, .. }
            | Outcome::DealUpdated { external_call_id, .. }
            | Outcome::Duplicate { external_call_id, .. }
            | Outcome::RecordingQueued { external_call_id } => Some(external_call_id),
            Outcome::Skipped { external_call_id, .. }
            | Outcome::Acknowledged { external_call_id } => external_call_id.as_deref(),
        }
    }

    pub fn reason(&self) -> Option<&'static str> {
        match self {
            Outcome::Skipped { reason, .. } => Some(reason.as_str()),
            Outcome::DealUpdated { reason, .. } => Some(reason.as_str()),
            _ => None,
        }
    }

    /// Contact-attempt state for deal-affecting outcomes
    pub fn contact_state(&self) -> Option<ContactState> {
        match self {
            Outcome::DealCreated { .. } => Some(ContactState::NewLead),
            Outcome::DealUpdated {
                reason: UpdateReason::RepeatContact,
                ..
            } => Some(ContactState::RepeatRouted),
            Outcome::Skipped {
                reason: SkipReason::NotTargetLine,
                ..
            } => Some(ContactState::SkippedNonTarget),
            _ => None,
        }
    }

    fn to_event(&self) -> Option<PipelineEvent> {
        let timestamp = Utc::now();
        match self {
            Outcome::DealCreated {
                deal_id,
                external_call_id,
                phone_number,
                stage_id,
            } => Some(PipelineEvent::DealCreated {
                deal_id: *deal_id,
                external_call_id: external_call_id.clone(),
                phone_number: phone_number.clone(),
                stage_id: stage_id.clone(),
                timestamp,
            }),
            Outcome::DealUpdated {
                deal_id,
                external_call_id,
                reason,
            } => Some(PipelineEvent::DealUpdated {
                deal_id: *deal_id,
                external_call_id: external_call_id.clone(),
                reason: reason.as_str().to_string(),
                timestamp,
            }),
            Outcome::Duplicate {
                external_call_id,
                deal_id,
            } => Some(PipelineEvent::CallDuplicate {
                external_call_id: external_call_id.clone(),
                deal_id: *deal_id,
                timestamp,
            }),
            Outcome::Skipped {
                external_call_id,
                reason,
            } => Some(PipelineEvent::CallSkipped {
                external_call_id: external_call_id.clone(),
                reason: reason.as_str().to_string(),
                timestamp,
            }),
            Outcome::Acknowledged { .. } | Outcome::RecordingQueued { .. } => None,
        }
    }
}

/// Logs outcomes and broadcasts them to realtime consumers
#[derive(Clone)]
pub struct OutcomePublisher {
    event_bus: EventBus,
}

impl OutcomePublisher {
    pub fn new(event_bus: EventBus) -> Self {
        Self { event_bus }
    }

    pub fn event_bus(&self) -> &EventBus {
        &self.event_bus
    }

    pub fn publish(&self, outcome: &Outcome) {
        info!(
            action = outcome.action(),
            call_id = outcome.external_call_id().unwrap_or("-"),
            deal_id = ?outcome.deal_id(),
            reason = outcome.reason().unwrap_or("-"),
            "Call notification handled"
        );

        if let Some(event) = outcome.to_event() {
            self.event_bus.emit_lossy(event);
        }
    }

    pub fn publish_failure(&self, external_call_id: Option<&str>, err: &dyn std::fmt::Display) {
        error!(call_id = external_call_id.unwrap_or("-"), error = %err, "Call notification failed");
        self.event_bus.emit_lossy(PipelineEvent::PipelineFailed {
            external_call_id: external_call_id.map(str::to_string),
            error: err.to_string(),
            timestamp: Utc::now(),
        });
    }

    pub fn publish_event(&self, event: PipelineEvent) {
        self.event_bus.emit_lossy(event);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_actions_and_states() {
        let skipped = Outcome::Skipped {
            external_call_id: None,
            reason: SkipReason::NotTargetLine,
        };
        assert_eq!(skipped.action(), "skipped");
        assert_eq!(skipped.reason(), Some("not-target-line"));
        assert_eq!(skipped.contact_state(), Some(ContactState::SkippedNonTarget));

        let repeat = Outcome::DealUpdated {
            deal_id: 4,
            external_call_id: "in_1".to_string(),
            reason: UpdateReason::RepeatContact,
        };
        assert_eq!(repeat.contact_state(), Some(ContactState::RepeatRouted));
        assert_eq!(repeat.deal_id(), Some(4));
    }

    #[tokio::test]
    async fn test_publish_emits_event() {
        let bus = EventBus::new(4);
        let mut rx = bus.subscribe();
        let publisher = OutcomePublisher::new(bus);

        publisher.publish(&Outcome::Acknowledged {
            external_call_id: Some("in_1".to_string()),
        });
        publisher.publish(&Outcome::Duplicate {
            external_call_id: "in_1".to_string(),
            deal_id: Some(2),
        });

        let event = rx.recv().await.unwrap();
        assert_eq!(event.event_type(), "CallDuplicate", "acknowledgements are not broadcast");
    }
}
