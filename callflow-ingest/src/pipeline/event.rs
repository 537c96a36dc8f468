//! Notification parsing and classification
//!
//! Provider payloads are loosely typed: field names differ per event and
//! numbers may arrive as strings. [`RawNotification`] accepts all of that;
//! [`classify`] turns it into the closed [`CallEvent`] union the rest of the
//! pipeline works with.

use callflow_common::db::CallDirection;
use callflow_common::phone::normalize_phone;
use serde::{Deserialize, Deserializer, Serialize};
use serde_json::Value;

/// Webhook payload as delivered (JSON or form-encoded)
#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
pub struct RawNotification {
    #[serde(default, deserialize_with = "lenient_string")]
    pub event: Option<String>,
    #[serde(default, deserialize_with = "lenient_string")]
    pub call_id: Option<String>,
    #[serde(default, deserialize_with = "lenient_string")]
    pub pbx_call_id: Option<String>,
    #[serde(default, deserialize_with = "lenient_string")]
    pub call_id_with_rec: Option<String>,
    #[serde(default, deserialize_with = "lenient_string")]
    pub caller_id: Option<String>,
    #[serde(default, deserialize_with = "lenient_string")]
    pub called_did: Option<String>,
    #[serde(default, deserialize_with = "lenient_string")]
    pub destination: Option<String>,
    #[serde(default, deserialize_with = "lenient_string")]
    pub duration: Option<String>,
    #[serde(default, deserialize_with = "lenient_string")]
    pub disposition: Option<String>,
    #[serde(default, deserialize_with = "lenient_string")]
    pub internal: Option<String>,
}

/// Accept strings, numbers and booleans; treat null and blank strings as absent
fn lenient_string<'de, D>(deserializer: D) -> Result<Option<String>, D::Error>
where
    D: Deserializer<'de>,
{
    let value = Option::<Value>::deserialize(deserializer)?;
    Ok(match value {
        Some(Value::String(s)) => Some(s.trim().to_string()).filter(|s| !s.is_empty()),
        Some(Value::Number(n)) => Some(n.to_string()),
        Some(Value::Bool(b)) => Some(b.to_string()),
        _ => None,
    })
}

/// Event kinds the pipeline distinguishes
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "kebab-case")]
pub enum EventKind {
    CallStarted,
    CallEndedInbound,
    CallEndedOutbound,
    RecordingReady,
}

impl EventKind {
    fn from_event_field(value: &str) -> Option<Self> {
        match value.to_ascii_uppercase().as_str() {
            "NOTIFY_START" | "NOTIFY_INTERNAL" | "NOTIFY_OUT_START" | "START" => {
                Some(EventKind::CallStarted)
            }
            "NOTIFY_END" | "END" => Some(EventKind::CallEndedInbound),
            "NOTIFY_OUT_END" | "OUTBOUND-END" | "OUTBOUND_END" => {
                Some(EventKind::CallEndedOutbound)
            }
            "NOTIFY_RECORD" | "RECORD" => Some(EventKind::RecordingReady),
            _ => None,
        }
    }
}

/// Outcome classification of a call attempt
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "kebab-case")]
pub enum Disposition {
    Answered,
    NoAnswer,
    Cancel,
    Busy,
    Failed,
    /// The notification carried no disposition at all
    Unspecified,
    /// Provider state this pipeline does not know; kept verbatim
    Other(String),
}

impl Disposition {
    pub fn parse(raw: &str) -> Self {
        let key: String = raw
            .trim()
            .to_ascii_lowercase()
            .chars()
            .filter(|c| c.is_ascii_alphanumeric())
            .collect();

        match key.as_str() {
            "answered" | "answer" => Disposition::Answered,
            "noanswer" => Disposition::NoAnswer,
            "cancel" | "cancelled" | "canceled" => Disposition::Cancel,
            "busy" => Disposition::Busy,
            "failed" => Disposition::Failed,
            _ => Disposition::Other(raw.trim().to_string()),
        }
    }

    pub fn is_answered(&self) -> bool {
        matches!(self, Disposition::Answered)
    }

    /// Human-readable status used in deal notes
    pub fn label(&self) -> &str {
        match self {
            Disposition::Answered => "Звонок отвечен",
            Disposition::NoAnswer => "Пропущенный звонок (нет ответа)",
            Disposition::Cancel => "Пропущенный звонок (сброшен)",
            Disposition::Busy => "Пропущенный звонок (занято)",
            Disposition::Failed => "Звонок не состоялся",
            Disposition::Unspecified => "Статус не указан",
            Disposition::Other(raw) => raw.as_str(),
        }
    }

    /// Value persisted on the call record
    pub fn as_stored(&self) -> &str {
        match self {
            Disposition::Answered => "answered",
            Disposition::NoAnswer => "no-answer",
            Disposition::Cancel => "cancel",
            Disposition::Busy => "busy",
            Disposition::Failed => "failed",
            Disposition::Unspecified => "",
            Disposition::Other(raw) => raw.as_str(),
        }
    }
}

/// A `call-started` notification. Acknowledged, never persisted.
#[derive(Debug, Clone, PartialEq)]
pub struct CallStarted {
    pub external_call_id: Option<String>,
    pub internal_line: Option<String>,
    pub callee_number: Option<String>,
}

/// A `call-ended-*` notification
#[derive(Debug, Clone, PartialEq)]
pub struct CallEnded {
    pub external_call_id: String,
    pub direction: CallDirection,
    /// Canonical number of the customer (caller for inbound, destination for outbound)
    pub phone_number: Option<String>,
    pub callee_number: Option<String>,
    pub internal_line: Option<String>,
    pub disposition: Disposition,
    pub duration_seconds: i64,
}

/// A `recording-ready` notification
#[derive(Debug, Clone, PartialEq)]
pub struct RecordingReady {
    /// Short provider id (`pbx_call_id`)
    pub short_id: Option<String>,
    /// Id carrying the recording suffix (`call_id_with_rec`), the recording token
    pub recording_id: Option<String>,
    pub internal_line: Option<String>,
    pub callee_number: Option<String>,
}

/// Closed union of everything a notification can mean
#[derive(Debug, Clone, PartialEq)]
pub enum CallEvent {
    Started(CallStarted),
    Ended(CallEnded),
    RecordingReady(RecordingReady),
    /// Could not be classified or lacks the fields needed to act on it
    Unclassified(Unclassified),
}

/// Why a notification could not be turned into an actionable event
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Unclassified {
    /// Unknown `event` value, or no field combination that identifies a kind
    UnknownEvent(Option<String>),
    MissingCallId,
}

impl CallEvent {
    pub fn kind(&self) -> Option<EventKind> {
        match self {
            CallEvent::Started(_) => Some(EventKind::CallStarted),
            CallEvent::Ended(ended) => Some(match ended.direction {
                CallDirection::Inbound => EventKind::CallEndedInbound,
                CallDirection::Outbound => EventKind::CallEndedOutbound,
            }),
            CallEvent::RecordingReady(_) => Some(EventKind::RecordingReady),
            CallEvent::Unclassified(_) => None,
        }
    }

    /// Best identifier for logs and outcomes
    pub fn external_call_id(&self) -> Option<&str> {
        match self {
            CallEvent::Started(started) => started.external_call_id.as_deref(),
            CallEvent::Ended(ended) => Some(ended.external_call_id.as_str()),
            CallEvent::RecordingReady(rec) => {
                rec.short_id.as_deref().or(rec.recording_id.as_deref())
            }
            CallEvent::Unclassified(_) => None,
        }
    }

    /// Line identifiers the target-line guard checks
    pub fn line_fields(&self) -> (Option<&str>, Option<&str>) {
        match self {
            CallEvent::Started(s) => (s.internal_line.as_deref(), s.callee_number.as_deref()),
            CallEvent::Ended(e) => (e.internal_line.as_deref(), e.callee_number.as_deref()),
            CallEvent::RecordingReady(r) => {
                (r.internal_line.as_deref(), r.callee_number.as_deref())
            }
            CallEvent::Unclassified(_) => (None, None),
        }
    }
}

/// Decide the event kind
///
/// The explicit `event` field wins. Without it the kind is inferred from
/// which fields are present: a recording id without a disposition is a
/// recording notification, a disposition means the call ended.
pub fn detect_kind(raw: &RawNotification) -> Option<EventKind> {
    if let Some(kind) = raw.event.as_deref().and_then(EventKind::from_event_field) {
        return Some(kind);
    }

    match (&raw.call_id_with_rec, &raw.disposition) {
        (Some(_), None) => Some(EventKind::RecordingReady),
        (_, Some(_)) if raw.destination.is_some() && raw.caller_id.is_none() => {
            Some(EventKind::CallEndedOutbound)
        }
        (_, Some(_)) => Some(EventKind::CallEndedInbound),
        (None, None) => None,
    }
}

/// Classify a raw notification into a [`CallEvent`]
pub fn classify(raw: &RawNotification) -> CallEvent {
    let kind = match detect_kind(raw) {
        Some(kind) => kind,
        None => {
            return CallEvent::Unclassified(Unclassified::UnknownEvent(raw.event.clone()))
        }
    };

    match kind {
        EventKind::CallStarted => CallEvent::Started(CallStarted {
            external_call_id: short_call_id(raw),
            internal_line: raw.internal.clone(),
            callee_number: raw.called_did.clone(),
        }),
        EventKind::CallEndedInbound | EventKind::CallEndedOutbound => {
            let Some(external_call_id) = short_call_id(raw) else {
                return CallEvent::Unclassified(Unclassified::MissingCallId);
            };

            let (direction, customer) = if kind == EventKind::CallEndedInbound {
                (CallDirection::Inbound, raw.caller_id.as_deref())
            } else {
                (CallDirection::Outbound, raw.destination.as_deref())
            };

            CallEvent::Ended(CallEnded {
                external_call_id,
                direction,
                phone_number: customer.and_then(normalize_phone),
                callee_number: raw.called_did.clone(),
                internal_line: raw.internal.clone(),
                disposition: raw
                    .disposition
                    .as_deref()
                    .map(Disposition::parse)
                    .unwrap_or(Disposition::Unspecified),
                duration_seconds: parse_duration(raw.duration.as_deref()),
            })
        }
        EventKind::RecordingReady => {
            let short_id = raw.pbx_call_id.clone().or_else(|| raw.call_id.clone());
            let recording_id = raw.call_id_with_rec.clone();
            if short_id.is_none() && recording_id.is_none() {
                return CallEvent::Unclassified(Unclassified::MissingCallId);
            }
            CallEvent::RecordingReady(RecordingReady {
                short_id,
                recording_id,
                internal_line: raw.internal.clone(),
                callee_number: raw.called_did.clone(),
            })
        }
    }
}

/// `pbx_call_id`, then `call_id`, then `call_id_with_rec`
fn short_call_id(raw: &RawNotification) -> Option<String> {
    raw.pbx_call_id
        .clone()
        .or_else(|| raw.call_id.clone())
        .or_else(|| raw.call_id_with_rec.clone())
}

fn parse_duration(raw: Option<&str>) -> i64 {
    raw.and_then(|d| d.trim().parse::<f64>().ok())
        .filter(|d| d.is_finite() && *d > 0.0)
        .map(|d| d.round() as i64)
        .unwrap_or(0)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn raw(value: Value) -> RawNotification {
        serde_json::from_value(value).unwrap()
    }

    #[test]
    fn test_lenient_fields() {
        let n = raw(json!({
            "event": "NOTIFY_END",
            "pbx_call_id": "in_123",
            "duration": 42,
            "caller_id": "  ",
            "internal": null
        }));
        assert_eq!(n.duration.as_deref(), Some("42"));
        assert_eq!(n.caller_id, None);
        assert_eq!(n.internal, None);
    }

    #[test]
    fn test_disposition_mapping() {
        assert_eq!(Disposition::parse("answered"), Disposition::Answered);
        assert_eq!(Disposition::parse("no answer"), Disposition::NoAnswer);
        assert_eq!(Disposition::parse("NO_ANSWER"), Disposition::NoAnswer);
        assert_eq!(Disposition::parse("cancel"), Disposition::Cancel);
        assert_eq!(Disposition::parse("busy"), Disposition::Busy);
        assert_eq!(Disposition::parse("failed"), Disposition::Failed);
        assert_eq!(
            Disposition::parse("no money, no limit"),
            Disposition::Other("no money, no limit".to_string())
        );

        assert_eq!(Disposition::Answered.label(), "Звонок отвечен");
        assert_eq!(Disposition::parse("busy").label(), "Пропущенный звонок (занято)");
        assert_eq!(Disposition::parse("line limit").label(), "line limit");
        assert_eq!(Disposition::Unspecified.label(), "Статус не указан");
    }

    #[test]
    fn test_classify_inbound_end() {
        let event = classify(&raw(json!({
            "event": "NOTIFY_END",
            "call_start": "2026-10-18 10:00:00",
            "pbx_call_id": "in_9c2b",
            "caller_id": "8 (967) 555-81-85",
            "called_did": "74950000000",
            "internal": "100",
            "disposition": "answered",
            "duration": "65"
        })));

        match event {
            CallEvent::Ended(ended) => {
                assert_eq!(ended.external_call_id, "in_9c2b");
                assert_eq!(ended.direction, CallDirection::Inbound);
                assert_eq!(ended.phone_number.as_deref(), Some("+79675558185"));
                assert_eq!(ended.disposition, Disposition::Answered);
                assert_eq!(ended.duration_seconds, 65);
            }
            other => panic!("expected Ended, got {:?}", other),
        }
    }

    #[test]
    fn test_classify_outbound_end_uses_destination() {
        let event = classify(&raw(json!({
            "event": "NOTIFY_OUT_END",
            "pbx_call_id": "out_1",
            "destination": "+7 999 111-22-33",
            "internal": "101",
            "disposition": "busy",
            "duration": 0
        })));

        assert_eq!(event.kind(), Some(EventKind::CallEndedOutbound));
        if let CallEvent::Ended(ended) = event {
            assert_eq!(ended.phone_number.as_deref(), Some("+79991112233"));
        }
    }

    #[test]
    fn test_classify_started_is_acknowledged_only() {
        let event = classify(&raw(json!({"event": "NOTIFY_START", "pbx_call_id": "in_1"})));
        assert_eq!(event.kind(), Some(EventKind::CallStarted));
    }

    #[test]
    fn test_classify_by_field_presence() {
        let recording = classify(&raw(json!({
            "pbx_call_id": "in_1",
            "call_id_with_rec": "1700000000.123"
        })));
        assert_eq!(recording.kind(), Some(EventKind::RecordingReady));

        let ended = classify(&raw(json!({
            "pbx_call_id": "in_1",
            "caller_id": "79990000000",
            "disposition": "cancel"
        })));
        assert_eq!(ended.kind(), Some(EventKind::CallEndedInbound));
    }

    #[test]
    fn test_unrecognized_and_incomplete_events() {
        let unknown = classify(&raw(json!({"event": "NOTIFY_IVR"})));
        assert_eq!(
            unknown,
            CallEvent::Unclassified(Unclassified::UnknownEvent(Some("NOTIFY_IVR".to_string())))
        );

        let no_id = classify(&raw(json!({"event": "NOTIFY_END", "caller_id": "79990000000"})));
        assert_eq!(no_id, CallEvent::Unclassified(Unclassified::MissingCallId));

        let empty = classify(&RawNotification::default());
        assert_eq!(empty, CallEvent::Unclassified(Unclassified::UnknownEvent(None)));
    }

    #[test]
    fn test_duration_parsing() {
        assert_eq!(parse_duration(Some("12.6")), 13);
        assert_eq!(parse_duration(Some("-4")), 0);
        assert_eq!(parse_duration(Some("abc")), 0);
        assert_eq!(parse_duration(None), 0);
    }
}
