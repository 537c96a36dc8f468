//! Persisted models
//!
//! Timestamps are stored as RFC 3339 text with fixed microsecond precision
//! (`2026-01-02T03:04:05.000006Z`) so that lexicographic comparison in SQL
//! matches chronological order.

use crate::{Error, Result};
use chrono::{DateTime, SecondsFormat, Utc};
use serde::{Deserialize, Serialize};
use sqlx::sqlite::SqliteRow;
use sqlx::Row;

/// Format a timestamp for storage
pub fn db_timestamp(at: DateTime<Utc>) -> String {
    at.to_rfc3339_opts(SecondsFormat::Micros, true)
}

/// Parse a stored timestamp
pub fn parse_db_timestamp(value: &str) -> Result<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(value)
        .map(|dt| dt.with_timezone(&Utc))
        .map_err(|e| Error::Internal(format!("Invalid stored timestamp {:?}: {}", value, e)))
}

/// Pipeline stage (CRM-owned; only the identifier matters here)
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, sqlx::FromRow)]
pub struct Stage {
    pub id: String,
    pub name: String,
    pub position: i64,
}

/// Direction of a call attempt
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CallDirection {
    Inbound,
    Outbound,
}

impl CallDirection {
    pub fn as_str(&self) -> &'static str {
        match self {
            CallDirection::Inbound => "inbound",
            CallDirection::Outbound => "outbound",
        }
    }

    pub fn parse(value: &str) -> Result<Self> {
        match value {
            "inbound" => Ok(CallDirection::Inbound),
            "outbound" => Ok(CallDirection::Outbound),
            other => Err(Error::Internal(format!("Unknown call direction: {}", other))),
        }
    }
}

/// One call attempt, keyed by the provider's external call id
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CallRecord {
    pub external_call_id: String,
    pub direction: CallDirection,
    pub phone_number: String,
    pub duration_seconds: i64,
    /// Provider disposition as received
    pub disposition: String,
    pub recording_url: Option<String>,
    pub transcript: Option<String>,
    pub ai_summary: Option<String>,
    pub linked_deal_id: Option<i64>,
    pub created_at: DateTime<Utc>,
}

impl CallRecord {
    pub const COLUMNS: &'static str = "external_call_id, direction, phone_number, \
        duration_seconds, disposition, recording_url, transcript, ai_summary, \
        linked_deal_id, created_at";

    pub fn from_row(row: &SqliteRow) -> Result<Self> {
        let direction: String = row.try_get("direction")?;
        let created_at: String = row.try_get("created_at")?;

        Ok(Self {
            external_call_id: row.try_get("external_call_id")?,
            direction: CallDirection::parse(&direction)?,
            phone_number: row.try_get("phone_number")?,
            duration_seconds: row.try_get("duration_seconds")?,
            disposition: row.try_get("disposition")?,
            recording_url: row.try_get("recording_url")?,
            transcript: row.try_get("transcript")?,
            ai_summary: row.try_get("ai_summary")?,
            linked_deal_id: row.try_get("linked_deal_id")?,
            created_at: parse_db_timestamp(&created_at)?,
        })
    }
}

/// Pipeline entry for a customer engagement
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Deal {
    pub id: i64,
    pub stage_id: String,
    pub ordering_position: i64,
    pub customer_name: String,
    pub phone_number: String,
    pub notes_text: String,
    pub is_repeat_customer: bool,
    pub source_tag: String,
    pub address: Option<String>,
    pub scheduled_at: Option<String>,
    pub price_amount: Option<f64>,
    pub service_type: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Deal {
    pub const COLUMNS: &'static str = "id, stage_id, ordering_position, customer_name, \
        phone_number, notes_text, is_repeat_customer, source_tag, address, scheduled_at, \
        price_amount, service_type, created_at, updated_at";

    pub fn from_row(row: &SqliteRow) -> Result<Self> {
        let created_at: String = row.try_get("created_at")?;
        let updated_at: String = row.try_get("updated_at")?;
        let is_repeat: i64 = row.try_get("is_repeat_customer")?;

        Ok(Self {
            id: row.try_get("id")?,
            stage_id: row.try_get("stage_id")?,
            ordering_position: row.try_get("ordering_position")?,
            customer_name: row.try_get("customer_name")?,
            phone_number: row.try_get("phone_number")?,
            notes_text: row.try_get("notes_text")?,
            is_repeat_customer: is_repeat != 0,
            source_tag: row.try_get("source_tag")?,
            address: row.try_get("address")?,
            scheduled_at: row.try_get("scheduled_at")?,
            price_amount: row.try_get("price_amount")?,
            service_type: row.try_get("service_type")?,
            created_at: parse_db_timestamp(&created_at)?,
            updated_at: parse_db_timestamp(&updated_at)?,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn test_timestamp_round_trip_and_ordering() {
        let earlier = Utc.with_ymd_and_hms(2026, 1, 2, 3, 4, 5).unwrap();
        let later = earlier + chrono::Duration::microseconds(6);

        let (a, b) = (db_timestamp(earlier), db_timestamp(later));
        assert_eq!(a, "2026-01-02T03:04:05.000000Z");
        assert!(a < b);
        assert_eq!(parse_db_timestamp(&b).unwrap(), later);
    }

    #[test]
    fn test_direction_parse() {
        assert_eq!(CallDirection::parse("outbound").unwrap(), CallDirection::Outbound);
        assert!(CallDirection::parse("sideways").is_err());
    }
}
