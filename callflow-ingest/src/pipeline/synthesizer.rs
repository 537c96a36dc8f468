//! Deal synthesizer
//!
//! Turns a finished call into a deal mutation:
//!
//! - unknown number, inbound → new deal at the end of the intake stage
//! - known number, inbound → newest deal moved back to intake, notes appended
//! - known number, outbound → note appended, stage untouched
//! - unknown number, outbound → nothing
//!
//! Every method runs on the connection of the caller's call-ended
//! transaction, and links the call record to the deal it touched in that
//! same transaction.

use crate::db::deals::{CreateOutcome, NewDeal};
use crate::db::{call_records, deals};
use crate::pipeline::correlator;
use crate::pipeline::event::CallEnded;
use crate::pipeline::outcome::{Outcome, SkipReason, UpdateReason};
use callflow_common::config::PipelineConfig;
use callflow_common::db::{Deal, Stage};
use callflow_common::Result;
use chrono::{DateTime, Utc};
use sqlx::SqliteConnection;
use tracing::{debug, info};

/// Name given to a deal from a call nobody answered
pub const PLACEHOLDER_MISSED: &str = "Client (missed)";
/// Name given to a deal from an answered call, until enrichment finds the real one
pub const PLACEHOLDER_INCOMING: &str = "Client (incoming call)";
pub const PLACEHOLDER_NAMES: [&str; 2] = [PLACEHOLDER_MISSED, PLACEHOLDER_INCOMING];

pub struct DealSynthesizer {
    intake_stage_id: String,
    dedup_window: chrono::Duration,
    source_tag: String,
}

impl DealSynthesizer {
    pub fn new(intake_stage: &Stage, pipeline: &PipelineConfig) -> Self {
        Self {
            intake_stage_id: intake_stage.id.clone(),
            dedup_window: pipeline.dedup_window(),
            source_tag: pipeline.source_tag.clone(),
        }
    }

    /// Inbound call ended: create a deal, or route the existing one back to intake
    pub async fn inbound(
        &self,
        conn: &mut SqliteConnection,
        ended: &CallEnded,
        phone_number: &str,
        now: DateTime<Utc>,
    ) -> Result<Outcome> {
        let call_id = ended.external_call_id.as_str();
        let correlation = correlator::correlate(&mut *conn, phone_number).await?;

        if let Some(existing) = correlation.existing_deal {
            return self.repeat_contact(conn, ended, existing, now).await;
        }

        let new_deal = NewDeal {
            stage_id: self.intake_stage_id.clone(),
            customer_name: placeholder_name(ended).to_string(),
            phone_number: phone_number.to_string(),
            notes_text: status_line(ended, now),
            source_tag: self.source_tag.clone(),
        };

        match deals::create_if_absent_within_window(&mut *conn, &new_deal, self.dedup_window, now)
            .await?
        {
            CreateOutcome::Created(deal) => {
                call_records::link_deal(&mut *conn, call_id, deal.id, now).await?;
                Ok(Outcome::DealCreated {
                    deal_id: deal.id,
                    external_call_id: call_id.to_string(),
                    phone_number: deal.phone_number,
                    stage_id: deal.stage_id,
                })
            }
            CreateOutcome::AlreadyExists(deal) => {
                debug!(call_id, deal_id = deal.id, "Concurrent contact already created the deal");
                self.repeat_contact(conn, ended, deal, now).await
            }
        }
    }

    /// A further call from a number that already has a deal
    async fn repeat_contact(
        &self,
        conn: &mut SqliteConnection,
        ended: &CallEnded,
        existing: Deal,
        now: DateTime<Utc>,
    ) -> Result<Outcome> {
        let call_id = ended.external_call_id.as_str();
        let annotation = format!("Повторное обращение. {}", status_line(ended, now));
        let moved = deals::relocate_and_annotate(
            &mut *conn,
            existing.id,
            &self.intake_stage_id,
            &annotation,
            now,
        )
        .await?;
        call_records::link_deal(&mut *conn, call_id, moved.id, now).await?;

        info!(
            call_id,
            deal_id = moved.id,
            from_stage = %existing.stage_id,
            position = moved.ordering_position,
            "Repeat contact routed to intake"
        );
        Ok(Outcome::DealUpdated {
            deal_id: moved.id,
            external_call_id: call_id.to_string(),
            reason: UpdateReason::RepeatContact,
        })
    }

    /// Outbound call ended: annotate the customer's deal if there is one
    pub async fn outbound(
        &self,
        conn: &mut SqliteConnection,
        ended: &CallEnded,
        phone_number: &str,
        now: DateTime<Utc>,
    ) -> Result<Outcome> {
        let call_id = ended.external_call_id.as_str();
        let correlation = correlator::correlate(&mut *conn, phone_number).await?;

        let Some(deal) = correlation.existing_deal else {
            info!(call_id, phone = phone_number, "Outbound call to unknown number dropped");
            return Ok(Outcome::Skipped {
                external_call_id: Some(call_id.to_string()),
                reason: SkipReason::UnknownOutboundNumber,
            });
        };

        let annotation = format!("Исходящий звонок. {}", status_line(ended, now));
        deals::append_note(&mut *conn, deal.id, &annotation, now).await?;
        call_records::link_deal(&mut *conn, call_id, deal.id, now).await?;

        Ok(Outcome::DealUpdated {
            deal_id: deal.id,
            external_call_id: call_id.to_string(),
            reason: UpdateReason::OutboundCall,
        })
    }
}

pub fn placeholder_name(ended: &CallEnded) -> &'static str {
    if ended.disposition.is_answered() {
        PLACEHOLDER_INCOMING
    } else {
        PLACEHOLDER_MISSED
    }
}

/// One-line human summary of a call for deal notes
pub fn status_line(ended: &CallEnded, at: DateTime<Utc>) -> String {
    let line = ended
        .internal_line
        .as_deref()
        .or(ended.callee_number.as_deref())
        .unwrap_or("не указана");

    format!(
        "{}. Длительность: {}. Линия: {}. {}",
        ended.disposition.label(),
        format_duration(ended.duration_seconds),
        line,
        at.format("%d.%m.%Y %H:%M UTC")
    )
}

fn format_duration(seconds: i64) -> String {
    if seconds < 60 {
        format!("{} с", seconds)
    } else {
        format!("{} мин {:02} с", seconds / 60, seconds % 60)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pipeline::event::Disposition;
    use callflow_common::db::CallDirection;
    use chrono::TimeZone;

    fn ended(disposition: Disposition, duration: i64) -> CallEnded {
        CallEnded {
            external_call_id: "in_1".to_string(),
            direction: CallDirection::Inbound,
            phone_number: Some("+79675558185".to_string()),
            callee_number: Some("74950000000".to_string()),
            internal_line: Some("100".to_string()),
            disposition,
            duration_seconds: duration,
        }
    }

    #[test]
    fn test_status_line() {
        let at = Utc.with_ymd_and_hms(2026, 10, 18, 9, 5, 0).unwrap();
        assert_eq!(
            status_line(&ended(Disposition::Answered, 65), at),
            "Звонок отвечен. Длительность: 1 мин 05 с. Линия: 100. 18.10.2026 09:05 UTC"
        );
    }

    #[test]
    fn test_status_line_without_disposition() {
        let at = Utc.with_ymd_and_hms(2026, 10, 18, 9, 5, 0).unwrap();
        assert_eq!(
            status_line(&ended(Disposition::Unspecified, 0), at),
            "Статус не указан. Длительность: 0 с. Линия: 100. 18.10.2026 09:05 UTC"
        );
        assert_eq!(placeholder_name(&ended(Disposition::Unspecified, 0)), PLACEHOLDER_MISSED);
    }

    #[test]
    fn test_placeholder_by_disposition() {
        assert_eq!(placeholder_name(&ended(Disposition::Answered, 10)), PLACEHOLDER_INCOMING);
        assert_eq!(placeholder_name(&ended(Disposition::NoAnswer, 0)), PLACEHOLDER_MISSED);
        assert_eq!(placeholder_name(&ended(Disposition::Busy, 0)), PLACEHOLDER_MISSED);
        assert_eq!(
            placeholder_name(&ended(Disposition::Other("weird".into()), 0)),
            PLACEHOLDER_MISSED
        );
    }
}
