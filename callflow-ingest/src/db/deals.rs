//! Deal store operations used by the synthesizer and the enrichment worker
//!
//! Every mutation is a single conditional statement. SQLite takes the write
//! lock before evaluating a write statement, so the condition and the write
//! cannot interleave with another connection's writes. The synthesizer runs
//! these inside one transaction per call, so they take a connection or any
//! executor rather than the pool.

use callflow_common::db::models::db_timestamp;
use callflow_common::db::Deal;
use callflow_common::{Error, Result};
use chrono::{DateTime, Utc};
use sqlx::{Executor, Sqlite, SqliteConnection, SqlitePool};

/// Fields of a deal synthesized from a first contact
#[derive(Debug, Clone)]
pub struct NewDeal {
    pub stage_id: String,
    pub customer_name: String,
    pub phone_number: String,
    pub notes_text: String,
    pub source_tag: String,
}

/// Result of [`create_if_absent_within_window`]
#[derive(Debug, Clone, PartialEq)]
pub enum CreateOutcome {
    Created(Deal),
    /// A deal for the same number was created inside the window
    AlreadyExists(Deal),
}

/// Enrichment values for a deal; `None` leaves the column alone
#[derive(Debug, Clone, Default, PartialEq)]
pub struct DealPatch {
    pub customer_name: Option<String>,
    pub address: Option<String>,
    pub scheduled_at: Option<String>,
    pub price_amount: Option<f64>,
    pub service_type: Option<String>,
}

impl DealPatch {
    pub fn is_empty(&self) -> bool {
        self.customer_name.is_none()
            && self.address.is_none()
            && self.scheduled_at.is_none()
            && self.price_amount.is_none()
            && self.service_type.is_none()
    }
}

pub async fn get_deal<'e, E>(executor: E, deal_id: i64) -> Result<Option<Deal>>
where
    E: Executor<'e, Database = Sqlite>,
{
    let sql = format!("SELECT {} FROM deals WHERE id = ?", Deal::COLUMNS);
    let row = sqlx::query(&sql).bind(deal_id).fetch_optional(executor).await?;
    row.as_ref().map(Deal::from_row).transpose()
}

/// Most recently created deal for an exact phone number
pub async fn find_most_recent_by_phone<'e, E>(executor: E, phone_number: &str) -> Result<Option<Deal>>
where
    E: Executor<'e, Database = Sqlite>,
{
    let sql = format!(
        "SELECT {} FROM deals WHERE phone_number = ? ORDER BY created_at DESC, id DESC LIMIT 1",
        Deal::COLUMNS
    );
    let row = sqlx::query(&sql)
        .bind(phone_number)
        .fetch_optional(executor)
        .await?;
    row.as_ref().map(Deal::from_row).transpose()
}

/// Deal created for this number at or after `since`, if any
pub async fn find_recent_deal_by_phone<'e, E>(
    executor: E,
    phone_number: &str,
    since: DateTime<Utc>,
) -> Result<Option<Deal>>
where
    E: Executor<'e, Database = Sqlite>,
{
    let sql = format!(
        "SELECT {} FROM deals WHERE phone_number = ? AND created_at >= ? \
         ORDER BY created_at DESC, id DESC LIMIT 1",
        Deal::COLUMNS
    );
    let row = sqlx::query(&sql)
        .bind(phone_number)
        .bind(db_timestamp(since))
        .fetch_optional(executor)
        .await?;
    row.as_ref().map(Deal::from_row).transpose()
}

/// Create a deal at the end of its stage unless the number already got one inside the window
///
/// The window check, the position computation and the insert are one
/// statement; two racing first contacts from the same number produce one deal.
pub async fn create_if_absent_within_window(
    conn: &mut SqliteConnection,
    deal: &NewDeal,
    window: chrono::Duration,
    now: DateTime<Utc>,
) -> Result<CreateOutcome> {
    let since = now - window;
    let ts = db_timestamp(now);

    let result = sqlx::query(
        r#"
        INSERT INTO deals (
            stage_id, ordering_position, customer_name, phone_number, notes_text,
            is_repeat_customer, source_tag, created_at, updated_at
        )
        SELECT ?,
               (SELECT COALESCE(MAX(ordering_position), 0) + 1 FROM deals WHERE stage_id = ?),
               ?, ?, ?, 0, ?, ?, ?
        WHERE NOT EXISTS (
            SELECT 1 FROM deals WHERE phone_number = ? AND created_at >= ?
        )
        "#,
    )
    .bind(&deal.stage_id)
    .bind(&deal.stage_id)
    .bind(&deal.customer_name)
    .bind(&deal.phone_number)
    .bind(&deal.notes_text)
    .bind(&deal.source_tag)
    .bind(&ts)
    .bind(&ts)
    .bind(&deal.phone_number)
    .bind(db_timestamp(since))
    .execute(&mut *conn)
    .await?;

    if result.rows_affected() == 1 {
        let id = result.last_insert_rowid();
        let created = get_deal(&mut *conn, id)
            .await?
            .ok_or_else(|| Error::Internal(format!("deal {} vanished after insert", id)))?;
        return Ok(CreateOutcome::Created(created));
    }

    let existing = find_recent_deal_by_phone(&mut *conn, &deal.phone_number, since)
        .await?
        .ok_or_else(|| {
            Error::Internal(format!(
                "deal creation for {} suppressed but no recent deal found",
                deal.phone_number
            ))
        })?;
    Ok(CreateOutcome::AlreadyExists(existing))
}

/// Move a deal to the end of `stage_id`, append `annotation` to its notes and mark it repeat
///
/// A deal already in the target stage keeps its position.
pub async fn relocate_and_annotate(
    conn: &mut SqliteConnection,
    deal_id: i64,
    stage_id: &str,
    annotation: &str,
    now: DateTime<Utc>,
) -> Result<Deal> {
    let result = sqlx::query(
        r#"
        UPDATE deals SET
            ordering_position = CASE
                WHEN stage_id = ? THEN ordering_position
                ELSE (SELECT COALESCE(MAX(d.ordering_position), 0) + 1 FROM deals d WHERE d.stage_id = ?)
            END,
            stage_id = ?,
            notes_text = CASE
                WHEN notes_text = '' THEN ?
                ELSE notes_text || char(10) || ?
            END,
            is_repeat_customer = 1,
            updated_at = ?
        WHERE id = ?
        "#,
    )
    .bind(stage_id)
    .bind(stage_id)
    .bind(stage_id)
    .bind(annotation)
    .bind(annotation)
    .bind(db_timestamp(now))
    .bind(deal_id)
    .execute(&mut *conn)
    .await?;

    if result.rows_affected() == 0 {
        return Err(Error::DealNotFound(deal_id));
    }

    get_deal(&mut *conn, deal_id)
        .await?
        .ok_or(Error::DealNotFound(deal_id))
}

/// Append a line to a deal's notes without touching anything else
pub async fn append_note<'e, E>(
    executor: E,
    deal_id: i64,
    annotation: &str,
    now: DateTime<Utc>,
) -> Result<()>
where
    E: Executor<'e, Database = Sqlite>,
{
    let result = sqlx::query(
        r#"
        UPDATE deals SET
            notes_text = CASE
                WHEN notes_text = '' THEN ?
                ELSE notes_text || char(10) || ?
            END,
            updated_at = ?
        WHERE id = ?
        "#,
    )
    .bind(annotation)
    .bind(annotation)
    .bind(db_timestamp(now))
    .bind(deal_id)
    .execute(executor)
    .await?;

    if result.rows_affected() == 0 {
        return Err(Error::DealNotFound(deal_id));
    }
    Ok(())
}

/// Fill empty deal fields from enrichment
///
/// Each column is only written when it is still empty at write time, so an
/// operator edit made while enrichment ran is never overwritten. The name is
/// also replaced when it still holds one of `placeholder_names`.
pub async fn apply_patch(
    pool: &SqlitePool,
    deal_id: i64,
    patch: &DealPatch,
    placeholder_names: &[&str],
    now: DateTime<Utc>,
) -> Result<()> {
    if patch.is_empty() {
        return Ok(());
    }

    let placeholders_sql = vec!["?"; placeholder_names.len().max(1)].join(", ");
    let sql = format!(
        r#"
        UPDATE deals SET
            customer_name = CASE
                WHEN ? IS NOT NULL AND (customer_name = '' OR customer_name IN ({placeholders}))
                THEN ? ELSE customer_name END,
            address = CASE WHEN address IS NULL OR address = '' THEN COALESCE(?, address) ELSE address END,
            scheduled_at = CASE WHEN scheduled_at IS NULL OR scheduled_at = '' THEN COALESCE(?, scheduled_at) ELSE scheduled_at END,
            price_amount = COALESCE(price_amount, ?),
            service_type = CASE WHEN service_type IS NULL OR service_type = '' THEN COALESCE(?, service_type) ELSE service_type END,
            updated_at = ?
        WHERE id = ?
        "#,
        placeholders = placeholders_sql
    );

    let mut query = sqlx::query(&sql).bind(&patch.customer_name);
    if placeholder_names.is_empty() {
        query = query.bind("");
    } else {
        for name in placeholder_names {
            query = query.bind(*name);
        }
    }

    query
        .bind(&patch.customer_name)
        .bind(&patch.address)
        .bind(&patch.scheduled_at)
        .bind(patch.price_amount)
        .bind(&patch.service_type)
        .bind(db_timestamp(now))
        .bind(deal_id)
        .execute(pool)
        .await?;

    Ok(())
}

pub async fn count_deals(pool: &SqlitePool) -> Result<i64> {
    let count: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM deals")
        .fetch_one(pool)
        .await?;
    Ok(count)
}
