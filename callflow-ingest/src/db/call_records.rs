//! Call record store
//!
//! One row per provider call id. The first `call-ended` delivery inserts the
//! row; every later delivery for the same id gets the existing row back.
//! Functions used inside the call-ended transaction take any executor.

use callflow_common::db::models::db_timestamp;
use callflow_common::db::{CallDirection, CallRecord};
use callflow_common::Result;
use chrono::{DateTime, Utc};
use sqlx::{Executor, Sqlite, SqliteConnection, SqlitePool};

/// Fields known when a call ends
#[derive(Debug, Clone)]
pub struct NewCallRecord {
    pub external_call_id: String,
    pub direction: CallDirection,
    pub phone_number: String,
    pub duration_seconds: i64,
    pub disposition: String,
}

/// Insert the record unless one already exists for this call id
///
/// Returns the stored record and whether this call was the one that created it.
/// The conflict check and the insert are one statement, so concurrent
/// deliveries of the same event cannot both see themselves as first. Inside a
/// transaction the insert also takes the database write lock, which holds off
/// a racing delivery until this one commits or rolls back.
pub async fn upsert_on_first_sight(
    conn: &mut SqliteConnection,
    record: &NewCallRecord,
    now: DateTime<Utc>,
) -> Result<(CallRecord, bool)> {
    let ts = db_timestamp(now);
    let inserted = sqlx::query(
        r#"
        INSERT INTO call_records (
            external_call_id, direction, phone_number, duration_seconds, disposition,
            created_at, updated_at
        ) VALUES (?, ?, ?, ?, ?, ?, ?)
        ON CONFLICT(external_call_id) DO NOTHING
        "#,
    )
    .bind(&record.external_call_id)
    .bind(record.direction.as_str())
    .bind(&record.phone_number)
    .bind(record.duration_seconds)
    .bind(&record.disposition)
    .bind(&ts)
    .bind(&ts)
    .execute(&mut *conn)
    .await?
    .rows_affected()
        == 1;

    let stored = find_by_external_id(&mut *conn, &record.external_call_id)
        .await?
        .ok_or_else(|| {
            callflow_common::Error::Internal(format!(
                "call record {} vanished after upsert",
                record.external_call_id
            ))
        })?;

    Ok((stored, inserted))
}

/// Load a record by its exact external call id
pub async fn find_by_external_id<'e, E>(
    executor: E,
    external_call_id: &str,
) -> Result<Option<CallRecord>>
where
    E: Executor<'e, Database = Sqlite>,
{
    let sql = format!(
        "SELECT {} FROM call_records WHERE external_call_id = ?",
        CallRecord::COLUMNS
    );
    let row = sqlx::query(&sql)
        .bind(external_call_id)
        .fetch_optional(executor)
        .await?;

    row.as_ref().map(CallRecord::from_row).transpose()
}

/// First record matching any of the candidate ids, tried in order
pub async fn find_by_any_id(pool: &SqlitePool, candidates: &[String]) -> Result<Option<CallRecord>> {
    for candidate in candidates {
        if let Some(record) = find_by_external_id(pool, candidate).await? {
            return Ok(Some(record));
        }
    }
    Ok(None)
}

/// Link a record to the deal it produced or annotated
///
/// An existing link is kept.
pub async fn link_deal<'e, E>(
    executor: E,
    external_call_id: &str,
    deal_id: i64,
    now: DateTime<Utc>,
) -> Result<()>
where
    E: Executor<'e, Database = Sqlite>,
{
    sqlx::query(
        r#"
        UPDATE call_records
        SET linked_deal_id = COALESCE(linked_deal_id, ?), updated_at = ?
        WHERE external_call_id = ?
        "#,
    )
    .bind(deal_id)
    .bind(db_timestamp(now))
    .bind(external_call_id)
    .execute(executor)
    .await?;

    Ok(())
}

/// Attach a recording link unless the record already has one
///
/// Returns whether this call attached it. Only the attaching job goes on to
/// transcribe, so redelivered recording notifications never repeat the work.
pub async fn attach_recording_url(
    pool: &SqlitePool,
    external_call_id: &str,
    recording_url: &str,
    now: DateTime<Utc>,
) -> Result<bool> {
    let attached = sqlx::query(
        r#"
        UPDATE call_records SET recording_url = ?, updated_at = ?
        WHERE external_call_id = ? AND recording_url IS NULL
        "#,
    )
    .bind(recording_url)
    .bind(db_timestamp(now))
    .bind(external_call_id)
    .execute(pool)
    .await?
    .rows_affected()
        == 1;

    Ok(attached)
}

/// Store transcription output; absent values leave the column untouched
pub async fn set_transcription(
    pool: &SqlitePool,
    external_call_id: &str,
    transcript: Option<&str>,
    ai_summary: Option<&str>,
    now: DateTime<Utc>,
) -> Result<()> {
    sqlx::query(
        r#"
        UPDATE call_records
        SET transcript = COALESCE(?, transcript),
            ai_summary = COALESCE(?, ai_summary),
            updated_at = ?
        WHERE external_call_id = ?
        "#,
    )
    .bind(transcript)
    .bind(ai_summary)
    .bind(db_timestamp(now))
    .bind(external_call_id)
    .execute(pool)
    .await?;

    Ok(())
}

pub async fn count_call_records(pool: &SqlitePool) -> Result<i64> {
    let count: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM call_records")
        .fetch_one(pool)
        .await?;
    Ok(count)
}

#[cfg(test)]
mod tests {
    use super::*;
    use callflow_common::db::init_memory_database;

    fn inbound(id: &str) -> NewCallRecord {
        NewCallRecord {
            external_call_id: id.to_string(),
            direction: CallDirection::Inbound,
            phone_number: "+79675558185".to_string(),
            duration_seconds: 30,
            disposition: "answered".to_string(),
        }
    }

    async fn insert(pool: &SqlitePool, id: &str) {
        let mut conn = pool.acquire().await.unwrap();
        upsert_on_first_sight(&mut conn, &inbound(id), Utc::now())
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn test_first_sight_then_duplicate() {
        let pool = init_memory_database().await.unwrap();
        let mut conn = pool.acquire().await.unwrap();

        let (first, created) = upsert_on_first_sight(&mut conn, &inbound("in_1"), Utc::now())
            .await
            .unwrap();
        assert!(created);
        assert_eq!(first.direction, CallDirection::Inbound);

        let mut changed = inbound("in_1");
        changed.duration_seconds = 999;
        let (second, created) = upsert_on_first_sight(&mut conn, &changed, Utc::now())
            .await
            .unwrap();
        drop(conn);

        assert!(!created);
        assert_eq!(second.duration_seconds, 30, "existing record returned unchanged");
        assert_eq!(count_call_records(&pool).await.unwrap(), 1);
    }

    #[tokio::test]
    async fn test_find_by_any_id_order() {
        let pool = init_memory_database().await.unwrap();
        insert(&pool, "in_2").await;

        let candidates = vec!["1700000000.55".to_string(), "in_2".to_string()];
        let found = find_by_any_id(&pool, &candidates).await.unwrap().unwrap();
        assert_eq!(found.external_call_id, "in_2");

        let none = find_by_any_id(&pool, &["nope".to_string()]).await.unwrap();
        assert!(none.is_none());
    }

    #[tokio::test]
    async fn test_transcription_keeps_existing_values() {
        let pool = init_memory_database().await.unwrap();
        insert(&pool, "in_3").await;

        set_transcription(&pool, "in_3", Some("алло"), Some("{}"), Utc::now())
            .await
            .unwrap();
        set_transcription(&pool, "in_3", None, None, Utc::now())
            .await
            .unwrap();

        let record = find_by_external_id(&pool, "in_3").await.unwrap().unwrap();
        assert_eq!(record.transcript.as_deref(), Some("алло"));
        assert_eq!(record.ai_summary.as_deref(), Some("{}"));
    }

    #[tokio::test]
    async fn test_recording_attached_once() {
        let pool = init_memory_database().await.unwrap();
        insert(&pool, "in_4").await;

        assert!(attach_recording_url(&pool, "in_4", "https://r/1.mp3", Utc::now())
            .await
            .unwrap());
        assert!(!attach_recording_url(&pool, "in_4", "https://r/2.mp3", Utc::now())
            .await
            .unwrap());
        assert!(!attach_recording_url(&pool, "missing", "https://r/3.mp3", Utc::now())
            .await
            .unwrap());

        let record = find_by_external_id(&pool, "in_4").await.unwrap().unwrap();
        assert_eq!(record.recording_url.as_deref(), Some("https://r/1.mp3"));
    }
}
