//! Database initialization
//!
//! Opens (creating if necessary) the SQLite database and creates the tables
//! the pipeline reads and writes. Safe to call on every startup.

use crate::db::models::Stage;
use crate::{Error, Result};
use sqlx::sqlite::{SqliteConnectOptions, SqliteJournalMode, SqlitePoolOptions};
use sqlx::SqlitePool;
use std::path::Path;
use std::str::FromStr;
use std::time::Duration;
use tracing::info;

/// Initialize database connection and create tables if needed
pub async fn init_database(db_path: &Path) -> Result<SqlitePool> {
    let newly_created = !db_path.exists();

    // Create parent directory if it doesn't exist
    if let Some(parent) = db_path.parent() {
        if !parent.as_os_str().is_empty() {
            std::fs::create_dir_all(parent)?;
        }
    }

    // WAL lets readers proceed while one writer commits; concurrent webhook
    // handlers queue on busy_timeout instead of failing immediately
    let options = SqliteConnectOptions::new()
        .filename(db_path)
        .create_if_missing(true)
        .journal_mode(SqliteJournalMode::Wal)
        .foreign_keys(true)
        .busy_timeout(Duration::from_millis(5000));

    let pool = SqlitePoolOptions::new()
        .max_connections(10)
        .connect_with(options)
        .await?;

    if newly_created {
        info!("Initialized new database: {}", db_path.display());
    } else {
        info!("Opened existing database: {}", db_path.display());
    }

    create_schema(&pool).await?;

    Ok(pool)
}

/// Single-connection in-memory database with the full schema
///
/// One connection only: every SQLite `:memory:` connection is a separate database.
pub async fn init_memory_database() -> Result<SqlitePool> {
    let options = SqliteConnectOptions::from_str("sqlite::memory:")?.foreign_keys(true);
    let pool = SqlitePoolOptions::new()
        .max_connections(1)
        .connect_with(options)
        .await?;

    create_schema(&pool).await?;
    Ok(pool)
}

/// Create all pipeline tables (idempotent)
pub async fn create_schema(pool: &SqlitePool) -> Result<()> {
    create_stages_table(pool).await?;
    create_deals_table(pool).await?;
    create_call_records_table(pool).await?;
    Ok(())
}

/// Pipeline stages are owned by the CRM; created here so the service can run standalone
async fn create_stages_table(pool: &SqlitePool) -> Result<()> {
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS stages (
            id TEXT PRIMARY KEY,
            name TEXT NOT NULL,
            position INTEGER NOT NULL DEFAULT 0
        )
        "#,
    )
    .execute(pool)
    .await?;

    Ok(())
}

async fn create_deals_table(pool: &SqlitePool) -> Result<()> {
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS deals (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            stage_id TEXT NOT NULL,
            ordering_position INTEGER NOT NULL,
            customer_name TEXT NOT NULL DEFAULT '',
            phone_number TEXT NOT NULL,
            notes_text TEXT NOT NULL DEFAULT '',
            is_repeat_customer INTEGER NOT NULL DEFAULT 0,
            source_tag TEXT NOT NULL DEFAULT '',
            address TEXT,
            scheduled_at TEXT,
            price_amount REAL,
            service_type TEXT,
            created_at TEXT NOT NULL,
            updated_at TEXT NOT NULL
        )
        "#,
    )
    .execute(pool)
    .await?;

    sqlx::query(
        "CREATE INDEX IF NOT EXISTS idx_deals_phone_created ON deals (phone_number, created_at)",
    )
    .execute(pool)
    .await?;

    sqlx::query(
        "CREATE INDEX IF NOT EXISTS idx_deals_stage_position ON deals (stage_id, ordering_position)",
    )
    .execute(pool)
    .await?;

    Ok(())
}

async fn create_call_records_table(pool: &SqlitePool) -> Result<()> {
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS call_records (
            external_call_id TEXT PRIMARY KEY,
            direction TEXT NOT NULL,
            phone_number TEXT NOT NULL,
            duration_seconds INTEGER NOT NULL DEFAULT 0,
            disposition TEXT NOT NULL DEFAULT '',
            recording_url TEXT,
            transcript TEXT,
            ai_summary TEXT,
            linked_deal_id INTEGER REFERENCES deals(id),
            created_at TEXT NOT NULL,
            updated_at TEXT NOT NULL
        )
        "#,
    )
    .execute(pool)
    .await?;

    sqlx::query(
        "CREATE INDEX IF NOT EXISTS idx_call_records_phone ON call_records (phone_number, created_at)",
    )
    .execute(pool)
    .await?;

    Ok(())
}

/// Resolve the configured stage identifier once at startup
///
/// A missing stage fails startup: the pipeline cannot place new deals.
pub async fn resolve_stage(pool: &SqlitePool, stage_id: &str) -> Result<Stage> {
    let stage = sqlx::query_as::<_, Stage>("SELECT id, name, position FROM stages WHERE id = ?")
        .bind(stage_id)
        .fetch_optional(pool)
        .await?;

    stage.ok_or_else(|| Error::StageNotFound(stage_id.to_string()))
}
