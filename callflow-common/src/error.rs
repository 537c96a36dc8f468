//! Error type shared by the callflow crates
//!
//! The webhook layer maps every variant to a 500, which makes the provider
//! redeliver. Collaborator failures (provider, AI) have their own types and
//! never surface here.

use thiserror::Error;

pub type Result<T> = std::result::Result<T, Error>;

#[derive(Error, Debug)]
pub enum Error {
    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    /// Creating the database directory or reading the config file
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Configuration error: {0}")]
    Config(String),

    /// Configured pipeline stage is missing from the `stages` table
    #[error("Stage not found: {0}")]
    StageNotFound(String),

    /// A deal id the pipeline holds no longer resolves to a row
    #[error("Deal not found: {0}")]
    DealNotFound(i64),

    /// Enrichment queue full or its worker gone
    #[error("Enrichment queue unavailable: {0}")]
    QueueUnavailable(&'static str),

    /// Stored data that violates an invariant of the schema
    #[error("Internal error: {0}")]
    Internal(String),
}
