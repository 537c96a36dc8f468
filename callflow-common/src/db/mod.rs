//! Database layer shared by callflow crates
//!
//! Pool initialization, idempotent schema creation and persisted models.

pub mod init;
pub mod models;

pub use init::{init_database, init_memory_database, resolve_stage};
pub use models::{CallDirection, CallRecord, Deal, Stage};
