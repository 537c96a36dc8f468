//! # Callflow Common Library
//!
//! Shared code for the callflow telephony pipeline:
//! - Configuration loading (TOML bootstrap + environment overrides)
//! - Phone number normalization
//! - Event types (PipelineEvent) and the EventBus
//! - Shared-secret validation and canonical parameter encoding
//! - Database pool initialization, schema and persisted models

pub mod api;
pub mod config;
pub mod db;
pub mod error;
pub mod events;
pub mod phone;
pub mod sse;

pub use config::Config;
pub use error::{Error, Result};
