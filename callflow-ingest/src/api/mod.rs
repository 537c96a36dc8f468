//! HTTP API handlers for callflow-ingest

pub mod auth;
pub mod extract;
pub mod health;
pub mod sse;
pub mod webhook;

pub use auth::webhook_auth;
pub use extract::extract_fields;
pub use health::health_routes;
pub use sse::event_stream;
pub use webhook::{receive_notification, verify_endpoint};
