//! API module for shared HTTP API functionality
//!
//! # Design Principle
//!
//! This module contains ONLY pure functions and shared types, no HTTP
//! framework dependencies. The service wraps these with axum middleware.

pub mod auth;

pub use auth::{canonical_query, validate_shared_secret, ApiAuthError};
