//! Telephony provider integration: request signing, recording API client,
//! call id correlation

pub mod client;
pub mod correlation;
pub mod signature;

pub use client::{ProviderClient, ProviderError, RecordingSource};
