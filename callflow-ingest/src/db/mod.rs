//! Database access for deals and call records
//!
//! Connection setup and schema live in `callflow_common::db`; the queries
//! the pipeline issues live here.

pub mod call_records;
pub mod deals;
