//! Customer correlator: canonical phone number → most recent deal

use crate::db::deals;
use callflow_common::db::Deal;
use callflow_common::Result;
use sqlx::{Executor, Sqlite};

/// What the store knows about a phone number
#[derive(Debug, Clone, PartialEq)]
pub struct Correlation {
    pub existing_deal: Option<Deal>,
    pub is_repeat: bool,
}

/// Exact match on the canonical phone number; the newest deal wins
pub async fn correlate<'e, E>(executor: E, phone_number: &str) -> Result<Correlation>
where
    E: Executor<'e, Database = Sqlite>,
{
    let existing_deal = deals::find_most_recent_by_phone(executor, phone_number).await?;
    Ok(Correlation {
        is_repeat: existing_deal.is_some(),
        existing_deal,
    })
}
