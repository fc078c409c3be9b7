use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use sqlx::FromRow;

/// Database row for slippage_surfaces table: one precomputed (size, impact) sample.
#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct SlippageSample {
    pub netuid: i32,
    /// `stake` or `unstake`.
    pub direction: String,
    pub size: Decimal,
    /// Price impact in percent (5 = 5%).
    pub impact_pct: Decimal,
    pub computed_at: Option<DateTime<Utc>>,
}
