use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use uuid::Uuid;

/// Database row for portfolio_snapshots table. Written by the sync job only.
#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct PortfolioSnapshot {
    pub id: Uuid,
    pub wallet: String,
    /// Mark-to-market NAV.
    pub nav: Decimal,
    /// NAV if every position were exited at 50% size impact.
    pub nav_exit_50: Option<Decimal>,
    /// NAV if every position were exited at full size impact.
    pub nav_exit_100: Option<Decimal>,
    /// Value held in the risk sleeve (non-root pools).
    pub sleeve_value: Decimal,
    pub root_value: Decimal,
    /// Unstaked base currency held for redeployment.
    pub unstaked_buffer: Decimal,
    /// Fractional drawdown from the NAV high-water mark.
    pub drawdown_from_peak: Decimal,
    pub taken_at: DateTime<Utc>,
}
