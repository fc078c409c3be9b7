use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use sqlx::FromRow;

/// Database row for positions table, keyed by (wallet, netuid).
///
/// Fully exited positions are zeroed rather than deleted so realized
/// history survives.
#[derive(Debug, Clone, Default, Serialize, Deserialize, FromRow)]
pub struct Position {
    pub wallet: String,
    pub netuid: i32,
    /// Pool-token balance.
    pub balance: Decimal,
    /// Mark value in base currency.
    pub value: Decimal,
    pub cost_basis: Decimal,
    pub realized_pnl: Decimal,
    pub unrealized_pnl: Decimal,
    pub validator_hotkey: Option<String>,
    /// Precomputed exit impact (percent) at 50% of the position.
    pub exit_slippage_50pct: Option<Decimal>,
    /// Precomputed exit impact (percent) at 100% of the position.
    pub exit_slippage_100pct: Option<Decimal>,
    pub updated_at: Option<DateTime<Utc>>,
}

impl Position {
    pub fn is_held(&self) -> bool {
        self.value > Decimal::ZERO
    }
}
