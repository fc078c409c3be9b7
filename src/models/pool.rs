use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use sqlx::FromRow;

/// netuid of the root (reserve) pool. Never scored, never a risk-sleeve holding.
pub const ROOT_NETUID: i32 = 0;

/// Category label used when a pool has no category assigned.
pub const UNCATEGORIZED: &str = "uncategorized";

/// Database row for pools table.
///
/// Populated by the sync job. The strategy core only writes back the
/// scoring/eligibility columns at the bottom of the struct.
#[derive(Debug, Clone, Default, Serialize, Deserialize, FromRow)]
pub struct Pool {
    pub netuid: i32,
    pub name: Option<String>,
    /// Liquidity held in the pool, in base currency.
    pub reserve: Decimal,
    /// Fraction of network emission routed to this pool.
    pub emission_share: Decimal,
    pub holder_count: i32,
    pub age_days: i32,
    pub owner_fee: Decimal,
    pub flow_1d: Decimal,
    pub flow_7d: Decimal,
    pub flow_14d: Decimal,
    pub max_drawdown_30d: Decimal,
    /// Fractional price change over the last 7 days.
    pub price_trend_7d: Decimal,
    pub is_startup: bool,
    pub price: Decimal,
    pub flow_regime: Option<String>,
    pub category: Option<String>,
    pub top_validator_trust: Option<Decimal>,
    pub top_validator_take: Option<Decimal>,

    pub viability_score: Option<Decimal>,
    pub viability_tier: Option<String>,
    pub is_eligible: Option<bool>,
    pub ineligibility_reasons: Option<Vec<String>>,
    pub scored_at: Option<DateTime<Utc>>,
    pub updated_at: Option<DateTime<Utc>>,
}

impl Pool {
    pub fn is_root(&self) -> bool {
        self.netuid == ROOT_NETUID
    }

    /// Category name, falling back to `uncategorized`.
    pub fn category_name(&self) -> &str {
        match self.category.as_deref() {
            Some(c) if !c.trim().is_empty() => c,
            _ => UNCATEGORIZED,
        }
    }

    /// 7-day net flow relative to reserve. `None` when the pool has no reserve.
    pub fn flow_ratio_7d(&self) -> Option<Decimal> {
        if self.reserve <= Decimal::ZERO {
            return None;
        }
        Some(self.flow_7d / self.reserve)
    }

    pub fn flow_ratio_14d(&self) -> Option<Decimal> {
        if self.reserve <= Decimal::ZERO {
            return None;
        }
        Some(self.flow_14d / self.reserve)
    }
}

/// One observation from the pool_prices history table.
#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct PoolPrice {
    pub netuid: i32,
    pub price: Decimal,
    pub observed_at: DateTime<Utc>,
}
