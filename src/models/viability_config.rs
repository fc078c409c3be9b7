use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use sqlx::FromRow;

/// Database row for viability_configs table.
///
/// Versioned; at most one row has `is_active = true`. The scorer reloads the
/// active row before every pass and falls back to environment defaults when
/// none is active.
#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct ViabilityConfig {
    pub id: i32,
    pub version: i32,
    pub is_active: bool,

    // Hard-failure thresholds
    pub min_reserve: Decimal,
    pub min_emission_share: Decimal,
    pub min_age_days: i32,
    pub min_holders: i32,
    pub max_drawdown_30d: Decimal,
    pub max_negative_flow_ratio: Decimal,
    pub age_cap_days: i32,

    // Composite weights (sum to 1.0)
    pub weight_reserve: Decimal,
    pub weight_net_flow: Decimal,
    pub weight_emission: Decimal,
    pub weight_price_trend: Decimal,
    pub weight_drawdown: Decimal,
    pub weight_age: Decimal,

    // Tier cutoffs on the 0-100 composite
    pub tier_1_cutoff: Decimal,
    pub tier_2_cutoff: Decimal,
    pub tier_3_cutoff: Decimal,

    pub created_at: Option<DateTime<Utc>>,
}

impl Default for ViabilityConfig {
    fn default() -> Self {
        Self {
            id: 0,
            version: 0,
            is_active: false,
            min_reserve: Decimal::from(500),
            min_emission_share: Decimal::new(5, 4),      // 0.0005
            min_age_days: 7,
            min_holders: 25,
            max_drawdown_30d: Decimal::new(50, 2),       // 0.50
            max_negative_flow_ratio: Decimal::new(20, 2), // 0.20
            age_cap_days: 365,
            weight_reserve: Decimal::new(25, 2),
            weight_net_flow: Decimal::new(25, 2),
            weight_emission: Decimal::new(15, 2),
            weight_price_trend: Decimal::new(15, 2),
            weight_drawdown: Decimal::new(10, 2),
            weight_age: Decimal::new(10, 2),
            tier_1_cutoff: Decimal::from(75),
            tier_2_cutoff: Decimal::from(55),
            tier_3_cutoff: Decimal::from(40),
            created_at: None,
        }
    }
}

impl ViabilityConfig {
    pub fn weights_sum(&self) -> Decimal {
        self.weight_reserve
            + self.weight_net_flow
            + self.weight_emission
            + self.weight_price_trend
            + self.weight_drawdown
            + self.weight_age
    }

    /// Reject configs whose weights stray from 1.0 or whose tier cutoffs
    /// are not strictly descending.
    pub fn validate(&self) -> Result<(), String> {
        let weights = [
            self.weight_reserve,
            self.weight_net_flow,
            self.weight_emission,
            self.weight_price_trend,
            self.weight_drawdown,
            self.weight_age,
        ];
        if weights.iter().any(|w| *w < Decimal::ZERO) {
            return Err("viability weights must be non-negative".into());
        }

        let drift = (self.weights_sum() - Decimal::ONE).abs();
        if drift > Decimal::new(1, 3) {
            return Err(format!(
                "viability weights sum to {}, expected 1.0",
                self.weights_sum()
            ));
        }

        if !(self.tier_1_cutoff > self.tier_2_cutoff && self.tier_2_cutoff > self.tier_3_cutoff) {
            return Err(format!(
                "tier cutoffs must descend: {} > {} > {}",
                self.tier_1_cutoff, self.tier_2_cutoff, self.tier_3_cutoff
            ));
        }

        if self.age_cap_days <= 0 {
            return Err("age_cap_days must be positive".into());
        }

        Ok(())
    }
}
