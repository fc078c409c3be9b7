use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use crate::models::Pool;

use super::regime::FlowRegime;

// ---------------------------------------------------------------------------
// Config
// ---------------------------------------------------------------------------

/// Static floors/ceilings that define the investable universe.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EligibilityConfig {
    pub min_emission_share: Decimal,
    pub min_reserve: Decimal,
    pub min_holders: i32,
    pub min_age_days: i32,
    pub max_owner_fee: Decimal,
    pub min_validator_trust: Decimal,
    pub max_validator_take: Decimal,
}

impl Default for EligibilityConfig {
    fn default() -> Self {
        Self {
            min_emission_share: Decimal::new(1, 3), // 0.001
            min_reserve: Decimal::from(1_000),
            min_holders: 50,
            min_age_days: 14,
            max_owner_fee: Decimal::new(18, 2),
            min_validator_trust: Decimal::new(50, 2),
            max_validator_take: Decimal::new(18, 2),
        }
    }
}

// ---------------------------------------------------------------------------
// Result
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EligibilityResult {
    pub netuid: i32,
    pub eligible: bool,
    /// Every failed rule; empty when eligible.
    pub reasons: Vec<String>,
    /// 0-100 entry-ranking score. Zero for ineligible pools.
    pub attractiveness_score: Decimal,
}

/// Check a pool against the static eligibility rules.
///
/// Exclusion rules (all evaluated, every failure recorded):
/// - emission share, reserve, holders, age below their floors
/// - owner fee above its ceiling
/// - flow regime quarantine or dead
/// - 7d and 14d flow both negative
/// - top validator trust below floor or take above ceiling
///
/// Missing validator data is not treated as a failure.
pub fn check_eligibility(pool: &Pool, config: &EligibilityConfig) -> EligibilityResult {
    let mut reasons = Vec::new();

    if pool.emission_share < config.min_emission_share {
        reasons.push(format!(
            "emission share {} below {}",
            pool.emission_share, config.min_emission_share
        ));
    }
    if pool.reserve < config.min_reserve {
        reasons.push(format!("reserve {} below {}", pool.reserve, config.min_reserve));
    }
    if pool.holder_count < config.min_holders {
        reasons.push(format!("holders {} below {}", pool.holder_count, config.min_holders));
    }
    if pool.age_days < config.min_age_days {
        reasons.push(format!("age {}d below {}d", pool.age_days, config.min_age_days));
    }
    if pool.owner_fee > config.max_owner_fee {
        reasons.push(format!("owner fee {} above {}", pool.owner_fee, config.max_owner_fee));
    }

    let regime = FlowRegime::of(pool);
    if regime.is_excluded() {
        reasons.push(format!("flow regime {regime}"));
    }

    if pool.flow_7d < Decimal::ZERO && pool.flow_14d < Decimal::ZERO {
        reasons.push("7d and 14d flow both negative".into());
    }

    if let Some(trust) = pool.top_validator_trust {
        if trust < config.min_validator_trust {
            reasons.push(format!(
                "top validator trust {} below {}",
                trust, config.min_validator_trust
            ));
        }
    }
    if let Some(take) = pool.top_validator_take {
        if take > config.max_validator_take {
            reasons.push(format!(
                "top validator take {} above {}",
                take, config.max_validator_take
            ));
        }
    }

    let eligible = reasons.is_empty();
    EligibilityResult {
        netuid: pool.netuid,
        eligible,
        attractiveness_score: if eligible {
            attractiveness_score(pool)
        } else {
            Decimal::ZERO
        },
        reasons,
    }
}

/// Screen every non-root pool.
pub fn screen_universe(pools: &[Pool], config: &EligibilityConfig) -> Vec<EligibilityResult> {
    pools
        .iter()
        .filter(|p| !p.is_root())
        .map(|p| check_eligibility(p, config))
        .collect()
}

// ---------------------------------------------------------------------------
// Attractiveness
// ---------------------------------------------------------------------------

/// Clamp `value / full` into [0, 1].
fn saturate(value: Decimal, full: Decimal) -> Decimal {
    if full <= Decimal::ZERO {
        return Decimal::ZERO;
    }
    (value / full).max(Decimal::ZERO).min(Decimal::ONE)
}

/// Entry-ranking score in [0, 100].
///
/// | component        | points | full marks at            |
/// |------------------|--------|--------------------------|
/// | flow momentum    | 30     | 7d flow = +10% of reserve |
/// | emission         | 25     | 5% emission share        |
/// | liquidity        | 20     | 50,000 reserve           |
/// | holders          | 15     | 1,000 holders            |
/// | age              | 10     | 365 days                 |
///
/// minus one point per owner-fee percentage point above 10% (max 20).
pub fn attractiveness_score(pool: &Pool) -> Decimal {
    let ten_pct = Decimal::new(10, 2);

    // Map 7d flow ratio from [-10%, +10%] onto [0, 1].
    let flow_ratio = pool.flow_ratio_7d().unwrap_or(Decimal::ZERO);
    let flow_pts = saturate(flow_ratio + ten_pct, ten_pct * Decimal::TWO) * Decimal::from(30);

    let emission_pts = saturate(pool.emission_share, Decimal::new(5, 2)) * Decimal::from(25);
    let liquidity_pts = saturate(pool.reserve, Decimal::from(50_000)) * Decimal::from(20);
    let holder_pts =
        saturate(Decimal::from(pool.holder_count), Decimal::from(1_000)) * Decimal::from(15);
    let age_pts = saturate(Decimal::from(pool.age_days), Decimal::from(365)) * Decimal::from(10);

    let fee_penalty = ((pool.owner_fee - ten_pct) * Decimal::ONE_HUNDRED)
        .max(Decimal::ZERO)
        .min(Decimal::from(20));

    (flow_pts + emission_pts + liquidity_pts + holder_pts + age_pts - fee_penalty)
        .max(Decimal::ZERO)
        .min(Decimal::ONE_HUNDRED)
        .round_dp(2)
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
