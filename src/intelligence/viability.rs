use std::cmp::Ordering;
use std::collections::BTreeMap;
use std::fmt;

use chrono::{DateTime, Duration, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use crate::models::{Pool, PoolPrice, ViabilityConfig};

// ---------------------------------------------------------------------------
// Tier
// ---------------------------------------------------------------------------

/// Coarse viability bucket. Tier4 covers both low scores and hard failures;
/// failures are the ones without a score.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ViabilityTier {
    #[serde(rename = "tier_1")]
    Tier1,
    #[serde(rename = "tier_2")]
    Tier2,
    #[serde(rename = "tier_3")]
    Tier3,
    #[serde(rename = "tier_4")]
    Tier4,
}

impl ViabilityTier {
    pub fn rank(&self) -> u8 {
        match self {
            ViabilityTier::Tier1 => 1,
            ViabilityTier::Tier2 => 2,
            ViabilityTier::Tier3 => 3,
            ViabilityTier::Tier4 => 4,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            ViabilityTier::Tier1 => "tier_1",
            ViabilityTier::Tier2 => "tier_2",
            ViabilityTier::Tier3 => "tier_3",
            ViabilityTier::Tier4 => "tier_4",
        }
    }

    pub fn from_str(s: &str) -> Option<Self> {
        match s {
            "tier_1" => Some(ViabilityTier::Tier1),
            "tier_2" => Some(ViabilityTier::Tier2),
            "tier_3" => Some(ViabilityTier::Tier3),
            "tier_4" => Some(ViabilityTier::Tier4),
            _ => None,
        }
    }
}

impl PartialOrd for ViabilityTier {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for ViabilityTier {
    fn cmp(&self, other: &Self) -> Ordering {
        self.rank().cmp(&other.rank())
    }
}

impl fmt::Display for ViabilityTier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

// ---------------------------------------------------------------------------
// Factors & failures
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ViabilityFactor {
    Reserve,
    NetFlow,
    Emission,
    PriceTrend,
    Drawdown,
    Age,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum HardFailure {
    Reserve,
    Emission,
    Age,
    Holders,
    Drawdown,
    Startup,
    Outflow,
}

impl HardFailure {
    pub fn as_str(&self) -> &'static str {
        match self {
            HardFailure::Reserve => "reserve",
            HardFailure::Emission => "emission",
            HardFailure::Age => "age",
            HardFailure::Holders => "holders",
            HardFailure::Drawdown => "drawdown",
            HardFailure::Startup => "startup",
            HardFailure::Outflow => "outflow",
        }
    }
}

impl fmt::Display for HardFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

// ---------------------------------------------------------------------------
// Result
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ViabilityResult {
    pub netuid: i32,
    /// Composite 0-100; `None` for hard failures.
    pub score: Option<Decimal>,
    pub tier: ViabilityTier,
    pub failures: Vec<HardFailure>,
    /// Human-readable detail for each failure.
    pub reasons: Vec<String>,
    pub factor_percentiles: BTreeMap<ViabilityFactor, Decimal>,
}

impl ViabilityResult {
    pub fn is_viable(&self) -> bool {
        self.score.is_some() && self.tier != ViabilityTier::Tier4
    }

    pub fn has_failure(&self, failure: HardFailure) -> bool {
        self.failures.contains(&failure)
    }
}

// ---------------------------------------------------------------------------
// Stage 1: hard failures
// ---------------------------------------------------------------------------

/// Binary checks; every failure is collected.
pub fn hard_failures(pool: &Pool, config: &ViabilityConfig) -> Vec<(HardFailure, String)> {
    let mut failures = Vec::new();

    if pool.reserve < config.min_reserve {
        failures.push((
            HardFailure::Reserve,
            format!("reserve {} below {}", pool.reserve, config.min_reserve),
        ));
    }
    if pool.emission_share < config.min_emission_share {
        failures.push((
            HardFailure::Emission,
            format!("emission share {} below {}", pool.emission_share, config.min_emission_share),
        ));
    }
    if pool.age_days < config.min_age_days {
        failures.push((
            HardFailure::Age,
            format!("age {}d below {}d", pool.age_days, config.min_age_days),
        ));
    }
    if pool.holder_count < config.min_holders {
        failures.push((
            HardFailure::Holders,
            format!("holders {} below {}", pool.holder_count, config.min_holders),
        ));
    }
    if pool.max_drawdown_30d > config.max_drawdown_30d {
        failures.push((
            HardFailure::Drawdown,
            format!("30d max drawdown {} above {}", pool.max_drawdown_30d, config.max_drawdown_30d),
        ));
    }
    if pool.is_startup {
        failures.push((HardFailure::Startup, "pool in startup mode".into()));
    }

    let outflow_breached = match pool.flow_ratio_7d() {
        Some(ratio) => ratio < -config.max_negative_flow_ratio,
        None => pool.flow_7d < Decimal::ZERO,
    };
    if outflow_breached {
        failures.push((
            HardFailure::Outflow,
            format!(
                "7d outflow {} exceeds {} of reserve",
                pool.flow_7d, config.max_negative_flow_ratio
            ),
        ));
    }

    failures
}

// ---------------------------------------------------------------------------
// Stage 2: percentile composite
// ---------------------------------------------------------------------------

fn neutral_percentile() -> Decimal {
    Decimal::from(50)
}

/// Percentile rank (0-100) of every value within `values`.
///
/// Rank is the insertion position of the value in the sorted set, i.e. the
/// count of strictly smaller values, so ties share the lower rank. With one
/// value or none every rank is 50.
pub fn percentile_ranks(values: &[Decimal]) -> Vec<Decimal> {
    let n = values.len();
    if n <= 1 {
        return vec![neutral_percentile(); n];
    }

    let mut sorted = values.to_vec();
    sorted.sort();
    let denominator = Decimal::from((n - 1) as i64);

    values
        .iter()
        .map(|v| {
            let position = sorted.partition_point(|x| x < v);
            Decimal::from(position as i64) * Decimal::ONE_HUNDRED / denominator
        })
        .collect()
}

/// Percentile ranks where lower raw values score higher (100 - rank).
pub fn inverted_percentile_ranks(values: &[Decimal]) -> Vec<Decimal> {
    if values.len() <= 1 {
        return vec![neutral_percentile(); values.len()];
    }
    percentile_ranks(values)
        .into_iter()
        .map(|p| Decimal::ONE_HUNDRED - p)
        .collect()
}

pub fn tier_for_score(score: Decimal, config: &ViabilityConfig) -> ViabilityTier {
    if score >= config.tier_1_cutoff {
        ViabilityTier::Tier1
    } else if score >= config.tier_2_cutoff {
        ViabilityTier::Tier2
    } else if score >= config.tier_3_cutoff {
        ViabilityTier::Tier3
    } else {
        ViabilityTier::Tier4
    }
}

/// Score every non-root pool: hard failures first, then a weighted
/// percentile composite over the pools that passed.
///
/// Results come back in the input order.
pub fn score_universe(pools: &[Pool], config: &ViabilityConfig) -> Vec<ViabilityResult> {
    let candidates: Vec<&Pool> = pools.iter().filter(|p| !p.is_root()).collect();

    let failures: Vec<Vec<(HardFailure, String)>> =
        candidates.iter().map(|p| hard_failures(p, config)).collect();

    let passing: Vec<&Pool> = candidates
        .iter()
        .zip(&failures)
        .filter(|(_, f)| f.is_empty())
        .map(|(p, _)| *p)
        .collect();

    let age_cap = Decimal::from(config.age_cap_days);
    let column = |f: fn(&Pool) -> Decimal| passing.iter().map(|p| f(p)).collect::<Vec<_>>();

    let factors: Vec<(ViabilityFactor, Decimal, Vec<Decimal>)> = vec![
        (
            ViabilityFactor::Reserve,
            config.weight_reserve,
            percentile_ranks(&column(|p| p.reserve)),
        ),
        (
            ViabilityFactor::NetFlow,
            config.weight_net_flow,
            percentile_ranks(&column(|p| p.flow_7d)),
        ),
        (
            ViabilityFactor::Emission,
            config.weight_emission,
            percentile_ranks(&column(|p| p.emission_share)),
        ),
        (
            ViabilityFactor::PriceTrend,
            config.weight_price_trend,
            percentile_ranks(&column(|p| p.price_trend_7d)),
        ),
        (
            ViabilityFactor::Drawdown,
            config.weight_drawdown,
            inverted_percentile_ranks(&column(|p| p.max_drawdown_30d)),
        ),
        (
            ViabilityFactor::Age,
            config.weight_age,
            percentile_ranks(
                &passing
                    .iter()
                    .map(|p| Decimal::from(p.age_days).min(age_cap))
                    .collect::<Vec<_>>(),
            ),
        ),
    ];

    let mut scored: BTreeMap<i32, (Decimal, BTreeMap<ViabilityFactor, Decimal>)> = BTreeMap::new();
    for (idx, pool) in passing.iter().enumerate() {
        let mut percentiles = BTreeMap::new();
        let mut composite = Decimal::ZERO;
        for (factor, weight, ranks) in &factors {
            percentiles.insert(*factor, ranks[idx]);
            composite += *weight * ranks[idx];
        }
        let composite = composite
            .max(Decimal::ZERO)
            .min(Decimal::ONE_HUNDRED)
            .round_dp(2);
        scored.insert(pool.netuid, (composite, percentiles));
    }

    candidates
        .iter()
        .zip(failures)
        .map(|(pool, failed)| {
            if !failed.is_empty() {
                let (kinds, reasons) = failed.into_iter().unzip();
                return ViabilityResult {
                    netuid: pool.netuid,
                    score: None,
                    tier: ViabilityTier::Tier4,
                    failures: kinds,
                    reasons,
                    factor_percentiles: BTreeMap::new(),
                };
            }

            let (score, percentiles) = scored
                .remove(&pool.netuid)
                .unwrap_or_else(|| (Decimal::ZERO, BTreeMap::new()));
            ViabilityResult {
                netuid: pool.netuid,
                score: Some(score),
                tier: tier_for_score(score, config),
                failures: Vec::new(),
                reasons: Vec::new(),
                factor_percentiles: percentiles,
            }
        })
        .collect()
}

// ---------------------------------------------------------------------------
// Price-history derived metrics
// ---------------------------------------------------------------------------

/// Largest peak-to-trough decline (fraction) over a chronological price series.
pub fn max_drawdown(prices: &[Decimal]) -> Decimal {
    let mut peak: Option<Decimal> = None;
    let mut worst = Decimal::ZERO;

    for &price in prices {
        let current_peak = match peak {
            Some(p) if p >= price => p,
            _ => {
                peak = Some(price);
                price
            }
        };
        if current_peak > Decimal::ZERO {
            let drawdown = (current_peak - price) / current_peak;
            worst = worst.max(drawdown);
        }
    }

    worst
}

/// Fractional price change from the first observation at or after
/// `now - 7d` to the latest observation. `None` with fewer than two points.
pub fn price_trend_7d(history: &[PoolPrice], now: DateTime<Utc>) -> Option<Decimal> {
    let since = now - Duration::days(7);
    let mut window: Vec<&PoolPrice> = history.iter().filter(|p| p.observed_at >= since).collect();
    if window.len() < 2 {
        return None;
    }
    window.sort_by_key(|p| p.observed_at);

    let first = window.first()?.price;
    let last = window.last()?.price;
    if first <= Decimal::ZERO {
        return None;
    }
    Some((last - first) / first)
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
