use std::collections::{BTreeMap, HashMap};
use std::time::Instant;

use chrono::{DateTime, Duration, Utc};
use metrics::{counter, histogram};
use rust_decimal::Decimal;
use serde::Serialize;
use sqlx::PgPool;
use tokio::time::interval;

use crate::config::StrategySettings;
use crate::db::pool_repo::{self, PoolScoreUpdate};
use crate::db::price_repo;
use crate::errors::StrategyResult;
use crate::intelligence::eligibility::{screen_universe, EligibilityResult};
use crate::intelligence::viability::{max_drawdown, price_trend_7d, score_universe, ViabilityResult};
use crate::models::{Pool, PoolPrice, ViabilityConfig};
use crate::services::snapshot_loader::load_viability_config;

/// Drawdown and trend recomputed from price history for one pool.
#[derive(Debug, Clone, PartialEq)]
pub struct PriceMetrics {
    pub max_drawdown_30d: Option<Decimal>,
    pub price_trend_7d: Option<Decimal>,
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct ScoringReport {
    pub config_version: i32,
    pub pools_scored: usize,
    pub eligible: usize,
    pub hard_failures: usize,
    pub rows_written: u64,
}

// ---------------------------------------------------------------------------
// Pure steps
// ---------------------------------------------------------------------------

/// Recompute price-derived metrics and apply them to `pools` in place.
/// Pools with fewer than two observations keep their synced values.
pub fn refresh_price_metrics(
    pools: &mut [Pool],
    history: &HashMap<i32, Vec<PoolPrice>>,
    now: DateTime<Utc>,
) -> HashMap<i32, PriceMetrics> {
    let mut refreshed = HashMap::new();

    for pool in pools.iter_mut().filter(|p| !p.is_root()) {
        let Some(prices) = history.get(&pool.netuid) else {
            continue;
        };

        let mut series: Vec<&PoolPrice> = prices.iter().collect();
        series.sort_by_key(|p| p.observed_at);
        let closes: Vec<Decimal> = series.iter().map(|p| p.price).collect();

        let metrics = PriceMetrics {
            max_drawdown_30d: (closes.len() >= 2).then(|| max_drawdown(&closes)),
            price_trend_7d: price_trend_7d(prices, now),
        };

        if let Some(dd) = metrics.max_drawdown_30d {
            pool.max_drawdown_30d = dd;
        }
        if let Some(trend) = metrics.price_trend_7d {
            pool.price_trend_7d = trend;
        }
        refreshed.insert(pool.netuid, metrics);
    }

    refreshed
}

/// Pair scoring and screening results into write-back rows.
pub fn build_score_updates(
    viability: &[ViabilityResult],
    eligibility: &[EligibilityResult],
    price_metrics: &HashMap<i32, PriceMetrics>,
) -> Vec<PoolScoreUpdate> {
    let eligibility: BTreeMap<i32, &EligibilityResult> =
        eligibility.iter().map(|e| (e.netuid, e)).collect();

    viability
        .iter()
        .map(|v| {
            let e = eligibility.get(&v.netuid);
            let metrics = price_metrics.get(&v.netuid);

            let mut reasons: Vec<String> = e.map(|e| e.reasons.clone()).unwrap_or_default();
            reasons.extend(v.reasons.iter().cloned());

            PoolScoreUpdate {
                netuid: v.netuid,
                viability_score: v.score,
                viability_tier: v.tier.as_str().to_string(),
                max_drawdown_30d: metrics.and_then(|m| m.max_drawdown_30d),
                price_trend_7d: metrics.and_then(|m| m.price_trend_7d),
                is_eligible: e.map(|e| e.eligible).unwrap_or(false),
                ineligibility_reasons: reasons,
            }
        })
        .collect()
}

// ---------------------------------------------------------------------------
// Pass
// ---------------------------------------------------------------------------

/// Score the whole universe once and write results back to `pools`.
pub async fn run_scoring_pass(
    pool: &PgPool,
    settings: &StrategySettings,
    defaults: &ViabilityConfig,
    now: DateTime<Utc>,
) -> StrategyResult<ScoringReport> {
    let config = load_viability_config(pool, defaults).await?;

    let mut pools = pool_repo::get_pools(pool).await?;
    let history = price_repo::get_price_history_by_pool(pool, now - Duration::days(30)).await?;
    let price_metrics = refresh_price_metrics(&mut pools, &history, now);

    let viability = score_universe(&pools, &config);
    let eligibility = screen_universe(&pools, &settings.eligibility);
    let updates = build_score_updates(&viability, &eligibility, &price_metrics);

    let rows_written = pool_repo::update_scores(pool, &updates, now).await?;

    let report = ScoringReport {
        config_version: config.version,
        pools_scored: viability.len(),
        eligible: eligibility.iter().filter(|e| e.eligible).count(),
        hard_failures: viability.iter().filter(|v| v.score.is_none()).count(),
        rows_written,
    };

    counter!("pools_scored_total").increment(report.pools_scored as u64);
    tracing::info!(
        config_version = report.config_version,
        pools = report.pools_scored,
        eligible = report.eligible,
        hard_failures = report.hard_failures,
        refreshed = price_metrics.len(),
        "Scoring pass complete"
    );

    Ok(report)
}

/// Run the scoring loop. A config that fails to load skips the tick; the
/// previous scores stay in place.
pub async fn run_scoring_loop(
    pool: PgPool,
    settings: StrategySettings,
    defaults: ViabilityConfig,
    interval_secs: u64,
) {
    let mut ticker = interval(std::time::Duration::from_secs(interval_secs));

    loop {
        ticker.tick().await;

        let started = Instant::now();
        match run_scoring_pass(&pool, &settings, &defaults, Utc::now()).await {
            Ok(_) => {
                counter!("scoring_passes_total").increment(1);
            }
            Err(e) => {
                tracing::error!(error = %e, "Scoring pass failed");
            }
        }
        histogram!("pass_duration_seconds", "pass" => "scoring")
            .record(started.elapsed().as_secs_f64());
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::intelligence::viability::ViabilityTier;
    use rust_decimal_macros::dec;

    fn price(netuid: i32, value: Decimal, days_ago: i64, now: DateTime<Utc>) -> PoolPrice {
        PoolPrice {
            netuid,
            price: value,
            observed_at: now - Duration::days(days_ago),
        }
    }

    #[test]
    fn test_refresh_applies_history() {
        let now = Utc::now();
        let mut pools = vec![
            Pool { netuid: 0, ..Default::default() },
            Pool { netuid: 1, max_drawdown_30d: dec!(0.9), ..Default::default() },
            Pool { netuid: 2, max_drawdown_30d: dec!(0.3), ..Default::default() },
        ];
        let mut history = HashMap::new();
        history.insert(
            1,
            vec![
                price(1, dec!(1.0), 20, now),
                price(1, dec!(2.0), 6, now),
                price(1, dec!(1.5), 3, now),
                price(1, dec!(3.0), 1, now),
            ],
        );
        history.insert(0, vec![price(0, dec!(1), 2, now), price(0, dec!(2), 1, now)]);

        let refreshed = refresh_price_metrics(&mut pools, &history, now);

        assert_eq!(refreshed.len(), 1);
        assert_eq!(pools[1].max_drawdown_30d, dec!(0.25));
        assert_eq!(pools[1].price_trend_7d, dec!(0.5));
        // no history: untouched
        assert_eq!(pools[2].max_drawdown_30d, dec!(0.3));
    }

    #[test]
    fn test_single_observation_keeps_synced_values() {
        let now = Utc::now();
        let mut pools = vec![Pool { netuid: 5, max_drawdown_30d: dec!(0.2), ..Default::default() }];
        let mut history = HashMap::new();
        history.insert(5, vec![price(5, dec!(1), 1, now)]);

        let refreshed = refresh_price_metrics(&mut pools, &history, now);

        assert_eq!(refreshed[&5], PriceMetrics { max_drawdown_30d: None, price_trend_7d: None });
        assert_eq!(pools[0].max_drawdown_30d, dec!(0.2));
    }

    #[test]
    fn test_updates_merge_reasons() {
        let viability = vec![ViabilityResult {
            netuid: 7,
            score: None,
            tier: ViabilityTier::Tier4,
            failures: vec![],
            reasons: vec!["reserve 400 below 500".into()],
            factor_percentiles: BTreeMap::new(),
        }];
        let eligibility = vec![EligibilityResult {
            netuid: 7,
            eligible: false,
            reasons: vec!["holders 3 below 50".into()],
            attractiveness_score: Decimal::ZERO,
        }];

        let updates = build_score_updates(&viability, &eligibility, &HashMap::new());

        assert_eq!(updates.len(), 1);
        let u = &updates[0];
        assert_eq!(u.viability_tier, "tier_4");
        assert!(u.viability_score.is_none());
        assert!(!u.is_eligible);
        assert_eq!(u.ineligibility_reasons.len(), 2);
        assert!(u.max_drawdown_30d.is_none());
    }
}
