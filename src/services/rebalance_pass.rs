use std::time::Instant;

use chrono::{DateTime, Utc};
use metrics::{counter, gauge, histogram};
use rust_decimal::Decimal;
use serde::Serialize;
use sqlx::PgPool;
use tokio::time::interval;

use crate::db::recommendation_repo;
use crate::errors::StrategyResult;
use crate::execution::rebalancer::RebalancePlan;
use crate::models::{TradeRecommendation, ViabilityConfig};
use crate::services::snapshot_loader::{load_snapshot, load_viability_config};
use crate::services::wallet_locks::WalletLocks;
use crate::strategy::StrategyEngine;

#[derive(Debug, Clone, Serialize)]
pub struct RebalanceReport {
    pub wallet: String,
    pub regime: String,
    pub recommendations: usize,
    pub urgent: usize,
    pub total_size: Decimal,
    pub scale_factor: Decimal,
}

/// Convert a plan into pending recommendation rows, parents before tranches.
pub fn plan_to_recommendations(
    plan: &RebalancePlan,
    wallet: &str,
    created_at: DateTime<Utc>,
) -> Vec<TradeRecommendation> {
    plan.trades
        .iter()
        .map(|t| t.to_recommendation(wallet, created_at))
        .collect()
}

/// Persist every recommendation of a plan in one transaction.
pub async fn persist_plan(
    pool: &PgPool,
    wallet: &str,
    plan: &RebalancePlan,
    created_at: DateTime<Utc>,
) -> StrategyResult<usize> {
    if plan.is_empty() {
        return Ok(0);
    }

    let rows = plan_to_recommendations(plan, wallet, created_at);
    let mut tx = pool.begin().await?;
    recommendation_repo::insert_recommendations(&mut *tx, &rows).await?;
    tx.commit().await?;

    counter!("recommendations_generated_total", "kind" => plan.kind.as_str())
        .increment(rows.len() as u64);
    Ok(rows.len())
}

/// Assess one wallet and persist its scheduled rebalance.
pub async fn run_rebalance_pass(
    pool: &PgPool,
    engine: &StrategyEngine,
    defaults: &ViabilityConfig,
    wallet: &str,
    now: DateTime<Utc>,
) -> StrategyResult<RebalanceReport> {
    let config = load_viability_config(pool, defaults).await?;
    let snapshot = load_snapshot(pool, wallet, config, now).await?;

    let assessment = engine.assess(&snapshot);
    let plan = engine.plan_scheduled(&snapshot, &assessment);
    let written = persist_plan(pool, wallet, &plan, now).await?;

    gauge!("macro_regime_rank").set(f64::from(assessment.regime.regime.rank()));
    for note in &plan.notes {
        tracing::info!(wallet = %wallet, note = %note, "Rebalance note");
    }

    Ok(RebalanceReport {
        wallet: wallet.to_string(),
        regime: assessment.regime.regime.as_str().to_string(),
        recommendations: written,
        urgent: plan.urgent_count(),
        total_size: plan.total_size(),
        scale_factor: plan.scale_factor,
    })
}

/// Run the scheduled rebalance loop over every configured wallet.
pub async fn run_rebalance_loop(
    pool: PgPool,
    engine: StrategyEngine,
    defaults: ViabilityConfig,
    wallets: Vec<String>,
    locks: WalletLocks,
    interval_secs: u64,
) {
    let mut ticker = interval(std::time::Duration::from_secs(interval_secs));

    loop {
        ticker.tick().await;

        for wallet in &wallets {
            let _guard = locks.lock(wallet).await;
            let started = Instant::now();

            match run_rebalance_pass(&pool, &engine, &defaults, wallet, Utc::now()).await {
                Ok(report) => {
                    tracing::info!(
                        wallet = %report.wallet,
                        regime = %report.regime,
                        recommendations = report.recommendations,
                        urgent = report.urgent,
                        total = %report.total_size,
                        scale = %report.scale_factor,
                        "Scheduled rebalance persisted"
                    );
                }
                Err(e) => {
                    tracing::error!(error = %e, wallet = %wallet, "Scheduled rebalance failed");
                }
            }
            histogram!("pass_duration_seconds", "pass" => "rebalance")
                .record(started.elapsed().as_secs_f64());
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::execution::rebalancer::{build_exit_ladder, PlanKind, PlannedTrade, TriggerReason};
    use crate::intelligence::regime::MacroRegime;
    use crate::models::TradeDirection;
    use rust_decimal_macros::dec;

    #[test]
    fn test_ladder_parent_precedes_tranches() {
        let now = Utc::now();
        let parent = PlannedTrade::new(
            3,
            TradeDirection::Sell,
            dec!(900),
            TriggerReason::DeadExit,
            "dead",
            now,
        );
        let plan = RebalancePlan {
            kind: PlanKind::EventDriven,
            trades: build_exit_ladder(parent, 3),
            regime: MacroRegime::Neutral,
            turnover_budget: dec!(1_000),
            total_before_scaling: dec!(900),
            scale_factor: Decimal::ONE,
            notes: vec![],
        };

        let rows = plan_to_recommendations(&plan, "5Fwallet", now);

        assert_eq!(rows.len(), 4);
        assert!(rows[0].is_ladder_parent());
        assert!(rows[1..].iter().all(|r| r.parent_id == Some(rows[0].id)));
        assert!(rows.iter().all(|r| r.status == "pending" && r.urgent));
        assert_eq!(rows[1..].iter().map(|r| r.size).sum::<Decimal>(), dec!(900));
    }
}
