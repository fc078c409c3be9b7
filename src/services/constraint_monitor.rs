use std::time::Instant;

use chrono::{DateTime, Utc};
use metrics::{counter, histogram};
use serde::Serialize;
use sqlx::PgPool;
use tokio::time::interval;
use uuid::Uuid;

use crate::db::{alert_repo, recommendation_repo};
use crate::errors::StrategyResult;
use crate::execution::constraint_enforcer::{
    alert_cooldown, cleared_alerts, dedupe_against_active, ConstraintViolation,
};
use crate::execution::RebalanceEvent;
use crate::models::{Alert, TradeRecommendation, ViabilityConfig};
use crate::services::rebalance_pass::plan_to_recommendations;
use crate::services::snapshot_loader::{load_snapshot, load_viability_config};
use crate::services::wallet_locks::WalletLocks;
use crate::strategy::StrategyEngine;

/// Alert rows to insert and alert ids to resolve after one evaluation.
#[derive(Debug, Clone, Default)]
pub struct AlertChanges {
    pub raise: Vec<Alert>,
    pub resolve: Vec<Uuid>,
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct MonitorReport {
    pub wallet: String,
    pub violations: usize,
    pub breaches: usize,
    pub alerts_raised: usize,
    pub alerts_resolved: usize,
    pub event_recommendations: usize,
}

pub fn alert_changes(
    wallet: &str,
    violations: &[ConstraintViolation],
    open_alerts: &[Alert],
    now: DateTime<Utc>,
) -> AlertChanges {
    let raise = dedupe_against_active(violations.to_vec(), open_alerts, now, alert_cooldown())
        .iter()
        .map(|v| v.to_alert(wallet, now))
        .collect();

    AlertChanges {
        raise,
        resolve: cleared_alerts(open_alerts, violations),
    }
}

/// Drop events whose trades are already waiting: a pending recommendation
/// with the same trigger on the same pool, or any pending risk-reduction trim.
pub fn outstanding_events(
    events: Vec<RebalanceEvent>,
    pending: &[TradeRecommendation],
) -> Vec<RebalanceEvent> {
    events
        .into_iter()
        .filter(|event| {
            let trigger = event.trigger().as_str();
            !pending.iter().any(|r| {
                r.trigger == trigger && event.netuid().map_or(true, |netuid| r.netuid == netuid)
            })
        })
        .collect()
}

/// Evaluate one wallet: record new alerts, resolve cleared ones and, when
/// enabled, persist an event-driven plan for any breach. Everything the tick
/// writes lands in one transaction.
pub async fn run_monitor_pass(
    pool: &PgPool,
    engine: &StrategyEngine,
    defaults: &ViabilityConfig,
    wallet: &str,
    event_rebalance: bool,
    now: DateTime<Utc>,
) -> StrategyResult<MonitorReport> {
    // Viability only ranks entries here; a bad config must not stop limit checks.
    let config = match load_viability_config(pool, defaults).await {
        Ok(c) => c,
        Err(e) => {
            tracing::warn!(error = %e, "Monitor: using default viability config");
            defaults.clone()
        }
    };

    let snapshot = load_snapshot(pool, wallet, config, now).await?;
    let assessment = engine.assess(&snapshot);

    let open_alerts = alert_repo::get_open_alerts(pool, wallet).await?;
    let changes = alert_changes(wallet, &assessment.violations, &open_alerts, now);

    let recommendations = if event_rebalance {
        let pending = recommendation_repo::get_pending(pool, wallet).await?;
        let events = outstanding_events(engine.events_from_violations(&assessment), &pending);
        if events.is_empty() {
            Vec::new()
        } else {
            let plan = engine.plan_events(&snapshot, &assessment, &events);
            for note in &plan.notes {
                tracing::info!(wallet = %wallet, note = %note, "Event rebalance note");
            }
            plan_to_recommendations(&plan, wallet, now)
        }
    } else {
        Vec::new()
    };

    let mut tx = pool.begin().await?;
    alert_repo::insert_alerts(&mut *tx, &changes.raise).await?;
    let resolved = alert_repo::resolve_alerts(&mut *tx, &changes.resolve, now).await?;
    recommendation_repo::insert_recommendations(&mut *tx, &recommendations).await?;
    tx.commit().await?;

    for v in &assessment.violations {
        counter!(
            "constraint_violations_total",
            "category" => v.category.as_str(),
            "severity" => v.severity.as_str()
        )
        .increment(1);
    }
    counter!("alerts_raised_total").increment(changes.raise.len() as u64);
    if !recommendations.is_empty() {
        counter!("recommendations_generated_total", "kind" => "event_driven")
            .increment(recommendations.len() as u64);
    }

    for alert in &changes.raise {
        tracing::warn!(
            wallet = %wallet,
            category = %alert.category,
            severity = %alert.severity,
            netuid = ?alert.netuid,
            message = %alert.message,
            "Constraint alert raised"
        );
    }

    Ok(MonitorReport {
        wallet: wallet.to_string(),
        violations: assessment.violations.len(),
        breaches: assessment.summary.breaches,
        alerts_raised: changes.raise.len(),
        alerts_resolved: resolved as usize,
        event_recommendations: recommendations.len(),
    })
}

/// Run the constraint monitor loop. A wallet already being rebalanced is
/// skipped for this tick.
pub async fn run_constraint_monitor(
    pool: PgPool,
    engine: StrategyEngine,
    defaults: ViabilityConfig,
    wallets: Vec<String>,
    locks: WalletLocks,
    event_rebalance: bool,
    interval_secs: u64,
) {
    let mut ticker = interval(std::time::Duration::from_secs(interval_secs));

    loop {
        ticker.tick().await;

        for wallet in &wallets {
            let Some(_guard) = locks.try_lock(wallet).await else {
                tracing::debug!(
                    wallet = %wallet,
                    "Constraint monitor: wallet busy, skipping"
                );
                continue;
            };
            let started = Instant::now();

            let result =
                run_monitor_pass(&pool, &engine, &defaults, wallet, event_rebalance, Utc::now())
                    .await;
            match result {
                Ok(report) => {
                    tracing::debug!(
                        wallet = %report.wallet,
                        violations = report.violations,
                        raised = report.alerts_raised,
                        resolved = report.alerts_resolved,
                        event_recommendations = report.event_recommendations,
                        "Constraint monitor tick"
                    );
                }
                Err(e) => {
                    tracing::error!(
                        error = %e,
                        wallet = %wallet,
                        "Constraint monitor: pass failed"
                    );
                }
            }
            histogram!("pass_duration_seconds", "pass" => "monitor")
                .record(started.elapsed().as_secs_f64());
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::execution::constraint_enforcer::{ViolationCategory, ViolationSeverity};
    use crate::execution::{PlannedTrade, TriggerReason};
    use crate::models::alert::alert_status;
    use crate::models::TradeDirection;
    use chrono::Duration;
    use rust_decimal_macros::dec;

    fn concentration(netuid: i32, severity: ViolationSeverity) -> ConstraintViolation {
        ConstraintViolation {
            category: ViolationCategory::PositionConcentration,
            severity,
            netuid: Some(netuid),
            subject: None,
            threshold: dec!(0.15),
            actual: dec!(0.2),
            message: format!("pool {netuid} at 20.00% of NAV"),
        }
    }

    #[test]
    fn test_new_violation_raises_alert() {
        let now = Utc::now();
        let violations = [concentration(3, ViolationSeverity::Breach)];
        let changes = alert_changes("5Fwallet", &violations, &[], now);

        assert_eq!(changes.raise.len(), 1);
        assert!(changes.resolve.is_empty());
        let alert = &changes.raise[0];
        assert_eq!(alert.status, alert_status::ACTIVE);
        assert_eq!(alert.severity, "breach");
        assert_eq!(alert.netuid, Some(3));
    }

    #[test]
    fn test_repeat_within_cooldown_is_quiet() {
        let now = Utc::now();
        let violation = concentration(3, ViolationSeverity::Warning);
        let existing = violation.to_alert("5Fwallet", now - Duration::minutes(10));

        let changes = alert_changes("5Fwallet", &[violation], &[existing], now);

        assert!(changes.raise.is_empty());
        assert!(changes.resolve.is_empty());
    }

    #[test]
    fn test_cleared_condition_resolves() {
        let now = Utc::now();
        let existing = concentration(3, ViolationSeverity::Warning)
            .to_alert("5Fwallet", now - Duration::hours(3));

        let violations = [concentration(4, ViolationSeverity::Warning)];
        let changes = alert_changes("5Fwallet", &violations, &[existing.clone()], now);

        assert_eq!(changes.raise.len(), 1);
        assert_eq!(changes.resolve, vec![existing.id]);
    }

    fn pending(netuid: i32, trigger: TriggerReason) -> TradeRecommendation {
        PlannedTrade::new(
            netuid,
            TradeDirection::Sell,
            dec!(100),
            trigger,
            "pending",
            Utc::now() + Duration::days(1),
        )
        .to_recommendation("5Fwallet", Utc::now())
    }

    #[test]
    fn test_events_with_pending_trades_are_skipped() {
        let events = vec![
            RebalanceEvent::ConcentrationBreach(1),
            RebalanceEvent::ConcentrationBreach(2),
            RebalanceEvent::Dead(1),
            RebalanceEvent::RiskReduction,
        ];
        let waiting = vec![
            pending(1, TriggerReason::ConcentrationBreach),
            pending(3, TriggerReason::RiskReduction),
        ];

        let remaining = outstanding_events(events, &waiting);

        assert_eq!(
            remaining,
            vec![RebalanceEvent::ConcentrationBreach(2), RebalanceEvent::Dead(1)]
        );
    }

    #[test]
    fn test_no_pending_keeps_every_event() {
        let events = vec![RebalanceEvent::Quarantine(4), RebalanceEvent::RiskReduction];
        assert_eq!(outstanding_events(events.clone(), &[]), events);
    }
}
