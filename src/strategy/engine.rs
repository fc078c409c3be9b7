use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use crate::config::StrategySettings;
use crate::execution::constraint_enforcer::{
    evaluate_constraints, ConstraintInput, ConstraintViolation, ViolationCategory,
    ViolationSeverity,
};
use crate::execution::position_sizer::{compute_position_limit, PortfolioContext, PositionLimit};
use crate::execution::rebalancer::{
    plan_event_rebalance, plan_scheduled_rebalance, RebalanceEvent, RebalanceInput, RebalancePlan,
};
use crate::intelligence::eligibility::{screen_universe, EligibilityResult};
use crate::intelligence::exitability::{classify_positions, ExitSeverity, ExitabilityResult};
use crate::intelligence::regime::{
    classify_regime, reserve_weighted_drawdown, FlowRegime, MacroSignals, RegimeAssessment,
};
use crate::intelligence::slippage::SlippageTable;
use crate::intelligence::viability::{score_universe, ViabilityResult, ViabilityTier};
use crate::models::{Pool, PortfolioSnapshot, Position, ViabilityConfig, ROOT_NETUID};

// ---------------------------------------------------------------------------
// Input
// ---------------------------------------------------------------------------

/// Everything known about one wallet and the pool universe at `as_of`.
#[derive(Debug, Clone)]
pub struct MarketSnapshot {
    pub wallet: String,
    pub pools: Vec<Pool>,
    pub positions: Vec<Position>,
    pub slippage: SlippageTable,
    pub portfolio: Option<PortfolioSnapshot>,
    pub viability_config: ViabilityConfig,
    /// Executed recommendation volume over the trailing 7 days.
    pub executed_7d: Decimal,
    /// Executed recommendation volume over the trailing 24 hours.
    pub executed_24h: Decimal,
    /// Still-pending recommendation volume created in the trailing 7 days.
    pub pending_7d: Decimal,
    /// Still-pending recommendation volume created in the trailing 24 hours.
    pub pending_24h: Decimal,
    pub as_of: DateTime<Utc>,
}

impl MarketSnapshot {
    /// Snapshot NAV, or the sum of position values when no snapshot exists.
    pub fn nav(&self) -> Decimal {
        match &self.portfolio {
            Some(p) if p.nav > Decimal::ZERO => p.nav,
            _ => self
                .positions
                .iter()
                .map(|p| p.value.max(Decimal::ZERO))
                .sum(),
        }
    }

    pub fn unstaked_buffer(&self) -> Decimal {
        self.portfolio
            .as_ref()
            .map(|p| p.unstaked_buffer.max(Decimal::ZERO))
            .unwrap_or(Decimal::ZERO)
    }

    /// Drawdown from peak; reserve-weighted pool drawdown without a snapshot.
    pub fn drawdown(&self) -> Decimal {
        match &self.portfolio {
            Some(p) => p.drawdown_from_peak.abs(),
            None => reserve_weighted_drawdown(&self.pools),
        }
    }

    /// Value of held non-root positions.
    pub fn sleeve_value(&self) -> Decimal {
        self.positions
            .iter()
            .filter(|p| p.is_held() && p.netuid != ROOT_NETUID)
            .map(|p| p.value)
            .sum()
    }
}

// ---------------------------------------------------------------------------
// Output
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct AssessmentSummary {
    pub pools_screened: usize,
    pub eligible: usize,
    pub viable: usize,
    pub hard_failures: usize,
    pub held_positions: usize,
    pub exit_warnings: usize,
    pub force_trims: usize,
    pub breaches: usize,
    pub warnings: usize,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PortfolioAssessment {
    pub wallet: String,
    pub as_of: DateTime<Utc>,
    pub nav: Decimal,
    pub sleeve_value: Decimal,
    pub target_sleeve: Decimal,
    pub drawdown: Decimal,
    pub eligibility: BTreeMap<i32, EligibilityResult>,
    pub viability: BTreeMap<i32, ViabilityResult>,
    pub flow_regimes: BTreeMap<i32, FlowRegime>,
    pub regime: RegimeAssessment,
    pub exitability: BTreeMap<i32, ExitabilityResult>,
    pub position_limits: BTreeMap<i32, PositionLimit>,
    pub violations: Vec<ConstraintViolation>,
    pub summary: AssessmentSummary,
    /// Data gaps and fallbacks used while assessing.
    pub notes: Vec<String>,
}

// ---------------------------------------------------------------------------
// Engine
// ---------------------------------------------------------------------------

/// Pure decision core: no I/O, no locking, every call returns a result.
#[derive(Debug, Clone)]
pub struct StrategyEngine {
    settings: StrategySettings,
}

impl StrategyEngine {
    pub fn new(settings: StrategySettings) -> Self {
        Self { settings }
    }

    pub fn settings(&self) -> &StrategySettings {
        &self.settings
    }

    /// Remaining weekly turnover allowance for the scheduled rebalance.
    /// Pending recommendations count against it until they expire.
    pub fn weekly_budget(&self, snapshot: &MarketSnapshot) -> Decimal {
        let cap = self.settings.limits.weekly_turnover_cap * snapshot.nav();
        (cap - snapshot.executed_7d - snapshot.pending_7d).max(Decimal::ZERO)
    }

    /// Remaining daily turnover allowance for event-driven rebalances.
    pub fn daily_budget(&self, snapshot: &MarketSnapshot) -> Decimal {
        let cap = self.settings.limits.daily_turnover_cap * snapshot.nav();
        (cap - snapshot.executed_24h - snapshot.pending_24h).max(Decimal::ZERO)
    }

    pub fn assess(&self, snapshot: &MarketSnapshot) -> PortfolioAssessment {
        let s = &self.settings;
        let mut notes = Vec::new();

        if snapshot.pools.is_empty() {
            notes.push("no pool data; universe is empty".to_string());
        }
        if snapshot.positions.iter().all(|p| !p.is_held()) {
            notes.push("wallet holds no positions".to_string());
        }
        if snapshot.portfolio.is_none() {
            notes.push(
                "no portfolio snapshot; NAV from positions, drawdown from pool history".to_string(),
            );
        }
        if snapshot.slippage.is_empty() {
            notes.push("no slippage surfaces; exit impacts assume an illiquid pool".to_string());
        }

        let viability_config = match snapshot.viability_config.validate() {
            Ok(()) => snapshot.viability_config.clone(),
            Err(e) => {
                notes.push(format!(
                    "viability config v{} rejected ({e}); using defaults",
                    snapshot.viability_config.version
                ));
                ViabilityConfig::default()
            }
        };

        let eligibility: BTreeMap<i32, EligibilityResult> =
            screen_universe(&snapshot.pools, &s.eligibility)
                .into_iter()
                .map(|r| (r.netuid, r))
                .collect();
        let viability: BTreeMap<i32, ViabilityResult> =
            score_universe(&snapshot.pools, &viability_config)
                .into_iter()
                .map(|r| (r.netuid, r))
                .collect();
        let flow_regimes: BTreeMap<i32, FlowRegime> = snapshot
            .pools
            .iter()
            .filter(|p| !p.is_root())
            .map(|p| (p.netuid, FlowRegime::of(p)))
            .collect();

        let nav = snapshot.nav();
        let drawdown = snapshot.drawdown();
        let signals = MacroSignals::from_pools(&snapshot.pools, drawdown);
        let regime = classify_regime(&signals, &s.regime);
        let target_sleeve = regime.policy.target_sleeve(nav, s.sleeve_min_pct, s.sleeve_max_pct);
        let sleeve_value = snapshot.sleeve_value();

        let exitability =
            classify_positions(&snapshot.positions, &snapshot.slippage, nav, &s.exitability);

        let sleeve_base = sleeve_value.max(target_sleeve);
        let ctx = PortfolioContext::from_positions(
            &snapshot.positions,
            &snapshot.pools,
            nav,
            sleeve_base,
        );
        let mut position_limits = BTreeMap::new();
        for netuid in exitability.keys() {
            match snapshot.pools.iter().find(|p| p.netuid == *netuid) {
                Some(pool) => {
                    let curve = snapshot.slippage.exit_curve(*netuid);
                    let limit = compute_position_limit(pool, curve, &ctx, &s.sizing);
                    position_limits.insert(*netuid, limit);
                }
                None => notes.push(format!("held pool {netuid} missing from pool data")),
            }
        }

        let violations = evaluate_constraints(
            &ConstraintInput {
                nav,
                sleeve_nav: sleeve_base,
                positions: &snapshot.positions,
                pools: &snapshot.pools,
                slippage: &snapshot.slippage,
                drawdown,
                executed_7d: snapshot.executed_7d,
            },
            &s.limits,
        );

        let summary = AssessmentSummary {
            pools_screened: eligibility.len(),
            eligible: eligibility.values().filter(|e| e.eligible).count(),
            viable: viability.values().filter(|v| v.tier != ViabilityTier::Tier4).count(),
            hard_failures: viability.values().filter(|v| v.score.is_none()).count(),
            held_positions: exitability.len(),
            exit_warnings: exitability
                .values()
                .filter(|e| e.severity >= ExitSeverity::Warning)
                .count(),
            force_trims: exitability
                .values()
                .filter(|e| e.severity == ExitSeverity::ForceTrim)
                .count(),
            breaches: violations.iter().filter(|v| v.is_breach()).count(),
            warnings: violations.iter().filter(|v| !v.is_breach()).count(),
        };

        tracing::info!(
            wallet = %snapshot.wallet,
            nav = %nav,
            regime = %regime.regime,
            eligible = summary.eligible,
            viable = summary.viable,
            breaches = summary.breaches,
            "Portfolio assessed"
        );

        PortfolioAssessment {
            wallet: snapshot.wallet.clone(),
            as_of: snapshot.as_of,
            nav,
            sleeve_value,
            target_sleeve,
            drawdown,
            eligibility,
            viability,
            flow_regimes,
            regime,
            exitability,
            position_limits,
            violations,
            summary,
            notes,
        }
    }

    fn rebalance_input<'a>(
        &'a self,
        snapshot: &'a MarketSnapshot,
        assessment: &'a PortfolioAssessment,
        turnover_budget: Decimal,
    ) -> RebalanceInput<'a> {
        RebalanceInput {
            nav: assessment.nav,
            positions: &snapshot.positions,
            pools: &snapshot.pools,
            eligibility: &assessment.eligibility,
            viability: &assessment.viability,
            regime: &assessment.regime,
            slippage: &snapshot.slippage,
            sizing: &self.settings.sizing,
            exitability: &self.settings.exitability,
            target_sleeve: assessment.target_sleeve,
            unstaked_buffer: snapshot.unstaked_buffer(),
            turnover_budget,
            as_of: snapshot.as_of,
        }
    }

    /// Weekly plan from an existing assessment of the same snapshot.
    pub fn plan_scheduled(
        &self,
        snapshot: &MarketSnapshot,
        assessment: &PortfolioAssessment,
    ) -> RebalancePlan {
        let input = self.rebalance_input(snapshot, assessment, self.weekly_budget(snapshot));
        let plan = plan_scheduled_rebalance(&input, &self.settings.rebalance);
        tracing::info!(
            wallet = %snapshot.wallet,
            trades = plan.trades.len(),
            urgent = plan.urgent_count(),
            budget = %plan.turnover_budget,
            scale = %plan.scale_factor,
            "Scheduled rebalance planned"
        );
        plan
    }

    pub fn scheduled_trades(&self, snapshot: &MarketSnapshot) -> RebalancePlan {
        let assessment = self.assess(snapshot);
        self.plan_scheduled(snapshot, &assessment)
    }

    /// Event plan from an existing assessment of the same snapshot.
    pub fn plan_events(
        &self,
        snapshot: &MarketSnapshot,
        assessment: &PortfolioAssessment,
        events: &[RebalanceEvent],
    ) -> RebalancePlan {
        let input = self.rebalance_input(snapshot, assessment, self.daily_budget(snapshot));
        let plan = plan_event_rebalance(&input, events, &self.settings.rebalance);
        tracing::info!(
            wallet = %snapshot.wallet,
            events = events.len(),
            trades = plan.trades.len(),
            budget = %plan.turnover_budget,
            "Event rebalance planned"
        );
        plan
    }

    pub fn event_trades(
        &self,
        snapshot: &MarketSnapshot,
        events: &[RebalanceEvent],
    ) -> RebalancePlan {
        let assessment = self.assess(snapshot);
        self.plan_events(snapshot, &assessment, events)
    }

    /// Map breaches and degraded flow regimes of held pools to rebalance events.
    pub fn events_from_violations(&self, assessment: &PortfolioAssessment) -> Vec<RebalanceEvent> {
        let mut events = Vec::new();
        let mut push = |event: RebalanceEvent| {
            if !events.contains(&event) {
                events.push(event);
            }
        };

        let breaches = assessment
            .violations
            .iter()
            .filter(|v| v.severity == ViolationSeverity::Breach);
        for violation in breaches {
            match (violation.category, violation.netuid) {
                (ViolationCategory::PositionConcentration, Some(netuid)) => {
                    push(RebalanceEvent::ConcentrationBreach(netuid))
                }
                (ViolationCategory::Drawdown, _) => push(RebalanceEvent::RiskReduction),
                _ => {}
            }
        }

        for netuid in assessment.exitability.keys() {
            match assessment.flow_regimes.get(netuid) {
                Some(FlowRegime::Dead) => push(RebalanceEvent::Dead(*netuid)),
                Some(FlowRegime::Quarantine) => push(RebalanceEvent::Quarantine(*netuid)),
                _ => {}
            }
        }

        events
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use crate::intelligence::regime::MacroRegime;
    use rust_decimal_macros::dec;
    use uuid::Uuid;

    fn empty_snapshot() -> MarketSnapshot {
        MarketSnapshot {
            wallet: "5Ftreasury".into(),
            pools: Vec::new(),
            positions: Vec::new(),
            slippage: SlippageTable::default(),
            portfolio: None,
            viability_config: ViabilityConfig::default(),
            executed_7d: Decimal::ZERO,
            executed_24h: Decimal::ZERO,
            pending_7d: Decimal::ZERO,
            pending_24h: Decimal::ZERO,
            as_of: Utc::now(),
        }
    }

    fn engine() -> StrategyEngine {
        StrategyEngine::new(StrategySettings::default())
    }

    #[test]
    fn test_empty_snapshot_yields_valid_assessment() {
        let assessment = engine().assess(&empty_snapshot());
        assert_eq!(assessment.nav, Decimal::ZERO);
        assert!(assessment.eligibility.is_empty());
        assert!(assessment.violations.is_empty());
        assert_eq!(assessment.summary, AssessmentSummary::default());
        assert_eq!(assessment.regime.regime, MacroRegime::Neutral);
        assert!(assessment.notes.len() >= 3);

        let plan = engine().scheduled_trades(&empty_snapshot());
        assert!(plan.is_empty());
    }

    #[test]
    fn test_invalid_viability_config_falls_back() {
        let mut snapshot = empty_snapshot();
        snapshot.viability_config.weight_age = dec!(0.9);
        let assessment = engine().assess(&snapshot);
        assert!(assessment.notes.iter().any(|n| n.contains("rejected")));
    }

    #[test]
    fn test_nav_and_drawdown_prefer_snapshot() {
        let mut snapshot = empty_snapshot();
        snapshot.positions = vec![Position {
            netuid: 0,
            value: dec!(900),
            ..Default::default()
        }];
        assert_eq!(snapshot.nav(), dec!(900));

        snapshot.portfolio = Some(PortfolioSnapshot {
            id: Uuid::new_v4(),
            wallet: "5Ftreasury".into(),
            nav: dec!(1_000),
            nav_exit_50: None,
            nav_exit_100: None,
            sleeve_value: Decimal::ZERO,
            root_value: dec!(900),
            unstaked_buffer: dec!(100),
            drawdown_from_peak: dec!(0.08),
            taken_at: Utc::now(),
        });
        assert_eq!(snapshot.nav(), dec!(1_000));
        assert_eq!(snapshot.drawdown(), dec!(0.08));
        assert_eq!(snapshot.unstaked_buffer(), dec!(100));
    }

    #[test]
    fn test_budgets_subtract_executed_volume() {
        let mut snapshot = empty_snapshot();
        snapshot.positions = vec![Position {
            netuid: 0,
            value: dec!(10_000),
            ..Default::default()
        }];
        snapshot.executed_7d = dec!(1_000);
        snapshot.executed_24h = dec!(2_000);
        assert_eq!(engine().weekly_budget(&snapshot), dec!(2_000));
        assert_eq!(engine().daily_budget(&snapshot), Decimal::ZERO);
    }

    #[test]
    fn test_budgets_subtract_pending_volume() {
        let mut snapshot = empty_snapshot();
        snapshot.positions = vec![Position {
            netuid: 0,
            value: dec!(10_000),
            ..Default::default()
        }];
        snapshot.executed_24h = dec!(200);
        snapshot.pending_24h = dec!(500);
        snapshot.pending_7d = dec!(500);
        assert_eq!(engine().daily_budget(&snapshot), dec!(300));
        assert_eq!(engine().weekly_budget(&snapshot), dec!(2_500));

        snapshot.pending_24h = dec!(950);
        assert_eq!(engine().daily_budget(&snapshot), Decimal::ZERO);
    }

    #[test]
    fn test_events_from_breaches_and_regimes() {
        let mut snapshot = empty_snapshot();
        snapshot.pools = vec![
            Pool {
                netuid: 1,
                reserve: dec!(10_000),
                flow_regime: Some("neutral".into()),
                ..Default::default()
            },
            Pool {
                netuid: 2,
                reserve: dec!(10_000),
                flow_regime: Some("quarantine".into()),
                ..Default::default()
            },
        ];
        snapshot.positions = vec![
            Position { netuid: 0, value: dec!(7_000), ..Default::default() },
            Position { netuid: 1, value: dec!(2_000), ..Default::default() },
            Position { netuid: 2, value: dec!(1_000), ..Default::default() },
        ];

        let engine = engine();
        let assessment = engine.assess(&snapshot);
        let events = engine.events_from_violations(&assessment);
        assert!(events.contains(&RebalanceEvent::ConcentrationBreach(1)));
        assert!(events.contains(&RebalanceEvent::Quarantine(2)));
        assert!(!events.contains(&RebalanceEvent::RiskReduction));
    }
}
