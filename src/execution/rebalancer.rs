use std::collections::{BTreeMap, HashMap, HashSet};
use std::fmt;

use chrono::{DateTime, Duration, Utc};
use rust_decimal::{Decimal, RoundingStrategy};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::intelligence::eligibility::EligibilityResult;
use crate::intelligence::exitability::{
    check_exitability, min_meaningful_position, ExitabilityConfig,
};
use crate::intelligence::regime::{FlowRegime, MacroRegime, RegimeAssessment};
use crate::intelligence::slippage::SlippageTable;
use crate::intelligence::viability::ViabilityResult;
use crate::models::recommendation::recommendation_status;
use crate::models::{
    Pool, Position, TradeDirection, TradeRecommendation, ROOT_NETUID, UNCATEGORIZED,
};

use super::position_sizer::{compute_position_limit, CapKind, PortfolioContext, SizingConfig};

// ---------------------------------------------------------------------------
// Triggers
// ---------------------------------------------------------------------------

/// Why a trade was recommended. Lower priority number executes first.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TriggerReason {
    DeadExit,
    RiskReduction,
    QuarantineTrim,
    ConcentrationBreach,
    EventDrivenExit,
    RegimeShift,
    ScheduledRebalance,
    OpportunityEntry,
}

impl TriggerReason {
    pub fn priority(&self) -> i32 {
        match self {
            TriggerReason::DeadExit => 1,
            TriggerReason::RiskReduction => 2,
            TriggerReason::QuarantineTrim => 3,
            TriggerReason::ConcentrationBreach => 4,
            TriggerReason::EventDrivenExit => 5,
            TriggerReason::RegimeShift => 6,
            TriggerReason::ScheduledRebalance => 7,
            TriggerReason::OpportunityEntry => 8,
        }
    }

    /// Priorities 1-4 need attention before the next scheduled pass.
    pub fn is_urgent(&self) -> bool {
        self.priority() <= 4
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            TriggerReason::DeadExit => "dead_exit",
            TriggerReason::RiskReduction => "risk_reduction",
            TriggerReason::QuarantineTrim => "quarantine_trim",
            TriggerReason::ConcentrationBreach => "concentration_breach",
            TriggerReason::EventDrivenExit => "event_driven_exit",
            TriggerReason::RegimeShift => "regime_shift",
            TriggerReason::ScheduledRebalance => "scheduled_rebalance",
            TriggerReason::OpportunityEntry => "opportunity_entry",
        }
    }

    pub fn from_str(s: &str) -> Option<Self> {
        match s {
            "dead_exit" => Some(TriggerReason::DeadExit),
            "risk_reduction" => Some(TriggerReason::RiskReduction),
            "quarantine_trim" => Some(TriggerReason::QuarantineTrim),
            "concentration_breach" => Some(TriggerReason::ConcentrationBreach),
            "event_driven_exit" => Some(TriggerReason::EventDrivenExit),
            "regime_shift" => Some(TriggerReason::RegimeShift),
            "scheduled_rebalance" => Some(TriggerReason::ScheduledRebalance),
            "opportunity_entry" => Some(TriggerReason::OpportunityEntry),
            _ => None,
        }
    }
}

impl fmt::Display for TriggerReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Out-of-cycle conditions that warrant an immediate, narrow reaction.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(tag = "kind", content = "netuid", rename_all = "snake_case")]
pub enum RebalanceEvent {
    Quarantine(i32),
    Dead(i32),
    ConcentrationBreach(i32),
    RiskReduction,
}

impl RebalanceEvent {
    /// Processing order: full exits before partial trims, portfolio-wide last.
    fn order(&self) -> u8 {
        match self {
            RebalanceEvent::Dead(_) => 0,
            RebalanceEvent::ConcentrationBreach(_) => 1,
            RebalanceEvent::Quarantine(_) => 2,
            RebalanceEvent::RiskReduction => 3,
        }
    }

    /// Trigger recorded on the trades this event produces.
    pub fn trigger(&self) -> TriggerReason {
        match self {
            RebalanceEvent::Dead(_) => TriggerReason::DeadExit,
            RebalanceEvent::ConcentrationBreach(_) => TriggerReason::ConcentrationBreach,
            RebalanceEvent::Quarantine(_) => TriggerReason::QuarantineTrim,
            RebalanceEvent::RiskReduction => TriggerReason::RiskReduction,
        }
    }

    pub fn netuid(&self) -> Option<i32> {
        match self {
            RebalanceEvent::Dead(n)
            | RebalanceEvent::ConcentrationBreach(n)
            | RebalanceEvent::Quarantine(n) => Some(*n),
            RebalanceEvent::RiskReduction => None,
        }
    }
}

impl fmt::Display for RebalanceEvent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RebalanceEvent::Quarantine(n) => write!(f, "quarantine({n})"),
            RebalanceEvent::Dead(n) => write!(f, "dead({n})"),
            RebalanceEvent::ConcentrationBreach(n) => write!(f, "concentration_breach({n})"),
            RebalanceEvent::RiskReduction => write!(f, "risk_reduction"),
        }
    }
}

// ---------------------------------------------------------------------------
// Config
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RebalanceConfig {
    /// Positions are trimmed only once they exceed their cap by this fraction.
    pub trim_tolerance: Decimal,
    /// The sleeve is cut only once it exceeds target by this fraction.
    pub sleeve_tolerance: Decimal,
    /// Extra haircut applied when scaling trades into the turnover budget.
    pub turnover_safety_margin: Decimal,
    /// Unstaked balance kept aside as a fraction of NAV.
    pub buffer_floor_pct: Decimal,
    pub max_new_entries: usize,
    /// Fraction of a position sold on a quarantine event.
    pub quarantine_trim: Decimal,
    /// Fraction of every position sold on a risk-reduction event.
    pub risk_reduction_trim: Decimal,
    /// Number of tranches large sells are split into (1 disables laddering).
    pub ladder_tranches: u32,
    /// Sells at or above this fraction of NAV are laddered.
    pub ladder_min_size_nav_pct: Decimal,
    pub recommendation_ttl_days: i64,
}

impl Default for RebalanceConfig {
    fn default() -> Self {
        Self {
            trim_tolerance: Decimal::new(5, 2),
            sleeve_tolerance: Decimal::new(5, 2),
            turnover_safety_margin: Decimal::new(5, 2),
            buffer_floor_pct: Decimal::new(2, 2),
            max_new_entries: 5,
            quarantine_trim: Decimal::new(50, 2),
            risk_reduction_trim: Decimal::new(25, 2),
            ladder_tranches: 3,
            ladder_min_size_nav_pct: Decimal::new(2, 2),
            recommendation_ttl_days: 7,
        }
    }
}

// ---------------------------------------------------------------------------
// Plan types
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PlanKind {
    Scheduled,
    EventDriven,
}

impl PlanKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            PlanKind::Scheduled => "scheduled",
            PlanKind::EventDriven => "event_driven",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PlannedTrade {
    pub id: Uuid,
    pub netuid: i32,
    pub direction: TradeDirection,
    pub size: Decimal,
    pub trigger: TriggerReason,
    pub reason: String,
    pub parent_id: Option<Uuid>,
    pub tranche_index: Option<u32>,
    pub tranche_count: Option<u32>,
    pub expires_at: DateTime<Utc>,
}

impl PlannedTrade {
    pub fn new(
        netuid: i32,
        direction: TradeDirection,
        size: Decimal,
        trigger: TriggerReason,
        reason: impl Into<String>,
        expires_at: DateTime<Utc>,
    ) -> Self {
        Self {
            id: Uuid::new_v4(),
            netuid,
            direction,
            size,
            trigger,
            reason: reason.into(),
            parent_id: None,
            tranche_index: None,
            tranche_count: None,
            expires_at,
        }
    }

    pub fn priority(&self) -> i32 {
        self.trigger.priority()
    }

    pub fn is_urgent(&self) -> bool {
        self.trigger.is_urgent()
    }

    /// Parent rows summarise a ladder; their tranches carry the volume.
    pub fn is_ladder_parent(&self) -> bool {
        self.tranche_count.is_some() && self.tranche_index.is_none()
    }

    pub fn to_recommendation(
        &self,
        wallet: &str,
        created_at: DateTime<Utc>,
    ) -> TradeRecommendation {
        TradeRecommendation {
            id: self.id,
            wallet: wallet.to_string(),
            netuid: self.netuid,
            direction: self.direction.as_str().to_string(),
            size: self.size,
            trigger: self.trigger.as_str().to_string(),
            reason: self.reason.clone(),
            priority: self.priority(),
            urgent: self.is_urgent(),
            status: recommendation_status::PENDING.to_string(),
            parent_id: self.parent_id,
            tranche_index: self.tranche_index.map(|i| i as i32),
            tranche_count: self.tranche_count.map(|c| c as i32),
            created_at,
            expires_at: self.expires_at,
            executed_at: None,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RebalancePlan {
    pub kind: PlanKind,
    /// Ordered by priority, then size descending.
    pub trades: Vec<PlannedTrade>,
    pub regime: MacroRegime,
    pub turnover_budget: Decimal,
    pub total_before_scaling: Decimal,
    pub scale_factor: Decimal,
    pub notes: Vec<String>,
}

impl RebalancePlan {
    /// Volume the plan would trade; ladder parents are not counted.
    pub fn total_size(&self) -> Decimal {
        self.trades
            .iter()
            .filter(|t| !t.is_ladder_parent())
            .map(|t| t.size)
            .sum()
    }

    pub fn is_empty(&self) -> bool {
        self.trades.is_empty()
    }

    pub fn urgent_count(&self) -> usize {
        self.trades
            .iter()
            .filter(|t| t.is_urgent() && !t.is_ladder_parent())
            .count()
    }
}

/// Assessed state of one wallet, borrowed from the engine for a single plan.
#[derive(Debug, Clone)]
pub struct RebalanceInput<'a> {
    pub nav: Decimal,
    pub positions: &'a [Position],
    pub pools: &'a [Pool],
    pub eligibility: &'a BTreeMap<i32, EligibilityResult>,
    pub viability: &'a BTreeMap<i32, ViabilityResult>,
    pub regime: &'a RegimeAssessment,
    pub slippage: &'a SlippageTable,
    pub sizing: &'a SizingConfig,
    pub exitability: &'a ExitabilityConfig,
    /// Risk-sleeve size the regime calls for.
    pub target_sleeve: Decimal,
    pub unstaked_buffer: Decimal,
    /// Remaining turnover allowance (cap × NAV minus executed volume).
    pub turnover_budget: Decimal,
    pub as_of: DateTime<Utc>,
}

impl<'a> RebalanceInput<'a> {
    fn pool_index(&self) -> HashMap<i32, &'a Pool> {
        self.pools.iter().map(|p| (p.netuid, p)).collect()
    }

    fn expires_at(&self, config: &RebalanceConfig) -> DateTime<Utc> {
        self.as_of + Duration::days(config.recommendation_ttl_days)
    }
}

fn category_of(pools: &HashMap<i32, &Pool>, netuid: i32) -> String {
    pools
        .get(&netuid)
        .map(|p| p.category_name().to_string())
        .unwrap_or_else(|| UNCATEGORIZED.to_string())
}

/// Holdings with a positive value, in netuid order.
fn open_holdings(ctx: &PortfolioContext) -> Vec<(i32, Decimal)> {
    let mut held: Vec<(i32, Decimal)> = ctx
        .holdings
        .iter()
        .filter(|(_, v)| **v > Decimal::ZERO)
        .map(|(n, v)| (*n, *v))
        .collect();
    held.sort_by_key(|(n, _)| *n);
    held
}

fn round_down(value: Decimal) -> Decimal {
    value.round_dp_with_strategy(8, RoundingStrategy::ToZero)
}

// ---------------------------------------------------------------------------
// Scheduled rebalance
// ---------------------------------------------------------------------------

/// Weekly rebalance: exits, cap trims, regime sleeve cut, then redeployment
/// of freed capital, all scaled into the remaining weekly turnover budget.
pub fn plan_scheduled_rebalance(
    input: &RebalanceInput<'_>,
    config: &RebalanceConfig,
) -> RebalancePlan {
    let pools = input.pool_index();
    let expires_at = input.expires_at(config);
    let mut notes = Vec::new();
    let mut trades = Vec::new();

    let current =
        PortfolioContext::from_positions(input.positions, input.pools, input.nav, Decimal::ZERO);
    let sleeve_base = current.sleeve_holdings().max(input.target_sleeve);
    let mut ctx = PortfolioContext {
        sleeve_nav: sleeve_base,
        ..current
    };
    let initially_held: HashSet<i32> = ctx.holdings.keys().copied().collect();

    // 1-2. Full exits: dead and quarantined pools first, then ineligible ones.
    let mut exited = HashSet::new();
    for (netuid, value) in open_holdings(&ctx) {
        let Some(pool) = pools.get(&netuid) else {
            notes.push(format!("pool {netuid} missing from snapshot; position left untouched"));
            continue;
        };

        let exit = match FlowRegime::of(pool) {
            FlowRegime::Dead => Some((TriggerReason::DeadExit, "flow regime dead".to_string())),
            FlowRegime::Quarantine => Some((
                TriggerReason::EventDrivenExit,
                "flow regime quarantine".to_string(),
            )),
            _ => match input.eligibility.get(&netuid) {
                Some(e) if !e.eligible => Some((
                    TriggerReason::ScheduledRebalance,
                    format!("no longer eligible: {}", e.reasons.join("; ")),
                )),
                _ => None,
            },
        };

        if let Some((trigger, reason)) = exit {
            trades.push(PlannedTrade::new(
                netuid,
                TradeDirection::Sell,
                value,
                trigger,
                reason,
                expires_at,
            ));
            ctx.add(netuid, pool.category_name(), -value);
            exited.insert(netuid);
        }
    }

    // 3. Trim positions above their binding cap.
    for (netuid, value) in open_holdings(&ctx) {
        let Some(pool) = pools.get(&netuid) else { continue };
        let curve = input.slippage.exit_curve(netuid);
        let limit = compute_position_limit(pool, curve, &ctx, input.sizing);
        if value <= limit.binding_cap * (Decimal::ONE + config.trim_tolerance) {
            continue;
        }

        let trim = value - limit.binding_cap;
        let trigger = match limit.binding_constraint {
            CapKind::Exitability => TriggerReason::ScheduledRebalance,
            CapKind::Concentration | CapKind::Category => TriggerReason::ConcentrationBreach,
        };
        trades.push(PlannedTrade::new(
            netuid,
            TradeDirection::Sell,
            trim,
            trigger,
            format!(
                "value {:.2} above {} cap {:.2}",
                value, limit.binding_constraint, limit.binding_cap
            ),
            expires_at,
        ));
        ctx.add(netuid, &limit.category, -trim);
    }

    // 4. Bring the sleeve down to the regime target.
    let sleeve = ctx.sleeve_holdings();
    let sleeve_limit = input.target_sleeve * (Decimal::ONE + config.sleeve_tolerance);
    if sleeve > sleeve_limit && sleeve > Decimal::ZERO {
        let excess = sleeve - input.target_sleeve;
        for (netuid, value) in open_holdings(&ctx) {
            let trim = round_down(value * excess / sleeve);
            if trim <= Decimal::ZERO {
                continue;
            }
            trades.push(PlannedTrade::new(
                netuid,
                TradeDirection::Sell,
                trim,
                TriggerReason::RegimeShift,
                format!(
                    "{} regime: sleeve {:.2} above target {:.2}",
                    input.regime.regime, sleeve, input.target_sleeve
                ),
                expires_at,
            ));
            ctx.add(netuid, &category_of(&pools, netuid), -trim);
        }
    }

    // 5. Redeploy freed capital.
    let sells: Decimal = trades.iter().map(|t| t.size).sum();
    let buffer_excess =
        (input.unstaked_buffer - config.buffer_floor_pct * input.nav).max(Decimal::ZERO);
    let freed = sells + buffer_excess;
    let policy = &input.regime.policy;

    if !policy.allow_new_positions {
        notes.push(format!(
            "{} regime forbids new positions; {:.2} freed capital held",
            input.regime.regime, freed
        ));
    } else if freed > Decimal::ZERO {
        let root_alloc = round_down(freed * policy.root_bias);
        if root_alloc > Decimal::ZERO {
            trades.push(PlannedTrade::new(
                ROOT_NETUID,
                TradeDirection::Buy,
                root_alloc,
                TriggerReason::ScheduledRebalance,
                format!("{} regime root bias {}", input.regime.regime, policy.root_bias),
                expires_at,
            ));
        }

        let mut remaining = freed - root_alloc;
        let mut headroom = (input.target_sleeve - ctx.sleeve_holdings()).max(Decimal::ZERO);
        let floor = min_meaningful_position(input.nav, input.exitability);

        let mut candidates: Vec<&EligibilityResult> = input
            .eligibility
            .values()
            .filter(|e| e.eligible && e.netuid != ROOT_NETUID)
            .filter(|e| !initially_held.contains(&e.netuid))
            .filter(|e| input.viability.get(&e.netuid).map(|v| v.is_viable()).unwrap_or(false))
            .filter(|e| pools.contains_key(&e.netuid))
            .collect();
        candidates.sort_by(|a, b| {
            b.attractiveness_score
                .cmp(&a.attractiveness_score)
                .then(a.netuid.cmp(&b.netuid))
        });

        let mut entries = 0;
        for candidate in candidates {
            if entries >= config.max_new_entries || remaining < floor || headroom < floor {
                break;
            }
            let Some(pool) = pools.get(&candidate.netuid) else { continue };
            let curve = input.slippage.exit_curve(candidate.netuid);

            let limit = compute_position_limit(pool, curve, &ctx, input.sizing);
            let size = round_down(limit.target_entry_size.min(remaining).min(headroom));
            if size < floor {
                notes.push(format!(
                    "pool {}: entry size {:.2} below minimum {:.2} ({} cap)",
                    candidate.netuid, size, floor, limit.binding_constraint
                ));
                continue;
            }

            let exit = check_exitability(size, curve, input.nav, input.exitability);
            if exit.severity.blocks_entry() {
                notes.push(format!("pool {}: entry blocked, {}", candidate.netuid, exit.reason));
                continue;
            }

            let tier = input
                .viability
                .get(&candidate.netuid)
                .map(|v| v.tier.as_str())
                .unwrap_or("unscored");
            trades.push(PlannedTrade::new(
                candidate.netuid,
                TradeDirection::Buy,
                size,
                TriggerReason::OpportunityEntry,
                format!(
                    "attractiveness {} ({}), {} cap {:.2}",
                    candidate.attractiveness_score,
                    tier,
                    limit.binding_constraint,
                    limit.binding_cap
                ),
                expires_at,
            ));
            ctx.add(candidate.netuid, &limit.category, size);
            remaining -= size;
            headroom -= size;
            entries += 1;
        }
    }

    tracing::debug!(
        exits = exited.len(),
        trades = trades.len(),
        freed = %freed,
        regime = %input.regime.regime,
        "Scheduled rebalance drafted"
    );

    finalize(PlanKind::Scheduled, trades, input, config, notes)
}

// ---------------------------------------------------------------------------
// Event-driven rebalance
// ---------------------------------------------------------------------------

/// Immediate reaction to monitor events, scaled into the daily budget.
///
/// Quarantine trims half the position; dead pools and concentration
/// breaches exit in full; risk reduction trims every holding uniformly.
pub fn plan_event_rebalance(
    input: &RebalanceInput<'_>,
    events: &[RebalanceEvent],
    config: &RebalanceConfig,
) -> RebalancePlan {
    let pools = input.pool_index();
    let expires_at = input.expires_at(config);
    let mut ctx =
        PortfolioContext::from_positions(input.positions, input.pools, input.nav, Decimal::ZERO);
    let mut trades = Vec::new();
    let mut notes = Vec::new();

    let mut ordered: Vec<RebalanceEvent> = events.to_vec();
    ordered.sort_by_key(|e| e.order());
    ordered.dedup();

    let mut handled: HashSet<i32> = HashSet::new();
    for event in ordered {
        match event {
            RebalanceEvent::Dead(netuid) | RebalanceEvent::ConcentrationBreach(netuid) => {
                let value = ctx.holding(netuid);
                if value <= Decimal::ZERO || !handled.insert(netuid) {
                    notes.push(format!("{event}: nothing to exit"));
                    continue;
                }
                trades.push(PlannedTrade::new(
                    netuid,
                    TradeDirection::Sell,
                    value,
                    event.trigger(),
                    format!("{event}: full exit"),
                    expires_at,
                ));
                ctx.add(netuid, &category_of(&pools, netuid), -value);
            }
            RebalanceEvent::Quarantine(netuid) => {
                let value = ctx.holding(netuid);
                if value <= Decimal::ZERO || !handled.insert(netuid) {
                    notes.push(format!("{event}: nothing to trim"));
                    continue;
                }
                let trim = round_down(value * config.quarantine_trim);
                trades.push(PlannedTrade::new(
                    netuid,
                    TradeDirection::Sell,
                    trim,
                    event.trigger(),
                    format!("{event}: trim {}%", config.quarantine_trim * Decimal::ONE_HUNDRED),
                    expires_at,
                ));
                ctx.add(netuid, &category_of(&pools, netuid), -trim);
            }
            RebalanceEvent::RiskReduction => {
                for (netuid, value) in open_holdings(&ctx) {
                    let trim = round_down(value * config.risk_reduction_trim);
                    if trim <= Decimal::ZERO {
                        continue;
                    }
                    trades.push(PlannedTrade::new(
                        netuid,
                        TradeDirection::Sell,
                        trim,
                        event.trigger(),
                        format!(
                            "{event}: trim {}%",
                            config.risk_reduction_trim * Decimal::ONE_HUNDRED
                        ),
                        expires_at,
                    ));
                    ctx.add(netuid, &category_of(&pools, netuid), -trim);
                }
            }
        }
    }

    finalize(PlanKind::EventDriven, trades, input, config, notes)
}

// ---------------------------------------------------------------------------
// Turnover, ladders, ordering
// ---------------------------------------------------------------------------

/// Scale every trade so the total fits the budget with a safety margin.
/// Returns the factor applied (1 when nothing was scaled).
pub fn apply_turnover_budget(
    trades: &mut [PlannedTrade],
    budget: Decimal,
    safety_margin: Decimal,
) -> Decimal {
    let total: Decimal = trades.iter().map(|t| t.size).sum();
    let budget = budget.max(Decimal::ZERO);
    if total <= budget {
        return Decimal::ONE;
    }

    let scale = budget / total * (Decimal::ONE - safety_margin);
    for trade in trades.iter_mut() {
        trade.size = round_down(trade.size * scale);
    }
    scale
}

/// Split a sell into `tranches` equal pieces linked to the parent.
///
/// Returns the parent followed by its tranches. Tranche `i` expires
/// `i - 1` days after the parent's original expiry; the parent expires with
/// its last tranche.
pub fn build_exit_ladder(mut parent: PlannedTrade, tranches: u32) -> Vec<PlannedTrade> {
    if tranches <= 1 || parent.size <= Decimal::ZERO {
        return vec![parent];
    }

    let base_expiry = parent.expires_at;
    let slice = round_down(parent.size / Decimal::from(tranches));
    let mut allocated = Decimal::ZERO;

    let mut children = Vec::with_capacity(tranches as usize);
    for index in 1..=tranches {
        let size = if index == tranches {
            parent.size - allocated
        } else {
            slice
        };
        allocated += size;
        children.push(PlannedTrade {
            id: Uuid::new_v4(),
            netuid: parent.netuid,
            direction: parent.direction,
            size,
            trigger: parent.trigger,
            reason: format!("{} (tranche {}/{})", parent.reason, index, tranches),
            parent_id: Some(parent.id),
            tranche_index: Some(index),
            tranche_count: Some(tranches),
            expires_at: base_expiry + Duration::days(i64::from(index - 1)),
        });
    }

    parent.tranche_count = Some(tranches);
    parent.expires_at = base_expiry + Duration::days(i64::from(tranches - 1));

    let mut out = Vec::with_capacity(children.len() + 1);
    out.push(parent);
    out.extend(children);
    out
}

/// Priority ascending, then size descending. A ladder parent always sorts
/// ahead of its own tranches.
pub fn sort_trades(trades: &mut [PlannedTrade]) {
    trades.sort_by(|a, b| {
        a.priority()
            .cmp(&b.priority())
            .then(b.size.cmp(&a.size))
            .then(a.netuid.cmp(&b.netuid))
    });
}

fn finalize(
    kind: PlanKind,
    mut trades: Vec<PlannedTrade>,
    input: &RebalanceInput<'_>,
    config: &RebalanceConfig,
    mut notes: Vec<String>,
) -> RebalancePlan {
    let total_before_scaling: Decimal = trades.iter().map(|t| t.size).sum();
    let scale_factor =
        apply_turnover_budget(&mut trades, input.turnover_budget, config.turnover_safety_margin);
    if scale_factor < Decimal::ONE {
        notes.push(format!(
            "{:.2} of trades exceeds turnover budget {:.2}; scaled by {:.4}",
            total_before_scaling, input.turnover_budget, scale_factor
        ));
    }

    let before = trades.len();
    trades.retain(|t| t.size > Decimal::ZERO);
    if trades.len() < before {
        notes.push(format!("{} trades dropped at zero size", before - trades.len()));
    }

    let ladder_floor = config.ladder_min_size_nav_pct * input.nav;
    let mut laddered = Vec::with_capacity(trades.len());
    for trade in trades {
        if trade.direction == TradeDirection::Sell
            && input.nav > Decimal::ZERO
            && trade.size >= ladder_floor
        {
            laddered.extend(build_exit_ladder(trade, config.ladder_tranches));
        } else {
            laddered.push(trade);
        }
    }
    sort_trades(&mut laddered);

    RebalancePlan {
        kind,
        trades: laddered,
        regime: input.regime.regime,
        turnover_budget: input.turnover_budget,
        total_before_scaling,
        scale_factor,
        notes,
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use crate::intelligence::regime::{classify_regime, MacroSignals, RegimeThresholds};
    use crate::intelligence::slippage::SlippageCurve;
    use crate::intelligence::viability::ViabilityTier;
    use crate::models::SlippageDirection;
    use rust_decimal_macros::dec;

    fn deep_curve() -> SlippageCurve {
        SlippageCurve::new(vec![
            (dec!(1_000), dec!(0.5)),
            (dec!(10_000), dec!(2)),
            (dec!(100_000), dec!(5)),
        ])
    }

    fn pool(netuid: i32, category: Option<&str>) -> Pool {
        Pool {
            netuid,
            reserve: dec!(50_000),
            category: category.map(str::to_string),
            flow_regime: Some("neutral".into()),
            ..Default::default()
        }
    }

    fn held(netuid: i32, value: Decimal) -> Position {
        Position {
            wallet: "5Ftreasury".into(),
            netuid,
            value,
            ..Default::default()
        }
    }

    fn eligible(netuid: i32, score: Decimal) -> EligibilityResult {
        EligibilityResult {
            netuid,
            eligible: true,
            reasons: Vec::new(),
            attractiveness_score: score,
        }
    }

    fn viable(netuid: i32) -> ViabilityResult {
        ViabilityResult {
            netuid,
            score: Some(dec!(60)),
            tier: ViabilityTier::Tier2,
            failures: Vec::new(),
            reasons: Vec::new(),
            factor_percentiles: BTreeMap::new(),
        }
    }

    fn regime(flow_7d: Decimal) -> RegimeAssessment {
        let signals = MacroSignals {
            flow_7d,
            flow_14d: Decimal::ZERO,
            drawdown: Decimal::ZERO,
            risk_off_fraction: Decimal::ZERO,
        };
        classify_regime(&signals, &RegimeThresholds::default())
    }

    struct Fixture {
        pools: Vec<Pool>,
        positions: Vec<Position>,
        slippage: SlippageTable,
        eligibility: BTreeMap<i32, EligibilityResult>,
        viability: BTreeMap<i32, ViabilityResult>,
        regime: RegimeAssessment,
        sizing: SizingConfig,
        exitability: ExitabilityConfig,
        nav: Decimal,
        budget: Decimal,
        as_of: DateTime<Utc>,
    }

    impl Fixture {
        /// NAV 10,000: 6,000 in root, 1,000 each in pools 1 and 2, pools 3
        /// and 4 eligible but not held. Neutral regime.
        fn new() -> Self {
            let pools = vec![
                pool(1, Some("a")),
                pool(2, Some("b")),
                pool(3, Some("c")),
                pool(4, Some("d")),
            ];
            let mut slippage = SlippageTable::default();
            for p in &pools {
                slippage.insert(p.netuid, SlippageDirection::Unstake, deep_curve());
            }
            let eligibility = [(1, dec!(50)), (2, dec!(50)), (3, dec!(70)), (4, dec!(60))]
                .into_iter()
                .map(|(n, s)| (n, eligible(n, s)))
                .collect();
            let viability = (1..=4).map(|n| (n, viable(n))).collect();

            Self {
                pools,
                positions: vec![held(0, dec!(6_000)), held(1, dec!(1_000)), held(2, dec!(1_000))],
                slippage,
                eligibility,
                viability,
                regime: regime(Decimal::ZERO),
                sizing: SizingConfig::default(),
                exitability: ExitabilityConfig::default(),
                nav: dec!(10_000),
                budget: dec!(3_000),
                as_of: Utc::now(),
            }
        }

        fn input(&self) -> RebalanceInput<'_> {
            RebalanceInput {
                nav: self.nav,
                positions: &self.positions,
                pools: &self.pools,
                eligibility: &self.eligibility,
                viability: &self.viability,
                regime: &self.regime,
                slippage: &self.slippage,
                sizing: &self.sizing,
                exitability: &self.exitability,
                target_sleeve: self.regime.policy.target_sleeve(self.nav, dec!(0.20), dec!(0.60)),
                unstaked_buffer: Decimal::ZERO,
                turnover_budget: self.budget,
                as_of: self.as_of,
            }
        }
    }

    fn no_ladder() -> RebalanceConfig {
        RebalanceConfig {
            ladder_tranches: 1,
            ..Default::default()
        }
    }

    fn find(plan: &RebalancePlan, netuid: i32, trigger: TriggerReason) -> Option<&PlannedTrade> {
        plan.trades.iter().find(|t| t.netuid == netuid && t.trigger == trigger)
    }

    #[test]
    fn test_trigger_priorities() {
        assert_eq!(TriggerReason::DeadExit.priority(), 1);
        assert_eq!(TriggerReason::OpportunityEntry.priority(), 8);
        assert!(TriggerReason::ConcentrationBreach.is_urgent());
        assert!(!TriggerReason::EventDrivenExit.is_urgent());
    }

    #[test]
    fn test_dead_pool_exits_and_capital_is_redeployed() {
        let mut fx = Fixture::new();
        fx.pools[1].flow_regime = Some("dead".into());
        let plan = plan_scheduled_rebalance(&fx.input(), &no_ladder());

        let exit = find(&plan, 2, TriggerReason::DeadExit).unwrap();
        assert_eq!(exit.direction, TradeDirection::Sell);
        assert_eq!(exit.size, dec!(1_000));
        assert!(exit.is_urgent());
        assert_eq!(plan.trades[0].trigger, TriggerReason::DeadExit);

        // Neutral regime parks 5% of freed capital in root.
        let root = find(&plan, ROOT_NETUID, TriggerReason::ScheduledRebalance).unwrap();
        assert_eq!(root.direction, TradeDirection::Buy);
        assert_eq!(root.size, dec!(50));

        // Best-ranked candidate first at the default 5% entry size.
        assert_eq!(find(&plan, 3, TriggerReason::OpportunityEntry).unwrap().size, dec!(500));
        assert_eq!(find(&plan, 4, TriggerReason::OpportunityEntry).unwrap().size, dec!(450));
        assert_eq!(plan.scale_factor, Decimal::ONE);
    }

    #[test]
    fn test_quarantine_and_ineligible_exits() {
        let mut fx = Fixture::new();
        fx.pools[0].flow_regime = Some("quarantine".into());
        fx.eligibility.insert(
            2,
            EligibilityResult {
                netuid: 2,
                eligible: false,
                reasons: vec!["holders 10 below 50".into()],
                attractiveness_score: Decimal::ZERO,
            },
        );
        let plan = plan_scheduled_rebalance(&fx.input(), &no_ladder());

        assert_eq!(find(&plan, 1, TriggerReason::EventDrivenExit).unwrap().size, dec!(1_000));
        let ineligible = find(&plan, 2, TriggerReason::ScheduledRebalance).unwrap();
        assert_eq!(ineligible.size, dec!(1_000));
        assert!(ineligible.reason.contains("holders"));
    }

    #[test]
    fn test_trims_position_above_concentration_cap() {
        let mut fx = Fixture::new();
        fx.positions[1].value = dec!(2_000);
        let plan = plan_scheduled_rebalance(&fx.input(), &no_ladder());

        let trim = find(&plan, 1, TriggerReason::ConcentrationBreach).unwrap();
        assert_eq!(trim.direction, TradeDirection::Sell);
        assert_eq!(trim.size, dec!(500));
    }

    #[test]
    fn test_within_tolerance_is_not_trimmed() {
        let mut fx = Fixture::new();
        // 1,550 is above the 1,500 cap but inside the 5% tolerance
        fx.positions[1].value = dec!(1_550);
        let plan = plan_scheduled_rebalance(&fx.input(), &no_ladder());
        assert!(plan.trades.iter().all(|t| t.direction == TradeDirection::Buy || t.netuid != 1));
    }

    #[test]
    fn test_bear_regime_cuts_sleeve_and_blocks_entries() {
        let mut fx = Fixture::new();
        fx.regime = regime(dec!(-0.10));
        assert_eq!(fx.regime.regime, MacroRegime::Bear);
        fx.pools = (1..=4).map(|n| pool(n, None)).collect();
        fx.positions = vec![
            held(0, dec!(4_400)),
            held(1, dec!(1_400)),
            held(2, dec!(1_400)),
            held(3, dec!(1_400)),
            held(4, dec!(1_400)),
        ];

        // target = 10,000 × (0.20 + 0.50 × 0.40) = 4,000; sleeve 5,600
        let plan = plan_scheduled_rebalance(&fx.input(), &no_ladder());
        let cuts: Vec<&PlannedTrade> = plan
            .trades
            .iter()
            .filter(|t| t.trigger == TriggerReason::RegimeShift)
            .collect();
        assert_eq!(cuts.len(), 4);
        assert!(cuts.iter().all(|t| t.size == dec!(400)));
        assert!(plan.trades.iter().all(|t| t.direction == TradeDirection::Sell));
        assert!(plan.notes.iter().any(|n| n.contains("forbids new positions")));
    }

    #[test]
    fn test_turnover_scaling_respects_budget() {
        let mut fx = Fixture::new();
        fx.pools[1].flow_regime = Some("dead".into());
        fx.budget = dec!(500);
        let plan = plan_scheduled_rebalance(&fx.input(), &no_ladder());

        assert_eq!(plan.total_before_scaling, dec!(2_000));
        assert_eq!(plan.scale_factor, dec!(0.2375));
        assert!(plan.total_size() <= dec!(500));
        assert_eq!(find(&plan, 2, TriggerReason::DeadExit).unwrap().size, dec!(237.5));
    }

    #[test]
    fn test_exhausted_budget_drops_all_trades() {
        let mut fx = Fixture::new();
        fx.pools[1].flow_regime = Some("dead".into());
        fx.budget = dec!(-50);
        let plan = plan_scheduled_rebalance(&fx.input(), &no_ladder());

        assert!(plan.is_empty());
        assert_eq!(plan.scale_factor, Decimal::ZERO);
        assert!(!plan.notes.is_empty());
    }

    #[test]
    fn test_large_sells_are_laddered() {
        let mut fx = Fixture::new();
        fx.pools[1].flow_regime = Some("dead".into());
        let plan = plan_scheduled_rebalance(&fx.input(), &RebalanceConfig::default());

        let legs: Vec<&PlannedTrade> = plan.trades.iter().filter(|t| t.netuid == 2).collect();
        assert_eq!(legs.len(), 4);
        assert!(legs[0].is_ladder_parent());
        assert!(legs[1..].iter().all(|t| t.parent_id == Some(legs[0].id)));
        // ladder parents are not double counted
        assert_eq!(plan.total_size(), dec!(2_000));
    }

    #[test]
    fn test_build_exit_ladder() {
        let expires = Utc::now() + Duration::days(7);
        let parent = PlannedTrade::new(
            5,
            TradeDirection::Sell,
            dec!(1_000),
            TriggerReason::DeadExit,
            "dead",
            expires,
        );
        let ladder = build_exit_ladder(parent, 3);

        assert_eq!(ladder.len(), 4);
        let parent = &ladder[0];
        assert!(parent.is_ladder_parent());
        assert_eq!(parent.expires_at, expires + Duration::days(2));

        let tranches = &ladder[1..];
        let total: Decimal = tranches.iter().map(|t| t.size).sum();
        assert_eq!(total, dec!(1_000));
        for (i, tranche) in tranches.iter().enumerate() {
            assert_eq!(tranche.parent_id, Some(parent.id));
            assert_eq!(tranche.tranche_index, Some(i as u32 + 1));
            assert_eq!(tranche.expires_at, expires + Duration::days(i as i64));
        }
    }

    #[test]
    fn test_event_quarantine_and_risk_reduction() {
        let fx = Fixture::new();
        let mut input = fx.input();
        input.turnover_budget = dec!(1_000);
        let plan = plan_event_rebalance(
            &input,
            &[RebalanceEvent::RiskReduction, RebalanceEvent::Quarantine(1)],
            &no_ladder(),
        );

        assert_eq!(plan.kind, PlanKind::EventDriven);
        assert_eq!(find(&plan, 1, TriggerReason::QuarantineTrim).unwrap().size, dec!(500));
        // risk reduction applies to what is left after the quarantine trim
        assert_eq!(find(&plan, 1, TriggerReason::RiskReduction).unwrap().size, dec!(125));
        assert_eq!(find(&plan, 2, TriggerReason::RiskReduction).unwrap().size, dec!(250));
        assert!(plan.trades.iter().all(|t| t.direction == TradeDirection::Sell));
    }

    #[test]
    fn test_event_full_exits() {
        let fx = Fixture::new();
        let plan = plan_event_rebalance(
            &fx.input(),
            &[
                RebalanceEvent::ConcentrationBreach(1),
                RebalanceEvent::Dead(2),
                RebalanceEvent::Dead(9),
            ],
            &no_ladder(),
        );

        assert_eq!(find(&plan, 1, TriggerReason::ConcentrationBreach).unwrap().size, dec!(1_000));
        assert_eq!(find(&plan, 2, TriggerReason::DeadExit).unwrap().size, dec!(1_000));
        assert_eq!(plan.trades[0].trigger, TriggerReason::DeadExit);
        assert!(plan.notes.iter().any(|n| n.contains("dead(9)")));
    }

    #[test]
    fn test_trades_sorted_by_priority_then_size() {
        let mut fx = Fixture::new();
        fx.pools[1].flow_regime = Some("dead".into());
        let plan = plan_scheduled_rebalance(&fx.input(), &no_ladder());
        for pair in plan.trades.windows(2) {
            let (a, b) = (&pair[0], &pair[1]);
            assert!(
                a.priority() < b.priority() || (a.priority() == b.priority() && a.size >= b.size)
            );
        }
    }

    #[test]
    fn test_to_recommendation() {
        let now = Utc::now();
        let trade = PlannedTrade::new(
            3,
            TradeDirection::Buy,
            dec!(10),
            TriggerReason::OpportunityEntry,
            "entry",
            now,
        );
        let rec = trade.to_recommendation("5Ftreasury", now);
        assert_eq!(rec.direction, "buy");
        assert_eq!(rec.trigger, "opportunity_entry");
        assert_eq!(rec.priority, 8);
        assert!(!rec.urgent);
        assert_eq!(rec.status, recommendation_status::PENDING);
    }
}
