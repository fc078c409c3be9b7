pub mod constraint_enforcer;
pub mod position_sizer;
pub mod rebalancer;

pub use constraint_enforcer::{
    alert_cooldown, cleared_alerts, dedupe_against_active, evaluate_constraints, ConstraintInput,
    ConstraintLimits, ConstraintViolation, ViolationCategory, ViolationSeverity,
};
pub use position_sizer::{
    compute_position_limit, exitability_cap, CapKind, PortfolioContext, PositionLimit, SizingConfig,
};
pub use rebalancer::{
    apply_turnover_budget, build_exit_ladder, plan_event_rebalance, plan_scheduled_rebalance,
    PlanKind, PlannedTrade, RebalanceConfig, RebalanceEvent, RebalanceInput, RebalancePlan,
    TriggerReason,
};
