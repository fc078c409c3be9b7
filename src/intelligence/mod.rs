pub mod eligibility;
pub mod exitability;
pub mod regime;
pub mod slippage;
pub mod viability;

pub use eligibility::{check_eligibility, screen_universe, EligibilityConfig, EligibilityResult};
pub use exitability::{
    check_exitability, classify_positions, min_meaningful_position, ExitSeverity, ExitabilityConfig,
    ExitabilityResult,
};
pub use regime::{
    classify_flow_regime, classify_regime, reserve_weighted_drawdown, FlowRegime,
    FlowRegimeThresholds, MacroRegime, MacroSignals, RegimeAssessment, RegimeConfidence,
    RegimePolicy, RegimeThresholds,
};
pub use slippage::{largest_size_within, SlippageCurve, SlippageTable, UNKNOWN_IMPACT_PCT};
pub use viability::{
    hard_failures, max_drawdown, percentile_ranks, price_trend_7d, score_universe, tier_for_score,
    HardFailure, ViabilityFactor, ViabilityResult, ViabilityTier,
};
