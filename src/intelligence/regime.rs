use std::cmp::Ordering;
use std::fmt;

use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use crate::models::Pool;

// ---------------------------------------------------------------------------
// Per-pool flow regime
// ---------------------------------------------------------------------------

/// Flow regime of a single pool, ordered from healthiest to worst.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FlowRegime {
    RiskOn,
    Neutral,
    RiskOff,
    Quarantine,
    Dead,
}

impl FlowRegime {
    pub fn rank(&self) -> u8 {
        match self {
            FlowRegime::RiskOn => 0,
            FlowRegime::Neutral => 1,
            FlowRegime::RiskOff => 2,
            FlowRegime::Quarantine => 3,
            FlowRegime::Dead => 4,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            FlowRegime::RiskOn => "risk_on",
            FlowRegime::Neutral => "neutral",
            FlowRegime::RiskOff => "risk_off",
            FlowRegime::Quarantine => "quarantine",
            FlowRegime::Dead => "dead",
        }
    }

    pub fn from_str(s: &str) -> Option<Self> {
        match s.trim().to_lowercase().replace('-', "_").as_str() {
            "risk_on" => Some(FlowRegime::RiskOn),
            "neutral" => Some(FlowRegime::Neutral),
            "risk_off" => Some(FlowRegime::RiskOff),
            "quarantine" => Some(FlowRegime::Quarantine),
            "dead" => Some(FlowRegime::Dead),
            _ => None,
        }
    }

    /// Quarantine or dead: the pool is not investable.
    pub fn is_excluded(&self) -> bool {
        *self >= FlowRegime::Quarantine
    }

    pub fn is_risk_off_or_worse(&self) -> bool {
        *self >= FlowRegime::RiskOff
    }

    /// Regime recorded on the pool, or one derived from its flows when the
    /// sync job left it blank.
    pub fn of(pool: &Pool) -> Self {
        pool.flow_regime
            .as_deref()
            .and_then(FlowRegime::from_str)
            .unwrap_or_else(|| classify_flow_regime(pool, &FlowRegimeThresholds::default()))
    }
}

impl PartialOrd for FlowRegime {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for FlowRegime {
    fn cmp(&self, other: &Self) -> Ordering {
        self.rank().cmp(&other.rank())
    }
}

impl fmt::Display for FlowRegime {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Flow-to-reserve ratios that separate the per-pool regimes.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FlowRegimeThresholds {
    pub dead_ratio: Decimal,
    pub quarantine_ratio: Decimal,
    pub risk_off_ratio: Decimal,
    pub risk_on_ratio: Decimal,
}

impl Default for FlowRegimeThresholds {
    fn default() -> Self {
        Self {
            dead_ratio: Decimal::new(-25, 2),
            quarantine_ratio: Decimal::new(-15, 2),
            risk_off_ratio: Decimal::new(-5, 2),
            risk_on_ratio: Decimal::new(5, 2),
        }
    }
}

/// Derive a pool's flow regime from its 1d/7d/14d flows relative to reserve.
///
/// A pool with no reserve left is dead.
pub fn classify_flow_regime(pool: &Pool, thresholds: &FlowRegimeThresholds) -> FlowRegime {
    let (Some(r7), Some(r14)) = (pool.flow_ratio_7d(), pool.flow_ratio_14d()) else {
        return FlowRegime::Dead;
    };

    if r7 <= thresholds.dead_ratio && r14 <= thresholds.dead_ratio {
        return FlowRegime::Dead;
    }
    if r7 <= thresholds.quarantine_ratio {
        return FlowRegime::Quarantine;
    }

    let all_negative = pool.flow_1d < Decimal::ZERO
        && pool.flow_7d < Decimal::ZERO
        && pool.flow_14d < Decimal::ZERO;
    if r7 <= thresholds.risk_off_ratio || all_negative {
        return FlowRegime::RiskOff;
    }

    if r7 >= thresholds.risk_on_ratio && pool.flow_14d > Decimal::ZERO {
        return FlowRegime::RiskOn;
    }

    FlowRegime::Neutral
}

// ---------------------------------------------------------------------------
// Macro regime
// ---------------------------------------------------------------------------

/// Portfolio-wide market regime, ordered by how defensive the response is.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum MacroRegime {
    Bull,
    Accumulation,
    Neutral,
    Distribution,
    Bear,
    Capitulation,
}

impl MacroRegime {
    /// Defensiveness rank: 1 (Bull) .. 6 (Capitulation).
    pub fn rank(&self) -> u8 {
        match self {
            MacroRegime::Bull => 1,
            MacroRegime::Accumulation => 2,
            MacroRegime::Neutral => 3,
            MacroRegime::Distribution => 4,
            MacroRegime::Bear => 5,
            MacroRegime::Capitulation => 6,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            MacroRegime::Bull => "BULL",
            MacroRegime::Accumulation => "ACCUMULATION",
            MacroRegime::Neutral => "NEUTRAL",
            MacroRegime::Distribution => "DISTRIBUTION",
            MacroRegime::Bear => "BEAR",
            MacroRegime::Capitulation => "CAPITULATION",
        }
    }

    pub fn is_more_defensive_than(&self, other: MacroRegime) -> bool {
        self.rank() > other.rank()
    }

    pub fn policy(&self) -> RegimePolicy {
        let (modifier, allow_new_positions, root_bias) = match self {
            MacroRegime::Capitulation => (Decimal::new(25, 2), false, Decimal::new(25, 2)),
            MacroRegime::Bear => (Decimal::new(50, 2), false, Decimal::new(20, 2)),
            MacroRegime::Distribution => (Decimal::new(70, 2), true, Decimal::new(10, 2)),
            MacroRegime::Neutral => (Decimal::new(85, 2), true, Decimal::new(5, 2)),
            MacroRegime::Accumulation => (Decimal::new(95, 2), true, Decimal::ZERO),
            MacroRegime::Bull => (Decimal::ONE, true, Decimal::ZERO),
        };
        RegimePolicy {
            sleeve_modifier: modifier,
            allow_new_positions,
            root_bias,
        }
    }
}

impl PartialOrd for MacroRegime {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for MacroRegime {
    fn cmp(&self, other: &Self) -> Ordering {
        self.rank().cmp(&other.rank())
    }
}

impl fmt::Display for MacroRegime {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RegimeConfidence {
    Low,
    Medium,
    High,
}

/// Sleeve-sizing policy attached to a regime.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RegimePolicy {
    /// Position within the [sleeve_min, sleeve_max] band (0.25 - 1.0).
    pub sleeve_modifier: Decimal,
    pub allow_new_positions: bool,
    /// Fraction of freed capital parked in the root pool instead of redeployed.
    pub root_bias: Decimal,
}

impl RegimePolicy {
    /// Target risk-sleeve allocation in base currency.
    pub fn target_sleeve(&self, nav: Decimal, sleeve_min: Decimal, sleeve_max: Decimal) -> Decimal {
        let fraction = sleeve_min + self.sleeve_modifier * (sleeve_max - sleeve_min);
        nav.max(Decimal::ZERO) * fraction
    }
}

/// Aggregate market signals fed to the classifier.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MacroSignals {
    /// Aggregate 7-day net flow / total reserve.
    pub flow_7d: Decimal,
    /// Aggregate 14-day net flow / total reserve.
    pub flow_14d: Decimal,
    /// Current drawdown from peak (fraction, positive).
    pub drawdown: Decimal,
    /// Fraction of non-root pools in risk-off or worse flow regimes.
    pub risk_off_fraction: Decimal,
}

impl MacroSignals {
    pub fn from_pools(pools: &[Pool], drawdown: Decimal) -> Self {
        let total_reserve: Decimal = pools.iter().map(|p| p.reserve.max(Decimal::ZERO)).sum();
        let (flow_7d, flow_14d) = if total_reserve > Decimal::ZERO {
            (
                pools.iter().map(|p| p.flow_7d).sum::<Decimal>() / total_reserve,
                pools.iter().map(|p| p.flow_14d).sum::<Decimal>() / total_reserve,
            )
        } else {
            (Decimal::ZERO, Decimal::ZERO)
        };

        let subnets: Vec<&Pool> = pools.iter().filter(|p| !p.is_root()).collect();
        let risk_off_fraction = if subnets.is_empty() {
            Decimal::ZERO
        } else {
            let risk_off = subnets
                .iter()
                .filter(|p| FlowRegime::of(p).is_risk_off_or_worse())
                .count();
            Decimal::from(risk_off as i64) / Decimal::from(subnets.len() as i64)
        };

        Self {
            flow_7d,
            flow_14d,
            drawdown: drawdown.abs(),
            risk_off_fraction,
        }
    }
}

/// Reserve-weighted 30-day drawdown across the universe, used when no
/// portfolio snapshot supplies a drawdown-from-peak.
pub fn reserve_weighted_drawdown(pools: &[Pool]) -> Decimal {
    let total: Decimal = pools.iter().map(|p| p.reserve.max(Decimal::ZERO)).sum();
    if total <= Decimal::ZERO {
        return Decimal::ZERO;
    }
    pools
        .iter()
        .map(|p| p.reserve.max(Decimal::ZERO) * p.max_drawdown_30d)
        .sum::<Decimal>()
        / total
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RegimeThresholds {
    pub severe_drawdown: Decimal,
    pub severe_outflow: Decimal,
    pub bull_flow: Decimal,
    pub bear_flow: Decimal,
    pub accumulation_floor: Decimal,
    pub accumulation_ceiling: Decimal,
    pub risk_off_fraction: Decimal,
}

impl Default for RegimeThresholds {
    fn default() -> Self {
        Self {
            severe_drawdown: Decimal::new(25, 2),
            severe_outflow: Decimal::new(-10, 2),
            bull_flow: Decimal::new(5, 2),
            bear_flow: Decimal::new(-5, 2),
            accumulation_floor: Decimal::new(15, 2),
            accumulation_ceiling: Decimal::new(30, 2),
            risk_off_fraction: Decimal::new(40, 2),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RegimeAssessment {
    pub regime: MacroRegime,
    pub confidence: RegimeConfidence,
    pub signals: MacroSignals,
    pub policy: RegimePolicy,
    pub reason: String,
}

/// Classify the macro regime. Fixed priority cascade, first match wins:
///
/// 1. Capitulation: severe drawdown and severe outflow
/// 2. Bull: strong inflow, non-negative 14d flow, shallow drawdown
/// 3. Bear: weak flow or a broad risk-off universe
/// 4. Accumulation: drawdown inside the accumulation zone without bear flow
/// 5. Distribution: shallow drawdown, middling but decelerating flow
/// 6. Neutral
pub fn classify_regime(signals: &MacroSignals, t: &RegimeThresholds) -> RegimeAssessment {
    let s = signals;
    let assess = |regime: MacroRegime, confidence: RegimeConfidence, reason: String| {
        RegimeAssessment {
            regime,
            confidence,
            signals: s.clone(),
            policy: regime.policy(),
            reason,
        }
    };

    if s.drawdown >= t.severe_drawdown && s.flow_7d <= t.severe_outflow {
        return assess(
            MacroRegime::Capitulation,
            RegimeConfidence::High,
            format!(
                "drawdown {:.3} >= {} and 7d flow {:.3} <= {}",
                s.drawdown, t.severe_drawdown, s.flow_7d, t.severe_outflow
            ),
        );
    }

    if s.flow_7d >= t.bull_flow
        && s.flow_14d >= Decimal::ZERO
        && s.drawdown < t.accumulation_floor
    {
        return assess(
            MacroRegime::Bull,
            RegimeConfidence::High,
            format!(
                "7d flow {:.3} >= {}, 14d flow {:.3} >= 0, drawdown {:.3} < {}",
                s.flow_7d, t.bull_flow, s.flow_14d, s.drawdown, t.accumulation_floor
            ),
        );
    }

    let weak_flow = s.flow_7d <= t.bear_flow;
    let broad_risk_off = s.risk_off_fraction >= t.risk_off_fraction;
    if weak_flow || broad_risk_off {
        let confidence = if weak_flow && broad_risk_off {
            RegimeConfidence::High
        } else {
            RegimeConfidence::Medium
        };
        return assess(
            MacroRegime::Bear,
            confidence,
            format!(
                "7d flow {:.3} (bear <= {}), risk-off fraction {:.2} (bear >= {})",
                s.flow_7d, t.bear_flow, s.risk_off_fraction, t.risk_off_fraction
            ),
        );
    }

    if s.drawdown >= t.accumulation_floor
        && s.drawdown <= t.accumulation_ceiling
        && s.flow_7d > t.bear_flow
    {
        return assess(
            MacroRegime::Accumulation,
            RegimeConfidence::High,
            format!(
                "drawdown {:.3} within accumulation zone [{}, {}], 7d flow {:.3} above bear",
                s.drawdown, t.accumulation_floor, t.accumulation_ceiling, s.flow_7d
            ),
        );
    }

    if s.drawdown < t.accumulation_floor
        && s.flow_7d > t.bear_flow
        && s.flow_7d < t.bull_flow
        && s.flow_7d < s.flow_14d
    {
        return assess(
            MacroRegime::Distribution,
            RegimeConfidence::High,
            format!(
                "flow decelerating: 7d {:.3} < 14d {:.3} with shallow drawdown {:.3}",
                s.flow_7d, s.flow_14d, s.drawdown
            ),
        );
    }

    assess(
        MacroRegime::Neutral,
        RegimeConfidence::Low,
        "no regime rule matched".into(),
    )
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
