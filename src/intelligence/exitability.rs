use std::cmp::Ordering;
use std::collections::BTreeMap;
use std::fmt;

use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use crate::models::{Position, ROOT_NETUID};

use super::slippage::{largest_size_within, SlippageCurve, SlippageTable};

// ---------------------------------------------------------------------------
// Severity
// ---------------------------------------------------------------------------

/// Exit-risk severity, ordered from least to most restrictive.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ExitSeverity {
    /// Both exit impacts within limits.
    Pass,
    /// Full exit impact above the monitor threshold but under the hard ceiling.
    Warning,
    /// Half-size exit impact too high to enter at this size.
    BlockBuy,
    /// Full exit impact above the hard ceiling; the position must shrink.
    ForceTrim,
}

impl ExitSeverity {
    pub fn rank(&self) -> u8 {
        match self {
            ExitSeverity::Pass => 0,
            ExitSeverity::Warning => 1,
            ExitSeverity::BlockBuy => 2,
            ExitSeverity::ForceTrim => 3,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            ExitSeverity::Pass => "PASS",
            ExitSeverity::Warning => "WARNING",
            ExitSeverity::BlockBuy => "BLOCK_BUY",
            ExitSeverity::ForceTrim => "FORCE_TRIM",
        }
    }

    pub fn is_more_restrictive_than(&self, other: ExitSeverity) -> bool {
        self.rank() > other.rank()
    }

    /// True when a new entry at the checked size must be refused.
    pub fn blocks_entry(&self) -> bool {
        *self >= ExitSeverity::BlockBuy
    }
}

impl PartialOrd for ExitSeverity {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for ExitSeverity {
    fn cmp(&self, other: &Self) -> Ordering {
        self.rank().cmp(&other.rank())
    }
}

impl fmt::Display for ExitSeverity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

// ---------------------------------------------------------------------------
// Config
// ---------------------------------------------------------------------------

/// Exit-impact thresholds (percent) and safe-size search bounds.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExitabilityConfig {
    /// Max 50%-exit impact before new entries are refused (default 5%).
    pub block_buy_50pct: Decimal,
    /// Max 100%-exit impact before a forced trim (default 10%).
    pub force_trim_100pct: Decimal,
    /// 100%-exit impact that raises a warning; also the safe-size target (default 7.5%).
    pub warn_100pct: Decimal,
    /// Absolute floor for a meaningful position, in base currency.
    pub min_position_abs: Decimal,
    /// Meaningful-position floor as a fraction of NAV.
    pub min_position_nav_pct: Decimal,
    pub search_iterations: u32,
    pub search_precision: Decimal,
}

impl Default for ExitabilityConfig {
    fn default() -> Self {
        Self {
            block_buy_50pct: Decimal::from(5),
            force_trim_100pct: Decimal::from(10),
            warn_100pct: Decimal::new(75, 1),
            min_position_abs: Decimal::from(10),
            min_position_nav_pct: Decimal::new(5, 3), // 0.005
            search_iterations: 20,
            search_precision: Decimal::new(1, 1),
        }
    }
}

/// Smallest position worth keeping: the larger of the absolute floor and
/// the NAV-relative floor.
pub fn min_meaningful_position(nav: Decimal, config: &ExitabilityConfig) -> Decimal {
    config
        .min_position_abs
        .max(nav.max(Decimal::ZERO) * config.min_position_nav_pct)
}

// ---------------------------------------------------------------------------
// Result
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExitabilityResult {
    pub severity: ExitSeverity,
    pub size: Decimal,
    pub impact_50: Decimal,
    pub impact_100: Decimal,
    /// Largest size whose full exit stays under the monitor threshold (ForceTrim only).
    pub safe_size: Option<Decimal>,
    pub trim_amount: Decimal,
    /// Trim as a percentage of `size` (100 = full exit).
    pub trim_pct: Decimal,
    pub reason: String,
}

impl ExitabilityResult {
    pub fn is_full_exit(&self) -> bool {
        self.severity == ExitSeverity::ForceTrim && self.safe_size == Some(Decimal::ZERO)
    }
}

// ---------------------------------------------------------------------------
// Check
// ---------------------------------------------------------------------------

/// Classify the exit risk of holding (or entering) `size` against an exit curve.
///
/// Precedence: ForceTrim > BlockBuy > Warning > Pass. Missing slippage data
/// resolves to Warning, never Pass.
pub fn check_exitability(
    size: Decimal,
    curve: &SlippageCurve,
    nav: Decimal,
    config: &ExitabilityConfig,
) -> ExitabilityResult {
    if size <= Decimal::ZERO {
        return ExitabilityResult {
            severity: ExitSeverity::Pass,
            size: Decimal::ZERO,
            impact_50: Decimal::ZERO,
            impact_100: Decimal::ZERO,
            safe_size: None,
            trim_amount: Decimal::ZERO,
            trim_pct: Decimal::ZERO,
            reason: "no exposure".into(),
        };
    }

    let impact_50 = curve.impact_at(size / Decimal::TWO);
    let impact_100 = curve.impact_at(size);

    if curve.is_empty() {
        return ExitabilityResult {
            severity: ExitSeverity::Warning,
            size,
            impact_50,
            impact_100,
            safe_size: None,
            trim_amount: Decimal::ZERO,
            trim_pct: Decimal::ZERO,
            reason: "no slippage data for pool; exit impact unknown, assuming illiquid".into(),
        };
    }

    if impact_100 > config.force_trim_100pct {
        let searched = largest_size_within(
            size,
            config.search_iterations,
            config.search_precision,
            |candidate| curve.impact_at(candidate) <= config.warn_100pct,
        );
        let floor = min_meaningful_position(nav, config);

        let (safe, reason) = if searched < floor {
            (
                Decimal::ZERO,
                format!(
                    "100% exit impact {:.2}% > {}%; safe size {:.2} under floor {:.2}, full exit",
                    impact_100, config.force_trim_100pct, searched, floor
                ),
            )
        } else {
            (
                searched,
                format!(
                    "100% exit impact {:.2}% > {}%; trim to {:.2} (exit impact <= {}%)",
                    impact_100, config.force_trim_100pct, searched, config.warn_100pct
                ),
            )
        };

        let trim_amount = size - safe;
        return ExitabilityResult {
            severity: ExitSeverity::ForceTrim,
            size,
            impact_50,
            impact_100,
            safe_size: Some(safe),
            trim_amount,
            trim_pct: trim_amount / size * Decimal::ONE_HUNDRED,
            reason,
        };
    }

    let (severity, reason) = if impact_50 > config.block_buy_50pct {
        (
            ExitSeverity::BlockBuy,
            format!(
                "50% exit impact {:.2}% > {}%; no new entry at this size",
                impact_50, config.block_buy_50pct
            ),
        )
    } else if impact_100 > config.warn_100pct {
        (
            ExitSeverity::Warning,
            format!(
                "100% exit impact {:.2}% above monitor threshold {}%",
                impact_100, config.warn_100pct
            ),
        )
    } else {
        (ExitSeverity::Pass, "exit impacts within limits".to_string())
    };

    ExitabilityResult {
        severity,
        size,
        impact_50,
        impact_100,
        safe_size: None,
        trim_amount: Decimal::ZERO,
        trim_pct: Decimal::ZERO,
        reason,
    }
}

/// Classify every held, non-root position against its pool's exit curve.
pub fn classify_positions(
    positions: &[Position],
    slippage: &SlippageTable,
    nav: Decimal,
    config: &ExitabilityConfig,
) -> BTreeMap<i32, ExitabilityResult> {
    positions
        .iter()
        .filter(|p| p.is_held() && p.netuid != ROOT_NETUID)
        .map(|p| {
            let result = check_exitability(p.value, slippage.exit_curve(p.netuid), nav, config);
            (p.netuid, result)
        })
        .collect()
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
