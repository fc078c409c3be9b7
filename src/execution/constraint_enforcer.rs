use std::cmp::Ordering;
use std::collections::{BTreeMap, HashMap};
use std::fmt;

use chrono::{DateTime, Duration, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::intelligence::slippage::SlippageTable;
use crate::models::alert::alert_status;
use crate::models::{Alert, Pool, Position, ROOT_NETUID, UNCATEGORIZED};

/// Portfolio-wide limits checked on every monitor tick.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConstraintLimits {
    /// Max single position as fraction of NAV (default 15%).
    pub max_position_pct: Decimal,
    /// Max category exposure as fraction of the risk sleeve (default 30%).
    pub max_category_pct: Decimal,
    pub drawdown_soft: Decimal,
    pub drawdown_hard: Decimal,
    /// Executed volume over trailing 7 days / NAV (default 30%).
    pub weekly_turnover_cap: Decimal,
    /// Executed volume over trailing 24 hours / NAV (default 10%).
    pub daily_turnover_cap: Decimal,
    /// Full-exit impact (percent) above which a position is in breach.
    pub max_exit_slippage_100: Decimal,
    /// Half-exit impact (percent) above which a position is flagged.
    pub max_exit_slippage_50: Decimal,
    /// Fraction of a limit at which a warning is raised (default 80%).
    pub warning_ratio: Decimal,
}

impl Default for ConstraintLimits {
    fn default() -> Self {
        Self {
            max_position_pct: Decimal::new(15, 2),
            max_category_pct: Decimal::new(30, 2),
            drawdown_soft: Decimal::new(10, 2),
            drawdown_hard: Decimal::new(15, 2),
            weekly_turnover_cap: Decimal::new(30, 2),
            daily_turnover_cap: Decimal::new(10, 2),
            max_exit_slippage_100: Decimal::from(10),
            max_exit_slippage_50: Decimal::from(5),
            warning_ratio: Decimal::new(80, 2),
        }
    }
}

/// Alerts for the same condition are not re-raised within this window.
pub fn alert_cooldown() -> Duration {
    Duration::hours(1)
}

// ---------------------------------------------------------------------------
// Violation types
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ViolationCategory {
    PositionConcentration,
    CategoryConcentration,
    Drawdown,
    Turnover,
    ExitSlippage,
}

impl ViolationCategory {
    pub fn as_str(&self) -> &'static str {
        match self {
            ViolationCategory::PositionConcentration => "position_concentration",
            ViolationCategory::CategoryConcentration => "category_concentration",
            ViolationCategory::Drawdown => "drawdown",
            ViolationCategory::Turnover => "turnover",
            ViolationCategory::ExitSlippage => "exit_slippage",
        }
    }

    pub fn from_str(s: &str) -> Option<Self> {
        match s {
            "position_concentration" => Some(ViolationCategory::PositionConcentration),
            "category_concentration" => Some(ViolationCategory::CategoryConcentration),
            "drawdown" => Some(ViolationCategory::Drawdown),
            "turnover" => Some(ViolationCategory::Turnover),
            "exit_slippage" => Some(ViolationCategory::ExitSlippage),
            _ => None,
        }
    }
}

impl fmt::Display for ViolationCategory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ViolationSeverity {
    Warning,
    Breach,
}

impl ViolationSeverity {
    pub fn rank(&self) -> u8 {
        match self {
            ViolationSeverity::Warning => 1,
            ViolationSeverity::Breach => 2,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            ViolationSeverity::Warning => "warning",
            ViolationSeverity::Breach => "breach",
        }
    }

    pub fn from_str(s: &str) -> Option<Self> {
        match s {
            "warning" => Some(ViolationSeverity::Warning),
            "breach" => Some(ViolationSeverity::Breach),
            _ => None,
        }
    }
}

impl PartialOrd for ViolationSeverity {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for ViolationSeverity {
    fn cmp(&self, other: &Self) -> Ordering {
        self.rank().cmp(&other.rank())
    }
}

impl fmt::Display for ViolationSeverity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ConstraintViolation {
    pub category: ViolationCategory,
    pub severity: ViolationSeverity,
    /// Pool the violation concerns, when it is position-level.
    pub netuid: Option<i32>,
    /// Category name for category-concentration violations.
    pub subject: Option<String>,
    pub threshold: Decimal,
    pub actual: Decimal,
    pub message: String,
}

impl ConstraintViolation {
    pub fn is_breach(&self) -> bool {
        self.severity == ViolationSeverity::Breach
    }

    /// Same condition as an existing alert (category, pool and subject).
    pub fn matches_alert(&self, alert: &Alert) -> bool {
        alert.category == self.category.as_str()
            && alert.netuid == self.netuid
            && alert.subject == self.subject
    }

    pub fn to_alert(&self, wallet: &str, created_at: DateTime<Utc>) -> Alert {
        Alert {
            id: Uuid::new_v4(),
            wallet: wallet.to_string(),
            category: self.category.as_str().to_string(),
            netuid: self.netuid,
            subject: self.subject.clone(),
            severity: self.severity.as_str().to_string(),
            threshold: self.threshold,
            actual: self.actual,
            message: self.message.clone(),
            status: alert_status::ACTIVE.to_string(),
            created_at,
            acknowledged_at: None,
            resolved_at: None,
        }
    }
}

/// Everything the enforcer needs for one wallet.
#[derive(Debug, Clone)]
pub struct ConstraintInput<'a> {
    pub nav: Decimal,
    /// Risk-sleeve base category exposure is measured against; the same
    /// base the sizer caps categories with.
    pub sleeve_nav: Decimal,
    pub positions: &'a [Position],
    pub pools: &'a [Pool],
    pub slippage: &'a SlippageTable,
    /// Current drawdown from peak (fraction).
    pub drawdown: Decimal,
    /// Executed volume over the trailing 7 days.
    pub executed_7d: Decimal,
}

// ---------------------------------------------------------------------------
// Evaluation
// ---------------------------------------------------------------------------

/// Tier a fraction against a limit: Breach above it, Warning at or above
/// `warning_ratio` of it.
fn tier(actual: Decimal, limit: Decimal, warning_ratio: Decimal) -> Option<ViolationSeverity> {
    if actual > limit {
        Some(ViolationSeverity::Breach)
    } else if actual >= limit * warning_ratio {
        Some(ViolationSeverity::Warning)
    } else {
        None
    }
}

fn pct(value: Decimal) -> Decimal {
    (value * Decimal::ONE_HUNDRED).round_dp(2)
}

/// Evaluate every limit. Violations are data: an empty vector means the
/// portfolio is within all limits.
pub fn evaluate_constraints(
    input: &ConstraintInput<'_>,
    limits: &ConstraintLimits,
) -> Vec<ConstraintViolation> {
    let mut violations = Vec::new();
    let held: Vec<&Position> = input
        .positions
        .iter()
        .filter(|p| p.is_held() && p.netuid != ROOT_NETUID)
        .collect();

    if input.nav > Decimal::ZERO {
        // 1. Position concentration
        for position in &held {
            let fraction = position.value / input.nav;
            if let Some(severity) = tier(fraction, limits.max_position_pct, limits.warning_ratio) {
                violations.push(ConstraintViolation {
                    category: ViolationCategory::PositionConcentration,
                    severity,
                    netuid: Some(position.netuid),
                    subject: None,
                    threshold: limits.max_position_pct,
                    actual: fraction,
                    message: format!(
                        "pool {} is {}% of NAV (limit {}%)",
                        position.netuid,
                        pct(fraction),
                        pct(limits.max_position_pct)
                    ),
                });
            }
        }

        // 2. Category concentration; uncategorized has no cap
        let categories: HashMap<i32, &str> =
            input.pools.iter().map(|p| (p.netuid, p.category_name())).collect();
        let mut by_category: BTreeMap<&str, Decimal> = BTreeMap::new();
        for position in &held {
            let category = categories.get(&position.netuid).copied().unwrap_or(UNCATEGORIZED);
            *by_category.entry(category).or_insert(Decimal::ZERO) += position.value;
        }
        for (category, total) in by_category {
            if category == UNCATEGORIZED || input.sleeve_nav <= Decimal::ZERO {
                continue;
            }
            let fraction = total / input.sleeve_nav;
            if let Some(severity) = tier(fraction, limits.max_category_pct, limits.warning_ratio) {
                violations.push(ConstraintViolation {
                    category: ViolationCategory::CategoryConcentration,
                    severity,
                    netuid: None,
                    subject: Some(category.to_string()),
                    threshold: limits.max_category_pct,
                    actual: fraction,
                    message: format!(
                        "category {} is {}% of the risk sleeve (limit {}%)",
                        category,
                        pct(fraction),
                        pct(limits.max_category_pct)
                    ),
                });
            }
        }

        // 3. Weekly turnover
        let turnover = input.executed_7d.max(Decimal::ZERO) / input.nav;
        if let Some(severity) = tier(turnover, limits.weekly_turnover_cap, limits.warning_ratio) {
            violations.push(ConstraintViolation {
                category: ViolationCategory::Turnover,
                severity,
                netuid: None,
                subject: None,
                threshold: limits.weekly_turnover_cap,
                actual: turnover,
                message: format!(
                    "7d turnover {}% of NAV (cap {}%)",
                    pct(turnover),
                    pct(limits.weekly_turnover_cap)
                ),
            });
        }
    }

    // 4. Drawdown
    let drawdown = input.drawdown.abs();
    let drawdown_severity = if drawdown >= limits.drawdown_hard {
        Some((ViolationSeverity::Breach, limits.drawdown_hard))
    } else if drawdown >= limits.drawdown_soft {
        Some((ViolationSeverity::Warning, limits.drawdown_soft))
    } else {
        None
    };
    if let Some((severity, threshold)) = drawdown_severity {
        violations.push(ConstraintViolation {
            category: ViolationCategory::Drawdown,
            severity,
            netuid: None,
            subject: None,
            threshold,
            actual: drawdown,
            message: format!("drawdown from peak {}% (limit {}%)", pct(drawdown), pct(threshold)),
        });
    }

    // 5. Exit slippage, precomputed values first
    for position in &held {
        let curve = input.slippage.exit_curve(position.netuid);
        let impact_100 = position
            .exit_slippage_100pct
            .unwrap_or_else(|| curve.impact_at(position.value));
        let impact_50 = position
            .exit_slippage_50pct
            .unwrap_or_else(|| curve.impact_at(position.value / Decimal::TWO));

        let violation = if impact_100 > limits.max_exit_slippage_100 {
            Some((
                ViolationSeverity::Breach,
                limits.max_exit_slippage_100,
                impact_100,
                format!(
                    "pool {} full exit impact {:.2}% > {}%",
                    position.netuid, impact_100, limits.max_exit_slippage_100
                ),
            ))
        } else if impact_50 > limits.max_exit_slippage_50 {
            Some((
                ViolationSeverity::Warning,
                limits.max_exit_slippage_50,
                impact_50,
                format!(
                    "pool {} half exit impact {:.2}% > {}%",
                    position.netuid, impact_50, limits.max_exit_slippage_50
                ),
            ))
        } else {
            None
        };

        if let Some((severity, threshold, actual, message)) = violation {
            violations.push(ConstraintViolation {
                category: ViolationCategory::ExitSlippage,
                severity,
                netuid: Some(position.netuid),
                subject: None,
                threshold,
                actual,
                message,
            });
        }
    }

    violations
}

// ---------------------------------------------------------------------------
// Alert bookkeeping
// ---------------------------------------------------------------------------

/// Drop violations already covered by an unresolved alert raised within
/// `cooldown`. An alert only covers violations of equal or lower severity,
/// so a warning escalating to a breach is raised again.
pub fn dedupe_against_active(
    violations: Vec<ConstraintViolation>,
    active_alerts: &[Alert],
    now: DateTime<Utc>,
    cooldown: Duration,
) -> Vec<ConstraintViolation> {
    violations
        .into_iter()
        .filter(|v| {
            !active_alerts.iter().any(|alert| {
                alert.status != alert_status::RESOLVED
                    && v.matches_alert(alert)
                    && now - alert.created_at < cooldown
                    && ViolationSeverity::from_str(&alert.severity)
                        .map(|s| s >= v.severity)
                        .unwrap_or(false)
            })
        })
        .collect()
}

/// Unresolved alerts whose condition no longer appears in `violations`.
pub fn cleared_alerts(active_alerts: &[Alert], violations: &[ConstraintViolation]) -> Vec<Uuid> {
    active_alerts
        .iter()
        .filter(|alert| alert.status != alert_status::RESOLVED)
        .filter(|alert| !violations.iter().any(|v| v.matches_alert(alert)))
        .map(|alert| alert.id)
        .collect()
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
