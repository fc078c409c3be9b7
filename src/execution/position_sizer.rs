use std::collections::HashMap;
use std::fmt;

use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use crate::intelligence::slippage::{largest_size_within, SlippageCurve};
use crate::models::{Pool, Position, ROOT_NETUID, UNCATEGORIZED};

/// Sizing limits and the exit thresholds the exitability cap is solved against.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SizingConfig {
    /// Max single position as fraction of NAV (default 15%).
    pub max_position_pct: Decimal,
    /// Max category exposure as fraction of the risk sleeve (default 30%).
    pub max_category_pct: Decimal,
    /// Default new-entry size as fraction of NAV (default 5%).
    pub default_target_pct: Decimal,
    /// Fraction of pool reserve allowed when a pool has no slippage data (default 2%).
    pub no_data_liquidity_pct: Decimal,
    /// Max impact (percent) for exiting half the position.
    pub max_exit_impact_50: Decimal,
    /// Max impact (percent) for exiting the whole position.
    pub max_exit_impact_100: Decimal,
    pub search_iterations: u32,
    pub search_precision: Decimal,
}

impl Default for SizingConfig {
    fn default() -> Self {
        Self {
            max_position_pct: Decimal::new(15, 2),     // 0.15
            max_category_pct: Decimal::new(30, 2),     // 0.30
            default_target_pct: Decimal::new(5, 2),    // 0.05
            no_data_liquidity_pct: Decimal::new(2, 2), // 0.02
            max_exit_impact_50: Decimal::from(5),
            max_exit_impact_100: Decimal::from(10),
            search_iterations: 20,
            search_precision: Decimal::new(1, 1),
        }
    }
}

/// Current allocations the sizer measures new exposure against.
#[derive(Debug, Clone, Default)]
pub struct PortfolioContext {
    pub nav: Decimal,
    /// Risk-sleeve value that category caps are a fraction of.
    pub sleeve_nav: Decimal,
    pub category_totals: HashMap<String, Decimal>,
    pub holdings: HashMap<i32, Decimal>,
}

impl PortfolioContext {
    /// Aggregate held, non-root positions by pool and by the pool's category.
    pub fn from_positions(
        positions: &[Position],
        pools: &[Pool],
        nav: Decimal,
        sleeve_nav: Decimal,
    ) -> Self {
        let categories: HashMap<i32, &str> =
            pools.iter().map(|p| (p.netuid, p.category_name())).collect();

        let mut ctx = Self {
            nav,
            sleeve_nav,
            ..Default::default()
        };
        for position in positions.iter().filter(|p| p.is_held() && p.netuid != ROOT_NETUID) {
            let category = categories.get(&position.netuid).copied().unwrap_or(UNCATEGORIZED);
            ctx.add(position.netuid, category, position.value);
        }
        ctx
    }

    pub fn holding(&self, netuid: i32) -> Decimal {
        self.holdings.get(&netuid).copied().unwrap_or(Decimal::ZERO)
    }

    pub fn category_total(&self, category: &str) -> Decimal {
        self.category_totals.get(category).copied().unwrap_or(Decimal::ZERO)
    }

    /// Apply a signed change in exposure to a pool and its category. A sell
    /// never removes more than the pool holds, from the pool or its category.
    pub fn add(&mut self, netuid: i32, category: &str, delta: Decimal) {
        let holding = self.holdings.entry(netuid).or_insert(Decimal::ZERO);
        let applied = delta.max(-*holding);
        *holding += applied;
        let total = self
            .category_totals
            .entry(category.to_string())
            .or_insert(Decimal::ZERO);
        *total = (*total + applied).max(Decimal::ZERO);
    }

    /// Sum of all non-root holdings.
    pub fn sleeve_holdings(&self) -> Decimal {
        self.holdings.values().copied().sum()
    }
}

/// Which cap is binding.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CapKind {
    Exitability,
    Concentration,
    Category,
}

impl CapKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            CapKind::Exitability => "exitability",
            CapKind::Concentration => "concentration",
            CapKind::Category => "category",
        }
    }
}

impl fmt::Display for CapKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PositionLimit {
    pub netuid: i32,
    pub category: String,
    pub exitability_cap: Decimal,
    pub concentration_cap: Decimal,
    /// `None` for the uncategorized bucket, which has no category cap.
    pub category_cap: Option<Decimal>,
    pub binding_cap: Decimal,
    pub binding_constraint: CapKind,
    pub target_entry_size: Decimal,
}

/// Largest position whose half exit stays within `max_exit_impact_50` and
/// whose full exit stays within `max_exit_impact_100`.
///
/// Searches `[0, 2 × largest sample]`; without samples the cap falls back to
/// `no_data_liquidity_pct` of the pool reserve.
pub fn exitability_cap(curve: &SlippageCurve, reserve: Decimal, config: &SizingConfig) -> Decimal {
    let Some(max_sample) = curve.max_sample_size() else {
        return (reserve * config.no_data_liquidity_pct).max(Decimal::ZERO);
    };

    largest_size_within(
        max_sample * Decimal::TWO,
        config.search_iterations,
        config.search_precision,
        |size| {
            curve.impact_at(size / Decimal::TWO) <= config.max_exit_impact_50
                && curve.impact_at(size) <= config.max_exit_impact_100
        },
    )
}

/// Compute the three independent caps for a pool and pick the tightest.
pub fn compute_position_limit(
    pool: &Pool,
    curve: &SlippageCurve,
    ctx: &PortfolioContext,
    config: &SizingConfig,
) -> PositionLimit {
    let nav = ctx.nav.max(Decimal::ZERO);
    let category = pool.category_name().to_string();

    let exit_cap = exitability_cap(curve, pool.reserve, config);
    let concentration_cap = nav * config.max_position_pct;

    let category_cap = if category == UNCATEGORIZED {
        None
    } else {
        let others = ctx.category_total(&category) - ctx.holding(pool.netuid);
        let cap = ctx.sleeve_nav.max(Decimal::ZERO) * config.max_category_pct
            - others.max(Decimal::ZERO);
        Some(cap.max(Decimal::ZERO))
    };

    let mut binding_cap = exit_cap;
    let mut binding_constraint = CapKind::Exitability;
    if concentration_cap < binding_cap {
        binding_cap = concentration_cap;
        binding_constraint = CapKind::Concentration;
    }
    if let Some(cap) = category_cap {
        if cap < binding_cap {
            binding_cap = cap;
            binding_constraint = CapKind::Category;
        }
    }

    PositionLimit {
        netuid: pool.netuid,
        category,
        exitability_cap: exit_cap,
        concentration_cap,
        category_cap,
        binding_cap,
        binding_constraint,
        target_entry_size: (nav * config.default_target_pct).min(binding_cap),
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    fn standard_curve() -> SlippageCurve {
        SlippageCurve::new(vec![
            (dec!(100), dec!(1)),
            (dec!(500), dec!(5)),
            (dec!(1000), dec!(10)),
        ])
    }

    fn pool(netuid: i32, category: Option<&str>) -> Pool {
        Pool {
            netuid,
            reserve: dec!(20_000),
            category: category.map(str::to_string),
            ..Default::default()
        }
    }

    fn context() -> PortfolioContext {
        let mut ctx = PortfolioContext {
            nav: dec!(10_000),
            sleeve_nav: dec!(5_000),
            ..Default::default()
        };
        ctx.add(1, "defi", dec!(200));
        ctx.add(2, "defi", dec!(1_000));
        ctx
    }

    #[test]
    fn test_exitability_cap_from_curve() {
        let cap = exitability_cap(&standard_curve(), dec!(20_000), &SizingConfig::default());
        // both thresholds bind at 1000 on this curve
        assert!(cap <= dec!(1000));
        assert!(dec!(1000) - cap < dec!(0.1));
    }

    #[test]
    fn test_exitability_cap_without_data() {
        let cap =
            exitability_cap(&SlippageCurve::default(), dec!(20_000), &SizingConfig::default());
        assert_eq!(cap, dec!(400));
    }

    #[test]
    fn test_category_cap_excludes_own_holding() {
        let limit = compute_position_limit(
            &pool(1, Some("defi")),
            &standard_curve(),
            &context(),
            &SizingConfig::default(),
        );
        // 30% of 5,000 sleeve minus the other 1,000 in the category
        assert_eq!(limit.category_cap, Some(dec!(500)));
        assert_eq!(limit.concentration_cap, dec!(1_500));
        assert_eq!(limit.binding_constraint, CapKind::Category);
        assert_eq!(limit.binding_cap, dec!(500));
        assert_eq!(limit.target_entry_size, dec!(500));
    }

    #[test]
    fn test_full_category_floors_at_zero() {
        let mut ctx = context();
        ctx.add(3, "defi", dec!(2_000));
        let limit = compute_position_limit(
            &pool(4, Some("defi")),
            &standard_curve(),
            &ctx,
            &SizingConfig::default(),
        );
        assert_eq!(limit.category_cap, Some(Decimal::ZERO));
        assert_eq!(limit.binding_cap, Decimal::ZERO);
        assert_eq!(limit.target_entry_size, Decimal::ZERO);
    }

    #[test]
    fn test_oversized_sell_only_removes_holding() {
        let mut ctx = context();
        ctx.add(1, "defi", dec!(-500));
        assert_eq!(ctx.holding(1), Decimal::ZERO);
        assert_eq!(ctx.category_total("defi"), dec!(1_000));
        assert_eq!(ctx.sleeve_holdings(), dec!(1_000));
    }

    #[test]
    fn test_uncategorized_has_no_category_cap() {
        let mut ctx = context();
        ctx.add(5, UNCATEGORIZED, dec!(4_000));
        let limit = compute_position_limit(
            &pool(6, None),
            &SlippageCurve::default(),
            &ctx,
            &SizingConfig::default(),
        );
        assert_eq!(limit.category, UNCATEGORIZED);
        assert_eq!(limit.category_cap, None);
        // 2% of 20,000 reserve beats 15% of NAV
        assert_eq!(limit.binding_constraint, CapKind::Exitability);
        assert_eq!(limit.binding_cap, dec!(400));
        assert_eq!(limit.target_entry_size, dec!(400));
    }

    #[test]
    fn test_binding_never_exceeds_any_cap() {
        let curves = [SlippageCurve::default(), standard_curve()];
        let navs = [dec!(0), dec!(1_000), dec!(10_000), dec!(250_000)];
        let categories = [None, Some("defi"), Some("compute")];

        for curve in &curves {
            for nav in navs {
                for category in categories {
                    let ctx = PortfolioContext {
                        nav,
                        sleeve_nav: nav / dec!(2),
                        ..context()
                    };
                    let config = SizingConfig::default();
                    let limit = compute_position_limit(&pool(9, category), curve, &ctx, &config);
                    assert!(limit.exitability_cap >= Decimal::ZERO);
                    assert!(limit.concentration_cap >= Decimal::ZERO);
                    assert!(limit.binding_cap <= limit.exitability_cap);
                    assert!(limit.binding_cap <= limit.concentration_cap);
                    if let Some(cap) = limit.category_cap {
                        assert!(cap >= Decimal::ZERO);
                        assert!(limit.binding_cap <= cap);
                    }
                    assert!(limit.target_entry_size <= limit.binding_cap);
                }
            }
        }
    }

    #[test]
    fn test_context_from_positions_groups_by_category() {
        let pools = vec![pool(1, Some("defi")), pool(2, Some("defi")), pool(3, None)];
        let positions = vec![
            Position { netuid: 0, value: dec!(5_000), ..Default::default() },
            Position { netuid: 1, value: dec!(300), ..Default::default() },
            Position { netuid: 2, value: dec!(700), ..Default::default() },
            Position { netuid: 3, value: dec!(50), ..Default::default() },
            Position { netuid: 4, value: dec!(0), ..Default::default() },
        ];
        let ctx = PortfolioContext::from_positions(&positions, &pools, dec!(6_050), dec!(1_050));
        assert_eq!(ctx.category_total("defi"), dec!(1_000));
        assert_eq!(ctx.category_total(UNCATEGORIZED), dec!(50));
        assert_eq!(ctx.holding(0), Decimal::ZERO);
        assert_eq!(ctx.sleeve_holdings(), dec!(1_050));
    }
}
