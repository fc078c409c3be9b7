use rust_decimal::Decimal;
use std::env;
use std::net::SocketAddr;
use std::str::FromStr;

use crate::errors::StrategyError;
use crate::execution::constraint_enforcer::ConstraintLimits;
use crate::execution::position_sizer::SizingConfig;
use crate::execution::rebalancer::RebalanceConfig;
use crate::intelligence::eligibility::EligibilityConfig;
use crate::intelligence::exitability::ExitabilityConfig;
use crate::intelligence::regime::RegimeThresholds;
use crate::models::ViabilityConfig;

/// Read an env var and parse it, falling back to `default` when unset or
/// unparseable.
fn env_parse<T: FromStr>(key: &str, default: T) -> T {
    env::var(key)
        .ok()
        .and_then(|v| v.trim().parse().ok())
        .unwrap_or(default)
}

fn env_decimal(key: &str, default: Decimal) -> Decimal {
    env_parse(key, default)
}

// ---------------------------------------------------------------------------
// AppConfig
// ---------------------------------------------------------------------------

#[derive(Debug, Clone)]
pub struct AppConfig {
    pub database_url: String,
    /// Wallets the runner assesses; comma separated in `STRATEGY_WALLETS`.
    pub wallets: Vec<String>,

    // Loop cadences
    pub scoring_interval_secs: u64,
    pub monitor_interval_secs: u64,
    pub rebalance_interval_secs: u64,
    pub expiry_interval_secs: u64,

    /// Prometheus scrape endpoint; metrics are recorded but not served when unset.
    pub metrics_addr: Option<SocketAddr>,
    pub log_json: bool,
    pub event_rebalance_enabled: bool,

    pub strategy: StrategySettings,
    /// Viability config used when no active row exists.
    pub viability_defaults: ViabilityConfig,
}

impl AppConfig {
    pub fn from_env() -> anyhow::Result<Self> {
        let wallets: Vec<String> = env::var("STRATEGY_WALLETS")
            .unwrap_or_default()
            .split(',')
            .map(|s| s.trim().to_string())
            .filter(|s| !s.is_empty())
            .collect();

        let metrics_addr = match env::var("METRICS_ADDR") {
            Ok(addr) if !addr.trim().is_empty() => Some(addr.trim().parse()?),
            _ => None,
        };

        let strategy = StrategySettings::from_env();
        strategy.validate()?;

        let viability_defaults = ViabilityConfig::from_env();
        viability_defaults
            .validate()
            .map_err(StrategyError::InvalidConfig)?;

        Ok(Self {
            database_url: env::var("DATABASE_URL")
                .map_err(|_| anyhow::anyhow!("DATABASE_URL must be set"))?,
            wallets,
            scoring_interval_secs: env_parse("SCORING_INTERVAL_SECS", 3_600),
            monitor_interval_secs: env_parse("MONITOR_INTERVAL_SECS", 300),
            rebalance_interval_secs: env_parse("REBALANCE_INTERVAL_SECS", 7 * 24 * 3_600),
            expiry_interval_secs: env_parse("EXPIRY_INTERVAL_SECS", 900),
            metrics_addr,
            log_json: env::var("LOG_FORMAT")
                .map(|v| v.eq_ignore_ascii_case("json"))
                .unwrap_or(false),
            event_rebalance_enabled: env_parse("EVENT_REBALANCE_ENABLED", true),
            strategy,
            viability_defaults,
        })
    }
}

// ---------------------------------------------------------------------------
// StrategySettings
// ---------------------------------------------------------------------------

/// Every tunable the decision core reads.
#[derive(Debug, Clone)]
pub struct StrategySettings {
    pub eligibility: EligibilityConfig,
    pub exitability: ExitabilityConfig,
    pub sizing: SizingConfig,
    pub limits: ConstraintLimits,
    pub rebalance: RebalanceConfig,
    pub regime: RegimeThresholds,
    /// Risk-sleeve band as fractions of NAV; regimes pick a point inside it.
    pub sleeve_min_pct: Decimal,
    pub sleeve_max_pct: Decimal,
}

impl Default for StrategySettings {
    fn default() -> Self {
        Self {
            eligibility: EligibilityConfig::default(),
            exitability: ExitabilityConfig::default(),
            sizing: SizingConfig::default(),
            limits: ConstraintLimits::default(),
            rebalance: RebalanceConfig::default(),
            regime: RegimeThresholds::default(),
            sleeve_min_pct: Decimal::new(20, 2),
            sleeve_max_pct: Decimal::new(60, 2),
        }
    }
}

impl StrategySettings {
    /// Defaults overridden by the main limits from the environment. Position
    /// and category caps are shared by the sizer and the enforcer.
    pub fn from_env() -> Self {
        let mut settings = Self::default();

        let max_position_pct = env_decimal("MAX_POSITION_PCT", settings.sizing.max_position_pct);
        let max_category_pct = env_decimal("MAX_CATEGORY_PCT", settings.sizing.max_category_pct);
        settings.sizing.max_position_pct = max_position_pct;
        settings.sizing.max_category_pct = max_category_pct;
        settings.limits.max_position_pct = max_position_pct;
        settings.limits.max_category_pct = max_category_pct;

        settings.limits.weekly_turnover_cap =
            env_decimal("WEEKLY_TURNOVER_CAP", settings.limits.weekly_turnover_cap);
        settings.limits.daily_turnover_cap =
            env_decimal("DAILY_TURNOVER_CAP", settings.limits.daily_turnover_cap);
        settings.limits.drawdown_soft = env_decimal("DRAWDOWN_SOFT", settings.limits.drawdown_soft);
        settings.limits.drawdown_hard = env_decimal("DRAWDOWN_HARD", settings.limits.drawdown_hard);
        settings.sleeve_min_pct = env_decimal("SLEEVE_MIN_PCT", settings.sleeve_min_pct);
        settings.sleeve_max_pct = env_decimal("SLEEVE_MAX_PCT", settings.sleeve_max_pct);

        settings
    }

    pub fn validate(&self) -> Result<(), StrategyError> {
        let unit = |name: &str, v: Decimal| {
            if v <= Decimal::ZERO || v > Decimal::ONE {
                Err(StrategyError::InvalidConfig(format!("{name} must be in (0, 1], got {v}")))
            } else {
                Ok(())
            }
        };
        unit("max_position_pct", self.sizing.max_position_pct)?;
        unit("max_category_pct", self.sizing.max_category_pct)?;
        unit("weekly_turnover_cap", self.limits.weekly_turnover_cap)?;
        unit("daily_turnover_cap", self.limits.daily_turnover_cap)?;
        unit("sleeve_max_pct", self.sleeve_max_pct)?;

        if self.sleeve_min_pct < Decimal::ZERO || self.sleeve_min_pct > self.sleeve_max_pct {
            return Err(StrategyError::InvalidConfig(format!(
                "sleeve band [{}, {}] is not ordered",
                self.sleeve_min_pct, self.sleeve_max_pct
            )));
        }
        if self.limits.drawdown_soft > self.limits.drawdown_hard {
            return Err(StrategyError::InvalidConfig(format!(
                "drawdown_soft {} above drawdown_hard {}",
                self.limits.drawdown_soft, self.limits.drawdown_hard
            )));
        }
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// Viability defaults
// ---------------------------------------------------------------------------

impl ViabilityConfig {
    /// Built-in defaults with hard-failure thresholds overridable from the
    /// environment. Weights and tier cutoffs only change through a config row.
    pub fn from_env() -> Self {
        let d = Self::default();
        Self {
            min_reserve: env_decimal("VIABILITY_MIN_RESERVE", d.min_reserve),
            min_emission_share: env_decimal("VIABILITY_MIN_EMISSION_SHARE", d.min_emission_share),
            min_age_days: env_parse("VIABILITY_MIN_AGE_DAYS", d.min_age_days),
            min_holders: env_parse("VIABILITY_MIN_HOLDERS", d.min_holders),
            max_drawdown_30d: env_decimal("VIABILITY_MAX_DRAWDOWN", d.max_drawdown_30d),
            max_negative_flow_ratio: env_decimal(
                "VIABILITY_MAX_NEGATIVE_FLOW_RATIO",
                d.max_negative_flow_ratio,
            ),
            ..d
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_settings_are_valid() {
        let settings = StrategySettings::default();
        assert!(settings.validate().is_ok());
        assert_eq!(settings.sleeve_min_pct, Decimal::new(20, 2));
        assert_eq!(settings.sizing.max_position_pct, settings.limits.max_position_pct);
    }

    #[test]
    fn test_inverted_sleeve_band_rejected() {
        let settings = StrategySettings {
            sleeve_min_pct: Decimal::new(70, 2),
            ..StrategySettings::default()
        };
        assert!(matches!(settings.validate(), Err(StrategyError::InvalidConfig(_))));
    }

    #[test]
    fn test_drawdown_limits_must_order() {
        let mut settings = StrategySettings::default();
        settings.limits.drawdown_soft = Decimal::new(20, 2);
        assert!(settings.validate().is_err());
    }
}
