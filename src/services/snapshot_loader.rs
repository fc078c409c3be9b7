use chrono::{DateTime, Duration, Utc};
use sqlx::PgPool;

use crate::db::{
    config_repo, pool_repo, position_repo, recommendation_repo, slippage_repo, snapshot_repo,
};
use crate::errors::{StrategyError, StrategyResult};
use crate::intelligence::slippage::SlippageTable;
use crate::models::ViabilityConfig;
use crate::strategy::MarketSnapshot;

/// Load the active viability config.
///
/// A missing row falls back to `defaults`; a row that cannot be read or does
/// not validate is fatal for the pass.
pub async fn load_viability_config(
    pool: &PgPool,
    defaults: &ViabilityConfig,
) -> StrategyResult<ViabilityConfig> {
    let active = config_repo::get_active_viability_config(pool)
        .await
        .map_err(|e| StrategyError::ConfigUnavailable(e.to_string()))?;

    match active {
        Some(config) => {
            config.validate().map_err(|e| {
                StrategyError::ConfigUnavailable(format!("version {}: {e}", config.version))
            })?;
            Ok(config)
        }
        None => {
            tracing::debug!("No active viability config; using defaults");
            Ok(defaults.clone())
        }
    }
}

/// Read everything the engine needs for one wallet.
pub async fn load_snapshot(
    pool: &PgPool,
    wallet: &str,
    viability_config: ViabilityConfig,
    as_of: DateTime<Utc>,
) -> StrategyResult<MarketSnapshot> {
    let pools = pool_repo::get_pools(pool).await?;
    let positions = position_repo::get_positions(pool, wallet).await?;
    let samples = slippage_repo::get_samples(pool).await?;
    let portfolio = snapshot_repo::get_latest_snapshot(pool, wallet).await?;
    let week_ago = as_of - Duration::days(7);
    let day_ago = as_of - Duration::hours(24);
    let executed_7d = recommendation_repo::sum_executed_since(pool, wallet, week_ago).await?;
    let executed_24h = recommendation_repo::sum_executed_since(pool, wallet, day_ago).await?;
    let pending_7d = recommendation_repo::sum_pending_since(pool, wallet, week_ago).await?;
    let pending_24h = recommendation_repo::sum_pending_since(pool, wallet, day_ago).await?;

    tracing::debug!(
        wallet = %wallet,
        pools = pools.len(),
        positions = positions.len(),
        samples = samples.len(),
        has_snapshot = portfolio.is_some(),
        "Snapshot loaded"
    );

    Ok(MarketSnapshot {
        wallet: wallet.to_string(),
        pools,
        positions,
        slippage: SlippageTable::from_samples(&samples),
        portfolio,
        viability_config,
        executed_7d,
        executed_24h,
        pending_7d,
        pending_24h,
        as_of,
    })
}
