use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use sqlx::PgPool;

use crate::models::Pool;

/// Scoring columns written back after a scoring pass.
#[derive(Debug, Clone)]
pub struct PoolScoreUpdate {
    pub netuid: i32,
    pub viability_score: Option<Decimal>,
    pub viability_tier: String,
    /// Recomputed from price history; `None` keeps the synced value.
    pub max_drawdown_30d: Option<Decimal>,
    pub price_trend_7d: Option<Decimal>,
    pub is_eligible: bool,
    pub ineligibility_reasons: Vec<String>,
}

/// Get the full pool universe.
pub async fn get_pools(pool: &PgPool) -> anyhow::Result<Vec<Pool>> {
    let pools = sqlx::query_as::<_, Pool>("SELECT * FROM pools ORDER BY netuid")
        .fetch_all(pool)
        .await?;

    Ok(pools)
}

/// Get a single pool by netuid.
pub async fn get_pool(pool: &PgPool, netuid: i32) -> anyhow::Result<Option<Pool>> {
    let row = sqlx::query_as::<_, Pool>("SELECT * FROM pools WHERE netuid = $1")
        .bind(netuid)
        .fetch_optional(pool)
        .await?;

    Ok(row)
}

/// Write back scoring results in one transaction so readers never see a
/// half-scored universe.
pub async fn update_scores(
    pool: &PgPool,
    updates: &[PoolScoreUpdate],
    scored_at: DateTime<Utc>,
) -> anyhow::Result<u64> {
    let mut tx = pool.begin().await?;
    let mut written = 0;

    for u in updates {
        let result = sqlx::query(
            r#"
            UPDATE pools
            SET viability_score = $2,
                viability_tier = $3,
                max_drawdown_30d = COALESCE($4, max_drawdown_30d),
                price_trend_7d = COALESCE($5, price_trend_7d),
                is_eligible = $6,
                ineligibility_reasons = $7,
                scored_at = $8
            WHERE netuid = $1
            "#,
        )
        .bind(u.netuid)
        .bind(u.viability_score)
        .bind(&u.viability_tier)
        .bind(u.max_drawdown_30d)
        .bind(u.price_trend_7d)
        .bind(u.is_eligible)
        .bind(&u.ineligibility_reasons)
        .bind(scored_at)
        .execute(&mut *tx)
        .await?;

        written += result.rows_affected();
    }

    tx.commit().await?;
    Ok(written)
}
