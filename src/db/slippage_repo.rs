use sqlx::PgPool;

use crate::models::SlippageSample;

/// Get every precomputed slippage sample.
pub async fn get_samples(pool: &PgPool) -> anyhow::Result<Vec<SlippageSample>> {
    let samples = sqlx::query_as::<_, SlippageSample>(
        "SELECT * FROM slippage_surfaces ORDER BY netuid, direction, size",
    )
    .fetch_all(pool)
    .await?;

    Ok(samples)
}

