use sqlx::PgPool;

use crate::models::PortfolioSnapshot;

/// Get the most recent portfolio snapshot for a wallet.
pub async fn get_latest_snapshot(
    pool: &PgPool,
    wallet: &str,
) -> anyhow::Result<Option<PortfolioSnapshot>> {
    let snapshot = sqlx::query_as::<_, PortfolioSnapshot>(
        r#"
        SELECT * FROM portfolio_snapshots
        WHERE wallet = $1
        ORDER BY taken_at DESC
        LIMIT 1
        "#,
    )
    .bind(wallet)
    .fetch_optional(pool)
    .await?;

    Ok(snapshot)
}
