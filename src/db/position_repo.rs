use sqlx::PgPool;

use crate::models::Position;

/// Get every position row for a wallet, including zeroed exits.
pub async fn get_positions(pool: &PgPool, wallet: &str) -> anyhow::Result<Vec<Position>> {
    let positions = sqlx::query_as::<_, Position>(
        "SELECT * FROM positions WHERE wallet = $1 ORDER BY netuid",
    )
    .bind(wallet)
    .fetch_all(pool)
    .await?;

    Ok(positions)
}

