use std::collections::HashMap;

use chrono::{DateTime, Utc};
use sqlx::PgPool;

use crate::models::PoolPrice;

/// Get price observations since `since`, oldest first.
pub async fn get_price_history(
    pool: &PgPool,
    since: DateTime<Utc>,
) -> anyhow::Result<Vec<PoolPrice>> {
    let prices = sqlx::query_as::<_, PoolPrice>(
        r#"
        SELECT netuid, price, observed_at FROM pool_prices
        WHERE observed_at >= $1
        ORDER BY netuid, observed_at
        "#,
    )
    .bind(since)
    .fetch_all(pool)
    .await?;

    Ok(prices)
}

/// Same as [`get_price_history`], grouped by netuid.
pub async fn get_price_history_by_pool(
    pool: &PgPool,
    since: DateTime<Utc>,
) -> anyhow::Result<HashMap<i32, Vec<PoolPrice>>> {
    let mut grouped: HashMap<i32, Vec<PoolPrice>> = HashMap::new();
    for price in get_price_history(pool, since).await? {
        grouped.entry(price.netuid).or_default().push(price);
    }
    Ok(grouped)
}
