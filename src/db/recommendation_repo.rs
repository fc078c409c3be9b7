use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use sqlx::{PgConnection, PgPool};
use uuid::Uuid;

use crate::models::recommendation::recommendation_status;
use crate::models::TradeRecommendation;

/// Insert a batch of recommendations on an open connection or transaction.
/// Ladder parents must precede their tranches.
pub async fn insert_recommendations(
    conn: &mut PgConnection,
    recommendations: &[TradeRecommendation],
) -> anyhow::Result<()> {
    for r in recommendations {
        sqlx::query(
            r#"
            INSERT INTO trade_recommendations (
                id, wallet, netuid, direction, size, trigger, reason, priority, urgent,
                status, parent_id, tranche_index, tranche_count, created_at, expires_at
            )
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13, $14, $15)
            "#,
        )
        .bind(r.id)
        .bind(&r.wallet)
        .bind(r.netuid)
        .bind(&r.direction)
        .bind(r.size)
        .bind(&r.trigger)
        .bind(&r.reason)
        .bind(r.priority)
        .bind(r.urgent)
        .bind(&r.status)
        .bind(r.parent_id)
        .bind(r.tranche_index)
        .bind(r.tranche_count)
        .bind(r.created_at)
        .bind(r.expires_at)
        .execute(&mut *conn)
        .await?;
    }

    Ok(())
}

/// Get pending recommendations for a wallet in execution order.
pub async fn get_pending(
    pool: &PgPool,
    wallet: &str,
) -> anyhow::Result<Vec<TradeRecommendation>> {
    let rows = sqlx::query_as::<_, TradeRecommendation>(
        r#"
        SELECT * FROM trade_recommendations
        WHERE wallet = $1 AND status = $2
        ORDER BY priority, size DESC, created_at
        "#,
    )
    .bind(wallet)
    .bind(recommendation_status::PENDING)
    .fetch_all(pool)
    .await?;

    Ok(rows)
}

/// Mark a pending recommendation executed. Returns false when it was not pending.
pub async fn mark_executed(
    pool: &PgPool,
    id: Uuid,
    executed_at: DateTime<Utc>,
) -> anyhow::Result<bool> {
    let result = sqlx::query(
        r#"
        UPDATE trade_recommendations
        SET status = $2, executed_at = $3
        WHERE id = $1 AND status = $4
        "#,
    )
    .bind(id)
    .bind(recommendation_status::EXECUTED)
    .bind(executed_at)
    .bind(recommendation_status::PENDING)
    .execute(pool)
    .await?;

    Ok(result.rows_affected() == 1)
}

/// Expire every pending recommendation past its deadline.
pub async fn expire_stale(pool: &PgPool, now: DateTime<Utc>) -> anyhow::Result<u64> {
    let result = sqlx::query(
        "UPDATE trade_recommendations SET status = $1 WHERE status = $2 AND expires_at < $3",
    )
    .bind(recommendation_status::EXPIRED)
    .bind(recommendation_status::PENDING)
    .bind(now)
    .execute(pool)
    .await?;

    Ok(result.rows_affected())
}

/// Executed volume for a wallet since `since`. Ladder parents are skipped
/// so laddered exits are not counted twice.
pub async fn sum_executed_since(
    pool: &PgPool,
    wallet: &str,
    since: DateTime<Utc>,
) -> anyhow::Result<Decimal> {
    let row: (Option<Decimal>,) = sqlx::query_as(
        r#"
        SELECT COALESCE(SUM(size), 0) FROM trade_recommendations
        WHERE wallet = $1
          AND status = $2
          AND executed_at >= $3
          AND NOT (tranche_count IS NOT NULL AND tranche_index IS NULL)
        "#,
    )
    .bind(wallet)
    .bind(recommendation_status::EXECUTED)
    .bind(since)
    .fetch_one(pool)
    .await?;

    Ok(row.0.unwrap_or(Decimal::ZERO))
}

/// Pending volume for a wallet created since `since`. Ladder parents are
/// skipped like in `sum_executed_since`.
pub async fn sum_pending_since(
    pool: &PgPool,
    wallet: &str,
    since: DateTime<Utc>,
) -> anyhow::Result<Decimal> {
    let row: (Option<Decimal>,) = sqlx::query_as(
        r#"
        SELECT COALESCE(SUM(size), 0) FROM trade_recommendations
        WHERE wallet = $1
          AND status = $2
          AND created_at >= $3
          AND NOT (tranche_count IS NOT NULL AND tranche_index IS NULL)
        "#,
    )
    .bind(wallet)
    .bind(recommendation_status::PENDING)
    .bind(since)
    .fetch_one(pool)
    .await?;

    Ok(row.0.unwrap_or(Decimal::ZERO))
}
