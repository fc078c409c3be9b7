use chrono::{DateTime, Utc};
use sqlx::{PgConnection, PgPool};
use uuid::Uuid;

use crate::models::alert::alert_status;
use crate::models::Alert;

/// Get every unresolved alert for a wallet.
pub async fn get_open_alerts(pool: &PgPool, wallet: &str) -> anyhow::Result<Vec<Alert>> {
    let alerts = sqlx::query_as::<_, Alert>(
        r#"
        SELECT * FROM alerts
        WHERE wallet = $1 AND status <> $2
        ORDER BY created_at DESC
        "#,
    )
    .bind(wallet)
    .bind(alert_status::RESOLVED)
    .fetch_all(pool)
    .await?;

    Ok(alerts)
}

/// Insert alerts on an open connection or transaction.
pub async fn insert_alerts(conn: &mut PgConnection, alerts: &[Alert]) -> anyhow::Result<()> {
    for a in alerts {
        sqlx::query(
            r#"
            INSERT INTO alerts (
                id, wallet, category, netuid, subject, severity,
                threshold, actual, message, status, created_at
            )
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11)
            "#,
        )
        .bind(a.id)
        .bind(&a.wallet)
        .bind(&a.category)
        .bind(a.netuid)
        .bind(&a.subject)
        .bind(&a.severity)
        .bind(a.threshold)
        .bind(a.actual)
        .bind(&a.message)
        .bind(&a.status)
        .bind(a.created_at)
        .execute(&mut *conn)
        .await?;
    }

    Ok(())
}

/// Acknowledge an active alert. Returns false when it was not active.
pub async fn acknowledge_alert(pool: &PgPool, id: Uuid, at: DateTime<Utc>) -> anyhow::Result<bool> {
    let result = sqlx::query(
        "UPDATE alerts SET status = $2, acknowledged_at = $3 WHERE id = $1 AND status = $4",
    )
    .bind(id)
    .bind(alert_status::ACKNOWLEDGED)
    .bind(at)
    .bind(alert_status::ACTIVE)
    .execute(pool)
    .await?;

    Ok(result.rows_affected() == 1)
}

/// Resolve the given alerts on an open connection or transaction.
pub async fn resolve_alerts(
    conn: &mut PgConnection,
    ids: &[Uuid],
    at: DateTime<Utc>,
) -> anyhow::Result<u64> {
    if ids.is_empty() {
        return Ok(0);
    }

    let result = sqlx::query(
        "UPDATE alerts SET status = $2, resolved_at = $3 WHERE id = ANY($1) AND status <> $2",
    )
    .bind(ids)
    .bind(alert_status::RESOLVED)
    .bind(at)
    .execute(&mut *conn)
    .await?;

    Ok(result.rows_affected())
}
