use sqlx::PgPool;

use crate::models::ViabilityConfig;

/// Get the active viability config, if one is marked active.
pub async fn get_active_viability_config(pool: &PgPool) -> anyhow::Result<Option<ViabilityConfig>> {
    let config = sqlx::query_as::<_, ViabilityConfig>(
        "SELECT * FROM viability_configs WHERE is_active ORDER BY version DESC LIMIT 1",
    )
    .fetch_optional(pool)
    .await?;

    Ok(config)
}

/// Insert a new config version. Activating it deactivates every other row.
pub async fn insert_viability_config(
    pool: &PgPool,
    config: &ViabilityConfig,
    activate: bool,
) -> anyhow::Result<ViabilityConfig> {
    let mut tx = pool.begin().await?;

    if activate {
        sqlx::query("UPDATE viability_configs SET is_active = FALSE WHERE is_active")
            .execute(&mut *tx)
            .await?;
    }

    let row = sqlx::query_as::<_, ViabilityConfig>(
        r#"
        INSERT INTO viability_configs (
            version, is_active,
            min_reserve, min_emission_share, min_age_days, min_holders,
            max_drawdown_30d, max_negative_flow_ratio, age_cap_days,
            weight_reserve, weight_net_flow, weight_emission,
            weight_price_trend, weight_drawdown, weight_age,
            tier_1_cutoff, tier_2_cutoff, tier_3_cutoff
        )
        VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13, $14, $15, $16, $17, $18)
        RETURNING *
        "#,
    )
    .bind(config.version)
    .bind(activate)
    .bind(config.min_reserve)
    .bind(config.min_emission_share)
    .bind(config.min_age_days)
    .bind(config.min_holders)
    .bind(config.max_drawdown_30d)
    .bind(config.max_negative_flow_ratio)
    .bind(config.age_cap_days)
    .bind(config.weight_reserve)
    .bind(config.weight_net_flow)
    .bind(config.weight_emission)
    .bind(config.weight_price_trend)
    .bind(config.weight_drawdown)
    .bind(config.weight_age)
    .bind(config.tier_1_cutoff)
    .bind(config.tier_2_cutoff)
    .bind(config.tier_3_cutoff)
    .fetch_one(&mut *tx)
    .await?;

    tx.commit().await?;
    Ok(row)
}
