use subnet_treasury::config::AppConfig;
use subnet_treasury::db;
use subnet_treasury::metrics::init_metrics;
use subnet_treasury::services::constraint_monitor::run_constraint_monitor;
use subnet_treasury::services::rebalance_pass::run_rebalance_loop;
use subnet_treasury::services::recommendation_expiry::run_recommendation_expiry;
use subnet_treasury::services::scoring_pass::run_scoring_loop;
use subnet_treasury::services::WalletLocks;
use subnet_treasury::strategy::StrategyEngine;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();

    let config = AppConfig::from_env()?;
    init_tracing(config.log_json);
    init_metrics(config.metrics_addr)?;

    tracing::info!("Connecting to database...");
    let pool = db::init_pool(&config.database_url).await?;
    db::run_migrations(&pool).await?;
    tracing::info!("Database connected");

    let engine = StrategyEngine::new(config.strategy.clone());
    let locks = WalletLocks::new();

    if config.wallets.is_empty() {
        tracing::warn!("STRATEGY_WALLETS is empty; only the scoring and expiry loops will run");
    }

    // --- Universe scoring ---
    {
        let pool = pool.clone();
        let settings = config.strategy.clone();
        let defaults = config.viability_defaults.clone();
        let interval_secs = config.scoring_interval_secs;
        tokio::spawn(async move {
            run_scoring_loop(pool, settings, defaults, interval_secs).await;
        });
    }

    // --- Per-wallet loops ---
    if !config.wallets.is_empty() {
        let pool_m = pool.clone();
        let engine_m = engine.clone();
        let defaults_m = config.viability_defaults.clone();
        let wallets_m = config.wallets.clone();
        let locks_m = locks.clone();
        let event_rebalance = config.event_rebalance_enabled;
        let monitor_secs = config.monitor_interval_secs;
        tokio::spawn(async move {
            run_constraint_monitor(
                pool_m,
                engine_m,
                defaults_m,
                wallets_m,
                locks_m,
                event_rebalance,
                monitor_secs,
            )
            .await;
        });

        let pool_r = pool.clone();
        let defaults_r = config.viability_defaults.clone();
        let wallets_r = config.wallets.clone();
        let locks_r = locks.clone();
        let rebalance_secs = config.rebalance_interval_secs;
        tokio::spawn(async move {
            run_rebalance_loop(pool_r, engine, defaults_r, wallets_r, locks_r, rebalance_secs)
                .await;
        });

        tracing::info!(
            wallets = config.wallets.len(),
            monitor_secs,
            rebalance_secs,
            event_rebalance,
            "Wallet loops spawned"
        );
    }

    // --- Recommendation expiry ---
    {
        let pool = pool.clone();
        let interval_secs = config.expiry_interval_secs;
        tokio::spawn(async move {
            run_recommendation_expiry(pool, interval_secs).await;
        });
    }

    tokio::signal::ctrl_c().await?;
    tracing::info!("Shutdown signal received");
    pool.close().await;

    Ok(())
}

fn init_tracing(json: bool) {
    use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let registry = tracing_subscriber::registry().with(filter);

    if json {
        registry.with(fmt::layer().json()).init();
    } else {
        registry.with(fmt::layer()).init();
    }
}
