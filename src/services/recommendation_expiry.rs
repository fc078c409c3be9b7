use chrono::Utc;
use metrics::counter;
use sqlx::PgPool;
use tokio::time::{interval, Duration};

use crate::db::recommendation_repo;

/// Run the expiry sweep. Pending recommendations past their deadline are
/// marked expired; executed and already-expired rows are untouched.
pub async fn run_recommendation_expiry(pool: PgPool, interval_secs: u64) {
    let mut ticker = interval(Duration::from_secs(interval_secs));

    loop {
        ticker.tick().await;

        match recommendation_repo::expire_stale(&pool, Utc::now()).await {
            Ok(0) => {
                tracing::debug!("Recommendation expiry: nothing stale");
            }
            Ok(expired) => {
                counter!("recommendations_expired_total").increment(expired);
                tracing::info!(expired, "Expired stale recommendations");
            }
            Err(e) => {
                tracing::error!(error = %e, "Recommendation expiry: sweep failed");
            }
        }
    }
}
