use std::net::SocketAddr;

use metrics::{counter, gauge, histogram};
use metrics_exporter_prometheus::PrometheusBuilder;

/// Install the Prometheus recorder and register all application metrics.
///
/// With a listen address the exporter also serves the scrape endpoint;
/// without one metrics are still recorded in-process.
pub fn init_metrics(listen: Option<SocketAddr>) -> anyhow::Result<()> {
    match listen {
        Some(addr) => {
            PrometheusBuilder::new().with_http_listener(addr).install()?;
            tracing::info!(%addr, "Prometheus exporter listening");
        }
        None => {
            PrometheusBuilder::new().install_recorder()?;
        }
    }

    // Pre-register counters so they appear even before the first increment.
    counter!("scoring_passes_total").absolute(0);
    counter!("pools_scored_total").absolute(0);
    counter!("recommendations_generated_total").absolute(0);
    counter!("constraint_violations_total").absolute(0);
    counter!("alerts_raised_total").absolute(0);
    counter!("recommendations_expired_total").absolute(0);

    gauge!("macro_regime_rank").set(0.0);

    // Histogram is lazily created on first record; force creation.
    histogram!("pass_duration_seconds").record(0.0);

    Ok(())
}
