//! Logging and metrics initialization

use anyhow::Result;
use metrics_exporter_prometheus::PrometheusHandle;
use tracing::info;

/// Initialize tracing/logging
pub fn init_tracing(verbose: bool, json: bool) {
    use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

    let filter = if verbose {
        EnvFilter::new("modelgate=debug,tower_http=debug")
    } else {
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("modelgate=info"))
    };

    let registry = tracing_subscriber::registry().with(filter);
    if json {
        registry.with(tracing_subscriber::fmt::layer().json()).init();
    } else {
        registry.with(tracing_subscriber::fmt::layer()).init();
    }
}

/// Initialize metrics exporter and return handle for rendering
pub fn init_metrics() -> Result<PrometheusHandle> {
    use metrics_exporter_prometheus::PrometheusBuilder;

    let handle = PrometheusBuilder::new()
        .install_recorder()
        .map_err(|e| anyhow::anyhow!("Failed to install metrics: {}", e))?;

    describe_metrics();
    info!("Metrics exporter initialized");
    Ok(handle)
}

fn describe_metrics() {
    metrics::describe_counter!(
        "modelgate_predictions_total",
        "Total number of prediction requests by outcome"
    );
    metrics::describe_counter!(
        "modelgate_cache_lookups_total",
        "Version cache lookups by result (hit or miss)"
    );
    metrics::describe_histogram!(
        "modelgate_model_load_latency_us",
        metrics::Unit::Microseconds,
        "Time to resolve, fetch and load a model in microseconds"
    );
    metrics::describe_counter!(
        "modelgate_fetch_bytes_total",
        metrics::Unit::Bytes,
        "Bytes downloaded from object storage and the registry"
    );
}
