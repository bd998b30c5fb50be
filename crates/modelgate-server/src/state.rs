//! Shared application state

use crate::config::ServerConfig;
use metrics_exporter_prometheus::PrometheusHandle;
use modelgate_loader::{ModelLoader, PredictionService, PredictorCache};
use std::sync::Arc;
use tracing::info;

/// Shared application state
#[derive(Clone)]
pub struct AppState {
    /// Cache-backed prediction service
    pub service: Arc<PredictionService>,

    /// Prometheus metrics handle for rendering
    pub metrics_handle: PrometheusHandle,
}

impl AppState {
    /// Build the loader, cache and service from configuration
    pub fn new(config: &ServerConfig, metrics_handle: PrometheusHandle) -> anyhow::Result<Self> {
        let loader = ModelLoader::from_config(&config.loader)?;
        info!("Load strategies: {}", loader.strategy_names().join(", "));

        let default_reference = config.model.default_reference()?;
        info!("Default model: {}", default_reference);

        let service = PredictionService::new(
            Arc::new(loader),
            Arc::new(PredictorCache::new()),
            default_reference,
            config.model.name.as_str(),
        );

        Ok(Self::with_service(service, metrics_handle))
    }

    /// Wrap an existing service
    pub fn with_service(service: PredictionService, metrics_handle: PrometheusHandle) -> Self {
        Self {
            service: Arc::new(service),
            metrics_handle,
        }
    }
}
