//! Prediction service
//!
//! Entry point for serving: resolves a reference through the version cache,
//! loading it on a miss, and runs a single-row prediction.

use crate::cache::VersionCache;
use crate::loader::ModelLoader;
use crate::predictor::Predictor;
use modelgate_core::{Error, FeatureRow, Label, ModelReference, Result};
use std::sync::Arc;
use tracing::{info, warn};

/// Cache of loaded predictors
pub type PredictorCache = VersionCache<Arc<dyn Predictor>>;

/// Resolves references to cached predictors and runs predictions
pub struct PredictionService {
    cache: Arc<PredictorCache>,
    loader: Arc<ModelLoader>,
    default_reference: ModelReference,
    default_model_name: String,
}

impl PredictionService {
    /// Create a service
    ///
    /// `default_reference` answers requests that name no model;
    /// `default_model_name` is the registered model behind version routes.
    pub fn new(
        loader: Arc<ModelLoader>,
        cache: Arc<PredictorCache>,
        default_reference: ModelReference,
        default_model_name: impl Into<String>,
    ) -> Self {
        Self {
            cache,
            loader,
            default_reference,
            default_model_name: default_model_name.into(),
        }
    }

    pub fn default_reference(&self) -> &ModelReference {
        &self.default_reference
    }

    pub fn default_model_name(&self) -> &str {
        &self.default_model_name
    }

    pub fn loader(&self) -> &Arc<ModelLoader> {
        &self.loader
    }

    /// Predict with `reference`, or the default model when `None`
    pub async fn predict(&self, reference: Option<&str>, features: &FeatureRow) -> Result<Label> {
        let result = self.predict_inner(reference, features).await;

        let outcome = match &result {
            Ok(_) => "ok",
            Err(Error::ModelUnavailable(_)) => "unavailable",
            Err(Error::InvalidInput(_)) => "invalid_input",
            Err(_) => "error",
        };
        metrics::counter!("modelgate_predictions_total", "outcome" => outcome).increment(1);

        result
    }

    /// Predict with version `version` of the default registered model
    pub async fn predict_version(&self, version: &str, features: &FeatureRow) -> Result<Label> {
        let reference = ModelReference::registry(self.default_model_name.as_str(), version);
        self.predict(Some(&reference.canonical()), features).await
    }

    async fn predict_inner(&self, reference: Option<&str>, features: &FeatureRow) -> Result<Label> {
        let reference = match reference {
            Some(raw) => ModelReference::parse(raw)
                .map_err(|e| Error::model_unavailable(e.to_string()))?,
            None => self.default_reference.clone(),
        };

        let predictor = self.resolve(&reference).await?;
        let labels = predictor.predict(std::slice::from_ref(features))?;

        labels
            .into_iter()
            .next()
            .ok_or_else(|| Error::internal(format!("{} returned no prediction", reference)))
    }

    /// Cached predictor for `reference`, loading it on a miss
    pub async fn resolve(&self, reference: &ModelReference) -> Result<Arc<dyn Predictor>> {
        let key = reference.canonical();
        self.cache
            .get_or_load(&key, || self.loader.load_reference(reference))
            .await
            .map_err(|e| Error::model_unavailable(format!("{} could not be loaded: {}", key, e)))
    }

    /// Pre-resolve the default model; failure is logged, not fatal
    pub async fn warm_up(&self) -> bool {
        match self.resolve(&self.default_reference).await {
            Ok(predictor) => {
                info!(
                    "Default model {} ready ({})",
                    self.default_reference,
                    predictor.name()
                );
                true
            }
            Err(e) => {
                warn!("Default model not loaded at startup: {}", e);
                false
            }
        }
    }

    /// Whether the default model is cached
    pub fn is_default_loaded(&self) -> bool {
        self.cache.contains(&self.default_reference.canonical())
    }

    /// Canonical references of every cached model
    pub fn cached_models(&self) -> Vec<String> {
        self.cache.keys()
    }
}
