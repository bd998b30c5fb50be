//! modelgate Loader
//!
//! Turns model references into ready-to-invoke predictors.
//!
//! A lookup flows through these stages:
//! - Version cache: single-flight map from canonical reference to predictor
//! - Registry client: resolves `models:/` references to artifact locations
//! - Artifact fetcher: downloads and unpacks object-storage artifacts
//! - Predictor loader: ordered strategies for structured bundles and raw
//!   serialized estimators

pub mod cache;
pub mod config;
pub mod descriptor;
pub mod estimator;
pub mod fetcher;
pub mod format;
pub mod loader;
pub mod object_store;
pub mod pickle;
pub mod predictor;
pub mod registry;
pub mod scratch;
pub mod service;
pub mod sklearn;

pub use cache::VersionCache;
pub use config::{Credentials, LoaderConfig, RegistryConfig, StorageConfig};
pub use descriptor::{ColumnSpec, InputSchema, ModelDescriptor};
pub use estimator::{Estimator, EstimatorKind, Tree};
pub use fetcher::{ArtifactFetcher, LocalArtifact};
pub use format::{ModelFile, SerializedFormat};
pub use loader::{default_strategies, LoadSource, LoadStrategy, ModelLoader};
pub use object_store::{ObjectStore, S3ObjectStore};
pub use predictor::{Predictor, PredictorKind, RawPredictor, StructuredPredictor};
pub use registry::{MlflowRegistry, ModelRegistry, ModelVersion};
pub use scratch::ScratchSpace;
pub use service::{PredictionService, PredictorCache};

/// Prelude for convenient imports
pub mod prelude {
    pub use crate::config::LoaderConfig;
    pub use crate::loader::ModelLoader;
    pub use crate::predictor::{Predictor, PredictorKind};
    pub use crate::service::PredictionService;
    pub use modelgate_core::prelude::*;
}
