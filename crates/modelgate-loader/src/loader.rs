//! Predictor loading
//!
//! [`ModelLoader`] turns a registry reference or a local artifact into a
//! ready [`Predictor`] by trying an ordered list of [`LoadStrategy`]s. Each
//! strategy declares which sources it applies to; failures are logged and
//! the next strategy is tried, and only the last error surfaces.

use crate::config::{Credentials, LoaderConfig};
use crate::descriptor::ModelDescriptor;
use crate::fetcher::{ArtifactFetcher, LocalArtifact};
use crate::format::find_model_file;
use crate::object_store::S3ObjectStore;
use crate::predictor::{Predictor, RawPredictor, StructuredPredictor};
use crate::registry::{resolve_version, MlflowRegistry, ModelRegistry};
use crate::scratch::ScratchSpace;
use async_trait::async_trait;
use modelgate_core::{Error, ModelReference, Result, StorageLocation};
use std::fmt;
use std::path::Path;
use std::sync::Arc;
use std::time::Instant;
use tracing::{debug, info, warn};

/// What a load starts from
#[derive(Debug, Clone)]
pub enum LoadSource {
    /// A registered model version, resolved through the registry
    Registry { name: String, version: String },
    /// An artifact already on the local filesystem
    Local(LocalArtifact),
}

impl LoadSource {
    pub fn is_registry(&self) -> bool {
        matches!(self, LoadSource::Registry { .. })
    }

    pub fn is_local(&self) -> bool {
        matches!(self, LoadSource::Local(_))
    }
}

impl fmt::Display for LoadSource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            LoadSource::Registry { name, version } => write!(f, "models:/{}/{}", name, version),
            LoadSource::Local(artifact) => write!(f, "{}", artifact.root().display()),
        }
    }
}

/// One way of turning a source into a predictor
#[async_trait]
pub trait LoadStrategy: Send + Sync {
    /// Strategy name used in logs
    fn name(&self) -> &'static str;

    /// Whether this strategy can handle `source`
    fn applies_to(&self, source: &LoadSource) -> bool;

    /// Attempt the load
    async fn load(&self, source: &LoadSource, loader: &ModelLoader) -> Result<Arc<dyn Predictor>>;
}

/// Loads model bundles through the registry's own artifact service
pub struct RegistryStructuredStrategy;

#[async_trait]
impl LoadStrategy for RegistryStructuredStrategy {
    fn name(&self) -> &'static str {
        "registry-structured"
    }

    fn applies_to(&self, source: &LoadSource) -> bool {
        source.is_registry()
    }

    async fn load(&self, source: &LoadSource, loader: &ModelLoader) -> Result<Arc<dyn Predictor>> {
        let LoadSource::Registry { name, version } = source else {
            return Err(Error::internal("registry strategy given a local source"));
        };

        let dest = loader.fetcher().scratch().allocate("registry-")?;
        let root = loader.registry().download_model(name, version, &dest).await?;

        let predictor = blocking(move || load_bundle(&root)).await?;
        Ok(Arc::new(predictor))
    }
}

/// Resolves a registry reference to object storage and loads the fetched
/// artifact with the local strategies
pub struct RegistryStorageStrategy;

#[async_trait]
impl LoadStrategy for RegistryStorageStrategy {
    fn name(&self) -> &'static str {
        "registry-storage"
    }

    fn applies_to(&self, source: &LoadSource) -> bool {
        source.is_registry()
    }

    async fn load(&self, source: &LoadSource, loader: &ModelLoader) -> Result<Arc<dyn Predictor>> {
        let LoadSource::Registry { name, version } = source else {
            return Err(Error::internal("registry strategy given a local source"));
        };

        let uri = loader.registry().download_uri(name, version).await?;
        debug!("{} is stored at {}", source, uri);
        let location = StorageLocation::parse(&uri)?;

        loader.load_location(&location).await
    }
}

/// Loads a bundle described by an `MLmodel` file at the artifact root
pub struct DescriptorStrategy;

#[async_trait]
impl LoadStrategy for DescriptorStrategy {
    fn name(&self) -> &'static str {
        "descriptor"
    }

    fn applies_to(&self, source: &LoadSource) -> bool {
        source.is_local()
    }

    async fn load(&self, source: &LoadSource, _loader: &ModelLoader) -> Result<Arc<dyn Predictor>> {
        let LoadSource::Local(artifact) = source else {
            return Err(Error::internal("local strategy given a registry source"));
        };

        let root = artifact.root().to_path_buf();
        let predictor = blocking(move || load_bundle(&root)).await?;
        Ok(Arc::new(predictor))
    }
}

/// Scans the artifact for the first recognized serialized model file
pub struct SerializedScanStrategy;

#[async_trait]
impl LoadStrategy for SerializedScanStrategy {
    fn name(&self) -> &'static str {
        "serialized-scan"
    }

    fn applies_to(&self, source: &LoadSource) -> bool {
        source.is_local()
    }

    async fn load(&self, source: &LoadSource, _loader: &ModelLoader) -> Result<Arc<dyn Predictor>> {
        let LoadSource::Local(artifact) = source else {
            return Err(Error::internal("local strategy given a registry source"));
        };

        let root = artifact.root().to_path_buf();
        let predictor = blocking(move || {
            let file = find_model_file(&root)?.ok_or_else(|| {
                Error::unsupported_format(format!(
                    "no recognized model file under {}",
                    root.display()
                ))
            })?;
            debug!("Loading serialized model {}", file.path.display());
            file.read_estimator().map(RawPredictor::new)
        })
        .await?;

        Ok(Arc::new(predictor))
    }
}

/// Default strategy order
pub fn default_strategies() -> Vec<Box<dyn LoadStrategy>> {
    vec![
        Box::new(RegistryStructuredStrategy),
        Box::new(RegistryStorageStrategy),
        Box::new(DescriptorStrategy),
        Box::new(SerializedScanStrategy),
    ]
}

/// Load a structured bundle from `dir` (blocking)
fn load_bundle(dir: &Path) -> Result<StructuredPredictor> {
    let descriptor = ModelDescriptor::read_from(dir)?.ok_or_else(|| {
        Error::unsupported_format(format!("no model descriptor in {}", dir.display()))
    })?;

    let file = descriptor.model_file(dir)?;
    let schema = descriptor.input_schema()?;
    debug!("Loading structured model {}", file.path.display());
    let estimator = file.read_estimator()?;

    Ok(StructuredPredictor::new(estimator, schema))
}

async fn blocking<T, F>(f: F) -> Result<T>
where
    F: FnOnce() -> Result<T> + Send + 'static,
    T: Send + 'static,
{
    tokio::task::spawn_blocking(f)
        .await
        .map_err(|e| Error::internal(format!("Model load task failed: {}", e)))?
}

/// Resolves references and runs the load strategies
pub struct ModelLoader {
    registry: Arc<dyn ModelRegistry>,
    fetcher: ArtifactFetcher,
    credentials: Option<Credentials>,
    strategies: Vec<Box<dyn LoadStrategy>>,
}

impl ModelLoader {
    /// Create a loader with the default strategy order
    pub fn new(
        registry: Arc<dyn ModelRegistry>,
        fetcher: ArtifactFetcher,
        credentials: Option<Credentials>,
    ) -> Self {
        Self {
            registry,
            fetcher,
            credentials,
            strategies: default_strategies(),
        }
    }

    /// Create a loader talking to the configured registry and object store
    pub fn from_config(config: &LoaderConfig) -> Result<Self> {
        let scratch = Arc::new(ScratchSpace::new(config.scratch_dir.as_deref())?);
        let store = Arc::new(S3ObjectStore::new(config.storage.clone()));
        let fetcher = ArtifactFetcher::new(store, scratch, config.storage.fetch_timeout());
        let registry = Arc::new(MlflowRegistry::new(&config.registry)?);

        info!(
            "Model loader using registry {} and scratch space {}",
            config.registry.tracking_uri,
            fetcher.scratch().root().display()
        );

        Ok(Self::new(registry, fetcher, config.storage.credentials()))
    }

    /// Replace the strategy list
    pub fn with_strategies(mut self, strategies: Vec<Box<dyn LoadStrategy>>) -> Self {
        self.strategies = strategies;
        self
    }

    /// Strategy names in the order they are tried
    pub fn strategy_names(&self) -> Vec<&'static str> {
        self.strategies.iter().map(|s| s.name()).collect()
    }

    pub fn registry(&self) -> &Arc<dyn ModelRegistry> {
        &self.registry
    }

    pub fn fetcher(&self) -> &ArtifactFetcher {
        &self.fetcher
    }

    /// Object-storage credentials used for fetches
    pub fn credentials(&self) -> Option<&Credentials> {
        self.credentials.as_ref()
    }

    /// Try each applicable strategy in order
    pub async fn load(&self, source: LoadSource) -> Result<Arc<dyn Predictor>> {
        let mut last_error = None;

        for strategy in self.strategies.iter().filter(|s| s.applies_to(&source)) {
            match strategy.load(&source, self).await {
                Ok(predictor) => {
                    info!(
                        "Loaded {} predictor '{}' from {} via {}",
                        predictor.kind().as_str(),
                        predictor.name(),
                        source,
                        strategy.name()
                    );
                    return Ok(predictor);
                }
                Err(e) => {
                    warn!("Load strategy '{}' failed for {}: {}", strategy.name(), source, e);
                    last_error = Some(e);
                }
            }
        }

        Err(last_error.unwrap_or_else(|| {
            Error::unsupported_format(format!("no load strategy applies to {}", source))
        }))
    }

    /// Load from an artifact already on disk
    pub async fn load_local(&self, artifact: LocalArtifact) -> Result<Arc<dyn Predictor>> {
        self.load(LoadSource::Local(artifact)).await
    }

    /// Fetch an object-storage artifact and load it
    pub async fn load_location(&self, location: &StorageLocation) -> Result<Arc<dyn Predictor>> {
        let artifact = self.fetcher.fetch(location, self.credentials()).await?;
        self.load_local(artifact).await
    }

    /// Resolve any model reference to a predictor
    pub async fn load_reference(&self, reference: &ModelReference) -> Result<Arc<dyn Predictor>> {
        let start = Instant::now();

        let result = async {
            match reference {
                ModelReference::Registry { name, version } => {
                    let version = resolve_version(self.registry.as_ref(), name, version).await?;
                    self.load(LoadSource::Registry {
                        name: name.clone(),
                        version,
                    })
                    .await
                }
                ModelReference::Storage(location) => self.load_location(location).await,
            }
        }
        .await;

        let elapsed = start.elapsed();
        metrics::histogram!("modelgate_model_load_latency_us").record(elapsed.as_micros() as f64);
        match &result {
            Ok(_) => info!("Resolved {} in {:?}", reference, elapsed),
            Err(e) => warn!(error_kind = e.kind(), "Failed to resolve {}: {}", reference, e),
        }

        result
    }
}
