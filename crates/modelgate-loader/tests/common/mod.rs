//! Shared fixtures for loader integration tests
//!
//! Mock registry and object store implementations with call counters, plus
//! builders for pickled estimators, model bundles and tarballs.

#![allow(dead_code)]

use async_trait::async_trait;
use modelgate_core::{Error, FeatureRow, Label, Result, StorageLocation};
use modelgate_loader::{
    ArtifactFetcher, Credentials, Estimator, EstimatorKind, ModelLoader, ModelRegistry,
    ModelVersion, ObjectStore, ScratchSpace, Tree,
};
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;
use std::time::Duration;

pub const IRIS_COLUMNS: [&str; 4] = [
    "sepal length (cm)",
    "sepal width (cm)",
    "petal length (cm)",
    "petal width (cm)",
];

/// Decision tree over the iris columns: setosa (0), versicolor (1), virginica (2)
pub fn iris_estimator() -> Estimator {
    Estimator::new(EstimatorKind::DecisionTreeClassifier {
        classes: vec![Label::Int(0), Label::Int(1), Label::Int(2)],
        tree: Tree {
            children_left: vec![1, -1, 3, -1, -1],
            children_right: vec![2, -1, 4, -1, -1],
            feature: vec![2, -2, 3, -2, -2],
            threshold: vec![2.45, -2.0, 1.75, -2.0, -2.0],
            value: vec![
                vec![50.0, 50.0, 50.0],
                vec![50.0, 0.0, 0.0],
                vec![0.0, 50.0, 50.0],
                vec![0.0, 49.0, 5.0],
                vec![0.0, 1.0, 45.0],
            ],
        },
    })
    .with_feature_names(IRIS_COLUMNS)
}

/// The iris sample row (a setosa)
pub fn iris_features() -> FeatureRow {
    serde_json::json!({
        "sepal length (cm)": 5.1,
        "sepal width (cm)": 3.5,
        "petal length (cm)": 1.4,
        "petal width (cm)": 0.2
    })
    .as_object()
    .cloned()
    .unwrap()
}

pub fn pickle(estimator: &Estimator) -> Vec<u8> {
    serde_pickle::to_vec(estimator, serde_pickle::SerOptions::new()).unwrap()
}

/// `MLmodel` descriptor for a pickled model with the iris signature
pub fn iris_descriptor() -> String {
    let columns: Vec<_> = IRIS_COLUMNS
        .iter()
        .map(|name| serde_json::json!({"type": "double", "name": name, "required": true}))
        .collect();
    let inputs = serde_json::to_string(&columns).unwrap();

    format!(
        "artifact_path: model\n\
         flavors:\n  \
           python_function:\n    \
             loader_module: mlflow.sklearn\n    \
             model_path: model.pkl\n  \
           sklearn:\n    \
             pickled_model: model.pkl\n    \
             serialization_format: cloudpickle\n\
         signature:\n  \
           inputs: '{}'\n",
        inputs
    )
}

/// Files of a structured iris bundle, relative to the bundle root
pub fn iris_bundle_files() -> Vec<(String, Vec<u8>)> {
    vec![
        ("MLmodel".to_string(), iris_descriptor().into_bytes()),
        ("model.pkl".to_string(), pickle(&iris_estimator())),
        ("requirements.txt".to_string(), b"scikit-learn==1.3.0\n".to_vec()),
    ]
}

/// Write files under `dir`, creating parent directories
pub fn write_files(dir: &Path, files: &[(String, Vec<u8>)]) {
    for (name, contents) in files {
        let path = dir.join(name);
        std::fs::create_dir_all(path.parent().unwrap()).unwrap();
        std::fs::write(path, contents).unwrap();
    }
}

/// Build a gzip-compressed tarball from `(path, contents)` entries
pub fn tar_gz(files: &[(String, Vec<u8>)]) -> Vec<u8> {
    let encoder = flate2::write::GzEncoder::new(Vec::new(), flate2::Compression::default());
    let mut builder = tar::Builder::new(encoder);

    for (name, contents) in files {
        let mut header = tar::Header::new_gnu();
        header.set_size(contents.len() as u64);
        header.set_mode(0o644);
        header.set_cksum();
        builder.append_data(&mut header, name, contents.as_slice()).unwrap();
    }

    builder.into_inner().unwrap().finish().unwrap()
}

/// Prefix every file name with `prefix/`
pub fn under(prefix: &str, files: Vec<(String, Vec<u8>)>) -> Vec<(String, Vec<u8>)> {
    files
        .into_iter()
        .map(|(name, contents)| (format!("{}/{}", prefix, name), contents))
        .collect()
}

/// In-memory object store
#[derive(Default)]
pub struct MockObjectStore {
    objects: HashMap<(String, String), Vec<u8>>,
    latency: Option<Duration>,
    deny_list: bool,
    download_count: AtomicU32,
}

impl MockObjectStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Store an object
    pub fn with_object(mut self, bucket: &str, key: &str, contents: Vec<u8>) -> Self {
        self.objects
            .insert((bucket.to_string(), key.to_string()), contents);
        self
    }

    /// Store a directory-shaped artifact under `prefix`
    pub fn with_directory(mut self, bucket: &str, prefix: &str, files: Vec<(String, Vec<u8>)>) -> Self {
        for (name, contents) in files {
            self.objects
                .insert((bucket.to_string(), format!("{}/{}", prefix, name)), contents);
        }
        self
    }

    /// Delay every download
    pub fn with_latency(mut self, latency: Duration) -> Self {
        self.latency = Some(latency);
        self
    }

    /// Reject every listing, as a store without ListBucket permission does
    pub fn deny_list(mut self) -> Self {
        self.deny_list = true;
        self
    }

    /// Number of download calls, including misses
    pub fn download_count(&self) -> u32 {
        self.download_count.load(Ordering::Relaxed)
    }
}

#[async_trait]
impl ObjectStore for MockObjectStore {
    async fn download(
        &self,
        location: &StorageLocation,
        _credentials: Option<&Credentials>,
        dest: &Path,
    ) -> Result<u64> {
        self.download_count.fetch_add(1, Ordering::Relaxed);
        if let Some(latency) = self.latency {
            tokio::time::sleep(latency).await;
        }

        let contents = self
            .objects
            .get(&(location.bucket.clone(), location.key.clone()))
            .ok_or_else(|| Error::not_found(format!("object {} does not exist", location)))?;
        tokio::fs::write(dest, contents).await?;
        Ok(contents.len() as u64)
    }

    async fn list(
        &self,
        location: &StorageLocation,
        _credentials: Option<&Credentials>,
    ) -> Result<Vec<String>> {
        if self.deny_list {
            return Err(Error::fetch(format!("access denied listing {}", location)));
        }
        let prefix = format!("{}/", location.key.trim_end_matches('/'));
        let mut keys: Vec<String> = self
            .objects
            .keys()
            .filter(|(bucket, key)| *bucket == location.bucket && key.starts_with(&prefix))
            .map(|(_, key)| key.clone())
            .collect();
        keys.sort();
        Ok(keys)
    }
}

/// In-memory registry
#[derive(Default)]
pub struct MockRegistry {
    uris: HashMap<(String, String), String>,
    bundles: HashMap<(String, String), Vec<(String, Vec<u8>)>>,
    latency: Option<Duration>,
    download_uri_count: AtomicU32,
    download_model_count: AtomicU32,
}

impl MockRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a version stored at `uri`
    pub fn with_version(mut self, name: &str, version: &str, uri: &str) -> Self {
        self.uris
            .insert((name.to_string(), version.to_string()), uri.to_string());
        self
    }

    /// Serve a bundle for a registered version through the registry itself
    pub fn with_bundle(mut self, name: &str, version: &str, files: Vec<(String, Vec<u8>)>) -> Self {
        self.bundles
            .insert((name.to_string(), version.to_string()), files);
        self
    }

    /// Delay every call
    pub fn with_latency(mut self, latency: Duration) -> Self {
        self.latency = Some(latency);
        self
    }

    pub fn download_uri_count(&self) -> u32 {
        self.download_uri_count.load(Ordering::Relaxed)
    }

    pub fn download_model_count(&self) -> u32 {
        self.download_model_count.load(Ordering::Relaxed)
    }

    async fn delay(&self) {
        if let Some(latency) = self.latency {
            tokio::time::sleep(latency).await;
        }
    }
}

#[async_trait]
impl ModelRegistry for MockRegistry {
    async fn download_uri(&self, name: &str, version: &str) -> Result<String> {
        self.download_uri_count.fetch_add(1, Ordering::Relaxed);
        self.delay().await;

        self.uris
            .get(&(name.to_string(), version.to_string()))
            .cloned()
            .ok_or_else(|| Error::not_found(format!("model '{}' version {}", name, version)))
    }

    async fn list_versions(&self, name: &str) -> Result<Vec<ModelVersion>> {
        self.delay().await;

        Ok(self
            .uris
            .iter()
            .filter(|((model, _), _)| model == name)
            .map(|((model, version), uri)| ModelVersion {
                name: model.clone(),
                version: version.clone(),
                current_stage: None,
                source: Some(uri.clone()),
                status: Some("READY".to_string()),
            })
            .collect())
    }

    async fn download_model(&self, name: &str, version: &str, dest: &Path) -> Result<PathBuf> {
        self.download_model_count.fetch_add(1, Ordering::Relaxed);
        let uri = self.download_uri(name, version).await?;

        let files = self
            .bundles
            .get(&(name.to_string(), version.to_string()))
            .ok_or_else(|| {
                Error::unsupported_format(format!("artifact URI {} is not served by the registry", uri))
            })?;
        write_files(dest, files);
        Ok(dest.to_path_buf())
    }
}

/// Build a loader over mocks with a private scratch space
pub fn loader(registry: Arc<MockRegistry>, store: Arc<MockObjectStore>) -> ModelLoader {
    let scratch = Arc::new(ScratchSpace::new(None).unwrap());
    let fetcher = ArtifactFetcher::new(store, scratch, Duration::from_secs(30));
    ModelLoader::new(registry, fetcher, None)
}
