//! Model registry client
//!
//! The registry maps `(name, version)` pairs to the physical location of a
//! model's artifacts and can serve the artifacts itself through its artifact
//! proxy.

use crate::config::RegistryConfig;
use crate::fetcher::safe_join;
use async_trait::async_trait;
use futures::StreamExt;
use modelgate_core::reference::LATEST_VERSION;
use modelgate_core::{Error, Result};
use serde::Deserialize;
use std::path::{Path, PathBuf};
use tokio::io::AsyncWriteExt;
use tracing::debug;

/// URI scheme of artifacts served by the registry's artifact proxy
pub const REGISTRY_ARTIFACT_SCHEME: &str = "mlflow-artifacts:";

/// One registered version of a model
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct ModelVersion {
    pub name: String,
    pub version: String,

    #[serde(default)]
    pub current_stage: Option<String>,

    #[serde(default)]
    pub source: Option<String>,

    #[serde(default)]
    pub status: Option<String>,
}

/// Read-only access to model registry metadata and artifacts
#[async_trait]
pub trait ModelRegistry: Send + Sync {
    /// Physical artifact URI of a model version
    async fn download_uri(&self, name: &str, version: &str) -> Result<String>;

    /// Every registered version of a model
    async fn list_versions(&self, name: &str) -> Result<Vec<ModelVersion>>;

    /// Download a model version's artifacts into `dest` through the registry
    ///
    /// Returns the directory holding the model bundle.
    async fn download_model(&self, name: &str, version: &str, dest: &Path) -> Result<PathBuf>;
}

/// Replace the `latest` alias with the highest numeric registered version
pub async fn resolve_version(
    registry: &dyn ModelRegistry,
    name: &str,
    version: &str,
) -> Result<String> {
    if version != LATEST_VERSION {
        return Ok(version.to_string());
    }

    let latest = registry
        .list_versions(name)
        .await?
        .into_iter()
        .filter_map(|v| v.version.parse::<u64>().ok())
        .max()
        .ok_or_else(|| Error::not_found(format!("model '{}' has no versions", name)))?;

    debug!("Resolved {} version '{}' to {}", name, LATEST_VERSION, latest);
    Ok(latest.to_string())
}

/// Strip the registry artifact scheme, returning the artifact path
pub fn registry_artifact_path(uri: &str) -> Option<&str> {
    let rest = uri.strip_prefix(REGISTRY_ARTIFACT_SCHEME)?;
    // `mlflow-artifacts://host:port/path` names the serving host explicitly
    let path = match rest.strip_prefix("//") {
        Some(authority_and_path) => authority_and_path.find('/').map(|i| &authority_and_path[i..])?,
        None => rest,
    };
    Some(path.trim_start_matches('/'))
}

#[derive(Debug, Deserialize)]
struct DownloadUriResponse {
    artifact_uri: String,
}

#[derive(Debug, Deserialize)]
struct SearchResponse {
    #[serde(default)]
    model_versions: Vec<ModelVersion>,
    #[serde(default)]
    next_page_token: Option<String>,
}

#[derive(Debug, Deserialize)]
struct ListArtifactsResponse {
    #[serde(default)]
    files: Vec<ArtifactEntry>,
}

#[derive(Debug, Deserialize)]
struct ArtifactEntry {
    path: String,
    #[serde(default)]
    is_dir: bool,
}

#[derive(Debug, Default, Deserialize)]
struct ErrorResponse {
    #[serde(default)]
    error_code: Option<String>,
    #[serde(default)]
    message: Option<String>,
}

/// Registry client for the MLflow tracking server REST API
pub struct MlflowRegistry {
    client: reqwest::Client,
    base_url: String,
}

impl MlflowRegistry {
    /// Create a client for the configured tracking server
    pub fn new(config: &RegistryConfig) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(config.timeout())
            .build()
            .map_err(|e| Error::config(format!("Failed to build registry client: {}", e)))?;

        Ok(Self {
            client,
            base_url: config.tracking_uri.trim_end_matches('/').to_string(),
        })
    }

    /// Tracking server base URL
    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    fn url(&self, path: &str) -> String {
        format!("{}{}", self.base_url, path)
    }

    async fn get_json<T: serde::de::DeserializeOwned>(
        &self,
        path: &str,
        query: &[(&str, &str)],
        what: &str,
    ) -> Result<T> {
        let response = self.send(path, query, what).await?;
        response
            .json::<T>()
            .await
            .map_err(|e| Error::fetch(format!("Invalid registry response for {}: {}", what, e)))
    }

    async fn send(&self, path: &str, query: &[(&str, &str)], what: &str) -> Result<reqwest::Response> {
        let response = self
            .client
            .get(self.url(path))
            .query(query)
            .send()
            .await
            .map_err(|e| Error::fetch(format!("Registry request for {} failed: {}", what, e)))?;

        let status = response.status();
        if status.is_success() {
            return Ok(response);
        }

        let body: ErrorResponse = response.json().await.unwrap_or_default();
        let detail = body.message.unwrap_or_else(|| status.to_string());
        let missing = status == reqwest::StatusCode::NOT_FOUND
            || matches!(
                body.error_code.as_deref(),
                Some("RESOURCE_DOES_NOT_EXIST") | Some("INVALID_PARAMETER_VALUE")
            );

        if missing {
            Err(Error::not_found(format!("{}: {}", what, detail)))
        } else {
            Err(Error::fetch(format!("Registry error for {} ({}): {}", what, status, detail)))
        }
    }

    async fn list_artifacts(&self, path: &str) -> Result<Vec<ArtifactEntry>> {
        let listing: ListArtifactsResponse = self
            .get_json(
                "/api/2.0/mlflow-artifacts/artifacts",
                &[("path", path)],
                &format!("artifacts under {}", path),
            )
            .await?;
        Ok(listing.files)
    }

    async fn download_file(&self, path: &str, dest: &Path) -> Result<u64> {
        let response = self
            .send(
                &format!("/api/2.0/mlflow-artifacts/artifacts/{}", path),
                &[],
                &format!("artifact {}", path),
            )
            .await?;

        if let Some(parent) = dest.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }
        let mut file = tokio::fs::File::create(dest).await?;
        let mut stream = response.bytes_stream();
        let mut written = 0u64;

        while let Some(chunk) = stream.next().await {
            let chunk =
                chunk.map_err(|e| Error::fetch(format!("Failed to read artifact {}: {}", path, e)))?;
            file.write_all(&chunk).await?;
            written += chunk.len() as u64;
        }
        file.flush().await?;

        Ok(written)
    }
}

/// `name=` search filter quoting `name` as the registry's filter grammar allows
///
/// Quoted values are taken verbatim between the outer quotes, so a name
/// holding a single quote is wrapped in double quotes instead.
fn name_filter(name: &str) -> Result<String> {
    match (name.contains('\''), name.contains('"')) {
        (false, _) => Ok(format!("name='{}'", name)),
        (true, false) => Ok(format!("name=\"{}\"", name)),
        (true, true) => Err(Error::invalid_reference(format!(
            "model name {} mixes both quote characters and cannot be searched",
            name
        ))),
    }
}

#[async_trait]
impl ModelRegistry for MlflowRegistry {
    async fn download_uri(&self, name: &str, version: &str) -> Result<String> {
        let response: DownloadUriResponse = self
            .get_json(
                "/api/2.0/mlflow/model-versions/get-download-uri",
                &[("name", name), ("version", version)],
                &format!("model '{}' version {}", name, version),
            )
            .await?;
        Ok(response.artifact_uri)
    }

    async fn list_versions(&self, name: &str) -> Result<Vec<ModelVersion>> {
        let filter = name_filter(name)?;
        let mut versions = Vec::new();
        let mut page_token: Option<String> = None;

        loop {
            let mut query = vec![("filter", filter.as_str())];
            if let Some(token) = page_token.as_deref() {
                query.push(("page_token", token));
            }

            let page: SearchResponse = self
                .get_json(
                    "/api/2.0/mlflow/model-versions/search",
                    &query,
                    &format!("versions of model '{}'", name),
                )
                .await?;
            versions.extend(page.model_versions);

            match page.next_page_token.filter(|t| !t.is_empty()) {
                Some(token) => page_token = Some(token),
                None => break,
            }
        }

        Ok(versions)
    }

    async fn download_model(&self, name: &str, version: &str, dest: &Path) -> Result<PathBuf> {
        let uri = self.download_uri(name, version).await?;
        let root = registry_artifact_path(&uri).ok_or_else(|| {
            Error::unsupported_format(format!("artifact URI {} is not served by the registry", uri))
        })?;

        // Walk the artifact tree, mirroring it under `dest`
        let mut pending = vec![(root.to_string(), String::new())];
        let mut total = 0u64;
        let mut files = 0usize;

        while let Some((remote, local)) = pending.pop() {
            for entry in self.list_artifacts(&remote).await? {
                let name = entry.path.rsplit('/').next().unwrap_or(&entry.path).to_string();
                let remote_child = format!("{}/{}", remote.trim_end_matches('/'), name);
                let local_child = if local.is_empty() {
                    name
                } else {
                    format!("{}/{}", local, name)
                };

                if entry.is_dir {
                    pending.push((remote_child, local_child));
                } else {
                    let target = safe_join(dest, &local_child)?;
                    total += self.download_file(&remote_child, &target).await?;
                    files += 1;
                }
            }
        }

        if files == 0 {
            return Err(Error::not_found(format!("no artifacts stored at {}", uri)));
        }

        metrics::counter!("modelgate_fetch_bytes_total").increment(total);
        debug!(
            "Downloaded {} files ({} bytes) for model '{}' version {}",
            files, total, name, version
        );
        Ok(dest.to_path_buf())
    }
}
