//! Loader configuration structures

use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::PathBuf;
use std::time::Duration;

/// Configuration for resolving, fetching and loading models
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct LoaderConfig {
    /// Model registry (tracking server) settings
    #[serde(default)]
    pub registry: RegistryConfig,

    /// Object storage settings
    #[serde(default)]
    pub storage: StorageConfig,

    /// Parent directory for scratch space (system temp dir when unset)
    #[serde(default)]
    pub scratch_dir: Option<PathBuf>,
}

/// Model registry configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RegistryConfig {
    /// Tracking server base URL
    #[serde(default = "default_tracking_uri")]
    pub tracking_uri: String,

    /// Timeout for each registry HTTP request
    #[serde(default = "default_registry_timeout")]
    pub timeout_secs: u64,
}

fn default_tracking_uri() -> String {
    "http://localhost:5000".to_string()
}

fn default_registry_timeout() -> u64 {
    30
}

impl Default for RegistryConfig {
    fn default() -> Self {
        Self {
            tracking_uri: default_tracking_uri(),
            timeout_secs: default_registry_timeout(),
        }
    }
}

impl RegistryConfig {
    /// Request timeout as a `Duration`
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }
}

/// Object storage configuration
#[derive(Clone, Serialize, Deserialize)]
pub struct StorageConfig {
    /// Endpoint for `s3://` references (AWS default when unset)
    #[serde(default)]
    pub endpoint_url: Option<String>,

    /// Signing region
    #[serde(default = "default_region")]
    pub region: String,

    /// Access key id (ambient credentials when unset)
    #[serde(default)]
    pub access_key_id: Option<String>,

    /// Secret access key (ambient credentials when unset)
    #[serde(default)]
    pub secret_access_key: Option<String>,

    /// Upper bound on a single artifact download
    #[serde(default = "default_fetch_timeout")]
    pub fetch_timeout_secs: u64,

    /// Use path-style addressing (required by MinIO)
    #[serde(default = "default_true")]
    pub force_path_style: bool,
}

fn default_region() -> String {
    "us-east-1".to_string()
}

fn default_fetch_timeout() -> u64 {
    300
}

fn default_true() -> bool {
    true
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            endpoint_url: None,
            region: default_region(),
            access_key_id: None,
            secret_access_key: None,
            fetch_timeout_secs: default_fetch_timeout(),
            force_path_style: true,
        }
    }
}

impl StorageConfig {
    /// Explicit credentials, when both halves are configured
    pub fn credentials(&self) -> Option<Credentials> {
        match (&self.access_key_id, &self.secret_access_key) {
            (Some(id), Some(secret)) => Some(Credentials::new(id.clone(), secret.clone())),
            _ => None,
        }
    }

    /// Fetch timeout as a `Duration`
    pub fn fetch_timeout(&self) -> Duration {
        Duration::from_secs(self.fetch_timeout_secs)
    }
}

impl fmt::Debug for StorageConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("StorageConfig")
            .field("endpoint_url", &self.endpoint_url)
            .field("region", &self.region)
            .field("access_key_id", &self.access_key_id)
            .field("secret_access_key", &self.secret_access_key.as_ref().map(|_| "***"))
            .field("fetch_timeout_secs", &self.fetch_timeout_secs)
            .field("force_path_style", &self.force_path_style)
            .finish()
    }
}

/// Static object-storage credentials
#[derive(Clone, PartialEq, Eq, Hash)]
pub struct Credentials {
    pub access_key_id: String,
    pub secret_access_key: String,
}

impl Credentials {
    /// Create a credential pair
    pub fn new(access_key_id: impl Into<String>, secret_access_key: impl Into<String>) -> Self {
        Self {
            access_key_id: access_key_id.into(),
            secret_access_key: secret_access_key.into(),
        }
    }
}

impl fmt::Debug for Credentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Credentials")
            .field("access_key_id", &self.access_key_id)
            .field("secret_access_key", &"***")
            .finish()
    }
}
