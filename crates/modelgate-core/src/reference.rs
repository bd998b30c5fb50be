//! Model reference parsing
//!
//! A model is addressed by one of three reference grammars:
//!
//! - `models:/<name>/<version>` - a version in the model registry
//! - `artifact:s3:<host>:<port>:<bucket>:<key>` - an object on an explicit
//!   S3-compatible endpoint (the form workflow engines emit for MinIO)
//! - `s3://<bucket>/<key>` - an object on the default object-storage service
//!
//! Parsed references compare and hash by their canonical string form, which
//! is also the key used by the model cache.

use crate::error::{Error, Result};
use std::fmt;
use std::hash::{Hash, Hasher};
use std::str::FromStr;

const REGISTRY_PREFIX: &str = "models:/";
const ARTIFACT_S3_PREFIX: &str = "artifact:s3:";
const S3_PREFIX: &str = "s3://";

/// Version alias resolved through the registry's version listing
pub const LATEST_VERSION: &str = "latest";

/// Parsed form of a storage reference
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct StorageLocation {
    /// Object-storage endpoint URL; `None` means the default service
    pub endpoint: Option<String>,

    /// Bucket name (never empty)
    pub bucket: String,

    /// Object key (never empty, may contain `/` and `:`)
    pub key: String,
}

impl StorageLocation {
    /// Create a location on the default object-storage service
    pub fn new(bucket: impl Into<String>, key: impl Into<String>) -> Self {
        Self {
            endpoint: None,
            bucket: bucket.into(),
            key: key.into(),
        }
    }

    /// Set an explicit endpoint
    pub fn with_endpoint(mut self, endpoint: impl Into<String>) -> Self {
        self.endpoint = Some(endpoint.into());
        self
    }

    /// Parse a storage reference, rejecting registry references
    pub fn parse(uri: &str) -> Result<Self> {
        match ModelReference::parse(uri)? {
            ModelReference::Storage(location) => Ok(location),
            ModelReference::Registry { .. } => Err(Error::invalid_reference(format!(
                "expected an object-storage URI, got registry reference: {}",
                uri
            ))),
        }
    }

    /// Last path segment of the key, used as the local file name
    pub fn file_name(&self) -> &str {
        self.key
            .trim_end_matches('/')
            .rsplit('/')
            .next()
            .filter(|s| !s.is_empty())
            .unwrap_or("artifact")
    }

    fn canonical(&self) -> String {
        match &self.endpoint {
            Some(endpoint) => format!(
                "{}/{}/{}",
                endpoint.trim_end_matches('/'),
                self.bucket,
                self.key
            ),
            None => format!("{}{}/{}", S3_PREFIX, self.bucket, self.key),
        }
    }
}

impl fmt::Display for StorageLocation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.canonical())
    }
}

/// A logical model reference
#[derive(Debug, Clone)]
pub enum ModelReference {
    /// Registered model version
    Registry { name: String, version: String },

    /// Raw object-storage artifact
    Storage(StorageLocation),
}

impl ModelReference {
    /// Build a registry reference
    pub fn registry(name: impl Into<String>, version: impl Into<String>) -> Self {
        Self::Registry {
            name: name.into(),
            version: version.into(),
        }
    }

    /// Parse a reference string
    ///
    /// Name, version, bucket and key are taken exactly as written; no
    /// trimming or case folding is applied.
    pub fn parse(uri: &str) -> Result<Self> {
        if let Some(rest) = uri.strip_prefix(REGISTRY_PREFIX) {
            return parse_registry(uri, rest);
        }
        if let Some(rest) = uri.strip_prefix(ARTIFACT_S3_PREFIX) {
            return parse_artifact_s3(uri, rest);
        }
        if let Some(rest) = uri.strip_prefix(S3_PREFIX) {
            return parse_s3(uri, rest);
        }
        Err(Error::invalid_reference(format!(
            "unsupported scheme in '{}' (expected models:/, artifact:s3: or s3://)",
            uri
        )))
    }

    /// Canonical string form, used for equality, hashing and cache keys
    pub fn canonical(&self) -> String {
        match self {
            Self::Registry { name, version } => format!("{}{}/{}", REGISTRY_PREFIX, name, version),
            Self::Storage(location) => location.canonical(),
        }
    }

    /// Whether this is a registry reference
    pub fn is_registry(&self) -> bool {
        matches!(self, Self::Registry { .. })
    }

    /// Whether this registry reference uses the `latest` alias
    pub fn is_latest(&self) -> bool {
        matches!(self, Self::Registry { version, .. } if version == LATEST_VERSION)
    }

    /// Storage location, if this is a storage reference
    pub fn storage_location(&self) -> Option<&StorageLocation> {
        match self {
            Self::Storage(location) => Some(location),
            Self::Registry { .. } => None,
        }
    }
}

fn parse_registry(uri: &str, rest: &str) -> Result<ModelReference> {
    let (name, version) = rest
        .split_once('/')
        .ok_or_else(|| Error::invalid_reference(format!("missing version in '{}'", uri)))?;

    if name.is_empty() {
        return Err(Error::invalid_reference(format!("empty model name in '{}'", uri)));
    }
    if version.is_empty() {
        return Err(Error::invalid_reference(format!("empty model version in '{}'", uri)));
    }
    if version.contains('/') {
        return Err(Error::invalid_reference(format!(
            "unexpected path segments after version in '{}'",
            uri
        )));
    }

    Ok(ModelReference::registry(name, version))
}

fn parse_artifact_s3(uri: &str, rest: &str) -> Result<ModelReference> {
    // host:port:bucket:key, the key keeps any further colons
    let mut parts = rest.splitn(4, ':');
    let (host, port, bucket, key) = match (parts.next(), parts.next(), parts.next(), parts.next()) {
        (Some(host), Some(port), Some(bucket), Some(key)) => (host, port, bucket, key),
        _ => {
            return Err(Error::invalid_reference(format!(
                "expected artifact:s3:<host>:<port>:<bucket>:<key>, got '{}'",
                uri
            )))
        }
    };

    if host.is_empty() {
        return Err(Error::invalid_reference(format!("empty host in '{}'", uri)));
    }
    port.parse::<u16>()
        .map_err(|_| Error::invalid_reference(format!("invalid port '{}' in '{}'", port, uri)))?;
    if bucket.is_empty() || key.is_empty() {
        return Err(Error::invalid_reference(format!("empty bucket or key in '{}'", uri)));
    }
    // The canonical form separates bucket and key with '/'
    if bucket.contains('/') {
        return Err(Error::invalid_reference(format!(
            "bucket '{}' in '{}' contains '/'",
            bucket, uri
        )));
    }

    Ok(ModelReference::Storage(
        StorageLocation::new(bucket, key).with_endpoint(format!("http://{}:{}", host, port)),
    ))
}

fn parse_s3(uri: &str, rest: &str) -> Result<ModelReference> {
    let (bucket, key) = rest.split_once('/').unwrap_or((rest, ""));
    if bucket.is_empty() || key.is_empty() {
        return Err(Error::invalid_reference(format!("empty bucket or key in '{}'", uri)));
    }
    Ok(ModelReference::Storage(StorageLocation::new(bucket, key)))
}

impl FromStr for ModelReference {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        Self::parse(s)
    }
}

impl fmt::Display for ModelReference {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.canonical())
    }
}

impl PartialEq for ModelReference {
    fn eq(&self, other: &Self) -> bool {
        self.canonical() == other.canonical()
    }
}

impl Eq for ModelReference {}

impl Hash for ModelReference {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.canonical().hash(state);
    }
}
