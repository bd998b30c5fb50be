//! Artifact fetching from object storage
//!
//! A fetch downloads the object behind a [`StorageLocation`] into a fresh
//! scratch directory, unpacks it when it is a gzip-compressed tarball, and
//! picks the directory the loader should treat as the artifact root.

use crate::config::Credentials;
use crate::object_store::ObjectStore;
use crate::scratch::ScratchSpace;
use flate2::read::GzDecoder;
use modelgate_core::{Error, Result, StorageLocation};
use std::ffi::OsString;
use std::fs::File;
use std::io::BufReader;
use std::path::{Component, Path, PathBuf};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{debug, info, warn};

/// A fetched artifact on the local filesystem
#[derive(Debug, Clone)]
pub struct LocalArtifact {
    root: PathBuf,
    scratch: Option<PathBuf>,
}

impl LocalArtifact {
    /// Wrap an existing local path (directory or single model file)
    pub fn from_path(path: impl Into<PathBuf>) -> Self {
        Self {
            root: path.into(),
            scratch: None,
        }
    }

    /// Directory (or file) the loader should inspect
    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Scratch directory this artifact was fetched into, if any
    pub fn scratch(&self) -> Option<&Path> {
        self.scratch.as_deref()
    }
}

enum Downloaded {
    /// A single object, stored under this file name
    File(OsString),
    /// Every object under a key prefix
    Directory,
}

/// Downloads and unpacks model artifacts
pub struct ArtifactFetcher {
    store: Arc<dyn ObjectStore>,
    scratch: Arc<ScratchSpace>,
    timeout: Duration,
}

impl ArtifactFetcher {
    /// Create a fetcher over an object store
    pub fn new(store: Arc<dyn ObjectStore>, scratch: Arc<ScratchSpace>, timeout: Duration) -> Self {
        Self {
            store,
            scratch,
            timeout,
        }
    }

    /// Scratch space shared with the loader
    pub fn scratch(&self) -> &Arc<ScratchSpace> {
        &self.scratch
    }

    /// Fetch the artifact at `location` into a fresh scratch directory
    pub async fn fetch(
        &self,
        location: &StorageLocation,
        credentials: Option<&Credentials>,
    ) -> Result<LocalArtifact> {
        let scratch = self.scratch.allocate("artifact-")?;
        info!("Fetching {} into {}", location, scratch.display());
        let start = Instant::now();

        let downloaded = tokio::time::timeout(
            self.timeout,
            self.download_into(location, credentials, &scratch),
        )
        .await
        .map_err(|_| {
            Error::fetch(format!(
                "Timed out after {:?} fetching {}",
                self.timeout, location
            ))
        })??;

        let unpack_dir = scratch.clone();
        let root = tokio::task::spawn_blocking(move || finalize(&unpack_dir, downloaded))
            .await
            .map_err(|e| Error::internal(format!("Artifact unpack task failed: {}", e)))??;

        debug!(
            "Fetched {} to {} in {:?}",
            location,
            root.display(),
            start.elapsed()
        );

        Ok(LocalArtifact {
            root,
            scratch: Some(scratch),
        })
    }

    async fn download_into(
        &self,
        location: &StorageLocation,
        credentials: Option<&Credentials>,
        scratch: &Path,
    ) -> Result<Downloaded> {
        let file_name = location.file_name().to_string();
        let file_path = scratch.join(&file_name);

        match self.store.download(location, credentials, &file_path).await {
            Ok(bytes) => {
                metrics::counter!("modelgate_fetch_bytes_total").increment(bytes);
                debug!("Downloaded {} bytes from {}", bytes, location);
                Ok(Downloaded::File(file_name.into()))
            }
            Err(Error::NotFound(msg)) => {
                // Directory-shaped artifacts are stored as a key prefix
                let _ = tokio::fs::remove_file(&file_path).await;
                debug!("{}; trying {} as a prefix", msg, location);
                let keys = match self.store.list(location, credentials).await {
                    Ok(keys) if !keys.is_empty() => keys,
                    Ok(_) => return Err(Error::not_found(format!("nothing stored at {}", location))),
                    Err(e) => {
                        // Keep the object's own error when the prefix cannot be listed
                        warn!("Could not list {} as a prefix: {}", location, e);
                        return Err(Error::NotFound(msg));
                    }
                };
                self.download_prefix(location, credentials, keys, &file_path).await?;
                Ok(Downloaded::Directory)
            }
            Err(e) => Err(e),
        }
    }

    async fn download_prefix(
        &self,
        location: &StorageLocation,
        credentials: Option<&Credentials>,
        keys: Vec<String>,
        dest_dir: &Path,
    ) -> Result<()> {

        let prefix = format!("{}/", location.key.trim_end_matches('/'));
        let mut total = 0u64;

        for key in keys {
            let relative = key.strip_prefix(&prefix).unwrap_or(&key);
            let dest = safe_join(dest_dir, relative)?;
            if let Some(parent) = dest.parent() {
                tokio::fs::create_dir_all(parent).await?;
            }

            let object = StorageLocation {
                key,
                ..location.clone()
            };
            total += self.store.download(&object, credentials, &dest).await?;
        }

        metrics::counter!("modelgate_fetch_bytes_total").increment(total);
        debug!("Downloaded {} bytes under {}", total, location);
        Ok(())
    }
}

/// Join a relative object path under `base`, refusing escapes
pub(crate) fn safe_join(base: &Path, relative: &str) -> Result<PathBuf> {
    let relative = Path::new(relative);
    let escapes = relative
        .components()
        .any(|c| !matches!(c, Component::Normal(_) | Component::CurDir));
    if escapes || relative.as_os_str().is_empty() {
        return Err(Error::fetch(format!(
            "Refusing to store object outside the scratch directory: {}",
            relative.display()
        )));
    }
    Ok(base.join(relative))
}

/// Unpack a downloaded file if it is an archive and pick the artifact root
fn finalize(scratch: &Path, downloaded: Downloaded) -> Result<PathBuf> {
    let downloaded_name = match downloaded {
        Downloaded::File(name) => {
            let archive = scratch.join(&name);
            if let Err(e) = extract_tar_gz(&archive, scratch) {
                warn!(
                    "Downloaded file is not a tar.gz archive, keeping it as is: {} ({})",
                    archive.display(),
                    e
                );
            }
            Some(name)
        }
        Downloaded::Directory => None,
    };

    artifact_root(scratch, downloaded_name.as_deref())
}

/// Extract a gzip-compressed tarball into `dest`
///
/// Entries that would land outside `dest` are rejected by `tar`.
pub fn extract_tar_gz(archive: &Path, dest: &Path) -> std::io::Result<()> {
    let file = File::open(archive)?;
    let mut archive = tar::Archive::new(GzDecoder::new(BufReader::new(file)));
    archive.unpack(dest)
}

/// A lone top-level directory becomes the root; otherwise the scratch dir
fn artifact_root(scratch: &Path, downloaded: Option<&std::ffi::OsStr>) -> Result<PathBuf> {
    let mut entries = Vec::new();
    for entry in std::fs::read_dir(scratch)? {
        let entry = entry?;
        if Some(entry.file_name().as_os_str()) != downloaded {
            entries.push(entry.path());
        }
    }

    match entries.as_slice() {
        [only] if only.is_dir() => Ok(only.clone()),
        _ => Ok(scratch.to_path_buf()),
    }
}
