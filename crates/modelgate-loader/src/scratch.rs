//! Process-scoped scratch space for fetched artifacts

use modelgate_core::{Error, Result};
use std::path::{Path, PathBuf};
use tempfile::TempDir;

/// Root directory under which every fetch gets its own unique directory.
///
/// The root is removed, with everything under it, when the `ScratchSpace` is
/// dropped at shutdown. Directories handed out by [`ScratchSpace::allocate`]
/// are never reused or removed before that.
#[derive(Debug)]
pub struct ScratchSpace {
    root: TempDir,
}

impl ScratchSpace {
    /// Create scratch space under `parent`, or the system temp dir
    pub fn new(parent: Option<&Path>) -> Result<Self> {
        let builder = {
            let mut builder = tempfile::Builder::new();
            builder.prefix("modelgate-");
            builder
        };

        let root = match parent {
            Some(parent) => {
                std::fs::create_dir_all(parent)?;
                builder.tempdir_in(parent)?
            }
            None => builder.tempdir()?,
        };

        tracing::debug!("Scratch space at {}", root.path().display());
        Ok(Self { root })
    }

    /// Scratch root path
    pub fn root(&self) -> &Path {
        self.root.path()
    }

    /// Allocate a fresh, uniquely named directory
    pub fn allocate(&self, prefix: &str) -> Result<PathBuf> {
        let dir = tempfile::Builder::new()
            .prefix(prefix)
            .tempdir_in(self.root.path())
            .map_err(|e| Error::internal(format!("Failed to create scratch directory: {}", e)))?;
        Ok(dir.into_path())
    }
}
