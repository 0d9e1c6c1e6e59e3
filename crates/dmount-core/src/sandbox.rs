//! Sandbox root and path confinement.
//!
//! Every mount request names a path that must stay at or below the sandbox
//! root. Paths are checked twice: lexically before anything touches the
//! filesystem, and again after symlink resolution once the file is known to
//! exist. A path that escapes is rejected, never clamped back into the root.

use std::fs;
use std::path::{Component, Path, PathBuf};

use tracing::debug;

use crate::{DatasetKey, DomainError, DomainResult, MountError, MountedDataset};

/// The only file extension accepted for mounting (compared case-sensitively).
pub const ACCEPTED_EXTENSION: &str = "csv";

/// A requested path after lexical confinement.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResolvedPath {
    /// Registry key (relative, normalised)
    pub key: DatasetKey,

    /// Absolute location below the sandbox root
    pub absolute: PathBuf,
}

/// The directory tree outside of which no file operation is permitted.
#[derive(Debug, Clone)]
pub struct Sandbox {
    /// Canonical root directory
    root: PathBuf,
}

impl Sandbox {
    /// Opens an existing directory as the sandbox root.
    ///
    /// # Errors
    ///
    /// Returns `DomainError::SandboxRoot` if the path cannot be canonicalised
    /// or is not a directory.
    pub fn open(root: impl AsRef<Path>) -> DomainResult<Self> {
        let requested = root.as_ref();
        let root = fs::canonicalize(requested).map_err(|e| DomainError::SandboxRoot {
            path: requested.to_path_buf(),
            reason: e.to_string(),
        })?;

        if !root.is_dir() {
            return Err(DomainError::SandboxRoot {
                path: root,
                reason: "not a directory".to_string(),
            });
        }

        Ok(Self { root })
    }

    /// Creates the root directory if it is missing, then opens it.
    pub fn prepare(root: impl AsRef<Path>) -> DomainResult<Self> {
        let requested = root.as_ref();
        fs::create_dir_all(requested).map_err(|e| DomainError::SandboxRoot {
            path: requested.to_path_buf(),
            reason: e.to_string(),
        })?;
        Self::open(requested)
    }

    /// Returns the canonical root directory.
    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Confines `requested` lexically and derives its registry key.
    ///
    /// Relative paths are taken relative to the root; absolute paths must
    /// start with the canonical root.
    ///
    /// # Errors
    ///
    /// `MountError::InvalidPath` if the path is empty or escapes the root.
    pub fn resolve(&self, requested: &str) -> Result<ResolvedPath, MountError> {
        let parts = self
            .normalize(requested)
            .ok_or_else(|| MountError::InvalidPath(requested.to_string()))?;

        let absolute = parts.iter().fold(self.root.clone(), |acc, p| acc.join(p));

        Ok(ResolvedPath {
            key: DatasetKey::new(parts.join("/")),
            absolute,
        })
    }

    /// Derives the registry key for `requested` without any validation beyond
    /// confinement. Used for lookups, where a bad path simply finds nothing.
    pub fn key_for(&self, requested: &str) -> Option<DatasetKey> {
        self.normalize(requested)
            .map(|parts| DatasetKey::new(parts.join("/")))
    }

    /// Runs every mount check in order and loads the dataset.
    ///
    /// Order: lexical confinement, extension, symlink-resolved confinement,
    /// open, read. This performs blocking file I/O.
    pub fn load_dataset(&self, requested: &str) -> Result<(DatasetKey, MountedDataset), MountError> {
        let resolved = self.resolve(requested)?;

        let has_extension = Path::new(resolved.key.as_str())
            .extension()
            .is_some_and(|ext| ext == ACCEPTED_EXTENSION);
        if !has_extension {
            return Err(MountError::NotCsv(requested.to_string()));
        }

        // A missing file cannot be canonicalised; report it as an open failure.
        let real = fs::canonicalize(&resolved.absolute).map_err(|e| MountError::OpenFailed {
            reason: e.to_string(),
        })?;
        if !real.starts_with(&self.root) {
            debug!(
                requested = %requested,
                resolved = %real.display(),
                "Symlink escapes sandbox root"
            );
            return Err(MountError::InvalidPath(requested.to_string()));
        }

        let dataset = MountedDataset::load(&real)?;
        Ok((resolved.key, dataset))
    }

    /// Splits `requested` into normalised components relative to the root.
    fn normalize<'a>(&self, requested: &'a str) -> Option<Vec<&'a str>> {
        let requested_path = Path::new(requested);
        let relative = if requested_path.is_absolute() {
            requested_path.strip_prefix(&self.root).ok()?
        } else {
            requested_path
        };

        let mut parts: Vec<&str> = Vec::new();
        for component in relative.components() {
            match component {
                Component::CurDir => {}
                Component::ParentDir => {
                    parts.pop()?;
                }
                Component::Normal(part) => parts.push(part.to_str()?),
                Component::RootDir | Component::Prefix(_) => return None,
            }
        }

        if parts.is_empty() {
            None
        } else {
            Some(parts)
        }
    }
}
