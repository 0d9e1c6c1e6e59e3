//! Registry of mounted datasets.
//!
//! Shared by every transport as `Arc<MountRegistry>`. Files are parsed on the
//! blocking pool with no lock held; the map itself is behind an async
//! `RwLock`, taken for writing only to swap a finished dataset in or out.
//! Readers therefore always see a dataset either entirely before or entirely
//! after a remount.

use std::collections::HashMap;
use std::sync::Arc;

use thiserror::Error;
use tokio::sync::RwLock;
use tracing::{debug, info, warn};

use dmount_core::{DatasetKey, DatasetSummary, MountError, MountedDataset, Row, Sandbox};

/// Errors from row lookups.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum LookupError {
    /// The path is not mounted or the index is out of range
    #[error("invalid path or index: {path}/{index}")]
    NotFound { path: String, index: i64 },
}

/// Concurrent map from dataset key to mounted dataset.
#[derive(Debug)]
pub struct MountRegistry {
    sandbox: Sandbox,
    datasets: RwLock<HashMap<DatasetKey, Arc<MountedDataset>>>,
}

impl MountRegistry {
    /// Creates an empty registry confined to `sandbox`.
    pub fn new(sandbox: Sandbox) -> Self {
        Self {
            sandbox,
            datasets: RwLock::new(HashMap::new()),
        }
    }

    /// Returns the sandbox datasets are loaded from.
    pub fn sandbox(&self) -> &Sandbox {
        &self.sandbox
    }

    /// Loads the CSV file at `path` and installs it, replacing any dataset
    /// already mounted under the same key.
    ///
    /// On any error the registry is left exactly as it was.
    pub async fn mount(&self, path: &str) -> Result<(), MountError> {
        let sandbox = self.sandbox.clone();
        let requested = path.to_string();

        let loaded = tokio::task::spawn_blocking(move || sandbox.load_dataset(&requested))
            .await
            .map_err(|e| MountError::ReadFailed {
                reason: e.to_string(),
            })?;

        let (key, dataset) = match loaded {
            Ok(loaded) => loaded,
            Err(e) if e.is_validation() => {
                debug!(path = %path, error = %e, "Mount rejected");
                return Err(e);
            }
            Err(e) => {
                warn!(
                    path = %path,
                    error = %e,
                    reason = e.reason().unwrap_or_default(),
                    "Mount failed"
                );
                return Err(e);
            }
        };

        let rows = dataset.row_count();
        let columns = dataset.columns().len();
        let replaced = self
            .datasets
            .write()
            .await
            .insert(key.clone(), Arc::new(dataset))
            .is_some();

        info!(path = %key, rows, columns, replaced, "Dataset mounted");
        Ok(())
    }

    /// Removes the dataset mounted at `path`.
    ///
    /// Returns `false` if nothing was mounted there; that is not an error.
    pub async fn unmount(&self, path: &str) -> bool {
        let Some(key) = self.sandbox.key_for(path) else {
            return false;
        };

        let removed = self.datasets.write().await.remove(&key).is_some();
        if removed {
            info!(path = %key, "Dataset unmounted");
        } else {
            debug!(path = %key, "Unmount of unknown dataset ignored");
        }
        removed
    }

    /// Returns row `index` of the dataset mounted at `path`.
    ///
    /// # Errors
    ///
    /// `LookupError::NotFound` if the path is not mounted or the index is
    /// outside `0..row_count`.
    pub async fn get_row(&self, path: &str, index: i64) -> Result<Row, LookupError> {
        let not_found = || LookupError::NotFound {
            path: path.to_string(),
            index,
        };

        let key = self.sandbox.key_for(path).ok_or_else(not_found)?;
        let datasets = self.datasets.read().await;
        datasets
            .get(&key)
            .and_then(|dataset| dataset.row(index))
            .cloned()
            .ok_or_else(not_found)
    }

    /// Describes every mounted dataset, ordered by path.
    pub async fn status(&self) -> Vec<DatasetSummary> {
        let datasets = self.datasets.read().await;
        let mut summaries: Vec<DatasetSummary> = datasets
            .iter()
            .map(|(key, dataset)| dataset.summary(key))
            .collect();
        summaries.sort_by(|a, b| a.path.cmp(&b.path));
        summaries
    }

    /// Number of mounted datasets.
    pub async fn len(&self) -> usize {
        self.datasets.read().await.len()
    }

    /// True when nothing is mounted.
    pub async fn is_empty(&self) -> bool {
        self.len().await == 0
    }
}
