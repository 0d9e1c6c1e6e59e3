//! dmount Core - Shared domain types for the mount daemon
//!
//! This crate provides the types shared between the daemon (`dmountd`) and
//! the wire protocol crate:
//! - `dataset` - In-memory tabular datasets and their status summaries
//! - `sandbox` - Confinement of requested paths to the sandbox root
//! - `sample` - Sample dataset written into a fresh sandbox
//!
//! All code follows the panic-free policy: no `.unwrap()`, `.expect()`,
//! `panic!()`, `unreachable!()`, `todo!()`, or direct indexing `[i]`.

pub mod dataset;
pub mod error;
pub mod sample;
pub mod sandbox;

// Re-exports for convenience
pub use dataset::{DatasetKey, DatasetSummary, MountedDataset, Row};
pub use error::{DomainError, DomainResult, MountError};
pub use sample::{seed_sample_dataset, SAMPLE_DATASET_NAME};
pub use sandbox::{ResolvedPath, Sandbox, ACCEPTED_EXTENSION};
