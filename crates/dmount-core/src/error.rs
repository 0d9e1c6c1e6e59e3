//! Domain-specific error types following panic-free policy.

use std::path::PathBuf;

use thiserror::Error;

/// Reasons a mount request can be refused.
///
/// The `Display` output of each variant is the stable result code reported to
/// clients, so the wording must not change. Variants that wrap an I/O or parse
/// failure keep the underlying cause in `reason` for logging only.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum MountError {
    /// The path does not resolve to a location inside the sandbox root.
    #[error("invalid path: {0}")]
    InvalidPath(String),

    /// The path does not carry the accepted extension.
    #[error("not a .csv file: {0}")]
    NotCsv(String),

    /// The file could not be opened.
    #[error("failed to open")]
    OpenFailed { reason: String },

    /// The file was opened but its contents could not be read as a dataset.
    #[error("failed to read")]
    ReadFailed { reason: String },
}

impl MountError {
    /// Returns the underlying cause for open/read failures.
    pub fn reason(&self) -> Option<&str> {
        match self {
            Self::OpenFailed { reason } | Self::ReadFailed { reason } => Some(reason),
            Self::InvalidPath(_) | Self::NotCsv(_) => None,
        }
    }

    /// True for rejections decided before touching the filesystem.
    pub fn is_validation(&self) -> bool {
        matches!(self, Self::InvalidPath(_) | Self::NotCsv(_))
    }
}

/// Errors that can occur while preparing domain resources.
#[derive(Error, Debug, Clone)]
pub enum DomainError {
    /// The sandbox root could not be created or resolved.
    #[error("sandbox root {path} is unusable: {reason}")]
    SandboxRoot { path: PathBuf, reason: String },

    /// The sample dataset could not be written.
    #[error("failed to write sample dataset {path}: {reason}")]
    SampleData { path: PathBuf, reason: String },
}

/// Result type for domain operations.
pub type DomainResult<T> = Result<T, DomainError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_mount_error_codes_are_stable() {
        assert_eq!(
            MountError::InvalidPath("../etc/passwd".to_string()).to_string(),
            "invalid path: ../etc/passwd"
        );
        assert_eq!(
            MountError::NotCsv("notes.txt".to_string()).to_string(),
            "not a .csv file: notes.txt"
        );
        assert_eq!(
            MountError::OpenFailed {
                reason: "No such file or directory".to_string()
            }
            .to_string(),
            "failed to open"
        );
        assert_eq!(
            MountError::ReadFailed {
                reason: "found record with 3 fields".to_string()
            }
            .to_string(),
            "failed to read"
        );
    }

    #[test]
    fn test_mount_error_reason() {
        let err = MountError::ReadFailed {
            reason: "empty file".to_string(),
        };
        assert_eq!(err.reason(), Some("empty file"));
        assert!(!err.is_validation());
        assert_eq!(MountError::NotCsv("x".to_string()).reason(), None);
        assert!(MountError::InvalidPath("x".to_string()).is_validation());
    }
}
