//! Mounted dataset entities and value objects.

use std::fmt;
use std::fs::File;
use std::io::Read;
use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::MountError;

/// One data row, fields in column order.
pub type Row = Vec<String>;

// ============================================================================
// Type-Safe Identifiers
// ============================================================================

/// Registry key for a mounted dataset.
///
/// Always the requested path expressed relative to the sandbox root, with
/// `.`/`..` resolved and `/` separators (e.g. "reports/q1.csv"). Obtain one
/// through [`crate::Sandbox`] so that equivalent spellings share a key.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct DatasetKey(String);

impl DatasetKey {
    /// Creates a key from an already-normalised relative path.
    pub fn new(key: impl Into<String>) -> Self {
        Self(key.into())
    }

    /// Returns the underlying string reference.
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for DatasetKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl AsRef<str> for DatasetKey {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

// ============================================================================
// Dataset
// ============================================================================

/// A fully loaded tabular file.
///
/// Immutable once built: a remount produces a new value which replaces the
/// old one wholesale, so readers never see a partially written dataset.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MountedDataset {
    columns: Vec<String>,
    rows: Vec<Row>,
}

impl MountedDataset {
    /// Opens `path` and reads it as CSV.
    ///
    /// # Errors
    ///
    /// - `MountError::OpenFailed` if the file cannot be opened
    /// - `MountError::ReadFailed` if the contents are not a well-formed table
    pub fn load(path: &Path) -> Result<Self, MountError> {
        let file = File::open(path).map_err(|e| MountError::OpenFailed {
            reason: e.to_string(),
        })?;
        Self::from_reader(file)
    }

    /// Reads CSV from any source.
    ///
    /// The first record becomes the header. Every following record must have
    /// exactly as many fields as the header; a ragged file is rejected rather
    /// than padded. A source with no records at all is rejected too.
    pub fn from_reader<R: Read>(reader: R) -> Result<Self, MountError> {
        let mut csv_reader = csv::ReaderBuilder::new()
            .has_headers(false)
            .from_reader(reader);

        let mut records = csv_reader.records();

        let columns: Vec<String> = match records.next() {
            Some(Ok(header)) => header.iter().map(String::from).collect(),
            Some(Err(e)) => {
                return Err(MountError::ReadFailed {
                    reason: e.to_string(),
                })
            }
            None => {
                return Err(MountError::ReadFailed {
                    reason: "empty file".to_string(),
                })
            }
        };

        let mut rows = Vec::new();
        for record in records {
            let record = record.map_err(|e| MountError::ReadFailed {
                reason: e.to_string(),
            })?;
            rows.push(record.iter().map(String::from).collect());
        }

        Ok(Self { columns, rows })
    }

    /// Header fields in file order.
    pub fn columns(&self) -> &[String] {
        &self.columns
    }

    /// All data rows (header excluded).
    pub fn rows(&self) -> &[Row] {
        &self.rows
    }

    /// Number of data rows.
    pub fn row_count(&self) -> usize {
        self.rows.len()
    }

    /// Returns the row at `index`, or `None` when outside `[0, row_count)`.
    pub fn row(&self, index: i64) -> Option<&Row> {
        usize::try_from(index).ok().and_then(|i| self.rows.get(i))
    }

    /// Builds the status entry for this dataset.
    pub fn summary(&self, key: &DatasetKey) -> DatasetSummary {
        DatasetSummary {
            path: key.clone(),
            columns: self.columns.clone(),
            row_count: self.rows.len(),
        }
    }
}

/// Status entry for one mounted dataset.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DatasetSummary {
    /// Registry key
    pub path: DatasetKey,

    /// Header fields
    #[serde(rename = "cols")]
    pub columns: Vec<String>,

    /// Number of data rows
    #[serde(rename = "rowCount")]
    pub row_count: usize,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_from_reader_splits_header_and_rows() {
        let data = "x,y\n1,2\n3,4\n";
        let dataset = MountedDataset::from_reader(data.as_bytes()).unwrap();

        assert_eq!(dataset.columns(), ["x", "y"]);
        assert_eq!(dataset.row_count(), 2);
        assert_eq!(dataset.row(1), Some(&vec!["3".to_string(), "4".to_string()]));
    }

    #[test]
    fn test_row_out_of_range() {
        let dataset = MountedDataset::from_reader("x,y\n1,2\n".as_bytes()).unwrap();

        assert!(dataset.row(0).is_some());
        assert!(dataset.row(1).is_none());
        assert!(dataset.row(-1).is_none());
        assert!(dataset.row(i64::MAX).is_none());
    }

    #[test]
    fn test_header_only_file_has_no_rows() {
        let dataset = MountedDataset::from_reader("a,b,c\n".as_bytes()).unwrap();
        assert_eq!(dataset.columns().len(), 3);
        assert_eq!(dataset.row_count(), 0);
    }

    #[test]
    fn test_quoted_fields() {
        let data = "name,note\n\"Smith, J\",\"said \"\"hi\"\"\"\n";
        let dataset = MountedDataset::from_reader(data.as_bytes()).unwrap();
        assert_eq!(
            dataset.row(0),
            Some(&vec!["Smith, J".to_string(), "said \"hi\"".to_string()])
        );
    }

    #[test]
    fn test_empty_file_rejected() {
        let err = MountedDataset::from_reader("".as_bytes()).unwrap_err();
        assert!(matches!(err, MountError::ReadFailed { .. }));
    }

    #[test]
    fn test_ragged_rows_rejected() {
        let err = MountedDataset::from_reader("x,y\n1,2\n3\n".as_bytes()).unwrap_err();
        assert_eq!(err.to_string(), "failed to read");
    }

    #[test]
    fn test_load_missing_file() {
        let err = MountedDataset::load(Path::new("/definitely/not/here.csv")).unwrap_err();
        assert!(matches!(err, MountError::OpenFailed { .. }));
    }

    #[test]
    fn test_summary_serializes_wire_names() {
        let dataset = MountedDataset::from_reader("x\n1\n2\n".as_bytes()).unwrap();
        let summary = dataset.summary(&DatasetKey::new("a.csv"));
        let json = serde_json::to_value(&summary).unwrap();

        assert_eq!(json["path"], "a.csv");
        assert_eq!(json["cols"], serde_json::json!(["x"]));
        assert_eq!(json["rowCount"], 2);
    }
}
