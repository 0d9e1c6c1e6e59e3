//! Sample dataset for a freshly prepared sandbox.
//!
//! Gives a new installation something to mount straight away: six numeric
//! columns where each output is twice the matching input.

use std::path::Path;

use tracing::info;

use crate::{DomainError, DomainResult};

/// File name of the sample dataset inside the sandbox root.
pub const SAMPLE_DATASET_NAME: &str = "data.csv";

/// Number of data rows written to the sample dataset.
const SAMPLE_ROWS: i64 = 10;

const SAMPLE_HEADER: [&str; 6] = ["input1", "input2", "input3", "output1", "output2", "output3"];

/// Writes `data.csv` into `root` unless it already exists.
///
/// Returns `true` when a file was written.
///
/// # Errors
///
/// Returns `DomainError::SampleData` if the file cannot be created or written.
pub fn seed_sample_dataset(root: &Path) -> DomainResult<bool> {
    let path = root.join(SAMPLE_DATASET_NAME);
    if path.exists() {
        return Ok(false);
    }

    let sample_err = |reason: String| DomainError::SampleData {
        path: path.clone(),
        reason,
    };

    let mut writer = csv::Writer::from_path(&path).map_err(|e| sample_err(e.to_string()))?;
    writer
        .write_record(SAMPLE_HEADER)
        .map_err(|e| sample_err(e.to_string()))?;

    for i in 1..=SAMPLE_ROWS {
        let inputs = [i, i + 1, i + 2];
        let record: Vec<String> = inputs
            .iter()
            .chain(inputs.map(|n| 2 * n).iter())
            .map(|n| n.to_string())
            .collect();
        writer
            .write_record(&record)
            .map_err(|e| sample_err(e.to_string()))?;
    }

    writer.flush().map_err(|e| sample_err(e.to_string()))?;

    info!(path = %path.display(), rows = SAMPLE_ROWS, "Sample dataset written");
    Ok(true)
}
