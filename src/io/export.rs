//! Run outputs: fitted matrices as CSV and the run summary as JSON.

use std::fs::File;
use std::path::Path;

use crate::domain::RunSummary;
use crate::fit::BatchOutput;
use crate::io::matrix::write_matrix;
use crate::io::IoError;

/// Write the params x voxels matrix.
pub fn write_params_csv(path: &Path, output: &BatchOutput) -> Result<(), IoError> {
    write_matrix(path, &output.params)
}

/// Write the frames x voxels fitted curves.
pub fn write_curves_csv(path: &Path, output: &BatchOutput) -> Result<(), IoError> {
    write_matrix(path, &output.curves)
}

pub fn write_summary_json(path: &Path, summary: &RunSummary) -> Result<(), IoError> {
    let file = File::create(path).map_err(|source| IoError::Open {
        path: path.to_path_buf(),
        source,
    })?;
    serde_json::to_writer_pretty(file, summary).map_err(|source| IoError::Json {
        path: path.to_path_buf(),
        source,
    })
}
