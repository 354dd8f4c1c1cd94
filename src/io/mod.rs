//! Input/output helpers.
//!
//! - headerless CSV matrices (`matrix`)
//! - JSON session manifests (`session`)
//! - result exports (CSV/JSON) (`export`)

use std::path::PathBuf;

use thiserror::Error;

use crate::models::ContextError;

pub mod export;
pub mod matrix;
pub mod session;

pub use export::*;
pub use matrix::*;
pub use session::*;

#[derive(Error, Debug)]
pub enum IoError {
    #[error("failed to access '{}': {source}", path.display())]
    Open {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("CSV error in '{}': {source}", path.display())]
    Csv {
        path: PathBuf,
        #[source]
        source: csv::Error,
    },
    #[error("'{}' line {line}: expected {expected} fields, found {found}", path.display())]
    Ragged {
        path: PathBuf,
        line: usize,
        expected: usize,
        found: usize,
    },
    #[error("'{}' line {line}, column {column}: '{value}' is not a number", path.display())]
    Number {
        path: PathBuf,
        line: usize,
        column: usize,
        value: String,
    },
    #[error("'{}' contains no data", .0.display())]
    Empty(PathBuf),
    #[error("invalid JSON in '{}': {source}", path.display())]
    Json {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },
    #[error("invalid session: {0}")]
    Manifest(String),
    #[error(transparent)]
    Context(#[from] ContextError),
}
