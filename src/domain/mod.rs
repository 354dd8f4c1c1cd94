//! Domain types used throughout the pipeline.
//!
//! This module defines:
//!
//! - model and outcome enums (`ModelKind`, `Termination`)
//! - run configuration (`FitConfig`)
//! - the exported run summary (`RunSummary`)

pub mod types;

pub use types::*;
