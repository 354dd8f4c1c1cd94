//! Reporting utilities: run summaries and terminal output.

pub mod format;

pub use format::*;
