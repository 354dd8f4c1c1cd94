//! Parameter estimation.
//!
//! Responsibilities:
//!
//! - fit one voxel with bounded Levenberg-Marquardt ([`levmar`])
//! - fit a voxel batch on a worker pool ([`driver`])

pub mod driver;
pub mod levmar;

pub use driver::*;
pub use levmar::*;
