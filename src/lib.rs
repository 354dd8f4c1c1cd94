//! `kinfit` library crate.
//!
//! The binary (`kfit`) is a thin wrapper around this library so that:
//!
//! - core logic is testable without spawning processes
//! - the fitting engine can be embedded by other hosts
//!
//! Layers, leaves first: `math` (phi-functions, convolution, bounded
//! coordinate descent), `models` (forward models and their Jacobians), `fit`
//! (Levenberg-Marquardt and the parallel voxel driver), then `io`, `report`,
//! `data`, `cli` and `app` around them.

pub mod app;
pub mod cli;
pub mod data;
pub mod domain;
pub mod error;
pub mod fit;
pub mod io;
pub mod math;
pub mod models;
pub mod report;
