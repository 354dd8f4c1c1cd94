//! Compartmental forward models.
//!
//! - [`context`]: shared scan timing, blood input and frame averaging
//! - [`model`]: the evaluator trait every topology implements
//! - [`one_tissue`], [`two_tissue`], [`liver`]: the built-in topologies

pub mod context;
#[cfg(test)]
pub(crate) mod fixtures;
pub mod liver;
pub mod model;
pub mod one_tissue;
pub mod two_tissue;

pub use context::{BloodInput, ContextError, FrameGrid, KineticContext, ScanTiming};
pub use model::{evaluator, KineticModel};
