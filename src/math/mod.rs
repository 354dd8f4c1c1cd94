//! Numerical building blocks: phi-functions, exponential convolution and the
//! bounded coordinate-descent solver.

pub mod basis;
pub mod conv;
pub mod coord;

pub use basis::*;
pub use conv::*;
pub use coord::*;
