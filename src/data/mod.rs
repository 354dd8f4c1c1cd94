//! Built-in input functions and synthetic data.

pub mod sample;
