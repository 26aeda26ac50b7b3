//! Helper utilities for integration tests.

pub mod assertions;
pub mod chip_generator;

pub use assertions::*;
pub use chip_generator::*;
