//! Data sources that do not come from a measurement.

pub mod synthetic;

pub use synthetic::*;
