//! Mathematical utilities: least squares, phase handling, and statistics.

pub mod lm;
pub mod ols;
pub mod signal;
pub mod stats;

pub use lm::*;
pub use ols::*;
pub use signal::*;
