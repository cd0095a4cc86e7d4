//! Input/output helpers.
//!
//! - fit table export to CSV (`export`)
//! - single fit result JSON read/write (`result`)

pub mod export;
pub mod result;

pub use export::*;
pub use result::*;
