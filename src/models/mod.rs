//! Resonator response models.
//!
//! Models are implemented as small, pure functions so that fitting code can
//! stay generic.

pub mod resonator;

pub use resonator::*;
