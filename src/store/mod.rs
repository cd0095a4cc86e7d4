//! Incremental multi-dimensional scan storage.
//!
//! Responsibilities:
//!
//! - declaring coordinates, vectors, matrices, boxes, text, and views
//! - lazy schema materialization on first write
//! - appending row by row into resizable HDF5 datasets, flushed after every write
//! - reading stored data back as N-D arrays
//! - merging scan files

pub mod catalog;
pub mod dataset;
pub mod file;
pub mod merge;

pub use catalog::*;
pub use dataset::*;
pub use file::*;
pub use merge::*;
