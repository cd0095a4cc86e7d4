//! Domain types used throughout the pipeline.
//!
//! This module defines:
//!
//! - configuration enums (`NPorts`, `ModelChoice`, `RaggedPolicy`)
//! - the immutable input trace (`ComplexTrace`)
//! - fit outputs (`FitResult`, `ExtractData`, `FitDiagnostics`)

pub mod types;

pub use types::*;
