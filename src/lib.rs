//! `qfit` library crate.
//!
//! The binary (`qfit`) is a thin wrapper around this library so that:
//!
//! - fits and the scan store are testable without spawning processes
//! - the fit engines and the store are reusable from measurement scripts
//! - code stays easy to navigate as the project grows

pub mod app;
pub mod autofit;
pub mod cli;
pub mod data;
pub mod domain;
pub mod error;
pub mod fit;
pub mod io;
pub mod math;
pub mod models;
pub mod plot;
pub mod report;
pub mod store;
