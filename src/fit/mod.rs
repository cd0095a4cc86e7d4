//! Resonator fit engines.
//!
//! Responsibilities:
//!
//! - algebraic circle fit of complex scattering data
//! - staged phase-versus-frequency fit
//! - full circle-fit calibration with quality factors and errors
//! - Lorentzian power fit as a phase-free alternative

pub mod base;
pub mod circle;
pub mod circle_fit;
pub mod lorentzian;
pub mod phase;

pub use base::*;
pub use circle::*;
pub use circle_fit::*;
pub use lorentzian::*;
pub use phase::*;

use crate::domain::{FitConfig, ModelChoice};

/// Build the fitter selected in `cfg`.
pub fn fitter_from_config(cfg: &FitConfig) -> Box<dyn ResonatorFit> {
    match cfg.model {
        ModelChoice::Circle => Box::new(CircleFit::new(CircleFitOptions::from(cfg))),
        ModelChoice::Lorentzian => Box::new(LorentzianFit::new(cfg.out_nop)),
    }
}
