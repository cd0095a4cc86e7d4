//! Shared domain types.
//!
//! These types are intentionally kept lightweight and serializable so they can be:
//!
//! - passed between the fit engines and the batch driver
//! - exported to JSON/CSV
//! - reloaded later for plotting or comparisons

use std::collections::BTreeMap;
use std::path::PathBuf;

use clap::ValueEnum;
use num_complex::Complex64;
use serde::{Deserialize, Serialize};

use crate::error::FitError;

/// Minimum number of points needed to resolve a phase roll-off.
pub const MIN_TRACE_POINTS: usize = 10;

/// Default number of points of the simulated output curve.
pub const DEFAULT_OUT_NOP: usize = 501;

/// Measurement topology of the resonator.
///
/// The numeric value is the `n_ports` factor in `|Qc| = Ql / (n_ports · r)`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, ValueEnum)]
#[serde(rename_all = "lowercase")]
pub enum NPorts {
    /// One-port reflection (S11).
    #[value(name = "1", alias = "reflection")]
    Reflection,
    /// Two-port notch / side-coupled (S21).
    #[value(name = "2", alias = "notch")]
    Notch,
}

impl NPorts {
    pub fn count(self) -> f64 {
        match self {
            NPorts::Reflection => 1.0,
            NPorts::Notch => 2.0,
        }
    }

    pub fn from_count(n: u8) -> Option<Self> {
        match n {
            1 => Some(NPorts::Reflection),
            2 => Some(NPorts::Notch),
            _ => None,
        }
    }
}

/// Which fit-function class the batch driver should run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, ValueEnum)]
#[serde(rename_all = "lowercase")]
pub enum ModelChoice {
    Circle,
    Lorentzian,
}

/// What the store does when a row does not match the frozen trace length.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize, ValueEnum)]
#[serde(rename_all = "lowercase")]
pub enum RaggedPolicy {
    /// Pad with NaN up to the longest length seen so far.
    Pad,
    /// Fail the append.
    #[default]
    Reject,
}

/// One scattering-parameter sweep: frequency (Hz), amplitude, phase (rad).
///
/// Construction validates the shape; the arrays are never mutated afterwards.
#[derive(Debug, Clone, PartialEq)]
pub struct ComplexTrace {
    freq: Vec<f64>,
    amp: Vec<f64>,
    pha: Vec<f64>,
}

impl ComplexTrace {
    /// Build a trace from equal-length arrays.
    ///
    /// Requires at least [`MIN_TRACE_POINTS`] finite samples and a strictly
    /// monotonic frequency axis. Descending sweeps are reversed so the stored
    /// trace is always ascending in frequency.
    pub fn new(freq: Vec<f64>, amp: Vec<f64>, pha: Vec<f64>) -> Result<Self, FitError> {
        if freq.len() != amp.len() || freq.len() != pha.len() {
            return Err(FitError::InvalidInput(format!(
                "array lengths differ: freq={}, amp={}, pha={}",
                freq.len(),
                amp.len(),
                pha.len()
            )));
        }
        if freq.len() < MIN_TRACE_POINTS {
            return Err(FitError::InvalidInput(format!(
                "trace has {} points, need at least {MIN_TRACE_POINTS}",
                freq.len()
            )));
        }
        let all_finite = freq
            .iter()
            .chain(amp.iter())
            .chain(pha.iter())
            .all(|v| v.is_finite());
        if !all_finite {
            return Err(FitError::InvalidInput("trace contains NaN or infinite values".into()));
        }

        let ascending = freq.windows(2).all(|w| w[1] > w[0]);
        let descending = freq.windows(2).all(|w| w[1] < w[0]);
        if !(ascending || descending) {
            return Err(FitError::InvalidInput(
                "frequency axis is not strictly monotonic".into(),
            ));
        }

        let (mut freq, mut amp, mut pha) = (freq, amp, pha);
        if descending {
            freq.reverse();
            amp.reverse();
            pha.reverse();
        }
        Ok(Self { freq, amp, pha })
    }

    /// Build a trace from complex samples.
    pub fn from_complex(freq: Vec<f64>, z: &[Complex64]) -> Result<Self, FitError> {
        let amp = z.iter().map(|v| v.norm()).collect();
        let pha = z.iter().map(|v| v.arg()).collect();
        Self::new(freq, amp, pha)
    }

    pub fn freq(&self) -> &[f64] {
        &self.freq
    }

    pub fn amp(&self) -> &[f64] {
        &self.amp
    }

    pub fn pha(&self) -> &[f64] {
        &self.pha
    }

    pub fn len(&self) -> usize {
        self.freq.len()
    }

    pub fn is_empty(&self) -> bool {
        self.freq.is_empty()
    }

    /// `amp · exp(i·pha)` for every sample.
    pub fn to_complex(&self) -> Vec<Complex64> {
        self.amp
            .iter()
            .zip(self.pha.iter())
            .map(|(&a, &p)| Complex64::from_polar(a, p))
            .collect()
    }

    pub fn f_min(&self) -> f64 {
        self.freq[0]
    }

    pub fn f_max(&self) -> f64 {
        self.freq[self.freq.len() - 1]
    }
}

/// Named physical quantities extracted by a fit.
///
/// The key set is fixed when the record is created (all values NaN) and never
/// grows afterwards; a failed fit therefore still yields a fully keyed record.
#[derive(Debug, Clone, PartialEq)]
pub struct ExtractData(BTreeMap<String, f64>);

impl ExtractData {
    pub fn nan_filled(keys: &[&str]) -> Self {
        Self(keys.iter().map(|k| (k.to_string(), f64::NAN)).collect())
    }

    /// Set a pre-declared quantity.
    ///
    /// Writing an undeclared key is a logic error: it asserts in debug builds
    /// and is dropped in release builds.
    pub fn set(&mut self, key: &str, value: f64) {
        debug_assert!(self.0.contains_key(key), "undeclared extract key '{key}'");
        if let Some(slot) = self.0.get_mut(key) {
            *slot = value;
        }
    }

    pub fn get(&self, key: &str) -> Option<f64> {
        self.0.get(key).copied()
    }

    pub fn keys(&self) -> impl Iterator<Item = &str> {
        self.0.keys().map(String::as_str)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, f64)> {
        self.0.iter().map(|(k, v)| (k.as_str(), *v))
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn reset(&mut self) {
        for v in self.0.values_mut() {
            *v = f64::NAN;
        }
    }
}

impl std::ops::Index<&str> for ExtractData {
    type Output = f64;

    fn index(&self, key: &str) -> &f64 {
        &self.0[key]
    }
}

/// Quality flags that do not abort a fit.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct FitDiagnostics {
    /// False when any nonlinear least-squares stage hit its iteration limit.
    pub converged: bool,
    /// Number of cable-delay refinement loops actually run.
    pub delay_iterations: usize,
    pub warnings: Vec<String>,
}

/// Output of one fit: simulated curve plus extracted quantities.
#[derive(Debug, Clone, PartialEq)]
pub struct FitResult {
    pub freq_fit: Vec<f64>,
    pub amp_fit: Vec<f64>,
    pub pha_fit: Vec<f64>,
    pub extract_data: ExtractData,
    pub diagnostics: FitDiagnostics,
}

impl FitResult {
    /// An all-NaN record with the given key set and curve length.
    pub fn nan_filled(keys: &[&str], out_nop: usize) -> Self {
        Self {
            freq_fit: vec![f64::NAN; out_nop],
            amp_fit: vec![f64::NAN; out_nop],
            pha_fit: vec![f64::NAN; out_nop],
            extract_data: ExtractData::nan_filled(keys),
            diagnostics: FitDiagnostics::default(),
        }
    }

    /// Real part of the simulated curve.
    pub fn real_fit(&self) -> Vec<f64> {
        self.amp_fit
            .iter()
            .zip(self.pha_fit.iter())
            .map(|(a, p)| a * p.cos())
            .collect()
    }

    /// Imaginary part of the simulated curve.
    pub fn imag_fit(&self) -> Vec<f64> {
        self.amp_fit
            .iter()
            .zip(self.pha_fit.iter())
            .map(|(a, p)| a * p.sin())
            .collect()
    }
}

/// A full run's configuration as understood by the pipeline.
///
/// This is derived from CLI flags (plus defaults).
#[derive(Debug, Clone)]
pub struct FitConfig {
    pub scan_path: PathBuf,
    pub model: ModelChoice,
    pub n_ports: NPorts,

    /// Frequency window (Hz); `None` means the edge of the sweep.
    pub f_min: Option<f64>,
    pub f_max: Option<f64>,

    /// Skip the iterative delay search and use this cable delay (s).
    pub fixed_delay: Option<f64>,
    /// Assumed leakage suppression for the Fano bounds (dB).
    pub isolation_db: f64,
    pub fit_delay_max_iterations: usize,
    pub out_nop: usize,
    pub calc_errors: bool,

    pub plot: bool,
    pub plot_width: usize,
    pub plot_height: usize,

    pub export_csv: Option<PathBuf>,
    pub export_json: Option<PathBuf>,

    pub on_ragged_append: RaggedPolicy,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ramp(n: usize) -> Vec<f64> {
        (0..n).map(|i| i as f64).collect()
    }

    #[test]
    fn trace_rejects_short_and_ragged_input() {
        let err = ComplexTrace::new(ramp(5), ramp(5), ramp(5)).unwrap_err();
        assert!(matches!(err, FitError::InvalidInput(_)));

        let err = ComplexTrace::new(ramp(20), ramp(19), ramp(20)).unwrap_err();
        assert!(matches!(err, FitError::InvalidInput(_)));
    }

    #[test]
    fn trace_rejects_non_monotonic_frequency() {
        let mut f = ramp(20);
        f.swap(3, 4);
        assert!(ComplexTrace::new(f, ramp(20), ramp(20)).is_err());
    }

    #[test]
    fn descending_trace_is_reversed() {
        let f: Vec<f64> = ramp(12).into_iter().rev().collect();
        let a = ramp(12);
        let trace = ComplexTrace::new(f, a, vec![0.0; 12]).unwrap();
        assert_eq!(trace.freq()[0], 0.0);
        assert_eq!(trace.amp()[0], 11.0);
    }

    #[test]
    fn extract_data_keeps_declared_keys() {
        let mut data = ExtractData::nan_filled(&["Qc", "f_res"]);
        data.set("Qc", 1.5e4);
        assert_eq!(data.get("Qc"), Some(1.5e4));
        assert!(data["f_res"].is_nan());
        assert_eq!(data.len(), 2);

        data.reset();
        assert!(data["Qc"].is_nan());
    }
}
