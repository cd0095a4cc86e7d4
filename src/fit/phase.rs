//! Phase-versus-frequency fit of a centered resonance circle.
//!
//! Model: `θ − 2π·τ·(f − fr) + 2·atan(2·Ql·(1 − f/fr))`.
//!
//! The joint four-parameter fit diverges easily from poor starting values, so
//! it is approached in stages, each starting from the previous result:
//!
//! 1. `Ql`
//! 2. `fr`, `θ`
//! 3. `τ`
//! 4. `fr`, `Ql`
//! 5. all four
//!
//! The delay is optimized in units of phase turns across the sweep (`τ·span`)
//! so the solver's finite-difference step stays meaningful at `τ = 0`.

use num_complex::Complex64;

use crate::error::FitError;
use crate::math::{
    LmOptions, argmax_abs, gaussian_filter1d, gradient, levenberg_marquardt, periodic_boundary,
    unwrap_phase,
};
use crate::models::phase_centered;

use std::f64::consts::TAU;

/// Fraction of a full turn below which the resonance is considered partly outside the window.
const MIN_ROLL_OFF_FRACTION: f64 = 0.8;

/// Points averaged at each edge for the `θ` guess.
const EDGE_POINTS: usize = 5;

const FR: usize = 0;
const QL: usize = 1;
const THETA: usize = 2;
const DELAY: usize = 3;

/// Optional starting values; `None` means "estimate from the data".
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct PhaseGuess {
    pub fr: Option<f64>,
    pub ql: Option<f64>,
    pub theta: Option<f64>,
    pub delay: Option<f64>,
}

/// Result of [`fit_phase`].
#[derive(Debug, Clone, PartialEq)]
pub struct PhaseFit {
    pub fr: f64,
    pub ql: f64,
    pub theta: f64,
    pub delay: f64,
    /// False when any stage hit its iteration limit.
    pub converged: bool,
    pub warnings: Vec<String>,
}

impl PhaseFit {
    /// Model phase at `f` with the fitted parameters.
    pub fn model(&self, f: f64) -> f64 {
        phase_centered(f, self.fr, self.ql, self.theta, self.delay)
    }
}

/// Fit the phase of the centered points `z` (circle center already subtracted).
pub fn fit_phase(
    freq: &[f64],
    z: &[Complex64],
    guess: &PhaseGuess,
    opts: &LmOptions,
) -> Result<PhaseFit, FitError> {
    if freq.len() != z.len() {
        return Err(FitError::InvalidInput(format!(
            "phase fit got {} frequencies and {} points",
            freq.len(),
            z.len()
        )));
    }
    if freq.len() < 2 * EDGE_POINTS {
        return Err(FitError::InvalidInput(format!(
            "phase fit needs at least {} points, got {}",
            2 * EDGE_POINTS,
            freq.len()
        )));
    }

    let phase = unwrap_phase(&z.iter().map(|v| v.arg()).collect::<Vec<_>>());
    let n = phase.len();
    let span = freq[n - 1] - freq[0];
    if !(span > 0.0) {
        return Err(FitError::InvalidInput("frequency span must be positive".into()));
    }

    let mut warnings = Vec::new();

    let (lo, hi) = phase
        .iter()
        .fold((f64::INFINITY, f64::NEG_INFINITY), |(lo, hi), &p| (lo.min(p), hi.max(p)));
    let mut roll_off = TAU;
    if hi - lo < MIN_ROLL_OFF_FRACTION * TAU {
        let msg = format!(
            "phase spans only {:.2} rad; resonance may lie partly outside the window",
            hi - lo
        );
        log::warn!("{msg}");
        warnings.push(msg);
        roll_off = hi - lo;
    }

    let fr_guess = match guess.fr {
        Some(fr) => fr,
        None => {
            let sigma = (n as f64 / 20.0).clamp(1.0, 30.0);
            let slope = gradient(&gaussian_filter1d(&phase, sigma));
            let idx = argmax_abs(&slope).ok_or_else(|| {
                FitError::Numerical("phase derivative has no finite maximum".into())
            })?;
            freq[idx]
        }
    };
    let ql_guess = guess.ql.unwrap_or(2.0 * fr_guess / span);
    let theta_guess = guess.theta.unwrap_or_else(|| {
        let head: f64 = phase[..EDGE_POINTS].iter().sum::<f64>() / EDGE_POINTS as f64;
        let tail: f64 = phase[n - EDGE_POINTS..].iter().sum::<f64>() / EDGE_POINTS as f64;
        0.5 * (head + tail)
    });
    let delay_guess = guess
        .delay
        .unwrap_or(-(phase[n - 1] - phase[0] + roll_off) / (TAU * span));

    let mut params = [fr_guess, ql_guess, theta_guess, delay_guess * span];
    if params.iter().any(|v| !v.is_finite()) {
        return Err(FitError::Numerical(format!(
            "phase fit starting point is not finite: {params:?}"
        )));
    }

    let stages: [&[usize]; 5] = [
        &[QL],
        &[FR, THETA],
        &[DELAY],
        &[FR, QL],
        &[FR, QL, THETA, DELAY],
    ];
    let mut converged = true;
    for free in stages {
        converged &= run_stage(freq, &phase, span, &mut params, free, opts);
    }

    if params.iter().any(|v| !v.is_finite()) {
        return Err(FitError::Numerical("phase fit diverged".into()));
    }
    if !converged {
        let msg = "phase fit did not converge within the iteration limit".to_string();
        log::warn!("{msg}");
        warnings.push(msg);
    }

    Ok(PhaseFit {
        fr: params[FR],
        ql: params[QL],
        theta: params[THETA],
        delay: params[DELAY] / span,
        converged,
        warnings,
    })
}

/// Optimize the parameters listed in `free`, keeping the rest fixed.
fn run_stage(
    freq: &[f64],
    phase: &[f64],
    span: f64,
    params: &mut [f64; 4],
    free: &[usize],
    opts: &LmOptions,
) -> bool {
    let base = *params;
    let resid = |p: &[f64]| -> Vec<f64> {
        let mut q = base;
        for (k, &i) in free.iter().enumerate() {
            q[i] = p[k];
        }
        residuals(freq, phase, span, &q)
    };
    let p0: Vec<f64> = free.iter().map(|&i| params[i]).collect();
    let report = levenberg_marquardt(&resid, &p0, opts);
    for (k, &i) in free.iter().enumerate() {
        params[i] = report.params[k];
    }
    report.converged
}

/// Wrapped phase difference, so a `2π` offset between data and model costs nothing.
fn residuals(freq: &[f64], phase: &[f64], span: f64, q: &[f64; 4]) -> Vec<f64> {
    let delay = q[DELAY] / span;
    freq.iter()
        .zip(phase.iter())
        .map(|(&f, &p)| periodic_boundary(p - phase_centered(f, q[FR], q[QL], q[THETA], delay)))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::math::linspace;

    fn centered_trace(fr: f64, ql: f64, theta: f64, delay: f64) -> (Vec<f64>, Vec<Complex64>) {
        let freq = linspace(fr - 1.0e7, fr + 1.0e7, 401);
        let z = freq
            .iter()
            .map(|&f| Complex64::from_polar(0.3, phase_centered(f, fr, ql, theta, delay)))
            .collect();
        (freq, z)
    }

    #[test]
    fn recovers_noise_free_parameters() {
        let (freq, z) = centered_trace(5.0e9, 1.0e4, 0.4, 2.0e-9);
        let fit = fit_phase(&freq, &z, &PhaseGuess::default(), &LmOptions::default()).unwrap();

        assert!((fit.fr - 5.0e9).abs() < 10.0, "fr = {}", fit.fr);
        assert!((fit.ql / 1.0e4 - 1.0).abs() < 1e-4, "Ql = {}", fit.ql);
        assert!((fit.delay - 2.0e-9).abs() < 1e-12, "delay = {}", fit.delay);
        assert!(periodic_boundary(fit.theta - 0.4).abs() < 1e-6);
        assert!(fit.warnings.is_empty());
    }

    #[test]
    fn respects_user_guess() {
        let (freq, z) = centered_trace(6.0e9, 2.0e4, -1.0, 0.0);
        let guess = PhaseGuess {
            fr: Some(6.0e9 + 2.0e5),
            ql: Some(1.5e4),
            ..PhaseGuess::default()
        };
        let fit = fit_phase(&freq, &z, &guess, &LmOptions::default()).unwrap();
        assert!((fit.fr - 6.0e9).abs() < 10.0);
        assert!((fit.ql / 2.0e4 - 1.0).abs() < 1e-4);
    }

    #[test]
    fn warns_when_roll_off_is_incomplete() {
        // Window only covers the upper flank of the resonance.
        let fr = 5.0e9;
        let freq = linspace(fr + 2.0e5, fr + 4.0e6, 200);
        let z: Vec<Complex64> = freq
            .iter()
            .map(|&f| Complex64::from_polar(1.0, phase_centered(f, fr, 1.0e4, 0.0, 0.0)))
            .collect();
        let fit = fit_phase(&freq, &z, &PhaseGuess::default(), &LmOptions::default()).unwrap();
        assert!(!fit.warnings.is_empty());
    }

    #[test]
    fn rejects_mismatched_lengths() {
        let freq = linspace(1.0, 2.0, 20);
        let z = vec![Complex64::new(1.0, 0.0); 19];
        assert!(matches!(
            fit_phase(&freq, &z, &PhaseGuess::default(), &LmOptions::default()),
            Err(FitError::InvalidInput(_))
        ));
    }
}
