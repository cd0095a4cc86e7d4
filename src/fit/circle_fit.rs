//! Circle-fit engine for notch and reflection resonators.
//!
//! One call to [`CircleFit::do_fit`] runs the whole chain:
//!
//! 1. cable delay, either fixed by the caller or refined iteratively
//! 2. algebraic circle fit and staged phase fit of the delay-corrected trace
//! 3. calibration against the off-resonant point (`a`, `α`, `φ`)
//! 4. quality factors with and without diameter correction
//! 5. covariance of `(fr, Ql, |Qc|, φ)` and propagated errors
//! 6. Fano-leakage bounds on `Qc` and `Qi`
//! 7. simulated response on an `out_nop`-point grid

use std::f64::consts::{PI, TAU};

use nalgebra::DMatrix;
use num_complex::Complex64;

use crate::domain::{
    ComplexTrace, DEFAULT_OUT_NOP, ExtractData, FitConfig, FitDiagnostics, FitResult, NPorts,
};
use crate::error::FitError;
use crate::fit::base::{ResonatorFit, nan_result};
use crate::fit::circle::{Circle, fit_circle};
use crate::fit::phase::{PhaseFit, PhaseGuess, fit_phase};
use crate::math::{LmOptions, linspace, periodic_boundary, scaled_normal_inverse, stats, unwrap_phase};
use crate::models::{Environment, ResonatorParams};

/// Quantities reported by [`CircleFit`].
pub const CIRCLE_FIT_KEYS: &[&str] = &[
    "Qc",
    "Qc_err",
    "Qc_max",
    "Qc_min",
    "Qc_no_dia_corr",
    "Qc_no_dia_corr_err",
    "Qi",
    "Qi_err",
    "Qi_max",
    "Qi_min",
    "Qi_no_dia_corr",
    "Qi_no_dia_corr_err",
    "Ql",
    "Ql_err",
    "a",
    "alpha",
    "chi_square",
    "delay",
    "delay_remaining",
    "f_res",
    "f_res_err",
    "fano_b",
    "phi",
    "phi_err",
    "theta",
];

/// Starting delay guess for the correction fits inside the refinement loop (s).
const DELAY_CORRECTION_GUESS: f64 = 5e-11;

/// Fraction of the edge-slope delay used to seed the refinement loop.
///
/// The resonance steepens the phase at the sweep edges, so the seed starts
/// short of the slope and the corrections keep one sign.
const INITIAL_DELAY_FRACTION: f64 = 0.5;

/// Share of the sweep in each edge band of the delay seed.
const EDGE_BAND_FRACTION: f64 = 0.1;

const EDGE_BAND_MIN_POINTS: usize = 3;

/// Fixed nudge applied when a correction points against the current delay (s).
const DELAY_NUDGE: f64 = 5e-12;

/// Newton steps on the delay after the correction loop.
const POLISH_STEPS: usize = 3;

/// Times a delay step is halved before it is given up.
const MAX_STEP_HALVINGS: usize = 4;

#[derive(Debug, Clone)]
pub struct CircleFitOptions {
    pub n_ports: NPorts,
    /// Skip the delay refinement and use this cable delay (s).
    pub fixed_delay: Option<f64>,
    /// Assumed leakage suppression (dB) for the Fano bounds.
    pub isolation_db: f64,
    pub fit_delay_max_iterations: usize,
    pub out_nop: usize,
    pub calc_errors: bool,
    /// Starting values for the phase fit of the calibrated trace.
    pub guess: PhaseGuess,
    pub lm: LmOptions,
}

impl Default for CircleFitOptions {
    fn default() -> Self {
        Self {
            n_ports: NPorts::Notch,
            fixed_delay: None,
            isolation_db: 15.0,
            fit_delay_max_iterations: 5,
            out_nop: DEFAULT_OUT_NOP,
            calc_errors: true,
            guess: PhaseGuess::default(),
            lm: LmOptions::default(),
        }
    }
}

impl From<&FitConfig> for CircleFitOptions {
    fn from(cfg: &FitConfig) -> Self {
        Self {
            n_ports: cfg.n_ports,
            fixed_delay: cfg.fixed_delay,
            isolation_db: cfg.isolation_db,
            fit_delay_max_iterations: cfg.fit_delay_max_iterations,
            out_nop: cfg.out_nop,
            calc_errors: cfg.calc_errors,
            ..Self::default()
        }
    }
}

/// Circle and phase fit of the trace with a trial delay removed.
#[derive(Debug, Clone)]
struct CenteredFit {
    circle: Circle,
    phase: PhaseFit,
    /// Delay-corrected trace.
    z: Vec<Complex64>,
    /// Standard deviation of the phase residuals (rad).
    noise: f64,
}

impl CenteredFit {
    /// Delay left in the trace, in the frame of the measurement line.
    ///
    /// Rotating the trace about the origin by `ε` turns the off-resonant
    /// points about the circle center by `ε·(1 + |c|/r)`, so the phase fit
    /// sees the leftover delay magnified by that factor.
    fn residual_delay(&self) -> f64 {
        let r = self.circle.r;
        self.phase.delay * r / (r + self.circle.center().norm())
    }

    fn is_physical(&self) -> bool {
        self.phase.ql > 0.0 && self.phase.ql.is_finite()
    }
}

/// Calibrated circle of one trace.
#[derive(Debug, Clone)]
struct Calibration {
    phase: PhaseFit,
    a: f64,
    alpha: f64,
    phi: f64,
    r_norm: f64,
    z_norm: Vec<Complex64>,
}

/// Fitted delay and how it was obtained.
#[derive(Debug, Clone, Copy)]
struct DelayEstimate {
    delay: f64,
    iterations: usize,
    converged: bool,
}

#[derive(Debug, Clone)]
pub struct CircleFit {
    opts: CircleFitOptions,
    result: FitResult,
}

impl CircleFit {
    pub fn new(opts: CircleFitOptions) -> Self {
        let result = FitResult::nan_filled(CIRCLE_FIT_KEYS, opts.out_nop);
        Self { opts, result }
    }

    pub fn options(&self) -> &CircleFitOptions {
        &self.opts
    }

    fn run(&self, trace: &ComplexTrace) -> Result<FitResult, FitError> {
        let freq = trace.freq();
        let z_raw = trace.to_complex();
        let mut diag = FitDiagnostics::default();

        let (estimate, fit) = match self.opts.fixed_delay {
            Some(delay) => (
                DelayEstimate {
                    delay,
                    iterations: 0,
                    converged: true,
                },
                self.center_and_fit(freq, &z_raw, delay, &self.opts.guess)?,
            ),
            None => self.fit_delay(freq, &z_raw)?,
        };
        diag.delay_iterations = estimate.iterations;
        if !estimate.converged {
            let msg = format!(
                "delay could not be fit within {} iterations",
                self.opts.fit_delay_max_iterations
            );
            log::warn!("{msg}");
            diag.warnings.push(msg);
        }

        let cal = self.calibrate(fit)?;
        diag.warnings.extend(cal.phase.warnings.iter().cloned());
        diag.converged = estimate.converged && cal.phase.converged;

        let params = ResonatorParams {
            fr: cal.phase.fr,
            ql: cal.phase.ql,
            abs_qc: cal.phase.ql / (self.opts.n_ports.count() * cal.r_norm),
            phi: cal.phi,
            n_ports: self.opts.n_ports,
        };
        if ![params.fr, params.ql, params.abs_qc, params.phi]
            .iter()
            .all(|v| v.is_finite())
        {
            return Err(FitError::Numerical(format!(
                "resonator parameters are not finite: {params:?}"
            )));
        }

        let mut extract = ExtractData::nan_filled(CIRCLE_FIT_KEYS);
        extract.set("f_res", params.fr);
        extract.set("Ql", params.ql);
        extract.set("Qc", params.qc());
        extract.set("Qc_no_dia_corr", params.abs_qc);
        extract.set("Qi", params.qi());
        extract.set("Qi_no_dia_corr", 1.0 / (1.0 / params.ql - 1.0 / params.abs_qc));
        extract.set("a", cal.a);
        extract.set("alpha", cal.alpha);
        extract.set("phi", cal.phi);
        extract.set("theta", cal.phase.theta);
        extract.set("delay", estimate.delay);
        extract.set("delay_remaining", cal.phase.delay);

        let residual_ss = chi_sum(freq, &cal.z_norm, &params);
        let dof = freq.len() as f64 - 4.0;
        let chi_square = residual_ss / dof;
        extract.set("chi_square", chi_square);

        if self.opts.calc_errors {
            match covariance(freq, &params, chi_square) {
                Some(cov) => write_errors(&mut extract, &params, &cov),
                None => {
                    let msg = "error calculation failed".to_string();
                    log::warn!("{msg}");
                    diag.warnings.push(msg);
                }
            }
        }

        self.fano_bounds(&mut extract, &params, cal.r_norm, &mut diag);

        let env = Environment {
            a: cal.a,
            alpha: cal.alpha,
            delay: estimate.delay,
        };
        let freq_fit = linspace(trace.f_min(), trace.f_max(), self.opts.out_nop);
        let z_fit: Vec<Complex64> = freq_fit.iter().map(|&f| params.response(f, &env)).collect();

        Ok(FitResult {
            amp_fit: z_fit.iter().map(|z| z.norm()).collect(),
            pha_fit: z_fit.iter().map(|z| z.arg()).collect(),
            freq_fit,
            extract_data: extract,
            diagnostics: diag,
        })
    }

    /// Iteratively remove the cable delay from the raw trace.
    ///
    /// The loop applies the asymmetric correction policy of [`next_delay`];
    /// a few Newton steps then fold whatever delay is left into the estimate.
    /// Steps that end on an unphysical fit are halved.
    fn fit_delay(
        &self,
        freq: &[f64],
        z_raw: &[Complex64],
    ) -> Result<(DelayEstimate, CenteredFit), FitError> {
        let span = freq[freq.len() - 1] - freq[0];

        let mut delay = INITIAL_DELAY_FRACTION * edge_delay(freq, z_raw)?;
        let mut last_good: Option<f64> = None;
        let mut guess = PhaseGuess::default();
        let mut iterations = 0;

        while iterations < self.opts.fit_delay_max_iterations {
            iterations += 1;
            let fit = match self.physical_fit(freq, z_raw, delay, &guess) {
                Ok(fit) => fit,
                Err(err) => match last_good {
                    Some(good) => {
                        log::debug!("delay iteration {iterations}: {err}; halving the step");
                        delay = good + 0.5 * (delay - good);
                        continue;
                    }
                    None => return Err(err),
                },
            };
            guess = PhaseGuess {
                fr: Some(fit.phase.fr),
                ql: Some(fit.phase.ql),
                theta: None,
                delay: Some(DELAY_CORRECTION_GUESS),
            };

            let correction = fit.residual_delay();
            log::debug!(
                "delay iteration {iterations}: delay={delay:.4e} correction={correction:.4e} noise={:.3e}",
                fit.noise
            );
            if TAU * span * correction.abs() <= fit.noise {
                break;
            }

            last_good = Some(delay);
            delay = next_delay(delay, correction);
            if !delay.is_finite() {
                return Err(FitError::Numerical("delay refinement diverged".into()));
            }
        }

        let mut fit = match self.physical_fit(freq, z_raw, delay, &self.opts.guess) {
            Ok(fit) => fit,
            Err(err) => {
                let good = last_good.ok_or(err)?;
                delay = good;
                self.physical_fit(freq, z_raw, delay, &self.opts.guess)?
            }
        };
        for _ in 0..POLISH_STEPS {
            let step = fit.residual_delay();
            if TAU * span * step.abs() <= fit.noise {
                break;
            }
            match self.damped_step(freq, z_raw, delay, step) {
                Some((next, next_fit)) => (delay, fit) = (next, next_fit),
                None => break,
            }
        }

        let converged = TAU * span * fit.residual_delay().abs() <= fit.noise;
        Ok((
            DelayEstimate {
                delay,
                iterations,
                converged,
            },
            fit,
        ))
    }

    /// Move `delay` by `step`, halving the step while the fit is unphysical.
    fn damped_step(
        &self,
        freq: &[f64],
        z_raw: &[Complex64],
        delay: f64,
        mut step: f64,
    ) -> Option<(f64, CenteredFit)> {
        for _ in 0..=MAX_STEP_HALVINGS {
            match self.physical_fit(freq, z_raw, delay + step, &self.opts.guess) {
                Ok(fit) => return Some((delay + step, fit)),
                Err(err) => {
                    log::debug!("delay step {step:.3e} rejected: {err}");
                    step *= 0.5;
                }
            }
        }
        None
    }

    /// [`Self::center_and_fit`], refusing fits with a non-positive `Ql`.
    fn physical_fit(
        &self,
        freq: &[f64],
        z_raw: &[Complex64],
        delay: f64,
        guess: &PhaseGuess,
    ) -> Result<CenteredFit, FitError> {
        let fit = self.center_and_fit(freq, z_raw, delay, guess)?;
        if fit.is_physical() {
            Ok(fit)
        } else {
            Err(FitError::Numerical(format!(
                "loaded quality factor {:.4e} is unphysical at delay {delay:.4e}",
                fit.phase.ql
            )))
        }
    }

    /// Remove `delay`, then fit the circle and the phase around its center.
    fn center_and_fit(
        &self,
        freq: &[f64],
        z_raw: &[Complex64],
        delay: f64,
        guess: &PhaseGuess,
    ) -> Result<CenteredFit, FitError> {
        let z = rotate(freq, z_raw, delay);
        let circle = fit_circle(&z)?;
        let zc = centered(&z, &circle);
        let phase = fit_phase(freq, &zc, guess, &self.opts.lm)?;

        let measured = unwrap_phase(&zc.iter().map(|v| v.arg()).collect::<Vec<_>>());
        let residuals: Vec<f64> = freq
            .iter()
            .zip(measured.iter())
            .map(|(&f, &p)| p - phase.model(f))
            .collect();
        let noise = stats::std(&residuals, 0).unwrap_or(0.0);

        Ok(CenteredFit {
            circle,
            phase,
            z,
            noise,
        })
    }

    /// Normalize a centered fit to its off-resonant point.
    fn calibrate(&self, fit: CenteredFit) -> Result<Calibration, FitError> {
        let CenteredFit {
            circle, phase, z, ..
        } = fit;

        let beta = periodic_boundary(phase.theta - PI);
        let offres = circle.center() + Complex64::from_polar(circle.r, beta);
        let a = offres.norm();
        let alpha = offres.arg();
        if !(a.is_finite() && a > 0.0) {
            return Err(FitError::Numerical(
                "off-resonant point coincides with the origin".into(),
            ));
        }
        let phi = periodic_boundary(beta - alpha);
        let scale = Complex64::from_polar(a, alpha);

        Ok(Calibration {
            phase,
            a,
            alpha,
            phi,
            r_norm: circle.r / a,
            z_norm: z.iter().map(|v| v / scale).collect(),
        })
    }

    /// Worst-case `Qc`/`Qi` band for leakage `isolation_db` below the signal.
    fn fano_bounds(
        &self,
        extract: &mut ExtractData,
        params: &ResonatorParams,
        r_norm: f64,
        diag: &mut FitDiagnostics,
    ) {
        let n = self.opts.n_ports.count();
        let b = 10f64.powf(-self.opts.isolation_db / 20.0);
        let b = b / (1.0 - b);
        extract.set("fano_b", b);

        let sin_phi = params.phi.sin();
        if sin_phi.abs() > b {
            let msg = format!(
                "measured asymmetry |sin φ| = {:.3} exceeds the assumed isolation of {} dB",
                sin_phi.abs(),
                self.opts.isolation_db
            );
            log::warn!("{msg}");
            diag.warnings.push(msg);
        }

        let r_mid = r_norm * params.phi.cos();
        let r_err = r_norm * (b * b - sin_phi * sin_phi).sqrt();
        let (r_min, r_max) = (r_mid - r_err, r_mid + r_err);

        extract.set("Qc_min", params.ql / (n * r_max));
        extract.set("Qc_max", params.ql / (n * r_min));
        extract.set("Qi_min", params.ql / (1.0 - n * r_min));
        if r_max >= 1.0 / n {
            let msg = "Qi_max is unphysical (R_max ≥ 1/n_ports); reported as NaN".to_string();
            log::warn!("{msg}");
            diag.warnings.push(msg);
        } else {
            extract.set("Qi_max", params.ql / (1.0 - n * r_max));
        }
    }
}

impl Default for CircleFit {
    fn default() -> Self {
        Self::new(CircleFitOptions::default())
    }
}

impl ResonatorFit for CircleFit {
    fn name(&self) -> &'static str {
        "circle"
    }

    fn extract_keys(&self) -> &'static [&'static str] {
        CIRCLE_FIT_KEYS
    }

    fn out_nop(&self) -> usize {
        self.opts.out_nop
    }

    fn do_fit(&mut self, trace: &ComplexTrace) -> Result<&FitResult, FitError> {
        self.result = nan_result(&*self);
        self.result = self.run(trace)?;
        Ok(&self.result)
    }

    fn result(&self) -> &FitResult {
        &self.result
    }
}

/// Asymmetric update of the delay estimate by a fitted correction.
fn next_delay(delay: f64, correction: f64) -> f64 {
    if correction * delay < 0.0 {
        if correction.abs() > delay.abs() {
            delay / 2.0
        } else {
            delay + DELAY_NUDGE.copysign(correction)
        }
    } else if correction.abs() >= 1e-8 {
        delay + correction
    } else if correction.abs() >= 1e-9 {
        delay + 1.1 * correction
    } else {
        delay + correction
    }
}

/// Cable delay from the phase slope in the outer bands of the sweep.
///
/// Each band keeps its own intercept, so the roll-off across the resonance
/// does not leak into the shared slope.
fn edge_delay(freq: &[f64], z: &[Complex64]) -> Result<f64, FitError> {
    let phase = unwrap_phase(&z.iter().map(|v| v.arg()).collect::<Vec<_>>());
    let n = phase.len();
    let band = ((n as f64 * EDGE_BAND_FRACTION) as usize).max(EDGE_BAND_MIN_POINTS);
    if 2 * band > n {
        return Err(FitError::InvalidInput(format!(
            "delay estimate needs at least {} points, got {n}",
            2 * band
        )));
    }

    let (mut sxy, mut sxx) = (0.0, 0.0);
    for range in [0..band, n - band..n] {
        let f = &freq[range.clone()];
        let p = &phase[range];
        let (Some(f_mean), Some(p_mean)) = (stats::mean(f), stats::mean(p)) else {
            continue;
        };
        for (&fi, &ph) in f.iter().zip(p) {
            sxy += (fi - f_mean) * (ph - p_mean);
            sxx += (fi - f_mean) * (fi - f_mean);
        }
    }

    let delay = -sxy / (TAU * sxx);
    if delay.is_finite() {
        Ok(delay)
    } else {
        Err(FitError::Numerical("edge phase slope is not finite".into()))
    }
}

fn rotate(freq: &[f64], z: &[Complex64], delay: f64) -> Vec<Complex64> {
    freq.iter()
        .zip(z.iter())
        .map(|(&f, &v)| v * Complex64::from_polar(1.0, TAU * f * delay))
        .collect()
}

fn centered(z: &[Complex64], circle: &Circle) -> Vec<Complex64> {
    let c = circle.center();
    z.iter().map(|v| v - c).collect()
}

fn chi_sum(freq: &[f64], z_norm: &[Complex64], params: &ResonatorParams) -> f64 {
    freq.iter()
        .zip(z_norm.iter())
        .map(|(&f, &z)| (z - params.normalized(f)).norm_sqr())
        .sum()
}

/// Covariance of `(fr, Ql, |Qc|, φ)` from the analytic Jacobian.
fn covariance(freq: &[f64], params: &ResonatorParams, chi_square: f64) -> Option<DMatrix<f64>> {
    if !(chi_square.is_finite() && chi_square > 0.0) {
        return None;
    }
    let mut j = DMatrix::<f64>::zeros(2 * freq.len(), 4);
    for (i, &f) in freq.iter().enumerate() {
        for (k, d) in params.normalized_jacobian(f).iter().enumerate() {
            j[(2 * i, k)] = d.re;
            j[(2 * i + 1, k)] = d.im;
        }
    }
    Some(scaled_normal_inverse(&j)? * chi_square)
}

fn write_errors(extract: &mut ExtractData, p: &ResonatorParams, cov: &DMatrix<f64>) {
    let var = |k: usize| cov[(k, k)];
    let (fr, ql, qc, phi) = (0, 1, 2, 3);
    let (cos, sin) = (p.phi.cos(), p.phi.sin());

    extract.set("f_res_err", var(fr).sqrt());
    extract.set("Ql_err", var(ql).sqrt());
    extract.set("phi_err", var(phi).sqrt());
    extract.set("Qc_no_dia_corr_err", var(qc).sqrt());

    let d_qc = 1.0 / cos;
    let d_phi = p.abs_qc * sin / (cos * cos);
    let qc_var = d_qc * d_qc * var(qc) + d_phi * d_phi * var(phi) + 2.0 * d_qc * d_phi * cov[(qc, phi)];
    extract.set("Qc_err", qc_var.sqrt());

    let denom = 1.0 / p.ql - cos / p.abs_qc;
    let g = [
        1.0 / (denom * denom * p.ql * p.ql),
        -cos / (denom * denom * p.abs_qc * p.abs_qc),
        -sin / (denom * denom * p.abs_qc),
    ];
    let idx = [ql, qc, phi];
    extract.set("Qi_err", propagate(&g, &idx, cov).sqrt());

    let denom = 1.0 / p.ql - 1.0 / p.abs_qc;
    let g = [
        1.0 / (denom * denom * p.ql * p.ql),
        -1.0 / (denom * denom * p.abs_qc * p.abs_qc),
    ];
    extract.set("Qi_no_dia_corr_err", propagate(&g, &idx[..2], cov).sqrt());
}

/// First-order variance `Σ gᵢ gⱼ Cᵢⱼ` over the parameter subset `idx`.
fn propagate(g: &[f64], idx: &[usize], cov: &DMatrix<f64>) -> f64 {
    let mut v = 0.0;
    for (a, &ia) in idx.iter().enumerate() {
        for (b, &ib) in idx.iter().enumerate() {
            v += g[a] * g[b] * cov[(ia, ib)];
        }
    }
    v
}
