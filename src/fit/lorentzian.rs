//! Lorentzian fit of the power response `|S|²`.
//!
//! `|S|²(f) = offset + height / (1 + (2(f − f0)/fwhm)²)`
//!
//! A quick estimate of `f_res` and `Ql = f0/fwhm` that ignores the phase; a
//! negative `height` describes a dip (notch), a positive one a peak.

use nalgebra::DMatrix;

use crate::domain::{ComplexTrace, DEFAULT_OUT_NOP, ExtractData, FitDiagnostics, FitResult};
use crate::error::FitError;
use crate::fit::base::{ResonatorFit, nan_result};
use crate::math::{LmOptions, levenberg_marquardt, linspace};

pub const LORENTZIAN_FIT_KEYS: &[&str] = &[
    "Ql",
    "Ql_err",
    "chi_square",
    "f_res",
    "f_res_err",
    "fwhm",
    "height",
    "offset",
];

const F0: usize = 0;
const FWHM: usize = 1;
const HEIGHT: usize = 2;
const OFFSET: usize = 3;

#[derive(Debug, Clone)]
pub struct LorentzianFit {
    out_nop: usize,
    lm: LmOptions,
    result: FitResult,
}

impl LorentzianFit {
    pub fn new(out_nop: usize) -> Self {
        Self {
            out_nop,
            lm: LmOptions::default(),
            result: FitResult::nan_filled(LORENTZIAN_FIT_KEYS, out_nop),
        }
    }

    fn run(&self, trace: &ComplexTrace) -> Result<FitResult, FitError> {
        let freq = trace.freq();
        let power: Vec<f64> = trace.amp().iter().map(|a| a * a).collect();
        let p0 = initial_guess(freq, &power)?;

        let resid = |p: &[f64]| -> Vec<f64> {
            freq.iter()
                .zip(power.iter())
                .map(|(&f, &y)| lorentzian(f, p) - y)
                .collect()
        };
        let report = levenberg_marquardt(&resid, &p0, &self.lm);
        let p = &report.params;
        let fwhm = p[FWHM].abs();
        if !(p.iter().all(|v| v.is_finite()) && fwhm > 0.0) {
            return Err(FitError::Numerical(format!("Lorentzian fit diverged: {p:?}")));
        }

        let mut diag = FitDiagnostics {
            converged: report.converged,
            ..FitDiagnostics::default()
        };
        if !report.converged {
            let msg = "Lorentzian fit did not converge within the iteration limit".to_string();
            log::warn!("{msg}");
            diag.warnings.push(msg);
        }

        let mut extract = ExtractData::nan_filled(LORENTZIAN_FIT_KEYS);
        let ql = p[F0] / fwhm;
        extract.set("f_res", p[F0]);
        extract.set("fwhm", fwhm);
        extract.set("Ql", ql);
        extract.set("height", p[HEIGHT]);
        extract.set("offset", p[OFFSET]);
        extract.set(
            "chi_square",
            report.cost / (report.n_residuals as f64 - p.len() as f64),
        );

        match report.covariance(&resid) {
            Some(cov) => write_errors(&mut extract, p, &cov),
            None => {
                let msg = "error calculation failed".to_string();
                log::warn!("{msg}");
                diag.warnings.push(msg);
            }
        }

        let freq_fit = linspace(trace.f_min(), trace.f_max(), self.out_nop);
        let amp_fit = freq_fit
            .iter()
            .map(|&f| lorentzian(f, p).max(0.0).sqrt())
            .collect();
        Ok(FitResult {
            pha_fit: vec![f64::NAN; freq_fit.len()],
            amp_fit,
            freq_fit,
            extract_data: extract,
            diagnostics: diag,
        })
    }
}

impl Default for LorentzianFit {
    fn default() -> Self {
        Self::new(DEFAULT_OUT_NOP)
    }
}

impl ResonatorFit for LorentzianFit {
    fn name(&self) -> &'static str {
        "lorentzian"
    }

    fn extract_keys(&self) -> &'static [&'static str] {
        LORENTZIAN_FIT_KEYS
    }

    fn out_nop(&self) -> usize {
        self.out_nop
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

fn lorentzian(f: f64, p: &[f64]) -> f64 {
    let x = 2.0 * (f - p[F0]) / p[FWHM];
    p[OFFSET] + p[HEIGHT] / (1.0 + x * x)
}

/// Start from the point furthest from the edge level.
fn initial_guess(freq: &[f64], power: &[f64]) -> Result<Vec<f64>, FitError> {
    let n = power.len();
    let edge = (n / 10).max(1);
    let offset = (power[..edge].iter().sum::<f64>() + power[n - edge..].iter().sum::<f64>())
        / (2 * edge) as f64;

    let (peak, _) = power
        .iter()
        .enumerate()
        .map(|(i, &y)| (i, (y - offset).abs()))
        .fold((0, f64::NEG_INFINITY), |best, cur| if cur.1 > best.1 { cur } else { best });
    let height = power[peak] - offset;
    if !(height.abs() > 1e-12 * offset.abs().max(f64::MIN_POSITIVE)) {
        return Err(FitError::Degenerate("power response is flat".into()));
    }

    let step = (freq[n - 1] - freq[0]) / (n as f64 - 1.0);
    let above_half = power
        .iter()
        .filter(|&&y| (y - offset) / height >= 0.5)
        .count();
    let fwhm = (above_half as f64 * step).max(2.0 * step);

    Ok(vec![freq[peak], fwhm, height, offset])
}

fn write_errors(extract: &mut ExtractData, p: &[f64], cov: &DMatrix<f64>) {
    let fwhm = p[FWHM].abs();
    extract.set("f_res_err", cov[(F0, F0)].sqrt());

    // Ql = f0 / fwhm
    let g0 = 1.0 / fwhm;
    let g1 = -p[F0] / (fwhm * fwhm) * p[FWHM].signum();
    let var = g0 * g0 * cov[(F0, F0)] + g1 * g1 * cov[(FWHM, FWHM)] + 2.0 * g0 * g1 * cov[(F0, FWHM)];
    extract.set("Ql_err", var.sqrt());
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::data::SyntheticResonator;
    use crate::domain::NPorts;
    use rand::SeedableRng;
    use rand::rngs::StdRng;

    #[test]
    fn recovers_power_peak() {
        let freq = linspace(4.9e9, 5.1e9, 400);
        let truth = [5.01e9, 8.0e6, 0.6, 0.1];
        let amp: Vec<f64> = freq.iter().map(|&f| lorentzian(f, &truth).sqrt()).collect();
        let trace = ComplexTrace::new(freq, amp, vec![0.0; 400]).unwrap();

        let mut fitter = LorentzianFit::default();
        let x = &fitter.do_fit(&trace).unwrap().extract_data;
        assert!((x["f_res"] - 5.01e9).abs() < 100.0);
        assert!((x["fwhm"] - 8.0e6).abs() < 100.0);
        assert!((x["Ql"] / (5.01e9 / 8.0e6) - 1.0).abs() < 1e-5);
        assert!((x["offset"] - 0.1).abs() < 1e-6);
    }

    #[test]
    fn locates_notch_dip() {
        let mut res = SyntheticResonator::default();
        res.params.phi = 0.0;
        res.params.n_ports = NPorts::Notch;
        let mut rng = StdRng::seed_from_u64(2);
        let trace = res.trace(&res.sweep(301, 10.0), 1e-4, &mut rng).unwrap();

        let mut fitter = LorentzianFit::default();
        let result = fitter.do_fit(&trace).unwrap();
        let x = &result.extract_data;
        assert!(x["height"] < 0.0);
        assert!((x["f_res"] - res.params.fr).abs() < 0.05 * res.params.fr / res.params.ql);
        assert!((x["Ql"] / res.params.ql - 1.0).abs() < 0.05);
        assert!(x["f_res_err"] > 0.0);
        assert!(result.pha_fit.iter().all(|v| v.is_nan()));
        assert_eq!(result.extract_data.len(), LORENTZIAN_FIT_KEYS.len());
    }

    #[test]
    fn flat_trace_is_degenerate() {
        let freq = linspace(1.0e9, 1.1e9, 30);
        let trace = ComplexTrace::new(freq, vec![0.7; 30], vec![0.0; 30]).unwrap();
        let mut fitter = LorentzianFit::default();
        assert!(matches!(fitter.do_fit(&trace), Err(FitError::Degenerate(_))));
        assert!(fitter.result().extract_data.iter().all(|(_, v)| v.is_nan()));
    }
}
