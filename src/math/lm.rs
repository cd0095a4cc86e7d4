//! Levenberg–Marquardt nonlinear least squares.
//!
//! Minimizes `Σ r_i(p)²` for a residual closure `r`. The Jacobian is estimated
//! with forward differences (step `√ε·|p_k|`), and every linearized step is
//! solved on column-scaled normal equations so that parameters of very
//! different magnitude (resonance frequency in Hz next to a delay in seconds)
//! do not wreck the conditioning.
//!
//! Non-convergence is reported through [`LmReport::converged`], never as an
//! error: the best parameters seen so far are always returned.

use nalgebra::{DMatrix, DVector};

use crate::math::ols::{scaled_normal_inverse, solve_least_squares};

/// Solver tolerances.
#[derive(Debug, Clone, Copy)]
pub struct LmOptions {
    /// Maximum number of outer (Jacobian) iterations.
    pub max_iterations: usize,
    /// Relative cost reduction below which the fit counts as converged.
    pub ftol: f64,
    /// Relative parameter change below which the fit counts as converged.
    pub xtol: f64,
}

impl Default for LmOptions {
    fn default() -> Self {
        Self {
            max_iterations: 200,
            ftol: 1.49e-8,
            xtol: 1.49e-8,
        }
    }
}

/// Outcome of a Levenberg–Marquardt run.
#[derive(Debug, Clone)]
pub struct LmReport {
    pub params: Vec<f64>,
    /// Sum of squared residuals at `params`.
    pub cost: f64,
    pub n_residuals: usize,
    pub iterations: usize,
    pub converged: bool,
}

impl LmReport {
    /// Parameter covariance `(JᵀJ)⁻¹ · cost/(m − n)` at the solution.
    ///
    /// Returns `None` if there are no degrees of freedom left or `JᵀJ` is singular.
    pub fn covariance<F>(&self, residuals: F) -> Option<DMatrix<f64>>
    where
        F: Fn(&[f64]) -> Vec<f64>,
    {
        let n = self.params.len();
        if self.n_residuals <= n {
            return None;
        }
        let r0 = residuals(&self.params);
        let j = forward_jacobian(&residuals, &self.params, &r0)?;
        let inv = scaled_normal_inverse(&j)?;
        Some(inv * (self.cost / (self.n_residuals - n) as f64))
    }
}

/// Run Levenberg–Marquardt from `p0`.
pub fn levenberg_marquardt<F>(residuals: F, p0: &[f64], opts: &LmOptions) -> LmReport
where
    F: Fn(&[f64]) -> Vec<f64>,
{
    let n = p0.len();
    let mut p = p0.to_vec();
    let mut r = residuals(&p);
    let m = r.len();
    let mut cost = sum_sq(&r);

    let mut report = LmReport {
        params: p.clone(),
        cost,
        n_residuals: m,
        iterations: 0,
        converged: false,
    };
    if n == 0 || !cost.is_finite() {
        return report;
    }
    if cost == 0.0 {
        report.converged = true;
        return report;
    }

    let mut lambda = 1e-3;

    for iter in 0..opts.max_iterations {
        report.iterations = iter + 1;

        let Some(j) = forward_jacobian(&residuals, &p, &r) else {
            break;
        };

        // Column scaling: solve for δs = D⁻¹δ with unit-norm columns.
        let scale: Vec<f64> = (0..n)
            .map(|k| {
                let c = j.column(k).norm();
                if c.is_finite() && c > 0.0 { c } else { 1.0 }
            })
            .collect();
        let mut js = j.clone();
        for (k, &c) in scale.iter().enumerate() {
            js.column_mut(k).scale_mut(1.0 / c);
        }
        let rv = DVector::from_column_slice(&r);
        let a = js.transpose() * &js;
        let g = js.transpose() * &rv;

        let mut accepted = false;
        let mut small_step = false;
        let mut first_try = true;
        while lambda < 1e16 {
            let mut damped = a.clone();
            for k in 0..n {
                damped[(k, k)] += lambda;
            }
            let rhs = -g.clone();
            let step_s = match damped.clone().cholesky() {
                Some(chol) => chol.solve(&rhs),
                None => match solve_least_squares(&damped, &rhs) {
                    Some(s) => s,
                    None => {
                        lambda *= 10.0;
                        first_try = false;
                        continue;
                    }
                },
            };

            let trial: Vec<f64> = p
                .iter()
                .enumerate()
                .map(|(k, &pk)| pk + step_s[k] / scale[k])
                .collect();
            let r_trial = residuals(&trial);
            let cost_trial = sum_sq(&r_trial);

            if cost_trial.is_finite() && cost_trial < cost {
                // Tiny progress only means convergence when the step was not
                // throttled by heavy damping.
                if first_try {
                    let rel_reduction = (cost - cost_trial) / cost;
                    let tiny_step = trial.iter().zip(p.iter()).all(|(&t, &pk)| {
                        (t - pk).abs() <= opts.xtol * (pk.abs() + opts.xtol)
                    });
                    small_step = tiny_step || rel_reduction <= opts.ftol;
                }
                p = trial;
                r = r_trial;
                cost = cost_trial;
                lambda = (lambda / 10.0).max(1e-12);
                accepted = true;
                break;
            }
            lambda *= 10.0;
            first_try = false;
        }

        report.params = p.clone();
        report.cost = cost;

        if !accepted {
            // No downhill step exists at any damping: the cost cannot be
            // reduced further at working precision.
            report.converged = true;
            break;
        }
        if small_step || cost == 0.0 {
            report.converged = true;
            break;
        }
    }

    report
}

fn sum_sq(r: &[f64]) -> f64 {
    r.iter().map(|v| v * v).sum()
}

/// Forward-difference Jacobian (`m × n`) of `residuals` at `p`.
pub fn forward_jacobian<F>(residuals: &F, p: &[f64], r0: &[f64]) -> Option<DMatrix<f64>>
where
    F: Fn(&[f64]) -> Vec<f64>,
{
    let eps = f64::EPSILON.sqrt();
    let m = r0.len();
    let n = p.len();
    let mut j = DMatrix::<f64>::zeros(m, n);
    let mut shifted = p.to_vec();

    for k in 0..n {
        let h = if p[k] != 0.0 { eps * p[k].abs() } else { eps };
        shifted[k] = p[k] + h;
        let r1 = residuals(&shifted);
        shifted[k] = p[k];
        if r1.len() != m {
            return None;
        }
        for i in 0..m {
            j[(i, k)] = (r1[i] - r0[i]) / h;
        }
    }

    if j.iter().all(|v| v.is_finite()) {
        Some(j)
    } else {
        None
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fits_exponential_decay() {
        let t: Vec<f64> = (0..40).map(|i| i as f64 * 0.1).collect();
        let y: Vec<f64> = t.iter().map(|&ti| 3.0 * (-1.7 * ti).exp() + 0.5).collect();

        let resid = |p: &[f64]| -> Vec<f64> {
            t.iter()
                .zip(y.iter())
                .map(|(&ti, &yi)| p[0] * (-p[1] * ti).exp() + p[2] - yi)
                .collect()
        };
        let report = levenberg_marquardt(&resid, &[1.0, 1.0, 0.0], &LmOptions::default());

        assert!(report.converged);
        assert!((report.params[0] - 3.0).abs() < 1e-6);
        assert!((report.params[1] - 1.7).abs() < 1e-6);
        assert!((report.params[2] - 0.5).abs() < 1e-6);
    }

    #[test]
    fn handles_badly_scaled_parameters() {
        // A line whose slope lives at 1e-9 and offset at 1e3.
        let x: Vec<f64> = (0..20).map(|i| 5e9 + i as f64 * 1e6).collect();
        let y: Vec<f64> = x.iter().map(|&xi| 2e-9 * (xi - 5e9) + 1e3).collect();
        let resid = |p: &[f64]| -> Vec<f64> {
            x.iter()
                .zip(y.iter())
                .map(|(&xi, &yi)| p[0] * (xi - 5e9) + p[1] - yi)
                .collect()
        };
        let report = levenberg_marquardt(&resid, &[1e-9, 900.0], &LmOptions::default());
        assert!((report.params[0] - 2e-9).abs() < 1e-13);
        assert!((report.params[1] - 1e3).abs() < 1e-4);
    }

    #[test]
    fn covariance_is_none_without_degrees_of_freedom() {
        let resid = |p: &[f64]| -> Vec<f64> { vec![p[0] - 1.0] };
        let report = levenberg_marquardt(&resid, &[0.0], &LmOptions::default());
        assert!(report.covariance(&resid).is_none());
    }
}
