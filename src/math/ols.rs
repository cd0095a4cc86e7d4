//! Linear least squares and small dense-matrix helpers.
//!
//! The nonlinear solvers in this crate reduce every iteration to a small linear
//! problem (2–4 unknowns), so we favour robustness over speed:
//! - SVD with progressively looser tolerances for tall or nearly singular systems
//! - column scaling before inverting normal matrices whose parameters live on
//!   wildly different scales (Hz next to seconds next to radians)

use nalgebra::{DMatrix, DVector};

/// Solve a least squares problem using SVD.
///
/// Returns `None` if the system is too ill-conditioned to solve robustly.
pub fn solve_least_squares(x: &DMatrix<f64>, y: &DVector<f64>) -> Option<DVector<f64>> {
    let svd = x.clone().svd(true, true);

    // Try progressively looser tolerances if strict solve fails.
    for &tol in &[1e-12, 1e-10, 1e-8] {
        if let Ok(beta) = svd.solve(y, tol) {
            if beta.iter().all(|v| v.is_finite()) {
                return Some(beta);
            }
        }
    }

    None
}

/// Invert `JᵀJ` for a Jacobian `j`, scaling columns to unit norm first.
///
/// `(JᵀJ)⁻¹ = D (D Jᵀ J D)⁻¹ D` with `D = diag(1/‖J_k‖)`. Returns `None` when a
/// column is identically zero or the scaled matrix is singular.
pub fn scaled_normal_inverse(j: &DMatrix<f64>) -> Option<DMatrix<f64>> {
    let n = j.ncols();
    let norms: Vec<f64> = (0..n).map(|k| j.column(k).norm()).collect();
    if norms.iter().any(|&c| !(c.is_finite() && c > 0.0)) {
        return None;
    }

    let mut js = j.clone();
    for (k, &c) in norms.iter().enumerate() {
        js.column_mut(k).scale_mut(1.0 / c);
    }
    let inv = (js.transpose() * &js).try_inverse()?;

    let mut out = inv;
    for r in 0..n {
        for c in 0..n {
            out[(r, c)] /= norms[r] * norms[c];
        }
    }
    if out.iter().all(|v| v.is_finite()) {
        Some(out)
    } else {
        None
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn least_squares_solves_simple_system() {
        // Fit y = 2 + 3x on x = [0,1,2]
        let x = DMatrix::from_row_slice(3, 2, &[1.0, 0.0, 1.0, 1.0, 1.0, 2.0]);
        let y = DVector::from_row_slice(&[2.0, 5.0, 8.0]);

        let beta = solve_least_squares(&x, &y).unwrap();
        assert!((beta[0] - 2.0).abs() < 1e-10);
        assert!((beta[1] - 3.0).abs() < 1e-10);
    }

    #[test]
    fn scaled_inverse_handles_mixed_scales() {
        // Columns differ by twelve orders of magnitude.
        let j = DMatrix::from_row_slice(3, 2, &[1e-6, 1e6, 2e-6, 0.0, 0.0, 3e6]);
        let inv = scaled_normal_inverse(&j).unwrap();
        let jtj = j.transpose() * &j;
        let eye = &jtj * &inv;
        assert!((eye[(0, 0)] - 1.0).abs() < 1e-9);
        assert!((eye[(1, 1)] - 1.0).abs() < 1e-9);
        assert!(eye[(0, 1)].abs() < 1e-9);
    }

    #[test]
    fn scaled_inverse_rejects_zero_column() {
        let j = DMatrix::from_row_slice(2, 2, &[1.0, 0.0, 2.0, 0.0]);
        assert!(scaled_normal_inverse(&j).is_none());
    }
}
