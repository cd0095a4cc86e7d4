//! Algebraic circle fit in the complex plane.
//!
//! Points `z = x + iy` are fitted to the implicit circle
//! `A·(x² + y²) + B·x + C·y + D = 0` by minimizing `AᵀMA` (with `M` the 4×4
//! matrix of geometric moments) under the constraint `B² + C² − 4AD = 1`.
//! The constraint makes the estimate free of the bias that ordinary
//! least squares shows on noisy data.
//!
//! Steps:
//! 1. recenter and rescale the points so the moments are O(1)
//! 2. find the Lagrange multiplier `η` as the smallest root of the quartic
//!    `det(M − ηB) = 0` by Newton's method started at 0
//! 3. take the right singular vector of the smallest singular value of
//!    `M − ηB` as `(A, B, C, D)` and convert it back to centre and radius

use nalgebra::Matrix4;
use num_complex::Complex64;

use crate::error::FitError;

/// Maximum Newton iterations for the quartic root.
const NEWTON_MAX_ITER: usize = 100;

/// A fitted circle.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Circle {
    pub xc: f64,
    pub yc: f64,
    pub r: f64,
}

impl Circle {
    pub fn center(&self) -> Complex64 {
        Complex64::new(self.xc, self.yc)
    }
}

/// Polynomial in `η` up to degree four, lowest coefficient first.
type Poly = [f64; 5];

/// Fit a circle to complex points.
pub fn fit_circle(z: &[Complex64]) -> Result<Circle, FitError> {
    if z.len() < 3 {
        return Err(FitError::InvalidInput(format!(
            "circle fit needs at least 3 points, got {}",
            z.len()
        )));
    }

    let n = z.len() as f64;
    let center = z.iter().sum::<Complex64>() / n;
    let scale = (z.iter().map(|v| (v - center).norm_sqr()).sum::<f64>() / n).sqrt();
    if !(scale.is_finite() && scale > 1e-12 * center.norm().max(f64::MIN_POSITIVE)) {
        return Err(FitError::Degenerate(
            "all points coincide; no circle is defined".into(),
        ));
    }
    let u: Vec<Complex64> = z.iter().map(|v| (v - center) / scale).collect();

    let m = moments(&u);
    let eta = smallest_root(&characteristic_poly(&m))?;

    let mut constrained = m;
    constrained[(0, 3)] += 2.0 * eta;
    constrained[(3, 0)] += 2.0 * eta;
    constrained[(1, 1)] -= eta;
    constrained[(2, 2)] -= eta;

    let svd = constrained.svd(false, true);
    let v_t = svd
        .v_t
        .ok_or_else(|| FitError::Numerical("SVD did not return singular vectors".into()))?;
    let k = svd
        .singular_values
        .iter()
        .enumerate()
        .min_by(|a, b| a.1.partial_cmp(b.1).unwrap_or(std::cmp::Ordering::Equal))
        .map(|(i, _)| i)
        .unwrap_or(3);
    let a = [v_t[(k, 0)], v_t[(k, 1)], v_t[(k, 2)], v_t[(k, 3)]];

    if a[0].abs() < 1e-14 {
        return Err(FitError::Degenerate(
            "points are collinear; circle radius is unbounded".into(),
        ));
    }

    let xc = -a[1] / (2.0 * a[0]);
    let yc = -a[2] / (2.0 * a[0]);
    let r = (a[1] * a[1] + a[2] * a[2] - 4.0 * a[0] * a[3]).sqrt() / (2.0 * a[0].abs());

    let circle = Circle {
        xc: center.re + scale * xc,
        yc: center.im + scale * yc,
        r: scale * r,
    };
    if [circle.xc, circle.yc, circle.r].iter().all(|v| v.is_finite()) {
        Ok(circle)
    } else {
        Err(FitError::Numerical("circle parameters are not finite".into()))
    }
}

fn moments(u: &[Complex64]) -> Matrix4<f64> {
    let mut m = Matrix4::<f64>::zeros();
    for p in u {
        let (x, y) = (p.re, p.im);
        let zi = x * x + y * y;
        let row = [zi, x, y, 1.0];
        for r in 0..4 {
            for c in 0..4 {
                m[(r, c)] += row[r] * row[c];
            }
        }
    }
    m
}

/// Coefficients of `det(M − ηB)` where only four entries depend on `η`.
fn characteristic_poly(m: &Matrix4<f64>) -> Poly {
    let mut entries = [[[0.0; 5]; 4]; 4];
    for r in 0..4 {
        for c in 0..4 {
            entries[r][c][0] = m[(r, c)];
        }
    }
    entries[0][3][1] = 2.0;
    entries[3][0][1] = 2.0;
    entries[1][1][1] = -1.0;
    entries[2][2][1] = -1.0;

    let rows: Vec<Vec<Poly>> = entries.iter().map(|r| r.to_vec()).collect();
    poly_det(&rows)
}

/// Determinant of a matrix of polynomials by cofactor expansion.
fn poly_det(rows: &[Vec<Poly>]) -> Poly {
    let n = rows.len();
    if n == 1 {
        return rows[0][0];
    }
    let mut det = [0.0; 5];
    for j in 0..n {
        let minor: Vec<Vec<Poly>> = rows[1..]
            .iter()
            .map(|row| {
                row.iter()
                    .enumerate()
                    .filter(|(c, _)| *c != j)
                    .map(|(_, p)| *p)
                    .collect()
            })
            .collect();
        let term = poly_mul(&rows[0][j], &poly_det(&minor));
        let sign = if j % 2 == 0 { 1.0 } else { -1.0 };
        for k in 0..5 {
            det[k] += sign * term[k];
        }
    }
    det
}

fn poly_mul(a: &Poly, b: &Poly) -> Poly {
    let mut out = [0.0; 5];
    for i in 0..5 {
        for j in 0..5 - i {
            out[i + j] += a[i] * b[j];
        }
    }
    out
}

fn poly_eval(p: &Poly, x: f64) -> (f64, f64) {
    let mut value = 0.0;
    let mut deriv = 0.0;
    for k in (0..5).rev() {
        deriv = deriv * x + value;
        value = value * x + p[k];
    }
    (value, deriv)
}

/// Newton iteration from `η = 0`.
///
/// `det(M) ≥ 0` and the polynomial decreases towards its first positive root,
/// so the iteration approaches that root monotonically.
fn smallest_root(p: &Poly) -> Result<f64, FitError> {
    let mut x = 0.0;
    for _ in 0..NEWTON_MAX_ITER {
        let (value, deriv) = poly_eval(p, x);
        if value == 0.0 {
            return Ok(x);
        }
        if !(deriv.is_finite() && deriv != 0.0) {
            return Err(FitError::Numerical(
                "vanishing derivative while solving the circle constraint".into(),
            ));
        }
        let next = x - value / deriv;
        if !next.is_finite() {
            return Err(FitError::Numerical("circle constraint root diverged".into()));
        }
        if (next - x).abs() <= 1e-15 * (1.0 + next.abs()) {
            return Ok(next);
        }
        x = next;
    }
    Ok(x)
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::SeedableRng;
    use rand::rngs::StdRng;
    use rand_distr::{Distribution, Normal};

    fn arc(xc: f64, yc: f64, r: f64, from: f64, to: f64, n: usize) -> Vec<Complex64> {
        (0..n)
            .map(|i| {
                let t = from + (to - from) * i as f64 / (n as f64 - 1.0);
                Complex64::new(xc + r * t.cos(), yc + r * t.sin())
            })
            .collect()
    }

    #[test]
    fn recovers_exact_circle() {
        let z = arc(1.0, -2.0, 3.0, 0.0, 6.0, 50);
        let c = fit_circle(&z).unwrap();
        assert!((c.xc - 1.0).abs() < 1e-9);
        assert!((c.yc + 2.0).abs() < 1e-9);
        assert!((c.r - 3.0).abs() < 1e-9);
    }

    #[test]
    fn recovers_partial_arc_at_small_scale() {
        // Resonator-sized numbers: radius 1e-3 far from the origin.
        let z = arc(2e-3, 5e-3, 1e-3, -1.0, 1.5, 80);
        let c = fit_circle(&z).unwrap();
        assert!((c.xc - 2e-3).abs() < 1e-9);
        assert!((c.yc - 5e-3).abs() < 1e-9);
        assert!((c.r - 1e-3).abs() < 1e-9);
    }

    #[test]
    fn noisy_circle_is_close() {
        let mut rng = StdRng::seed_from_u64(7);
        let noise = Normal::new(0.0, 0.01).unwrap();
        let z: Vec<Complex64> = arc(0.5, 0.5, 1.0, 0.0, 6.2, 400)
            .into_iter()
            .map(|p| p + Complex64::new(noise.sample(&mut rng), noise.sample(&mut rng)))
            .collect();
        let c = fit_circle(&z).unwrap();
        assert!((c.xc - 0.5).abs() < 5e-3);
        assert!((c.yc - 0.5).abs() < 5e-3);
        assert!((c.r - 1.0).abs() < 5e-3);
    }

    #[test]
    fn identical_points_are_degenerate() {
        let z = vec![Complex64::new(0.3, 0.1); 20];
        assert!(matches!(fit_circle(&z), Err(FitError::Degenerate(_))));
    }

    #[test]
    fn characteristic_poly_matches_determinant() {
        let z = arc(0.2, 0.1, 0.7, 0.0, 4.0, 30);
        let m = moments(&z);
        let p = characteristic_poly(&m);
        assert!((p[4] + 4.0).abs() < 1e-12);
        for &eta in &[0.0, 0.3, -1.2] {
            let mut shifted = m;
            shifted[(0, 3)] += 2.0 * eta;
            shifted[(3, 0)] += 2.0 * eta;
            shifted[(1, 1)] -= eta;
            shifted[(2, 2)] -= eta;
            let (value, _) = poly_eval(&p, eta);
            let det = shifted.determinant();
            assert!((value - det).abs() <= 1e-9 * det.abs().max(1.0));
        }
    }
}
