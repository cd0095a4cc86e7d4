//! Driven damped harmonic oscillator model of a microwave resonator.
//!
//! Full response (reflection for `n_ports = 1`, notch for `n_ports = 2`):
//!
//! ```text
//! S(f) = a·exp(i(α − 2πf·τ)) · (1 − (2Ql / (n·|Qc|))·exp(iφ) / (1 + 2i·Ql·(f/fr − 1)))
//! ```
//!
//! `|Qc| = Qc·cos φ`, so the expression equals the usual
//! `2Ql / (n·Qc·cos φ·exp(−iφ))` form. The normalized response drops the
//! environment factor `a·exp(i(α − 2πfτ))`.

use num_complex::Complex64;

use crate::domain::NPorts;

/// Resonator parameters in the calibrated (normalized) frame.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ResonatorParams {
    pub fr: f64,
    pub ql: f64,
    /// Magnitude of the complex coupling quality factor.
    pub abs_qc: f64,
    /// Impedance-mismatch rotation.
    pub phi: f64,
    pub n_ports: NPorts,
}

/// Environment of the measurement line.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Environment {
    pub a: f64,
    pub alpha: f64,
    pub delay: f64,
}

impl Environment {
    pub const IDENTITY: Environment = Environment {
        a: 1.0,
        alpha: 0.0,
        delay: 0.0,
    };

    pub fn factor(&self, f: f64) -> Complex64 {
        Complex64::from_polar(self.a, self.alpha - std::f64::consts::TAU * f * self.delay)
    }
}

impl ResonatorParams {
    /// Diameter-corrected coupling quality factor `|Qc| / cos φ`.
    pub fn qc(&self) -> f64 {
        self.abs_qc / self.phi.cos()
    }

    /// Internal quality factor from `1/Qi = 1/Ql − Re(1/Qc)`.
    pub fn qi(&self) -> f64 {
        1.0 / (1.0 / self.ql - 1.0 / self.qc())
    }

    fn coupling(&self) -> f64 {
        2.0 / self.n_ports.count()
    }

    /// Normalized response at `f`.
    pub fn normalized(&self, f: f64) -> Complex64 {
        let d = Complex64::new(1.0, 2.0 * self.ql * (f / self.fr - 1.0));
        let num = Complex64::from_polar(self.coupling() * self.ql / self.abs_qc, self.phi);
        Complex64::new(1.0, 0.0) - num / d
    }

    /// Full response including the line environment.
    pub fn response(&self, f: f64, env: &Environment) -> Complex64 {
        env.factor(f) * self.normalized(f)
    }

    /// Analytic partial derivatives of [`Self::normalized`] with respect to
    /// `(fr, Ql, |Qc|, φ)`, in that order.
    pub fn normalized_jacobian(&self, f: f64) -> [Complex64; 4] {
        let i = Complex64::new(0.0, 1.0);
        let g = self.coupling();
        let x = f / self.fr - 1.0;
        let d = Complex64::new(1.0, 2.0 * self.ql * x);
        let e = Complex64::from_polar(1.0, self.phi);
        let d2 = d * d;

        // ∂D/∂fr = −2i·Ql·f/fr²
        let d_fr = g * self.ql / self.abs_qc * e / d2 * (-2.0 * i * self.ql * f / (self.fr * self.fr));
        // ∂/∂Ql of −g·Ql·e/(|Qc|·D) collapses to −g·e/(|Qc|·D²)
        let d_ql = -g * e / (self.abs_qc * d2);
        let d_qc = g * self.ql * e / (self.abs_qc * self.abs_qc * d);
        let d_phi = -i * g * self.ql * e / (self.abs_qc * d);

        [d_fr, d_ql, d_qc, d_phi]
    }
}

/// Phase of a centered resonance circle, including residual cable delay.
///
/// `θ − 2π·τ·(f − fr) + 2·atan(2·Ql·(1 − f/fr))`
pub fn phase_centered(f: f64, fr: f64, ql: f64, theta: f64, delay: f64) -> f64 {
    theta - std::f64::consts::TAU * delay * (f - fr) + 2.0 * (2.0 * ql * (1.0 - f / fr)).atan()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn params() -> ResonatorParams {
        ResonatorParams {
            fr: 5.0e9,
            ql: 8.0e3,
            abs_qc: 1.2e4,
            phi: 0.15,
            n_ports: NPorts::Notch,
        }
    }

    #[test]
    fn off_resonance_is_unity_and_dip_depth_matches_ratio() {
        let p = params();
        let far = p.normalized(4.0e9);
        assert!((far - Complex64::new(1.0, 0.0)).norm() < 1e-3);

        // On resonance: S = 1 − (Ql/|Qc|)·exp(iφ) for a notch.
        let s = p.normalized(p.fr);
        let expected = Complex64::new(1.0, 0.0) - Complex64::from_polar(p.ql / p.abs_qc, p.phi);
        assert!((s - expected).norm() < 1e-12);
    }

    #[test]
    fn quality_factors_are_consistent() {
        let p = ResonatorParams { phi: 0.0, ..params() };
        let qi = p.qi();
        assert!((1.0 / p.ql - (1.0 / qi + 1.0 / p.qc())).abs() < 1e-15);
        assert!((qi - 2.4e4).abs() < 1e-6);
    }

    #[test]
    fn jacobian_matches_finite_differences() {
        let p = params();
        let f = p.fr * (1.0 + 0.3 / p.ql);
        let jac = p.normalized_jacobian(f);

        let steps = [1.0, 1e-2, 1e-2, 1e-7];
        for (k, &h) in steps.iter().enumerate() {
            let mut hi = p;
            let mut lo = p;
            match k {
                0 => {
                    hi.fr += h;
                    lo.fr -= h;
                }
                1 => {
                    hi.ql += h;
                    lo.ql -= h;
                }
                2 => {
                    hi.abs_qc += h;
                    lo.abs_qc -= h;
                }
                _ => {
                    hi.phi += h;
                    lo.phi -= h;
                }
            }
            let numeric = (hi.normalized(f) - lo.normalized(f)) / (2.0 * h);
            let rel = (numeric - jac[k]).norm() / jac[k].norm();
            assert!(rel < 1e-4, "parameter {k}: analytic {:?} numeric {:?}", jac[k], numeric);
        }
    }

    #[test]
    fn centered_phase_rolls_off_by_two_pi() {
        let lo = phase_centered(4.9e9, 5.0e9, 1e4, 0.0, 0.0);
        let hi = phase_centered(5.1e9, 5.0e9, 1e4, 0.0, 0.0);
        assert!((lo - hi - std::f64::consts::TAU).abs() < 2e-2);
    }
}
