//! Phase and sampled-signal helpers.

use std::f64::consts::{PI, TAU};

/// `n` evenly spaced samples from `start` to `stop` (inclusive).
pub fn linspace(start: f64, stop: f64, n: usize) -> Vec<f64> {
    match n {
        0 => Vec::new(),
        1 => vec![start],
        _ => {
            let step = (stop - start) / (n as f64 - 1.0);
            (0..n)
                .map(|i| if i == n - 1 { stop } else { start + step * i as f64 })
                .collect()
        }
    }
}

/// Remove `2π` jumps between consecutive samples.
pub fn unwrap_phase(phase: &[f64]) -> Vec<f64> {
    let mut out = Vec::with_capacity(phase.len());
    let mut offset = 0.0;
    for (i, &p) in phase.iter().enumerate() {
        if i > 0 {
            let d = p - phase[i - 1];
            if d > PI || d < -PI {
                // Number of whole turns between the samples.
                let turns = ((d + PI) / TAU).floor();
                offset -= turns * TAU;
            }
        }
        out.push(p + offset);
    }
    out
}

/// Wrap an angle into `[-π, π)`.
pub fn periodic_boundary(angle: f64) -> f64 {
    (angle + PI).rem_euclid(TAU) - PI
}

/// Angular distance to zero for an angle difference, in `[0, π]`.
pub fn phase_dist(angle: f64) -> f64 {
    PI - (PI - angle.abs()).abs()
}

/// Gaussian smoothing with reflected edges (half-sample symmetric).
///
/// The kernel is truncated at `4σ`.
pub fn gaussian_filter1d(data: &[f64], sigma: f64) -> Vec<f64> {
    let n = data.len();
    if n == 0 || !(sigma > 0.0) {
        return data.to_vec();
    }

    let radius = (4.0 * sigma + 0.5) as usize;
    let kernel: Vec<f64> = (0..=2 * radius)
        .map(|k| {
            let x = k as f64 - radius as f64;
            (-0.5 * x * x / (sigma * sigma)).exp()
        })
        .collect();
    let norm: f64 = kernel.iter().sum();

    let period = 2 * n;
    (0..n)
        .map(|i| {
            let acc: f64 = kernel
                .iter()
                .enumerate()
                .map(|(k, w)| {
                    let pos = i as i64 + k as i64 - radius as i64;
                    let mut j = pos.rem_euclid(period as i64) as usize;
                    if j >= n {
                        j = period - 1 - j;
                    }
                    w * data[j]
                })
                .sum();
            acc / norm
        })
        .collect()
}

/// Sample-spaced derivative: central differences inside, one-sided at the edges.
pub fn gradient(data: &[f64]) -> Vec<f64> {
    let n = data.len();
    match n {
        0 => Vec::new(),
        1 => vec![0.0],
        _ => (0..n)
            .map(|i| {
                if i == 0 {
                    data[1] - data[0]
                } else if i == n - 1 {
                    data[n - 1] - data[n - 2]
                } else {
                    0.5 * (data[i + 1] - data[i - 1])
                }
            })
            .collect(),
    }
}

/// Index of the largest `|v|`, ignoring NaN.
pub fn argmax_abs(data: &[f64]) -> Option<usize> {
    data.iter()
        .enumerate()
        .filter(|(_, v)| !v.is_nan())
        .max_by(|a, b| {
            a.1.abs()
                .partial_cmp(&b.1.abs())
                .unwrap_or(std::cmp::Ordering::Equal)
        })
        .map(|(i, _)| i)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn unwrap_removes_jumps() {
        let wrapped: Vec<f64> = (0..50)
            .map(|i| periodic_boundary(-0.4 * i as f64))
            .collect();
        let unwrapped = unwrap_phase(&wrapped);
        for (i, v) in unwrapped.iter().enumerate() {
            assert!((v - (-0.4 * i as f64)).abs() < 1e-12, "sample {i}: {v}");
        }
    }

    #[test]
    fn periodic_boundary_range() {
        for &a in &[-7.0, -PI, 0.0, 3.0, PI, 10.0] {
            let w = periodic_boundary(a);
            assert!((-PI..PI).contains(&w));
            assert!(((a - w) / TAU - ((a - w) / TAU).round()).abs() < 1e-12);
        }
    }

    #[test]
    fn phase_dist_is_symmetric() {
        assert!((phase_dist(0.3) - 0.3).abs() < 1e-15);
        assert!((phase_dist(-0.3) - 0.3).abs() < 1e-15);
        assert!((phase_dist(TAU - 0.3) - 0.3).abs() < 1e-12);
    }

    #[test]
    fn gaussian_filter_preserves_constants_and_mass() {
        let flat = vec![2.5; 17];
        for v in gaussian_filter1d(&flat, 3.0) {
            assert!((v - 2.5).abs() < 1e-12);
        }

        // Very wide kernels on short inputs still reflect cleanly.
        let ramp: Vec<f64> = (0..8).map(|i| i as f64).collect();
        let smooth = gaussian_filter1d(&ramp, 30.0);
        assert_eq!(smooth.len(), 8);
        assert!(smooth.iter().all(|v| v.is_finite()));
    }

    #[test]
    fn gradient_of_line_is_constant() {
        let line: Vec<f64> = (0..6).map(|i| 3.0 * i as f64 + 1.0).collect();
        assert!(gradient(&line).iter().all(|&g| (g - 3.0).abs() < 1e-12));
    }

    #[test]
    fn linspace_hits_endpoints() {
        let v = linspace(1.0, 2.0, 5);
        assert_eq!(v.len(), 5);
        assert_eq!(v[0], 1.0);
        assert_eq!(v[4], 2.0);
        assert!((v[2] - 1.5).abs() < 1e-15);
    }
}
