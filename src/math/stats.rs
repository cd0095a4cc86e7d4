//! Small descriptive-statistics helpers used by reports and the fit engines.
//!
//! NaN entries are skipped everywhere: batch fits write NaN for failed grid points.

/// Arithmetic mean of the finite entries, `None` if there are none.
pub fn mean(values: &[f64]) -> Option<f64> {
    let (sum, n) = values
        .iter()
        .filter(|v| v.is_finite())
        .fold((0.0, 0usize), |(s, n), v| (s + v, n + 1));
    if n == 0 { None } else { Some(sum / n as f64) }
}

/// Standard deviation with `ddof` delta degrees of freedom.
pub fn std(values: &[f64], ddof: usize) -> Option<f64> {
    let m = mean(values)?;
    let (ss, n) = values
        .iter()
        .filter(|v| v.is_finite())
        .fold((0.0, 0usize), |(s, n), v| (s + (v - m) * (v - m), n + 1));
    if n <= ddof {
        return None;
    }
    Some((ss / (n - ddof) as f64).sqrt())
}

/// Standard error of the mean (sample std over `√n`).
pub fn sem(values: &[f64]) -> Option<f64> {
    let n = values.iter().filter(|v| v.is_finite()).count();
    let s = std(values, 1)?;
    Some(s / (n as f64).sqrt())
}

/// Mean of values carrying individual uncertainties.
///
/// Returns `(mean, error)` with the errors combined in quadrature:
/// `σ = √(Σσᵢ²) / n`. Pairs where either entry is not finite are skipped.
pub fn umean(values: &[f64], errors: &[f64]) -> Option<(f64, f64)> {
    let (sum, sq, n) = values
        .iter()
        .zip(errors.iter())
        .filter(|(v, e)| v.is_finite() && e.is_finite())
        .fold((0.0, 0.0, 0usize), |(s, q, n), (v, e)| (s + v, q + e * e, n + 1));
    if n == 0 {
        return None;
    }
    let n = n as f64;
    Some((sum / n, sq.sqrt() / n))
}
