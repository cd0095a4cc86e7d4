//! Reporting utilities: aggregates over fitted scans and formatted terminal output.

pub mod format;

pub use format::*;

use crate::error::StoreError;
use crate::io::fit_quantities;
use crate::math::stats;
use crate::store::ScanFile;

/// Aggregate of one `fit_<quantity>` dataset over all grid points.
#[derive(Debug, Clone, PartialEq)]
pub struct QuantityStats {
    pub name: String,
    /// Grid points written.
    pub total: usize,
    /// Grid points with a finite value.
    pub finite: usize,
    pub mean: Option<f64>,
    pub sem: Option<f64>,
    /// Mean with the per-point errors of `<name>_err` combined, when present.
    pub weighted: Option<(f64, f64)>,
}

/// Aggregate every extracted quantity of `scan` (error columns excluded).
pub fn summarize_quantities(scan: &ScanFile) -> Result<Vec<QuantityStats>, StoreError> {
    let quantities = fit_quantities(scan);
    let mut values = Vec::with_capacity(quantities.len());
    for q in &quantities {
        let v: Vec<f64> = match q.layout() {
            Some(_) => scan.read(&q.url)?.iter().copied().collect(),
            None => Vec::new(),
        };
        values.push((q.attrs.name.trim_start_matches("fit_").to_string(), v));
    }

    let errors_of = |name: &str| {
        let err = format!("{name}_err");
        values.iter().find(|(n, _)| *n == err).map(|(_, v)| v.as_slice())
    };

    Ok(values
        .iter()
        .filter(|(name, _)| !name.ends_with("_err"))
        .map(|(name, v)| QuantityStats {
            name: name.clone(),
            total: v.len(),
            finite: v.iter().filter(|x| x.is_finite()).count(),
            mean: stats::mean(v),
            sem: stats::sem(v),
            weighted: errors_of(name).and_then(|e| stats::umean(v, e)),
        })
        .collect())
}
