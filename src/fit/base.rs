//! Contract shared by all fit-function classes.
//!
//! A fitter owns its latest [`FitResult`]. The key set of
//! [`FitResult::extract_data`] is fixed per class (`extract_keys`) so the batch
//! driver can allocate one output dataset per quantity before the first fit.

use crate::domain::{ComplexTrace, FitResult};
use crate::error::FitError;

pub trait ResonatorFit {
    /// Short name used in logs and reports.
    fn name(&self) -> &'static str;

    /// Quantities reported by this fit class, in a stable order.
    fn extract_keys(&self) -> &'static [&'static str];

    /// Length of the simulated curve.
    fn out_nop(&self) -> usize;

    /// Fit one trace and return the updated result.
    ///
    /// The stored result is reset to an all-NaN record before anything else
    /// happens, so it stays fully keyed even when this returns an error.
    fn do_fit(&mut self, trace: &ComplexTrace) -> Result<&FitResult, FitError>;

    /// Result of the latest call to [`ResonatorFit::do_fit`].
    fn result(&self) -> &FitResult;
}

/// Build a fresh all-NaN record for `fitter`.
pub fn nan_result<F: ResonatorFit + ?Sized>(fitter: &F) -> FitResult {
    FitResult::nan_filled(fitter.extract_keys(), fitter.out_nop())
}
