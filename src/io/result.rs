//! Read/write a single fit result as JSON.
//!
//! JSON has no NaN, so missing values (NaN in memory) are stored as `null`.

use std::collections::BTreeMap;
use std::fs::File;
use std::path::Path;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::domain::{ExtractData, FitDiagnostics, FitResult};
use crate::error::AppError;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FitCurve {
    pub frequency: Vec<Option<f64>>,
    pub amplitude: Vec<Option<f64>>,
    pub phase: Vec<Option<f64>>,
}

/// On-disk form of a [`FitResult`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FitResultFile {
    pub tool: String,
    pub fit_function: String,
    pub created: DateTime<Utc>,
    pub extract_data: BTreeMap<String, Option<f64>>,
    pub diagnostics: FitDiagnostics,
    pub curve: FitCurve,
}

impl FitResultFile {
    pub fn new(fit_function: &str, result: &FitResult) -> Self {
        Self {
            tool: "qfit".to_string(),
            fit_function: fit_function.to_string(),
            created: Utc::now(),
            extract_data: result
                .extract_data
                .iter()
                .map(|(k, v)| (k.to_string(), finite(v)))
                .collect(),
            diagnostics: result.diagnostics.clone(),
            curve: FitCurve {
                frequency: result.freq_fit.iter().copied().map(finite).collect(),
                amplitude: result.amp_fit.iter().copied().map(finite).collect(),
                phase: result.pha_fit.iter().copied().map(finite).collect(),
            },
        }
    }

    pub fn to_result(&self) -> FitResult {
        let keys: Vec<&str> = self.extract_data.keys().map(String::as_str).collect();
        let mut extract_data = ExtractData::nan_filled(&keys);
        for (k, v) in &self.extract_data {
            extract_data.set(k, v.unwrap_or(f64::NAN));
        }
        let restore = |v: &[Option<f64>]| v.iter().map(|x| x.unwrap_or(f64::NAN)).collect();
        FitResult {
            freq_fit: restore(&self.curve.frequency),
            amp_fit: restore(&self.curve.amplitude),
            pha_fit: restore(&self.curve.phase),
            extract_data,
            diagnostics: self.diagnostics.clone(),
        }
    }
}

fn finite(v: f64) -> Option<f64> {
    v.is_finite().then_some(v)
}

pub fn write_fit_result_json(path: &Path, fit_function: &str, result: &FitResult) -> Result<(), AppError> {
    let file = File::create(path)
        .map_err(|e| AppError::new(5, format!("Failed to create result JSON '{}': {e}", path.display())))?;
    serde_json::to_writer_pretty(file, &FitResultFile::new(fit_function, result))
        .map_err(|e| AppError::new(5, format!("Failed to write result JSON: {e}")))
}

pub fn read_fit_result_json(path: &Path) -> Result<FitResultFile, AppError> {
    let file = File::open(path)
        .map_err(|e| AppError::new(5, format!("Failed to open result JSON '{}': {e}", path.display())))?;
    serde_json::from_reader(file).map_err(|e| AppError::new(2, format!("Invalid result JSON: {e}")))
}
