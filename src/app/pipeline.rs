//! Shared "fit pipeline" logic used by the CLI commands.
//!
//! Keeping this in one place avoids duplicating the core workflow:
//! open scan -> build fitter -> fit every trace -> aggregate -> close
//!
//! The command handlers can then focus on presentation and exports.

use std::path::Path;

use crate::autofit::{AMPLITUDE, AutofitOptions, AutofitSummary, CancelToken, FREQUENCY, Resonator};
use crate::domain::{FitConfig, FitResult};
use crate::error::AppError;
use crate::fit::fitter_from_config;
use crate::report::{QuantityStats, summarize_quantities};
use crate::store::{OpenMode, ScanFile, StoreOptions};

/// All computed outputs of a single `qfit fit` run.
#[derive(Debug, Clone)]
pub struct RunOutput {
    pub summary: AutofitSummary,
    /// Result of the single trace of a 1D scan.
    pub result: Option<FitResult>,
    /// Aggregates over the extracted quantities.
    pub stats: Vec<QuantityStats>,
    /// Measured frequency and amplitude inside the window (1D only).
    pub measured: Option<(Vec<f64>, Vec<f64>)>,
}

/// Execute the full fitting pipeline and return the computed outputs.
pub fn run_fit(config: &FitConfig) -> Result<RunOutput, AppError> {
    run_fit_with_cancel(config, &CancelToken::new())
}

/// Execute the fitting pipeline, stopping between traces once `cancel` fires.
pub fn run_fit_with_cancel(config: &FitConfig, cancel: &CancelToken) -> Result<RunOutput, AppError> {
    let options = AutofitOptions {
        f_min: config.f_min,
        f_max: config.f_max,
        store: StoreOptions {
            on_ragged_append: config.on_ragged_append,
        },
    };

    // 1) Open the scan; refuses scans that already hold fit data.
    let mut resonator = Resonator::open(&config.scan_path, options)?;

    // 2) Fit every trace.
    let mut fitter = fitter_from_config(config);
    let summary = resonator.fit(fitter.as_mut(), cancel)?;

    // 3) Collect what the reports need before the file is closed.
    let single = resonator.dims() == 1 && summary.traces == 1;
    let result = (single && summary.fitted == 1).then(|| fitter.result().clone());
    let measured = if single {
        Some(measured_window(resonator.file(), config)?)
    } else {
        None
    };
    let stats = summarize_quantities(resonator.file())?;

    resonator.close()?;

    Ok(RunOutput {
        summary,
        result,
        stats,
        measured,
    })
}

fn measured_window(file: &ScanFile, config: &FitConfig) -> Result<(Vec<f64>, Vec<f64>), AppError> {
    let freq = file.read_vec(FREQUENCY)?;
    let amp = file.read_vec(AMPLITUDE)?;
    let lo = config.f_min.unwrap_or(f64::NEG_INFINITY);
    let hi = config.f_max.unwrap_or(f64::INFINITY);
    Ok(freq
        .into_iter()
        .zip(amp)
        .filter(|(f, _)| (lo..=hi).contains(f))
        .unzip())
}

/// Measured and fitted amplitude of a fitted 1D scan.
#[derive(Debug, Clone, PartialEq)]
pub struct PlotData {
    pub freq: Vec<f64>,
    pub amp: Vec<f64>,
    pub freq_fit: Vec<f64>,
    pub amp_fit: Vec<f64>,
    pub f_res: Option<f64>,
}

/// Load [`PlotData`] from a scan written by `qfit fit`.
pub fn load_plot_data(path: &Path) -> Result<PlotData, AppError> {
    let file = ScanFile::open(path, OpenMode::Read, StoreOptions::default())?;

    let fit_amp = file.info("analysis._fit_amplitude").map_err(|_| {
        AppError::new(
            2,
            format!("Scan '{}' holds no fit; run `qfit fit` first.", path.display()),
        )
    })?;
    if fit_amp.kind().axis_count() != 1 {
        return Err(AppError::new(
            2,
            format!("Plotting needs a 1D scan; '{}' is {}.", path.display(), fit_amp.kind()),
        ));
    }

    let f_res = file
        .read_vec("analysis.fit_f_res")
        .ok()
        .and_then(|v| v.first().copied())
        .filter(|f| f.is_finite());

    Ok(PlotData {
        freq: file.read_vec(FREQUENCY)?,
        amp: file.read_vec(AMPLITUDE)?,
        freq_fit: file.read_vec("analysis._fit_frequency")?,
        amp_fit: file.read_vec(&fit_amp.url)?,
        f_res,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::data::SyntheticScan;
    use crate::domain::{DEFAULT_OUT_NOP, ModelChoice, NPorts, RaggedPolicy};

    fn config(scan_path: std::path::PathBuf) -> FitConfig {
        FitConfig {
            scan_path,
            model: ModelChoice::Circle,
            n_ports: NPorts::Notch,
            f_min: None,
            f_max: None,
            fixed_delay: None,
            isolation_db: 15.0,
            fit_delay_max_iterations: 5,
            out_nop: DEFAULT_OUT_NOP,
            calc_errors: true,
            plot: false,
            plot_width: 80,
            plot_height: 20,
            export_csv: None,
            export_json: None,
            on_ragged_append: RaggedPolicy::Reject,
        }
    }

    #[test]
    fn single_trace_run_then_plot() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("scan");
        SyntheticScan::default().write(&path, StoreOptions::default()).unwrap();

        let run = run_fit(&config(path.clone())).unwrap();
        assert_eq!(run.summary.fitted, 1);
        let result = run.result.unwrap();
        assert!(result.extract_data.get("Ql").unwrap() > 0.0);
        let (freq, amp) = run.measured.unwrap();
        assert_eq!(freq.len(), amp.len());

        let plot = load_plot_data(&path).unwrap();
        assert_eq!(plot.amp_fit.len(), DEFAULT_OUT_NOP);
        assert_eq!(plot.freq.len(), 401);
        assert!(plot.f_res.is_some());
    }

    #[test]
    fn second_run_is_refused() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("scan");
        let scan = SyntheticScan {
            dims: 2,
            ..SyntheticScan::default()
        };
        scan.write(&path, StoreOptions::default()).unwrap();

        let mut cfg = config(path.clone());
        cfg.model = ModelChoice::Lorentzian;
        let run = run_fit(&cfg).unwrap();
        assert!(run.result.is_none());
        assert_eq!(run.summary.traces, 4);
        assert!(run.stats.iter().any(|s| s.total == 4));

        let err = run_fit(&cfg).unwrap_err();
        assert_eq!(err.exit_code(), 3);
        assert_eq!(load_plot_data(&path).unwrap_err().exit_code(), 2);
    }
}
