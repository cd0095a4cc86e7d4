//! Batch fitting of every trace in a 1D/2D/3D scan file.
//!
//! The driver reads `data.frequency`, `data.amplitude`, and `data.phase`, fits
//! each stored trace with any [`ResonatorFit`], and writes back into the
//! `analysis` folder:
//!
//! | scan | `_fit_amplitude`, `_fit_phase`, `_fit_real`, `_fit_imag` | `fit_<quantity>` |
//! | ---- | -------------------------------------------------------- | ---------------- |
//! | 1D   | vector over `_fit_frequency`                             | coordinate, one value |
//! | 2D   | matrix over `(y, _fit_frequency)`                        | vector over `y` |
//! | 3D   | box over `(x, y, _fit_frequency)`                        | matrix over `(x, y)` |
//!
//! A failed point is written as NaN and the loop moves on. Only the traces
//! actually present (the fill of the amplitude dataset) are visited.

use std::path::Path;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use ndarray::ArrayView1;

use crate::domain::{ComplexTrace, FitResult, MIN_TRACE_POINTS};
use crate::error::{AutofitError, FitError, StoreError};
use crate::fit::{ResonatorFit, nan_result};
use crate::math::linspace;
use crate::store::{
    Coordinate, Dataset, DatasetInfo, DatasetKind, Folder, OpenMode, ScanFile, StoreOptions,
    ViewParams,
};

pub const FREQUENCY: &str = "data.frequency";
pub const AMPLITUDE: &str = "data.amplitude";
pub const PHASE: &str = "data.phase";

const AMPLITUDE_VIEW: &str = "amplitude_fit";
const PHASE_VIEW: &str = "phase_fit";

/// Co-operative cancellation, checked between grid points.
#[derive(Debug, Clone, Default)]
pub struct CancelToken(Arc<AtomicBool>);

impl CancelToken {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.0.store(true, Ordering::Relaxed);
    }

    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::Relaxed)
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct AutofitOptions {
    /// Frequency window (Hz); `None` means the edge of the sweep.
    pub f_min: Option<f64>,
    pub f_max: Option<f64>,
    pub store: StoreOptions,
}

#[derive(Debug, Clone, PartialEq)]
pub struct AutofitSummary {
    pub fit_function: &'static str,
    pub dims: usize,
    /// Traces visited.
    pub traces: usize,
    /// Traces fitted without error.
    pub fitted: usize,
    /// Indices (in acquisition order) of traces written as NaN.
    pub failed: Vec<usize>,
    /// Total non-fatal warnings reported by the fits.
    pub warnings: usize,
    pub cancelled: bool,
}

/// Where one extracted quantity is written.
enum ResultSink {
    Scalar(Coordinate),
    Vector(Dataset),
    Matrix(Dataset, Vec<f64>),
}

struct Outputs {
    amplitude: Dataset,
    phase: Dataset,
    real: Dataset,
    imag: Dataset,
    results: Vec<(&'static str, ResultSink)>,
}

/// A scan file opened for fitting.
#[derive(Debug)]
pub struct Resonator {
    file: ScanFile,
    options: AutofitOptions,
    dims: usize,
    frequency: Vec<f64>,
    /// Indices of `frequency` inside the window.
    window: Vec<usize>,
    /// Outer coordinates: none for 1D, `y` for 2D, `x` and `y` for 3D.
    axes: Vec<Coordinate>,
    traces: usize,
}

impl Resonator {
    /// Open `path` for appending fit data.
    ///
    /// Fails before anything is written if the scan already holds fit data.
    pub fn open(path: impl AsRef<Path>, options: AutofitOptions) -> Result<Self, AutofitError> {
        let file = ScanFile::open(path, OpenMode::Append, options.store)?;
        check_no_fit_data(&file)?;

        let frequency = file.read_vec(FREQUENCY).map_err(missing(FREQUENCY))?;
        let amp = file.info(AMPLITUDE).map_err(missing(AMPLITUDE))?;
        let pha = file.info(PHASE).map_err(missing(PHASE))?;

        let dims = match amp.kind() {
            DatasetKind::Vector => 1,
            DatasetKind::Matrix => 2,
            DatasetKind::Box => 3,
            kind => return Err(AutofitError::UnsupportedDimension(kind.axis_count())),
        };
        if pha.kind() != amp.kind() {
            return Err(AutofitError::ShapeMismatch(format!(
                "amplitude is a {}, phase is a {}",
                amp.kind(),
                pha.kind()
            )));
        }

        let rows = |info: &DatasetInfo| info.layout().map_or(0, |l| l.rows);
        let traces = match dims {
            1 => {
                let n = rows(&amp).min(rows(&pha));
                if n != 0 && n != frequency.len() {
                    return Err(AutofitError::ShapeMismatch(format!(
                        "amplitude holds {n} points, frequency {}",
                        frequency.len()
                    )));
                }
                usize::from(n > 0)
            }
            _ => {
                for info in [&amp, &pha] {
                    if let Some(l) = info.layout() {
                        if l.trace_len != frequency.len() {
                            return Err(AutofitError::ShapeMismatch(format!(
                                "{} rows hold {} points, frequency {}",
                                info.attrs.name,
                                l.trace_len,
                                frequency.len()
                            )));
                        }
                    }
                }
                rows(&amp).min(rows(&pha))
            }
        };

        let mut axes = Vec::with_capacity(dims - 1);
        for axis in amp.attrs.axes.iter().take(dims - 1) {
            axes.push(file.coordinate(&axis.url)?);
        }
        if axes.len() != dims - 1 {
            return Err(AutofitError::ShapeMismatch(format!(
                "amplitude links {} outer axes, expected {}",
                amp.attrs.axes.len().saturating_sub(1),
                dims - 1
            )));
        }

        let lo = options.f_min.unwrap_or(f64::NEG_INFINITY);
        let hi = options.f_max.unwrap_or(f64::INFINITY);
        let window: Vec<usize> = frequency
            .iter()
            .enumerate()
            .filter(|&(_, f)| (lo..=hi).contains(f))
            .map(|(i, _)| i)
            .collect();
        if window.len() < MIN_TRACE_POINTS {
            return Err(AutofitError::EmptyWindow {
                f_min: lo,
                f_max: hi,
                points: window.len(),
                needed: MIN_TRACE_POINTS,
            });
        }

        log::debug!(
            "{}: {dims}D scan, {traces} trace(s), {} of {} points in window",
            file.path().display(),
            window.len(),
            frequency.len()
        );
        Ok(Self {
            file,
            options,
            dims,
            frequency,
            window,
            axes,
            traces,
        })
    }

    pub fn dims(&self) -> usize {
        self.dims
    }

    /// Number of traces present in the scan.
    pub fn traces(&self) -> usize {
        self.traces
    }

    pub fn options(&self) -> AutofitOptions {
        self.options
    }

    pub fn file(&self) -> &ScanFile {
        &self.file
    }

    /// Frequencies inside the fit window.
    pub fn window(&self) -> Vec<f64> {
        self.window.iter().map(|&i| self.frequency[i]).collect()
    }

    /// Fit every trace and write the results.
    pub fn fit<F: ResonatorFit + ?Sized>(
        &mut self,
        fitter: &mut F,
        cancel: &CancelToken,
    ) -> Result<AutofitSummary, AutofitError> {
        check_no_fit_data(&self.file)?;
        if fitter.out_nop() == 0 {
            return Err(AutofitError::EmptyFitGrid);
        }
        let mut out = self.declare_outputs(fitter)?;
        log::info!(
            "{} fit of {} trace(s) in {}",
            fitter.name(),
            self.traces,
            self.file.path().display()
        );

        let mut summary = AutofitSummary {
            fit_function: fitter.name(),
            dims: self.dims,
            traces: 0,
            fitted: 0,
            failed: Vec::new(),
            warnings: 0,
            cancelled: false,
        };
        if self.traces == 0 {
            log::warn!("scan holds no traces; nothing to fit");
            self.file.flush()?;
            return Ok(summary);
        }

        let amp = self.file.read(AMPLITUDE)?;
        let pha = self.file.read(PHASE)?;
        let slice_rows = match self.dims {
            3 => self.file.read_vec(self.axes[1].url.as_str())?.len(),
            _ => 0,
        };

        for (t, (a_row, p_row)) in amp.rows().into_iter().zip(pha.rows()).take(self.traces).enumerate() {
            if cancel.is_cancelled() {
                log::warn!("fit cancelled after {t} trace(s)");
                summary.cancelled = true;
                break;
            }

            let fitted = self
                .trace(a_row, p_row)
                .and_then(|trace| fitter.do_fit(&trace).map(|_| ()));
            let nan;
            let result = match fitted {
                Ok(()) => {
                    summary.fitted += 1;
                    fitter.result()
                }
                Err(err) => {
                    log::warn!("trace {t}: {err}; writing NaN");
                    summary.failed.push(t);
                    nan = nan_result(&*fitter);
                    &nan
                }
            };
            summary.warnings += result.diagnostics.warnings.len();
            log::debug!("trace {t} done");

            self.write_point(&mut out, result)?;
            summary.traces += 1;
            if self.dims == 3 && summary.traces % slice_rows == 0 {
                self.finish_slice(&mut out, slice_rows, true)?;
            }
        }
        if self.dims == 3 {
            self.finish_slice(&mut out, slice_rows, false)?;
        }

        self.file.flush()?;
        log::info!(
            "fitted {} of {} trace(s), {} failed",
            summary.fitted,
            summary.traces,
            summary.failed.len()
        );
        Ok(summary)
    }

    /// Persist and close the scan file.
    pub fn close(self) -> Result<(), AutofitError> {
        Ok(self.file.close()?)
    }

    fn trace(&self, amp: ArrayView1<'_, f64>, pha: ArrayView1<'_, f64>) -> Result<ComplexTrace, FitError> {
        let pick = |row: &ArrayView1<'_, f64>| self.window.iter().map(|&i| row[i]).collect::<Vec<_>>();
        let freq = self.window.iter().map(|&i| self.frequency[i]).collect();
        ComplexTrace::new(freq, pick(&amp), pick(&pha))
    }

    fn declare_outputs<F: ResonatorFit + ?Sized>(&mut self, fitter: &F) -> Result<Outputs, StoreError> {
        let window = self.window();
        let lo = window.iter().copied().fold(f64::INFINITY, f64::min);
        let hi = window.iter().copied().fold(f64::NEG_INFINITY, f64::max);
        let unit = self.file.info(AMPLITUDE)?.attrs.unit;

        let freq = self.file.add_coordinate("_fit_frequency", "Hz", Folder::Analysis)?;
        self.file.add(&freq, &linspace(lo, hi, fitter.out_nop()))?;

        let amplitude = self.declare_curve("_fit_amplitude", &unit, &freq)?;
        let phase = self.declare_curve("_fit_phase", "rad", &freq)?;
        let real = self.declare_curve("_fit_real", &unit, &freq)?;
        let imag = self.declare_curve("_fit_imag", &unit, &freq)?;

        let mut results = Vec::with_capacity(fitter.extract_keys().len());
        for &key in fitter.extract_keys() {
            let name = format!("fit_{key}");
            let sink = match self.dims {
                1 => ResultSink::Scalar(self.file.add_coordinate(&name, "", Folder::Analysis)?),
                2 => ResultSink::Vector(self.file.add_value_vector(
                    &name,
                    &self.axes[0],
                    "",
                    Folder::Analysis,
                )?),
                _ => ResultSink::Matrix(
                    self.file.add_value_matrix(&name, &self.axes[0], &self.axes[1], "", Folder::Analysis)?,
                    Vec::new(),
                ),
            };
            results.push((key, sink));
        }

        let settings = self.file.add_text("_fit_settings", Folder::Analysis)?;
        self.file.append_text(&settings, &format!("fit_function {}", fitter.name()))?;
        self.file.append_text(&settings, &format!("f_min {lo}"))?;
        self.file.append_text(&settings, &format!("f_max {hi}"))?;
        self.file.append_text(&settings, &format!("points {}", window.len()))?;

        let params = ViewParams {
            labels: vec!["data".into(), "fit".into()],
            styles: vec!["points".into(), "lines".into()],
        };
        let data_freq = self.file.coordinate(FREQUENCY)?;
        for (view, raw, fit) in [
            (AMPLITUDE_VIEW, AMPLITUDE, &amplitude),
            (PHASE_VIEW, PHASE, &phase),
        ] {
            let raw = self.file.dataset(raw)?;
            let view = self.file.add_view(view, &data_freq, &raw, params.clone())?;
            self.file.add_view_overlay(&view, &freq, fit)?;
        }

        Ok(Outputs {
            amplitude,
            phase,
            real,
            imag,
            results,
        })
    }

    fn declare_curve(&mut self, name: &str, unit: &str, freq: &Coordinate) -> Result<Dataset, StoreError> {
        match self.dims {
            1 => self.file.add_value_vector(name, freq, unit, Folder::Analysis),
            2 => self
                .file
                .add_value_matrix(name, &self.axes[0], freq, unit, Folder::Analysis),
            _ => self.file.add_value_box(
                name,
                &self.axes[0],
                &self.axes[1],
                freq,
                unit,
                Folder::Analysis,
            ),
        }
    }

    fn write_point(&mut self, out: &mut Outputs, result: &FitResult) -> Result<(), StoreError> {
        self.file.append(&out.amplitude, &result.amp_fit)?;
        self.file.append(&out.phase, &result.pha_fit)?;
        self.file.append(&out.real, &result.real_fit())?;
        self.file.append(&out.imag, &result.imag_fit())?;

        for (key, sink) in &mut out.results {
            let value = result.extract_data.get(*key).unwrap_or(f64::NAN);
            match sink {
                ResultSink::Scalar(c) => self.file.add(&*c, &[value])?,
                ResultSink::Vector(d) => self.file.append_scalar(d, value)?,
                ResultSink::Matrix(_, row) => row.push(value),
            }
        }
        Ok(())
    }

    /// Write buffered `fit_<quantity>` rows of a 3D scan, NaN-padded to a full
    /// slice, and advance the curve boxes when the slice is complete.
    fn finish_slice(&mut self, out: &mut Outputs, slice_rows: usize, complete: bool) -> Result<(), StoreError> {
        for (_, sink) in &mut out.results {
            if let ResultSink::Matrix(d, row) = sink {
                if row.is_empty() {
                    continue;
                }
                row.resize(slice_rows, f64::NAN);
                self.file.append(d, row)?;
                row.clear();
            }
        }
        if complete {
            for d in [&out.amplitude, &out.phase, &out.real, &out.imag] {
                self.file.next_matrix(d)?;
            }
        }
        Ok(())
    }
}

fn check_no_fit_data(file: &ScanFile) -> Result<(), AutofitError> {
    let is_fit = |name: &str| name.starts_with("_fit_") || name.starts_with("fit_");
    if let Some(d) = file
        .datasets()
        .into_iter()
        .find(|d| d.attrs.folder == Folder::Analysis && is_fit(&d.attrs.name))
    {
        return Err(AutofitError::FitDataExists(d.url));
    }
    if let Some(v) = file
        .views()
        .into_iter()
        .find(|v| v.name == AMPLITUDE_VIEW || v.name == PHASE_VIEW)
    {
        return Err(AutofitError::FitDataExists(v.url));
    }
    Ok(())
}

fn missing(name: &'static str) -> impl Fn(StoreError) -> AutofitError {
    move |err| match err {
        StoreError::UnknownDataset(_) => AutofitError::MissingDataset(name.to_string()),
        other => other.into(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::data::SyntheticScan;
    use crate::fit::{CIRCLE_FIT_KEYS, CircleFit, LORENTZIAN_FIT_KEYS, LorentzianFit};

    fn write(dir: &tempfile::TempDir, name: &str, scan: &SyntheticScan) -> std::path::PathBuf {
        let path = dir.path().join(name);
        scan.write(&path, StoreOptions::default()).unwrap();
        path
    }

    fn fit_datasets(file: &ScanFile) -> usize {
        file.datasets()
            .iter()
            .filter(|d| d.attrs.name.starts_with("fit_"))
            .count()
    }

    #[test]
    fn single_trace_gets_scalar_results() {
        let dir = tempfile::tempdir().unwrap();
        let scan = SyntheticScan::default();
        let path = write(&dir, "scan1d", &scan);

        let mut res = Resonator::open(&path, AutofitOptions::default()).unwrap();
        assert_eq!(res.dims(), 1);
        let summary = res.fit(&mut CircleFit::default(), &CancelToken::new()).unwrap();
        assert_eq!((summary.traces, summary.fitted), (1, 1));
        res.close().unwrap();

        let file = ScanFile::open(&path, OpenMode::Read, StoreOptions::default()).unwrap();
        assert_eq!(fit_datasets(&file), CIRCLE_FIT_KEYS.len());
        let qc = file.info("analysis.fit_Qc").unwrap();
        assert_eq!(qc.kind(), DatasetKind::Coordinate);
        assert!(file.read_vec("fit_Qc").unwrap()[0] > 0.0);
        let f_res = file.read_vec("fit_f_res").unwrap()[0];
        assert!((f_res - scan.resonator.params.fr).abs() < 2e3);

        let curve = file.info("_fit_amplitude").unwrap();
        assert_eq!(curve.kind(), DatasetKind::Vector);
        assert_eq!(curve.shape(), vec![crate::domain::DEFAULT_OUT_NOP]);
        assert_eq!(file.views().len(), 2);
        assert!(file.read_text("_fit_settings").unwrap().starts_with("fit_function circle"));
    }

    #[test]
    fn matrix_scan_gets_vector_results() {
        let dir = tempfile::tempdir().unwrap();
        let scan = SyntheticScan {
            dims: 2,
            points: 301,
            outer: [1, 3],
            ..SyntheticScan::default()
        };
        let path = write(&dir, "scan2d", &scan);

        let mut res = Resonator::open(&path, AutofitOptions::default()).unwrap();
        let summary = res.fit(&mut CircleFit::default(), &CancelToken::new()).unwrap();
        assert_eq!(summary.fitted, 3);
        drop(res);

        let file = ScanFile::open(&path, OpenMode::Read, StoreOptions::default()).unwrap();
        assert_eq!(file.info("_fit_phase").unwrap().kind(), DatasetKind::Matrix);
        assert_eq!(file.read("_fit_real").unwrap().shape(), &[3, crate::domain::DEFAULT_OUT_NOP]);
        let f_res = file.read_vec("fit_f_res").unwrap();
        assert_eq!(f_res.len(), 3);
        let step = scan.drift * scan.resonator.linewidth();
        for (j, f) in f_res.iter().enumerate() {
            let expected = scan.resonator.params.fr + j as f64 * step;
            assert!((f - expected).abs() < 5e3, "trace {j}: {f} vs {expected}");
        }
        assert_eq!(file.info("fit_Ql").unwrap().attrs.axes[0].name, "power");
    }

    #[test]
    fn circle_fit_of_matrix_scan_skips_dead_traces() {
        let dir = tempfile::tempdir().unwrap();
        let scan = SyntheticScan {
            dims: 2,
            outer: [1, 4],
            dead_traces: vec![2],
            ..SyntheticScan::default()
        };
        let path = write(&dir, "scan2d", &scan);

        let mut res = Resonator::open(&path, AutofitOptions::default()).unwrap();
        let summary = res.fit(&mut CircleFit::default(), &CancelToken::new()).unwrap();
        assert_eq!(summary.traces, 4);
        assert_eq!(summary.failed, vec![2]);
        assert_eq!(summary.fitted, 3);
        res.close().unwrap();

        let file = ScanFile::open(&path, OpenMode::Read, StoreOptions::default()).unwrap();
        let ql = file.read_vec("fit_Ql").unwrap();
        let qc = file.read_vec("fit_Qc").unwrap();
        assert_eq!(ql.len(), 4);
        assert!(ql[2].is_nan() && qc[2].is_nan());
        for j in [0, 1, 3] {
            assert!((ql[j] / scan.resonator.params.ql - 1.0).abs() < 0.02, "trace {j}: Ql = {}", ql[j]);
            assert!((qc[j] / scan.resonator.params.qc() - 1.0).abs() < 0.02, "trace {j}: Qc = {}", qc[j]);
        }
        let curves = file.read("_fit_amplitude").unwrap();
        assert_eq!(curves.shape(), &[4, crate::domain::DEFAULT_OUT_NOP]);
        assert!(curves[[2, 0]].is_nan());
        assert!(curves[[3, 0]].is_finite());
    }

    #[test]
    fn empty_output_grid_is_refused_before_anything_is_declared() {
        let dir = tempfile::tempdir().unwrap();
        let scan = SyntheticScan {
            dims: 2,
            points: 64,
            ..SyntheticScan::default()
        };
        let path = write(&dir, "scan", &scan);

        let mut res = Resonator::open(&path, AutofitOptions::default()).unwrap();
        assert!(matches!(
            res.fit(&mut LorentzianFit::new(0), &CancelToken::new()),
            Err(AutofitError::EmptyFitGrid)
        ));
        assert_eq!(fit_datasets(res.file()), 0);
        res.close().unwrap();

        let mut res = Resonator::open(&path, AutofitOptions::default()).unwrap();
        let summary = res.fit(&mut LorentzianFit::default(), &CancelToken::new()).unwrap();
        assert_eq!(summary.traces, scan.trace_count());
    }

    #[test]
    fn box_scan_survives_failed_point_and_abort() {
        let dir = tempfile::tempdir().unwrap();
        let mut scan = SyntheticScan {
            dims: 3,
            points: 201,
            outer: [2, 3],
            abort_after: Some(5),
            dead_traces: vec![1],
            ..SyntheticScan::default()
        };
        scan.resonator.params.phi = 0.0;
        let path = write(&dir, "scan3d", &scan);

        let mut res = Resonator::open(&path, AutofitOptions::default()).unwrap();
        assert_eq!(res.traces(), 5);
        let summary = res.fit(&mut LorentzianFit::default(), &CancelToken::new()).unwrap();
        assert_eq!(summary.traces, 5);
        assert_eq!(summary.failed, vec![1]);
        assert_eq!(summary.fitted, 4);
        res.close().unwrap();

        let file = ScanFile::open(&path, OpenMode::Read, StoreOptions::default()).unwrap();
        assert_eq!(fit_datasets(&file), LORENTZIAN_FIT_KEYS.len());
        assert_eq!(file.info("_fit_amplitude").unwrap().kind(), DatasetKind::Box);
        assert_eq!(
            file.read("_fit_amplitude").unwrap().shape(),
            &[2, 3, crate::domain::DEFAULT_OUT_NOP]
        );
        assert_eq!(file.info("_fit_amplitude").unwrap().fill(), vec![1, 2]);

        let ql = file.read("fit_Ql").unwrap();
        assert_eq!(ql.shape(), &[2, 3]);
        assert!(ql[[0, 0]].is_finite());
        assert!(ql[[0, 1]].is_nan());
        assert!(ql[[1, 1]].is_finite());
        assert!(ql[[1, 2]].is_nan());
    }

    #[test]
    fn existing_fit_data_is_refused() {
        let dir = tempfile::tempdir().unwrap();
        let path = write(&dir, "scan", &SyntheticScan::default());

        let mut res = Resonator::open(&path, AutofitOptions::default()).unwrap();
        res.fit(&mut LorentzianFit::default(), &CancelToken::new()).unwrap();
        assert!(matches!(
            res.fit(&mut LorentzianFit::default(), &CancelToken::new()),
            Err(AutofitError::FitDataExists(_))
        ));
        res.close().unwrap();

        assert!(matches!(
            Resonator::open(&path, AutofitOptions::default()),
            Err(AutofitError::FitDataExists(_))
        ));
    }

    #[test]
    fn cancelled_token_stops_before_first_point() {
        let dir = tempfile::tempdir().unwrap();
        let scan = SyntheticScan {
            dims: 2,
            points: 64,
            ..SyntheticScan::default()
        };
        let path = write(&dir, "scan", &scan);

        let cancel = CancelToken::new();
        cancel.cancel();
        let mut res = Resonator::open(&path, AutofitOptions::default()).unwrap();
        let summary = res.fit(&mut LorentzianFit::default(), &cancel).unwrap();
        assert!(summary.cancelled);
        assert_eq!(summary.traces, 0);
        assert!(res.file().info("fit_Ql").unwrap().fill().is_empty());
    }

    #[test]
    fn window_and_inputs_are_validated() {
        let dir = tempfile::tempdir().unwrap();
        let path = write(&dir, "scan", &SyntheticScan::default());
        let options = AutofitOptions {
            f_min: Some(1.0),
            f_max: Some(2.0),
            ..AutofitOptions::default()
        };
        assert!(matches!(
            Resonator::open(&path, options),
            Err(AutofitError::EmptyWindow { points: 0, .. })
        ));

        let empty = dir.path().join("empty");
        ScanFile::create(&empty, StoreOptions::default()).unwrap().close().unwrap();
        assert!(matches!(
            Resonator::open(&empty, AutofitOptions::default()),
            Err(AutofitError::MissingDataset(name)) if name == FREQUENCY
        ));
    }
}
