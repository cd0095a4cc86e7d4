//! Synthetic resonator traces and scan files with known parameters.

use std::path::Path;

use num_complex::Complex64;
use rand::prelude::*;
use rand::rngs::StdRng;
use rand_distr::Normal;

use crate::domain::{ComplexTrace, NPorts};
use crate::error::{FitError, StoreError};
use crate::math::linspace;
use crate::models::{Environment, ResonatorParams};
use crate::store::{Coordinate, Folder, ScanFile, StoreOptions};

/// A resonator behind a measurement line.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SyntheticResonator {
    pub params: ResonatorParams,
    pub env: Environment,
}

impl Default for SyntheticResonator {
    /// Over-coupled notch resonator near 5.57 GHz with a few tens of ns of cable.
    fn default() -> Self {
        Self {
            params: ResonatorParams {
                fr: 5.57019e9,
                ql: 1.0e4,
                abs_qc: 1.5e4,
                phi: 0.1,
                n_ports: NPorts::Notch,
            },
            env: Environment {
                a: 0.35,
                alpha: 0.6,
                delay: 2.5e-8,
            },
        }
    }
}

impl SyntheticResonator {
    pub fn linewidth(&self) -> f64 {
        self.params.fr / self.params.ql
    }

    /// `points` frequencies spanning `linewidths` linewidths centred on `fr`.
    pub fn sweep(&self, points: usize, linewidths: f64) -> Vec<f64> {
        let half = 0.5 * linewidths * self.linewidth();
        linspace(self.params.fr - half, self.params.fr + half, points)
    }

    pub fn response(&self, freq: &[f64]) -> Vec<Complex64> {
        freq.iter().map(|&f| self.params.response(f, &self.env)).collect()
    }

    /// Response with complex Gaussian noise of standard deviation `noise · a`
    /// on each quadrature.
    pub fn trace<R: Rng>(&self, freq: &[f64], noise: f64, rng: &mut R) -> Result<ComplexTrace, FitError> {
        let sigma = (noise * self.env.a).abs();
        let normal = Normal::new(0.0, sigma)
            .map_err(|e| FitError::InvalidInput(format!("noise distribution: {e}")))?;
        let z: Vec<Complex64> = self
            .response(freq)
            .into_iter()
            .map(|z| z + Complex64::new(normal.sample(rng), normal.sample(rng)))
            .collect();
        ComplexTrace::from_complex(freq.to_vec(), &z)
    }
}

/// Recipe for a synthetic 1D/2D/3D scan file.
///
/// Layout follows the acquisition convention: `data.frequency` is the inner
/// coordinate; 2D scans step `power` in the outer loop, 3D scans step `flux`
/// outside `power`. The resonance frequency drifts with the outer indices.
#[derive(Debug, Clone)]
pub struct SyntheticScan {
    pub resonator: SyntheticResonator,
    pub dims: usize,
    pub points: usize,
    pub linewidths: f64,
    pub noise: f64,
    pub seed: u64,
    /// Steps of the outer coordinates (`flux`, `power`); unused ones are ignored.
    pub outer: [usize; 2],
    /// Frequency shift per outer step, in linewidths.
    pub drift: f64,
    /// Stop after this many traces, as an interrupted measurement would.
    pub abort_after: Option<usize>,
    /// Trace indices replaced by a constant (unfittable) response.
    pub dead_traces: Vec<usize>,
}

impl Default for SyntheticScan {
    fn default() -> Self {
        Self {
            resonator: SyntheticResonator::default(),
            dims: 1,
            points: 401,
            linewidths: 12.0,
            noise: 2e-4,
            seed: 7,
            outer: [3, 4],
            drift: 0.25,
            abort_after: None,
            dead_traces: Vec::new(),
        }
    }
}

impl SyntheticScan {
    /// Number of traces a complete scan holds.
    pub fn trace_count(&self) -> usize {
        match self.dims {
            1 => 1,
            2 => self.outer[1],
            _ => self.outer[0] * self.outer[1],
        }
    }

    /// Write the scan to a new file at `path`; returns the number of traces written.
    pub fn write(&self, path: &Path, options: StoreOptions) -> Result<usize, StoreError> {
        if !(1..=3).contains(&self.dims) {
            return Err(StoreError::WrongKind {
                url: path.display().to_string(),
                expected: "1, 2 or 3 dimensions".into(),
                found: format!("{} dimensions", self.dims),
            });
        }
        let mut rng = StdRng::seed_from_u64(self.seed);
        let freq = self.resonator.sweep(self.points, self.linewidths);

        let mut file = ScanFile::create(path, options)?;
        let f = file.add_coordinate("frequency", "Hz", Folder::Data)?;
        file.add(&f, &freq)?;

        let outer = |file: &mut ScanFile, name: &str, unit: &str, values: Vec<f64>| -> Result<Coordinate, StoreError> {
            let c = file.add_coordinate(name, unit, Folder::Data)?;
            file.add(&c, &values)?;
            Ok(c)
        };
        let flux_steps = if self.dims == 3 { self.outer[0] } else { 1 };
        let power_steps = if self.dims >= 2 { self.outer[1] } else { 1 };

        let (amp, pha) = match self.dims {
            1 => (
                file.add_value_vector("amplitude", &f, "V", Folder::Data)?,
                file.add_value_vector("phase", &f, "rad", Folder::Data)?,
            ),
            2 => {
                let p = outer(&mut file, "power", "dBm", power_axis(power_steps))?;
                (
                    file.add_value_matrix("amplitude", &p, &f, "V", Folder::Data)?,
                    file.add_value_matrix("phase", &p, &f, "rad", Folder::Data)?,
                )
            }
            _ => {
                let x = outer(&mut file, "flux", "Phi0", linspace(0.0, 0.5, flux_steps))?;
                let p = outer(&mut file, "power", "dBm", power_axis(power_steps))?;
                (
                    file.add_value_box("amplitude", &x, &p, &f, "V", Folder::Data)?,
                    file.add_value_box("phase", &x, &p, &f, "rad", Folder::Data)?,
                )
            }
        };

        let limit = self.abort_after.unwrap_or(usize::MAX);
        let mut written = 0;
        'scan: for i in 0..flux_steps {
            for j in 0..power_steps {
                if written == limit {
                    break 'scan;
                }
                let mut res = self.resonator;
                res.params.fr += (i + j) as f64 * self.drift * self.resonator.linewidth();
                let (a, p) = if self.dead_traces.contains(&written) {
                    (vec![res.env.a; freq.len()], vec![res.env.alpha; freq.len()])
                } else {
                    let trace = res
                        .trace(&freq, self.noise, &mut rng)
                        .map_err(|e| StoreError::Corrupt(format!("synthetic trace: {e}")))?;
                    (trace.amp().to_vec(), trace.pha().to_vec())
                };
                file.append(&amp, &a)?;
                file.append(&pha, &p)?;
                written += 1;
            }
            if self.dims == 3 {
                file.next_matrix(&amp)?;
                file.next_matrix(&pha)?;
            }
        }

        log::info!("wrote {written} synthetic trace(s) to {}", path.display());
        file.close()?;
        Ok(written)
    }
}

fn power_axis(steps: usize) -> Vec<f64> {
    (0..steps).map(|j| -60.0 + 5.0 * j as f64).collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::OpenMode;

    #[test]
    fn noise_free_trace_matches_model() {
        let res = SyntheticResonator::default();
        let freq = res.sweep(101, 10.0);
        let mut rng = StdRng::seed_from_u64(1);
        let trace = res.trace(&freq, 0.0, &mut rng).unwrap();
        let z = trace.to_complex();
        let model = res.response(&freq);
        for (a, b) in z.iter().zip(model.iter()) {
            assert!((a - b).norm() < 1e-12);
        }
        assert!((freq[50] - res.params.fr).abs() < 1.0);
    }

    #[test]
    fn writes_box_scan_with_drifting_resonance() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("scan3d");
        let scan = SyntheticScan {
            dims: 3,
            points: 64,
            outer: [2, 3],
            ..SyntheticScan::default()
        };
        assert_eq!(scan.write(&path, StoreOptions::default()).unwrap(), 6);

        let file = ScanFile::open(&path, OpenMode::Read, StoreOptions::default()).unwrap();
        assert_eq!(file.read("data.amplitude").unwrap().shape(), &[2, 3, 64]);
        assert_eq!(file.read_vec("power").unwrap(), vec![-60.0, -55.0, -50.0]);
    }

    #[test]
    fn aborted_scan_leaves_partial_fill() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("aborted");
        let scan = SyntheticScan {
            dims: 2,
            points: 32,
            outer: [1, 5],
            abort_after: Some(2),
            ..SyntheticScan::default()
        };
        assert_eq!(scan.write(&path, StoreOptions::default()).unwrap(), 2);

        let file = ScanFile::open(&path, OpenMode::Read, StoreOptions::default()).unwrap();
        assert_eq!(file.info("amplitude").unwrap().fill(), vec![2]);
        assert_eq!(file.read_vec("power").unwrap().len(), 5);
    }
}
