//! Command-line parsing for the resonator fitter.
//!
//! The goal of this module is to keep **argument parsing** and **command dispatch**
//! separate from the fitting and storage code.

use std::path::PathBuf;

use clap::{Parser, Subcommand};

use crate::domain::{DEFAULT_OUT_NOP, ModelChoice, NPorts, RaggedPolicy};

/// Top-level CLI.
#[derive(Debug, Parser)]
#[command(name = "qfit", version, about = "Resonator circle fit over incremental scan files")]
pub struct Cli {
    #[command(subcommand)]
    pub command: Command,
}

/// CLI subcommands.
#[derive(Debug, Subcommand)]
pub enum Command {
    /// Fit every trace of a scan file and write the results back into it.
    Fit(FitArgs),
    /// Write a synthetic resonator scan with known parameters.
    Simulate(SimulateArgs),
    /// List datasets, shapes, fill markers, and views of a scan file.
    Show(ShowArgs),
    /// Merge scan files into a new one.
    Merge(MergeArgs),
    /// Plot measured against fitted amplitude of a fitted 1D scan.
    Plot(PlotArgs),
}

/// Options for fitting a scan.
#[derive(Debug, Parser, Clone)]
pub struct FitArgs {
    /// Scan file (HDF5). Relative paths resolve against `QFIT_DATA_DIR` when set.
    #[arg(value_name = "SCAN")]
    pub scan: PathBuf,

    /// Fit function.
    #[arg(long, value_enum, default_value_t = ModelChoice::Circle)]
    pub model: ModelChoice,

    /// Measurement topology: 1 (reflection) or 2 (notch).
    #[arg(long, value_enum, default_value_t = NPorts::Notch)]
    pub n_ports: NPorts,

    /// Lower edge of the frequency window (Hz).
    #[arg(long)]
    pub f_min: Option<f64>,

    /// Upper edge of the frequency window (Hz).
    #[arg(long)]
    pub f_max: Option<f64>,

    /// Use this cable delay (s) instead of refining it.
    #[arg(long)]
    pub fixed_delay: Option<f64>,

    /// Assumed leakage suppression for the Fano bounds (dB).
    #[arg(long = "isolation", default_value_t = 15.0)]
    pub isolation_db: f64,

    /// Maximum number of cable-delay refinement loops.
    #[arg(long = "max-delay-iter", default_value_t = 5)]
    pub fit_delay_max_iterations: usize,

    /// Points of the simulated output curve.
    #[arg(
        long,
        default_value_t = DEFAULT_OUT_NOP,
        value_parser = clap::builder::RangedU64ValueParser::<usize>::new().range(1..)
    )]
    pub out_nop: usize,

    /// Skip the covariance and error propagation.
    #[arg(long)]
    pub no_errors: bool,

    /// Export the extracted quantities as CSV.
    #[arg(long, value_name = "CSV")]
    pub export_csv: Option<PathBuf>,

    /// Export the result of a 1D fit as JSON.
    #[arg(long, value_name = "JSON")]
    pub export_json: Option<PathBuf>,

    /// Disable the terminal plot.
    #[arg(long)]
    pub no_plot: bool,

    /// Plot width (columns).
    #[arg(long, default_value_t = 100)]
    pub width: usize,

    /// Plot height (rows).
    #[arg(long, default_value_t = 25)]
    pub height: usize,

    /// What to do with rows whose length differs from the first one.
    #[arg(long, value_enum, default_value_t = RaggedPolicy::Reject)]
    pub on_ragged: RaggedPolicy,
}

/// Options for writing a synthetic scan.
#[derive(Debug, Parser, Clone)]
pub struct SimulateArgs {
    /// Scan file (HDF5) to create.
    #[arg(value_name = "SCAN")]
    pub scan: PathBuf,

    /// Scan dimensionality (1, 2 or 3).
    #[arg(long, default_value_t = 1, value_parser = clap::value_parser!(u8).range(1..=3))]
    pub dims: u8,

    /// Resonance frequency (Hz).
    #[arg(long, default_value_t = 5.57019e9)]
    pub fr: f64,

    /// Loaded quality factor.
    #[arg(long, default_value_t = 1.0e4)]
    pub ql: f64,

    /// Magnitude of the coupling quality factor.
    #[arg(long, default_value_t = 1.5e4)]
    pub qc: f64,

    /// Impedance-mismatch angle (rad).
    #[arg(long, default_value_t = 0.1)]
    pub phi: f64,

    /// Measurement topology: 1 (reflection) or 2 (notch).
    #[arg(long, value_enum, default_value_t = NPorts::Notch)]
    pub n_ports: NPorts,

    /// Cable delay (s).
    #[arg(long, default_value_t = 2.5e-8)]
    pub delay: f64,

    /// Noise per quadrature, relative to the off-resonant amplitude.
    #[arg(long, default_value_t = 2e-4)]
    pub noise: f64,

    /// Points per trace.
    #[arg(long, default_value_t = 401)]
    pub points: usize,

    /// Sweep span in linewidths.
    #[arg(long, default_value_t = 12.0)]
    pub linewidths: f64,

    /// Steps of the outer coordinates (`flux`, `power`).
    #[arg(long, num_args = 2, value_names = ["FLUX", "POWER"], default_values_t = [3, 4])]
    pub outer: Vec<usize>,

    /// Random seed.
    #[arg(long, default_value_t = 7)]
    pub seed: u64,

    /// Stop after this many traces, like an interrupted measurement.
    #[arg(long)]
    pub abort_after: Option<usize>,
}

#[derive(Debug, Parser, Clone)]
pub struct ShowArgs {
    /// Scan file (HDF5).
    #[arg(value_name = "SCAN")]
    pub scan: PathBuf,
}

#[derive(Debug, Parser, Clone)]
pub struct MergeArgs {
    /// Scan file (HDF5) to create.
    #[arg(value_name = "OUT")]
    pub out: PathBuf,

    /// Scan files to copy, in order.
    #[arg(value_name = "SCAN", required = true)]
    pub sources: Vec<PathBuf>,
}

/// Options for plotting a fitted scan.
#[derive(Debug, Parser, Clone)]
pub struct PlotArgs {
    /// Scan file (HDF5) fitted with `qfit fit`.
    #[arg(value_name = "SCAN")]
    pub scan: PathBuf,

    /// Plot width (columns).
    #[arg(long, default_value_t = 100)]
    pub width: usize,

    /// Plot height (rows).
    #[arg(long, default_value_t = 25)]
    pub height: usize,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fit_flags_parse() {
        let cli = Cli::parse_from([
            "qfit", "fit", "scan", "--model", "lorentzian", "--n-ports", "1", "--f-min", "5e9",
            "--isolation", "20", "--no-errors", "--on-ragged", "pad",
        ]);
        let Command::Fit(args) = cli.command else {
            panic!("expected fit");
        };
        assert_eq!(args.model, ModelChoice::Lorentzian);
        assert_eq!(args.n_ports, NPorts::Reflection);
        assert_eq!(args.f_min, Some(5e9));
        assert_eq!(args.isolation_db, 20.0);
        assert!(args.no_errors);
        assert_eq!(args.on_ragged, RaggedPolicy::Pad);
        assert_eq!(args.out_nop, DEFAULT_OUT_NOP);
    }

    #[test]
    fn fit_rejects_empty_output_grid() {
        assert!(Cli::try_parse_from(["qfit", "fit", "scan", "--out-nop", "0"]).is_err());
        let cli = Cli::parse_from(["qfit", "fit", "scan", "--out-nop", "1"]);
        let Command::Fit(args) = cli.command else {
            panic!("expected fit");
        };
        assert_eq!(args.out_nop, 1);
    }

    #[test]
    fn simulate_rejects_four_dimensions() {
        assert!(Cli::try_parse_from(["qfit", "simulate", "s", "--dims", "4"]).is_err());
        let cli = Cli::parse_from(["qfit", "simulate", "s", "--dims", "3", "--outer", "2", "5"]);
        let Command::Simulate(args) = cli.command else {
            panic!("expected simulate");
        };
        assert_eq!(args.outer, vec![2, 5]);
    }
}
