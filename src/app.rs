//! Top-level application orchestration.
//!
//! `src/main.rs` is intentionally tiny; this module is the "real main" that:
//! - parses CLI arguments
//! - fits scan files and writes the results back
//! - writes synthetic scans, lists and merges scan files
//! - prints reports/plots
//! - writes optional exports

use std::path::{Path, PathBuf};

use clap::Parser;

use crate::cli::{Command, FitArgs, MergeArgs, PlotArgs, ShowArgs, SimulateArgs};
use crate::data::{SyntheticResonator, SyntheticScan};
use crate::domain::FitConfig;
use crate::error::AppError;
use crate::models::{Environment, ResonatorParams};
use crate::store::{OpenMode, ScanFile, StoreOptions, merge_files};

pub mod pipeline;

/// Directory that relative scan paths resolve against.
pub const DATA_DIR_ENV: &str = "QFIT_DATA_DIR";

/// Entry point for the `qfit` binary.
pub fn run() -> Result<(), AppError> {
    dotenvy::dotenv().ok();
    let cli = crate::cli::Cli::parse_from(std::env::args());

    match cli.command {
        Command::Fit(args) => handle_fit(args),
        Command::Simulate(args) => handle_simulate(args),
        Command::Show(args) => handle_show(args),
        Command::Merge(args) => handle_merge(args),
        Command::Plot(args) => handle_plot(args),
    }
}

fn handle_fit(args: FitArgs) -> Result<(), AppError> {
    let config = fit_config_from_args(&args);
    let run = pipeline::run_fit(&config)?;

    println!("{}", crate::report::format_run_summary(&run.summary, &config));

    match &run.result {
        Some(result) => println!("{}", crate::report::format_extract_table(&result.extract_data)),
        None if !run.stats.is_empty() => {
            println!("{}", crate::report::format_quantity_stats(&run.stats))
        }
        None => {}
    }

    if config.plot {
        if let (Some(result), Some((freq, amp))) = (&run.result, &run.measured) {
            let plot = crate::plot::render_ascii_plot(
                freq,
                amp,
                &result.freq_fit,
                &result.amp_fit,
                config.plot_width,
                config.plot_height,
                result.extract_data.get("f_res"),
            );
            println!("{plot}");
        }
    }

    // Optional exports.
    if let Some(path) = &config.export_csv {
        let scan = ScanFile::open(&config.scan_path, OpenMode::Read, StoreOptions::default())?;
        let rows = crate::io::write_fit_table_csv(path, &scan)?;
        log::info!("exported {rows} row(s) to {}", path.display());
    }
    if let Some(path) = &config.export_json {
        let Some(result) = &run.result else {
            return Err(AppError::new(
                2,
                "JSON export needs a single successfully fitted trace (1D scan).",
            ));
        };
        crate::io::write_fit_result_json(path, run.summary.fit_function, result)?;
        log::info!("exported fit result to {}", path.display());
    }

    Ok(())
}

fn handle_simulate(args: SimulateArgs) -> Result<(), AppError> {
    let scan = synthetic_scan_from_args(&args);
    let path = resolve_scan_path(&args.scan);
    let written = scan.write(&path, StoreOptions::default())?;
    println!(
        "Wrote {written} of {} trace(s) to {}",
        scan.trace_count(),
        path.display()
    );
    Ok(())
}

fn handle_show(args: ShowArgs) -> Result<(), AppError> {
    let path = resolve_scan_path(&args.scan);
    let scan = ScanFile::open(&path, OpenMode::Read, StoreOptions::default())?;
    println!("{}", crate::report::format_scan_listing(&scan));

    let stats = crate::report::summarize_quantities(&scan)?;
    if !stats.is_empty() {
        println!("{}", crate::report::format_quantity_stats(&stats));
    }
    Ok(())
}

fn handle_merge(args: MergeArgs) -> Result<(), AppError> {
    let out = resolve_scan_path(&args.out);
    let sources: Vec<PathBuf> = args.sources.iter().map(|s| resolve_scan_path(s)).collect();
    let merged = merge_files(&out, &sources, StoreOptions::default())?;

    for m in merged.iter().filter(|m| m.renamed()) {
        println!("{} -> {} (from {})", m.from, m.to, m.source.display());
    }
    println!("Merged {} dataset(s) into {}", merged.len(), out.display());
    Ok(())
}

fn handle_plot(args: PlotArgs) -> Result<(), AppError> {
    let data = pipeline::load_plot_data(&resolve_scan_path(&args.scan))?;
    let plot = crate::plot::render_ascii_plot(
        &data.freq,
        &data.amp,
        &data.freq_fit,
        &data.amp_fit,
        args.width,
        args.height,
        data.f_res,
    );
    println!("{plot}");
    Ok(())
}

pub fn fit_config_from_args(args: &FitArgs) -> FitConfig {
    FitConfig {
        scan_path: resolve_scan_path(&args.scan),
        model: args.model,
        n_ports: args.n_ports,
        f_min: args.f_min,
        f_max: args.f_max,
        fixed_delay: args.fixed_delay,
        isolation_db: args.isolation_db,
        fit_delay_max_iterations: args.fit_delay_max_iterations,
        out_nop: args.out_nop,
        calc_errors: !args.no_errors,
        plot: !args.no_plot,
        plot_width: args.width,
        plot_height: args.height,
        export_csv: args.export_csv.clone(),
        export_json: args.export_json.clone(),
        on_ragged_append: args.on_ragged,
    }
}

pub fn synthetic_scan_from_args(args: &SimulateArgs) -> SyntheticScan {
    let defaults = SyntheticScan::default();
    SyntheticScan {
        resonator: SyntheticResonator {
            params: ResonatorParams {
                fr: args.fr,
                ql: args.ql,
                abs_qc: args.qc,
                phi: args.phi,
                n_ports: args.n_ports,
            },
            env: Environment {
                delay: args.delay,
                ..defaults.resonator.env
            },
        },
        dims: usize::from(args.dims),
        points: args.points,
        linewidths: args.linewidths,
        noise: args.noise,
        seed: args.seed,
        outer: [
            args.outer.first().copied().unwrap_or(defaults.outer[0]),
            args.outer.get(1).copied().unwrap_or(defaults.outer[1]),
        ],
        abort_after: args.abort_after,
        ..defaults
    }
}

/// Resolve a relative scan path against `QFIT_DATA_DIR` when it is set.
pub fn resolve_scan_path(path: &Path) -> PathBuf {
    resolve_against(path, std::env::var_os(DATA_DIR_ENV).map(PathBuf::from))
}

fn resolve_against(path: &Path, base: Option<PathBuf>) -> PathBuf {
    match base {
        Some(dir) if path.is_relative() && !dir.as_os_str().is_empty() => dir.join(path),
        _ => path.to_path_buf(),
    }
}
