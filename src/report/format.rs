//! Formatted terminal output.
//!
//! We keep formatting code in one place so:
//! - the fit and store code stays clean and testable
//! - output changes are localized (important for snapshot tests)

use crate::autofit::AutofitSummary;
use crate::domain::{ExtractData, FitConfig};
use crate::report::QuantityStats;
use crate::store::{DatasetInfo, ScanFile, ViewInfo};

/// Format the run header and outcome of a batch fit.
pub fn format_run_summary(summary: &AutofitSummary, config: &FitConfig) -> String {
    let mut out = String::new();

    out.push_str("=== qfit - resonator fit ===\n");
    out.push_str(&format!("Scan: {}\n", config.scan_path.display()));
    out.push_str(&format!(
        "Fit: {} | n_ports={} | dims={}\n",
        summary.fit_function,
        config.n_ports.count(),
        summary.dims
    ));
    out.push_str(&format!(
        "Window: [{}, {}] Hz\n",
        fmt_opt(config.f_min),
        fmt_opt(config.f_max)
    ));
    match config.fixed_delay {
        Some(d) => out.push_str(&format!("Delay: fixed {d:.6e} s\n")),
        None => out.push_str(&format!(
            "Delay: refined (max {} iterations)\n",
            config.fit_delay_max_iterations
        )),
    }

    out.push_str(&format!(
        "Traces: {} fitted, {} failed{}\n",
        summary.fitted,
        summary.failed.len(),
        if summary.cancelled { ", cancelled" } else { "" }
    ));
    if !summary.failed.is_empty() {
        let ids: Vec<String> = summary.failed.iter().map(usize::to_string).collect();
        out.push_str(&format!("Failed traces: {}\n", ids.join(", ")));
    }
    if summary.warnings > 0 {
        out.push_str(&format!("Warnings: {}\n", summary.warnings));
    }
    out.push('\n');

    out
}

/// Format extracted quantities as `name  value ± error`.
pub fn format_extract_table(data: &ExtractData) -> String {
    let mut out = String::new();
    out.push_str(&format!("{:<20} {:>16} {:>16}\n", "quantity", "value", "error"));
    out.push_str(&format!("{:-<20} {:-<16} {:-<16}\n", "", "", ""));

    for (key, value) in data.iter() {
        if key.ends_with("_err") {
            continue;
        }
        let err = data.get(&format!("{key}_err"));
        let line = format!(
            "{:<20} {:>16} {:>16}",
            key,
            fmt_value(value),
            err.map(fmt_value).unwrap_or_default()
        );
        out.push_str(line.trim_end());
        out.push('\n');
    }

    out
}

/// Format aggregates over a 2D/3D fit.
pub fn format_quantity_stats(stats: &[QuantityStats]) -> String {
    let mut out = String::new();
    out.push_str(&format!(
        "{:<20} {:>8} {:>16} {:>16}\n",
        "quantity", "points", "mean", "sem"
    ));
    out.push_str(&format!("{:-<20} {:-<8} {:-<16} {:-<16}\n", "", "", "", ""));
    for s in stats {
        let line = format!(
            "{:<20} {:>8} {:>16} {:>16}",
            s.name,
            format!("{}/{}", s.finite, s.total),
            s.mean.map(fmt_value).unwrap_or_else(|| "-".into()),
            s.sem.map(fmt_value).unwrap_or_default(),
        );
        out.push_str(line.trim_end());
        out.push('\n');
    }
    out
}

/// Format the dataset listing of a scan file.
pub fn format_scan_listing(scan: &ScanFile) -> String {
    let mut out = String::new();
    out.push_str(&format!("Scan: {}\n", scan.path().display()));
    out.push_str(&format!(
        "Created: {} | modified: {}\n\n",
        scan.created().format("%Y-%m-%d %H:%M:%S UTC"),
        scan.modified().format("%Y-%m-%d %H:%M:%S UTC")
    ));

    out.push_str(&format!(
        "{:<32} {:<10} {:<8} {:<14} {:<10} {:<12}\n",
        "dataset", "kind", "unit", "shape", "fill", "state"
    ));
    out.push_str(&format!(
        "{:-<32} {:-<10} {:-<8} {:-<14} {:-<10} {:-<12}\n",
        "", "", "", "", "", ""
    ));
    for d in scan.datasets() {
        out.push_str(format_dataset_row(&d).trim_end());
        out.push('\n');
    }

    let views = scan.views();
    if !views.is_empty() {
        out.push_str("\nViews:\n");
        for v in &views {
            out.push_str(&format_view(v));
        }
    }
    out
}

fn format_dataset_row(d: &DatasetInfo) -> String {
    let state = match (d.layout(), d.state.is_closed()) {
        (None, _) => "declared",
        (Some(_), false) => "open",
        (Some(_), true) => "closed",
    };
    format!(
        "{:<32} {:<10} {:<8} {:<14} {:<10} {:<12}",
        truncate(&format!("{}.{}", d.attrs.folder.alias(), d.attrs.name), 32),
        d.kind().as_str(),
        truncate(&d.attrs.unit, 8),
        fmt_dims(&d.shape()),
        fmt_dims(&d.fill()),
        state
    )
}

fn format_view(v: &ViewInfo) -> String {
    let mut out = format!("- {}\n", v.name);
    for (i, o) in v.spec.overlays.iter().enumerate() {
        let label = v.spec.params.labels.get(i).map(String::as_str).unwrap_or("");
        out.push_str(format!("    {} vs {} {label}\n", short_url(&o.y), short_url(&o.x)).trim_end());
        out.push('\n');
    }
    out
}

fn short_url(url: &str) -> &str {
    url.rsplit('/').next().unwrap_or(url)
}

fn fmt_dims(dims: &[usize]) -> String {
    if dims.is_empty() {
        return "-".into();
    }
    let parts: Vec<String> = dims.iter().map(usize::to_string).collect();
    parts.join("x")
}

fn fmt_value(v: f64) -> String {
    if v.is_nan() {
        "nan".into()
    } else if v != 0.0 && (v.abs() >= 1e5 || v.abs() < 1e-3) {
        format!("{v:.6e}")
    } else {
        format!("{v:.6}")
    }
}

fn fmt_opt(v: Option<f64>) -> String {
    v.map(|x| format!("{x:.6e}")).unwrap_or_else(|| "edge".into())
}

fn truncate(s: &str, max: usize) -> String {
    if s.chars().count() <= max {
        return s.to_string();
    }
    let mut out = String::new();
    for (i, ch) in s.chars().enumerate() {
        if i + 1 >= max {
            break;
        }
        out.push(ch);
    }
    out.push('.');
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn extract_table_pairs_errors() {
        let mut data = ExtractData::nan_filled(&["Qc", "Qc_err", "phi"]);
        data.set("Qc", 1.5e4);
        data.set("Qc_err", 12.5);
        data.set("phi", 0.1);

        let txt = format_extract_table(&data);
        let lines: Vec<&str> = txt.lines().collect();
        assert_eq!(lines.len(), 4);
        assert_eq!(lines[2], format!("{:<20} {:>16} {:>16}", "Qc", "15000.000000", "12.500000"));
        assert_eq!(lines[3], format!("{:<20} {:>16}", "phi", "0.100000"));
    }

    #[test]
    fn values_switch_to_scientific() {
        assert_eq!(fmt_value(5.57e9), "5.570000e9");
        assert_eq!(fmt_value(0.25), "0.250000");
        assert_eq!(fmt_value(0.0), "0.000000");
        assert_eq!(fmt_value(f64::NAN), "nan");
        assert_eq!(fmt_dims(&[2, 3, 501]), "2x3x501");
        assert_eq!(truncate("amplitude_fit_long", 8), "amplitu.");
    }
}
