//! Export extracted quantities of a fitted scan to CSV.
//!
//! One row per grid point, outer coordinate values first, then one column per
//! `fit_<quantity>` dataset. NaN cells are left empty so spreadsheets read them
//! as missing.

use std::fs::File;
use std::io::{BufWriter, Write};
use std::path::Path;

use crate::error::AppError;
use crate::store::{DatasetInfo, Folder, ScanFile};

/// `fit_<quantity>` datasets of the analysis folder, in declaration order.
pub fn fit_quantities(scan: &ScanFile) -> Vec<DatasetInfo> {
    scan.datasets()
        .into_iter()
        .filter(|d| d.attrs.folder == Folder::Analysis && d.attrs.name.starts_with("fit_"))
        .collect()
}

/// Write the fit table of `scan` to `path`; returns the number of data rows.
pub fn write_fit_table_csv(path: &Path, scan: &ScanFile) -> Result<usize, AppError> {
    let quantities = fit_quantities(scan);
    let Some(first) = quantities.first() else {
        return Err(AppError::new(2, "Scan holds no fit results to export."));
    };

    // 1D results are single-value coordinates with no outer axes.
    let axes: Vec<_> = if first.kind().axis_count() == 0 {
        Vec::new()
    } else {
        first.attrs.axes.clone()
    };
    let axis_values = axes
        .iter()
        .map(|a| scan.read_vec(&a.url))
        .collect::<Result<Vec<_>, _>>()?;

    let mut columns = Vec::with_capacity(quantities.len());
    for q in &quantities {
        let values = match q.layout() {
            Some(_) => scan.read(&q.url)?.iter().copied().collect(),
            None => Vec::new(),
        };
        columns.push(values);
    }
    let rows = columns.iter().map(Vec::len).max().unwrap_or(0);

    let file = File::create(path)
        .map_err(|e| AppError::new(5, format!("Failed to create export CSV '{}': {e}", path.display())))?;
    let mut out = BufWriter::new(file);
    let write_err = |e: std::io::Error| AppError::new(5, format!("Failed to write export CSV: {e}"));

    let header: Vec<&str> = axes
        .iter()
        .map(|a| a.name.as_str())
        .chain(quantities.iter().map(|q| q.attrs.name.trim_start_matches("fit_")))
        .collect();
    writeln!(out, "{}", header.join(",")).map_err(write_err)?;

    let inner = axis_values.last().map_or(1, |v| v.len().max(1));
    for r in 0..rows {
        let mut cells = Vec::with_capacity(header.len());
        match axis_values.len() {
            0 => {}
            1 => cells.push(cell(axis_values[0].get(r).copied())),
            _ => {
                cells.push(cell(axis_values[0].get(r / inner).copied()));
                cells.push(cell(axis_values[1].get(r % inner).copied()));
            }
        }
        cells.extend(columns.iter().map(|c| cell(c.get(r).copied())));
        writeln!(out, "{}", cells.join(",")).map_err(write_err)?;
    }
    out.flush().map_err(write_err)?;
    Ok(rows)
}

fn cell(value: Option<f64>) -> String {
    match value {
        Some(v) if v.is_finite() => format!("{v:.10e}"),
        _ => String::new(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::{OpenMode, StoreOptions};

    #[test]
    fn table_has_one_row_per_grid_point() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("scan");
        let mut scan = ScanFile::create(&path, StoreOptions::default()).unwrap();
        let p = scan.add_coordinate("power", "dBm", Folder::Data).unwrap();
        scan.add(&p, &[-60.0, -50.0, -40.0]).unwrap();
        let qc = scan.add_value_vector("fit_Qc", &p, "", Folder::Analysis).unwrap();
        let fr = scan.add_value_vector("fit_f_res", &p, "", Folder::Analysis).unwrap();
        for (q, f) in [(1.0e4, 5.0e9), (f64::NAN, f64::NAN), (1.2e4, 5.1e9)] {
            scan.append_scalar(&qc, q).unwrap();
            scan.append_scalar(&fr, f).unwrap();
        }
        scan.close().unwrap();

        let scan = ScanFile::open(&path, OpenMode::Read, StoreOptions::default()).unwrap();
        let csv = dir.path().join("fit.csv");
        assert_eq!(write_fit_table_csv(&csv, &scan).unwrap(), 3);

        let text = std::fs::read_to_string(&csv).unwrap();
        let lines: Vec<&str> = text.lines().collect();
        assert_eq!(lines[0], "power,Qc,f_res");
        assert_eq!(lines[2], "-5.0000000000e1,,");
        assert!(lines[3].starts_with("-4.0000000000e1,1.2000000000e4,"));
    }

    #[test]
    fn scan_without_fits_is_an_error() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("scan");
        let scan = ScanFile::create(&path, StoreOptions::default()).unwrap();
        let err = write_fit_table_csv(&dir.path().join("x.csv"), &scan).unwrap_err();
        assert_eq!(err.exit_code(), 2);
    }
}
