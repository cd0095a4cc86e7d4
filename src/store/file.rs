//! `ScanFile`: incremental, append-only storage of one measurement scan.
//!
//! A scan file is a single HDF5 file. Numeric datasets are chunked and
//! resizable along every axis; each append grows the dataset by one row (or
//! one slice, for boxes) and writes only the new data. Schema and lifecycle
//! state live in attributes on each dataset (see [`crate::store::catalog`]),
//! and the file is flushed after every write, so a scan interrupted at any
//! point reads back up to its last completed append. Exactly one writer per
//! scan file is supported.

use std::fs;
use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use hdf5::types::VarLenUnicode;
use hdf5::{Dataset as H5Dataset, File as H5File};
use ndarray::{ArrayD, IxDyn};

use crate::domain::RaggedPolicy;
use crate::error::StoreError;
use crate::store::catalog::{
    Catalog, DatasetEntry, ViewSpec, to_text, write_axis_origins, write_comment,
    write_entry_attrs, write_state,
};
use crate::store::dataset::{
    AxisAttrs, Coordinate, Dataset, DatasetAttrs, DatasetInfo, DatasetKind, DatasetRef,
    DatasetState, Folder, Layout, RowFit, TextDataset, View, ViewOverlay, ViewParams, check_row,
};

/// Chunk length of 1D numeric datasets.
const VALUE_CHUNK: usize = 1024;
/// Chunk length along the trace axis of matrices and boxes.
const ROW_CHUNK: usize = 256;
const TEXT_CHUNK: usize = 64;
const VIEW_CHUNK: usize = 8;

/// Store behaviour that is a caller's choice.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct StoreOptions {
    /// What to do when a row's length differs from the frozen trace length.
    pub on_ragged_append: RaggedPolicy,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OpenMode {
    Read,
    Append,
}

/// A view with its overlays.
#[derive(Debug, Clone, PartialEq)]
pub struct ViewInfo {
    pub url: String,
    pub name: String,
    pub spec: ViewSpec,
}

/// Raw payload of one dataset, used when copying between files.
#[derive(Debug, Clone, PartialEq)]
pub(crate) enum Payload {
    None,
    /// Values in row-major order, padded with NaN to the dataset's shape.
    Values(Vec<f64>),
    Text(Vec<String>),
}

#[derive(Debug)]
pub struct ScanFile {
    path: PathBuf,
    file: H5File,
    mode: OpenMode,
    options: StoreOptions,
    catalog: Catalog,
    finished: bool,
}

impl ScanFile {
    /// Create a new, empty scan file at `path`.
    pub fn create(path: impl AsRef<Path>, options: StoreOptions) -> Result<Self, StoreError> {
        let path = path.as_ref().to_path_buf();
        if path.exists() {
            return Err(StoreError::AlreadyExists(path.display().to_string()));
        }
        if let Some(dir) = path.parent().filter(|d| !d.as_os_str().is_empty()) {
            fs::create_dir_all(dir).map_err(|e| StoreError::io(dir, e))?;
        }
        let file = H5File::create_excl(&path)?;
        let catalog = Catalog::init(&file)?;
        file.flush()?;
        log::debug!("created scan file {}", path.display());
        Ok(Self {
            path,
            file,
            mode: OpenMode::Append,
            options,
            catalog,
            finished: false,
        })
    }

    /// Open an existing scan file.
    pub fn open(
        path: impl AsRef<Path>,
        mode: OpenMode,
        options: StoreOptions,
    ) -> Result<Self, StoreError> {
        let path = path.as_ref().to_path_buf();
        if !path.is_file() {
            return Err(StoreError::io(
                &path,
                std::io::Error::new(std::io::ErrorKind::NotFound, "no such scan file"),
            ));
        }
        let file = match mode {
            OpenMode::Read => H5File::open(&path)?,
            OpenMode::Append => H5File::open_rw(&path)?,
        };
        let catalog = Catalog::load(&file)?;
        Ok(Self {
            path,
            file,
            mode,
            options,
            catalog,
            finished: false,
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn mode(&self) -> OpenMode {
        self.mode
    }

    pub fn options(&self) -> StoreOptions {
        self.options
    }

    pub fn created(&self) -> DateTime<Utc> {
        self.catalog.created
    }

    pub fn modified(&self) -> DateTime<Utc> {
        self.catalog.modified
    }

    pub(crate) fn catalog(&self) -> &Catalog {
        &self.catalog
    }

    // ---------------------------------------------------------------------
    // Declaration
    // ---------------------------------------------------------------------

    pub fn add_coordinate(
        &mut self,
        name: &str,
        unit: &str,
        folder: Folder,
    ) -> Result<Coordinate, StoreError> {
        let url = self.declare(name, folder, DatasetKind::Coordinate, unit, &[])?;
        Ok(Coordinate { url })
    }

    pub fn add_value_vector(
        &mut self,
        name: &str,
        x: &Coordinate,
        unit: &str,
        folder: Folder,
    ) -> Result<Dataset, StoreError> {
        let url = self.declare(name, folder, DatasetKind::Vector, unit, &[x.url()])?;
        Ok(Dataset { url })
    }

    pub fn add_value_matrix(
        &mut self,
        name: &str,
        x: &Coordinate,
        y: &Coordinate,
        unit: &str,
        folder: Folder,
    ) -> Result<Dataset, StoreError> {
        let url = self.declare(name, folder, DatasetKind::Matrix, unit, &[x.url(), y.url()])?;
        Ok(Dataset { url })
    }

    /// Declare a box over `(x, y, z)`: `next_matrix` advances `x`, each
    /// `append` writes one row along `z` for the next `y`.
    pub fn add_value_box(
        &mut self,
        name: &str,
        x: &Coordinate,
        y: &Coordinate,
        z: &Coordinate,
        unit: &str,
        folder: Folder,
    ) -> Result<Dataset, StoreError> {
        let url = self.declare(
            name,
            folder,
            DatasetKind::Box,
            unit,
            &[x.url(), y.url(), z.url()],
        )?;
        Ok(Dataset { url })
    }

    pub fn add_text(&mut self, name: &str, folder: Folder) -> Result<TextDataset, StoreError> {
        let url = self.declare(name, folder, DatasetKind::Text, "", &[])?;
        Ok(TextDataset { url })
    }

    /// Declare a view plotting `y` against `x`.
    pub fn add_view(
        &mut self,
        name: &str,
        x: &impl DatasetRef,
        y: &impl DatasetRef,
        params: ViewParams,
    ) -> Result<View, StoreError> {
        self.writable()?;
        let overlay = self.overlay(x, y)?;
        let mut entry = self.new_entry(name, Folder::Views, DatasetKind::View, "", &[])?;
        entry.state = DatasetState::Materialized(Layout {
            rows: 1,
            ..Layout::default()
        });
        entry.view = Some(ViewSpec {
            overlays: vec![overlay],
            params,
        });
        let url = entry.url.clone();
        self.insert(entry, Payload::None)?;
        Ok(View { url })
    }

    /// Add another x/y pair to an existing view.
    pub fn add_view_overlay(
        &mut self,
        view: &View,
        x: &impl DatasetRef,
        y: &impl DatasetRef,
    ) -> Result<(), StoreError> {
        self.writable()?;
        let overlay = self.overlay(x, y)?;
        let ds = self.h5(view.url())?;
        let entry = self.entry_mut(view.url())?;
        let layout = entry.state.layout_mut(&view.url)?;
        layout.rows += 1;
        let state = entry.state;
        let spec = entry.view.get_or_insert_with(ViewSpec::default);
        spec.overlays.push(overlay);
        write_overlays(&ds, &spec.overlays)?;
        write_state(&ds, &state)?;
        self.sync()
    }

    fn overlay(&self, x: &impl DatasetRef, y: &impl DatasetRef) -> Result<ViewOverlay, StoreError> {
        for url in [x.url(), y.url()] {
            if !self.catalog.contains(url) {
                return Err(StoreError::UnknownDataset(url.to_string()));
            }
        }
        Ok(ViewOverlay {
            x: x.url().to_string(),
            y: y.url().to_string(),
        })
    }

    fn declare(
        &mut self,
        name: &str,
        folder: Folder,
        kind: DatasetKind,
        unit: &str,
        axes: &[&str],
    ) -> Result<String, StoreError> {
        self.writable()?;
        let entry = self.new_entry(name, folder, kind, unit, axes)?;
        let url = entry.url.clone();
        self.insert(entry, Payload::None)?;
        Ok(url)
    }

    /// A declared entry for a free name, not yet stored.
    fn new_entry(
        &self,
        name: &str,
        folder: Folder,
        kind: DatasetKind,
        unit: &str,
        axes: &[&str],
    ) -> Result<DatasetEntry, StoreError> {
        validate_name(name)?;
        let url = folder.url(name);
        if self.catalog.contains(&url) {
            return Err(StoreError::AlreadyExists(url));
        }

        let mut axis_attrs = Vec::with_capacity(axes.len());
        for &axis in axes {
            let entry = self.entry(axis)?;
            axis_attrs.push(AxisAttrs {
                name: entry.attrs.name.clone(),
                unit: entry.attrs.unit.clone(),
                url: axis.to_string(),
                start: None,
                step: None,
            });
        }

        Ok(DatasetEntry {
            url,
            attrs: DatasetAttrs {
                ds_type: kind,
                name: name.to_string(),
                folder,
                unit: unit.to_string(),
                comment: String::new(),
                axes: axis_attrs,
            },
            state: DatasetState::Declared,
            view: None,
        })
    }

    /// Attach a free-form comment to a dataset.
    pub fn set_comment(&mut self, ds: &impl DatasetRef, comment: &str) -> Result<(), StoreError> {
        self.writable()?;
        let h5 = self.h5(ds.url())?;
        write_comment(&h5, comment)?;
        self.entry_mut(ds.url())?.attrs.comment = comment.to_string();
        self.sync()
    }

    // ---------------------------------------------------------------------
    // Writes
    // ---------------------------------------------------------------------

    /// One-shot write of a whole coordinate or vector.
    ///
    /// Writing again before the file is closed replaces the previous values.
    pub fn add(&mut self, ds: &impl DatasetRef, values: &[f64]) -> Result<(), StoreError> {
        self.writable()?;
        let url = ds.url();
        let entry = self.entry(url)?.clone();
        let kind = entry.attrs.ds_type;
        if !matches!(kind, DatasetKind::Coordinate | DatasetKind::Vector) {
            return Err(wrong_kind(url, "coordinate or vector", kind));
        }

        let mut state = entry.state;
        let first = matches!(state, DatasetState::Declared);
        let layout = state.materialize(url, 0, 0)?;
        let h5 = self.h5(url)?;
        write_values(&h5, &[values.len()], values)?;
        layout.rows = values.len();
        self.commit(url, &h5, state, first)
    }

    /// Append one slice: values to a vector, or one row to a matrix or box.
    pub fn append(&mut self, ds: &Dataset, data: &[f64]) -> Result<(), StoreError> {
        self.writable()?;
        let url = ds.url();
        let entry = self.entry(url)?.clone();
        match entry.attrs.ds_type {
            DatasetKind::Vector => self.append_values(&entry, data),
            DatasetKind::Matrix | DatasetKind::Box => self.append_row(&entry, data),
            kind => Err(wrong_kind(url, "vector, matrix or box", kind)),
        }
    }

    /// Append a single value to a vector.
    pub fn append_scalar(&mut self, ds: &Dataset, value: f64) -> Result<(), StoreError> {
        self.writable()?;
        let entry = self.entry(ds.url())?.clone();
        if entry.attrs.ds_type != DatasetKind::Vector {
            return Err(wrong_kind(ds.url(), "vector", entry.attrs.ds_type));
        }
        self.append_values(&entry, &[value])
    }

    fn append_values(&mut self, entry: &DatasetEntry, values: &[f64]) -> Result<(), StoreError> {
        let url = entry.url.as_str();
        let mut state = entry.state;
        let first = matches!(state, DatasetState::Declared);
        let layout = state.materialize(url, 0, 0)?;
        let h5 = self.h5(url)?;
        let end = layout.rows + values.len();
        resize(&h5, &[end])?;
        if !values.is_empty() {
            h5.write_slice(values, layout.rows..end)?;
        }
        layout.rows = end;
        self.commit(url, &h5, state, first)
    }

    fn append_row(&mut self, entry: &DatasetEntry, row: &[f64]) -> Result<(), StoreError> {
        let url = entry.url.as_str();
        if row.is_empty() {
            return Err(StoreError::EmptyRow(url.to_string()));
        }
        let kind = entry.attrs.ds_type;
        let is_box = kind == DatasetKind::Box;
        let slice_rows = if is_box && matches!(entry.state, DatasetState::Declared) {
            self.axis_len(&entry.attrs.axes[1].url)?
        } else {
            0
        };

        let mut state = entry.state;
        let first = matches!(state, DatasetState::Declared);
        let layout = state.materialize(url, row.len(), slice_rows)?;
        if is_box && layout.rows_in_slice >= layout.slice_rows {
            return Err(StoreError::SliceOverflow {
                url: url.to_string(),
                expected: layout.slice_rows,
            });
        }

        let h5 = self.h5(url)?;
        if let RowFit::Widen(width) = check_row(url, layout, row.len(), self.options.on_ragged_append)? {
            widen_rows(&h5, kind, layout, width)?;
            log::debug!("widened {url} from {} to {width} columns", layout.trace_len);
            layout.trace_len = width;
        }

        let width = layout.trace_len;
        let mut padded = row.to_vec();
        padded.resize(width, f64::NAN);
        if is_box {
            let slice = layout.matrices;
            let r = layout.rows_in_slice;
            if r == 0 {
                // A new slice starts out blank so unfinished rows read as NaN.
                resize(&h5, &[slice + 1, layout.slice_rows, width])?;
                let blank = vec![f64::NAN; width];
                for pending in 1..layout.slice_rows {
                    h5.write_slice(&blank[..], (slice, pending, ..))?;
                }
            }
            h5.write_slice(&padded[..], (slice, r, ..))?;
            layout.rows_in_slice += 1;
        } else {
            resize(&h5, &[layout.rows + 1, width])?;
            h5.write_slice(&padded[..], (layout.rows, ..))?;
        }
        layout.rows += 1;
        self.commit(url, &h5, state, first)
    }

    /// Finish the current slice of a box and start the next one.
    pub fn next_matrix(&mut self, ds: &Dataset) -> Result<(), StoreError> {
        self.writable()?;
        let url = ds.url();
        let h5 = self.h5(url)?;
        let entry = self.entry_mut(url)?;
        if entry.attrs.ds_type != DatasetKind::Box {
            return Err(wrong_kind(url, "box", entry.attrs.ds_type));
        }
        let layout = entry.state.layout_mut(url)?;
        if layout.rows_in_slice != layout.slice_rows {
            return Err(StoreError::IncompleteSlice {
                url: url.to_string(),
                rows: layout.rows_in_slice,
                expected: layout.slice_rows,
            });
        }
        layout.matrices += 1;
        layout.rows_in_slice = 0;
        let state = entry.state;
        write_state(&h5, &state)?;
        self.sync()
    }

    /// Append one line of text.
    pub fn append_text(&mut self, ds: &TextDataset, line: &str) -> Result<(), StoreError> {
        self.writable()?;
        let url = ds.url();
        let entry = self.entry(url)?.clone();
        let mut state = entry.state;
        let first = matches!(state, DatasetState::Declared);
        let layout = state.materialize(url, 0, 0)?;

        let h5 = self.h5(url)?;
        let end = layout.rows + 1;
        resize(&h5, &[end])?;
        h5.write_slice(&[to_text(line)?][..], layout.rows..end)?;
        layout.rows = end;
        self.commit(url, &h5, state, first)
    }

    /// Replace the whole text, stored one element per line.
    pub fn set_text(&mut self, ds: &TextDataset, text: &str) -> Result<(), StoreError> {
        self.writable()?;
        let url = ds.url();
        let entry = self.entry(url)?.clone();
        let mut state = entry.state;
        let first = matches!(state, DatasetState::Declared);
        let layout = state.materialize(url, 0, 0)?;

        let h5 = self.h5(url)?;
        let lines: Vec<String> = text.lines().map(str::to_string).collect();
        write_lines(&h5, &lines)?;
        layout.rows = lines.len();
        self.commit(url, &h5, state, first)
    }

    /// Store the new state and, on first write, the axis start/step attributes.
    fn commit(
        &mut self,
        url: &str,
        h5: &H5Dataset,
        state: DatasetState,
        first: bool,
    ) -> Result<(), StoreError> {
        let axes = if first {
            let mut axes = self.entry(url)?.attrs.axes.clone();
            for axis in &mut axes {
                let (start, step) = self.axis_start_step(&axis.url);
                axis.start = start;
                axis.step = step;
            }
            write_axis_origins(h5, &axes)?;
            Some(axes)
        } else {
            None
        };
        write_state(h5, &state)?;

        let entry = self.entry_mut(url)?;
        entry.state = state;
        if let Some(axes) = axes {
            entry.attrs.axes = axes;
        }
        self.sync()
    }

    fn axis_start_step(&self, url: &str) -> (Option<f64>, Option<f64>) {
        let Ok(values) = self.read_values(url) else {
            return (None, None);
        };
        let finite = |v: Option<&f64>| v.copied().filter(|x| x.is_finite());
        let start = finite(values.first());
        let step = match (start, finite(values.get(1))) {
            (Some(a), Some(b)) => Some(b - a),
            _ => None,
        };
        (start, step)
    }

    fn axis_len(&self, url: &str) -> Result<usize, StoreError> {
        let entry = self.entry(url)?;
        entry
            .state
            .layout()
            .map(|l| l.rows)
            .ok_or_else(|| StoreError::NotMaterialized(url.to_string()))
    }

    /// Push written data to disk.
    fn sync(&self) -> Result<(), StoreError> {
        Ok(self.file.flush()?)
    }

    /// Stamp the modification time and push everything to disk.
    pub fn flush(&mut self) -> Result<(), StoreError> {
        if self.mode == OpenMode::Append {
            self.catalog.touch(&self.file)?;
            self.sync()?;
        }
        Ok(())
    }

    /// Close every dataset and flush the file.
    pub fn close(mut self) -> Result<(), StoreError> {
        self.finish()
    }

    fn finish(&mut self) -> Result<(), StoreError> {
        if self.finished {
            return Ok(());
        }
        self.finished = true;
        if self.mode == OpenMode::Read {
            return Ok(());
        }
        for entry in &mut self.catalog.datasets {
            if matches!(entry.state, DatasetState::Materialized(_)) {
                entry.state.close();
                write_state(&self.file.dataset(&entry.url)?, &entry.state)?;
            }
        }
        self.flush()
    }

    // ---------------------------------------------------------------------
    // Reads
    // ---------------------------------------------------------------------

    /// Resolve a name to a dataset URL.
    ///
    /// Accepts full URLs (`/entry/data0/amplitude`), dotted names
    /// (`data.amplitude`, `analysis.fit_Qc`), and bare names, which are looked
    /// up in `data`, `analysis`, then `views`.
    pub fn resolve(&self, name: &str) -> Result<String, StoreError> {
        if name.starts_with("/entry/") {
            return self
                .catalog
                .find(name)
                .map(|e| e.url.clone())
                .ok_or_else(|| StoreError::UnknownDataset(name.to_string()));
        }
        if let Some((prefix, rest)) = name.split_once('.') {
            if let Some(folder) = Folder::from_alias(prefix) {
                let url = folder.url(rest);
                return if self.catalog.contains(&url) {
                    Ok(url)
                } else {
                    Err(StoreError::UnknownDataset(name.to_string()))
                };
            }
        }
        Folder::ALL
            .into_iter()
            .map(|f| f.url(name))
            .find(|url| self.catalog.contains(url))
            .ok_or_else(|| StoreError::UnknownDataset(name.to_string()))
    }

    pub fn contains(&self, name: &str) -> bool {
        self.resolve(name).is_ok()
    }

    pub fn info(&self, name: &str) -> Result<DatasetInfo, StoreError> {
        let url = self.resolve(name)?;
        Ok(self.entry(&url)?.info())
    }

    /// All datasets except views, in declaration order.
    pub fn datasets(&self) -> Vec<DatasetInfo> {
        self.catalog
            .datasets
            .iter()
            .filter(|e| e.attrs.ds_type != DatasetKind::View)
            .map(DatasetEntry::info)
            .collect()
    }

    pub fn views(&self) -> Vec<ViewInfo> {
        self.catalog
            .datasets
            .iter()
            .filter_map(|e| {
                e.view.as_ref().map(|spec| ViewInfo {
                    url: e.url.clone(),
                    name: e.attrs.name.clone(),
                    spec: spec.clone(),
                })
            })
            .collect()
    }

    pub fn coordinate(&self, name: &str) -> Result<Coordinate, StoreError> {
        let url = self.handle(name, &[DatasetKind::Coordinate], "coordinate")?;
        Ok(Coordinate { url })
    }

    pub fn dataset(&self, name: &str) -> Result<Dataset, StoreError> {
        let url = self.handle(
            name,
            &[DatasetKind::Vector, DatasetKind::Matrix, DatasetKind::Box],
            "vector, matrix or box",
        )?;
        Ok(Dataset { url })
    }

    pub fn text(&self, name: &str) -> Result<TextDataset, StoreError> {
        let url = self.handle(name, &[DatasetKind::Text], "text")?;
        Ok(TextDataset { url })
    }

    pub fn view(&self, name: &str) -> Result<View, StoreError> {
        let url = self.handle(name, &[DatasetKind::View], "view")?;
        Ok(View { url })
    }

    fn handle(&self, name: &str, kinds: &[DatasetKind], expected: &str) -> Result<String, StoreError> {
        let url = self.resolve(name)?;
        let kind = self.entry(&url)?.attrs.ds_type;
        if kinds.contains(&kind) {
            Ok(url)
        } else {
            Err(wrong_kind(&url, expected, kind))
        }
    }

    /// Read a numeric dataset.
    ///
    /// Shapes: `[n]` for coordinates and vectors, `[rows, trace_len]` for
    /// matrices, `[slices, slice_rows, trace_len]` for boxes. An unfinished
    /// last slice of a box is padded with NaN.
    pub fn read(&self, name: &str) -> Result<ArrayD<f64>, StoreError> {
        let url = self.resolve(name)?;
        let info = self.entry(&url)?.info();
        let kind = info.kind();
        if matches!(kind, DatasetKind::Text | DatasetKind::View) {
            return Err(wrong_kind(&url, "numeric dataset", kind));
        }
        let shape = info.shape();
        let values = self.padded_values(&url, &shape)?;
        ArrayD::from_shape_vec(IxDyn(&shape), values).map_err(|_| StoreError::Corrupt(url))
    }

    /// Convenience for 1D datasets.
    pub fn read_vec(&self, name: &str) -> Result<Vec<f64>, StoreError> {
        let url = self.resolve(name)?;
        let kind = self.entry(&url)?.attrs.ds_type;
        if !matches!(kind, DatasetKind::Coordinate | DatasetKind::Vector) {
            return Err(wrong_kind(&url, "coordinate or vector", kind));
        }
        self.read_values(&url)
    }

    /// The text, one `\n`-terminated line per stored element.
    pub fn read_text(&self, name: &str) -> Result<String, StoreError> {
        let url = self.resolve(name)?;
        Ok(self
            .read_lines(&url)?
            .into_iter()
            .map(|line| line + "\n")
            .collect())
    }

    fn read_lines(&self, url: &str) -> Result<Vec<String>, StoreError> {
        let entry = self.entry(url)?;
        if entry.attrs.ds_type != DatasetKind::Text {
            return Err(wrong_kind(url, "text", entry.attrs.ds_type));
        }
        let rows = entry
            .state
            .layout()
            .map(|l| l.rows)
            .ok_or_else(|| StoreError::NotMaterialized(url.to_string()))?;
        let stored = self.h5(url)?.read_raw::<VarLenUnicode>()?;
        if stored.len() < rows {
            return Err(StoreError::Corrupt(url.to_string()));
        }
        Ok(stored[..rows].iter().map(|s| s.as_str().to_string()).collect())
    }

    /// Values as recorded in the layout, without padding.
    ///
    /// Rows past the layout, left by an interrupted append, are ignored.
    fn read_values(&self, url: &str) -> Result<Vec<f64>, StoreError> {
        let entry = self.entry(url)?;
        let layout = entry
            .state
            .layout()
            .ok_or_else(|| StoreError::NotMaterialized(url.to_string()))?;
        let count = layout.values();
        if count == 0 {
            return Ok(Vec::new());
        }
        let h5 = self.h5(url)?;
        if layout.trace_len > 0 && h5.shape().last() != Some(&layout.trace_len) {
            return Err(StoreError::Corrupt(url.to_string()));
        }
        let mut values = h5.read_raw::<f64>()?;
        if values.len() < count {
            return Err(StoreError::Corrupt(url.to_string()));
        }
        values.truncate(count);
        Ok(values)
    }

    fn padded_values(&self, url: &str, shape: &[usize]) -> Result<Vec<f64>, StoreError> {
        let mut values = self.read_values(url)?;
        values.resize(shape.iter().product(), f64::NAN);
        Ok(values)
    }

    pub(crate) fn payload(&self, entry: &DatasetEntry) -> Result<Payload, StoreError> {
        match (entry.attrs.ds_type, entry.state.layout()) {
            (_, None) | (DatasetKind::View, _) => Ok(Payload::None),
            (DatasetKind::Text, Some(_)) => Ok(Payload::Text(self.read_lines(&entry.url)?)),
            _ => Ok(Payload::Values(
                self.padded_values(&entry.url, &entry.info().shape())?,
            )),
        }
    }

    /// Insert a complete entry with its payload, as produced by another file.
    pub(crate) fn import(&mut self, entry: DatasetEntry, payload: Payload) -> Result<(), StoreError> {
        self.writable()?;
        if self.catalog.contains(&entry.url) {
            return Err(StoreError::AlreadyExists(entry.url));
        }
        self.insert(entry, payload)
    }

    /// Create the HDF5 dataset of `entry`, write its payload and schema, and
    /// add it to the catalog.
    fn insert(&mut self, entry: DatasetEntry, payload: Payload) -> Result<(), StoreError> {
        let h5 = self.create_h5(&entry.attrs)?;
        match payload {
            Payload::None => {}
            Payload::Values(values) => write_values(&h5, &entry.info().shape(), &values)?,
            Payload::Text(lines) => write_lines(&h5, &lines)?,
        }
        if let Some(view) = &entry.view {
            write_overlays(&h5, &view.overlays)?;
        }
        write_entry_attrs(&h5, &entry, self.catalog.datasets.len())?;
        self.catalog.datasets.push(entry);
        self.sync()
    }

    // ---------------------------------------------------------------------
    // Helpers
    // ---------------------------------------------------------------------

    fn writable(&self) -> Result<(), StoreError> {
        match self.mode {
            OpenMode::Append => Ok(()),
            OpenMode::Read => Err(StoreError::ReadOnly),
        }
    }

    fn entry(&self, url: &str) -> Result<&DatasetEntry, StoreError> {
        self.catalog
            .find(url)
            .ok_or_else(|| StoreError::UnknownDataset(url.to_string()))
    }

    fn entry_mut(&mut self, url: &str) -> Result<&mut DatasetEntry, StoreError> {
        self.catalog
            .find_mut(url)
            .ok_or_else(|| StoreError::UnknownDataset(url.to_string()))
    }

    fn h5(&self, url: &str) -> Result<H5Dataset, StoreError> {
        Ok(self.file.dataset(url)?)
    }

    /// Create an empty, resizable dataset shaped for `attrs.ds_type`.
    fn create_h5(&self, attrs: &DatasetAttrs) -> Result<H5Dataset, StoreError> {
        let group = self.file.group(&format!("entry/{}", attrs.folder.dir_name()))?;
        let name = attrs.name.as_str();
        let ds = match attrs.ds_type {
            DatasetKind::Coordinate | DatasetKind::Vector => group
                .new_dataset::<f64>()
                .chunk(VALUE_CHUNK)
                .shape(0..)
                .create(name)?,
            DatasetKind::Matrix => group
                .new_dataset::<f64>()
                .chunk((1, ROW_CHUNK))
                .shape((0.., 0..))
                .create(name)?,
            DatasetKind::Box => group
                .new_dataset::<f64>()
                .chunk((1, 1, ROW_CHUNK))
                .shape((0.., 0.., 0..))
                .create(name)?,
            DatasetKind::Text => group
                .new_dataset::<VarLenUnicode>()
                .chunk(TEXT_CHUNK)
                .shape(0..)
                .create(name)?,
            DatasetKind::View => group
                .new_dataset::<VarLenUnicode>()
                .chunk((VIEW_CHUNK, 2))
                .shape((0.., 0..))
                .create(name)?,
        };
        Ok(ds)
    }
}

impl Drop for ScanFile {
    fn drop(&mut self) {
        if let Err(err) = self.finish() {
            log::warn!("closing scan file {} failed: {err}", self.path.display());
        }
    }
}

fn validate_name(name: &str) -> Result<(), StoreError> {
    let ok = !name.is_empty()
        && name
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '_' || c == '-');
    if ok {
        Ok(())
    } else {
        Err(StoreError::InvalidName(name.to_string()))
    }
}

fn wrong_kind(url: &str, expected: &str, found: DatasetKind) -> StoreError {
    StoreError::WrongKind {
        url: url.to_string(),
        expected: expected.to_string(),
        found: found.to_string(),
    }
}

fn resize(h5: &H5Dataset, shape: &[usize]) -> Result<(), StoreError> {
    match *shape {
        [n] => h5.resize(n)?,
        [rows, cols] => h5.resize((rows, cols))?,
        [slices, rows, cols] => h5.resize((slices, rows, cols))?,
        _ => return Err(StoreError::Corrupt(h5.name())),
    }
    Ok(())
}

/// Resize to `shape` and replace the whole content with `values`.
fn write_values(h5: &H5Dataset, shape: &[usize], values: &[f64]) -> Result<(), StoreError> {
    if values.len() != shape.iter().product::<usize>() {
        return Err(StoreError::Corrupt(h5.name()));
    }
    resize(h5, shape)?;
    if !values.is_empty() {
        h5.write_raw(values)?;
    }
    Ok(())
}

fn write_lines(h5: &H5Dataset, lines: &[String]) -> Result<(), StoreError> {
    let text = lines
        .iter()
        .map(|l| to_text(l))
        .collect::<Result<Vec<_>, _>>()?;
    resize(h5, &[text.len()])?;
    if !text.is_empty() {
        h5.write_raw(&text)?;
    }
    Ok(())
}

fn write_overlays(h5: &H5Dataset, overlays: &[ViewOverlay]) -> Result<(), StoreError> {
    resize(h5, &[overlays.len(), 2])?;
    for (row, overlay) in overlays.iter().enumerate() {
        let pair = [to_text(&overlay.x)?, to_text(&overlay.y)?];
        h5.write_slice(&pair[..], (row, ..))?;
    }
    Ok(())
}

/// Rewrite every stored row padded with NaN to `width` columns.
fn widen_rows(h5: &H5Dataset, kind: DatasetKind, layout: &Layout, width: usize) -> Result<(), StoreError> {
    let shape = layout.shape(kind);
    let mut wide_shape = shape.clone();
    if let Some(last) = wide_shape.last_mut() {
        *last = width;
    }
    let count: usize = shape.iter().product();
    if count == 0 {
        return resize(h5, &wide_shape);
    }

    let old = h5.read_raw::<f64>()?;
    if old.len() < count {
        return Err(StoreError::Corrupt(h5.name()));
    }
    let mut wide = Vec::with_capacity(wide_shape.iter().product());
    for row in old[..count].chunks(layout.trace_len) {
        wide.extend_from_slice(row);
        wide.extend(std::iter::repeat_n(f64::NAN, width - layout.trace_len));
    }
    write_values(h5, &wide_shape, &wide)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn scratch() -> (tempfile::TempDir, PathBuf) {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("scan.h5");
        (dir, path)
    }

    #[test]
    fn box_round_trip_with_next_matrix() {
        let (_dir, path) = scratch();
        let (nx, ny, nz) = (3, 4, 5);
        let value = |i: usize, j: usize, k: usize| (i * 100 + j * 10 + k) as f64 + 0.25;

        let mut file = ScanFile::create(&path, StoreOptions::default()).unwrap();
        let x = file.add_coordinate("flux", "Phi0", Folder::Data).unwrap();
        let y = file.add_coordinate("power", "dBm", Folder::Data).unwrap();
        let z = file.add_coordinate("frequency", "Hz", Folder::Data).unwrap();
        file.add(&x, &(0..nx).map(|i| i as f64).collect::<Vec<_>>()).unwrap();
        file.add(&y, &(0..ny).map(|j| -10.0 - j as f64).collect::<Vec<_>>()).unwrap();
        file.add(&z, &(0..nz).map(|k| 5e9 + k as f64 * 1e6).collect::<Vec<_>>()).unwrap();

        let cube = file.add_value_box("amplitude", &x, &y, &z, "V", Folder::Data).unwrap();
        for i in 0..nx {
            for j in 0..ny {
                let row: Vec<f64> = (0..nz).map(|k| value(i, j, k)).collect();
                file.append(&cube, &row).unwrap();
            }
            file.next_matrix(&cube).unwrap();
        }
        file.close().unwrap();

        let file = ScanFile::open(&path, OpenMode::Read, StoreOptions::default()).unwrap();
        let data = file.read("data.amplitude").unwrap();
        assert_eq!(data.shape(), &[nx, ny, nz]);
        for i in 0..nx {
            for j in 0..ny {
                for k in 0..nz {
                    assert_eq!(data[[i, j, k]], value(i, j, k));
                }
            }
        }

        let info = file.info("amplitude").unwrap();
        assert_eq!(info.fill(), vec![nx, 0]);
        assert_eq!(info.attrs.axes[2].name, "frequency");
        assert_eq!(info.attrs.axes[2].start, Some(5e9));
        assert_eq!(info.attrs.axes[2].step, Some(1e6));
        assert!(info.state.is_closed());
    }

    #[test]
    fn closed_dataset_refuses_appends_after_reopen() {
        let (_dir, path) = scratch();
        let mut file = ScanFile::create(&path, StoreOptions::default()).unwrap();
        let f = file.add_coordinate("frequency", "Hz", Folder::Data).unwrap();
        file.add(&f, &[1.0, 2.0, 3.0]).unwrap();
        let m = file.add_value_matrix("amplitude", &f, &f, "V", Folder::Data).unwrap();
        file.append(&m, &[1.0, 2.0, 3.0]).unwrap();
        drop(file);

        let mut file = ScanFile::open(&path, OpenMode::Append, StoreOptions::default()).unwrap();
        let m = file.dataset("amplitude").unwrap();
        assert!(matches!(file.append(&m, &[4.0, 5.0, 6.0]), Err(StoreError::Closed(_))));
        assert_eq!(file.read("amplitude").unwrap().shape(), &[1, 3]);
    }

    #[test]
    fn read_only_file_rejects_writes() {
        let (_dir, path) = scratch();
        ScanFile::create(&path, StoreOptions::default()).unwrap().close().unwrap();
        let mut file = ScanFile::open(&path, OpenMode::Read, StoreOptions::default()).unwrap();
        assert!(matches!(
            file.add_coordinate("x", "", Folder::Data),
            Err(StoreError::ReadOnly)
        ));
    }

    #[test]
    fn ragged_rows_are_rejected_by_default() {
        let (_dir, path) = scratch();
        let mut file = ScanFile::create(&path, StoreOptions::default()).unwrap();
        let x = file.add_coordinate("x", "", Folder::Data).unwrap();
        let m = file.add_value_matrix("m", &x, &x, "", Folder::Data).unwrap();
        file.append(&m, &[1.0, 2.0, 3.0]).unwrap();
        assert!(matches!(
            file.append(&m, &[1.0, 2.0]),
            Err(StoreError::RaggedAppend { expected: 3, found: 2, .. })
        ));
        assert_eq!(file.info("m").unwrap().fill(), vec![1]);
    }

    #[test]
    fn pad_policy_pads_and_widens() {
        let (_dir, path) = scratch();
        let options = StoreOptions {
            on_ragged_append: RaggedPolicy::Pad,
        };
        let mut file = ScanFile::create(&path, options).unwrap();
        let x = file.add_coordinate("x", "", Folder::Data).unwrap();
        let m = file.add_value_matrix("m", &x, &x, "", Folder::Data).unwrap();
        file.append(&m, &[1.0, 2.0, 3.0]).unwrap();
        file.append(&m, &[4.0]).unwrap();
        file.append(&m, &[5.0, 6.0, 7.0, 8.0]).unwrap();

        let data = file.read("m").unwrap();
        assert_eq!(data.shape(), &[3, 4]);
        assert_eq!(data[[0, 2]], 3.0);
        assert!(data[[0, 3]].is_nan());
        assert_eq!(data[[1, 0]], 4.0);
        assert!(data[[1, 1]].is_nan());
        assert_eq!(data[[2, 3]], 8.0);
    }

    #[test]
    fn next_matrix_checks_slice_completeness() {
        let (_dir, path) = scratch();
        let mut file = ScanFile::create(&path, StoreOptions::default()).unwrap();
        let x = file.add_coordinate("x", "", Folder::Data).unwrap();
        let y = file.add_coordinate("y", "", Folder::Data).unwrap();
        file.add(&x, &[0.0, 1.0]).unwrap();
        file.add(&y, &[0.0, 1.0]).unwrap();
        let b = file.add_value_box("b", &x, &y, &x, "", Folder::Data).unwrap();
        let v = file.add_value_vector("v", &x, "", Folder::Data).unwrap();

        file.append(&b, &[1.0, 2.0]).unwrap();
        assert!(matches!(
            file.next_matrix(&b),
            Err(StoreError::IncompleteSlice { rows: 1, expected: 2, .. })
        ));
        file.append(&b, &[3.0, 4.0]).unwrap();
        assert!(matches!(file.append(&b, &[5.0, 6.0]), Err(StoreError::SliceOverflow { .. })));
        file.next_matrix(&b).unwrap();
        file.append(&b, &[5.0, 6.0]).unwrap();

        assert!(matches!(file.next_matrix(&v), Err(StoreError::WrongKind { .. })));

        // Unfinished second slice reads back padded.
        let data = file.read("b").unwrap();
        assert_eq!(data.shape(), &[2, 2, 2]);
        assert_eq!(data[[1, 0, 1]], 6.0);
        assert!(data[[1, 1, 0]].is_nan());
        assert_eq!(file.info("b").unwrap().fill(), vec![1, 1]);
    }

    #[test]
    fn vectors_take_scalars_and_add_rejects_matrices() {
        let (_dir, path) = scratch();
        let mut file = ScanFile::create(&path, StoreOptions::default()).unwrap();
        let x = file.add_coordinate("x", "s", Folder::Data).unwrap();
        let v = file.add_value_vector("v", &x, "V", Folder::Analysis).unwrap();
        let m = file.add_value_matrix("m", &x, &x, "V", Folder::Data).unwrap();
        file.append_scalar(&v, 1.5).unwrap();
        file.append(&v, &[2.5, 3.5]).unwrap();
        assert_eq!(file.read_vec("analysis.v").unwrap(), vec![1.5, 2.5, 3.5]);
        assert!(matches!(file.add(&m, &[1.0]), Err(StoreError::WrongKind { .. })));
        assert!(matches!(file.append_scalar(&m, 1.0), Err(StoreError::WrongKind { .. })));
    }

    #[test]
    fn declared_dataset_has_no_data_yet() {
        let (_dir, path) = scratch();
        let mut file = ScanFile::create(&path, StoreOptions::default()).unwrap();
        let x = file.add_coordinate("x", "", Folder::Data).unwrap();
        assert!(matches!(file.read("x"), Err(StoreError::NotMaterialized(_))));
        assert!(file.info("x").unwrap().fill().is_empty());
        assert!(matches!(
            file.add_coordinate("x", "", Folder::Data),
            Err(StoreError::AlreadyExists(_))
        ));
        assert!(matches!(
            file.add_coordinate("bad.name", "", Folder::Data),
            Err(StoreError::InvalidName(_))
        ));
        let _ = x;
    }

    #[test]
    fn text_and_views_are_persisted() {
        let (_dir, path) = scratch();
        let mut file = ScanFile::create(&path, StoreOptions::default()).unwrap();
        let f = file.add_coordinate("frequency", "Hz", Folder::Data).unwrap();
        let a = file.add_value_vector("amplitude", &f, "V", Folder::Data).unwrap();
        let b = file.add_value_vector("fit", &f, "V", Folder::Analysis).unwrap();
        let log = file.add_text("log", Folder::Data).unwrap();
        file.append_text(&log, "cooldown 12").unwrap();
        file.append_text(&log, "attenuation 60 dB").unwrap();

        let view = file
            .add_view("amplitude_fit", &f, &a, ViewParams::default())
            .unwrap();
        file.add_view_overlay(&view, &f, &b).unwrap();
        file.close().unwrap();

        let file = ScanFile::open(&path, OpenMode::Read, StoreOptions::default()).unwrap();
        assert_eq!(file.read_text("log").unwrap(), "cooldown 12\nattenuation 60 dB\n");
        let views = file.views();
        assert_eq!(views.len(), 1);
        assert_eq!(views[0].spec.overlays.len(), 2);
        assert_eq!(views[0].spec.overlays[1].y, "/entry/analysis0/fit");
        assert!(file.datasets().iter().all(|d| d.kind() != DatasetKind::View));
    }

    #[test]
    fn rows_past_the_recorded_state_are_ignored() {
        let (_dir, path) = scratch();
        let mut file = ScanFile::create(&path, StoreOptions::default()).unwrap();
        let x = file.add_coordinate("x", "", Folder::Data).unwrap();
        let v = file.add_value_vector("v", &x, "", Folder::Data).unwrap();
        file.append(&v, &[1.0, 2.0]).unwrap();
        drop(file);

        // An append that grew the dataset but never recorded its state.
        {
            let raw = H5File::open_rw(&path).unwrap();
            let ds = raw.dataset("/entry/data0/v").unwrap();
            ds.resize(3).unwrap();
            ds.write_slice(&[9.0][..], 2..3).unwrap();
        }

        let mut file = ScanFile::open(&path, OpenMode::Read, StoreOptions::default()).unwrap();
        assert_eq!(file.read_vec("v").unwrap(), vec![1.0, 2.0]);
        assert!(matches!(file.append_scalar(&v, 3.0), Err(StoreError::ReadOnly)));
    }

    #[test]
    fn datasets_are_resizable_hdf5_with_schema_attributes() {
        let (_dir, path) = scratch();
        let mut file = ScanFile::create(&path, StoreOptions::default()).unwrap();
        let f = file.add_coordinate("frequency", "Hz", Folder::Data).unwrap();
        let p = file.add_coordinate("power", "dBm", Folder::Data).unwrap();
        file.add(&f, &[5e9, 5.001e9, 5.002e9]).unwrap();
        file.add(&p, &[-30.0, -20.0]).unwrap();
        let m = file.add_value_matrix("amplitude", &p, &f, "V", Folder::Data).unwrap();
        file.append(&m, &[0.1, 0.2, 0.3]).unwrap();

        // Visible to any HDF5 reader while the scan is still being written.
        {
            let raw = H5File::open(&path).unwrap();
            let ds = raw.dataset("/entry/data0/amplitude").unwrap();
            assert_eq!(ds.shape(), vec![1, 3]);
            assert!(ds.is_resizable());
            let kind = ds.attr("ds_type").unwrap().read_scalar::<VarLenUnicode>().unwrap();
            assert_eq!(kind.as_str(), "matrix");
            let unit = ds.attr("unit").unwrap().read_scalar::<VarLenUnicode>().unwrap();
            assert_eq!(unit.as_str(), "V");
            let axis = ds.attr("axis1_url").unwrap().read_scalar::<VarLenUnicode>().unwrap();
            assert_eq!(axis.as_str(), "/entry/data0/frequency");
            let start = ds.attr("axis1_start").unwrap().read_scalar::<f64>().unwrap();
            assert_eq!(start, 5e9);
        }

        file.append(&m, &[0.4, 0.5, 0.6]).unwrap();
        file.close().unwrap();

        let raw = H5File::open(&path).unwrap();
        assert_eq!(raw.dataset("/entry/data0/amplitude").unwrap().shape(), vec![2, 3]);
        let file = ScanFile::open(&path, OpenMode::Read, StoreOptions::default()).unwrap();
        assert_eq!(file.read("amplitude").unwrap()[[1, 2]], 0.6);
        assert!(file.modified() >= file.created());
    }

    #[test]
    fn missing_and_existing_paths_are_reported() {
        let (_dir, path) = scratch();
        assert!(matches!(
            ScanFile::open(&path, OpenMode::Read, StoreOptions::default()),
            Err(StoreError::Io { .. })
        ));
        ScanFile::create(&path, StoreOptions::default()).unwrap().close().unwrap();
        assert!(matches!(
            ScanFile::create(&path, StoreOptions::default()),
            Err(StoreError::AlreadyExists(_))
        ));
    }
}
