//! Dataset kinds, attributes, and the per-dataset lifecycle.
//!
//! A dataset is declared with its name, unit, and axis links, but gets no
//! shape until the first write. That write calls [`DatasetState::materialize`]
//! with the observed trace length, which freezes the schema:
//!
//! ```text
//! Declared ──materialize(trace_len)──▶ Materialized(Layout) ──close──▶ Closed(Layout)
//! ```

use serde::{Deserialize, Serialize};

use crate::domain::RaggedPolicy;
use crate::error::StoreError;

/// Storage kind of a dataset.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DatasetKind {
    /// Independent 1D axis, written once.
    Coordinate,
    /// 1D values along one coordinate.
    Vector,
    /// 2D values, one row (trace) per outer coordinate value.
    Matrix,
    /// 3D values, filled slice by slice with `next_matrix`.
    Box,
    /// Free-form text, one line per append.
    Text,
    /// Pairing of x/y datasets for plotting.
    View,
}

impl DatasetKind {
    pub fn as_str(self) -> &'static str {
        match self {
            DatasetKind::Coordinate => "coordinate",
            DatasetKind::Vector => "vector",
            DatasetKind::Matrix => "matrix",
            DatasetKind::Box => "box",
            DatasetKind::Text => "text",
            DatasetKind::View => "view",
        }
    }

    /// Number of axes a numeric dataset of this kind links to.
    pub fn axis_count(self) -> usize {
        match self {
            DatasetKind::Coordinate | DatasetKind::Text | DatasetKind::View => 0,
            DatasetKind::Vector => 1,
            DatasetKind::Matrix => 2,
            DatasetKind::Box => 3,
        }
    }

    pub fn from_name(s: &str) -> Option<DatasetKind> {
        [
            DatasetKind::Coordinate,
            DatasetKind::Vector,
            DatasetKind::Matrix,
            DatasetKind::Box,
            DatasetKind::Text,
            DatasetKind::View,
        ]
        .into_iter()
        .find(|k| k.as_str() == s)
    }

    /// Whether data arrive as rows of a frozen trace length.
    pub fn is_row_based(self) -> bool {
        matches!(self, DatasetKind::Matrix | DatasetKind::Box)
    }
}

impl std::fmt::Display for DatasetKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Top-level group a dataset lives in.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Folder {
    /// Acquired data (`/entry/data0`).
    Data,
    /// Derived data such as fits (`/entry/analysis0`).
    Analysis,
    /// Plot views (`/entry/views`).
    Views,
}

impl Folder {
    pub const ALL: [Folder; 3] = [Folder::Data, Folder::Analysis, Folder::Views];

    pub fn dir_name(self) -> &'static str {
        match self {
            Folder::Data => "data0",
            Folder::Analysis => "analysis0",
            Folder::Views => "views",
        }
    }

    /// Prefix used in dotted names, e.g. `data.amplitude`.
    pub fn alias(self) -> &'static str {
        match self {
            Folder::Data => "data",
            Folder::Analysis => "analysis",
            Folder::Views => "views",
        }
    }

    pub fn from_alias(s: &str) -> Option<Folder> {
        Folder::ALL
            .into_iter()
            .find(|f| f.alias() == s || f.dir_name() == s)
    }

    pub fn url(self, name: &str) -> String {
        format!("/entry/{}/{}", self.dir_name(), name)
    }
}

/// Link from a dependent dataset to one of its axes.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AxisAttrs {
    pub name: String,
    pub unit: String,
    pub url: String,
    /// First coordinate value, when the axis held data at materialization.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub start: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub step: Option<f64>,
}

/// Schema attributes, frozen at materialization.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DatasetAttrs {
    pub ds_type: DatasetKind,
    pub name: String,
    pub folder: Folder,
    pub unit: String,
    #[serde(default)]
    pub comment: String,
    #[serde(default)]
    pub axes: Vec<AxisAttrs>,
}

/// Shape bookkeeping of a materialized dataset.
///
/// Counts are in written rows; for boxes, slice `s` row `r` is the
/// `s·slice_rows + r`-th row written.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Layout {
    /// Length of one row; `0` for coordinates, vectors, and text.
    pub trace_len: usize,
    /// Total rows written (values for coordinates/vectors, lines for text).
    pub rows: usize,
    /// Rows per slice of a box; `0` for other kinds.
    #[serde(default)]
    pub slice_rows: usize,
    /// Completed slices of a box.
    #[serde(default)]
    pub matrices: usize,
    /// Rows written into the current slice of a box.
    #[serde(default)]
    pub rows_in_slice: usize,
}

impl Layout {
    /// Number of `f64` values in the payload.
    pub fn values(&self) -> usize {
        if self.trace_len == 0 {
            self.rows
        } else {
            self.rows * self.trace_len
        }
    }

    /// Stored array shape of a dataset of `kind` with this layout.
    pub fn shape(&self, kind: DatasetKind) -> Vec<usize> {
        match kind {
            DatasetKind::Coordinate | DatasetKind::Vector | DatasetKind::Text | DatasetKind::View => {
                vec![self.rows]
            }
            DatasetKind::Matrix => vec![self.rows, self.trace_len],
            DatasetKind::Box => {
                let slices = self.matrices + usize::from(self.rows_in_slice > 0);
                vec![slices, self.slice_rows, self.trace_len]
            }
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "state", content = "layout", rename_all = "lowercase")]
pub enum DatasetState {
    Declared,
    Materialized(Layout),
    Closed(Layout),
}

impl DatasetState {
    /// Freeze the schema on first write.
    pub fn materialize(
        &mut self,
        url: &str,
        trace_len: usize,
        slice_rows: usize,
    ) -> Result<&mut Layout, StoreError> {
        if let DatasetState::Declared = self {
            *self = DatasetState::Materialized(Layout {
                trace_len,
                slice_rows,
                ..Layout::default()
            });
        }
        self.layout_mut(url)
    }

    pub fn layout(&self) -> Option<&Layout> {
        match self {
            DatasetState::Declared => None,
            DatasetState::Materialized(l) | DatasetState::Closed(l) => Some(l),
        }
    }

    /// Writable layout; fails for declared or closed datasets.
    pub(crate) fn layout_mut(&mut self, url: &str) -> Result<&mut Layout, StoreError> {
        match self {
            DatasetState::Materialized(l) => Ok(l),
            DatasetState::Declared => Err(StoreError::NotMaterialized(url.to_string())),
            DatasetState::Closed(_) => Err(StoreError::Closed(url.to_string())),
        }
    }

    pub fn is_closed(&self) -> bool {
        matches!(self, DatasetState::Closed(_))
    }

    pub fn close(&mut self) {
        if let DatasetState::Materialized(l) = *self {
            *self = DatasetState::Closed(l);
        }
    }
}

/// How a new row fits the frozen trace length.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum RowFit {
    /// Same length, or padded with NaN.
    Fits,
    /// Longer than the trace; earlier rows must be widened to the new length.
    Widen(usize),
}

/// Check a row of length `found` against `layout` under `policy`.
pub(crate) fn check_row(
    url: &str,
    layout: &Layout,
    found: usize,
    policy: RaggedPolicy,
) -> Result<RowFit, StoreError> {
    if found == layout.trace_len {
        return Ok(RowFit::Fits);
    }
    match policy {
        RaggedPolicy::Reject => Err(StoreError::RaggedAppend {
            url: url.to_string(),
            expected: layout.trace_len,
            found,
        }),
        RaggedPolicy::Pad if found < layout.trace_len => Ok(RowFit::Fits),
        RaggedPolicy::Pad => Ok(RowFit::Widen(found)),
    }
}

/// Plot rendering hints stored with a view.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ViewParams {
    #[serde(default)]
    pub labels: Vec<String>,
    /// Plot style per overlay, e.g. `"points"` or `"lines"`.
    #[serde(default)]
    pub styles: Vec<String>,
}

/// One x/y pair of a view.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ViewOverlay {
    pub x: String,
    pub y: String,
}

/// Anything addressable by URL inside a scan file.
pub trait DatasetRef {
    fn url(&self) -> &str;
}

macro_rules! handle {
    ($(#[$doc:meta])* $name:ident) => {
        $(#[$doc])*
        #[derive(Debug, Clone, PartialEq, Eq)]
        pub struct $name {
            pub(crate) url: String,
        }

        impl DatasetRef for $name {
            fn url(&self) -> &str {
                &self.url
            }
        }
    };
}

handle!(
    /// Handle to a coordinate dataset.
    Coordinate
);
handle!(
    /// Handle to a vector, matrix, or box dataset.
    Dataset
);
handle!(
    /// Handle to a text dataset.
    TextDataset
);
handle!(
    /// Handle to a view.
    View
);

impl<T: DatasetRef + ?Sized> DatasetRef for &T {
    fn url(&self) -> &str {
        (**self).url()
    }
}

/// Snapshot of one dataset's schema and progress.
#[derive(Debug, Clone, PartialEq)]
pub struct DatasetInfo {
    pub url: String,
    pub attrs: DatasetAttrs,
    pub state: DatasetState,
}

impl DatasetInfo {
    pub fn kind(&self) -> DatasetKind {
        self.attrs.ds_type
    }

    pub fn layout(&self) -> Option<&Layout> {
        self.state.layout()
    }

    /// Written entries per outer axis.
    ///
    /// `[values]` for coordinates and vectors, `[rows]` for matrices,
    /// `[completed slices, rows in current slice]` for boxes, `[lines]` for
    /// text, `[overlays]` for views. Empty before materialization.
    pub fn fill(&self) -> Vec<usize> {
        let Some(l) = self.layout() else {
            return Vec::new();
        };
        match self.kind() {
            DatasetKind::Box => vec![l.matrices, l.rows_in_slice],
            _ => vec![l.rows],
        }
    }

    /// Shape of the array returned by `ScanFile::read`.
    pub fn shape(&self) -> Vec<usize> {
        self.layout()
            .map(|l| l.shape(self.kind()))
            .unwrap_or_default()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn materialize_freezes_first_shape() {
        let mut state = DatasetState::Declared;
        state.materialize("u", 7, 0).unwrap().rows += 1;
        // A second call keeps the frozen trace length.
        let layout = state.materialize("u", 3, 0).unwrap();
        assert_eq!(layout.trace_len, 7);
        assert_eq!(layout.rows, 1);

        state.close();
        assert!(state.is_closed());
        assert!(matches!(state.materialize("u", 7, 0), Err(StoreError::Closed(_))));
    }

    #[test]
    fn ragged_rows_follow_policy() {
        let layout = Layout {
            trace_len: 4,
            ..Layout::default()
        };
        assert_eq!(check_row("u", &layout, 4, RaggedPolicy::Reject).unwrap(), RowFit::Fits);
        assert!(matches!(
            check_row("u", &layout, 3, RaggedPolicy::Reject),
            Err(StoreError::RaggedAppend { expected: 4, found: 3, .. })
        ));
        assert_eq!(check_row("u", &layout, 3, RaggedPolicy::Pad).unwrap(), RowFit::Fits);
        assert_eq!(check_row("u", &layout, 6, RaggedPolicy::Pad).unwrap(), RowFit::Widen(6));
    }

    #[test]
    fn box_fill_and_shape_count_partial_slice() {
        let info = DatasetInfo {
            url: Folder::Data.url("cube"),
            attrs: DatasetAttrs {
                ds_type: DatasetKind::Box,
                name: "cube".into(),
                folder: Folder::Data,
                unit: String::new(),
                comment: String::new(),
                axes: Vec::new(),
            },
            state: DatasetState::Materialized(Layout {
                trace_len: 5,
                rows: 7,
                slice_rows: 3,
                matrices: 2,
                rows_in_slice: 1,
            }),
        };
        assert_eq!(info.fill(), vec![2, 1]);
        assert_eq!(info.shape(), vec![3, 3, 5]);
    }

    #[test]
    fn state_survives_attribute_encoding() {
        let state = DatasetState::Closed(Layout {
            trace_len: 3,
            rows: 2,
            ..Layout::default()
        });
        let json = serde_json::to_string(&state).unwrap();
        assert!(json.contains(r#""state":"closed""#));
        let back: DatasetState = serde_json::from_str(&json).unwrap();
        assert_eq!(back, state);
    }

    #[test]
    fn kind_names_parse_back() {
        for kind in [DatasetKind::Coordinate, DatasetKind::Box, DatasetKind::View] {
            assert_eq!(DatasetKind::from_name(kind.as_str()), Some(kind));
        }
        assert_eq!(DatasetKind::from_name("cube"), None);
    }
}
