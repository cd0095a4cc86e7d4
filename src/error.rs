//! Error types.
//!
//! Library code returns one `thiserror` enum per subsystem. The binary maps all
//! of them onto `AppError`, which carries the process exit code.

use std::path::PathBuf;

use thiserror::Error;

/// Errors raised by a single resonator fit.
#[derive(Error, Debug)]
pub enum FitError {
    /// The trace cannot be fitted at all (shape, length, ordering, NaN).
    #[error("Invalid input: {0}")]
    InvalidInput(String),

    /// The data do not define a circle (e.g. all points identical).
    #[error("Degenerate data: {0}")]
    Degenerate(String),

    /// An intermediate result became non-finite.
    #[error("Numerical failure: {0}")]
    Numerical(String),
}

/// Errors raised by the scan-file store.
#[derive(Error, Debug)]
pub enum StoreError {
    #[error("I/O error on '{}': {source}", path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("HDF5 error: {0}")]
    Hdf5(#[from] hdf5::Error),

    #[error("Invalid dataset schema: {0}")]
    Schema(#[from] serde_json::Error),

    #[error("Text not storable as HDF5 string: {0}")]
    InvalidText(String),

    #[error("Dataset not found: {0}")]
    UnknownDataset(String),

    #[error("Dataset already exists: {0}")]
    AlreadyExists(String),

    #[error("Dataset {url} is a {found}, expected {expected}")]
    WrongKind {
        url: String,
        expected: String,
        found: String,
    },

    #[error("Dataset {0} is closed")]
    Closed(String),

    #[error("Scan file is opened read-only")]
    ReadOnly,

    #[error("Ragged append on {url}: trace length is {expected}, got {found}")]
    RaggedAppend {
        url: String,
        expected: usize,
        found: usize,
    },

    #[error("next_matrix on {url} after {rows} rows, slice needs {expected}")]
    IncompleteSlice {
        url: String,
        rows: usize,
        expected: usize,
    },

    #[error("Slice of {url} already holds {expected} rows; call next_matrix first")]
    SliceOverflow { url: String, expected: usize },

    #[error("Dataset {0} holds no data yet")]
    NotMaterialized(String),

    #[error("Invalid dataset name '{0}'")]
    InvalidName(String),

    #[error("Empty row appended to {0}")]
    EmptyRow(String),

    #[error("Payload of {0} does not match its layout")]
    Corrupt(String),

    #[error("Could not find a free name for '{0}'")]
    NameExhausted(String),
}

impl StoreError {
    pub(crate) fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        StoreError::Io {
            path: path.into(),
            source,
        }
    }
}

/// Errors raised by the batch autofit driver.
#[derive(Error, Debug)]
pub enum AutofitError {
    #[error(transparent)]
    Store(#[from] StoreError),

    #[error("Scan already contains fit data ({0}); refusing to overwrite")]
    FitDataExists(String),

    #[error("Scan dimension {0} is not supported (expected 1, 2 or 3)")]
    UnsupportedDimension(usize),

    #[error("Scan is missing dataset '{0}'")]
    MissingDataset(String),

    #[error("Frequency window [{f_min}, {f_max}] holds {points} points, need at least {needed}")]
    EmptyWindow {
        f_min: f64,
        f_max: f64,
        points: usize,
        needed: usize,
    },

    #[error("Shape mismatch: {0}")]
    ShapeMismatch(String),

    #[error("Fit curves need at least one output point")]
    EmptyFitGrid,
}

/// Error surfaced at the binary boundary.
#[derive(Clone)]
pub struct AppError {
    exit_code: u8,
    message: String,
}

impl AppError {
    pub fn new(exit_code: u8, message: impl Into<String>) -> Self {
        Self {
            exit_code,
            message: message.into(),
        }
    }

    pub fn exit_code(&self) -> u8 {
        self.exit_code
    }
}

impl std::fmt::Display for AppError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.message)
    }
}

impl std::fmt::Debug for AppError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AppError")
            .field("exit_code", &self.exit_code)
            .field("message", &self.message)
            .finish()
    }
}

impl std::error::Error for AppError {}

impl From<FitError> for AppError {
    fn from(err: FitError) -> Self {
        let code = match err {
            FitError::InvalidInput(_) => 2,
            FitError::Degenerate(_) | FitError::Numerical(_) => 4,
        };
        AppError::new(code, err.to_string())
    }
}

impl From<StoreError> for AppError {
    fn from(err: StoreError) -> Self {
        let code = match err {
            StoreError::Io { .. }
            | StoreError::Hdf5(_)
            | StoreError::Schema(_)
            | StoreError::Corrupt(_) => 5,
            _ => 2,
        };
        AppError::new(code, err.to_string())
    }
}

impl From<AutofitError> for AppError {
    fn from(err: AutofitError) -> Self {
        match err {
            AutofitError::Store(inner) => inner.into(),
            AutofitError::FitDataExists(_) => AppError::new(3, err.to_string()),
            _ => AppError::new(2, err.to_string()),
        }
    }
}
