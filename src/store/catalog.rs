//! In-memory catalog of a scan file's datasets.
//!
//! The HDF5 file is authoritative. Every dataset carries its schema and its
//! lifecycle state as attributes, and the catalog is rebuilt from them when a
//! file is opened:
//!
//! ```text
//! /                       format, version, created, modified
//! /entry/data0/<name>     ds_type, unit, comment, order, state, axis<i>_*
//! /entry/analysis0/<name>
//! /entry/views/<name>     (n, 2) string pairs of x/y URLs, params (JSON)
//! ```

use chrono::{DateTime, Utc};
use hdf5::types::VarLenUnicode;
use hdf5::{Dataset, File, H5Type, Location};

use crate::error::StoreError;
use crate::store::dataset::{
    AxisAttrs, DatasetAttrs, DatasetInfo, DatasetKind, DatasetState, Folder, ViewOverlay,
    ViewParams,
};

pub const FORMAT_NAME: &str = "qfit-scan";
pub const FORMAT_VERSION: u32 = 2;

const ATTR_FORMAT: &str = "format";
const ATTR_VERSION: &str = "version";
const ATTR_CREATED: &str = "created";
const ATTR_MODIFIED: &str = "modified";

const ATTR_TYPE: &str = "ds_type";
const ATTR_UNIT: &str = "unit";
const ATTR_COMMENT: &str = "comment";
const ATTR_ORDER: &str = "order";
const ATTR_STATE: &str = "state";
const ATTR_PARAMS: &str = "params";

#[derive(Debug, Clone, PartialEq)]
pub struct DatasetEntry {
    pub url: String,
    pub attrs: DatasetAttrs,
    pub state: DatasetState,
    /// Present for views only.
    pub view: Option<ViewSpec>,
}

impl DatasetEntry {
    pub fn info(&self) -> DatasetInfo {
        DatasetInfo {
            url: self.url.clone(),
            attrs: self.attrs.clone(),
            state: self.state,
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct ViewSpec {
    pub overlays: Vec<ViewOverlay>,
    pub params: ViewParams,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Catalog {
    pub created: DateTime<Utc>,
    pub modified: DateTime<Utc>,
    /// Datasets in declaration order.
    pub datasets: Vec<DatasetEntry>,
}

impl Catalog {
    /// Stamp a fresh file with the format attributes.
    pub fn init(file: &File) -> Result<Self, StoreError> {
        let now = Utc::now();
        set_str_attr(file, ATTR_FORMAT, FORMAT_NAME)?;
        set_attr(file, ATTR_VERSION, &FORMAT_VERSION)?;
        set_str_attr(file, ATTR_CREATED, &now.to_rfc3339())?;
        set_str_attr(file, ATTR_MODIFIED, &now.to_rfc3339())?;
        let entry = file.create_group("entry")?;
        for folder in Folder::ALL {
            entry.create_group(folder.dir_name())?;
        }
        Ok(Self {
            created: now,
            modified: now,
            datasets: Vec::new(),
        })
    }

    /// Rebuild the catalog from the attributes stored in `file`.
    pub fn load(file: &File) -> Result<Self, StoreError> {
        let format = get_opt_str_attr(file, ATTR_FORMAT)?.unwrap_or_default();
        if format != FORMAT_NAME {
            return Err(StoreError::io(
                file.filename(),
                std::io::Error::new(
                    std::io::ErrorKind::InvalidData,
                    format!("not a scan file (format '{format}')"),
                ),
            ));
        }

        let mut ordered = Vec::new();
        for folder in Folder::ALL {
            let group = file.group(&format!("entry/{}", folder.dir_name()))?;
            for name in group.member_names()? {
                let ds = group.dataset(&name)?;
                ordered.push(read_entry(folder, &name, &ds)?);
            }
        }
        ordered.sort_by_key(|(order, _)| *order);

        Ok(Self {
            created: get_time_attr(file, ATTR_CREATED)?,
            modified: get_time_attr(file, ATTR_MODIFIED)?,
            datasets: ordered.into_iter().map(|(_, entry)| entry).collect(),
        })
    }

    /// Stamp `modified` on the file.
    pub fn touch(&mut self, file: &File) -> Result<(), StoreError> {
        self.modified = Utc::now();
        set_str_attr(file, ATTR_MODIFIED, &self.modified.to_rfc3339())
    }

    pub fn find(&self, url: &str) -> Option<&DatasetEntry> {
        self.datasets.iter().find(|d| d.url == url)
    }

    pub fn find_mut(&mut self, url: &str) -> Option<&mut DatasetEntry> {
        self.datasets.iter_mut().find(|d| d.url == url)
    }

    pub fn contains(&self, url: &str) -> bool {
        self.find(url).is_some()
    }
}

/// Write the schema of `entry` onto its dataset.
pub(crate) fn write_entry_attrs(ds: &Dataset, entry: &DatasetEntry, order: usize) -> Result<(), StoreError> {
    let attrs = &entry.attrs;
    set_str_attr(ds, ATTR_TYPE, attrs.ds_type.as_str())?;
    set_str_attr(ds, ATTR_UNIT, &attrs.unit)?;
    set_str_attr(ds, ATTR_COMMENT, &attrs.comment)?;
    set_attr(ds, ATTR_ORDER, &(order as u64))?;
    for (i, axis) in attrs.axes.iter().enumerate() {
        set_str_attr(ds, &axis_attr(i, "name"), &axis.name)?;
        set_str_attr(ds, &axis_attr(i, "unit"), &axis.unit)?;
        set_str_attr(ds, &axis_attr(i, "url"), &axis.url)?;
    }
    write_axis_origins(ds, &attrs.axes)?;
    if let Some(view) = &entry.view {
        set_str_attr(ds, ATTR_PARAMS, &serde_json::to_string(&view.params)?)?;
    }
    write_state(ds, &entry.state)
}

/// Record the lifecycle state of a dataset.
pub(crate) fn write_state(ds: &Dataset, state: &DatasetState) -> Result<(), StoreError> {
    set_str_attr(ds, ATTR_STATE, &serde_json::to_string(state)?)
}

pub(crate) fn write_comment(ds: &Dataset, comment: &str) -> Result<(), StoreError> {
    set_str_attr(ds, ATTR_COMMENT, comment)
}

/// Axis start/step, known once the dataset is first written.
pub(crate) fn write_axis_origins(ds: &Dataset, axes: &[AxisAttrs]) -> Result<(), StoreError> {
    for (i, axis) in axes.iter().enumerate() {
        if let Some(start) = axis.start {
            set_attr(ds, &axis_attr(i, "start"), &start)?;
        }
        if let Some(step) = axis.step {
            set_attr(ds, &axis_attr(i, "step"), &step)?;
        }
    }
    Ok(())
}

fn read_entry(folder: Folder, name: &str, ds: &Dataset) -> Result<(u64, DatasetEntry), StoreError> {
    let url = folder.url(name);
    let kind = get_str_attr(ds, ATTR_TYPE)?;
    let ds_type = DatasetKind::from_name(&kind).ok_or_else(|| StoreError::Corrupt(url.clone()))?;
    let state: DatasetState = serde_json::from_str(&get_str_attr(ds, ATTR_STATE)?)?;

    let mut axes = Vec::with_capacity(ds_type.axis_count());
    for i in 0..ds_type.axis_count() {
        axes.push(AxisAttrs {
            name: get_str_attr(ds, &axis_attr(i, "name"))?,
            unit: get_str_attr(ds, &axis_attr(i, "unit"))?,
            url: get_str_attr(ds, &axis_attr(i, "url"))?,
            start: get_opt_attr(ds, &axis_attr(i, "start"))?,
            step: get_opt_attr(ds, &axis_attr(i, "step"))?,
        });
    }

    let view = if ds_type == DatasetKind::View {
        let params = match get_opt_str_attr(ds, ATTR_PARAMS)? {
            Some(json) => serde_json::from_str(&json)?,
            None => ViewParams::default(),
        };
        let count = state.layout().map_or(0, |l| l.rows);
        let links = ds.read_raw::<VarLenUnicode>()?;
        let overlays = links
            .chunks_exact(2)
            .take(count)
            .map(|pair| ViewOverlay {
                x: pair[0].as_str().to_string(),
                y: pair[1].as_str().to_string(),
            })
            .collect();
        Some(ViewSpec { overlays, params })
    } else {
        None
    };

    let entry = DatasetEntry {
        url,
        attrs: DatasetAttrs {
            ds_type,
            name: name.to_string(),
            folder,
            unit: get_str_attr(ds, ATTR_UNIT)?,
            comment: get_opt_str_attr(ds, ATTR_COMMENT)?.unwrap_or_default(),
            axes,
        },
        state,
        view,
    };
    Ok((get_attr(ds, ATTR_ORDER)?, entry))
}

fn axis_attr(index: usize, field: &str) -> String {
    format!("axis{index}_{field}")
}

pub(crate) fn to_text(s: &str) -> Result<VarLenUnicode, StoreError> {
    s.parse::<VarLenUnicode>()
        .map_err(|e| StoreError::InvalidText(e.to_string()))
}

/// Create or overwrite a scalar attribute.
fn set_attr<T: H5Type>(loc: &Location, name: &str, value: &T) -> Result<(), StoreError> {
    if loc.attr_names()?.iter().any(|n| n == name) {
        loc.attr(name)?.write_scalar(value)?;
    } else {
        loc.new_attr::<T>().create(name)?.write_scalar(value)?;
    }
    Ok(())
}

fn set_str_attr(loc: &Location, name: &str, value: &str) -> Result<(), StoreError> {
    set_attr(loc, name, &to_text(value)?)
}

fn get_attr<T: H5Type>(loc: &Location, name: &str) -> Result<T, StoreError> {
    Ok(loc.attr(name)?.read_scalar::<T>()?)
}

fn get_opt_attr<T: H5Type>(loc: &Location, name: &str) -> Result<Option<T>, StoreError> {
    if loc.attr_names()?.iter().any(|n| n == name) {
        get_attr(loc, name).map(Some)
    } else {
        Ok(None)
    }
}

fn get_str_attr(loc: &Location, name: &str) -> Result<String, StoreError> {
    Ok(get_attr::<VarLenUnicode>(loc, name)?.as_str().to_string())
}

fn get_opt_str_attr(loc: &Location, name: &str) -> Result<Option<String>, StoreError> {
    Ok(get_opt_attr::<VarLenUnicode>(loc, name)?.map(|s| s.as_str().to_string()))
}

fn get_time_attr(loc: &Location, name: &str) -> Result<DateTime<Utc>, StoreError> {
    let raw = get_str_attr(loc, name)?;
    DateTime::parse_from_rfc3339(&raw)
        .map(|t| t.with_timezone(&Utc))
        .map_err(|_| StoreError::InvalidText(format!("{name} = '{raw}'")))
}
