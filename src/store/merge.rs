//! Merge several scan files into a new one.
//!
//! Every dataset and view of every source is copied in order. Names that are
//! already taken in the target get a counter suffix (`amplitude_1`, ...), and
//! axis links and view overlays are rewritten to the renamed URLs.

use std::collections::HashMap;
use std::path::{Path, PathBuf};

use crate::error::StoreError;
use crate::store::file::{OpenMode, ScanFile, StoreOptions};

/// Upper bound on suffixes tried for one name.
pub const MAX_RENAME_ATTEMPTS: usize = 1000;

/// Hands out `base`, `base_1`, `base_2`, ... until one is free.
#[derive(Debug, Clone, Copy)]
pub struct NameAllocator {
    max_attempts: usize,
}

impl NameAllocator {
    pub fn new(max_attempts: usize) -> Self {
        Self { max_attempts }
    }

    pub fn allocate(&self, base: &str, taken: impl Fn(&str) -> bool) -> Result<String, StoreError> {
        if !taken(base) {
            return Ok(base.to_string());
        }
        (1..self.max_attempts)
            .map(|i| format!("{base}_{i}"))
            .find(|candidate| !taken(candidate))
            .ok_or_else(|| StoreError::NameExhausted(base.to_string()))
    }
}

impl Default for NameAllocator {
    fn default() -> Self {
        Self::new(MAX_RENAME_ATTEMPTS)
    }
}

/// What happened to one copied dataset.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MergedDataset {
    pub source: PathBuf,
    pub from: String,
    pub to: String,
}

impl MergedDataset {
    pub fn renamed(&self) -> bool {
        self.from != self.to
    }
}

/// Create `target` and copy all of `sources` into it.
pub fn merge_files(
    target: impl AsRef<Path>,
    sources: &[PathBuf],
    options: StoreOptions,
) -> Result<Vec<MergedDataset>, StoreError> {
    let mut out = ScanFile::create(target.as_ref(), options)?;
    let names = NameAllocator::default();
    let mut merged = Vec::new();

    for source in sources {
        let src = ScanFile::open(source, OpenMode::Read, options)?;
        let mut renames: HashMap<String, (String, String)> = HashMap::new();

        for entry in &src.catalog().datasets {
            let payload = src.payload(entry)?;
            let folder = entry.attrs.folder;
            let name = names.allocate(&entry.attrs.name, |n| out.catalog().contains(&folder.url(n)))?;
            let url = folder.url(&name);

            let mut copy = entry.clone();
            copy.url = url.clone();
            copy.attrs.name = name.clone();
            for axis in &mut copy.attrs.axes {
                if let Some((new_url, new_name)) = renames.get(&axis.url) {
                    axis.url = new_url.clone();
                    axis.name = new_name.clone();
                }
            }
            if let Some(view) = &mut copy.view {
                for overlay in &mut view.overlays {
                    for link in [&mut overlay.x, &mut overlay.y] {
                        if let Some((new_url, _)) = renames.get(link.as_str()) {
                            *link = new_url.clone();
                        }
                    }
                }
            }

            if url != entry.url {
                log::info!("{}: {} renamed to {url}", source.display(), entry.url);
            }
            merged.push(MergedDataset {
                source: source.clone(),
                from: entry.url.clone(),
                to: url.clone(),
            });
            renames.insert(entry.url.clone(), (url, name));
            out.import(copy, payload)?;
        }
    }

    out.close()?;
    Ok(merged)
}
