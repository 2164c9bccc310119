//! Durable per-source storage: site catalog + observation time series.
//!
//! Each source owns one directory under the data root, self-contained
//! and independently deletable. All writes go through temp-file +
//! atomic rename so readers never observe a partial document.

use std::fs;
use std::io;
use std::path::{Path, PathBuf};

use serde::de::DeserializeOwned;
use serde::Serialize;
use thiserror::Error;

pub mod catalog;
pub mod timeseries;

pub use catalog::{CatalogBatchOutcome, SiteCatalog, SiteRejection};
pub use timeseries::{TimeSeriesStore, UpsertReport};

pub const CRATE_NAME: &str = "flowline-storage";

#[derive(Debug, Error)]
pub enum StorageError {
    #[error("io error at {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("malformed store file {path}: {source}")]
    Decode {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },

    #[error("encoding store document for {path}: {source}")]
    Encode {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },

    #[error("unknown site '{0}' in catalog")]
    UnknownSite(String),
}

impl StorageError {
    fn io(path: impl Into<PathBuf>, source: io::Error) -> Self {
        Self::Io {
            path: path.into(),
            source,
        }
    }
}

/// Catalog and time-series store for one source, rooted at
/// `<data_root>/<source>/`.
#[derive(Debug)]
pub struct SourceStore {
    source: String,
    dir: PathBuf,
    pub catalog: SiteCatalog,
    pub series: TimeSeriesStore,
}

impl SourceStore {
    pub fn open(data_root: &Path, source: &str) -> Result<Self, StorageError> {
        let dir = data_root.join(source);
        fs::create_dir_all(&dir).map_err(|err| StorageError::io(&dir, err))?;
        Ok(Self {
            source: source.to_string(),
            catalog: SiteCatalog::open(&dir)?,
            series: TimeSeriesStore::open(&dir)?,
            dir,
        })
    }

    pub fn source(&self) -> &str {
        &self.source
    }

    pub fn source_dir(&self) -> &Path {
        &self.dir
    }
}

/// Serialize `value` next to `path` and atomically rename it into
/// place.
pub(crate) fn write_json_atomic<T: Serialize>(path: &Path, value: &T) -> Result<(), StorageError> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent).map_err(|err| StorageError::io(parent, err))?;
    }
    let bytes = serde_json::to_vec_pretty(value).map_err(|err| StorageError::Encode {
        path: path.to_path_buf(),
        source: err,
    })?;

    let file_name = path
        .file_name()
        .map(|name| name.to_string_lossy().into_owned())
        .unwrap_or_else(|| "store".to_string());
    let temp_path = path.with_file_name(format!(".{file_name}.tmp"));

    fs::write(&temp_path, &bytes).map_err(|err| StorageError::io(&temp_path, err))?;
    fs::rename(&temp_path, path).map_err(|err| {
        let _ = fs::remove_file(&temp_path);
        StorageError::io(path, err)
    })
}

pub(crate) fn read_json<T: DeserializeOwned>(path: &Path) -> Result<T, StorageError> {
    let data = fs::read_to_string(path).map_err(|err| StorageError::io(path, err))?;
    serde_json::from_str(&data).map_err(|err| StorageError::Decode {
        path: path.to_path_buf(),
        source: err,
    })
}
