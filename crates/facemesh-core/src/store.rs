//! On-disk face store: one `<identity>.json` file per registered face.
//!
//! The in-memory gallery and the directory are kept in step under one
//! `RwLock`. Writers hold [`StoreWriter`] for the whole check-then-write
//! sequence so two registrations cannot both pass a duplicate check.

use crate::types::{FeatureVector, Gallery};
use std::fs::{self, File};
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};
use std::sync::{PoisonError, RwLock, RwLockReadGuard, RwLockWriteGuard};
use thiserror::Error;

/// Extension of persisted feature files.
pub const RECORD_EXTENSION: &str = "json";

#[derive(Error, Debug)]
pub enum StoreError {
    #[error("I/O error on {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("could not serialize features: {0}")]
    Serialize(#[from] serde_json::Error),
    #[error("invalid identity name {name:?}: {reason}")]
    InvalidName { name: String, reason: &'static str },
}

impl StoreError {
    fn io(path: &Path, source: std::io::Error) -> Self {
        Self::Io {
            path: path.to_path_buf(),
            source,
        }
    }
}

/// Check that `name` can be used as an identity and as a file stem.
pub fn validate_identity(name: &str) -> Result<&str, StoreError> {
    let reason = if name.trim().is_empty() {
        "name is empty or only whitespace"
    } else if name.starts_with('.') {
        "name must not start with '.'"
    } else if name.contains(['/', '\\', '\0']) {
        "name must not contain '/', '\\' or NUL"
    } else {
        return Ok(name);
    };
    Err(StoreError::InvalidName {
        name: name.to_string(),
        reason,
    })
}

/// Path of the feature file for `name` inside `dir`.
pub fn record_path(dir: &Path, name: &str) -> PathBuf {
    dir.join(format!("{name}.{RECORD_EXTENSION}"))
}

/// Persist `vector` as `<dir>/<name>.json`, replacing any previous file.
///
/// Writes to a temporary sibling first and renames it into place, so a
/// failed write never leaves a truncated record behind.
pub fn save(dir: &Path, name: &str, vector: &FeatureVector) -> Result<PathBuf, StoreError> {
    validate_identity(name)?;
    let path = record_path(dir, name);
    let tmp = dir.join(format!("{name}.{RECORD_EXTENSION}.tmp"));

    let result = write_record(&tmp, vector).and_then(|()| {
        fs::rename(&tmp, &path).map_err(|e| StoreError::io(&path, e))
    });
    if result.is_err() {
        if let Err(err) = fs::remove_file(&tmp) {
            tracing::debug!(path = %tmp.display(), error = %err, "no temporary record to clean up");
        }
    }
    result.map(|()| path)
}

fn write_record(path: &Path, vector: &FeatureVector) -> Result<(), StoreError> {
    let file = File::create(path).map_err(|e| StoreError::io(path, e))?;
    let mut writer = BufWriter::new(file);
    serde_json::to_writer(&mut writer, vector)?;
    writer.flush().map_err(|e| StoreError::io(path, e))?;
    let file = writer.into_inner().map_err(|e| StoreError::io(path, e.into_error()))?;
    file.sync_all().map_err(|e| StoreError::io(path, e))
}

fn read_record(path: &Path) -> Result<FeatureVector, String> {
    let data = fs::read(path).map_err(|e| e.to_string())?;
    serde_json::from_slice(&data).map_err(|e| e.to_string())
}

/// Registered faces, in memory and on disk.
pub struct FaceStore {
    dir: PathBuf,
    records: RwLock<Gallery>,
}

impl FaceStore {
    /// Create `dir` if needed and load every record in it.
    pub fn open(dir: impl Into<PathBuf>) -> Result<Self, StoreError> {
        let dir = dir.into();
        fs::create_dir_all(&dir).map_err(|e| StoreError::io(&dir, e))?;
        let records = Self::load(&dir)?;
        tracing::info!(dir = %dir.display(), faces = records.len(), "face store opened");
        Ok(Self {
            dir,
            records: RwLock::new(records),
        })
    }

    /// Read every `*.json` record in `dir`.
    ///
    /// A record that cannot be read or parsed is skipped with a warning;
    /// only failure to list the directory itself is an error.
    pub fn load(dir: &Path) -> Result<Gallery, StoreError> {
        let mut records = Gallery::new();

        for entry in fs::read_dir(dir).map_err(|e| StoreError::io(dir, e))? {
            let path = match entry {
                Ok(entry) => entry.path(),
                Err(err) => {
                    tracing::warn!(dir = %dir.display(), error = %err, "skipping unreadable directory entry");
                    continue;
                }
            };
            if path.extension().and_then(|e| e.to_str()) != Some(RECORD_EXTENSION) {
                continue;
            }
            let Some(name) = path.file_stem().and_then(|s| s.to_str()) else {
                tracing::warn!(path = %path.display(), "skipping record with non UTF-8 name");
                continue;
            };
            if validate_identity(name).is_err() {
                tracing::warn!(path = %path.display(), "skipping record with invalid identity name");
                continue;
            }

            match read_record(&path) {
                Ok(vector) => {
                    records.insert(name.to_string(), vector);
                }
                Err(err) => {
                    tracing::warn!(path = %path.display(), error = %err, "skipping corrupt face record");
                }
            }
        }

        Ok(records)
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    pub fn get(&self, name: &str) -> Option<FeatureVector> {
        self.read().get(name).cloned()
    }

    /// Registered names in lexicographic order.
    pub fn names(&self) -> Vec<String> {
        self.read().keys().cloned().collect()
    }

    pub fn len(&self) -> usize {
        self.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.read().is_empty()
    }

    /// Persist and insert one record.
    pub fn put(&self, name: &str, vector: FeatureVector) -> Result<(), StoreError> {
        self.write().put(name, vector)
    }

    /// Shared access to the gallery.
    pub fn read(&self) -> RwLockReadGuard<'_, Gallery> {
        // Memory is only updated after a successful write, so a poisoned
        // lock still guards a consistent gallery.
        self.records.read().unwrap_or_else(PoisonError::into_inner)
    }

    /// Exclusive access for a check-then-write sequence.
    pub fn write(&self) -> StoreWriter<'_> {
        StoreWriter {
            dir: &self.dir,
            records: self.records.write().unwrap_or_else(PoisonError::into_inner),
        }
    }
}

/// Exclusive handle on a [`FaceStore`]. Dropping it releases the lock.
pub struct StoreWriter<'a> {
    dir: &'a Path,
    records: RwLockWriteGuard<'a, Gallery>,
}

impl StoreWriter<'_> {
    pub fn records(&self) -> &Gallery {
        &self.records
    }

    /// Write `<name>.json`, then update memory. On error neither changes.
    pub fn put(&mut self, name: &str, vector: FeatureVector) -> Result<(), StoreError> {
        let path = save(self.dir, name, &vector)?;
        tracing::debug!(name, path = %path.display(), values = vector.len(), "face record saved");
        self.records.insert(name.to_string(), vector);
        Ok(())
    }
}
