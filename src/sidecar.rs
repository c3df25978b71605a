//! Sidecar metadata store
//!
//! Keyed entries under a flat namespace, persisted as JSON next to the cube
//! file. Statistics collected for a cube are stored here so re-opening skips
//! recomputation. Missing or corrupt entries are treated as "not computed",
//! never as fatal errors.

use crate::error::Result;
use chrono::{DateTime, Utc};
use log::warn;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};

/// Attributes preserved across open/convert cycles
pub const PRESERVED: &[&str] = &[
    "depth",
    "delay",
    "sample_interval",
    "cube_shape",
    "ilines",
    "xlines",
    "offsets",
    "lens",
    "value_min",
    "value_max",
    "q001",
    "q01",
    "q99",
    "q999",
    "trace_sample",
    "bins",
    "min_matrix",
    "max_matrix",
    "mean_matrix",
    "std_matrix",
    "hist_matrix",
    "zero_traces",
];

#[derive(Debug, Clone, Serialize, Deserialize)]
struct SidecarFile {
    created_at: DateTime<Utc>,
    modified_at: DateTime<Utc>,
    entries: BTreeMap<String, serde_json::Value>,
}

impl Default for SidecarFile {
    fn default() -> Self {
        let now = Utc::now();
        Self {
            created_at: now,
            modified_at: now,
            entries: BTreeMap::new(),
        }
    }
}

/// Flat key-value store living in a `.meta` file next to a cube
#[derive(Debug)]
pub struct SidecarStore {
    path: PathBuf,
    file: SidecarFile,
}

impl SidecarStore {
    /// Sidecar path for a cube file: same stem, `.meta` extension
    pub fn path_for(cube_path: &Path) -> PathBuf {
        cube_path.with_extension("meta")
    }

    /// Open the sidecar belonging to `cube_path`. A missing or unreadable
    /// file yields an empty store.
    pub fn open(cube_path: &Path) -> Self {
        let path = Self::path_for(cube_path);
        let file = match fs::read(&path) {
            Ok(bytes) => match serde_json::from_slice(&bytes) {
                Ok(parsed) => parsed,
                Err(e) => {
                    warn!("corrupt sidecar {}: {}; starting empty", path.display(), e);
                    SidecarFile::default()
                }
            },
            Err(_) => SidecarFile::default(),
        };
        Self { path, file }
    }

    /// Typed read of one entry. Missing keys and values of the wrong shape
    /// both yield `None`.
    pub fn get<T: DeserializeOwned>(&self, key: &str) -> Option<T> {
        let value = self.file.entries.get(key)?;
        match serde_json::from_value(value.clone()) {
            Ok(typed) => Some(typed),
            Err(e) => {
                warn!("sidecar entry `{}` has unexpected shape: {}", key, e);
                None
            }
        }
    }

    /// Store one entry in memory. Last write wins.
    pub fn set<T: Serialize>(&mut self, key: &str, value: &T) -> Result<()> {
        let value = serde_json::to_value(value)?;
        self.file.entries.insert(key.to_string(), value);
        Ok(())
    }

    pub fn contains(&self, key: &str) -> bool {
        self.file.entries.contains_key(key)
    }

    /// Write the store to disk. Safe to call repeatedly.
    pub fn save(&mut self) -> Result<()> {
        self.file.modified_at = Utc::now();
        let bytes = serde_json::to_vec_pretty(&self.file)?;
        fs::write(&self.path, bytes)?;
        Ok(())
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_missing_sidecar_is_empty() {
        let dir = TempDir::new().unwrap();
        let store = SidecarStore::open(&dir.path().join("cube.sgy"));
        assert_eq!(store.get::<f32>("value_min"), None);
        assert!(!store.contains("value_min"));
    }

    #[test]
    fn test_roundtrip_and_last_write_wins() {
        let dir = TempDir::new().unwrap();
        let cube_path = dir.path().join("cube.sgy");

        let mut store = SidecarStore::open(&cube_path);
        store.set("value_min", &-3.5f32).unwrap();
        store.set("lens", &vec![10usize, 20]).unwrap();
        store.save().unwrap();

        store.set("value_min", &-4.0f32).unwrap();
        store.save().unwrap();

        let reopened = SidecarStore::open(&cube_path);
        assert_eq!(reopened.get::<f32>("value_min"), Some(-4.0));
        assert_eq!(reopened.get::<Vec<usize>>("lens"), Some(vec![10, 20]));
    }

    #[test]
    fn test_wrong_shape_yields_none() {
        let dir = TempDir::new().unwrap();
        let cube_path = dir.path().join("cube.sgy");

        let mut store = SidecarStore::open(&cube_path);
        store.set("q01", &"not a number").unwrap();
        store.save().unwrap();

        let reopened = SidecarStore::open(&cube_path);
        assert_eq!(reopened.get::<f32>("q01"), None);
    }

    #[test]
    fn test_corrupt_file_recovers_empty() {
        let dir = TempDir::new().unwrap();
        let cube_path = dir.path().join("cube.sgy");
        fs::write(SidecarStore::path_for(&cube_path), b"{ not json").unwrap();

        let store = SidecarStore::open(&cube_path);
        assert!(!store.contains("value_min"));
    }
}
