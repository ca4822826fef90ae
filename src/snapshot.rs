//! Weight snapshot persistence.
//!
//! Snapshots are raw binary blobs written and read as flat byte buffers,
//! keyed by model path and engine name. Each save overwrites the previous
//! file wholesale; there is no incremental format.

use std::fmt;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};

use crate::engine::{SnapshotData, SnapshotHandler};

/// Error raised by snapshot persistence.
#[derive(Debug)]
pub enum SnapshotError {
    /// IO error during save/load.
    Io(io::Error),
    /// No snapshot file exists for the requested engine.
    NoSnapshot,
}

impl fmt::Display for SnapshotError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SnapshotError::Io(e) => write!(f, "IO error: {}", e),
            SnapshotError::NoSnapshot => write!(f, "no snapshot found"),
        }
    }
}

impl std::error::Error for SnapshotError {}

impl From<io::Error> for SnapshotError {
    fn from(e: io::Error) -> Self {
        SnapshotError::Io(e)
    }
}

/// Flat-file weight store rooted at a model path.
///
/// Creates the directory on construction if it does not exist.
pub struct WeightStore {
    model_path: PathBuf,
}

impl WeightStore {
    /// Create a store under the given model path.
    pub fn new(model_path: impl Into<PathBuf>) -> Result<Self, SnapshotError> {
        let model_path = model_path.into();
        fs::create_dir_all(&model_path)?;
        Ok(Self { model_path })
    }

    /// Path of the snapshot file for an engine.
    pub fn weights_path(&self, engine_name: &str) -> PathBuf {
        self.model_path.join(format!("weights.{}.bin", engine_name))
    }

    /// Whether a snapshot exists for an engine.
    pub fn exists(&self, engine_name: &str) -> bool {
        self.weights_path(engine_name).exists()
    }

    /// Write a snapshot, replacing any previous file.
    pub fn save(&self, engine_name: &str, weights: &[u8]) -> Result<PathBuf, SnapshotError> {
        let path = self.weights_path(engine_name);
        fs::write(&path, weights)?;
        Ok(path)
    }

    /// Read back a snapshot byte-exactly. `None` when no file exists.
    pub fn load(&self, engine_name: &str) -> Result<Option<Vec<u8>>, SnapshotError> {
        let path = self.weights_path(engine_name);
        if !path.exists() {
            return Ok(None);
        }
        Ok(Some(fs::read(&path)?))
    }

    /// Root path of the store.
    pub fn model_path(&self) -> &Path {
        &self.model_path
    }
}

/// Build a [`SnapshotHandler`] that writes every produced snapshot through
/// a [`WeightStore`]. Write failures are logged, not fatal: a failed
/// snapshot must never abort training.
pub fn store_handler(store: WeightStore, engine_name: &str) -> SnapshotHandler {
    let engine_name = engine_name.to_string();
    Box::new(move |snapshot: &SnapshotData| {
        if let Err(e) = store.save(&engine_name, &snapshot.weights) {
            log::warn!(
                "failed to persist snapshot at iteration {}: {}",
                snapshot.iteration,
                e
            );
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn test_store_creates_model_path() {
        let dir = tempdir().unwrap();
        let nested = dir.path().join("models/rnn");
        let _store = WeightStore::new(&nested).unwrap();
        assert!(nested.exists());
    }

    #[test]
    fn test_save_load_round_trip_byte_exact() {
        let dir = tempdir().unwrap();
        let store = WeightStore::new(dir.path()).unwrap();

        let weights: Vec<u8> = (0..=255).collect();
        store.save("CUDNN", &weights).unwrap();

        let loaded = store.load("CUDNN").unwrap().unwrap();
        assert_eq!(loaded, weights);
    }

    #[test]
    fn test_save_overwrites_wholesale() {
        let dir = tempdir().unwrap();
        let store = WeightStore::new(dir.path()).unwrap();

        store.save("DEFAULT", &[1, 2, 3, 4, 5]).unwrap();
        store.save("DEFAULT", &[9]).unwrap();

        assert_eq!(store.load("DEFAULT").unwrap().unwrap(), vec![9]);
    }

    #[test]
    fn test_load_missing_returns_none() {
        let dir = tempdir().unwrap();
        let store = WeightStore::new(dir.path()).unwrap();
        assert!(store.load("DEFAULT").unwrap().is_none());
        assert!(!store.exists("DEFAULT"));
    }

    #[test]
    fn test_snapshots_keyed_by_engine_name() {
        let dir = tempdir().unwrap();
        let store = WeightStore::new(dir.path()).unwrap();

        store.save("CUDNN", &[1]).unwrap();
        store.save("DEFAULT", &[2]).unwrap();

        assert_eq!(store.load("CUDNN").unwrap().unwrap(), vec![1]);
        assert_eq!(store.load("DEFAULT").unwrap().unwrap(), vec![2]);
    }

    #[test]
    fn test_store_handler_writes_through() {
        let dir = tempdir().unwrap();
        let store = WeightStore::new(dir.path()).unwrap();
        let check = WeightStore::new(dir.path()).unwrap();

        let mut handler = store_handler(store, "DEFAULT");
        handler(&SnapshotData {
            iteration: 42,
            reward: 1.5,
            weights: vec![7, 7, 7],
        });

        assert_eq!(check.load("DEFAULT").unwrap().unwrap(), vec![7, 7, 7]);
    }
}
