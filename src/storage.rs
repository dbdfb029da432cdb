//! Persisted state
//!
//! Engine state is stored as JSON strings under namespaced keys. Any subset of keys
//! may be missing (first run), and a failed write never invalidates in-memory state.

use crate::error::EngineError;
use serde::de::DeserializeOwned;
use serde::Serialize;
use std::collections::HashMap;
use std::fs;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};

/// Namespace prefix for every persisted key
pub const STORAGE_PREFIX: &str = "calmflux_";

/// Persisted state slots
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum StateKey {
    Baseline,
    BaselineHistory,
    CalibrationState,
    CalibrationData,
    AnnoyanceLog,
    AnnoyanceState,
}

impl StateKey {
    pub const ALL: [StateKey; 6] = [
        StateKey::Baseline,
        StateKey::BaselineHistory,
        StateKey::CalibrationState,
        StateKey::CalibrationData,
        StateKey::AnnoyanceLog,
        StateKey::AnnoyanceState,
    ];

    fn suffix(&self) -> &'static str {
        match self {
            StateKey::Baseline => "baseline",
            StateKey::BaselineHistory => "baseline_history",
            StateKey::CalibrationState => "calibration_state",
            StateKey::CalibrationData => "calibration_data",
            StateKey::AnnoyanceLog => "annoyance_log",
            StateKey::AnnoyanceState => "annoyance_state",
        }
    }

    /// Fully namespaced key
    pub fn key(&self) -> String {
        format!("{STORAGE_PREFIX}{}", self.suffix())
    }
}

/// Key-value backend for engine state
pub trait StateStore {
    fn get(&self, key: &str) -> Result<Option<String>, EngineError>;
    fn set(&mut self, key: &str, value: &str) -> Result<(), EngineError>;
    fn remove(&mut self, key: &str) -> Result<(), EngineError>;
}

impl<T: StateStore + ?Sized> StateStore for Box<T> {
    fn get(&self, key: &str) -> Result<Option<String>, EngineError> {
        (**self).get(key)
    }

    fn set(&mut self, key: &str, value: &str) -> Result<(), EngineError> {
        (**self).set(key, value)
    }

    fn remove(&mut self, key: &str) -> Result<(), EngineError> {
        (**self).remove(key)
    }
}

/// Read and decode a slot; absent slots are `Ok(None)`
pub fn read_json<T: DeserializeOwned>(
    store: &dyn StateStore,
    key: StateKey,
) -> Result<Option<T>, EngineError> {
    match store.get(&key.key())? {
        Some(raw) => Ok(Some(serde_json::from_str(&raw)?)),
        None => Ok(None),
    }
}

/// Encode and write a slot
pub fn write_json<T: Serialize>(
    store: &mut dyn StateStore,
    key: StateKey,
    value: &T,
) -> Result<(), EngineError> {
    let raw = serde_json::to_string(value)?;
    store.set(&key.key(), &raw)
}

/// In-process store
#[derive(Debug, Clone, Default)]
pub struct MemoryStore {
    values: HashMap<String, String>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }
}

impl StateStore for MemoryStore {
    fn get(&self, key: &str) -> Result<Option<String>, EngineError> {
        Ok(self.values.get(key).cloned())
    }

    fn set(&mut self, key: &str, value: &str) -> Result<(), EngineError> {
        self.values.insert(key.to_string(), value.to_string());
        Ok(())
    }

    fn remove(&mut self, key: &str) -> Result<(), EngineError> {
        self.values.remove(key);
        Ok(())
    }
}

/// One JSON file per key inside a directory
#[derive(Debug, Clone)]
pub struct FileStore {
    dir: PathBuf,
}

impl FileStore {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    fn path(&self, key: &str) -> PathBuf {
        self.dir.join(format!("{key}.json"))
    }
}

impl StateStore for FileStore {
    fn get(&self, key: &str) -> Result<Option<String>, EngineError> {
        match fs::read_to_string(self.path(key)) {
            Ok(raw) => Ok(Some(raw)),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(None),
            Err(e) => Err(EngineError::Io(e)),
        }
    }

    fn set(&mut self, key: &str, value: &str) -> Result<(), EngineError> {
        let write = || -> std::io::Result<()> {
            fs::create_dir_all(&self.dir)?;
            // Write-then-rename so readers never see a truncated file
            let tmp = self.dir.join(format!("{key}.json.tmp"));
            fs::write(&tmp, value)?;
            fs::rename(&tmp, self.path(key))
        };
        write().map_err(|e| EngineError::PersistenceWriteFailure {
            key: key.to_string(),
            reason: e.to_string(),
        })
    }

    fn remove(&mut self, key: &str) -> Result<(), EngineError> {
        match fs::remove_file(self.path(key)) {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(()),
            Err(e) => Err(EngineError::PersistenceWriteFailure {
                key: key.to_string(),
                reason: e.to_string(),
            }),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::{SystemTime, UNIX_EPOCH};

    fn temp_dir(tag: &str) -> PathBuf {
        let nanos = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|d| d.as_nanos())
            .unwrap_or(0);
        std::env::temp_dir().join(format!("calmflux-{tag}-{}-{nanos}", std::process::id()))
    }

    #[test]
    fn test_keys_are_namespaced() {
        for key in StateKey::ALL {
            assert!(key.key().starts_with(STORAGE_PREFIX));
        }
        assert_eq!(StateKey::AnnoyanceLog.key(), "calmflux_annoyance_log");
    }

    #[test]
    fn test_memory_store_json_helpers() {
        let mut store = MemoryStore::new();
        let missing: Option<Vec<u32>> = read_json(&store, StateKey::AnnoyanceLog).unwrap();
        assert!(missing.is_none());

        write_json(&mut store, StateKey::AnnoyanceLog, &vec![1u32, 2, 3]).unwrap();
        let loaded: Option<Vec<u32>> = read_json(&store, StateKey::AnnoyanceLog).unwrap();
        assert_eq!(loaded, Some(vec![1, 2, 3]));

        store.remove(&StateKey::AnnoyanceLog.key()).unwrap();
        assert!(store.is_empty());
    }

    #[test]
    fn test_malformed_slot_is_error() {
        let mut store = MemoryStore::new();
        store.set(&StateKey::AnnoyanceLog.key(), "{not json").unwrap();
        let result: Result<Option<Vec<u32>>, _> = read_json(&store, StateKey::AnnoyanceLog);
        assert!(matches!(result, Err(EngineError::JsonError(_))));
    }

    #[test]
    fn test_file_store_roundtrip() {
        let dir = temp_dir("roundtrip");
        let mut store = FileStore::new(&dir);

        assert_eq!(store.get("calmflux_baseline").unwrap(), None);
        store.set("calmflux_baseline", "{\"a\":1}").unwrap();
        assert_eq!(
            store.get("calmflux_baseline").unwrap().as_deref(),
            Some("{\"a\":1}")
        );
        store.remove("calmflux_baseline").unwrap();
        store.remove("calmflux_baseline").unwrap();
        assert_eq!(store.get("calmflux_baseline").unwrap(), None);

        let _ = fs::remove_dir_all(dir);
    }

    #[test]
    fn test_file_store_write_failure() {
        let dir = temp_dir("blocked");
        // A regular file where the directory should be
        fs::write(&dir, "occupied").unwrap();
        let mut store = FileStore::new(&dir);

        let result = store.set("calmflux_baseline", "{}");
        assert!(matches!(
            result,
            Err(EngineError::PersistenceWriteFailure { .. })
        ));

        let _ = fs::remove_file(dir);
    }
}
