use std::{
    fs,
    io::ErrorKind,
    path::{Path, PathBuf},
};

use parking_lot::Mutex;
use serde::{Deserialize, Serialize};

use crate::{
    error::RegistryErr,
    session::{HistoryEntry, RegistryStats, TrainingSession},
};

/// The durable part of a registry: terminal sessions, history and aggregates.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Snapshot {
    pub sessions: Vec<TrainingSession>,
    pub history: Vec<HistoryEntry>,
    pub stats: RegistryStats,
}

/// Where a registry persists its snapshots.
pub trait SessionStore: Send + Sync {
    /// Loads the last saved snapshot, an empty one if nothing was saved yet.
    fn load(&self) -> Result<Snapshot, RegistryErr>;

    fn save(&self, snapshot: &Snapshot) -> Result<(), RegistryErr>;
}

/// Keeps the snapshot in memory, lost on restart.
#[derive(Debug, Default)]
pub struct MemoryStore {
    snapshot: Mutex<Snapshot>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// The last saved snapshot.
    pub fn snapshot(&self) -> Snapshot {
        self.snapshot.lock().clone()
    }
}

impl SessionStore for MemoryStore {
    fn load(&self) -> Result<Snapshot, RegistryErr> {
        Ok(self.snapshot())
    }

    fn save(&self, snapshot: &Snapshot) -> Result<(), RegistryErr> {
        *self.snapshot.lock() = snapshot.clone();
        Ok(())
    }
}

/// Persists the snapshot as a single JSON document.
#[derive(Debug, Clone)]
pub struct JsonFileStore {
    path: PathBuf,
}

impl JsonFileStore {
    /// Creates a new `JsonFileStore`, the file is created on the first save.
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl SessionStore for JsonFileStore {
    fn load(&self) -> Result<Snapshot, RegistryErr> {
        match fs::read_to_string(&self.path) {
            Ok(raw) => Ok(serde_json::from_str(&raw)?),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(Snapshot::default()),
            Err(e) => Err(e.into()),
        }
    }

    fn save(&self, snapshot: &Snapshot) -> Result<(), RegistryErr> {
        if let Some(parent) = self.path.parent().filter(|p| !p.as_os_str().is_empty()) {
            fs::create_dir_all(parent)?;
        }

        // Written aside, then renamed into place.
        let tmp = self.path.with_extension("json.tmp");
        fs::write(&tmp, serde_json::to_vec_pretty(snapshot)?)?;
        fs::rename(&tmp, &self.path)?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn missing_file_loads_empty() {
        let dir = tempfile::tempdir().unwrap();
        let store = JsonFileStore::new(dir.path().join("sessions.json"));

        assert_eq!(store.load().unwrap(), Snapshot::default());
    }

    #[test]
    fn corrupt_file_is_a_format_error() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("sessions.json");
        fs::write(&path, "{ not json").unwrap();

        let err = JsonFileStore::new(path).load().unwrap_err();
        assert!(matches!(err, RegistryErr::Serde(_)));
    }

    #[test]
    fn save_creates_parent_dirs() {
        let dir = tempfile::tempdir().unwrap();
        let store = JsonFileStore::new(dir.path().join("nested/state/sessions.json"));

        let mut snapshot = Snapshot::default();
        snapshot.stats.completed_count = 2;
        store.save(&snapshot).unwrap();

        assert_eq!(store.load().unwrap(), snapshot);
    }
}
