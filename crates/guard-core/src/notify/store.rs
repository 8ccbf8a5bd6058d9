use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Mutex;

use thiserror::Error;
use tracing::warn;

use super::decision::NotificationRecord;

/// The whole mapping is the unit of persistence: read fully at decision
/// time, written fully after a decision that changes it.
pub type StateMap = HashMap<String, NotificationRecord>;

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("failed to write state file {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("failed to serialize notification state: {0}")]
    Serialize(#[from] serde_json::Error),
}

/// Storage backend for the notification record mapping.
///
/// `load` is self-healing: a missing or unreadable backing store yields an
/// empty mapping (with a logged warning) instead of an error, so corruption
/// can never take the monitoring loop down. `save` may fail, and callers
/// treat that as a logged degradation, not a rollback.
pub trait StateBackend: Send + Sync {
    fn load(&self) -> StateMap;
    fn save(&self, records: &StateMap) -> Result<(), StoreError>;
}

/// JSON file backend. Saves write the full mapping to a temporary file and
/// rename it into place, so a crash mid-write cannot leave a torn file.
#[derive(Debug)]
pub struct FileBackend {
    path: PathBuf,
}

impl FileBackend {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl StateBackend for FileBackend {
    fn load(&self) -> StateMap {
        let bytes = match std::fs::read(&self.path) {
            Ok(bytes) => bytes,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return StateMap::new(),
            Err(e) => {
                warn!(path = %self.path.display(), error = %e, "Unreadable notification state file, starting empty");
                return StateMap::new();
            }
        };

        match serde_json::from_slice(&bytes) {
            Ok(records) => records,
            Err(e) => {
                warn!(path = %self.path.display(), error = %e, "Corrupt notification state file, starting empty");
                StateMap::new()
            }
        }
    }

    fn save(&self, records: &StateMap) -> Result<(), StoreError> {
        let json = serde_json::to_vec_pretty(records)?;

        let tmp = self.path.with_extension("json.tmp");
        std::fs::write(&tmp, &json).map_err(|source| StoreError::Io {
            path: tmp.clone(),
            source,
        })?;
        std::fs::rename(&tmp, &self.path).map_err(|source| StoreError::Io {
            path: self.path.clone(),
            source,
        })?;
        Ok(())
    }
}

/// In-memory backend for tests and single-run watch sessions.
#[derive(Debug, Default)]
pub struct MemoryBackend {
    records: Mutex<StateMap>,
}

impl MemoryBackend {
    pub fn new() -> Self {
        Self::default()
    }
}

impl StateBackend for MemoryBackend {
    fn load(&self) -> StateMap {
        self.records.lock().expect("state lock poisoned").clone()
    }

    fn save(&self, records: &StateMap) -> Result<(), StoreError> {
        *self.records.lock().expect("state lock poisoned") = records.clone();
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::monitor::state::SiteStatus;
    use chrono::Utc;

    fn record(count: u32) -> NotificationRecord {
        NotificationRecord {
            status: SiteStatus::Down,
            timestamp: Utc::now(),
            consecutive_failures: count,
        }
    }

    #[test]
    fn file_backend_round_trips() {
        let dir = tempfile::tempdir().unwrap();
        let backend = FileBackend::new(dir.path().join("notification_state.json"));

        let mut records = StateMap::new();
        records.insert("https://a.com".into(), record(5));
        backend.save(&records).unwrap();

        let loaded = backend.load();
        assert_eq!(loaded.len(), 1);
        assert_eq!(loaded["https://a.com"].consecutive_failures, 5);
        assert_eq!(loaded["https://a.com"].status, SiteStatus::Down);
    }

    #[test]
    fn missing_file_loads_empty() {
        let dir = tempfile::tempdir().unwrap();
        let backend = FileBackend::new(dir.path().join("does_not_exist.json"));
        assert!(backend.load().is_empty());
    }

    #[test]
    fn corrupt_file_loads_empty() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("notification_state.json");
        std::fs::write(&path, b"{ truncated garbage").unwrap();

        let backend = FileBackend::new(&path);
        assert!(backend.load().is_empty());
    }

    #[test]
    fn wrong_shape_loads_empty() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("notification_state.json");
        std::fs::write(&path, b"[1, 2, 3]").unwrap();

        let backend = FileBackend::new(&path);
        assert!(backend.load().is_empty());
    }

    #[test]
    fn save_replaces_whole_mapping() {
        let dir = tempfile::tempdir().unwrap();
        let backend = FileBackend::new(dir.path().join("state.json"));

        let mut records = StateMap::new();
        records.insert("https://a.com".into(), record(3));
        records.insert("https://b.com".into(), record(7));
        backend.save(&records).unwrap();

        records.remove("https://b.com");
        backend.save(&records).unwrap();

        let loaded = backend.load();
        assert_eq!(loaded.len(), 1);
        assert!(loaded.contains_key("https://a.com"));
    }

    #[test]
    fn save_leaves_no_temp_file_behind() {
        let dir = tempfile::tempdir().unwrap();
        let backend = FileBackend::new(dir.path().join("state.json"));
        backend.save(&StateMap::new()).unwrap();

        let names: Vec<String> = std::fs::read_dir(dir.path())
            .unwrap()
            .map(|e| e.unwrap().file_name().to_string_lossy().into_owned())
            .collect();
        assert_eq!(names, vec!["state.json"]);
    }

    #[test]
    fn memory_backend_round_trips() {
        let backend = MemoryBackend::new();
        assert!(backend.load().is_empty());

        let mut records = StateMap::new();
        records.insert("https://a.com".into(), record(2));
        backend.save(&records).unwrap();
        assert_eq!(backend.load()["https://a.com"].consecutive_failures, 2);
    }
}
