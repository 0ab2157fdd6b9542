//! JSON state file.
//!
//! Best-effort persistence of the metrics store. Writes go to a sibling
//! temporary file which is then renamed over the target path.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fs;
use std::io::ErrorKind as IoErrorKind;
use std::path::{Path, PathBuf};
use thiserror::Error;

use super::metrics::SeriesPoint;
use super::models::Sample;
use crate::alerts::Alert;

pub const SNAPSHOT_VERSION: u32 = 1;

/// Persistence error types.
#[derive(Error, Debug)]
pub enum PersistenceError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
    #[error("invalid state file: {0}")]
    Format(#[from] serde_json::Error),
    #[error("unsupported state file version {0}")]
    Version(u32),
    #[error("state file writer failed: {0}")]
    Task(String),
}

/// Saved state of one target.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TargetState {
    pub name: String,
    pub history: Vec<Sample>,
    pub consecutive_failures: u32,
    pub total_checks: u64,
    pub total_failures: u64,
}

/// Full store state as written to disk.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StoreSnapshot {
    pub version: u32,
    pub saved_at: DateTime<Utc>,
    pub targets: Vec<TargetState>,
    #[serde(default)]
    pub series: Vec<SeriesPoint>,
    #[serde(default)]
    pub alerts: Vec<Alert>,
}

/// Location of the state file.
#[derive(Debug, Clone)]
pub struct StateFile {
    path: PathBuf,
}

impl StateFile {
    pub fn new<P: AsRef<Path>>(path: P) -> Self {
        Self {
            path: path.as_ref().to_path_buf(),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Read the saved snapshot. A missing file is `Ok(None)`.
    pub fn load(&self) -> Result<Option<StoreSnapshot>, PersistenceError> {
        let data = match fs::read(&self.path) {
            Ok(d) => d,
            Err(e) if e.kind() == IoErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(e.into()),
        };

        let snapshot: StoreSnapshot = serde_json::from_slice(&data)?;
        if snapshot.version != SNAPSHOT_VERSION {
            return Err(PersistenceError::Version(snapshot.version));
        }

        Ok(Some(snapshot))
    }

    /// Write the snapshot, replacing any previous file.
    pub fn save(&self, snapshot: &StoreSnapshot) -> Result<(), PersistenceError> {
        let data = serde_json::to_vec(snapshot)?;

        let mut tmp = self.path.clone().into_os_string();
        tmp.push(".tmp");
        let tmp = PathBuf::from(tmp);

        fs::write(&tmp, data)?;
        fs::rename(&tmp, &self.path)?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::{MetricsStore, PhaseTimings, StoreSettings, Target};
    use std::time::Duration;
    use tempfile::TempDir;

    fn populated_store() -> MetricsStore {
        let targets = vec![Target::new("API", "http://example.com", Duration::from_secs(1))];
        let mut store = MetricsStore::new(&targets, StoreSettings::default());
        let sample =
            Sample::from_status(Utc::now(), Duration::from_millis(12), 200, 64, PhaseTimings::default());
        store.record("API", sample).unwrap();
        store
    }

    #[test]
    fn test_save_and_load() {
        let dir = TempDir::new().unwrap();
        let file = StateFile::new(dir.path().join("state.json"));
        let store = populated_store();
        let snapshot = store.export_snapshot();

        file.save(&snapshot).unwrap();
        let loaded = file.load().unwrap().unwrap();

        assert_eq!(loaded.targets.len(), 1);
        assert_eq!(loaded.targets[0].history, snapshot.targets[0].history);
        assert_eq!(loaded.series, snapshot.series);
        assert!(!dir.path().join("state.json.tmp").exists());
    }

    #[test]
    fn test_missing_file() {
        let dir = TempDir::new().unwrap();
        let file = StateFile::new(dir.path().join("absent.json"));
        assert!(file.load().unwrap().is_none());
    }

    #[test]
    fn test_corrupt_file() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("state.json");
        fs::write(&path, b"{not json").unwrap();

        let file = StateFile::new(&path);
        assert!(matches!(file.load(), Err(PersistenceError::Format(_))));
    }

    #[test]
    fn test_unsupported_version() {
        let dir = TempDir::new().unwrap();
        let file = StateFile::new(dir.path().join("state.json"));
        let mut snapshot = populated_store().export_snapshot();
        snapshot.version = 99;
        file.save(&snapshot).unwrap();

        assert!(matches!(file.load(), Err(PersistenceError::Version(99))));
    }
}
