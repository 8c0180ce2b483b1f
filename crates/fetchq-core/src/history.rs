//! Persistent fetch history: one JSON document keyed by destination path.
//!
//! The store is loaded once before workers start and saved once after they
//! finish, so nothing here needs synchronization. Load and save are
//! fail-soft: a missing or corrupt document degrades to an empty store with
//! a warning, and a failed save never fails the batch.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};

/// One completed fetch. At most one record per destination; a re-fetch of the
/// same destination replaces the old record.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HistoryRecord {
    pub locator: String,
    pub dest: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reference: Option<String>,
    pub size_bytes: u64,
    pub completed_at: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sha256: Option<String>,
}

/// In-memory view of the history document.
#[derive(Debug)]
pub struct HistoryStore {
    path: PathBuf,
    records: BTreeMap<String, HistoryRecord>,
}

impl HistoryStore {
    /// Load the document at `path`. Read or parse failures log a warning and
    /// yield an empty store; history is never worth failing a batch over.
    pub fn load(path: impl Into<PathBuf>) -> Self {
        let path = path.into();
        let records = match fs::read_to_string(&path) {
            Ok(data) => match serde_json::from_str(&data) {
                Ok(map) => map,
                Err(e) => {
                    tracing::warn!("history at {} is unreadable, starting empty: {}", path.display(), e);
                    BTreeMap::new()
                }
            },
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => BTreeMap::new(),
            Err(e) => {
                tracing::warn!("cannot read history at {}, starting empty: {}", path.display(), e);
                BTreeMap::new()
            }
        };
        Self { path, records }
    }

    /// Write the document back. The caller logs the error; the batch result
    /// stands regardless.
    pub fn save(&self) -> anyhow::Result<()> {
        if let Some(parent) = self.path.parent() {
            fs::create_dir_all(parent)?;
        }
        let data = serde_json::to_string_pretty(&self.records)?;
        fs::write(&self.path, data)?;
        Ok(())
    }

    pub fn lookup(&self, dest: &Path) -> Option<&HistoryRecord> {
        self.records.get(&dest.to_string_lossy().into_owned())
    }

    /// Insert or replace the record for its destination.
    pub fn record(&mut self, record: HistoryRecord) {
        self.records.insert(record.dest.clone(), record);
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    /// Records in destination order (the document's own key order).
    pub fn iter(&self) -> impl Iterator<Item = &HistoryRecord> {
        self.records.values()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn record(dest: &str, size: u64) -> HistoryRecord {
        HistoryRecord {
            locator: format!("https://example.com{dest}"),
            dest: dest.to_string(),
            reference: None,
            size_bytes: size,
            completed_at: Utc::now(),
            sha256: None,
        }
    }

    #[test]
    fn missing_document_loads_empty() {
        let dir = tempfile::tempdir().unwrap();
        let store = HistoryStore::load(dir.path().join("history.json"));
        assert!(store.is_empty());
    }

    #[test]
    fn corrupt_document_loads_empty() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("history.json");
        fs::write(&path, b"{ not json").unwrap();
        let store = HistoryStore::load(&path);
        assert!(store.is_empty());
    }

    #[test]
    fn save_and_reload_roundtrip() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join("history.json");
        let mut store = HistoryStore::load(&path);
        store.record(record("/ws/models/a.bin", 10));
        store.record(record("/ws/models/b.bin", 20));
        store.save().unwrap();

        let reloaded = HistoryStore::load(&path);
        assert_eq!(reloaded.len(), 2);
        let a = reloaded.lookup(Path::new("/ws/models/a.bin")).unwrap();
        assert_eq!(a.size_bytes, 10);
    }

    #[test]
    fn refetch_replaces_the_record() {
        let dir = tempfile::tempdir().unwrap();
        let mut store = HistoryStore::load(dir.path().join("history.json"));
        store.record(record("/ws/models/a.bin", 10));
        store.record(record("/ws/models/a.bin", 99));
        assert_eq!(store.len(), 1);
        assert_eq!(
            store.lookup(Path::new("/ws/models/a.bin")).unwrap().size_bytes,
            99
        );
    }

    #[test]
    fn optional_fields_survive_serialization() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("history.json");
        let mut store = HistoryStore::load(&path);
        let mut rec = record("/ws/addons/tool", 512);
        rec.reference = Some("main".to_string());
        rec.sha256 = Some("ab".repeat(32));
        store.record(rec.clone());
        store.save().unwrap();

        let reloaded = HistoryStore::load(&path);
        let got = reloaded.lookup(Path::new("/ws/addons/tool")).unwrap();
        assert_eq!(got.reference.as_deref(), Some("main"));
        assert_eq!(got.sha256, rec.sha256);
    }
}
