//! File-backed store
//!
//! Keeps every key in a single JSON object on disk. The file is re-read on
//! every access so that two processes sharing it see each other's writes, with
//! last-writer-wins semantics.

use super::StateStore;
use crate::{Error, Result};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

/// JSON file store
#[derive(Debug, Clone)]
pub struct FileStore {
    path: PathBuf,
}

impl FileStore {
    /// Create a store at the given path, or at the default location
    pub fn new(path: Option<PathBuf>) -> Self {
        let path = path.unwrap_or_else(default_store_path);
        Self { path }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn load(&self) -> BTreeMap<String, String> {
        if !self.path.exists() {
            return BTreeMap::new();
        }

        match std::fs::read_to_string(&self.path) {
            Ok(content) => match serde_json::from_str(&content) {
                Ok(entries) => entries,
                Err(e) => {
                    tracing::warn!("Ignoring unreadable store {:?}: {}", self.path, e);
                    BTreeMap::new()
                }
            },
            Err(e) => {
                tracing::warn!("Failed to read store {:?}: {}", self.path, e);
                BTreeMap::new()
            }
        }
    }

    fn save(&self, entries: &BTreeMap<String, String>) -> Result<()> {
        if let Some(parent) = self.path.parent()
            && !parent.as_os_str().is_empty()
            && !parent.exists()
        {
            std::fs::create_dir_all(parent).map_err(|e| {
                Error::persistence(format!("Failed to create {:?}: {}", parent, e))
            })?;
        }

        let json = serde_json::to_string_pretty(entries)?;
        std::fs::write(&self.path, json)
            .map_err(|e| Error::persistence(format!("Failed to write {:?}: {}", self.path, e)))
    }
}

/// `<data dir>/auth-state-viz/session.json`
pub fn default_store_path() -> PathBuf {
    dirs::data_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join("auth-state-viz")
        .join("session.json")
}

impl StateStore for FileStore {
    fn get(&self, key: &str) -> Option<String> {
        self.load().remove(key)
    }

    fn set(&self, key: &str, value: &str) -> Result<()> {
        let mut entries = self.load();
        entries.insert(key.to_string(), value.to_string());
        self.save(&entries)
    }

    fn remove(&self, key: &str) -> Result<()> {
        let mut entries = self.load();
        if entries.remove(key).is_some() {
            self.save(&entries)?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_values_survive_a_new_handle() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join("session.json");

        let store = FileStore::new(Some(path.clone()));
        store.set("fsm.email.state", "WaitingForUserToClickLink").unwrap();

        let reopened = FileStore::new(Some(path));
        assert_eq!(
            reopened.get("fsm.email.state").as_deref(),
            Some("WaitingForUserToClickLink")
        );

        reopened.remove("fsm.email.state").unwrap();
        assert!(store.get("fsm.email.state").is_none());
    }

    #[test]
    fn test_corrupt_file_reads_as_empty() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("session.json");
        std::fs::write(&path, "not json").unwrap();

        let store = FileStore::new(Some(path));
        assert!(store.get("anything").is_none());
        store.set("k", "v").unwrap();
        assert_eq!(store.get("k").as_deref(), Some("v"));
    }
}
