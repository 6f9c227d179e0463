//! State persistence
//!
//! Each provider machine stores its current state identifier under its own key
//! so the flow survives a page reload (or, for the CLI, a new process). The
//! store is synchronous and process-local; nothing coordinates concurrent
//! writers sharing one backing file.

use crate::Result;
use crate::fsm::ProviderId;
use std::collections::BTreeMap;
use std::sync::{Mutex, MutexGuard};

pub mod file;

pub use file::FileStore;

/// Key-value persistence consumed by the provider machines
pub trait StateStore: Send + Sync {
    fn get(&self, key: &str) -> Option<String>;
    fn set(&self, key: &str, value: &str) -> Result<()>;
    fn remove(&self, key: &str) -> Result<()>;
}

/// Key holding the current state identifier of a provider machine
pub fn state_key(provider: ProviderId) -> String {
    format!("fsm.{}.state", provider)
}

/// Key holding the credential remembered between leaving and re-entering the page
pub fn credential_key(provider: ProviderId) -> String {
    format!("fsm.{}.credential", provider)
}

/// In-memory store, lost with the process
#[derive(Debug, Default)]
pub struct MemoryStore {
    entries: Mutex<BTreeMap<String, String>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn entries(&self) -> MutexGuard<'_, BTreeMap<String, String>> {
        self.entries
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    pub fn len(&self) -> usize {
        self.entries().len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries().is_empty()
    }
}

impl StateStore for MemoryStore {
    fn get(&self, key: &str) -> Option<String> {
        self.entries().get(key).cloned()
    }

    fn set(&self, key: &str, value: &str) -> Result<()> {
        self.entries().insert(key.to_string(), value.to_string());
        Ok(())
    }

    fn remove(&self, key: &str) -> Result<()> {
        self.entries().remove(key);
        Ok(())
    }
}
