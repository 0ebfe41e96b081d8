//! Registry of connection records, one per entity id.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, RwLock};

use crate::live::state::ConnectionState;

pub(crate) type Entry = Arc<Mutex<ConnectionState>>;

/// Entries are created lazily and never removed.
#[derive(Default)]
pub(crate) struct ConnectionRegistry {
    entries: RwLock<HashMap<String, Entry>>,
}

impl ConnectionRegistry {
    /// Existing entry, or a fresh default one.
    pub(crate) fn get(&self, id: &str) -> Entry {
        if let Some(entry) = self.find(id) {
            return entry;
        }
        let mut entries = self.entries.write().unwrap_or_else(PoisonError::into_inner);
        entries
            .entry(id.to_string())
            .or_insert_with(|| Arc::new(Mutex::new(ConnectionState::new(id))))
            .clone()
    }

    pub(crate) fn find(&self, id: &str) -> Option<Entry> {
        self.entries
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(id)
            .cloned()
    }

    /// Run `f` against an existing entry under its lock.
    pub(crate) fn inspect<R>(&self, id: &str, f: impl FnOnce(&ConnectionState) -> R) -> Option<R> {
        let entry = self.find(id)?;
        let state = lock(&entry);
        Some(f(&state))
    }

    /// Reset an entry to its baseline, if it exists.
    pub(crate) fn reset(&self, id: &str) -> bool {
        match self.find(id) {
            Some(entry) => {
                lock(&entry).reset();
                true
            }
            None => false,
        }
    }

    pub(crate) fn ids(&self) -> Vec<String> {
        let mut ids: Vec<String> = self
            .entries
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .keys()
            .cloned()
            .collect();
        ids.sort();
        ids
    }
}

/// Lock one entity record. A panic while holding the lock leaves the record
/// usable; every mutation keeps it self-consistent.
pub(crate) fn lock(entry: &Entry) -> MutexGuard<'_, ConnectionState> {
    entry.lock().unwrap_or_else(PoisonError::into_inner)
}
