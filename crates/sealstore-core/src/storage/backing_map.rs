use std::{
    collections::BTreeMap,
    sync::{Arc, Mutex, MutexGuard},
};

use super::StorageError;

/// String-keyed, string-valued persistent map supplied by the host.
///
/// Mutations may be staged until [`BackingMap::commit`] returns; once it does,
/// the map is expected to be crash-consistent.
pub trait BackingMap: Send + Sync {
    /// Read the raw value stored under `key`.
    fn get(&self, key: &str) -> Result<Option<String>, StorageError>;

    /// Stage a value under `key`, overwriting any existing entry.
    fn put(&self, key: &str, value: &str) -> Result<(), StorageError>;

    /// Stage removal of `key` (idempotent).
    fn remove(&self, key: &str) -> Result<(), StorageError>;

    /// Make all staged mutations durable.
    fn commit(&self) -> Result<(), StorageError>;
}

impl<M: BackingMap + ?Sized> BackingMap for Arc<M> {
    fn get(&self, key: &str) -> Result<Option<String>, StorageError> {
        (**self).get(key)
    }

    fn put(&self, key: &str, value: &str) -> Result<(), StorageError> {
        (**self).put(key, value)
    }

    fn remove(&self, key: &str) -> Result<(), StorageError> {
        (**self).remove(key)
    }

    fn commit(&self) -> Result<(), StorageError> {
        (**self).commit()
    }
}

/// In-memory backing map for tests and ephemeral sessions.
///
/// Clones share the same entries, which lets tests reopen a store over the
/// same data to simulate a process restart.
#[derive(Debug, Default, Clone)]
pub struct InMemoryBackingMap {
    inner: Arc<Mutex<MapState>>,
}

#[derive(Debug, Default)]
struct MapState {
    entries: BTreeMap<String, String>,
    commits: usize,
}

impl InMemoryBackingMap {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of successful commits so far.
    pub fn commit_count(&self) -> usize {
        self.lock().map(|state| state.commits).unwrap_or_default()
    }

    /// Copy of every stored entry, keyed by the raw backing key.
    pub fn snapshot(&self) -> BTreeMap<String, String> {
        self.lock()
            .map(|state| state.entries.clone())
            .unwrap_or_default()
    }

    fn lock(&self) -> Result<MutexGuard<'_, MapState>, StorageError> {
        self.inner.lock().map_err(|err| StorageError::Backing {
            reason: format!("lock poisoned: {err}"),
        })
    }
}

impl BackingMap for InMemoryBackingMap {
    fn get(&self, key: &str) -> Result<Option<String>, StorageError> {
        Ok(self.lock()?.entries.get(key).cloned())
    }

    fn put(&self, key: &str, value: &str) -> Result<(), StorageError> {
        self.lock()?
            .entries
            .insert(key.to_string(), value.to_string());
        Ok(())
    }

    fn remove(&self, key: &str) -> Result<(), StorageError> {
        self.lock()?.entries.remove(key);
        Ok(())
    }

    fn commit(&self) -> Result<(), StorageError> {
        self.lock()?.commits += 1;
        Ok(())
    }
}
