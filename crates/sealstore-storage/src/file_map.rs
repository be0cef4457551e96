use std::{
    collections::BTreeMap,
    fs,
    io::Write,
    path::{Path, PathBuf},
    sync::{Mutex, MutexGuard},
};

use sealstore_core::storage::{BackingMap, StorageError};
use tempfile::NamedTempFile;
use tracing::{debug, instrument, warn};

/// JSON-file backing map. Mutations are staged in memory and written by
/// [`BackingMap::commit`] through a temp file that atomically replaces the
/// previous contents. A failed commit discards the staged mutations.
#[derive(Debug)]
pub struct FileBackingMap {
    path: PathBuf,
    entries: Mutex<Entries>,
}

#[derive(Debug)]
struct Entries {
    staged: BTreeMap<String, String>,
    committed: BTreeMap<String, String>,
}

impl FileBackingMap {
    /// Open the map stored at `path`; a missing or empty file is an empty map.
    pub fn open(path: impl Into<PathBuf>) -> Result<Self, StorageError> {
        let path = path.into();
        let entries = read_entries(&path)?;
        debug!(path = %path.display(), entries = entries.len(), "opened backing map");
        Ok(Self {
            path,
            entries: Mutex::new(Entries {
                staged: entries.clone(),
                committed: entries,
            }),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn lock(&self) -> Result<MutexGuard<'_, Entries>, StorageError> {
        self.entries
            .lock()
            .map_err(|err| StorageError::backing(format!("lock poisoned: {err}")))
    }
}

impl BackingMap for FileBackingMap {
    fn get(&self, key: &str) -> Result<Option<String>, StorageError> {
        Ok(self.lock()?.staged.get(key).cloned())
    }

    fn put(&self, key: &str, value: &str) -> Result<(), StorageError> {
        self.lock()?.staged.insert(key.to_string(), value.to_string());
        Ok(())
    }

    fn remove(&self, key: &str) -> Result<(), StorageError> {
        self.lock()?.staged.remove(key);
        Ok(())
    }

    #[instrument(level = "debug", skip_all, fields(path = %self.path.display()))]
    fn commit(&self) -> Result<(), StorageError> {
        let mut entries = self.lock()?;
        let written = serde_json::to_vec_pretty(&entries.staged)
            .map_err(StorageError::backing)
            .and_then(|json| write_atomic(&self.path, &json));

        match written {
            Ok(()) => {
                entries.committed = entries.staged.clone();
                Ok(())
            }
            Err(err) => {
                warn!(error = %err, "commit failed, discarding staged changes");
                entries.staged = entries.committed.clone();
                Err(err)
            }
        }
    }
}

fn read_entries(path: &Path) -> Result<BTreeMap<String, String>, StorageError> {
    match fs::read(path) {
        Ok(bytes) if bytes.iter().all(u8::is_ascii_whitespace) => Ok(BTreeMap::new()),
        Ok(bytes) => serde_json::from_slice(&bytes).map_err(StorageError::backing),
        Err(err) if err.kind() == std::io::ErrorKind::NotFound => Ok(BTreeMap::new()),
        Err(err) => Err(StorageError::backing(err)),
    }
}

fn write_atomic(path: &Path, bytes: &[u8]) -> Result<(), StorageError> {
    let parent = path
        .parent()
        .filter(|p| !p.as_os_str().is_empty())
        .unwrap_or_else(|| Path::new("."));
    fs::create_dir_all(parent).map_err(StorageError::backing)?;

    let mut tmp = NamedTempFile::new_in(parent).map_err(StorageError::backing)?;
    tmp.write_all(bytes).map_err(StorageError::backing)?;
    tmp.as_file().sync_all().map_err(StorageError::backing)?;
    tmp.persist(path).map_err(|e| StorageError::backing(e.error))?;
    Ok(())
}
