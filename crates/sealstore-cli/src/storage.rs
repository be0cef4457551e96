use std::path::PathBuf;

use color_eyre::Result;
use dirs::data_dir;
use sealstore_storage::{
    entry_store::EntryStore, file_map::FileBackingMap, key_slot::KeyringSlot,
};
use tracing::debug;

use crate::config::Config;

const STORE_FILE: &str = "sealstore.json";

/// Resolve the default data directory for sealstore.
pub fn default_data_dir() -> Result<PathBuf> {
    let base = data_dir().ok_or_else(|| color_eyre::eyre::eyre!("no data dir available"))?;
    Ok(base.join("sealstore"))
}

/// Build the on-disk store described by `config`, keyed by the OS keychain.
pub fn store_from_config(config: &Config) -> Result<EntryStore<FileBackingMap>> {
    let root = match &config.data_dir {
        Some(root) => root.clone(),
        None => default_data_dir()?,
    };
    let path = root.join(STORE_FILE);
    debug!(path = %path.display(), "opening encrypted store");

    let keyring = config.keyring();
    let map = FileBackingMap::open(path)?;
    Ok(EntryStore::open(
        map,
        KeyringSlot::new(keyring.service, keyring.account),
        config.store_options()?,
    ))
}

/// Helper for tests to construct a store rooted at a temp dir with an in-memory key.
#[cfg(test)]
pub fn test_store(root: impl Into<PathBuf>) -> EntryStore<FileBackingMap> {
    use sealstore_storage::{key_slot::InMemoryKeySlot, registry::StoreOptions};

    let map = FileBackingMap::open(root.into().join(STORE_FILE)).expect("open map");
    EntryStore::open(map, InMemoryKeySlot::new(), StoreOptions::default())
}
