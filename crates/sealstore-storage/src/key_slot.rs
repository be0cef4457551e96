use std::sync::{Arc, Mutex};

use sealstore_core::{keystore::KeySlot, storage::StorageError};

/// OS keyring-backed slot. Uses the `keyring` crate to hold the device secret.
pub struct KeyringSlot {
    service: String,
    account: String,
}

impl KeyringSlot {
    pub fn new(service: impl Into<String>, account: impl Into<String>) -> Self {
        Self {
            service: service.into(),
            account: account.into(),
        }
    }

    fn entry(&self) -> Result<keyring::Entry, StorageError> {
        keyring::Entry::new(&self.service, &self.account).map_err(StorageError::keystore)
    }
}

impl KeySlot for KeyringSlot {
    fn load(&self) -> Result<Option<String>, StorageError> {
        match self.entry()?.get_password() {
            Ok(secret) => Ok(Some(secret)),
            Err(keyring::Error::NoEntry) => Ok(None),
            // Only a missing entry counts as empty.
            Err(err) => Err(StorageError::keystore(err)),
        }
    }

    fn store(&self, secret: &str) -> Result<(), StorageError> {
        self.entry()?
            .set_password(secret)
            .map_err(StorageError::keystore)
    }
}

/// In-memory slot for tests and ephemeral sessions. Clones share the secret.
#[derive(Debug, Default, Clone)]
pub struct InMemoryKeySlot {
    inner: Arc<Mutex<Option<String>>>,
    unavailable: bool,
}

impl InMemoryKeySlot {
    pub fn new() -> Self {
        Self::default()
    }

    /// A slot whose facility never initializes, like a device without a
    /// usable keystore.
    pub fn unavailable() -> Self {
        Self {
            inner: Arc::default(),
            unavailable: true,
        }
    }

    /// Forget the stored secret, as an OS credential reset would.
    pub fn reset(&self) {
        if let Ok(mut guard) = self.inner.lock() {
            *guard = None;
        }
    }

    fn check_available(&self) -> Result<(), StorageError> {
        if self.unavailable {
            return Err(StorageError::KeystoreUnavailable {
                reason: "in-memory keystore disabled".to_string(),
            });
        }
        Ok(())
    }
}

impl KeySlot for InMemoryKeySlot {
    fn load(&self) -> Result<Option<String>, StorageError> {
        self.check_available()?;
        let guard = self
            .inner
            .lock()
            .map_err(|err| StorageError::keystore(format!("lock poisoned: {err}")))?;
        Ok(guard.clone())
    }

    fn store(&self, secret: &str) -> Result<(), StorageError> {
        self.check_available()?;
        let mut guard = self
            .inner
            .lock()
            .map_err(|err| StorageError::keystore(format!("lock poisoned: {err}")))?;
        *guard = Some(secret.to_string());
        Ok(())
    }
}
