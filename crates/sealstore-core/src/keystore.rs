use crate::storage::StorageError;

/// Opaque secret held by the platform credential store.
///
/// The device private key lives here encoded as text; only the key guard reads
/// it, and it never leaves the process through the public API.
pub trait KeySlot: Send + Sync {
    /// Load the stored secret, or `None` when the slot is empty.
    ///
    /// Fails with [`StorageError::KeystoreUnavailable`] when the facility cannot
    /// be initialized or read.
    fn load(&self) -> Result<Option<String>, StorageError>;

    /// Store a secret, replacing any previous one.
    fn store(&self, secret: &str) -> Result<(), StorageError>;
}

impl<S: KeySlot + ?Sized> KeySlot for std::sync::Arc<S> {
    fn load(&self) -> Result<Option<String>, StorageError> {
        (**self).load()
    }

    fn store(&self, secret: &str) -> Result<(), StorageError> {
        (**self).store(secret)
    }
}
