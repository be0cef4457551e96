use thiserror::Error;

/// Errors produced by key management, ciphers and the entry store.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum StorageError {
    /// The device key slot could not be initialized or read.
    #[error("keystore unavailable: {reason}")]
    KeystoreUnavailable { reason: String },
    /// No cipher could be constructed or selected.
    #[error("no usable storage cipher: {reason}")]
    NoUsableKey { reason: String },
    /// Wrapped key material was rejected by the device key.
    #[error("key unwrap failed: {reason}")]
    UnwrapFailed { reason: String },
    #[error("encryption failed: {reason}")]
    EncryptionFailed { reason: String },
    /// Ciphertext was short, badly padded or otherwise malformed.
    #[error("decryption failed: {reason}")]
    DecryptionFailed { reason: String },
    /// A record names a cipher that is not registered.
    #[error("unknown storage cipher format tag: {tag}")]
    UnknownFormatTag { tag: String },
    /// A stored record could not be parsed.
    #[error("malformed record: {reason}")]
    MalformedRecord { reason: String },
    /// Underlying backing map failure.
    #[error("backing store failure: {reason}")]
    Backing { reason: String },
}

impl StorageError {
    pub fn backing<E: ToString>(err: E) -> Self {
        Self::Backing {
            reason: err.to_string(),
        }
    }

    pub fn keystore<E: ToString>(err: E) -> Self {
        Self::KeystoreUnavailable {
            reason: err.to_string(),
        }
    }
}
