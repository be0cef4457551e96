use std::{collections::HashMap, sync::Arc};

use sealstore_core::storage::{BackingMap, StorageError};
use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use crate::{
    cipher::StorageCipher,
    key_guard::DeviceKeyGuard,
    legacy::{LegacySealedCipher, LEGACY_SEALED_TAG},
    symmetric::{
        AesCbcCipher, AesGcmCipher, KeySize, AES_CBC_TAG, AES_GCM_TAG, WRAPPED_KEY_PREFERENCE,
    },
};

/// Record format used for new writes when the symmetric engine is available.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum WriteFormat {
    #[default]
    AesCbc,
    AesGcm,
}

impl WriteFormat {
    pub fn format_tag(self) -> &'static str {
        match self {
            Self::AesCbc => AES_CBC_TAG,
            Self::AesGcm => AES_GCM_TAG,
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct StoreOptions {
    /// Size of the symmetric key if one has to be generated.
    pub key_size: KeySize,
    pub write_format: WriteFormat,
}

const KNOWN_TAGS: [&str; 3] = [AES_CBC_TAG, AES_GCM_TAG, LEGACY_SEALED_TAG];

/// Maps record format tags to the ciphers able to read them, and picks the one
/// used for new writes.
#[derive(Default)]
pub struct CipherRegistry {
    ciphers: HashMap<String, Arc<dyn StorageCipher>>,
    current: Option<String>,
}

impl CipherRegistry {
    /// Construct every cipher the device supports.
    ///
    /// Construction failures are logged and leave that cipher out; an empty
    /// registry fails every encrypting operation with `NoUsableKey`. A device
    /// key pair is only generated while no wrapped symmetric key is stored.
    pub fn build(
        guard: Arc<DeviceKeyGuard>,
        map: &dyn BackingMap,
        options: StoreOptions,
    ) -> Self {
        let mut registry = Self::default();

        // Once a wrapped key exists, a missing device key must not be replaced.
        let key_pair = map.get(WRAPPED_KEY_PREFERENCE).and_then(|wrapped| match wrapped {
            Some(_) => guard.load_key_pair(),
            None => guard.ensure_key_pair(),
        });

        match key_pair {
            Ok(()) => {
                let legacy = LegacySealedCipher::new(Arc::clone(&guard));
                registry.register(Arc::new(legacy));

                match AesCbcCipher::load(&guard, map, options.key_size) {
                    Ok(cbc) => {
                        let gcm = AesGcmCipher::with_key(cbc.key());
                        registry.register(Arc::new(cbc));
                        registry.register(Arc::new(gcm));
                    }
                    Err(err) => warn!(error = %err, "symmetric storage cipher unavailable"),
                }
            }
            Err(err) => warn!(error = %err, "device key pair unavailable"),
        }

        registry.select_current(options.write_format);
        match registry.current_tag() {
            Some(tag) => info!(tag, "selected storage cipher for writes"),
            None => warn!("no storage cipher available; writes will fail"),
        }
        registry
    }

    /// Add a cipher under its format tag, replacing any previous one.
    pub fn register(&mut self, cipher: Arc<dyn StorageCipher>) {
        self.ciphers.insert(cipher.format_tag().to_string(), cipher);
    }

    /// Pick the write cipher: the preferred symmetric format, then CBC, then
    /// the legacy sealed format.
    pub fn select_current(&mut self, preferred: WriteFormat) {
        self.current = [preferred.format_tag(), AES_CBC_TAG, LEGACY_SEALED_TAG]
            .into_iter()
            .find(|tag| self.ciphers.contains_key(*tag))
            .map(str::to_string);
    }

    pub fn current_tag(&self) -> Option<&str> {
        self.current.as_deref()
    }

    /// Cipher used for new writes.
    pub fn current(&self) -> Result<&Arc<dyn StorageCipher>, StorageError> {
        self.current
            .as_deref()
            .and_then(|tag| self.ciphers.get(tag))
            .ok_or_else(|| StorageError::NoUsableKey {
                reason: "no storage cipher could be initialized".to_string(),
            })
    }

    /// Cipher registered under exactly `tag`.
    pub fn get(&self, tag: &str) -> Result<&Arc<dyn StorageCipher>, StorageError> {
        if let Some(cipher) = self.ciphers.get(tag) {
            return Ok(cipher);
        }
        if KNOWN_TAGS.contains(&tag) {
            warn!(tag, "record format is known but its cipher is unavailable on this device");
        }
        Err(StorageError::UnknownFormatTag {
            tag: tag.to_string(),
        })
    }

    /// Registered tags, sorted.
    pub fn tags(&self) -> Vec<&str> {
        let mut tags: Vec<&str> = self.ciphers.keys().map(String::as_str).collect();
        tags.sort_unstable();
        tags
    }
}
