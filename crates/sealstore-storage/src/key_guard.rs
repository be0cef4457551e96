//! Device key pair management.
//!
//! The guard keeps an X25519 key pair whose secret half lives in a [`KeySlot`]
//! and exposes only wrap/unwrap. Wrapping is an anonymous sealed box: a fresh
//! ephemeral key agrees a shared secret with the device public key, and the
//! material is sealed with XSalsa20-Poly1305 under a random nonce.

use std::sync::{Mutex, MutexGuard};

use base64::{engine::general_purpose::STANDARD, Engine as _};
use crypto_box::{aead::Aead, Nonce, PublicKey, SalsaBox, SecretKey};
use rand::{rngs::OsRng, RngCore};
use sealstore_core::{keystore::KeySlot, storage::StorageError};
use tracing::{debug, info};
use zeroize::Zeroizing;

const KEY_LEN: usize = 32;
const NONCE_LEN: usize = 24;
const TAG_LEN: usize = 16;

/// Smallest wrapped blob: ephemeral public key, nonce and an empty sealed body.
pub const MIN_WRAPPED_LEN: usize = KEY_LEN + NONCE_LEN + TAG_LEN;

pub struct DeviceKeyGuard {
    slot: Box<dyn KeySlot>,
    secret: Mutex<Option<SecretKey>>,
}

impl DeviceKeyGuard {
    pub fn new(slot: impl KeySlot + 'static) -> Self {
        Self {
            slot: Box::new(slot),
            secret: Mutex::new(None),
        }
    }

    /// Create the device key pair if the slot holds none. Idempotent.
    pub fn ensure_key_pair(&self) -> Result<(), StorageError> {
        self.with_secret(|_| Ok(()))
    }

    /// Load the stored device key pair without ever creating one. An empty
    /// slot gives `KeystoreUnavailable`.
    pub fn load_key_pair(&self) -> Result<(), StorageError> {
        self.access(false, |_| Ok(()))
    }

    /// Seal key material under the device public key.
    ///
    /// Output is `ephemeral_pk || nonce || ciphertext` and differs on every call.
    pub fn wrap(&self, material: &[u8]) -> Result<Vec<u8>, StorageError> {
        let public = self.with_secret(|secret| Ok(secret.public_key()))?;
        let ephemeral = SecretKey::generate(&mut OsRng);

        let mut nonce = [0u8; NONCE_LEN];
        OsRng.fill_bytes(&mut nonce);

        let sealed = SalsaBox::new(&public, &ephemeral)
            .encrypt(Nonce::from_slice(&nonce), material)
            .map_err(|e| StorageError::EncryptionFailed {
                reason: format!("seal failed: {e}"),
            })?;

        let mut out = Vec::with_capacity(KEY_LEN + NONCE_LEN + sealed.len());
        out.extend_from_slice(ephemeral.public_key().as_bytes());
        out.extend_from_slice(&nonce);
        out.extend_from_slice(&sealed);
        Ok(out)
    }

    /// Open a blob produced by [`DeviceKeyGuard::wrap`].
    pub fn unwrap(&self, blob: &[u8]) -> Result<Vec<u8>, StorageError> {
        if blob.len() < MIN_WRAPPED_LEN {
            return Err(StorageError::UnwrapFailed {
                reason: format!(
                    "wrapped blob too short: {} bytes, need at least {MIN_WRAPPED_LEN}",
                    blob.len()
                ),
            });
        }

        let (ephemeral, rest) = blob.split_at(KEY_LEN);
        let (nonce, sealed) = rest.split_at(NONCE_LEN);
        let mut ephemeral_bytes = [0u8; KEY_LEN];
        ephemeral_bytes.copy_from_slice(ephemeral);
        let ephemeral = PublicKey::from(ephemeral_bytes);

        self.with_secret(|secret| {
            SalsaBox::new(&ephemeral, secret)
                .decrypt(Nonce::from_slice(nonce), sealed)
                .map_err(|_| StorageError::UnwrapFailed {
                    reason: "device key rejected wrapped blob".to_string(),
                })
        })
    }

    fn with_secret<T>(
        &self,
        op: impl FnOnce(&SecretKey) -> Result<T, StorageError>,
    ) -> Result<T, StorageError> {
        self.access(true, op)
    }

    fn access<T>(
        &self,
        generate: bool,
        op: impl FnOnce(&SecretKey) -> Result<T, StorageError>,
    ) -> Result<T, StorageError> {
        let mut cached = self.lock()?;
        if let Some(secret) = cached.as_ref() {
            return op(secret);
        }

        let secret = match self.slot.load()? {
            Some(encoded) => {
                debug!("loaded device key pair");
                decode_secret(&encoded)?
            }
            None if !generate => {
                return Err(StorageError::keystore("device key pair missing from key slot"));
            }
            None => {
                let secret = SecretKey::generate(&mut OsRng);
                let encoded = Zeroizing::new(STANDARD.encode(secret.to_bytes()));
                self.slot.store(&encoded)?;
                info!("generated device key pair");
                secret
            }
        };

        op(cached.insert(secret))
    }

    fn lock(&self) -> Result<MutexGuard<'_, Option<SecretKey>>, StorageError> {
        self.secret
            .lock()
            .map_err(|err| StorageError::keystore(format!("lock poisoned: {err}")))
    }
}

fn decode_secret(encoded: &str) -> Result<SecretKey, StorageError> {
    let bytes = Zeroizing::new(STANDARD.decode(encoded.trim()).map_err(|e| {
        StorageError::KeystoreUnavailable {
            reason: format!("stored device key is not base64: {e}"),
        }
    })?);

    if bytes.len() != KEY_LEN {
        return Err(StorageError::KeystoreUnavailable {
            reason: format!(
                "stored device key has {} bytes, expected {KEY_LEN}",
                bytes.len()
            ),
        });
    }

    let mut out = [0u8; KEY_LEN];
    out.copy_from_slice(&bytes);
    let secret = SecretKey::from(out);
    zeroize::Zeroize::zeroize(&mut out);
    Ok(secret)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::key_slot::InMemoryKeySlot;

    #[test]
    fn ensure_key_pair_is_idempotent() {
        let slot = InMemoryKeySlot::new();
        let guard = DeviceKeyGuard::new(slot.clone());

        guard.ensure_key_pair().expect("first ensure");
        let stored = slot.load().unwrap().expect("secret stored");
        guard.ensure_key_pair().expect("second ensure");

        // A fresh guard over the same slot reuses the stored pair.
        DeviceKeyGuard::new(slot.clone())
            .ensure_key_pair()
            .expect("ensure from new guard");
        assert_eq!(slot.load().unwrap().as_deref(), Some(stored.as_str()));
    }

    #[test]
    fn wrap_round_trips_and_varies() {
        let guard = DeviceKeyGuard::new(InMemoryKeySlot::new());
        let material = [42u8; 16];

        let first = guard.wrap(&material).expect("wrap");
        let second = guard.wrap(&material).expect("wrap again");
        assert_ne!(first, second);
        assert_eq!(first.len(), MIN_WRAPPED_LEN + material.len());

        assert_eq!(guard.unwrap(&first).expect("unwrap"), material);
        assert_eq!(guard.unwrap(&second).expect("unwrap"), material);
    }

    #[test]
    fn unwrap_survives_restart_with_same_slot() {
        let slot = InMemoryKeySlot::new();
        let blob = DeviceKeyGuard::new(slot.clone()).wrap(b"key").unwrap();

        let reopened = DeviceKeyGuard::new(slot);
        assert_eq!(reopened.unwrap(&blob).unwrap(), b"key");
    }

    #[test]
    fn unwrap_rejects_short_and_foreign_blobs() {
        let guard = DeviceKeyGuard::new(InMemoryKeySlot::new());
        let err = guard.unwrap(&[0u8; 10]).expect_err("short blob");
        assert!(matches!(err, StorageError::UnwrapFailed { .. }));

        let foreign = DeviceKeyGuard::new(InMemoryKeySlot::new())
            .wrap(b"key")
            .unwrap();
        let err = guard.unwrap(&foreign).expect_err("foreign blob");
        assert!(matches!(err, StorageError::UnwrapFailed { .. }));
    }

    #[test]
    fn unavailable_slot_surfaces_keystore_error() {
        let guard = DeviceKeyGuard::new(InMemoryKeySlot::unavailable());
        let err = guard.ensure_key_pair().expect_err("should fail");
        assert!(matches!(err, StorageError::KeystoreUnavailable { .. }));
    }

    #[test]
    fn load_key_pair_never_generates() {
        let slot = InMemoryKeySlot::new();
        let guard = DeviceKeyGuard::new(slot.clone());

        let err = guard.load_key_pair().expect_err("empty slot");
        assert!(matches!(err, StorageError::KeystoreUnavailable { .. }));
        assert_eq!(slot.load().unwrap(), None);

        guard.ensure_key_pair().expect("ensure");
        DeviceKeyGuard::new(slot)
            .load_key_pair()
            .expect("load stored pair");
    }

    #[test]
    fn corrupt_stored_secret_is_not_replaced() {
        let slot = InMemoryKeySlot::new();
        slot.store("abcd").unwrap();

        let err = DeviceKeyGuard::new(slot.clone())
            .ensure_key_pair()
            .expect_err("corrupt secret");
        assert!(matches!(err, StorageError::KeystoreUnavailable { .. }));
        assert_eq!(slot.load().unwrap().as_deref(), Some("abcd"));
    }
}
