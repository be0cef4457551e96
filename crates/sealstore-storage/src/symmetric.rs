//! Symmetric storage key and the AES ciphers built on it.
//!
//! The key is generated once, wrapped under the device key and persisted in
//! the backing map; later starts unwrap it and keep it in memory only.

use std::{fmt, sync::Arc};

use aes::{
    cipher::{block_padding::Pkcs7, BlockDecryptMut, BlockEncryptMut, KeyIvInit},
    Aes128, Aes256,
};
use aes_gcm::{
    aead::{Aead, AeadCore, KeyInit, Nonce, OsRng},
    Aes128Gcm, Aes256Gcm,
};
use rand::RngCore;
use sealstore_core::storage::{BackingMap, StorageError};
use tracing::{debug, info, warn};
use zeroize::Zeroizing;

use crate::{
    cipher::{decode_base64, encode_base64, StorageCipher},
    key_guard::DeviceKeyGuard,
};

/// Format tag of the default value cipher.
pub const AES_CBC_TAG: &str = "AES/CBC/PKCS7Padding";
/// Format tag of the authenticated value cipher.
pub const AES_GCM_TAG: &str = "AES/GCM/NoPadding";
/// Backing map key holding the wrapped symmetric key.
pub const WRAPPED_KEY_PREFERENCE: &str =
    "VGhpcyBpcyB0aGUga2V5IGZvciBhIHNlY3VyZSBzdG9yYWdlIEFFUyBLZXkK";

pub const IV_LEN: usize = 16;
const BLOCK_LEN: usize = 16;
const GCM_NONCE_LEN: usize = 12;
const GCM_TAG_LEN: usize = 16;

type Aes128CbcEnc = cbc::Encryptor<Aes128>;
type Aes128CbcDec = cbc::Decryptor<Aes128>;
type Aes256CbcEnc = cbc::Encryptor<Aes256>;
type Aes256CbcDec = cbc::Decryptor<Aes256>;

/// Size of a newly generated symmetric key.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum KeySize {
    #[default]
    Aes128,
    Aes256,
}

impl KeySize {
    pub fn from_bits(bits: u16) -> Option<Self> {
        match bits {
            128 => Some(Self::Aes128),
            256 => Some(Self::Aes256),
            _ => None,
        }
    }

    pub fn bits(self) -> u16 {
        match self {
            Self::Aes128 => 128,
            Self::Aes256 => 256,
        }
    }

    fn len(self) -> usize {
        usize::from(self.bits() / 8)
    }

    fn from_len(len: usize) -> Option<Self> {
        match len {
            16 => Some(Self::Aes128),
            32 => Some(Self::Aes256),
            _ => None,
        }
    }
}

/// Plaintext AES key, held in memory only and zeroized on drop.
pub struct SymmetricKey {
    size: KeySize,
    bytes: Zeroizing<Vec<u8>>,
}

impl fmt::Debug for SymmetricKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SymmetricKey")
            .field("bits", &self.size.bits())
            .finish_non_exhaustive()
    }
}

impl SymmetricKey {
    pub fn generate(size: KeySize) -> Self {
        let mut bytes = Zeroizing::new(vec![0u8; size.len()]);
        OsRng.fill_bytes(bytes.as_mut_slice());
        Self { size, bytes }
    }

    fn from_material(bytes: Zeroizing<Vec<u8>>) -> Result<Self, StorageError> {
        let size = KeySize::from_len(bytes.len()).ok_or_else(|| StorageError::UnwrapFailed {
            reason: format!("unwrapped key has {} bytes", bytes.len()),
        })?;
        Ok(Self { size, bytes })
    }

    pub fn size(&self) -> KeySize {
        self.size
    }

    /// Load the wrapped key from `map`, or generate, wrap and persist a new one.
    ///
    /// An existing key always wins over `size`. Fails with
    /// [`StorageError::NoUsableKey`] when the device key is unavailable.
    pub fn load_or_create(
        guard: &DeviceKeyGuard,
        map: &dyn BackingMap,
        size: KeySize,
    ) -> Result<Self, StorageError> {
        match map.get(WRAPPED_KEY_PREFERENCE)? {
            Some(encoded) => {
                let blob = decode_base64(&encoded).map_err(|e| StorageError::UnwrapFailed {
                    reason: format!("wrapped key is not base64: {e}"),
                })?;
                let material = Zeroizing::new(guard.unwrap(&blob).map_err(no_usable_key)?);
                let key = Self::from_material(material)?;
                if key.size != size {
                    warn!(
                        stored_bits = key.size.bits(),
                        configured_bits = size.bits(),
                        "keeping stored symmetric key size"
                    );
                }
                debug!(bits = key.size.bits(), "unwrapped symmetric storage key");
                Ok(key)
            }
            None => {
                let key = Self::generate(size);
                let blob = guard.wrap(&key.bytes).map_err(no_usable_key)?;
                map.put(WRAPPED_KEY_PREFERENCE, &encode_base64(&blob))?;
                map.commit()?;
                info!(bits = size.bits(), "generated symmetric storage key");
                Ok(key)
            }
        }
    }
}

fn no_usable_key(err: StorageError) -> StorageError {
    match err {
        StorageError::KeystoreUnavailable { reason } => StorageError::NoUsableKey { reason },
        other => other,
    }
}

/// AES-CBC with PKCS#7 padding; payload is `iv || ciphertext`.
///
/// Carries no authentication tag: tampering shows up only as a padding error
/// or a changed plaintext.
#[derive(Debug, Clone)]
pub struct AesCbcCipher {
    key: Arc<SymmetricKey>,
}

impl AesCbcCipher {
    /// Build the engine over the persisted (or freshly created) storage key.
    pub fn load(
        guard: &DeviceKeyGuard,
        map: &dyn BackingMap,
        size: KeySize,
    ) -> Result<Self, StorageError> {
        SymmetricKey::load_or_create(guard, map, size).map(|key| Self::with_key(Arc::new(key)))
    }

    pub fn with_key(key: Arc<SymmetricKey>) -> Self {
        Self { key }
    }

    pub fn key(&self) -> Arc<SymmetricKey> {
        Arc::clone(&self.key)
    }
}

impl StorageCipher for AesCbcCipher {
    fn format_tag(&self) -> &str {
        AES_CBC_TAG
    }

    fn encrypt(&self, plaintext: &[u8]) -> Result<Vec<u8>, StorageError> {
        let mut iv = [0u8; IV_LEN];
        OsRng.fill_bytes(&mut iv);

        let key = self.key.bytes.as_slice();
        let ciphertext = match self.key.size {
            KeySize::Aes128 => Aes128CbcEnc::new_from_slices(key, &iv)
                .map_err(cipher_init_err)?
                .encrypt_padded_vec_mut::<Pkcs7>(plaintext),
            KeySize::Aes256 => Aes256CbcEnc::new_from_slices(key, &iv)
                .map_err(cipher_init_err)?
                .encrypt_padded_vec_mut::<Pkcs7>(plaintext),
        };

        let mut out = Vec::with_capacity(IV_LEN + ciphertext.len());
        out.extend_from_slice(&iv);
        out.extend_from_slice(&ciphertext);
        Ok(out)
    }

    fn decrypt(&self, payload: &[u8]) -> Result<Vec<u8>, StorageError> {
        if payload.len() < IV_LEN + BLOCK_LEN || (payload.len() - IV_LEN) % BLOCK_LEN != 0 {
            return Err(StorageError::DecryptionFailed {
                reason: format!("invalid CBC payload length: {} bytes", payload.len()),
            });
        }

        let (iv, ciphertext) = payload.split_at(IV_LEN);
        let key = self.key.bytes.as_slice();
        let plaintext = match self.key.size {
            KeySize::Aes128 => Aes128CbcDec::new_from_slices(key, iv)
                .map_err(decipher_init_err)?
                .decrypt_padded_vec_mut::<Pkcs7>(ciphertext),
            KeySize::Aes256 => Aes256CbcDec::new_from_slices(key, iv)
                .map_err(decipher_init_err)?
                .decrypt_padded_vec_mut::<Pkcs7>(ciphertext),
        };

        plaintext.map_err(|_| StorageError::DecryptionFailed {
            reason: "invalid padding".to_string(),
        })
    }
}

/// AES-GCM over the same storage key; payload is `nonce || ciphertext || tag`.
#[derive(Debug, Clone)]
pub struct AesGcmCipher {
    key: Arc<SymmetricKey>,
}

impl AesGcmCipher {
    pub fn with_key(key: Arc<SymmetricKey>) -> Self {
        Self { key }
    }
}

impl StorageCipher for AesGcmCipher {
    fn format_tag(&self) -> &str {
        AES_GCM_TAG
    }

    fn encrypt(&self, plaintext: &[u8]) -> Result<Vec<u8>, StorageError> {
        match self.key.size {
            KeySize::Aes128 => gcm_seal::<Aes128Gcm>(&self.key.bytes, plaintext),
            KeySize::Aes256 => gcm_seal::<Aes256Gcm>(&self.key.bytes, plaintext),
        }
    }

    fn decrypt(&self, payload: &[u8]) -> Result<Vec<u8>, StorageError> {
        if payload.len() < GCM_NONCE_LEN + GCM_TAG_LEN {
            return Err(StorageError::DecryptionFailed {
                reason: format!("GCM payload too short: {} bytes", payload.len()),
            });
        }
        match self.key.size {
            KeySize::Aes128 => gcm_open::<Aes128Gcm>(&self.key.bytes, payload),
            KeySize::Aes256 => gcm_open::<Aes256Gcm>(&self.key.bytes, payload),
        }
    }
}

fn gcm_seal<C: Aead + AeadCore + KeyInit>(
    key: &[u8],
    plaintext: &[u8],
) -> Result<Vec<u8>, StorageError> {
    let cipher = C::new_from_slice(key).map_err(cipher_init_err)?;
    let nonce = C::generate_nonce(&mut OsRng);
    let ciphertext = cipher
        .encrypt(&nonce, plaintext)
        .map_err(|e| StorageError::EncryptionFailed {
            reason: format!("encrypt failed: {e}"),
        })?;

    let mut out = Vec::with_capacity(nonce.len() + ciphertext.len());
    out.extend_from_slice(&nonce);
    out.extend_from_slice(&ciphertext);
    Ok(out)
}

fn gcm_open<C: Aead + AeadCore + KeyInit>(
    key: &[u8],
    payload: &[u8],
) -> Result<Vec<u8>, StorageError> {
    let cipher = C::new_from_slice(key).map_err(decipher_init_err)?;
    let (nonce, ciphertext) = payload.split_at(GCM_NONCE_LEN);
    cipher
        .decrypt(Nonce::<C>::from_slice(nonce), ciphertext)
        .map_err(|_| StorageError::DecryptionFailed {
            reason: "authentication failed (wrong key or tampered data)".to_string(),
        })
}

fn cipher_init_err<E: fmt::Display>(err: E) -> StorageError {
    StorageError::EncryptionFailed {
        reason: format!("cipher init failed: {err}"),
    }
}

fn decipher_init_err<E: fmt::Display>(err: E) -> StorageError {
    StorageError::DecryptionFailed {
        reason: format!("cipher init failed: {err}"),
    }
}
