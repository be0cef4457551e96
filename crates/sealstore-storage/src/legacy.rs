use std::sync::Arc;

use sealstore_core::storage::StorageError;

use crate::{cipher::StorageCipher, key_guard::DeviceKeyGuard};

/// Format tag of values sealed directly under the device key. Untagged records
/// from the single-cipher era are read with this cipher.
pub const LEGACY_SEALED_TAG: &str = "X25519/XSalsa20Poly1305/SealedBox";

/// Seals each value under the device key pair with no symmetric layer.
///
/// Kept for reading records written before the symmetric engine existed, and
/// as the write fallback when that engine cannot be constructed.
pub struct LegacySealedCipher {
    guard: Arc<DeviceKeyGuard>,
}

impl LegacySealedCipher {
    pub fn new(guard: Arc<DeviceKeyGuard>) -> Self {
        Self { guard }
    }
}

impl StorageCipher for LegacySealedCipher {
    fn format_tag(&self) -> &str {
        LEGACY_SEALED_TAG
    }

    fn encrypt(&self, plaintext: &[u8]) -> Result<Vec<u8>, StorageError> {
        self.guard.wrap(plaintext)
    }

    fn decrypt(&self, payload: &[u8]) -> Result<Vec<u8>, StorageError> {
        self.guard.unwrap(payload).map_err(|err| match err {
            StorageError::UnwrapFailed { reason } => StorageError::DecryptionFailed { reason },
            other => other,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::key_slot::InMemoryKeySlot;

    #[test]
    fn seals_values_under_device_key() {
        let guard = Arc::new(DeviceKeyGuard::new(InMemoryKeySlot::new()));
        let cipher = LegacySealedCipher::new(guard);
        let payload = cipher.encrypt(b"old school").unwrap();
        assert_eq!(cipher.decrypt(&payload).unwrap(), b"old school");

        let err = cipher.decrypt(&payload[..20]).expect_err("truncated");
        assert!(matches!(err, StorageError::DecryptionFailed { .. }));
    }
}
