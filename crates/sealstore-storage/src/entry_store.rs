use std::sync::Arc;

use sealstore_core::{
    keystore::KeySlot,
    storage::{BackingMap, StorageError},
};
use tracing::{debug, instrument};

use crate::{
    cipher::{decode_base64, encode_base64},
    key_guard::DeviceKeyGuard,
    legacy::LEGACY_SEALED_TAG,
    registry::{CipherRegistry, StoreOptions},
};

/// Fixed, non-secret namespace prefix for entries in the backing map.
pub const KEY_PREFIX: &str = "VGhpcyBpcyB0aGUgcHJlZml4IGZvciBhIHNlY3VyZSBzdG9yYWdlCg";

const TAG_DELIMITER: char = ':';

/// Encrypted string store over a host-provided backing map.
///
/// Each value is stored as `:<format tag>:<base64 payload>` under
/// `<prefix>_<key>`. Every mutation commits before returning.
pub struct EntryStore<M: BackingMap> {
    map: M,
    registry: CipherRegistry,
}

impl<M: BackingMap> EntryStore<M> {
    /// Open a store whose device key lives in `key_slot`.
    pub fn open(map: M, key_slot: impl KeySlot + 'static, options: StoreOptions) -> Self {
        Self::with_guard(map, Arc::new(DeviceKeyGuard::new(key_slot)), options)
    }

    pub fn with_guard(map: M, guard: Arc<DeviceKeyGuard>, options: StoreOptions) -> Self {
        let registry = CipherRegistry::build(guard, &map, options);
        Self { map, registry }
    }

    pub fn with_registry(map: M, registry: CipherRegistry) -> Self {
        Self { map, registry }
    }

    pub fn registry(&self) -> &CipherRegistry {
        &self.registry
    }

    pub fn backing_map(&self) -> &M {
        &self.map
    }

    /// Encrypt and persist `value` under `key`, overwriting any existing entry.
    #[instrument(level = "debug", skip_all, fields(key = %key))]
    pub fn put(&self, key: &str, value: &str) -> Result<(), StorageError> {
        let cipher = self.registry.current()?;
        let payload = cipher.encrypt(value.as_bytes())?;
        let record = format!(
            "{TAG_DELIMITER}{}{TAG_DELIMITER}{}",
            cipher.format_tag(),
            encode_base64(&payload)
        );

        self.map.put(&prefixed(key), &record)?;
        self.map.commit()?;
        debug!(tag = cipher.format_tag(), "stored entry");
        Ok(())
    }

    /// Read and decrypt the value under `key`; `None` when nothing is stored.
    #[instrument(level = "debug", skip_all, fields(key = %key))]
    pub fn get(&self, key: &str) -> Result<Option<String>, StorageError> {
        let Some(record) = self.map.get(&prefixed(key))? else {
            return Ok(None);
        };

        let (tag, encoded) = parse_record(&record)?;
        let cipher = self.registry.get(tag)?;
        let payload = decode_base64(encoded).map_err(|e| StorageError::MalformedRecord {
            reason: format!("payload is not base64: {e}"),
        })?;
        let plaintext = cipher.decrypt(&payload)?;

        String::from_utf8(plaintext)
            .map(Some)
            .map_err(|_| StorageError::DecryptionFailed {
                reason: "plaintext is not valid UTF-8".to_string(),
            })
    }

    /// Whether a record exists under `key`, without decrypting it.
    pub fn contains(&self, key: &str) -> Result<bool, StorageError> {
        Ok(self.map.get(&prefixed(key))?.is_some())
    }

    /// Remove `key` (idempotent).
    #[instrument(level = "debug", skip_all, fields(key = %key))]
    pub fn delete(&self, key: &str) -> Result<(), StorageError> {
        self.map.remove(&prefixed(key))?;
        self.map.commit()
    }

    /// Read several keys; each position holds that key's value or `None`.
    pub fn get_all<K: AsRef<str>>(&self, keys: &[K]) -> Result<Vec<Option<String>>, StorageError> {
        keys.iter().map(|key| self.get(key.as_ref())).collect()
    }

    /// Write several entries; a `None` value deletes that key.
    ///
    /// Each key commits independently, so a failure part way leaves earlier
    /// entries written.
    pub fn put_all<I, K, V>(&self, entries: I) -> Result<(), StorageError>
    where
        I: IntoIterator<Item = (K, Option<V>)>,
        K: AsRef<str>,
        V: AsRef<str>,
    {
        for (key, value) in entries {
            match value {
                Some(value) => self.put(key.as_ref(), value.as_ref())?,
                None => self.delete(key.as_ref())?,
            }
        }
        Ok(())
    }

    pub fn delete_all<K: AsRef<str>>(&self, keys: &[K]) -> Result<(), StorageError> {
        keys.iter().try_for_each(|key| self.delete(key.as_ref()))
    }
}

/// Backing map key for a logical key.
pub fn prefixed(key: &str) -> String {
    format!("{KEY_PREFIX}_{key}")
}

/// Split a stored record into its format tag and base64 payload.
///
/// Records without a leading delimiter predate format tags and belong to the
/// legacy cipher.
fn parse_record(record: &str) -> Result<(&str, &str), StorageError> {
    if !record.starts_with(TAG_DELIMITER) {
        return Ok((LEGACY_SEALED_TAG, record));
    }

    let mut parts = record.splitn(3, TAG_DELIMITER).skip(1);
    match (parts.next(), parts.next()) {
        (Some(tag), Some(encoded)) => Ok((tag, encoded)),
        _ => Err(StorageError::MalformedRecord {
            reason: "missing payload after format tag".to_string(),
        }),
    }
}

#[cfg(test)]
mod tests {
    use std::collections::BTreeMap;

    use proptest::prelude::*;
    use sealstore_core::{keystore::KeySlot, storage::InMemoryBackingMap};

    use super::*;
    use crate::{
        cipher::StorageCipher,
        file_map::FileBackingMap,
        key_slot::InMemoryKeySlot,
        legacy::LegacySealedCipher,
        registry::WriteFormat,
        symmetric::{AES_CBC_TAG, AES_GCM_TAG},
    };

    fn open(map: &InMemoryBackingMap, slot: &InMemoryKeySlot) -> EntryStore<InMemoryBackingMap> {
        EntryStore::open(map.clone(), slot.clone(), StoreOptions::default())
    }

    fn fresh() -> EntryStore<InMemoryBackingMap> {
        open(&InMemoryBackingMap::new(), &InMemoryKeySlot::new())
    }

    #[test]
    fn round_trip_encrypts_at_rest() {
        let store = fresh();
        store.put("session", "hello-sealstore").expect("put");
        assert_eq!(store.get("session").expect("get").as_deref(), Some("hello-sealstore"));

        let raw = store
            .backing_map()
            .get(&prefixed("session"))
            .unwrap()
            .expect("record");
        assert!(raw.starts_with(&format!(":{AES_CBC_TAG}:")));
        assert!(!raw.contains("hello-sealstore"), "plaintext must not be stored");
    }

    #[test]
    fn every_write_commits() {
        let map = InMemoryBackingMap::new();
        let store = open(&map, &InMemoryKeySlot::new());
        let before = map.commit_count();

        store.put("a", "1").unwrap();
        store.delete("a").unwrap();
        assert_eq!(map.commit_count(), before + 2);
    }

    #[test]
    fn missing_key_reads_as_none() {
        let store = fresh();
        assert_eq!(store.get("nope").expect("get"), None);
        assert!(!store.contains("nope").unwrap());
    }

    #[test]
    fn delete_then_get_is_none() {
        let store = fresh();
        store.put("k", "v").unwrap();
        assert!(store.contains("k").unwrap());
        store.delete("k").expect("delete");
        store.delete("k").expect("delete again");
        assert_eq!(store.get("k").unwrap(), None);
    }

    #[test]
    fn records_survive_restart() {
        let map = InMemoryBackingMap::new();
        let slot = InMemoryKeySlot::new();
        open(&map, &slot).put("token", "abc123").unwrap();

        let reopened = open(&map, &slot);
        assert_eq!(reopened.get("token").unwrap().as_deref(), Some("abc123"));
    }

    #[test]
    fn reads_untagged_legacy_records() {
        let map = InMemoryBackingMap::new();
        let slot = InMemoryKeySlot::new();
        let store = open(&map, &slot);

        let legacy = LegacySealedCipher::new(Arc::new(DeviceKeyGuard::new(slot.clone())));
        let payload = legacy.encrypt("from the old days".as_bytes()).unwrap();
        map.put(&prefixed("old"), &encode_base64(&payload)).unwrap();

        assert_eq!(store.get("old").unwrap().as_deref(), Some("from the old days"));
    }

    #[test]
    fn reads_line_wrapped_legacy_records() {
        let map = InMemoryBackingMap::new();
        let slot = InMemoryKeySlot::new();
        let store = open(&map, &slot);

        let legacy = LegacySealedCipher::new(Arc::new(DeviceKeyGuard::new(slot.clone())));
        let value = "x".repeat(80);
        let encoded = encode_base64(&legacy.encrypt(value.as_bytes()).unwrap());
        let wrapped = format!("{}\n{}\n", &encoded[..76], &encoded[76..]);
        map.put(&prefixed("wrapped"), &wrapped).unwrap();

        assert_eq!(store.get("wrapped").unwrap(), Some(value));
    }

    #[test]
    fn unknown_tag_fails_instead_of_returning_none() {
        let store = fresh();
        store
            .backing_map()
            .put(&prefixed("k"), ":ROT13:AAAA")
            .unwrap();

        let err = store.get("k").expect_err("unknown tag");
        assert_eq!(
            err,
            StorageError::UnknownFormatTag {
                tag: "ROT13".to_string()
            }
        );
    }

    #[test]
    fn malformed_records_are_reported() {
        let store = fresh();
        let map = store.backing_map();

        map.put(&prefixed("no-payload"), &format!(":{AES_CBC_TAG}")).unwrap();
        let err = store.get("no-payload").expect_err("missing payload");
        assert!(matches!(err, StorageError::MalformedRecord { .. }));

        map.put(&prefixed("bad-b64"), &format!(":{AES_CBC_TAG}:***")).unwrap();
        let err = store.get("bad-b64").expect_err("bad base64");
        assert!(matches!(err, StorageError::MalformedRecord { .. }));
    }

    #[test]
    fn tampered_record_never_returns_original() {
        let store = fresh();
        store.put("k", "sensitive value").unwrap();

        let map = store.backing_map();
        let raw = map.get(&prefixed("k")).unwrap().unwrap();
        let encoded = raw.rsplit(':').next().unwrap();
        let mut payload = decode_base64(encoded).unwrap();
        let last = payload.len() - 1;
        payload[last] ^= 0x80;
        map.put(&prefixed("k"), &format!(":{AES_CBC_TAG}:{}", encode_base64(&payload)))
            .unwrap();

        match store.get("k") {
            Ok(value) => assert_ne!(value.as_deref(), Some("sensitive value")),
            Err(err) => assert!(matches!(err, StorageError::DecryptionFailed { .. })),
        }
    }

    #[test]
    fn put_all_deletes_none_values() {
        let store = fresh();
        store.put("k2", "old").unwrap();

        let mut entries = BTreeMap::new();
        entries.insert("k1", Some("v1"));
        entries.insert("k2", None);
        store.put_all(entries).expect("put_all");

        assert_eq!(store.get("k1").unwrap().as_deref(), Some("v1"));
        assert_eq!(store.get("k2").unwrap(), None);
    }

    #[test]
    fn get_all_and_delete_all_keep_positions() {
        let store = fresh();
        store.put("a", "1").unwrap();
        store.put("c", "3").unwrap();

        let values = store.get_all(&["a", "b", "c"]).unwrap();
        assert_eq!(values, vec![Some("1".to_string()), None, Some("3".to_string())]);

        store.delete_all(&["a", "c"]).unwrap();
        assert_eq!(store.get_all(&["a", "c"]).unwrap(), vec![None, None]);
    }

    #[test]
    fn gcm_records_stay_readable_under_cbc_writes() {
        let map = InMemoryBackingMap::new();
        let slot = InMemoryKeySlot::new();
        let gcm = EntryStore::open(
            map.clone(),
            slot.clone(),
            StoreOptions {
                write_format: WriteFormat::AesGcm,
                ..StoreOptions::default()
            },
        );
        gcm.put("k", "authenticated").unwrap();
        let raw = map.get(&prefixed("k")).unwrap().unwrap();
        assert!(raw.starts_with(&format!(":{AES_GCM_TAG}:")));

        let cbc = open(&map, &slot);
        assert_eq!(cbc.get("k").unwrap().as_deref(), Some("authenticated"));
    }

    #[test]
    fn unavailable_keystore_fails_writes_but_reads_absent_keys() {
        let store = open(&InMemoryBackingMap::new(), &InMemoryKeySlot::unavailable());

        let err = store.put("k", "v").expect_err("no cipher");
        assert!(matches!(err, StorageError::NoUsableKey { .. }));
        assert_eq!(store.get("k").unwrap(), None);
    }

    #[test]
    fn unavailable_keystore_reports_stored_records_as_unknown_format() {
        let map = InMemoryBackingMap::new();
        open(&map, &InMemoryKeySlot::new()).put("k", "v").unwrap();

        let store = open(&map, &InMemoryKeySlot::unavailable());
        let err = store.get("k").expect_err("cbc unregistered");
        assert_eq!(
            err,
            StorageError::UnknownFormatTag {
                tag: AES_CBC_TAG.to_string()
            }
        );
    }

    #[test]
    fn falls_back_to_legacy_writes_after_key_replacement() {
        let map = InMemoryBackingMap::new();
        let slot = InMemoryKeySlot::new();
        open(&map, &slot).put("before", "v1").unwrap();

        slot.reset();
        DeviceKeyGuard::new(slot.clone())
            .ensure_key_pair()
            .expect("replacement key pair");
        let store = open(&map, &slot);
        store.put("after", "v2").unwrap();

        let raw = map.get(&prefixed("after")).unwrap().unwrap();
        assert!(raw.starts_with(&format!(":{LEGACY_SEALED_TAG}:")));
        assert_eq!(store.get("after").unwrap().as_deref(), Some("v2"));

        let err = store.get("before").expect_err("old key lost");
        assert!(matches!(err, StorageError::UnknownFormatTag { .. }));
    }

    #[test]
    fn lost_device_key_is_not_regenerated() {
        let map = InMemoryBackingMap::new();
        let slot = InMemoryKeySlot::new();
        open(&map, &slot).put("before", "v1").unwrap();

        slot.reset();
        let store = open(&map, &slot);

        let err = store.put("after", "v2").expect_err("no cipher");
        assert!(matches!(err, StorageError::NoUsableKey { .. }));
        assert_eq!(slot.load().unwrap(), None);
        assert!(!store.contains("after").unwrap());
        assert!(store.contains("before").unwrap());
    }

    #[test]
    fn failed_commit_keeps_previous_value() {
        let dir = tempfile::tempdir().expect("tempdir");
        let parent = dir.path().join("data");
        let map = FileBackingMap::open(parent.join("store.json")).unwrap();
        let store = EntryStore::open(map, InMemoryKeySlot::new(), StoreOptions::default());
        store.put("k", "v1").expect("first put");

        std::fs::remove_dir_all(&parent).unwrap();
        std::fs::write(&parent, "not a directory").unwrap();

        let err = store.put("k", "v2").expect_err("commit fails");
        assert!(matches!(err, StorageError::Backing { .. }));
        assert_eq!(store.get("k").unwrap().as_deref(), Some("v1"));
    }

    #[test]
    fn parse_record_splits_on_first_two_delimiters() {
        assert_eq!(parse_record(":TAG:abc").unwrap(), ("TAG", "abc"));
        assert_eq!(parse_record(":TAG:a:b").unwrap(), ("TAG", "a:b"));
        assert_eq!(parse_record("abc").unwrap(), (LEGACY_SEALED_TAG, "abc"));
        assert!(parse_record(":TAG").is_err());
    }

    proptest! {
        #![proptest_config(ProptestConfig::with_cases(48))]

        #[test]
        fn round_trips_printable_text(key in "[a-zA-Z0-9_./-]{1,24}", value in "\\PC{0,64}") {
            let store = fresh();
            store.put(&key, &value).unwrap();
            prop_assert_eq!(store.get(&key).unwrap(), Some(value));
        }
    }
}
