//! Envelope-encrypted key/value storage.
//!
//! A device X25519 key pair held in the OS keyring wraps a random AES key; the
//! AES key encrypts values, which are stored as tagged base64 records in a
//! string map. Older records sealed directly under the device key stay
//! readable through the legacy cipher.

pub mod cipher;
pub mod dispatch;
pub mod entry_store;
pub mod file_map;
pub mod key_guard;
pub mod key_slot;
pub mod legacy;
pub mod registry;
pub mod symmetric;
