use base64::{engine::general_purpose::STANDARD, Engine as _};
use sealstore_core::storage::StorageError;

/// A cipher able to produce and read one stored record format.
///
/// The format tag is embedded in every record the cipher writes and is how the
/// registry routes a record back to it on read.
pub trait StorageCipher: Send + Sync {
    /// Identifier written in front of each record, e.g. `AES/CBC/PKCS7Padding`.
    fn format_tag(&self) -> &str;

    fn encrypt(&self, plaintext: &[u8]) -> Result<Vec<u8>, StorageError>;

    fn decrypt(&self, payload: &[u8]) -> Result<Vec<u8>, StorageError>;
}

pub(crate) fn encode_base64(bytes: &[u8]) -> String {
    STANDARD.encode(bytes)
}

/// Decode standard base64, ignoring line breaks and other ASCII whitespace
/// that older writers wrapped their output with.
pub(crate) fn decode_base64(text: &str) -> Result<Vec<u8>, base64::DecodeError> {
    if text.bytes().any(|b| b.is_ascii_whitespace()) {
        let compact: String = text.chars().filter(|c| !c.is_ascii_whitespace()).collect();
        STANDARD.decode(compact)
    } else {
        STANDARD.decode(text)
    }
}
