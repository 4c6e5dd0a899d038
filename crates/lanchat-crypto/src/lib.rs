/// At-rest message encryption.
///
/// The server holds one process-wide AES-256-GCM key, persisted as a base64
/// file next to the database. Message content is encrypted before it touches
/// the store and decrypted only when building delivery payloads.
pub mod encrypt;
pub mod keys;

pub use encrypt::{DECRYPT_FALLBACK, DecryptError, MessageCipher};
