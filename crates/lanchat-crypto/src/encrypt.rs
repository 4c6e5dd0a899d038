use aes_gcm::{
    Aes256Gcm, Key, Nonce,
    aead::{Aead, KeyInit, OsRng, rand_core::RngCore},
};
use anyhow::{Result, anyhow};
use base64::{Engine as _, engine::general_purpose::STANDARD as BASE64};
use thiserror::Error;

/// Substituted for message content that no longer decrypts. History retrieval
/// must never fail on a corrupt record.
pub const DECRYPT_FALLBACK: &str = "Message decryption failed";

#[derive(Debug, Error)]
#[error("message decryption failed")]
pub struct DecryptError;

/// Process-wide symmetric cipher for message content at rest.
///
/// Tokens are `base64(nonce || ciphertext)` strings, so they fit in the TEXT
/// content column.
pub struct MessageCipher {
    cipher: Aes256Gcm,
}

impl MessageCipher {
    pub fn new(key: &[u8; 32]) -> Self {
        Self {
            cipher: Aes256Gcm::new(Key::<Aes256Gcm>::from_slice(key)),
        }
    }

    /// Encrypt plaintext into a storage token.
    pub fn encrypt(&self, plaintext: &str) -> Result<String> {
        let mut nonce_bytes = [0u8; 12];
        OsRng.fill_bytes(&mut nonce_bytes);
        let nonce = Nonce::from_slice(&nonce_bytes);

        let ciphertext = self
            .cipher
            .encrypt(nonce, plaintext.as_bytes())
            .map_err(|e| anyhow!("Encryption failed: {}", e))?;

        let mut token = Vec::with_capacity(12 + ciphertext.len());
        token.extend_from_slice(&nonce_bytes);
        token.extend_from_slice(&ciphertext);
        Ok(BASE64.encode(token))
    }

    /// Decrypt a storage token back to plaintext.
    pub fn decrypt(&self, token: &str) -> Result<String, DecryptError> {
        let raw = BASE64.decode(token).map_err(|_| DecryptError)?;
        if raw.len() < 12 {
            return Err(DecryptError);
        }
        let (nonce_bytes, ciphertext) = raw.split_at(12);
        let nonce = Nonce::from_slice(nonce_bytes);

        let plaintext = self
            .cipher
            .decrypt(nonce, ciphertext)
            .map_err(|_| DecryptError)?;
        String::from_utf8(plaintext).map_err(|_| DecryptError)
    }

    /// Decrypt, substituting the fallback string for corrupt records.
    pub fn decrypt_or_fallback(&self, token: &str) -> String {
        self.decrypt(token)
            .unwrap_or_else(|_| DECRYPT_FALLBACK.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::keys::generate_key;

    #[test]
    fn encrypt_decrypt_roundtrip() {
        let cipher = MessageCipher::new(&generate_key());
        let token = cipher.encrypt("hello over the LAN").unwrap();
        assert_ne!(token, "hello over the LAN");
        assert_eq!(cipher.decrypt(&token).unwrap(), "hello over the LAN");
    }

    #[test]
    fn wrong_key_fails() {
        let a = MessageCipher::new(&generate_key());
        let b = MessageCipher::new(&generate_key());
        let token = a.encrypt("secret").unwrap();
        assert!(b.decrypt(&token).is_err());
    }

    #[test]
    fn corrupt_token_falls_back_to_placeholder() {
        let cipher = MessageCipher::new(&generate_key());
        assert_eq!(cipher.decrypt_or_fallback("not base64!!"), DECRYPT_FALLBACK);
        assert_eq!(cipher.decrypt_or_fallback("AAAA"), DECRYPT_FALLBACK);
    }

    #[test]
    fn tokens_differ_per_encryption() {
        let cipher = MessageCipher::new(&generate_key());
        let a = cipher.encrypt("same").unwrap();
        let b = cipher.encrypt("same").unwrap();
        assert_ne!(a, b);
    }
}
