use std::fs;
use std::path::Path;

use aes_gcm::aead::OsRng;
use aes_gcm::aead::rand_core::RngCore;
use anyhow::{Context, Result, anyhow};
use base64::{Engine as _, engine::general_purpose::STANDARD as BASE64};
use tracing::info;

/// Generate a random 256-bit message key.
pub fn generate_key() -> [u8; 32] {
    let mut key = [0u8; 32];
    OsRng.fill_bytes(&mut key);
    key
}

/// Load the process-wide message key from `path`, creating and persisting a
/// fresh one on first start. The key lives outside the message store so a
/// database copy alone is not readable.
pub fn load_or_generate(path: &Path) -> Result<[u8; 32]> {
    if path.exists() {
        let encoded = fs::read_to_string(path)
            .with_context(|| format!("reading key file {}", path.display()))?;
        return key_from_base64(encoded.trim());
    }

    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)?;
    }
    let key = generate_key();
    fs::write(path, BASE64.encode(key))
        .with_context(|| format!("writing key file {}", path.display()))?;
    info!("Generated new message key at {}", path.display());
    Ok(key)
}

/// Decode a base64-encoded 256-bit key.
pub fn key_from_base64(encoded: &str) -> Result<[u8; 32]> {
    let bytes = BASE64.decode(encoded)?;
    let key: [u8; 32] = bytes
        .try_into()
        .map_err(|_| anyhow!("Invalid key length"))?;
    Ok(key)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn key_survives_base64_round_trip() {
        let key = generate_key();
        let decoded = key_from_base64(&BASE64.encode(key)).unwrap();
        assert_eq!(decoded, key);
    }

    #[test]
    fn load_or_generate_is_stable_across_calls() {
        let dir = std::env::temp_dir().join(format!("lanchat-key-test-{}", std::process::id()));
        let path = dir.join("chat.key");
        let first = load_or_generate(&path).unwrap();
        let second = load_or_generate(&path).unwrap();
        assert_eq!(first, second);
        let _ = fs::remove_dir_all(&dir);
    }
}
