use aes_gcm::aead::{Aead, OsRng};
use aes_gcm::{AeadCore, Aes256Gcm, Key, KeyInit, Nonce};
use anyhow::{Context, Result};
use base64::Engine as _;
use hkdf::Hkdf;
use sha2::Sha256;

/// Derive a 256-bit AES key using HKDF-SHA256.
///
/// The salt and info strings are fixed per-application, so the same
/// `key_str` always produces the same derived key.
fn derive_key(key_str: &str) -> Key<Aes256Gcm> {
    let hkdf = Hkdf::<Sha256>::new(Some(b"lanwatch-db-encryption"), key_str.as_bytes());
    let mut okm = [0u8; 32];
    hkdf.expand(b"aes-256-gcm-key", &mut okm)
        .expect("HKDF-SHA256 expand to 32 bytes cannot fail");
    #[allow(deprecated)]
    *Key::<Aes256Gcm>::from_slice(&okm)
}

/// Encrypt plaintext with AES-256-GCM. Returns base64(nonce || ciphertext).
pub fn encrypt(plaintext: &str, key_str: &str) -> Result<String> {
    let key = derive_key(key_str);
    let cipher = Aes256Gcm::new(&key);
    let nonce = Aes256Gcm::generate_nonce(&mut OsRng);
    let ciphertext = cipher
        .encrypt(&nonce, plaintext.as_bytes())
        .map_err(|e| anyhow::anyhow!("encryption failed: {e}"))?;

    let mut combined = nonce.to_vec();
    combined.extend_from_slice(&ciphertext);
    Ok(base64::engine::general_purpose::STANDARD.encode(&combined))
}

/// Decrypt base64(nonce || ciphertext) with AES-256-GCM.
pub fn decrypt(encrypted: &str, key_str: &str) -> Result<String> {
    let key = derive_key(key_str);
    let cipher = Aes256Gcm::new(&key);
    let combined = base64::engine::general_purpose::STANDARD
        .decode(encrypted)
        .context("invalid base64")?;

    if combined.len() < 12 {
        anyhow::bail!("ciphertext too short");
    }

    let (nonce_bytes, ciphertext) = combined.split_at(12);
    #[allow(deprecated)]
    let nonce = Nonce::from_slice(nonce_bytes);
    let plaintext = cipher
        .decrypt(nonce, ciphertext)
        .map_err(|_| anyhow::anyhow!("decryption failed — wrong key or corrupted data"))?;

    String::from_utf8(plaintext).context("decrypted value is not valid UTF-8")
}

#[cfg(test)]
mod tests {
    use super::*;

    const TEST_KEY: &str = "test-encryption-key-with-enough-entropy";

    #[test]
    fn encrypt_decrypt_roundtrip() {
        let plaintext = "public";
        let encrypted = encrypt(plaintext, TEST_KEY).unwrap();
        let decrypted = decrypt(&encrypted, TEST_KEY).unwrap();
        assert_eq!(decrypted, plaintext);
    }

    #[test]
    fn decrypt_with_wrong_key_fails() {
        let encrypted = encrypt("secret-community", TEST_KEY).unwrap();
        let result = decrypt(&encrypted, "wrong-key");
        assert!(result.is_err());
    }

    #[test]
    fn decrypt_with_invalid_base64_fails() {
        let result = decrypt("not-valid-base64!!!", TEST_KEY);
        assert!(result.is_err());
    }

    #[test]
    fn decrypt_with_truncated_ciphertext_fails() {
        let encrypted = encrypt("secret", TEST_KEY).unwrap();
        let bytes = base64::engine::general_purpose::STANDARD
            .decode(&encrypted)
            .unwrap();
        let truncated = base64::engine::general_purpose::STANDARD.encode(&bytes[..8]);
        let result = decrypt(&truncated, TEST_KEY);
        assert!(result.is_err());
    }

    #[test]
    fn same_plaintext_same_key_produces_different_ciphertexts() {
        let a = encrypt("same-input", TEST_KEY).unwrap();
        let b = encrypt("same-input", TEST_KEY).unwrap();
        assert_ne!(a, b, "random nonce should produce different ciphertexts");
    }

    #[test]
    fn derive_key_is_deterministic() {
        let k1 = derive_key("my-key");
        let k2 = derive_key("my-key");
        assert_eq!(k1, k2);
    }
}
