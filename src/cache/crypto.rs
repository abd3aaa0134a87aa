//! Record Encryption Module
//!
//! AES-256-GCM sealing of persisted cache values. A sealed record is the
//! base64 encoding of `nonce || ciphertext`.

use aes_gcm::aead::{Aead, KeyInit};
use aes_gcm::{Aes256Gcm, Nonce};
use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine;
use rand::rngs::OsRng;
use rand::RngCore;

use crate::error::CacheError;

/// Length of an AES-256 key in bytes.
pub const KEY_LEN: usize = 32;

const NONCE_LEN: usize = 12;

// == Record Cipher ==
/// Symmetric cipher used by the persistent tier.
pub struct RecordCipher {
    cipher: Aes256Gcm,
}

impl std::fmt::Debug for RecordCipher {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RecordCipher")
            .field("key", &"[REDACTED]")
            .finish()
    }
}

impl RecordCipher {
    /// Creates a cipher from a raw 32-byte key.
    pub fn new(key: &[u8]) -> Result<Self, CacheError> {
        if key.len() != KEY_LEN {
            return Err(CacheError::Crypto(format!(
                "Encryption key must be exactly {} bytes, got {}",
                KEY_LEN,
                key.len()
            )));
        }

        let cipher = Aes256Gcm::new_from_slice(key)
            .map_err(|e| CacheError::Crypto(format!("Failed to create cipher: {e}")))?;
        Ok(Self { cipher })
    }

    /// Generates a random 32-byte key.
    pub fn generate_key() -> Vec<u8> {
        let mut key = vec![0u8; KEY_LEN];
        OsRng.fill_bytes(&mut key);
        key
    }

    // == Seal ==
    /// Encrypts `plaintext` under a fresh nonce and returns the base64 payload.
    pub fn seal(&self, plaintext: &[u8]) -> Result<String, CacheError> {
        let mut nonce = [0u8; NONCE_LEN];
        OsRng.fill_bytes(&mut nonce);

        let ciphertext = self
            .cipher
            .encrypt(Nonce::from_slice(&nonce), plaintext)
            .map_err(|e| CacheError::Crypto(format!("Encryption failed: {e}")))?;

        let mut payload = Vec::with_capacity(NONCE_LEN + ciphertext.len());
        payload.extend_from_slice(&nonce);
        payload.extend_from_slice(&ciphertext);
        Ok(BASE64.encode(payload))
    }

    // == Open ==
    /// Decodes and decrypts a payload produced by [`RecordCipher::seal`].
    pub fn open(&self, sealed: &str) -> Result<Vec<u8>, CacheError> {
        let payload = BASE64
            .decode(sealed)
            .map_err(|e| CacheError::Crypto(format!("Base64 decode failed: {e}")))?;

        if payload.len() <= NONCE_LEN {
            return Err(CacheError::Crypto("Sealed payload is truncated".to_string()));
        }

        let (nonce, ciphertext) = payload.split_at(NONCE_LEN);
        self.cipher
            .decrypt(Nonce::from_slice(nonce), ciphertext)
            .map_err(|e| CacheError::Crypto(format!("Decryption failed: {e}")))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_seal_then_open() {
        let cipher = RecordCipher::new(&RecordCipher::generate_key()).unwrap();

        let sealed = cipher.seal(b"{\"balance\":42}").unwrap();
        assert_ne!(sealed.as_bytes(), b"{\"balance\":42}");
        assert_eq!(cipher.open(&sealed).unwrap(), b"{\"balance\":42}");
    }

    #[test]
    fn test_nonce_differs_per_seal() {
        let cipher = RecordCipher::new(&RecordCipher::generate_key()).unwrap();
        assert_ne!(cipher.seal(b"same").unwrap(), cipher.seal(b"same").unwrap());
    }

    #[test]
    fn test_wrong_key_fails() {
        let writer = RecordCipher::new(&RecordCipher::generate_key()).unwrap();
        let reader = RecordCipher::new(&RecordCipher::generate_key()).unwrap();

        let sealed = writer.seal(b"secret").unwrap();
        assert!(matches!(reader.open(&sealed), Err(CacheError::Crypto(_))));
    }

    #[test]
    fn test_rejects_bad_key_length() {
        assert!(RecordCipher::new(&[0u8; 16]).is_err());
    }

    #[test]
    fn test_rejects_garbage_payload() {
        let cipher = RecordCipher::new(&RecordCipher::generate_key()).unwrap();
        assert!(cipher.open("not base64 !!").is_err());
        assert!(cipher.open(&BASE64.encode([1u8; 4])).is_err());
    }
}
