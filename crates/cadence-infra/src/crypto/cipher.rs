//! AES-256-GCM encryption for variable values at rest.
//!
//! Each encryption call generates a random 12-byte nonce, prepended to the
//! ciphertext and base64-encoded for storage as text. Encrypting the same
//! plaintext twice therefore produces different output.
//!
//! SECURITY: Error types never contain plaintext or key material in their
//! Display/Debug output to prevent accidental logging of secrets.

use aes_gcm::aead::{Aead, KeyInit, OsRng};
use aes_gcm::{AeadCore, Aes256Gcm, Nonce};
use base64::Engine as _;
use base64::engine::general_purpose::STANDARD as BASE64;
use sha2::{Digest, Sha256};
use thiserror::Error;

/// Nonce size for AES-256-GCM (96 bits / 12 bytes).
const NONCE_SIZE: usize = 12;

/// Errors from value encryption operations.
#[derive(Debug, Error)]
pub enum CipherError {
    #[error("encryption failed")]
    EncryptionFailed,

    #[error("decryption failed")]
    DecryptionFailed,

    #[error("invalid ciphertext")]
    InvalidCiphertext,
}

/// AES-256-GCM cipher for variable values.
pub struct ValueCipher {
    cipher: Aes256Gcm,
}

impl ValueCipher {
    /// Create a cipher from a raw 32-byte key.
    pub fn new(key: &[u8; 32]) -> Self {
        Self {
            cipher: Aes256Gcm::new(key.into()),
        }
    }

    /// Derive the key from a passphrase with SHA-256.
    ///
    /// The passphrase provides the entropy; the digest is used purely as a
    /// KDF, never stored for verification.
    pub fn from_passphrase(passphrase: &str) -> Self {
        let digest = Sha256::digest(passphrase.as_bytes());
        let mut key = [0u8; 32];
        key.copy_from_slice(&digest);
        Self::new(&key)
    }

    /// Encrypt a plaintext value to a base64 string of
    /// `nonce (12 bytes) || ciphertext`.
    pub fn encrypt(&self, plaintext: &str) -> Result<String, CipherError> {
        let nonce = Aes256Gcm::generate_nonce(&mut OsRng);
        let ciphertext = self
            .cipher
            .encrypt(&nonce, plaintext.as_bytes())
            .map_err(|_| CipherError::EncryptionFailed)?;

        let mut combined = Vec::with_capacity(NONCE_SIZE + ciphertext.len());
        combined.extend_from_slice(&nonce);
        combined.extend_from_slice(&ciphertext);
        Ok(BASE64.encode(combined))
    }

    /// Decrypt a base64 string produced by `encrypt()`.
    pub fn decrypt(&self, encoded: &str) -> Result<String, CipherError> {
        let data = BASE64
            .decode(encoded)
            .map_err(|_| CipherError::InvalidCiphertext)?;
        if data.len() < NONCE_SIZE {
            return Err(CipherError::InvalidCiphertext);
        }

        let (nonce_bytes, ciphertext) = data.split_at(NONCE_SIZE);
        let nonce = Nonce::from_slice(nonce_bytes);
        let plaintext = self
            .cipher
            .decrypt(nonce, ciphertext)
            .map_err(|_| CipherError::DecryptionFailed)?;

        String::from_utf8(plaintext).map_err(|_| CipherError::DecryptionFailed)
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
