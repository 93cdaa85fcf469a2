//! Symmetric encryption of token records at rest.

use std::fmt;

use aes_gcm::aead::{Aead, KeyInit, OsRng};
use aes_gcm::{AeadCore, Aes256Gcm, Key, Nonce};
use base64::Engine;
use base64::engine::general_purpose::STANDARD;
use rand::RngCore;
use sha2::{Digest, Sha256};

use crate::error::{Error, Result};

/// AES-GCM nonce length in bytes.
const NONCE_LEN: usize = 12;

/// Key-based transform applied to a record before it is written and after it
/// is read.
pub trait TokenCipher: Send + Sync {
    /// Encrypts a serialized record.
    ///
    /// # Errors
    ///
    /// Returns an error if encryption fails.
    fn seal(&self, plaintext: &[u8]) -> Result<Vec<u8>>;

    /// Decrypts data produced by [`TokenCipher::seal`].
    ///
    /// # Errors
    ///
    /// Returns an error if the data was tampered with, truncated, or sealed
    /// under another key.
    fn open(&self, data: &[u8]) -> Result<Vec<u8>>;
}

/// AES-256-GCM cipher. Output layout: nonce (12 bytes) || ciphertext.
#[derive(Clone)]
pub struct Aes256GcmCipher {
    cipher: Aes256Gcm,
}

impl Aes256GcmCipher {
    /// Creates a cipher from a raw 256-bit key.
    #[must_use]
    pub fn new(key: &[u8; 32]) -> Self {
        Self {
            cipher: Aes256Gcm::new(Key::<Aes256Gcm>::from_slice(key)),
        }
    }

    /// Creates a cipher from user-supplied key material.
    ///
    /// A base64 string decoding to exactly 32 bytes (as printed by
    /// `mailsend keygen`) is used as the key itself; any other passphrase is
    /// stretched with SHA-256.
    #[must_use]
    pub fn from_passphrase(passphrase: &str) -> Self {
        if let Ok(bytes) = STANDARD.decode(passphrase.trim())
            && let Ok(key) = <[u8; 32]>::try_from(bytes.as_slice())
        {
            return Self::new(&key);
        }
        let key: [u8; 32] = Sha256::digest(passphrase.as_bytes()).into();
        Self::new(&key)
    }
}

impl TokenCipher for Aes256GcmCipher {
    fn seal(&self, plaintext: &[u8]) -> Result<Vec<u8>> {
        let nonce = Aes256Gcm::generate_nonce(&mut OsRng);
        let ciphertext = self
            .cipher
            .encrypt(&nonce, plaintext)
            .map_err(|e| Error::Crypto(format!("encryption failed: {e}")))?;

        let mut sealed = Vec::with_capacity(NONCE_LEN + ciphertext.len());
        sealed.extend_from_slice(&nonce);
        sealed.extend_from_slice(&ciphertext);
        Ok(sealed)
    }

    fn open(&self, data: &[u8]) -> Result<Vec<u8>> {
        if data.len() < NONCE_LEN {
            return Err(Error::Crypto("ciphertext too short: missing nonce".to_string()));
        }
        let (nonce, ciphertext) = data.split_at(NONCE_LEN);
        self.cipher
            .decrypt(Nonce::from_slice(nonce), ciphertext)
            .map_err(|e| Error::Crypto(format!("decryption failed: {e}")))
    }
}

impl fmt::Debug for Aes256GcmCipher {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("Aes256GcmCipher { .. }")
    }
}

/// Generates a random 256-bit key, base64 encoded.
#[must_use]
pub fn generate_key() -> String {
    let mut key = [0u8; 32];
    rand::thread_rng().fill_bytes(&mut key);
    STANDARD.encode(key)
}
