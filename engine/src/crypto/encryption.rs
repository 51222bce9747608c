//! # AES-256-GCM Payload Sealing
//!
//! Authenticated encryption for purchase requests and storefront responses.
//!
//! Unlike a self-describing `nonce || ciphertext` blob, the envelope carries
//! the IV in its own field, so [`seal`] and [`open`] take the IV explicitly.
//! Callers get a fresh IV from [`random_iv`] for every message.
//!
//! GCM is unforgiving about nonce reuse: two messages under the same key and
//! IV leak their XOR and let an attacker forge tags. Every request in this
//! engine gets a fresh key *and* a fresh IV, which puts us far away from the
//! birthday bound.

use aes_gcm::{
    aead::{Aead, KeyInit},
    Aes256Gcm, Nonce,
};
use rand::RngCore;
use thiserror::Error;
use zeroize::Zeroize;

use crate::config::{AES_KEY_LENGTH, AES_NONCE_LENGTH};

/// Errors that can occur during encryption/decryption.
///
/// Deliberately vague: "wrong key" and "tampered ciphertext" look the same.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum EncryptionError {
    #[error("encryption failed")]
    EncryptFailed,

    #[error("decryption failed -- wrong key or corrupted ciphertext")]
    DecryptFailed,

    #[error("invalid key length: expected {AES_KEY_LENGTH} bytes")]
    InvalidKeyLength,

    #[error("invalid nonce length: expected {AES_NONCE_LENGTH} bytes")]
    InvalidNonceLength,

    #[error("wrapped key is malformed")]
    MalformedWrappedKey,

    #[error("key agreement produced a non-contributory shared secret")]
    NonContributory,
}

// ---------------------------------------------------------------------------
// SymmetricKey
// ---------------------------------------------------------------------------

/// A per-request AES-256 key. Zeroized on drop.
pub struct SymmetricKey([u8; AES_KEY_LENGTH]);

impl SymmetricKey {
    /// Draw a fresh key from the OS RNG.
    pub fn generate() -> Self {
        let mut bytes = [0u8; AES_KEY_LENGTH];
        rand::rngs::OsRng.fill_bytes(&mut bytes);
        Self(bytes)
    }

    pub fn from_bytes(bytes: [u8; AES_KEY_LENGTH]) -> Self {
        Self(bytes)
    }

    /// Length-checked constructor for keys recovered from the wire.
    pub fn from_slice(bytes: &[u8]) -> Result<Self, EncryptionError> {
        let arr: [u8; AES_KEY_LENGTH] = bytes
            .try_into()
            .map_err(|_| EncryptionError::InvalidKeyLength)?;
        Ok(Self(arr))
    }

    pub fn as_bytes(&self) -> &[u8; AES_KEY_LENGTH] {
        &self.0
    }
}

impl Drop for SymmetricKey {
    fn drop(&mut self) {
        self.0.zeroize();
    }
}

impl std::fmt::Debug for SymmetricKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str("SymmetricKey(..)")
    }
}

// ---------------------------------------------------------------------------
// Sealing
// ---------------------------------------------------------------------------

/// A fresh random 96-bit IV.
pub fn random_iv() -> [u8; AES_NONCE_LENGTH] {
    let mut iv = [0u8; AES_NONCE_LENGTH];
    rand::rngs::OsRng.fill_bytes(&mut iv);
    iv
}

/// Encrypt `plaintext` under `key` and `iv`. Returns ciphertext with the
/// 16-byte GCM tag appended.
///
/// # Example
///
/// ```
/// use iap_engine::crypto::encryption::{open, random_iv, seal, SymmetricKey};
///
/// let key = SymmetricKey::generate();
/// let iv = random_iv();
/// let sealed = seal(&key, &iv, b"{\"identifier\":\"sword\"}").unwrap();
/// assert_eq!(open(&key, &iv, &sealed).unwrap(), b"{\"identifier\":\"sword\"}");
/// ```
pub fn seal(
    key: &SymmetricKey,
    iv: &[u8; AES_NONCE_LENGTH],
    plaintext: &[u8],
) -> Result<Vec<u8>, EncryptionError> {
    let cipher =
        Aes256Gcm::new_from_slice(key.as_bytes()).map_err(|_| EncryptionError::EncryptFailed)?;
    cipher
        .encrypt(Nonce::from_slice(iv), plaintext)
        .map_err(|_| EncryptionError::EncryptFailed)
}

/// Decrypt data produced by [`seal`] with the same key and IV.
pub fn open(
    key: &SymmetricKey,
    iv: &[u8; AES_NONCE_LENGTH],
    ciphertext: &[u8],
) -> Result<Vec<u8>, EncryptionError> {
    let cipher =
        Aes256Gcm::new_from_slice(key.as_bytes()).map_err(|_| EncryptionError::DecryptFailed)?;
    cipher
        .decrypt(Nonce::from_slice(iv), ciphertext)
        .map_err(|_| EncryptionError::DecryptFailed)
}

/// Decrypt with an IV taken from the wire (length-checked at runtime).
pub fn open_checked(
    key: &SymmetricKey,
    iv: &[u8],
    ciphertext: &[u8],
) -> Result<Vec<u8>, EncryptionError> {
    let iv: &[u8; AES_NONCE_LENGTH] = iv
        .try_into()
        .map_err(|_| EncryptionError::InvalidNonceLength)?;
    open(key, iv, ciphertext)
}
