//! # Key Management
//!
//! X25519 keys for envelope sealing. Two roles exist:
//!
//! - The **storefront** publishes an [`EnvelopePublicKey`]. Request keys are
//!   wrapped to it, so only the storefront can read a purchase request.
//! - The **client** holds an [`EnvelopeKeypair`]. The storefront wraps
//!   response keys to its public half; the secret half unwraps them.
//!
//! Key bytes are never logged. `Debug` on the keypair prints the public half
//! only.

use std::fmt;

use rand::rngs::OsRng;
use thiserror::Error;
use x25519_dalek::{PublicKey, StaticSecret};

use crate::config::X25519_KEY_LENGTH;

/// Errors that can occur while decoding key material.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum KeyError {
    /// No key configured at all. Fatal: the engine cannot transact.
    #[error("no public key configured")]
    KeyUnavailable,

    #[error("key is not valid hex")]
    InvalidEncoding,

    #[error("invalid key length: expected {X25519_KEY_LENGTH} bytes, got {0}")]
    InvalidLength(usize),

    /// The all-zero point. Any DH with it yields zero, so it would wrap
    /// every request key to a value anyone can compute.
    #[error("key is a low-order point")]
    LowOrderKey,
}

fn decode_key_hex(hex_str: &str) -> Result<[u8; X25519_KEY_LENGTH], KeyError> {
    let trimmed = hex_str.trim();
    if trimmed.is_empty() {
        return Err(KeyError::KeyUnavailable);
    }
    let bytes = hex::decode(trimmed).map_err(|_| KeyError::InvalidEncoding)?;
    let arr: [u8; X25519_KEY_LENGTH] = bytes
        .as_slice()
        .try_into()
        .map_err(|_| KeyError::InvalidLength(bytes.len()))?;
    Ok(arr)
}

// ---------------------------------------------------------------------------
// EnvelopePublicKey
// ---------------------------------------------------------------------------

/// A recipient's X25519 public key.
#[derive(Clone, Copy, PartialEq, Eq)]
pub struct EnvelopePublicKey(PublicKey);

impl EnvelopePublicKey {
    /// Build from raw bytes, rejecting the all-zero point.
    pub fn from_bytes(bytes: [u8; X25519_KEY_LENGTH]) -> Result<Self, KeyError> {
        if bytes.iter().all(|b| *b == 0) {
            return Err(KeyError::LowOrderKey);
        }
        Ok(Self(PublicKey::from(bytes)))
    }

    /// Decode a hex-encoded public key. An empty string is `KeyUnavailable`.
    pub fn from_hex(hex_str: &str) -> Result<Self, KeyError> {
        Self::from_bytes(decode_key_hex(hex_str)?)
    }

    pub fn to_hex(&self) -> String {
        hex::encode(self.0.as_bytes())
    }

    pub fn as_bytes(&self) -> &[u8; X25519_KEY_LENGTH] {
        self.0.as_bytes()
    }

    pub(crate) fn inner(&self) -> &PublicKey {
        &self.0
    }
}

impl fmt::Debug for EnvelopePublicKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "EnvelopePublicKey({})", self.to_hex())
    }
}

// ---------------------------------------------------------------------------
// EnvelopeKeypair
// ---------------------------------------------------------------------------

/// A long-lived X25519 keypair. The secret is zeroized on drop by
/// `x25519-dalek`.
#[derive(Clone)]
pub struct EnvelopeKeypair {
    secret: StaticSecret,
    public: PublicKey,
}

impl EnvelopeKeypair {
    /// Generate a fresh keypair from the OS RNG.
    pub fn generate() -> Self {
        let secret = StaticSecret::random_from_rng(OsRng);
        let public = PublicKey::from(&secret);
        Self { secret, public }
    }

    /// Rebuild a keypair from its 32 secret bytes.
    pub fn from_secret_bytes(bytes: [u8; X25519_KEY_LENGTH]) -> Self {
        let secret = StaticSecret::from(bytes);
        let public = PublicKey::from(&secret);
        Self { secret, public }
    }

    /// Decode a hex-encoded secret key.
    pub fn from_secret_hex(hex_str: &str) -> Result<Self, KeyError> {
        Ok(Self::from_secret_bytes(decode_key_hex(hex_str)?))
    }

    /// Hex-encoded secret, for writing config files. Handle with care.
    pub fn secret_hex(&self) -> String {
        hex::encode(self.secret.to_bytes())
    }

    pub fn public_key(&self) -> EnvelopePublicKey {
        EnvelopePublicKey(self.public)
    }

    pub(crate) fn secret(&self) -> &StaticSecret {
        &self.secret
    }
}

impl fmt::Debug for EnvelopeKeypair {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("EnvelopeKeypair")
            .field("public", &self.public_key().to_hex())
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn generated_keypairs_differ() {
        let a = EnvelopeKeypair::generate();
        let b = EnvelopeKeypair::generate();
        assert_ne!(a.public_key(), b.public_key());
    }

    #[test]
    fn secret_hex_roundtrip_restores_public_key() {
        let kp = EnvelopeKeypair::generate();
        let restored = EnvelopeKeypair::from_secret_hex(&kp.secret_hex()).unwrap();
        assert_eq!(restored.public_key(), kp.public_key());
    }

    #[test]
    fn public_hex_roundtrip() {
        let pk = EnvelopeKeypair::generate().public_key();
        assert_eq!(EnvelopePublicKey::from_hex(&pk.to_hex()).unwrap(), pk);
    }

    #[test]
    fn empty_key_is_unavailable() {
        assert_eq!(
            EnvelopePublicKey::from_hex("   ").unwrap_err(),
            KeyError::KeyUnavailable
        );
    }

    #[test]
    fn short_key_reports_length() {
        assert_eq!(
            EnvelopePublicKey::from_hex("abcd").unwrap_err(),
            KeyError::InvalidLength(2)
        );
    }

    #[test]
    fn zero_key_is_rejected() {
        assert_eq!(
            EnvelopePublicKey::from_bytes([0u8; 32]).unwrap_err(),
            KeyError::LowOrderKey
        );
    }

    #[test]
    fn debug_does_not_print_secret() {
        let kp = EnvelopeKeypair::generate();
        let rendered = format!("{:?}", kp);
        assert!(!rendered.contains(&kp.secret_hex()));
        assert!(rendered.contains(&kp.public_key().to_hex()));
    }
}
