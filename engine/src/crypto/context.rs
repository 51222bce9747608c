//! # Encryption Context
//!
//! Hybrid encryption for purchase envelopes: a fresh AES-256 key per request,
//! wrapped to the recipient's X25519 public key.
//!
//! ## Key wrapping
//!
//! For every wrap:
//!
//! 1. Generate an ephemeral X25519 secret and compute the shared secret with
//!    the recipient's public key.
//! 2. Derive a key-encryption key (KEK):
//!
//!    ```text
//!    kek = BLAKE3-derive-key(
//!        context = "arcade-iap v1 key wrap",
//!        input   = shared_secret || ephemeral_pub || recipient_pub
//!    )
//!    ```
//!
//! 3. Seal the symmetric key under the KEK with AES-256-GCM and a fresh
//!    nonce.
//!
//! The wire form is `ephemeral_pub (32) || nonce (12) || sealed_key (48)`.
//! The ephemeral secret is consumed by the DH, so two wraps of the same key
//! never produce the same bytes.

use x25519_dalek::{EphemeralSecret, PublicKey, SharedSecret};

use super::encryption::{self, EncryptionError, SymmetricKey};
use super::keys::{EnvelopeKeypair, EnvelopePublicKey, KeyError};
use crate::config::{
    AES_KEY_LENGTH, AES_NONCE_LENGTH, KEY_WRAP_CONTEXT, WRAPPED_KEY_LENGTH, X25519_KEY_LENGTH,
};

/// Binds a recipient public key and produces fresh keys and IVs for it.
#[derive(Debug, Clone)]
pub struct EncryptionContext {
    recipient: EnvelopePublicKey,
}

impl EncryptionContext {
    pub fn new(recipient: EnvelopePublicKey) -> Self {
        Self { recipient }
    }

    /// Build a context from a hex-encoded key. Fails with
    /// [`KeyError::KeyUnavailable`] when nothing was configured.
    pub fn from_hex(recipient_hex: &str) -> Result<Self, KeyError> {
        Ok(Self::new(EnvelopePublicKey::from_hex(recipient_hex)?))
    }

    pub fn recipient(&self) -> &EnvelopePublicKey {
        &self.recipient
    }

    /// Generate a fresh symmetric key and wrap it to the recipient.
    pub fn wrap(&self) -> Result<(SymmetricKey, Vec<u8>), EncryptionError> {
        let key = SymmetricKey::generate();
        let wrapped = wrap_key(&key, &self.recipient)?;
        Ok((key, wrapped))
    }

    /// A fresh IV for the payload cipher.
    pub fn new_iv(&self) -> [u8; AES_NONCE_LENGTH] {
        encryption::random_iv()
    }
}

/// Wrap `key` to `recipient` with a fresh ephemeral secret.
pub fn wrap_key(
    key: &SymmetricKey,
    recipient: &EnvelopePublicKey,
) -> Result<Vec<u8>, EncryptionError> {
    let ephemeral = EphemeralSecret::random_from_rng(rand::rngs::OsRng);
    let ephemeral_pub = PublicKey::from(&ephemeral);
    let shared = ephemeral.diffie_hellman(recipient.inner());
    if !shared.was_contributory() {
        return Err(EncryptionError::NonContributory);
    }

    let kek = derive_kek(&shared, ephemeral_pub.as_bytes(), recipient.as_bytes());
    let nonce = encryption::random_iv();
    let sealed = encryption::seal(&kek, &nonce, key.as_bytes())?;

    let mut out = Vec::with_capacity(WRAPPED_KEY_LENGTH);
    out.extend_from_slice(ephemeral_pub.as_bytes());
    out.extend_from_slice(&nonce);
    out.extend_from_slice(&sealed);
    Ok(out)
}

/// Recover a symmetric key wrapped to `recipient`'s public key.
pub fn unwrap_key(
    wrapped: &[u8],
    recipient: &EnvelopeKeypair,
) -> Result<SymmetricKey, EncryptionError> {
    if wrapped.len() != WRAPPED_KEY_LENGTH {
        return Err(EncryptionError::MalformedWrappedKey);
    }
    let (ephemeral_bytes, rest) = wrapped.split_at(X25519_KEY_LENGTH);
    let (nonce_bytes, sealed) = rest.split_at(AES_NONCE_LENGTH);

    let ephemeral: [u8; X25519_KEY_LENGTH] = ephemeral_bytes
        .try_into()
        .map_err(|_| EncryptionError::MalformedWrappedKey)?;
    let ephemeral_pub = PublicKey::from(ephemeral);
    let shared = recipient.secret().diffie_hellman(&ephemeral_pub);
    if !shared.was_contributory() {
        return Err(EncryptionError::NonContributory);
    }

    let kek = derive_kek(
        &shared,
        ephemeral_pub.as_bytes(),
        recipient.public_key().as_bytes(),
    );
    let key_bytes = encryption::open_checked(&kek, nonce_bytes, sealed)?;
    SymmetricKey::from_slice(&key_bytes)
}

fn derive_kek(
    shared: &SharedSecret,
    ephemeral_pub: &[u8; X25519_KEY_LENGTH],
    recipient_pub: &[u8; X25519_KEY_LENGTH],
) -> SymmetricKey {
    let mut hasher = blake3::Hasher::new_derive_key(KEY_WRAP_CONTEXT);
    hasher.update(shared.as_bytes());
    hasher.update(ephemeral_pub);
    hasher.update(recipient_pub);

    let mut kek = [0u8; AES_KEY_LENGTH];
    hasher.finalize_xof().fill(&mut kek);
    SymmetricKey::from_bytes(kek)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn wrap_unwrap_roundtrip() {
        let recipient = EnvelopeKeypair::generate();
        let ctx = EncryptionContext::new(recipient.public_key());

        let (key, wrapped) = ctx.wrap().unwrap();
        assert_eq!(wrapped.len(), WRAPPED_KEY_LENGTH);

        let recovered = unwrap_key(&wrapped, &recipient).unwrap();
        assert_eq!(recovered.as_bytes(), key.as_bytes());
    }

    #[test]
    fn wrapping_same_key_twice_is_non_deterministic() {
        let recipient = EnvelopeKeypair::generate();
        let key = SymmetricKey::generate();
        let a = wrap_key(&key, &recipient.public_key()).unwrap();
        let b = wrap_key(&key, &recipient.public_key()).unwrap();
        assert_ne!(a, b);
    }

    #[test]
    fn each_wrap_uses_a_fresh_symmetric_key() {
        let ctx = EncryptionContext::new(EnvelopeKeypair::generate().public_key());
        let (k1, _) = ctx.wrap().unwrap();
        let (k2, _) = ctx.wrap().unwrap();
        assert_ne!(k1.as_bytes(), k2.as_bytes());
        assert_ne!(ctx.new_iv(), ctx.new_iv());
    }

    #[test]
    fn wrong_recipient_cannot_unwrap() {
        let ctx = EncryptionContext::new(EnvelopeKeypair::generate().public_key());
        let (_, wrapped) = ctx.wrap().unwrap();
        let stranger = EnvelopeKeypair::generate();
        assert_eq!(
            unwrap_key(&wrapped, &stranger).unwrap_err(),
            EncryptionError::DecryptFailed
        );
    }

    #[test]
    fn truncated_wrapped_key_is_malformed() {
        let recipient = EnvelopeKeypair::generate();
        let ctx = EncryptionContext::new(recipient.public_key());
        let (_, wrapped) = ctx.wrap().unwrap();
        assert_eq!(
            unwrap_key(&wrapped[..40], &recipient).unwrap_err(),
            EncryptionError::MalformedWrappedKey
        );
    }

    #[test]
    fn tampered_wrapped_key_fails() {
        let recipient = EnvelopeKeypair::generate();
        let ctx = EncryptionContext::new(recipient.public_key());
        let (_, mut wrapped) = ctx.wrap().unwrap();
        let last = wrapped.len() - 1;
        wrapped[last] ^= 0x80;
        assert!(unwrap_key(&wrapped, &recipient).is_err());
    }

    #[test]
    fn zero_ephemeral_is_rejected() {
        let recipient = EnvelopeKeypair::generate();
        let wrapped = vec![0u8; WRAPPED_KEY_LENGTH];
        assert_eq!(
            unwrap_key(&wrapped, &recipient).unwrap_err(),
            EncryptionError::NonContributory
        );
    }

    #[test]
    fn missing_key_is_unavailable() {
        assert_eq!(
            EncryptionContext::from_hex("").unwrap_err(),
            KeyError::KeyUnavailable
        );
    }
}
