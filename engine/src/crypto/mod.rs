//! # Cryptographic Primitives
//!
//! Everything that touches key material lives here:
//!
//! - **X25519** for wrapping per-request keys to a recipient.
//! - **AES-256-GCM** for the payloads themselves.
//! - **BLAKE3** `derive_key` as the KDF between the two.
//!
//! Thin, typed wrappers around audited crates. Nothing in here is clever on
//! purpose.

pub mod context;
pub mod encryption;
pub mod keys;

pub use context::{unwrap_key, wrap_key, EncryptionContext};
pub use encryption::{open, random_iv, seal, EncryptionError, SymmetricKey};
pub use keys::{EnvelopeKeypair, EnvelopePublicKey, KeyError};
