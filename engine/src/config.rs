//! # Engine Configuration & Constants
//!
//! Every magic number the engine relies on lives here, next to the
//! [`EngineConfig`] loaded from TOML at startup.
//!
//! Changing a storage key or a KDF context string after release orphans
//! every suspended purchase and every in-flight response on the devices in
//! the field, so treat the values in this file as wire format.

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::crypto::keys::{EnvelopeKeypair, EnvelopePublicKey, KeyError};

// ---------------------------------------------------------------------------
// Engine Version
// ---------------------------------------------------------------------------

/// Engine version string, reported by the console's `version` command.
pub const ENGINE_VERSION: &str = "0.1.0";

// ---------------------------------------------------------------------------
// Cryptographic Parameters
// ---------------------------------------------------------------------------

/// Key agreement used to wrap per-request symmetric keys.
pub const KEY_WRAP_ALGORITHM: &str = "X25519+BLAKE3+AES-256-GCM";

/// Symmetric cipher for request and response payloads.
pub const SYMMETRIC_ALGORITHM: &str = "AES-256-GCM";

/// AES-256 key length in bytes.
pub const AES_KEY_LENGTH: usize = 32;

/// AES-GCM nonce (IV) length in bytes. 96 bits, the only size GCM is
/// specified for without an extra GHASH pass.
pub const AES_NONCE_LENGTH: usize = 12;

/// GCM authentication tag length in bytes.
pub const AES_TAG_LENGTH: usize = 16;

/// X25519 public and secret key length in bytes.
pub const X25519_KEY_LENGTH: usize = 32;

/// Length of a wrapped symmetric key on the wire:
/// `ephemeral_pub || nonce || sealed_key || tag`.
pub const WRAPPED_KEY_LENGTH: usize =
    X25519_KEY_LENGTH + AES_NONCE_LENGTH + AES_KEY_LENGTH + AES_TAG_LENGTH;

/// BLAKE3 `derive_key` context for the key-encryption key. Never reuse this
/// string for anything else.
pub const KEY_WRAP_CONTEXT: &str = "arcade-iap v1 key wrap";

// ---------------------------------------------------------------------------
// Persistence
// ---------------------------------------------------------------------------

/// sled tree holding the suspended-purchase slot.
pub const RECOVERY_TREE: &str = "recovery";

/// Namespaced key of the single suspended-purchase record.
pub const SUSPENDED_PURCHASE_KEY: &[u8] = b"iap.suspended_purchase";

/// sled tree the sandbox storefront uses as its receipt ledger.
pub const SANDBOX_LEDGER_TREE: &str = "sandbox_ledger";

// ---------------------------------------------------------------------------
// Error Codes
// ---------------------------------------------------------------------------
//
// Reported in `BridgeEvent::PurchaseFailed` and friends. Transport failures
// carry the storefront's own code instead.

/// The engine is misconfigured (missing or invalid key).
pub const ERROR_CODE_CONFIGURATION: i32 = 2001;

/// Encryption, decryption or key wrapping failed.
pub const ERROR_CODE_CRYPTO: i32 = 2002;

/// The response does not belong to the request that produced it.
pub const ERROR_CODE_PRODUCT_MISMATCH: i32 = 2003;

/// The response could not be parsed.
pub const ERROR_CODE_DECODE: i32 = 2004;

/// The suspended-purchase slot could not be read or written.
pub const ERROR_CODE_STORAGE: i32 = 2005;

/// Re-authentication failed or was cancelled by the user.
pub const ERROR_CODE_AUTHENTICATION_ABANDONED: i32 = 2006;

/// A resumed purchase names a product missing from the catalog.
pub const ERROR_CODE_UNKNOWN_PRODUCT: i32 = 2007;

/// Correlation id collision in the outstanding request table.
pub const ERROR_CODE_DUPLICATE_CORRELATION: i32 = 2008;

/// The transport refused the hand-off before anything was sent.
pub const ERROR_CODE_TRANSPORT_UNAVAILABLE: i32 = 2009;

/// Metrics registry failure.
pub const ERROR_CODE_INTERNAL: i32 = 2099;

// ---------------------------------------------------------------------------
// Metrics
// ---------------------------------------------------------------------------

/// Prometheus namespace for every engine metric.
pub const METRICS_NAMESPACE: &str = "iap";

// ---------------------------------------------------------------------------
// EngineConfig
// ---------------------------------------------------------------------------

/// Errors raised while loading or validating configuration.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read config file: {0}")]
    Io(#[from] std::io::Error),

    #[error("failed to parse TOML config: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("failed to render TOML config: {0}")]
    Render(#[from] toml::ser::Error),

    #[error("invalid key material: {0}")]
    Key(#[from] KeyError),

    #[error("invalid product id: {0:?}")]
    InvalidProductId(String),
}

fn default_testing() -> bool {
    true
}

/// Runtime configuration for a [`crate::orchestrator::TransactionOrchestrator`].
///
/// ```toml
/// storefront_public_key = "9f1c...e2"   # hex, 32 bytes
/// client_secret_key = "4a07...31"       # hex, 32 bytes
/// testing = true
/// product_ids = ["sword", "axe"]
/// data_dir = "./iap-data"
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EngineConfig {
    /// Storefront X25519 public key, hex-encoded. Request keys are wrapped
    /// to this key.
    pub storefront_public_key: String,

    /// Client X25519 secret key, hex-encoded. Used to unwrap response keys.
    pub client_secret_key: String,

    /// When set, purchases are flagged as test purchases and no money moves.
    #[serde(default = "default_testing")]
    pub testing: bool,

    /// Product ids requested when the catalog is refreshed.
    #[serde(default)]
    pub product_ids: Vec<String>,

    /// Directory holding the sled database. The console falls back to its
    /// `--data-dir` flag when unset.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data_dir: Option<PathBuf>,
}

impl EngineConfig {
    /// Load and validate configuration from a TOML file.
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        let contents = std::fs::read_to_string(path.as_ref())?;
        Self::from_toml_str(&contents)
    }

    /// Parse and validate configuration from a TOML string.
    pub fn from_toml_str(contents: &str) -> Result<Self, ConfigError> {
        let config: EngineConfig = toml::from_str(contents)?;
        config.validate()?;
        Ok(config)
    }

    /// Render as TOML, e.g. for the console's `init` command.
    pub fn to_toml_string(&self) -> Result<String, ConfigError> {
        Ok(toml::to_string_pretty(self)?)
    }

    /// Check that both keys decode and every product id is usable.
    pub fn validate(&self) -> Result<(), ConfigError> {
        self.storefront_key()?;
        self.client_keypair()?;
        if let Some(bad) = self
            .product_ids
            .iter()
            .find(|id| id.trim().is_empty() || id.trim() != id.as_str())
        {
            return Err(ConfigError::InvalidProductId(bad.clone()));
        }
        Ok(())
    }

    /// Decode the storefront public key.
    pub fn storefront_key(&self) -> Result<EnvelopePublicKey, ConfigError> {
        Ok(EnvelopePublicKey::from_hex(&self.storefront_public_key)?)
    }

    /// Decode the client keypair from its secret half.
    pub fn client_keypair(&self) -> Result<EnvelopeKeypair, ConfigError> {
        Ok(EnvelopeKeypair::from_secret_hex(&self.client_secret_key)?)
    }
}
