//! Error taxonomy for the transaction engine.
//!
//! Only [`EngineError::AuthenticationRequired`] has built-in recovery. Every
//! other kind is reported upward with a stable code, and the caller decides
//! whether to retry by hand. Nothing here is ever retried automatically.

use std::fmt;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::config::{self, ConfigError};
use crate::crypto::EncryptionError;
use crate::purchase::builder::BuildError;
use crate::purchase::outstanding::TableError;
use crate::purchase::types::CorrelationId;
use crate::recovery::store::StoreError;

// ---------------------------------------------------------------------------
// HandoffToken
// ---------------------------------------------------------------------------

/// Opaque token handed to the external authentication flow.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct HandoffToken(String);

impl HandoffToken {
    pub fn new(token: impl Into<String>) -> Self {
        Self(token.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for HandoffToken {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

// ---------------------------------------------------------------------------
// ServiceFailure
// ---------------------------------------------------------------------------

/// A failed storefront call, as delivered by the transport.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ServiceFailure {
    /// The player must (re-)authenticate before the call can succeed.
    #[error("authentication required")]
    AuthenticationRequired { token: HandoffToken },

    /// Anything else: HTTP errors, storefront errors, timeouts.
    #[error("storefront error {code}: {message}")]
    Transport { code: i32, message: String },
}

// ---------------------------------------------------------------------------
// DecodeError
// ---------------------------------------------------------------------------

/// Response parsing and decryption failures. Permanent.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum DecodeError {
    #[error("malformed response: {0}")]
    Malformed(String),

    #[error("response decryption failed: {0}")]
    CryptoFailure(#[from] EncryptionError),

    #[error("unexpected response shape: {0}")]
    UnexpectedShape(String),
}

// ---------------------------------------------------------------------------
// EngineError
// ---------------------------------------------------------------------------

/// Umbrella error for orchestrator operations.
#[derive(Debug, Error)]
pub enum EngineError {
    #[error("configuration error: {0}")]
    Configuration(#[from] ConfigError),

    #[error("crypto failure: {0}")]
    CryptoFailure(#[from] EncryptionError),

    /// The response does not belong to the request that produced it.
    #[error("product mismatch: expected {expected:?}, got {actual:?}")]
    ProductMismatch {
        expected: String,
        actual: Option<String>,
    },

    #[error("authentication required (handoff {token})")]
    AuthenticationRequired { token: HandoffToken },

    #[error("transport failure {code}: {message}")]
    TransportFailure { code: i32, message: String },

    #[error(transparent)]
    Decode(#[from] DecodeError),

    #[error("duplicate correlation id: {0}")]
    DuplicateCorrelation(CorrelationId),

    #[error("product {0:?} is not in the catalog")]
    UnknownProduct(String),

    #[error("storage error: {0}")]
    Storage(#[from] StoreError),

    #[error("metrics error: {0}")]
    Metrics(#[from] prometheus::Error),

    #[error("invalid purchase request: {0}")]
    InvalidRequest(String),
}

impl EngineError {
    /// Stable numeric code reported to the bridge.
    pub fn code(&self) -> i32 {
        match self {
            Self::Configuration(_) => config::ERROR_CODE_CONFIGURATION,
            Self::CryptoFailure(_) | Self::Decode(DecodeError::CryptoFailure(_)) => {
                config::ERROR_CODE_CRYPTO
            }
            Self::ProductMismatch { .. } => config::ERROR_CODE_PRODUCT_MISMATCH,
            Self::Decode(_) | Self::InvalidRequest(_) => config::ERROR_CODE_DECODE,
            Self::AuthenticationRequired { .. } => config::ERROR_CODE_AUTHENTICATION_ABANDONED,
            Self::TransportFailure { code, .. } => *code,
            Self::DuplicateCorrelation(_) => config::ERROR_CODE_DUPLICATE_CORRELATION,
            Self::UnknownProduct(_) => config::ERROR_CODE_UNKNOWN_PRODUCT,
            Self::Storage(_) => config::ERROR_CODE_STORAGE,
            Self::Metrics(_) => config::ERROR_CODE_INTERNAL,
        }
    }

    /// Whether the caller may sensibly offer a manual retry.
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::TransportFailure { .. })
    }
}

impl From<ServiceFailure> for EngineError {
    fn from(failure: ServiceFailure) -> Self {
        match failure {
            ServiceFailure::AuthenticationRequired { token } => Self::AuthenticationRequired { token },
            ServiceFailure::Transport { code, message } => Self::TransportFailure { code, message },
        }
    }
}

impl From<BuildError> for EngineError {
    fn from(err: BuildError) -> Self {
        match err {
            BuildError::Encryption(e) => Self::CryptoFailure(e),
            BuildError::Table(TableError::DuplicateCorrelation(id)) => Self::DuplicateCorrelation(id),
            BuildError::Table(TableError::NotFound(id)) => {
                Self::InvalidRequest(format!("correlation id {id} vanished during build"))
            }
            BuildError::Serialization(msg) => Self::InvalidRequest(msg),
            BuildError::EmptyProductId => Self::InvalidRequest("empty product id".to_string()),
        }
    }
}
