//! Core purchase data types.
//!
//! Value objects shared by the builder, decoder and orchestrator. Wire forms
//! (`SealedPayload`, `PurchaseEnvelope`) carry hex strings; the in-memory
//! forms carry bytes.

use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::config::AES_NONCE_LENGTH;

// ---------------------------------------------------------------------------
// CorrelationId
// ---------------------------------------------------------------------------

/// Opaque token joining a purchase request to its response.
///
/// 122 random bits from a v4 UUID, rendered as 32 hex characters. The
/// storefront echoes it back untouched.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct CorrelationId(String);

impl CorrelationId {
    pub fn generate() -> Self {
        Self(Uuid::new_v4().simple().to_string())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl From<&str> for CorrelationId {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

impl fmt::Display for CorrelationId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

// ---------------------------------------------------------------------------
// PurchaseIntent
// ---------------------------------------------------------------------------

/// What the player asked to buy. Immutable once built.
///
/// Serializes to the request plaintext:
/// `{"uuid": ..., "identifier": ..., "testing": ...}`.
#[derive(Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct PurchaseIntent {
    #[serde(rename = "uuid")]
    correlation_id: CorrelationId,
    #[serde(rename = "identifier")]
    product_id: String,
    testing: bool,
}

impl PurchaseIntent {
    pub(crate) fn new(correlation_id: CorrelationId, product_id: &str, testing: bool) -> Self {
        Self {
            correlation_id,
            product_id: product_id.to_string(),
            testing,
        }
    }

    pub fn correlation_id(&self) -> &CorrelationId {
        &self.correlation_id
    }

    pub fn product_id(&self) -> &str {
        &self.product_id
    }

    pub fn testing(&self) -> bool {
        self.testing
    }
}

// ---------------------------------------------------------------------------
// Envelopes
// ---------------------------------------------------------------------------

/// Hybrid-encrypted payload. Consumed once by the transport; never persisted.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EncryptedEnvelope {
    pub wrapped_key: Vec<u8>,
    pub iv: [u8; AES_NONCE_LENGTH],
    pub ciphertext: Vec<u8>,
}

impl EncryptedEnvelope {
    /// Hex wire form.
    pub fn to_sealed(&self) -> SealedPayload {
        SealedPayload {
            key: hex::encode(&self.wrapped_key),
            iv: hex::encode(self.iv),
            ciphertext: hex::encode(&self.ciphertext),
        }
    }
}

/// The `{key, iv, ciphertext}` shape as it appears on the wire. Legacy
/// storefronts name the ciphertext `blob`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SealedPayload {
    pub key: String,
    pub iv: String,
    #[serde(alias = "blob")]
    pub ciphertext: String,
}

/// A purchase request as handed to the transport.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PurchaseEnvelope {
    pub identifier: String,
    #[serde(flatten)]
    pub sealed: SealedPayload,
}

// ---------------------------------------------------------------------------
// Product & Receipt
// ---------------------------------------------------------------------------

/// A catalog entry.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Product {
    pub identifier: String,
    pub name: String,
    pub price_in_cents: u64,
}

/// Proof of a completed purchase, as reported by the storefront.
///
/// A receipt list is a full account snapshot, not a delta.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Receipt {
    pub identifier: String,
    pub purchase_date: DateTime<Utc>,
    pub uuid: String,
    #[serde(default)]
    pub price_in_cents: u64,
}

// ---------------------------------------------------------------------------
// PurchaseTicket
// ---------------------------------------------------------------------------

/// The continuation for one in-flight purchase.
///
/// Not `Clone`: the transport moves it back into
/// [`crate::orchestrator::TransactionOrchestrator::on_purchase_response`]
/// exactly once, so a response cannot be delivered twice for the same
/// request.
#[derive(Debug, PartialEq, Eq)]
pub struct PurchaseTicket {
    intent: PurchaseIntent,
}

impl PurchaseTicket {
    pub(crate) fn new(intent: PurchaseIntent) -> Self {
        Self { intent }
    }

    pub fn correlation_id(&self) -> &CorrelationId {
        self.intent.correlation_id()
    }

    /// The product originally requested. Retries always use this value,
    /// never anything read from a response.
    pub fn product_id(&self) -> &str {
        self.intent.product_id()
    }
}
