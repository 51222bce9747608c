//! # Sandbox Storefront
//!
//! An in-process stand-in for the remote storefront. It holds the storefront
//! keypair, opens purchase envelopes exactly as the real service would, keeps
//! a receipt ledger in a sled tree and answers in either response shape.
//!
//! Used by the console and by tests. Results come back as
//! `Result<String, ServiceFailure>`, the same thing a network transport
//! delivers, so callers feed them straight into the orchestrator.

use chrono::Utc;
use parking_lot::Mutex;
use serde_json::{json, Value};
use sled::Tree;
use thiserror::Error;
use tracing::{debug, info, warn};

use crate::config::SANDBOX_LEDGER_TREE;
use crate::crypto::{
    encryption, unwrap_key, EncryptionContext, EncryptionError, EnvelopeKeypair,
    EnvelopePublicKey,
};
use crate::error::{HandoffToken, ServiceFailure};
use crate::purchase::{Product, PurchaseEnvelope, PurchaseIntent, Receipt};
use crate::recovery::{StoreError, SuspensionStore};

/// HTTP-style status codes the sandbox reports in `ServiceFailure::Transport`.
pub const STATUS_BAD_REQUEST: i32 = 400;
pub const STATUS_NOT_FOUND: i32 = 404;
pub const STATUS_INTERNAL: i32 = 500;

#[derive(Debug, Error)]
pub enum SandboxError {
    #[error("malformed request: {0}")]
    Malformed(String),

    #[error(transparent)]
    Crypto(#[from] EncryptionError),

    #[error("ledger error: {0}")]
    Ledger(#[from] sled::Error),

    #[error(transparent)]
    Store(#[from] StoreError),

    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

impl SandboxError {
    fn into_failure(self) -> ServiceFailure {
        let code = match &self {
            Self::Malformed(_) | Self::Crypto(_) => STATUS_BAD_REQUEST,
            _ => STATUS_INTERNAL,
        };
        ServiceFailure::Transport {
            code,
            message: self.to_string(),
        }
    }
}

pub struct SandboxStorefront {
    keypair: EnvelopeKeypair,
    client: EncryptionContext,
    catalog: Vec<Product>,
    ledger: Tree,
    auth_gate: Mutex<Option<HandoffToken>>,
    encrypt_responses: bool,
}

impl SandboxStorefront {
    /// A storefront whose ledger lives in `ledger`.
    pub fn new(
        keypair: EnvelopeKeypair,
        client_public: EnvelopePublicKey,
        catalog: Vec<Product>,
        ledger: Tree,
    ) -> Self {
        Self {
            keypair,
            client: EncryptionContext::new(client_public),
            catalog,
            ledger,
            auth_gate: Mutex::new(None),
            encrypt_responses: true,
        }
    }

    /// Keep the ledger in the same database as the suspension slot.
    pub fn with_store(
        keypair: EnvelopeKeypair,
        client_public: EnvelopePublicKey,
        catalog: Vec<Product>,
        store: &SuspensionStore,
    ) -> Result<Self, SandboxError> {
        let ledger = store.open_tree(SANDBOX_LEDGER_TREE)?;
        Ok(Self::new(keypair, client_public, catalog, ledger))
    }

    /// A storefront whose ledger vanishes on drop.
    pub fn in_memory(
        keypair: EnvelopeKeypair,
        client_public: EnvelopePublicKey,
        catalog: Vec<Product>,
    ) -> Result<Self, SandboxError> {
        let ledger = sled::Config::new()
            .temporary(true)
            .open()?
            .open_tree(SANDBOX_LEDGER_TREE)?;
        Ok(Self::new(keypair, client_public, catalog, ledger))
    }

    /// Answer purchases and receipts in the plaintext shape.
    pub fn with_plaintext_responses(mut self) -> Self {
        self.encrypt_responses = false;
        self
    }

    pub fn default_catalog() -> Vec<Product> {
        vec![
            Product {
                identifier: "sword".into(),
                name: "Steel Sword".into(),
                price_in_cents: 499,
            },
            Product {
                identifier: "axe".into(),
                name: "Battle Axe".into(),
                price_in_cents: 399,
            },
            Product {
                identifier: "shield".into(),
                name: "Tower Shield".into(),
                price_in_cents: 299,
            },
        ]
    }

    pub fn public_key(&self) -> EnvelopePublicKey {
        self.keypair.public_key()
    }

    pub fn catalog(&self) -> &[Product] {
        &self.catalog
    }

    /// Fail every purchase and gamer UUID request with
    /// `AuthenticationRequired` until [`Self::authenticate`] is called.
    pub fn require_authentication(&self, token: HandoffToken) {
        *self.auth_gate.lock() = Some(token);
    }

    pub fn authenticate(&self) {
        *self.auth_gate.lock() = None;
    }

    pub fn requires_authentication(&self) -> bool {
        self.auth_gate.lock().is_some()
    }

    fn check_gate(&self) -> Result<(), ServiceFailure> {
        match self.auth_gate.lock().clone() {
            Some(token) => Err(ServiceFailure::AuthenticationRequired { token }),
            None => Ok(()),
        }
    }

    /// The gamer UUID of the account behind the client key. Stable per key.
    pub fn gamer_uuid(&self) -> String {
        let digest = blake3::hash(self.client.recipient().as_bytes());
        let mut bytes = [0u8; 16];
        bytes.copy_from_slice(&digest.as_bytes()[..16]);
        uuid::Builder::from_random_bytes(bytes)
            .into_uuid()
            .to_string()
    }

    /// Decrypt a purchase envelope back to the intent it carries.
    pub fn open_request(&self, envelope: &PurchaseEnvelope) -> Result<PurchaseIntent, SandboxError> {
        let sealed = &envelope.sealed;
        let wrapped = hex::decode(&sealed.key)
            .map_err(|_| SandboxError::Malformed("key is not hex".into()))?;
        let iv = hex::decode(&sealed.iv)
            .map_err(|_| SandboxError::Malformed("iv is not hex".into()))?;
        let ciphertext = hex::decode(&sealed.ciphertext)
            .map_err(|_| SandboxError::Malformed("ciphertext is not hex".into()))?;

        let key = unwrap_key(&wrapped, &self.keypair)?;
        let plaintext = encryption::open_checked(&key, &iv, &ciphertext)?;
        let intent: PurchaseIntent = serde_json::from_slice(&plaintext)?;

        if intent.product_id() != envelope.identifier {
            return Err(SandboxError::Malformed(format!(
                "envelope names {:?} but payload names {:?}",
                envelope.identifier,
                intent.product_id()
            )));
        }
        Ok(intent)
    }

    /// Serve one purchase request.
    pub fn handle_purchase(&self, envelope: &PurchaseEnvelope) -> Result<String, ServiceFailure> {
        if let Err(failure) = self.check_gate() {
            info!(product_id = %envelope.identifier, "sandbox requires authentication");
            return Err(failure);
        }

        let intent = self.open_request(envelope).map_err(|e| {
            warn!(error = %e, "sandbox rejected purchase envelope");
            e.into_failure()
        })?;

        let product = self
            .catalog
            .iter()
            .find(|p| p.identifier == intent.product_id())
            .cloned()
            .ok_or_else(|| ServiceFailure::Transport {
                code: STATUS_NOT_FOUND,
                message: format!("unknown product {:?}", intent.product_id()),
            })?;

        self.record(&product, intent.testing())
            .map_err(SandboxError::into_failure)?;
        info!(
            correlation_id = %intent.correlation_id(),
            product_id = %product.identifier,
            "sandbox purchase accepted"
        );

        if self.encrypt_responses {
            self.seal_json(&json!({
                "uuid": intent.correlation_id(),
                "identifier": product.identifier,
            }))
            .map_err(SandboxError::into_failure)
        } else {
            serde_json::to_string(&product)
                .map_err(|e| SandboxError::from(e).into_failure())
        }
    }

    /// Serve a receipt list request.
    pub fn handle_receipts(&self) -> Result<String, ServiceFailure> {
        let receipts = self.receipts().map_err(SandboxError::into_failure)?;
        debug!(count = receipts.len(), "sandbox serving receipts");
        let body = json!({ "receipts": receipts });
        if self.encrypt_responses {
            self.seal_json(&body).map_err(SandboxError::into_failure)
        } else {
            Ok(body.to_string())
        }
    }

    /// Serve a gamer UUID request.
    pub fn handle_gamer_uuid(&self) -> Result<String, ServiceFailure> {
        if let Err(failure) = self.check_gate() {
            info!("sandbox requires authentication for gamer uuid");
            return Err(failure);
        }
        let body = json!({ "gamerUuid": self.gamer_uuid() });
        if self.encrypt_responses {
            self.seal_json(&body).map_err(SandboxError::into_failure)
        } else {
            Ok(body.to_string())
        }
    }

    /// Serve a product list request. An empty id list means everything.
    pub fn handle_products(&self, product_ids: &[String]) -> Result<String, ServiceFailure> {
        let products: Vec<&Product> = self
            .catalog
            .iter()
            .filter(|p| product_ids.is_empty() || product_ids.contains(&p.identifier))
            .collect();
        Ok(json!({ "products": products }).to_string())
    }

    /// Encrypt `body` to the client in the `{key, iv, ciphertext}` shape.
    pub fn seal_json(&self, body: &Value) -> Result<String, SandboxError> {
        let (key, wrapped) = self.client.wrap()?;
        let iv = self.client.new_iv();
        let ciphertext = encryption::seal(&key, &iv, body.to_string().as_bytes())?;
        Ok(json!({
            "key": hex::encode(wrapped),
            "iv": hex::encode(iv),
            "ciphertext": hex::encode(ciphertext),
        })
        .to_string())
    }

    /// Every receipt in the ledger, in storage order.
    pub fn receipts(&self) -> Result<Vec<Receipt>, SandboxError> {
        let mut out = Vec::new();
        for entry in self.ledger.iter() {
            let (_, value) = entry?;
            out.push(serde_json::from_slice(&value)?);
        }
        Ok(out)
    }

    fn record(&self, product: &Product, testing: bool) -> Result<Receipt, SandboxError> {
        let receipt = Receipt {
            identifier: product.identifier.clone(),
            purchase_date: Utc::now(),
            uuid: uuid::Uuid::new_v4().to_string(),
            price_in_cents: if testing { 0 } else { product.price_in_cents },
        };
        self.ledger
            .insert(receipt.uuid.as_bytes(), serde_json::to_vec(&receipt)?)?;
        self.ledger.flush()?;
        Ok(receipt)
    }
}
