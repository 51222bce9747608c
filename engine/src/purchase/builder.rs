//! Purchase request construction.
//!
//! [`RequestBuilder::build`] turns a product id into a [`PurchaseIntent`]
//! and its [`EncryptedEnvelope`]:
//!
//! 1. Draw a fresh correlation id.
//! 2. Serialize `{uuid, identifier, testing}` with `serde_json`.
//! 3. Seal it under a fresh per-request AES key and IV.
//! 4. Wrap the AES key to the storefront's public key.
//! 5. Register `correlation id -> product id` in the outstanding table.
//!
//! Registration is the last step and happens before the caller ever sees the
//! envelope, so no response can race ahead of its table entry. No I/O here.

use std::sync::Arc;

use tracing::debug;

use super::outstanding::{OutstandingRequestTable, TableError};
use super::types::{CorrelationId, EncryptedEnvelope, PurchaseIntent};
use crate::crypto::encryption::{self, EncryptionError};
use crate::crypto::EncryptionContext;

/// Errors raised while building a request.
#[derive(Debug, thiserror::Error)]
pub enum BuildError {
    #[error("encryption error: {0}")]
    Encryption(#[from] EncryptionError),

    #[error("failed to serialize purchase intent: {0}")]
    Serialization(String),

    #[error(transparent)]
    Table(#[from] TableError),

    #[error("product id must not be empty")]
    EmptyProductId,
}

/// Builds encrypted purchase requests for one storefront key.
#[derive(Debug)]
pub struct RequestBuilder {
    context: EncryptionContext,
    table: Arc<OutstandingRequestTable>,
    testing: bool,
}

impl RequestBuilder {
    pub fn new(
        context: EncryptionContext,
        table: Arc<OutstandingRequestTable>,
        testing: bool,
    ) -> Self {
        Self {
            context,
            table,
            testing,
        }
    }

    pub fn testing(&self) -> bool {
        self.testing
    }

    /// Build, encrypt and register a purchase request for `product_id`.
    pub fn build(&self, product_id: &str) -> Result<(PurchaseIntent, EncryptedEnvelope), BuildError> {
        if product_id.trim().is_empty() {
            return Err(BuildError::EmptyProductId);
        }

        let intent = PurchaseIntent::new(CorrelationId::generate(), product_id, self.testing);
        let plaintext =
            serde_json::to_vec(&intent).map_err(|e| BuildError::Serialization(e.to_string()))?;

        let (key, wrapped_key) = self.context.wrap()?;
        let iv = self.context.new_iv();
        let ciphertext = encryption::seal(&key, &iv, &plaintext)?;

        self.table.register(intent.correlation_id(), product_id)?;
        debug!(
            correlation_id = %intent.correlation_id(),
            product_id,
            "purchase request registered"
        );

        Ok((
            intent,
            EncryptedEnvelope {
                wrapped_key,
                iv,
                ciphertext,
            },
        ))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::crypto::{unwrap_key, EnvelopeKeypair};

    fn builder() -> (RequestBuilder, EnvelopeKeypair, Arc<OutstandingRequestTable>) {
        let storefront = EnvelopeKeypair::generate();
        let table = Arc::new(OutstandingRequestTable::new());
        let builder = RequestBuilder::new(
            EncryptionContext::new(storefront.public_key()),
            Arc::clone(&table),
            true,
        );
        (builder, storefront, table)
    }

    #[test]
    fn build_registers_before_returning() {
        let (builder, _, table) = builder();
        let (intent, _) = builder.build("sword").unwrap();
        assert!(table.contains(intent.correlation_id()));
        assert_eq!(table.resolve(intent.correlation_id()).unwrap(), "sword");
    }

    #[test]
    fn envelope_decrypts_to_intent() {
        let (builder, storefront, _) = builder();
        let (intent, envelope) = builder.build("sword").unwrap();

        let key = unwrap_key(&envelope.wrapped_key, &storefront).unwrap();
        let plaintext = encryption::open(&key, &envelope.iv, &envelope.ciphertext).unwrap();
        let decoded: PurchaseIntent = serde_json::from_slice(&plaintext).unwrap();

        assert_eq!(decoded, intent);
        assert_eq!(decoded.product_id(), "sword");
        assert!(decoded.testing());
    }

    #[test]
    fn two_builds_for_same_product_share_nothing() {
        let (builder, _, table) = builder();
        let (a, ea) = builder.build("sword").unwrap();
        let (b, eb) = builder.build("sword").unwrap();

        assert_ne!(a.correlation_id(), b.correlation_id());
        assert_ne!(ea.iv, eb.iv);
        assert_ne!(ea.wrapped_key, eb.wrapped_key);
        assert_ne!(ea.ciphertext, eb.ciphertext);
        assert_eq!(table.len(), 2);
    }

    #[test]
    fn empty_product_id_is_rejected() {
        let (builder, _, table) = builder();
        assert!(matches!(builder.build(" "), Err(BuildError::EmptyProductId)));
        assert!(table.is_empty());
    }

    #[test]
    fn sealed_wire_form_is_hex() {
        let (builder, _, _) = builder();
        let (_, envelope) = builder.build("axe").unwrap();
        let sealed = envelope.to_sealed();
        assert_eq!(hex::decode(&sealed.key).unwrap(), envelope.wrapped_key);
        assert_eq!(hex::decode(&sealed.iv).unwrap(), envelope.iv.to_vec());
    }
}
