//! Storefront response decoding.
//!
//! Responses come in two shapes and both stay supported:
//!
//! - **plaintext**: the structured payload itself (a Product, a receipt list);
//! - **encrypted**: `{"key", "iv", "ciphertext"}` (or the legacy `blob`),
//!   whose plaintext is the structured payload.
//!
//! There is no version field. A JSON object carrying both `key` and `iv` is
//! encrypted, any other JSON object is plaintext, and anything else is
//! malformed.
//!
//! Purchase responses are additionally checked against the outstanding
//! request table. A response that does not resolve to the product its
//! ticket asked for is a [`EngineError::ProductMismatch`].

use std::sync::Arc;

use serde::de::DeserializeOwned;
use serde::Deserialize;
use serde_json::{Map, Value};

use super::outstanding::OutstandingRequestTable;
use super::types::{CorrelationId, Product, PurchaseTicket, Receipt, SealedPayload};
use crate::crypto::{encryption, unwrap_key, EnvelopeKeypair};
use crate::error::{DecodeError, EngineError};

// ---------------------------------------------------------------------------
// Classification
// ---------------------------------------------------------------------------

/// A response after content sniffing.
#[derive(Debug, Clone, PartialEq)]
pub enum ResponseEnvelope {
    Plaintext(Map<String, Value>),
    Encrypted(SealedPayload),
}

/// Sniff a raw response body.
pub fn classify(raw: &str) -> Result<ResponseEnvelope, DecodeError> {
    let trimmed = raw.trim_start();
    if !trimmed.starts_with('{') {
        return Err(DecodeError::Malformed(
            "response is not a JSON object".to_string(),
        ));
    }
    let object: Map<String, Value> =
        serde_json::from_str(trimmed).map_err(|e| DecodeError::Malformed(e.to_string()))?;

    if object.contains_key("key") && object.contains_key("iv") {
        let sealed: SealedPayload = serde_json::from_value(Value::Object(object))
            .map_err(|e| DecodeError::UnexpectedShape(e.to_string()))?;
        Ok(ResponseEnvelope::Encrypted(sealed))
    } else {
        Ok(ResponseEnvelope::Plaintext(object))
    }
}

// ---------------------------------------------------------------------------
// Payload shapes
// ---------------------------------------------------------------------------

/// Decrypted plaintext of an encrypted purchase response.
#[derive(Debug, Deserialize)]
struct PurchaseReceiptBody {
    uuid: CorrelationId,
    #[serde(default)]
    identifier: Option<String>,
}

#[derive(Debug, Deserialize)]
struct ReceiptListBody {
    receipts: Vec<Receipt>,
}

#[derive(Debug, Deserialize)]
struct ProductListBody {
    products: Vec<Product>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct GamerUuidBody {
    gamer_uuid: String,
}

/// A purchase response that passed every check.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConfirmedPurchase {
    pub correlation_id: CorrelationId,
    pub product_id: String,
    /// Present when the storefront answered with a plaintext Product.
    pub product: Option<Product>,
}

// ---------------------------------------------------------------------------
// ResponseDecoder
// ---------------------------------------------------------------------------

/// Decrypts and validates storefront responses with the client keypair.
#[derive(Debug)]
pub struct ResponseDecoder {
    keypair: EnvelopeKeypair,
    table: Arc<OutstandingRequestTable>,
}

impl ResponseDecoder {
    pub fn new(keypair: EnvelopeKeypair, table: Arc<OutstandingRequestTable>) -> Self {
        Self { keypair, table }
    }

    /// Unwrap the response key and decrypt the payload.
    pub fn open(&self, sealed: &SealedPayload) -> Result<Vec<u8>, DecodeError> {
        let wrapped = hex::decode(&sealed.key)
            .map_err(|_| DecodeError::Malformed("key is not hex".to_string()))?;
        let iv = hex::decode(&sealed.iv)
            .map_err(|_| DecodeError::Malformed("iv is not hex".to_string()))?;
        let ciphertext = hex::decode(&sealed.ciphertext)
            .map_err(|_| DecodeError::Malformed("ciphertext is not hex".to_string()))?;

        let key = unwrap_key(&wrapped, &self.keypair)?;
        Ok(encryption::open_checked(&key, &iv, &ciphertext)?)
    }

    fn decode_body<T: DeserializeOwned>(&self, raw: &str) -> Result<T, DecodeError> {
        match classify(raw)? {
            ResponseEnvelope::Plaintext(object) => serde_json::from_value(Value::Object(object))
                .map_err(|e| DecodeError::UnexpectedShape(e.to_string())),
            ResponseEnvelope::Encrypted(sealed) => {
                let plaintext = self.open(&sealed)?;
                serde_json::from_slice(&plaintext)
                    .map_err(|e| DecodeError::UnexpectedShape(e.to_string()))
            }
        }
    }

    /// Decode a receipt list response (either shape). Ordering is left to
    /// the aggregator.
    pub fn decode_receipts(&self, raw: &str) -> Result<Vec<Receipt>, DecodeError> {
        Ok(self.decode_body::<ReceiptListBody>(raw)?.receipts)
    }

    /// Decode a product list response (either shape).
    pub fn decode_products(&self, raw: &str) -> Result<Vec<Product>, DecodeError> {
        Ok(self.decode_body::<ProductListBody>(raw)?.products)
    }

    /// Decode a gamer UUID response (either shape). An empty id is rejected.
    pub fn decode_gamer_uuid(&self, raw: &str) -> Result<String, DecodeError> {
        let body = self.decode_body::<GamerUuidBody>(raw)?;
        if body.gamer_uuid.trim().is_empty() {
            return Err(DecodeError::UnexpectedShape("empty gamer uuid".to_string()));
        }
        Ok(body.gamer_uuid)
    }

    /// Decode a purchase response and check it against `ticket`.
    ///
    /// Consumes the ticket's own table entry, and only when the response
    /// echoes the ticket's correlation id. Decode failures surface as
    /// [`EngineError::Decode`]; identity failures as
    /// [`EngineError::ProductMismatch`].
    pub fn decode_purchase(
        &self,
        raw: &str,
        ticket: &PurchaseTicket,
    ) -> Result<ConfirmedPurchase, EngineError> {
        let expected = ticket.product_id();
        match classify(raw)? {
            ResponseEnvelope::Encrypted(sealed) => {
                let plaintext = self.open(&sealed)?;
                let body: PurchaseReceiptBody = serde_json::from_slice(&plaintext)
                    .map_err(|e| DecodeError::UnexpectedShape(e.to_string()))?;

                // A response echoing another request's id belongs to that
                // request. Its entry stays so the right ticket can resolve it.
                if body.uuid != *ticket.correlation_id() {
                    return Err(EngineError::ProductMismatch {
                        expected: expected.to_string(),
                        actual: self.table.peek(&body.uuid).or(body.identifier),
                    });
                }

                let stored = self.table.resolve(&body.uuid).ok();
                if stored.as_deref() != Some(expected) {
                    return Err(EngineError::ProductMismatch {
                        expected: expected.to_string(),
                        actual: stored,
                    });
                }
                if let Some(named) = body.identifier {
                    if named != expected {
                        return Err(EngineError::ProductMismatch {
                            expected: expected.to_string(),
                            actual: Some(named),
                        });
                    }
                }
                Ok(ConfirmedPurchase {
                    correlation_id: body.uuid,
                    product_id: expected.to_string(),
                    product: None,
                })
            }
            ResponseEnvelope::Plaintext(object) => {
                let product: Product = serde_json::from_value(Value::Object(object))
                    .map_err(|e| DecodeError::UnexpectedShape(e.to_string()))?;

                let stored = self.table.resolve(ticket.correlation_id()).ok();
                if stored.as_deref() != Some(expected) || product.identifier != expected {
                    return Err(EngineError::ProductMismatch {
                        expected: expected.to_string(),
                        actual: Some(product.identifier),
                    });
                }
                Ok(ConfirmedPurchase {
                    correlation_id: ticket.correlation_id().clone(),
                    product_id: expected.to_string(),
                    product: Some(product),
                })
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::crypto::{wrap_key, EncryptionContext, SymmetricKey};
    use crate::purchase::builder::RequestBuilder;
    use crate::purchase::types::PurchaseIntent;

    struct Fixture {
        client: EnvelopeKeypair,
        table: Arc<OutstandingRequestTable>,
        decoder: ResponseDecoder,
        builder: RequestBuilder,
    }

    fn fixture() -> Fixture {
        let client = EnvelopeKeypair::generate();
        let storefront = EnvelopeKeypair::generate();
        let table = Arc::new(OutstandingRequestTable::new());
        let decoder = ResponseDecoder::new(client.clone(), Arc::clone(&table));
        let builder = RequestBuilder::new(
            EncryptionContext::new(storefront.public_key()),
            Arc::clone(&table),
            true,
        );
        Fixture {
            client,
            table,
            decoder,
            builder,
        }
    }

    fn ticket(fx: &Fixture, product: &str) -> PurchaseTicket {
        let (intent, _): (PurchaseIntent, _) = fx.builder.build(product).unwrap();
        PurchaseTicket::new(intent)
    }

    /// Seal `body` to the client the way a storefront would.
    fn seal_to_client(fx: &Fixture, body: &Value) -> String {
        let key = SymmetricKey::generate();
        let iv = encryption::random_iv();
        let ciphertext = encryption::seal(&key, &iv, body.to_string().as_bytes()).unwrap();
        let wrapped = wrap_key(&key, &fx.client.public_key()).unwrap();
        serde_json::json!({
            "key": hex::encode(wrapped),
            "iv": hex::encode(iv),
            "ciphertext": hex::encode(ciphertext),
        })
        .to_string()
    }

    #[test]
    fn classify_detects_encrypted_shape() {
        let raw = r#"{"key":"00","iv":"11","ciphertext":"22"}"#;
        assert!(matches!(classify(raw).unwrap(), ResponseEnvelope::Encrypted(_)));
    }

    #[test]
    fn classify_detects_plaintext_shape() {
        let raw = r#"{"identifier":"sword","name":"Sword","priceInCents":100}"#;
        assert!(matches!(classify(raw).unwrap(), ResponseEnvelope::Plaintext(_)));
    }

    #[test]
    fn classify_key_without_iv_is_plaintext() {
        let raw = r#"{"key":"00","receipts":[]}"#;
        assert!(matches!(classify(raw).unwrap(), ResponseEnvelope::Plaintext(_)));
    }

    #[test]
    fn classify_rejects_non_objects() {
        assert!(matches!(classify("[1,2]"), Err(DecodeError::Malformed(_))));
        assert!(matches!(classify("ENCRYPTED"), Err(DecodeError::Malformed(_))));
        assert!(matches!(classify("{ nope"), Err(DecodeError::Malformed(_))));
    }

    #[test]
    fn encrypted_purchase_response_confirms() {
        let fx = fixture();
        let t = ticket(&fx, "sword");
        let raw = seal_to_client(
            &fx,
            &serde_json::json!({"uuid": t.correlation_id().as_str(), "identifier": "sword"}),
        );

        let confirmed = fx.decoder.decode_purchase(&raw, &t).unwrap();
        assert_eq!(confirmed.product_id, "sword");
        assert_eq!(&confirmed.correlation_id, t.correlation_id());
        assert!(fx.table.is_empty());
    }

    #[test]
    fn encrypted_response_naming_other_product_is_mismatch() {
        let fx = fixture();
        let t = ticket(&fx, "sword");
        let raw = seal_to_client(
            &fx,
            &serde_json::json!({"uuid": t.correlation_id().as_str(), "identifier": "axe"}),
        );

        let err = fx.decoder.decode_purchase(&raw, &t).unwrap_err();
        assert!(matches!(
            err,
            EngineError::ProductMismatch { ref expected, actual: Some(ref got) }
                if expected == "sword" && got == "axe"
        ));
    }

    #[test]
    fn encrypted_response_for_other_request_is_mismatch() {
        let fx = fixture();
        let sword = ticket(&fx, "sword");
        let axe = ticket(&fx, "axe");
        let raw = seal_to_client(&fx, &serde_json::json!({"uuid": axe.correlation_id().as_str()}));

        let err = fx.decoder.decode_purchase(&raw, &sword).unwrap_err();
        assert!(matches!(
            err,
            EngineError::ProductMismatch { ref expected, actual: Some(ref got) }
                if expected == "sword" && got == "axe"
        ));
        assert!(fx.table.contains(axe.correlation_id()));
        assert!(fx.table.contains(sword.correlation_id()));

        let confirmed = fx.decoder.decode_purchase(&raw, &axe).unwrap();
        assert_eq!(confirmed.product_id, "axe");
    }

    #[test]
    fn replayed_response_is_mismatch() {
        let fx = fixture();
        let t = ticket(&fx, "sword");
        let raw = seal_to_client(&fx, &serde_json::json!({"uuid": t.correlation_id().as_str()}));

        assert!(fx.decoder.decode_purchase(&raw, &t).is_ok());
        let err = fx.decoder.decode_purchase(&raw, &t).unwrap_err();
        assert!(matches!(
            err,
            EngineError::ProductMismatch { actual: None, .. }
        ));
    }

    #[test]
    fn plaintext_purchase_response_confirms() {
        let fx = fixture();
        let t = ticket(&fx, "sword");
        let raw = r#"{"identifier":"sword","name":"Sword","priceInCents":299}"#;
        let confirmed = fx.decoder.decode_purchase(raw, &t).unwrap();
        assert_eq!(confirmed.product.unwrap().price_in_cents, 299);
        assert!(fx.table.is_empty());
    }

    #[test]
    fn plaintext_purchase_for_other_product_is_mismatch() {
        let fx = fixture();
        let t = ticket(&fx, "sword");
        let raw = r#"{"identifier":"axe","name":"Axe","priceInCents":100}"#;
        assert!(matches!(
            fx.decoder.decode_purchase(raw, &t),
            Err(EngineError::ProductMismatch { .. })
        ));
    }

    #[test]
    fn response_sealed_to_someone_else_is_crypto_failure() {
        let fx = fixture();
        let t = ticket(&fx, "sword");
        let stranger = fixture();
        let raw = seal_to_client(&stranger, &serde_json::json!({"uuid": "x"}));
        assert!(matches!(
            fx.decoder.decode_purchase(&raw, &t),
            Err(EngineError::Decode(DecodeError::CryptoFailure(_)))
        ));
    }

    #[test]
    fn encrypted_body_with_wrong_shape_is_unexpected() {
        let fx = fixture();
        let t = ticket(&fx, "sword");
        let raw = seal_to_client(&fx, &serde_json::json!({"surprise": true}));
        assert!(matches!(
            fx.decoder.decode_purchase(&raw, &t),
            Err(EngineError::Decode(DecodeError::UnexpectedShape(_)))
        ));
    }

    #[test]
    fn non_hex_fields_are_malformed() {
        let fx = fixture();
        let raw = r#"{"key":"zz","iv":"00","ciphertext":"00"}"#;
        assert!(matches!(
            fx.decoder.decode_receipts(raw),
            Err(DecodeError::Malformed(_))
        ));
    }

    #[test]
    fn receipts_decode_from_both_shapes() {
        let fx = fixture();
        let body = serde_json::json!({"receipts": [
            {"identifier": "sword", "purchaseDate": "2024-01-01T00:00:00Z", "uuid": "r-1"},
        ]});

        let plain = fx.decoder.decode_receipts(&body.to_string()).unwrap();
        let sealed = fx.decoder.decode_receipts(&seal_to_client(&fx, &body)).unwrap();
        assert_eq!(plain, sealed);
        assert_eq!(plain[0].identifier, "sword");
    }

    #[test]
    fn gamer_uuid_decodes_from_both_shapes() {
        let fx = fixture();
        let body = serde_json::json!({"gamerUuid": "6f1c2a"});
        assert_eq!(fx.decoder.decode_gamer_uuid(&body.to_string()).unwrap(), "6f1c2a");
        assert_eq!(
            fx.decoder.decode_gamer_uuid(&seal_to_client(&fx, &body)).unwrap(),
            "6f1c2a"
        );
        assert!(matches!(
            fx.decoder.decode_gamer_uuid(r#"{"gamerUuid":"  "}"#),
            Err(DecodeError::UnexpectedShape(_))
        ));
    }

    #[test]
    fn products_decode() {
        let fx = fixture();
        let raw = r#"{"products":[{"identifier":"sword","name":"Sword","priceInCents":100}]}"#;
        let products = fx.decoder.decode_products(raw).unwrap();
        assert_eq!(products.len(), 1);
    }
}
