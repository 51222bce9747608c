//! # Purchase Pipeline
//!
//! Everything between "the player pressed buy" and "the receipt list is
//! up to date":
//!
//! ```text
//! builder.rs    : intent -> encrypted envelope, registers correlation id
//! outstanding.rs: correlation id -> product id, resolved at most once
//! decoder.rs    : plaintext/encrypted response sniffing, decryption, checks
//! receipts.rs   : newest-first receipt snapshot
//! types.rs      : shared value types and wire shapes
//! ```

pub mod builder;
pub mod decoder;
pub mod outstanding;
pub mod receipts;
pub mod types;

pub use builder::{BuildError, RequestBuilder};
pub use decoder::{classify, ConfirmedPurchase, ResponseDecoder, ResponseEnvelope};
pub use outstanding::{OutstandingRequestTable, TableError};
pub use receipts::{order_receipts, ReceiptAggregator};
pub use types::{
    CorrelationId, EncryptedEnvelope, Product, PurchaseEnvelope, PurchaseIntent, PurchaseTicket,
    Receipt, SealedPayload,
};
