// Copyright (c) 2026 ALAS Technology. MIT License.
// See LICENSE for details.

//! # Arcade IAP Transaction Engine
//!
//! The part of a console storefront integration that has to be right: turning
//! "the player pressed buy" into an encrypted request, matching whatever comes
//! back to the request that caused it, and surviving the player being bounced
//! out to re-authenticate halfway through.
//!
//! The engine itself never touches the network. A [`orchestrator::Transport`]
//! carries requests out and responses come back in as typed results, each
//! delivered once to the [`purchase::PurchaseTicket`] that owns it.
//!
//! ## Architecture
//!
//! - **crypto**: AES-256-GCM payloads, X25519 key wrapping, hex key codecs.
//! - **purchase**: Request builder, outstanding request table, response
//!   decoder and receipt aggregator.
//! - **recovery**: The suspended-purchase slot (sled) and the state machine
//!   that resumes it after authentication.
//! - **orchestrator**: Ties it all together and emits [`orchestrator::BridgeEvent`]s.
//! - **sandbox**: An in-process storefront for the console and tests.
//! - **config**: Constants, error codes and [`config::EngineConfig`].
//! - **error**: The error taxonomy.
//! - **metrics**: Prometheus counters.
//!
//! ## Ground Rules
//!
//! 1. A correlation id resolves at most once. No exceptions.
//! 2. Nothing is retried automatically. Double charges are worse than errors.
//! 3. Authentication is the only failure with built-in recovery, and it
//!    re-issues the product id it persisted, never one read from a response.
//! 4. Every terminal failure reaches the bridge as an event.

pub mod config;
pub mod crypto;
pub mod error;
pub mod metrics;
pub mod orchestrator;
pub mod purchase;
pub mod recovery;
pub mod sandbox;

pub use config::EngineConfig;
pub use error::{EngineError, HandoffToken, ServiceFailure};
pub use orchestrator::{
    BridgeEvent, HandoffOutcome, HandoffPurpose, PurchaseRequest, TransactionOrchestrator,
    Transport,
};
