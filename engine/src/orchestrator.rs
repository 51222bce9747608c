//! # Transaction Orchestrator
//!
//! Coordinates the request builder, outstanding request table, response
//! decoder, receipt aggregator and recovery state machine.
//!
//! ```text
//!  purchase(p) ──► RequestBuilder ──► Transport::submit_purchase(request)
//!                                              │
//!                     PurchaseTicket moved back exactly once
//!                                              ▼
//!  BridgeEvent ◄── on_purchase_response(ticket, Result<body, ServiceFailure>)
//!                     ├─ Ok      → decode + check → PurchaseCompleted, refresh receipts
//!                     ├─ AuthReq → RecoveryStateMachine::suspend → AuthenticationRequired
//!                     └─ other   → PurchaseFailed { retryable }
//! ```
//!
//! Authentication hand-offs are tagged with a [`HandoffPurpose`]. Only a
//! `Purchase` hand-off touches the suspended-purchase slot; a `GamerUuid`
//! hand-off just fetches the account id again.
//!
//! Nothing here blocks or retries on its own. Outbound notifications go over
//! an unbounded channel handed back by [`TransactionOrchestrator::new`].

use std::fmt;
use std::sync::Arc;

use parking_lot::RwLock;
use tokio::sync::mpsc::{self, UnboundedReceiver, UnboundedSender};
use tracing::{debug, error, info, warn};

use crate::config::{
    EngineConfig, ERROR_CODE_AUTHENTICATION_ABANDONED, ERROR_CODE_STORAGE,
    ERROR_CODE_UNKNOWN_PRODUCT,
};
use crate::crypto::EncryptionContext;
use crate::error::{EngineError, HandoffToken, ServiceFailure};
use crate::metrics::EngineMetrics;
use crate::purchase::{
    CorrelationId, OutstandingRequestTable, Product, PurchaseEnvelope, PurchaseTicket, Receipt,
    ReceiptAggregator, RequestBuilder, ResponseDecoder,
};
use crate::recovery::{RecoveryState, RecoveryStateMachine, ResumeOutcome, SuspensionStore};

// ---------------------------------------------------------------------------
// Transport seam
// ---------------------------------------------------------------------------

/// A purchase handed to the transport: the wire envelope plus the
/// continuation that must come back with the response.
#[derive(Debug)]
pub struct PurchaseRequest {
    pub envelope: PurchaseEnvelope,
    pub ticket: PurchaseTicket,
}

/// Executes storefront calls off the caller's context.
///
/// Every method is a non-blocking hand-off. Results come back through
/// [`TransactionOrchestrator::on_purchase_response`],
/// [`TransactionOrchestrator::on_receipts_response`],
/// [`TransactionOrchestrator::on_products_response`] and
/// [`TransactionOrchestrator::on_gamer_uuid_response`]. An `Err` means the
/// call was never started.
pub trait Transport: Send + Sync {
    fn submit_purchase(&self, request: PurchaseRequest) -> Result<(), ServiceFailure>;
    fn request_receipts(&self) -> Result<(), ServiceFailure>;
    fn request_products(&self, product_ids: &[String]) -> Result<(), ServiceFailure>;
    fn request_gamer_uuid(&self) -> Result<(), ServiceFailure>;
}

// ---------------------------------------------------------------------------
// Authentication hand-off
// ---------------------------------------------------------------------------

/// Which call sent the player to the external authentication flow.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum HandoffPurpose {
    Purchase,
    GamerUuid,
}

impl fmt::Display for HandoffPurpose {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Purchase => f.write_str("purchase"),
            Self::GamerUuid => f.write_str("gamer-uuid"),
        }
    }
}

/// Result of [`TransactionOrchestrator::on_activity_resume`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum HandoffOutcome {
    Purchase(ResumeOutcome),
    /// `refetching` is true when the gamer UUID was requested again.
    GamerUuid { refetching: bool },
}

// ---------------------------------------------------------------------------
// Bridge events
// ---------------------------------------------------------------------------

/// Outbound notifications for the UI/bridge collaborator.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BridgeEvent {
    PurchaseCompleted {
        product_id: String,
    },
    /// `retryable` means the caller may offer [`TransactionOrchestrator::retry_purchase`].
    PurchaseFailed {
        product_id: String,
        code: i32,
        message: String,
        retryable: bool,
    },
    ReceiptsUpdated(Vec<Receipt>),
    ReceiptsFailed {
        code: i32,
        message: String,
    },
    ProductsUpdated(Vec<Product>),
    ProductsFailed {
        code: i32,
        message: String,
    },
    GamerUuidFetched {
        uuid: String,
    },
    GamerUuidFailed {
        code: i32,
        message: String,
    },
    /// Launch the external authentication flow with this token, then call
    /// [`TransactionOrchestrator::on_activity_resume`] with the same purpose.
    AuthenticationRequired {
        token: HandoffToken,
        purpose: HandoffPurpose,
    },
}

// ---------------------------------------------------------------------------
// TransactionOrchestrator
// ---------------------------------------------------------------------------

pub struct TransactionOrchestrator<T: Transport> {
    builder: RequestBuilder,
    decoder: ResponseDecoder,
    table: Arc<OutstandingRequestTable>,
    receipts: ReceiptAggregator,
    catalog: RwLock<Option<Vec<Product>>>,
    gamer_uuid: RwLock<Option<String>>,
    recovery: RecoveryStateMachine,
    transport: T,
    events: UnboundedSender<BridgeEvent>,
    metrics: EngineMetrics,
    product_ids: Vec<String>,
}

impl<T: Transport> TransactionOrchestrator<T> {
    /// Build an orchestrator from validated configuration.
    ///
    /// Fails with [`EngineError::Configuration`] when either key is missing
    /// or malformed; the engine cannot transact without them. Restores any
    /// suspended purchase left in `store` by a previous process.
    pub fn new(
        config: &EngineConfig,
        store: SuspensionStore,
        transport: T,
    ) -> Result<(Self, UnboundedReceiver<BridgeEvent>), EngineError> {
        config.validate()?;
        let storefront_key = config.storefront_key()?;
        let client_keypair = config.client_keypair()?;

        let table = Arc::new(OutstandingRequestTable::new());
        let builder = RequestBuilder::new(
            EncryptionContext::new(storefront_key),
            Arc::clone(&table),
            config.testing,
        );
        let decoder = ResponseDecoder::new(client_keypair, Arc::clone(&table));
        let recovery = RecoveryStateMachine::restore(store)?;
        let metrics = EngineMetrics::new()?;
        let (events, receiver) = mpsc::unbounded_channel();

        info!(
            testing = config.testing,
            products = config.product_ids.len(),
            recovery = ?recovery.state(),
            "transaction engine ready"
        );

        Ok((
            Self {
                builder,
                decoder,
                table,
                receipts: ReceiptAggregator::new(),
                catalog: RwLock::new(None),
                gamer_uuid: RwLock::new(None),
                recovery,
                transport,
                events,
                metrics,
                product_ids: config.product_ids.clone(),
            },
            receiver,
        ))
    }

    // -- Purchases ----------------------------------------------------------

    /// Start a purchase. Returns once the request is with the transport.
    pub fn purchase(&self, product_id: &str) -> Result<CorrelationId, EngineError> {
        self.issue(product_id)
    }

    /// Re-issue a purchase the caller was told it may retry. Always a new
    /// correlation id.
    pub fn retry_purchase(&self, product_id: &str) -> Result<CorrelationId, EngineError> {
        info!(product_id, "manual purchase retry");
        self.issue(product_id)
    }

    fn issue(&self, product_id: &str) -> Result<CorrelationId, EngineError> {
        let (intent, envelope) = match self.builder.build(product_id) {
            Ok(built) => built,
            Err(e) => {
                let err = EngineError::from(e);
                warn!(product_id, error = %err, "failed to build purchase request");
                self.report_purchase_failure(product_id, &err);
                return Err(err);
            }
        };

        let correlation_id = intent.correlation_id().clone();
        let request = PurchaseRequest {
            envelope: PurchaseEnvelope {
                identifier: product_id.to_string(),
                sealed: envelope.to_sealed(),
            },
            ticket: PurchaseTicket::new(intent),
        };

        self.metrics.purchases_issued_total.inc();
        self.update_outstanding();

        if let Err(failure) = self.transport.submit_purchase(request) {
            warn!(%correlation_id, product_id, "transport rejected purchase request");
            self.handle_purchase_failure(&correlation_id, product_id, failure.clone());
            return Err(failure.into());
        }

        info!(%correlation_id, product_id, testing = self.builder.testing(), "purchase issued");
        Ok(correlation_id)
    }

    /// Deliver the transport's result for one purchase.
    ///
    /// Consumes the ticket, so each request is answered at most once.
    pub fn on_purchase_response(
        &self,
        ticket: PurchaseTicket,
        outcome: Result<String, ServiceFailure>,
    ) {
        let raw = match outcome {
            Ok(raw) => raw,
            Err(failure) => {
                self.handle_purchase_failure(ticket.correlation_id(), ticket.product_id(), failure);
                return;
            }
        };

        let decoded = self.decoder.decode_purchase(&raw, &ticket);
        self.table.discard(ticket.correlation_id());
        self.update_outstanding();

        match decoded {
            Ok(confirmed) => {
                self.metrics.purchases_completed_total.inc();
                info!(
                    correlation_id = %confirmed.correlation_id,
                    product_id = %confirmed.product_id,
                    "purchase completed"
                );
                self.emit(BridgeEvent::PurchaseCompleted {
                    product_id: confirmed.product_id,
                });
                if let Err(e) = self.request_receipts() {
                    warn!(error = %e, "receipt refresh after purchase failed");
                }
            }
            Err(err) => {
                if let EngineError::ProductMismatch { expected, actual } = &err {
                    self.metrics.product_mismatches_total.inc();
                    error!(
                        correlation_id = %ticket.correlation_id(),
                        expected = %expected,
                        actual = ?actual,
                        "protocol violation: purchase response does not match request"
                    );
                } else {
                    warn!(
                        correlation_id = %ticket.correlation_id(),
                        product_id = ticket.product_id(),
                        error = %err,
                        "purchase response rejected"
                    );
                }
                self.report_purchase_failure(ticket.product_id(), &err);
            }
        }
    }

    fn handle_purchase_failure(
        &self,
        correlation_id: &CorrelationId,
        product_id: &str,
        failure: ServiceFailure,
    ) {
        self.table.discard(correlation_id);
        self.update_outstanding();

        match failure {
            ServiceFailure::AuthenticationRequired { token } => {
                // The ticket's product id, never anything from the response.
                if let Err(e) = self.recovery.suspend(product_id) {
                    let err = EngineError::from(e);
                    error!(%correlation_id, product_id, error = %err, "failed to persist suspended purchase");
                    self.report_purchase_failure(product_id, &err);
                    return;
                }
                self.metrics.suspensions_total.inc();
                self.emit(BridgeEvent::AuthenticationRequired {
                    token,
                    purpose: HandoffPurpose::Purchase,
                });
            }
            other => {
                let err = EngineError::from(other);
                warn!(%correlation_id, product_id, error = %err, "purchase failed");
                self.report_purchase_failure(product_id, &err);
            }
        }
    }

    fn report_purchase_failure(&self, product_id: &str, err: &EngineError) {
        self.metrics.purchases_failed_total.inc();
        self.emit(BridgeEvent::PurchaseFailed {
            product_id: product_id.to_string(),
            code: err.code(),
            message: err.to_string(),
            retryable: err.is_retryable(),
        });
    }

    // -- Recovery -----------------------------------------------------------

    /// The external authentication flow started for `purpose` has returned.
    pub fn on_activity_resume(
        &self,
        purpose: HandoffPurpose,
        auth_ok: bool,
    ) -> Result<HandoffOutcome, EngineError> {
        debug!(%purpose, auth_ok, "authentication hand-off returned");
        match purpose {
            HandoffPurpose::Purchase => Ok(HandoffOutcome::Purchase(self.resume_purchase(auth_ok)?)),
            HandoffPurpose::GamerUuid => Ok(HandoffOutcome::GamerUuid {
                refetching: self.resume_gamer_uuid(auth_ok)?,
            }),
        }
    }

    /// On success the suspended purchase is re-issued exactly once with its
    /// persisted product id. On failure it is dropped and reported; the
    /// player must start again.
    fn resume_purchase(&self, auth_ok: bool) -> Result<ResumeOutcome, EngineError> {
        let outcome = match self.recovery.resume(auth_ok) {
            Ok(outcome) => outcome,
            Err(e) => {
                let err = EngineError::from(e);
                error!(error = %err, "failed to read suspended purchase");
                if let RecoveryState::Suspended { product_id } = self.recovery.state() {
                    self.metrics.purchases_failed_total.inc();
                    self.emit(BridgeEvent::PurchaseFailed {
                        product_id,
                        code: ERROR_CODE_STORAGE,
                        message: err.to_string(),
                        retryable: false,
                    });
                }
                return Err(err);
            }
        };

        match &outcome {
            ResumeOutcome::NothingSuspended => {}
            ResumeOutcome::Abandoned { product_id } => {
                self.metrics.purchases_failed_total.inc();
                self.emit(BridgeEvent::PurchaseFailed {
                    product_id: product_id.clone(),
                    code: ERROR_CODE_AUTHENTICATION_ABANDONED,
                    message: "authentication failed or was cancelled".to_string(),
                    retryable: false,
                });
            }
            ResumeOutcome::Reissue { product_id } => {
                if !self.in_catalog(product_id) {
                    self.recovery.finish_resume();
                    warn!(product_id = %product_id, "suspended product no longer offered, not re-issuing");
                    self.metrics.purchases_failed_total.inc();
                    self.emit(BridgeEvent::PurchaseFailed {
                        product_id: product_id.clone(),
                        code: ERROR_CODE_UNKNOWN_PRODUCT,
                        message: EngineError::UnknownProduct(product_id.clone()).to_string(),
                        retryable: false,
                    });
                    return Ok(outcome);
                }
                self.metrics.resumes_total.inc();
                let issued = self.issue(product_id);
                self.recovery.finish_resume();
                issued?;
            }
        }
        Ok(outcome)
    }

    /// Returns whether the gamer UUID was requested again.
    fn resume_gamer_uuid(&self, auth_ok: bool) -> Result<bool, EngineError> {
        if !auth_ok {
            warn!("gamer uuid authentication failed or was cancelled");
            self.emit(BridgeEvent::GamerUuidFailed {
                code: ERROR_CODE_AUTHENTICATION_ABANDONED,
                message: "authentication failed or was cancelled".to_string(),
            });
            return Ok(false);
        }
        self.request_gamer_uuid()?;
        Ok(true)
    }

    /// True when no catalog is loaded or the catalog offers `product_id`.
    fn in_catalog(&self, product_id: &str) -> bool {
        match &*self.catalog.read() {
            Some(products) => products.iter().any(|p| p.identifier == product_id),
            None => true,
        }
    }

    // -- Receipts -----------------------------------------------------------

    /// Ask the transport for the account's receipts.
    pub fn request_receipts(&self) -> Result<(), EngineError> {
        if let Err(failure) = self.transport.request_receipts() {
            let err = EngineError::from(failure);
            warn!(error = %err, "receipt request not started");
            self.emit(BridgeEvent::ReceiptsFailed {
                code: err.code(),
                message: err.to_string(),
            });
            return Err(err);
        }
        debug!("receipt refresh requested");
        Ok(())
    }

    /// Deliver a receipt response. The list replaces the held snapshot.
    /// Failures are reported and never drive recovery.
    pub fn on_receipts_response(
        &self,
        outcome: Result<String, ServiceFailure>,
    ) -> Result<Vec<Receipt>, EngineError> {
        let decoded = outcome
            .map_err(EngineError::from)
            .and_then(|raw| self.decoder.decode_receipts(&raw).map_err(EngineError::from));

        match decoded {
            Ok(incoming) => {
                let ordered = self.receipts.merge(incoming);
                self.metrics.receipts_held.set(ordered.len() as i64);
                info!(count = ordered.len(), "receipts updated");
                self.emit(BridgeEvent::ReceiptsUpdated(ordered.clone()));
                Ok(ordered)
            }
            Err(err) => {
                warn!(error = %err, "receipt refresh failed");
                self.emit(BridgeEvent::ReceiptsFailed {
                    code: err.code(),
                    message: err.to_string(),
                });
                Err(err)
            }
        }
    }

    /// The signed-in account changed; its receipts and gamer UUID are stale.
    /// Both refreshes are attempted and the first error is returned.
    pub fn on_accounts_changed(&self) -> Result<(), EngineError> {
        info!("account changed, refreshing receipts and gamer uuid");
        *self.gamer_uuid.write() = None;
        let receipts = self.request_receipts();
        let gamer_uuid = self.request_gamer_uuid();
        receipts.and(gamer_uuid)
    }

    // -- Gamer UUID ---------------------------------------------------------

    /// Ask the transport for the signed-in account's gamer UUID.
    pub fn request_gamer_uuid(&self) -> Result<(), EngineError> {
        if let Err(failure) = self.transport.request_gamer_uuid() {
            let err = EngineError::from(failure);
            warn!(error = %err, "gamer uuid request not started");
            self.emit(BridgeEvent::GamerUuidFailed {
                code: err.code(),
                message: err.to_string(),
            });
            return Err(err);
        }
        debug!("gamer uuid requested");
        Ok(())
    }

    /// Deliver a gamer UUID response.
    ///
    /// `AuthenticationRequired` starts a `GamerUuid` hand-off and persists
    /// nothing; a pending purchase suspension is left alone.
    pub fn on_gamer_uuid_response(
        &self,
        outcome: Result<String, ServiceFailure>,
    ) -> Result<String, EngineError> {
        let raw = match outcome {
            Ok(raw) => raw,
            Err(ServiceFailure::AuthenticationRequired { token }) => {
                info!("gamer uuid requires authentication");
                self.emit(BridgeEvent::AuthenticationRequired {
                    token: token.clone(),
                    purpose: HandoffPurpose::GamerUuid,
                });
                return Err(EngineError::AuthenticationRequired { token });
            }
            Err(failure) => {
                let err = EngineError::from(failure);
                warn!(error = %err, "gamer uuid fetch failed");
                self.emit(BridgeEvent::GamerUuidFailed {
                    code: err.code(),
                    message: err.to_string(),
                });
                return Err(err);
            }
        };

        match self.decoder.decode_gamer_uuid(&raw) {
            Ok(uuid) => {
                info!(gamer_uuid = %uuid, "gamer uuid fetched");
                *self.gamer_uuid.write() = Some(uuid.clone());
                self.emit(BridgeEvent::GamerUuidFetched { uuid: uuid.clone() });
                Ok(uuid)
            }
            Err(e) => {
                let err = EngineError::from(e);
                warn!(error = %err, "gamer uuid response rejected");
                self.emit(BridgeEvent::GamerUuidFailed {
                    code: err.code(),
                    message: err.to_string(),
                });
                Err(err)
            }
        }
    }

    // -- Products -----------------------------------------------------------

    /// Ask the transport for the configured products.
    pub fn request_products(&self) -> Result<(), EngineError> {
        if let Err(failure) = self.transport.request_products(&self.product_ids) {
            let err = EngineError::from(failure);
            warn!(error = %err, "product request not started");
            self.emit(BridgeEvent::ProductsFailed {
                code: err.code(),
                message: err.to_string(),
            });
            return Err(err);
        }
        Ok(())
    }

    /// Deliver a product list response and cache it as the catalog.
    pub fn on_products_response(
        &self,
        outcome: Result<String, ServiceFailure>,
    ) -> Result<Vec<Product>, EngineError> {
        let decoded = outcome
            .map_err(EngineError::from)
            .and_then(|raw| self.decoder.decode_products(&raw).map_err(EngineError::from));

        match decoded {
            Ok(products) => {
                info!(count = products.len(), "catalog loaded");
                *self.catalog.write() = Some(products.clone());
                self.emit(BridgeEvent::ProductsUpdated(products.clone()));
                Ok(products)
            }
            Err(err) => {
                warn!(error = %err, "catalog refresh failed");
                self.emit(BridgeEvent::ProductsFailed {
                    code: err.code(),
                    message: err.to_string(),
                });
                Err(err)
            }
        }
    }

    // -- Accessors ----------------------------------------------------------

    pub fn receipts(&self) -> Vec<Receipt> {
        self.receipts.snapshot()
    }

    pub fn catalog(&self) -> Option<Vec<Product>> {
        self.catalog.read().clone()
    }

    pub fn gamer_uuid(&self) -> Option<String> {
        self.gamer_uuid.read().clone()
    }

    pub fn recovery_state(&self) -> RecoveryState {
        self.recovery.state()
    }

    pub fn outstanding_len(&self) -> usize {
        self.table.len()
    }

    pub fn metrics(&self) -> &EngineMetrics {
        &self.metrics
    }

    pub fn transport(&self) -> &T {
        &self.transport
    }

    fn update_outstanding(&self) {
        self.metrics.outstanding_requests.set(self.table.len() as i64);
    }

    fn emit(&self, event: BridgeEvent) {
        if self.events.send(event).is_err() {
            debug!("bridge receiver dropped, event discarded");
        }
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
