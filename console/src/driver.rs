//! # Storefront Driver
//!
//! Connects the engine's [`Transport`] seam to the sandbox storefront over a
//! tokio channel. The engine pushes [`TransportRequest`]s; a pump task serves
//! each one and hands the result back to the orchestrator, so responses
//! arrive on a different task than the one that issued them.
//!
//! The pump stops once the channel has been quiet for the idle window.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::mpsc::{self, UnboundedReceiver, UnboundedSender};
use tracing::{debug, warn};

use iap_engine::config::{EngineConfig, ERROR_CODE_TRANSPORT_UNAVAILABLE};
use iap_engine::orchestrator::{BridgeEvent, PurchaseRequest, TransactionOrchestrator, Transport};
use iap_engine::recovery::SuspensionStore;
use iap_engine::sandbox::SandboxStorefront;
use iap_engine::{EngineError, ServiceFailure};

/// One storefront call queued by the engine.
#[derive(Debug)]
pub enum TransportRequest {
    Purchase(PurchaseRequest),
    Receipts,
    Products(Vec<String>),
    GamerUuid,
}

/// [`Transport`] that queues requests for the pump task.
#[derive(Debug, Clone)]
pub struct ChannelTransport {
    tx: UnboundedSender<TransportRequest>,
}

impl ChannelTransport {
    pub fn new() -> (Self, UnboundedReceiver<TransportRequest>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (Self { tx }, rx)
    }

    fn send(&self, request: TransportRequest) -> Result<(), ServiceFailure> {
        self.tx.send(request).map_err(|_| ServiceFailure::Transport {
            code: ERROR_CODE_TRANSPORT_UNAVAILABLE,
            message: "storefront task stopped".to_string(),
        })
    }
}

impl Transport for ChannelTransport {
    fn submit_purchase(&self, request: PurchaseRequest) -> Result<(), ServiceFailure> {
        self.send(TransportRequest::Purchase(request))
    }

    fn request_receipts(&self) -> Result<(), ServiceFailure> {
        self.send(TransportRequest::Receipts)
    }

    fn request_products(&self, product_ids: &[String]) -> Result<(), ServiceFailure> {
        self.send(TransportRequest::Products(product_ids.to_vec()))
    }

    fn request_gamer_uuid(&self) -> Result<(), ServiceFailure> {
        self.send(TransportRequest::GamerUuid)
    }
}

pub type Engine = TransactionOrchestrator<ChannelTransport>;

/// Everything one console command needs.
pub struct Session {
    pub engine: Arc<Engine>,
    pub events: UnboundedReceiver<BridgeEvent>,
    pub storefront: Arc<SandboxStorefront>,
    requests: Option<UnboundedReceiver<TransportRequest>>,
}

impl Session {
    pub fn open(
        config: &EngineConfig,
        store: SuspensionStore,
        storefront: SandboxStorefront,
    ) -> Result<Self, EngineError> {
        let (transport, requests) = ChannelTransport::new();
        let (engine, events) = TransactionOrchestrator::new(config, store, transport)?;
        Ok(Self {
            engine: Arc::new(engine),
            events,
            storefront: Arc::new(storefront),
            requests: Some(requests),
        })
    }

    /// Serve queued requests on a separate task until the storefront goes
    /// idle, then return every bridge event emitted so far.
    pub async fn settle(&mut self, idle: Duration) -> Vec<BridgeEvent> {
        if let Some(requests) = self.requests.take() {
            let engine = Arc::clone(&self.engine);
            let storefront = Arc::clone(&self.storefront);
            let handle = tokio::spawn(pump(engine, storefront, requests, idle));
            match handle.await {
                Ok((served, requests)) => {
                    debug!(served, "storefront settled");
                    self.requests = Some(requests);
                }
                Err(e) => warn!(error = %e, "storefront task failed"),
            }
        }

        let mut out = Vec::new();
        while let Ok(event) = self.events.try_recv() {
            out.push(event);
        }
        out
    }
}

/// Serve requests until none arrives within `idle`. Hands the receiver back
/// so the session can pump again.
pub async fn pump(
    engine: Arc<Engine>,
    storefront: Arc<SandboxStorefront>,
    mut requests: UnboundedReceiver<TransportRequest>,
    idle: Duration,
) -> (usize, UnboundedReceiver<TransportRequest>) {
    let mut served = 0;
    loop {
        match tokio::time::timeout(idle, requests.recv()).await {
            Ok(Some(request)) => {
                serve(&engine, &storefront, request);
                served += 1;
            }
            Ok(None) => break,
            Err(_) => break,
        }
    }
    (served, requests)
}

fn serve(engine: &Engine, storefront: &SandboxStorefront, request: TransportRequest) {
    match request {
        TransportRequest::Purchase(request) => {
            let response = storefront.handle_purchase(&request.envelope);
            engine.on_purchase_response(request.ticket, response);
        }
        // Failures are reported as bridge events; nothing more to do here.
        TransportRequest::Receipts => {
            let _ = engine.on_receipts_response(storefront.handle_receipts());
        }
        TransportRequest::Products(ids) => {
            let _ = engine.on_products_response(storefront.handle_products(&ids));
        }
        TransportRequest::GamerUuid => {
            let _ = engine.on_gamer_uuid_response(storefront.handle_gamer_uuid());
        }
    }
}

/// One-line human rendering of a bridge event.
pub fn render_event(event: &BridgeEvent) -> String {
    match event {
        BridgeEvent::PurchaseCompleted { product_id } => {
            format!("purchase completed: {product_id}")
        }
        BridgeEvent::PurchaseFailed {
            product_id,
            code,
            message,
            retryable,
        } => {
            let hint = if *retryable { " (retry available)" } else { "" };
            format!("purchase failed: {product_id} [{code}] {message}{hint}")
        }
        BridgeEvent::ReceiptsUpdated(receipts) => {
            let mut out = format!("receipts ({}):", receipts.len());
            for r in receipts {
                out.push_str(&format!(
                    "\n  {}  {:<12} {:>6}  {}",
                    r.purchase_date.format("%Y-%m-%d %H:%M:%S"),
                    r.identifier,
                    r.price_in_cents,
                    r.uuid
                ));
            }
            out
        }
        BridgeEvent::ReceiptsFailed { code, message } => {
            format!("receipt refresh failed: [{code}] {message}")
        }
        BridgeEvent::ProductsUpdated(products) => {
            let mut out = format!("products ({}):", products.len());
            for p in products {
                out.push_str(&format!(
                    "\n  {:<12} {:<20} {:>6}",
                    p.identifier, p.name, p.price_in_cents
                ));
            }
            out
        }
        BridgeEvent::ProductsFailed { code, message } => {
            format!("catalog refresh failed: [{code}] {message}")
        }
        BridgeEvent::GamerUuidFetched { uuid } => format!("gamer uuid: {uuid}"),
        BridgeEvent::GamerUuidFailed { code, message } => {
            format!("gamer uuid fetch failed: [{code}] {message}")
        }
        BridgeEvent::AuthenticationRequired { token, purpose } => format!(
            "authentication required for {purpose} (handoff {token}); \
             run `iap-console resume --for {purpose}` when done"
        ),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use iap_engine::crypto::EnvelopeKeypair;
    use iap_engine::orchestrator::HandoffPurpose;
    use iap_engine::HandoffToken;

    fn session() -> Session {
        let client = EnvelopeKeypair::generate();
        let storefront_keys = EnvelopeKeypair::generate();
        let config = EngineConfig {
            storefront_public_key: storefront_keys.public_key().to_hex(),
            client_secret_key: client.secret_hex(),
            testing: true,
            product_ids: vec!["sword".into(), "axe".into()],
            data_dir: None,
        };
        let storefront = SandboxStorefront::in_memory(
            storefront_keys,
            client.public_key(),
            SandboxStorefront::default_catalog(),
        )
        .unwrap();
        Session::open(&config, SuspensionStore::open_temporary().unwrap(), storefront).unwrap()
    }

    #[tokio::test]
    async fn purchase_settles_with_receipts() {
        let mut s = session();
        s.engine.purchase("sword").unwrap();

        let events = s.settle(Duration::from_millis(50)).await;
        assert_eq!(
            events[0],
            BridgeEvent::PurchaseCompleted {
                product_id: "sword".into()
            }
        );
        assert!(matches!(&events[1], BridgeEvent::ReceiptsUpdated(list) if list.len() == 1));
    }

    #[tokio::test]
    async fn suspend_and_resume_across_settles() {
        let mut s = session();
        s.storefront
            .require_authentication(HandoffToken::new("signin"));
        s.engine.purchase("axe").unwrap();

        let events = s.settle(Duration::from_millis(50)).await;
        assert!(matches!(
            &events[..],
            [BridgeEvent::AuthenticationRequired { .. }]
        ));

        s.storefront.authenticate();
        s.engine
            .on_activity_resume(HandoffPurpose::Purchase, true)
            .unwrap();
        let events = s.settle(Duration::from_millis(50)).await;
        assert_eq!(
            events[0],
            BridgeEvent::PurchaseCompleted {
                product_id: "axe".into()
            }
        );
    }

    #[tokio::test]
    async fn products_are_cached() {
        let mut s = session();
        s.engine.request_products().unwrap();
        let events = s.settle(Duration::from_millis(50)).await;
        assert!(matches!(&events[..], [BridgeEvent::ProductsUpdated(list)] if list.len() == 2));
        assert_eq!(s.engine.catalog().map(|c| c.len()), Some(2));
    }

    #[tokio::test]
    async fn gamer_uuid_is_served_on_the_pump() {
        let mut s = session();
        s.engine.request_gamer_uuid().unwrap();
        let events = s.settle(Duration::from_millis(50)).await;
        assert_eq!(
            events,
            vec![BridgeEvent::GamerUuidFetched {
                uuid: s.storefront.gamer_uuid()
            }]
        );
    }

    #[test]
    fn render_names_handoff_purpose() {
        let line = render_event(&BridgeEvent::AuthenticationRequired {
            token: HandoffToken::new("t"),
            purpose: HandoffPurpose::GamerUuid,
        });
        assert!(line.contains("resume --for gamer-uuid"));
    }

    #[test]
    fn render_marks_retryable_failures() {
        let line = render_event(&BridgeEvent::PurchaseFailed {
            product_id: "sword".into(),
            code: 503,
            message: "unavailable".into(),
            retryable: true,
        });
        assert!(line.contains("[503]"));
        assert!(line.ends_with("(retry available)"));
    }
}
