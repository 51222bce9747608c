//! # Prometheus Metrics
//!
//! Operational counters for the transaction engine. Every metric lives in a
//! dedicated [`prometheus::Registry`] under the `iap` namespace so embedding
//! applications can gather it alongside their own registries.

use prometheus::{Encoder, IntCounter, IntGauge, Registry, TextEncoder};

use crate::config::METRICS_NAMESPACE;

/// Metric handles for one orchestrator.
///
/// Clone-friendly: prometheus handles are reference counted.
#[derive(Clone)]
pub struct EngineMetrics {
    registry: Registry,
    /// Purchase requests handed to the transport.
    pub purchases_issued_total: IntCounter,
    /// Purchases confirmed by the storefront and validated.
    pub purchases_completed_total: IntCounter,
    /// Purchases reported as failed to the bridge.
    pub purchases_failed_total: IntCounter,
    /// Responses rejected because they belonged to another request.
    pub product_mismatches_total: IntCounter,
    /// Purchases parked for re-authentication.
    pub suspensions_total: IntCounter,
    /// Suspended purchases re-issued after authentication.
    pub resumes_total: IntCounter,
    /// Purchase requests awaiting a response.
    pub outstanding_requests: IntGauge,
    /// Receipts in the current snapshot.
    pub receipts_held: IntGauge,
}

impl std::fmt::Debug for EngineMetrics {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EngineMetrics")
            .field("purchases_issued_total", &self.purchases_issued_total.get())
            .field(
                "purchases_completed_total",
                &self.purchases_completed_total.get(),
            )
            .field("purchases_failed_total", &self.purchases_failed_total.get())
            .finish_non_exhaustive()
    }
}

fn counter(registry: &Registry, name: &str, help: &str) -> Result<IntCounter, prometheus::Error> {
    let counter = IntCounter::new(name, help)?;
    registry.register(Box::new(counter.clone()))?;
    Ok(counter)
}

fn gauge(registry: &Registry, name: &str, help: &str) -> Result<IntGauge, prometheus::Error> {
    let gauge = IntGauge::new(name, help)?;
    registry.register(Box::new(gauge.clone()))?;
    Ok(gauge)
}

impl EngineMetrics {
    /// Create and register all metrics.
    pub fn new() -> Result<Self, prometheus::Error> {
        let registry = Registry::new_custom(Some(METRICS_NAMESPACE.into()), None)?;

        let purchases_issued_total = counter(
            &registry,
            "purchases_issued_total",
            "Total purchase requests handed to the transport",
        )?;
        let purchases_completed_total = counter(
            &registry,
            "purchases_completed_total",
            "Total purchases confirmed by the storefront",
        )?;
        let purchases_failed_total = counter(
            &registry,
            "purchases_failed_total",
            "Total purchases reported as failed",
        )?;
        let product_mismatches_total = counter(
            &registry,
            "product_mismatches_total",
            "Total purchase responses rejected for a product mismatch",
        )?;
        let suspensions_total = counter(
            &registry,
            "suspensions_total",
            "Total purchases suspended pending authentication",
        )?;
        let resumes_total = counter(
            &registry,
            "resumes_total",
            "Total suspended purchases re-issued after authentication",
        )?;
        let outstanding_requests = gauge(
            &registry,
            "outstanding_requests",
            "Purchase requests awaiting a storefront response",
        )?;
        let receipts_held = gauge(
            &registry,
            "receipts_held",
            "Receipts in the current account snapshot",
        )?;

        Ok(Self {
            registry,
            purchases_issued_total,
            purchases_completed_total,
            purchases_failed_total,
            product_mismatches_total,
            suspensions_total,
            resumes_total,
            outstanding_requests,
            receipts_held,
        })
    }

    /// Prometheus text exposition of every registered metric.
    pub fn encode(&self) -> Result<String, prometheus::Error> {
        let encoder = TextEncoder::new();
        let metric_families = self.registry.gather();
        let mut buffer = Vec::new();
        encoder.encode(&metric_families, &mut buffer)?;
        String::from_utf8(buffer).map_err(|e| prometheus::Error::Msg(e.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn encode_uses_namespace() {
        let metrics = EngineMetrics::new().unwrap();
        metrics.purchases_issued_total.inc();
        let text = metrics.encode().unwrap();
        assert!(text.contains("iap_purchases_issued_total 1"));
        assert!(text.contains("iap_outstanding_requests 0"));
    }

    #[test]
    fn instances_do_not_share_registries() {
        let a = EngineMetrics::new().unwrap();
        let b = EngineMetrics::new().unwrap();
        a.resumes_total.inc();
        assert_eq!(b.resumes_total.get(), 0);
    }
}
