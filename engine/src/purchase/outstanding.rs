//! Outstanding purchase requests.
//!
//! Maps correlation id to the product id it was issued for. Registration
//! happens on the issuing context, resolution on a callback context, so the
//! table is a `DashMap`: each operation locks one shard, never the whole
//! transaction.
//!
//! `resolve` removes and returns in a single shard-locked operation. A second
//! `resolve` for the same id, concurrent or not, gets `NotFound`.

use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use thiserror::Error;

use super::types::CorrelationId;

/// Errors returned by table operations.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum TableError {
    /// The id is already registered. Ids are random 122-bit values, so this
    /// is a bug, not bad luck.
    #[error("duplicate correlation id: {0}")]
    DuplicateCorrelation(CorrelationId),

    #[error("no outstanding request for correlation id: {0}")]
    NotFound(CorrelationId),
}

/// In-flight purchase requests. Entries live for the session only.
#[derive(Debug, Default)]
pub struct OutstandingRequestTable {
    entries: DashMap<CorrelationId, String>,
}

impl OutstandingRequestTable {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record that `correlation_id` was issued for `product_id`.
    pub fn register(
        &self,
        correlation_id: &CorrelationId,
        product_id: &str,
    ) -> Result<(), TableError> {
        match self.entries.entry(correlation_id.clone()) {
            Entry::Occupied(_) => Err(TableError::DuplicateCorrelation(correlation_id.clone())),
            Entry::Vacant(slot) => {
                slot.insert(product_id.to_string());
                Ok(())
            }
        }
    }

    /// Remove and return the product id for `correlation_id`.
    pub fn resolve(&self, correlation_id: &CorrelationId) -> Result<String, TableError> {
        self.entries
            .remove(correlation_id)
            .map(|(_, product_id)| product_id)
            .ok_or_else(|| TableError::NotFound(correlation_id.clone()))
    }

    /// The product id registered for `correlation_id`, left in place.
    pub fn peek(&self, correlation_id: &CorrelationId) -> Option<String> {
        self.entries.get(correlation_id).map(|entry| entry.value().clone())
    }

    /// Drop an entry whose request will never be answered. Returns `true`
    /// if something was removed.
    pub fn discard(&self, correlation_id: &CorrelationId) -> bool {
        self.entries.remove(correlation_id).is_some()
    }

    pub fn contains(&self, correlation_id: &CorrelationId) -> bool {
        self.entries.contains_key(correlation_id)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}
