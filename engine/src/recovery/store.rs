//! # Suspended-Purchase Slot
//!
//! The only state that must survive a process restart: the product id of a
//! purchase interrupted by re-authentication. Built on sled.
//!
//! ## Layout
//!
//! | Tree       | Key                        | Value                        |
//! |------------|----------------------------|------------------------------|
//! | `recovery` | `iap.suspended_purchase`   | `bincode(SuspendedPurchase)` |
//!
//! Absence of the key means "nothing suspended".
//!
//! ## Atomicity
//!
//! sled applies single-key operations atomically. [`SuspensionStore::suspend`]
//! is one `insert`, [`SuspensionStore::take`] is one `remove` that returns
//! the previous value, so read-and-clear cannot be split by a second caller
//! and a record is never observed half-written. Both flush before returning.

use std::path::Path;

use serde::{Deserialize, Serialize};
use sled::{Db, Tree};

use crate::config::{RECOVERY_TREE, SUSPENDED_PURCHASE_KEY};

// ---------------------------------------------------------------------------
// Error Type
// ---------------------------------------------------------------------------

#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("sled error: {0}")]
    Sled(#[from] sled::Error),

    #[error("serialization error: {0}")]
    Serialization(String),
}

pub type StoreResult<T> = Result<T, StoreError>;

// ---------------------------------------------------------------------------
// SuspendedPurchase
// ---------------------------------------------------------------------------

/// The persisted record. Most recent suspension wins.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SuspendedPurchase {
    pub product_id: String,
}

// ---------------------------------------------------------------------------
// SuspensionStore
// ---------------------------------------------------------------------------

/// Durable single-slot store for a suspended purchase.
///
/// Cheap to clone; clones share the same sled handles.
#[derive(Debug, Clone)]
pub struct SuspensionStore {
    db: Db,
    slot: Tree,
}

impl SuspensionStore {
    /// Open or create the store at `path`.
    pub fn open<P: AsRef<Path>>(path: P) -> StoreResult<Self> {
        let db = sled::open(path)?;
        Self::from_db(db)
    }

    /// A store that lives in memory and vanishes on drop. For tests.
    pub fn open_temporary() -> StoreResult<Self> {
        let db = sled::Config::new().temporary(true).open()?;
        Self::from_db(db)
    }

    fn from_db(db: Db) -> StoreResult<Self> {
        let slot = db.open_tree(RECOVERY_TREE)?;
        Ok(Self { db, slot })
    }

    /// Open another named tree in the same database.
    pub fn open_tree(&self, name: &str) -> StoreResult<Tree> {
        Ok(self.db.open_tree(name)?)
    }

    /// Persist `record`, overwriting any earlier suspension.
    pub fn suspend(&self, record: &SuspendedPurchase) -> StoreResult<()> {
        let bytes =
            bincode::serialize(record).map_err(|e| StoreError::Serialization(e.to_string()))?;
        self.slot.insert(SUSPENDED_PURCHASE_KEY, bytes)?;
        self.db.flush()?;
        Ok(())
    }

    /// Read and clear the slot in one atomic step.
    pub fn take(&self) -> StoreResult<Option<SuspendedPurchase>> {
        let previous = self.slot.remove(SUSPENDED_PURCHASE_KEY)?;
        self.db.flush()?;
        previous.map(|bytes| decode(&bytes)).transpose()
    }

    /// Read the slot without clearing it.
    pub fn peek(&self) -> StoreResult<Option<SuspendedPurchase>> {
        self.slot
            .get(SUSPENDED_PURCHASE_KEY)?
            .map(|bytes| decode(&bytes))
            .transpose()
    }

}

fn decode(bytes: &[u8]) -> StoreResult<SuspendedPurchase> {
    bincode::deserialize(bytes).map_err(|e| StoreError::Serialization(e.to_string()))
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
