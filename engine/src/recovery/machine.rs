//! Suspend/resume across an authentication hand-off.
//!
//! ```text
//!            suspend(p)                 resume(ok=true)               finish_resume()
//!   Idle ───────────────► Suspended ───────────────► Resuming ───────────────► Idle
//!    ▲                       │                       (slot read and cleared,
//!    │     resume(ok=false)  │                        re-issue in progress)
//!    └───────────────────────┘
//! ```
//!
//! `Resuming` lasts until the orchestrator has handed the re-issued purchase
//! to the transport. A suspension that happens during the re-issue wins over
//! [`RecoveryStateMachine::finish_resume`].
//!
//! The machine never issues a purchase itself. [`RecoveryStateMachine::resume`]
//! hands back a [`ResumeOutcome`] and the orchestrator acts on it, always with
//! the product id read from the durable slot.

use parking_lot::Mutex;
use tracing::{debug, info, warn};

use super::store::{StoreResult, SuspendedPurchase, SuspensionStore};

/// Current recovery state.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RecoveryState {
    Idle,
    Suspended { product_id: String },
    Resuming { product_id: String },
}

/// What the orchestrator should do after an authentication hand-off returns.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ResumeOutcome {
    /// Nothing was suspended.
    NothingSuspended,
    /// Re-issue a purchase for this product.
    Reissue { product_id: String },
    /// Authentication failed or was cancelled; the purchase is dropped.
    Abandoned { product_id: String },
}

/// Owns the suspended-purchase slot and the in-memory state mirror.
///
/// The mutex is held across the store operation so that two concurrent
/// resumes cannot both observe the record.
#[derive(Debug)]
pub struct RecoveryStateMachine {
    store: SuspensionStore,
    state: Mutex<RecoveryState>,
}

impl RecoveryStateMachine {
    /// Start from whatever the durable slot holds. A record left by a
    /// previous process puts the machine in `Suspended`.
    pub fn restore(store: SuspensionStore) -> StoreResult<Self> {
        let state = match store.peek()? {
            Some(record) => {
                info!(product_id = %record.product_id, "restored suspended purchase");
                RecoveryState::Suspended {
                    product_id: record.product_id,
                }
            }
            None => RecoveryState::Idle,
        };
        Ok(Self {
            store,
            state: Mutex::new(state),
        })
    }

    pub fn state(&self) -> RecoveryState {
        self.state.lock().clone()
    }

    /// Persist `product_id` as the interrupted purchase. Overwrites an
    /// earlier suspension.
    pub fn suspend(&self, product_id: &str) -> StoreResult<()> {
        let mut state = self.state.lock();
        if let RecoveryState::Suspended { product_id: previous } = &*state {
            if previous != product_id {
                warn!(previous = %previous, product_id, "overwriting suspended purchase");
            }
        }
        self.store.suspend(&SuspendedPurchase {
            product_id: product_id.to_string(),
        })?;
        *state = RecoveryState::Suspended {
            product_id: product_id.to_string(),
        };
        info!(product_id, "purchase suspended pending authentication");
        Ok(())
    }

    /// Handle the return from the authentication hand-off.
    ///
    /// The slot is read and cleared in one step whatever `auth_ok` says.
    pub fn resume(&self, auth_ok: bool) -> StoreResult<ResumeOutcome> {
        let mut state = self.state.lock();
        let record = match self.store.take()? {
            Some(record) => record,
            None => {
                debug!("resume with nothing suspended");
                if !matches!(*state, RecoveryState::Resuming { .. }) {
                    *state = RecoveryState::Idle;
                }
                return Ok(ResumeOutcome::NothingSuspended);
            }
        };

        if !auth_ok {
            *state = RecoveryState::Idle;
            warn!(product_id = %record.product_id, "authentication failed, suspended purchase dropped");
            return Ok(ResumeOutcome::Abandoned {
                product_id: record.product_id,
            });
        }

        *state = RecoveryState::Resuming {
            product_id: record.product_id.clone(),
        };
        info!(product_id = %record.product_id, "resuming suspended purchase");
        Ok(ResumeOutcome::Reissue {
            product_id: record.product_id,
        })
    }

    /// The re-issue that followed [`Self::resume`] has been handed off.
    pub fn finish_resume(&self) {
        let mut state = self.state.lock();
        if let RecoveryState::Resuming { product_id } = &*state {
            debug!(product_id = %product_id, "resume finished");
            *state = RecoveryState::Idle;
        }
    }
}
