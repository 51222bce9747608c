//! # Interrupted-Purchase Recovery
//!
//! A purchase that fails with "authentication required" is parked in a
//! durable slot while the player re-authenticates, then re-issued exactly
//! once when the hand-off returns successfully.
//!
//! ```text
//! store.rs  : sled-backed single-record slot, atomic read-and-clear
//! machine.rs: Idle / Suspended / Resuming state machine over the slot
//! ```

pub mod machine;
pub mod store;

pub use machine::{RecoveryState, RecoveryStateMachine, ResumeOutcome};
pub use store::{StoreError, SuspendedPurchase, SuspensionStore};
