//! Commitment index for PrivLend.
//!
//! The ledger stores applications under `(loan_id, commitment)` and cannot
//! enumerate them. This crate maintains the off-chain view that can: which
//! commitments applied to a loan, which loans a commitment applied to, and
//! which approved applications are still awaiting repayment. It is built
//! purely from the ledger's event log and is never consulted for decisions
//! that move funds.
//!
//! # Key Types
//!
//! - [`CommitmentIndex`] -- the concurrent, idempotent view
//! - [`IndexEntry`] -- what the index knows about one application
//! - [`IndexUpdate`] -- the effect one event had on the view

pub mod entry;
pub mod error;
pub mod index;

pub use entry::{IndexEntry, IndexUpdate};
pub use error::{IndexError, IndexResult};
pub use index::CommitmentIndex;
