//! Foundation types for PrivLend.
//!
//! Every other PrivLend crate depends on `plend-types`. Nothing here carries
//! protocol logic; these are the identifiers, statuses and clocks the ledger,
//! the index and the watcher share.
//!
//! # Key Types
//!
//! - [`Address`] — 20-byte account address of a lender, borrower or keeper
//! - [`Commitment`] — opaque identity commitment used as a correlation key
//! - [`ProofHash`] — opaque reference to a registered activity proof
//! - [`LoanId`] / [`ApplicationKey`] — ledger keys
//! - [`ApplicationStatus`] / [`OfferStatus`] — protocol states
//! - [`Timestamp`] / [`Clock`] — second-resolution time, injectable for tests

pub mod error;
pub mod identity;
pub mod loan;
pub mod temporal;

pub use error::TypeError;
pub use identity::{Address, Commitment, ProofHash};
pub use loan::{ApplicationKey, ApplicationStatus, LoanId, OfferStatus};
pub use temporal::{Clock, ManualClock, SystemClock, Timestamp};
