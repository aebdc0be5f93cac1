//! Authoritative loan ledger for PrivLend.
//!
//! This crate is the protocol state machine. It provides:
//! - Offer and application records with lender-only identity redaction
//! - The ordered event log every off-chain component is derived from
//! - `LoanWriter` / `LoanReader` trait boundaries
//! - `InMemoryLoanLedger`, a single-writer implementation for tests and embedding
//! - The funds-transfer boundary and an in-memory token
//! - The configurable authorization policy for default triggers

pub mod error;
pub mod event;
pub mod funds;
pub mod memory;
pub mod policy;
pub mod records;
pub mod traits;

pub use error::{ErrorKind, LedgerError};
pub use event::{EventKind, EventPayload, LedgerEvent};
pub use funds::{FundsTransfer, InMemoryToken, TransferError};
pub use memory::InMemoryLoanLedger;
pub use policy::DefaultTriggerPolicy;
pub use records::{repayment_amount, Application, ApplicationView, LoanOffer, OfferTerms};
pub use traits::{LoanLedger, LoanReader, LoanWriter};
