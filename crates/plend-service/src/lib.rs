//! Loan lifecycle service for PrivLend.
//!
//! [`LoanLifecycleService`] is the one object a process builds at startup.
//! It forwards protocol calls to the ledger, then pumps the resulting events
//! through the relay into the commitment index and the deadline watcher.
//! Off-chain failures never roll back a ledger transition; the pump simply
//! retries from its cursor on the next pass.

pub mod config;
pub mod error;
pub mod pump;
pub mod service;

pub use config::{ApiToken, GenesisBalance, ServerConfig, ServiceConfig};
pub use error::{ServiceError, ServiceResult};
pub use pump::{EventPump, PumpReport};
pub use service::{LoanLifecycleService, ServiceStatus};
