//! Event relay for PrivLend.
//!
//! Everything off-chain is derived from the ledger's ordered event log. This
//! crate carries that log to consumers: a CRC-framed write-ahead journal so
//! a restarted process can rebuild its views without rereading the ledger
//! from the beginning, and a broadcast router that fans events out to
//! filtered subscribers.

pub mod error;
pub mod journal;
pub mod relay;

pub use error::FabricError;
pub use journal::{EventJournal, JournalConfig, SyncMode};
pub use relay::{EventFilter, EventRelay, EventStream, RelayConfig};
