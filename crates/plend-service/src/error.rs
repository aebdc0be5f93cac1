use thiserror::Error;

use plend_fabric::FabricError;
use plend_index::IndexError;
use plend_ledger::{ErrorKind, LedgerError};
use plend_proofs::ProofError;
use plend_watcher::WatcherError;

#[derive(Debug, Error)]
pub enum ServiceError {
    #[error(transparent)]
    Ledger(#[from] LedgerError),

    #[error("proof registry: {0}")]
    Proof(#[from] ProofError),

    #[error("event relay: {0}")]
    Fabric(#[from] FabricError),

    #[error("commitment index: {0}")]
    Index(#[from] IndexError),

    #[error("deadline watcher: {0}")]
    Watcher(#[from] WatcherError),

    #[error("configuration error: {0}")]
    Config(String),

    #[error("journal is ahead of the ledger (journal seq {journal}, ledger head {ledger})")]
    JournalAhead { journal: u64, ledger: u64 },

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("internal error: {0}")]
    Internal(String),
}

impl ServiceError {
    /// Classify for callers that map errors onto responses.
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::Ledger(err) => err.kind(),
            Self::Proof(ProofError::LockPoisoned) => ErrorKind::Internal,
            Self::Proof(ProofError::NotFound(_)) => ErrorKind::NotFound,
            Self::Proof(ProofError::AlreadyBound { .. } | ProofError::Immutable(_)) => {
                ErrorKind::StateConflict
            }
            Self::Proof(_) => ErrorKind::Proof,
            Self::Config(_) => ErrorKind::Validation,
            Self::Fabric(_)
            | Self::Index(_)
            | Self::Watcher(_)
            | Self::JournalAhead { .. }
            | Self::Io(_)
            | Self::Internal(_) => ErrorKind::Internal,
        }
    }
}

pub type ServiceResult<T> = Result<T, ServiceError>;
