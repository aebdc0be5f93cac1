use std::fmt;

use plend_proofs::ProofError;
use plend_types::{Address, ApplicationKey, LoanId};

use crate::funds::TransferError;

/// Coarse classification of ledger failures.
///
/// Off-chain components branch on this rather than on messages: the watcher,
/// for example, treats `StateConflict` as "already resolved".
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum ErrorKind {
    Validation,
    Authorization,
    Proof,
    StateConflict,
    Deadline,
    NotFound,
    Transfer,
    Internal,
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Validation => "validation",
            Self::Authorization => "authorization",
            Self::Proof => "proof",
            Self::StateConflict => "state_conflict",
            Self::Deadline => "deadline",
            Self::NotFound => "not_found",
            Self::Transfer => "transfer",
            Self::Internal => "internal",
        };
        f.write_str(s)
    }
}

/// Errors produced by ledger operations.
///
/// Every error is raised before any state change; a failed operation leaves
/// the ledger exactly as it was.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum LedgerError {
    #[error("validation failed: {0}")]
    Validation(String),

    #[error("{caller} is not authorized to {action}")]
    Authorization {
        caller: Address,
        action: &'static str,
    },

    #[error("proof rejected: {0}")]
    Proof(#[from] ProofError),

    #[error("state conflict: {0}")]
    StateConflict(String),

    #[error("deadline violation: {0}")]
    Deadline(String),

    #[error("{0} not found")]
    LoanNotFound(LoanId),

    #[error("application {0} not found")]
    ApplicationNotFound(ApplicationKey),

    #[error("transfer failed: {0}")]
    Transfer(#[from] TransferError),

    #[error("arithmetic overflow: {0}")]
    Arithmetic(String),

    #[error("ledger lock poisoned")]
    LockPoisoned,
}

impl LedgerError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::Validation(_) | Self::Arithmetic(_) => ErrorKind::Validation,
            Self::Authorization { .. } => ErrorKind::Authorization,
            Self::Proof(ProofError::LockPoisoned) => ErrorKind::Internal,
            Self::Proof(_) => ErrorKind::Proof,
            Self::StateConflict(_) => ErrorKind::StateConflict,
            Self::Deadline(_) => ErrorKind::Deadline,
            Self::LoanNotFound(_) | Self::ApplicationNotFound(_) => ErrorKind::NotFound,
            Self::Transfer(_) => ErrorKind::Transfer,
            Self::LockPoisoned => ErrorKind::Internal,
        }
    }

    pub(crate) fn unauthorized(caller: &Address, action: &'static str) -> Self {
        Self::Authorization {
            caller: *caller,
            action,
        }
    }
}
