use std::fmt;

use serde::{Deserialize, Serialize};

use crate::identity::Commitment;

/// Ledger-assigned loan offer identifier. Sequential, starting at 1.
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct LoanId(u64);

impl LoanId {
    pub const fn new(raw: u64) -> Self {
        Self(raw)
    }

    pub const fn get(self) -> u64 {
        self.0
    }

    pub const fn next(self) -> Self {
        Self(self.0 + 1)
    }
}

impl fmt::Debug for LoanId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "LoanId({})", self.0)
    }
}

impl fmt::Display for LoanId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "loan#{}", self.0)
    }
}

impl From<u64> for LoanId {
    fn from(raw: u64) -> Self {
        Self(raw)
    }
}

/// Primary key of an application: one per (loan, commitment) pair.
#[derive(Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct ApplicationKey {
    pub loan_id: LoanId,
    pub commitment: Commitment,
}

impl ApplicationKey {
    pub fn new(loan_id: LoanId, commitment: Commitment) -> Self {
        Self {
            loan_id,
            commitment,
        }
    }
}

impl fmt::Display for ApplicationKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.loan_id, self.commitment.short())
    }
}

/// Lifecycle of a loan offer.
///
/// `Open -> Filled` once every slot is taken; `Open -> Cancelled` only while
/// no slot has been filled. Both targets are terminal.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum OfferStatus {
    Open,
    Filled,
    Cancelled,
}

impl fmt::Display for OfferStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Open => "Open",
            Self::Filled => "Filled",
            Self::Cancelled => "Cancelled",
        };
        f.write_str(s)
    }
}

/// Lifecycle of an application.
///
/// The only reachable edges are `Pending -> Approved`, `Approved -> Repaid`
/// and `Approved -> Defaulted`. `Repaid` and `Defaulted` are terminal and
/// mutually exclusive.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ApplicationStatus {
    Pending,
    Approved,
    Repaid,
    Defaulted,
}

impl ApplicationStatus {
    /// Returns `true` if `next` is a legal successor of `self`.
    pub fn can_transition_to(self, next: Self) -> bool {
        matches!(
            (self, next),
            (Self::Pending, Self::Approved)
                | (Self::Approved, Self::Repaid)
                | (Self::Approved, Self::Defaulted)
        )
    }

    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Repaid | Self::Defaulted)
    }

    /// Position along the lifecycle; both terminal states share the top rank.
    pub fn rank(self) -> u8 {
        match self {
            Self::Pending => 0,
            Self::Approved => 1,
            Self::Repaid | Self::Defaulted => 2,
        }
    }
}

impl fmt::Display for ApplicationStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Pending => "Pending",
            Self::Approved => "Approved",
            Self::Repaid => "Repaid",
            Self::Defaulted => "Defaulted",
        };
        f.write_str(s)
    }
}
