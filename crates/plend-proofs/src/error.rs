use plend_types::{Commitment, ProofHash};

/// Errors produced by proof registration and verification.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ProofError {
    #[error("proof {proof_hash} is already bound to commitment {existing}")]
    AlreadyBound {
        proof_hash: ProofHash,
        existing: Commitment,
    },

    #[error("proof {0} is already registered with a different score")]
    Immutable(ProofHash),

    #[error("proof {0} is not registered")]
    NotFound(ProofHash),

    #[error("proof {0} is bound to a different commitment")]
    CommitmentMismatch(ProofHash),

    #[error("score {score} is below the required threshold {threshold}")]
    ScoreBelowThreshold { score: u64, threshold: u64 },

    #[error("proof registry lock poisoned")]
    LockPoisoned,
}
