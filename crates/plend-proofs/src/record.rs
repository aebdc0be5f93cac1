use serde::{Deserialize, Serialize};

use plend_types::{Commitment, ProofHash, Timestamp};

/// An accepted activity proof. Immutable once registered.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ActivityProof {
    pub proof_hash: ProofHash,
    pub commitment: Commitment,
    pub score: u64,
    pub verified_at: Timestamp,
}

impl ActivityProof {
    /// Returns `true` if this proof backs `commitment` with at least `threshold`.
    pub fn satisfies(&self, commitment: &Commitment, threshold: u64) -> bool {
        self.commitment == *commitment && self.score >= threshold
    }
}
