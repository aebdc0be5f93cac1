use plend_types::{Commitment, ProofHash};

use crate::error::ProofError;
use crate::record::ActivityProof;

/// Registry boundary consumed by the loan ledger.
pub trait ProofRegistry: Send + Sync {
    /// Store a verified proof record.
    ///
    /// Fails if `proof_hash` is already bound to a different commitment.
    fn register_proof(
        &self,
        proof_hash: ProofHash,
        commitment: Commitment,
        score: u64,
    ) -> Result<ActivityProof, ProofError>;

    /// Look up a registered proof.
    fn get_proof(&self, proof_hash: &ProofHash) -> Result<Option<ActivityProof>, ProofError>;

    /// Explain why a proof does not satisfy `(commitment, threshold)`.
    ///
    /// Read-only; succeeds exactly when [`Self::verify_proof`] is true.
    fn check_proof(
        &self,
        proof_hash: &ProofHash,
        commitment: &Commitment,
        threshold: u64,
    ) -> Result<ActivityProof, ProofError> {
        let proof = self
            .get_proof(proof_hash)?
            .ok_or(ProofError::NotFound(*proof_hash))?;
        if proof.commitment != *commitment {
            return Err(ProofError::CommitmentMismatch(*proof_hash));
        }
        if proof.score < threshold {
            return Err(ProofError::ScoreBelowThreshold {
                score: proof.score,
                threshold,
            });
        }
        Ok(proof)
    }

    /// True iff a record exists, its commitment matches, and its score meets
    /// `threshold`.
    fn verify_proof(&self, proof_hash: &ProofHash, commitment: &Commitment, threshold: u64) -> bool {
        self.check_proof(proof_hash, commitment, threshold).is_ok()
    }

    fn proof_count(&self) -> Result<usize, ProofError>;
}
