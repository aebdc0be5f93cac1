use std::collections::HashMap;
use std::sync::{Arc, RwLock};

use tracing::{debug, info};

use plend_types::{Clock, Commitment, ProofHash, SystemClock};

use crate::error::ProofError;
use crate::record::ActivityProof;
use crate::traits::ProofRegistry;

/// In-memory proof registry for tests, the demo, and embedding.
pub struct InMemoryProofRegistry {
    clock: Arc<dyn Clock>,
    proofs: RwLock<HashMap<ProofHash, ActivityProof>>,
}

impl InMemoryProofRegistry {
    pub fn new(clock: Arc<dyn Clock>) -> Self {
        Self {
            clock,
            proofs: RwLock::new(HashMap::new()),
        }
    }
}

impl Default for InMemoryProofRegistry {
    fn default() -> Self {
        Self::new(Arc::new(SystemClock))
    }
}

impl ProofRegistry for InMemoryProofRegistry {
    fn register_proof(
        &self,
        proof_hash: ProofHash,
        commitment: Commitment,
        score: u64,
    ) -> Result<ActivityProof, ProofError> {
        let mut proofs = self.proofs.write().map_err(|_| ProofError::LockPoisoned)?;

        if let Some(existing) = proofs.get(&proof_hash) {
            if existing.commitment != commitment {
                return Err(ProofError::AlreadyBound {
                    proof_hash,
                    existing: existing.commitment.clone(),
                });
            }
            if existing.score != score {
                return Err(ProofError::Immutable(proof_hash));
            }
            debug!(proof = %proof_hash.short_hex(), "proof already registered");
            return Ok(existing.clone());
        }

        let record = ActivityProof {
            proof_hash,
            commitment,
            score,
            verified_at: self.clock.now(),
        };
        proofs.insert(proof_hash, record.clone());

        info!(
            proof = %proof_hash.short_hex(),
            commitment = %record.commitment.short(),
            score,
            "activity proof registered"
        );
        Ok(record)
    }

    fn get_proof(&self, proof_hash: &ProofHash) -> Result<Option<ActivityProof>, ProofError> {
        let proofs = self.proofs.read().map_err(|_| ProofError::LockPoisoned)?;
        Ok(proofs.get(proof_hash).cloned())
    }

    fn proof_count(&self) -> Result<usize, ProofError> {
        let proofs = self.proofs.read().map_err(|_| ProofError::LockPoisoned)?;
        Ok(proofs.len())
    }
}
