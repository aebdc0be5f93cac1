//! Activity proof registry for PrivLend.
//!
//! Proofs are produced off-chain by the score calculator and the ZK circuit;
//! this crate only records which `(proof_hash, commitment, score)` triples
//! were accepted and answers threshold queries over them. The proof content
//! itself is never inspected.

pub mod error;
pub mod memory;
pub mod record;
pub mod traits;

pub use error::ProofError;
pub use memory::InMemoryProofRegistry;
pub use record::ActivityProof;
pub use traits::ProofRegistry;
