//! Challenge-response possession proofs.
//!
//! A renter publishes a Merkle commitment over salted pre-hashes of a
//! shard; a farmer answers an audit by streaming the shard through a
//! [`ProofStream`] seeded with the challenge and returning the compact
//! inclusion proof it emits. Verification recomputes the root from the
//! proof alone.

pub mod merkle;
pub mod plan;
pub mod proof;

pub use merkle::{MerkleTree, Sibling, SiblingSide};
pub use plan::AuditPlan;
pub use proof::{prove_reader, verify, CompactProof, ProofError, ProofStream};
