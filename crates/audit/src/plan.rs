//! Renter-side audit preparation.
//!
//! Before publishing a descriptor the renter salts the shard with a batch
//! of random challenges and commits to the resulting pre-hash leaves. The
//! leaf row goes into the descriptor's `audit_leaves` field; the
//! challenges stay private and are spent one per audit round.

use rand::RngCore;
use sha2::{Digest as _, Sha256};

use silo_protocol::hashing::rmd160;

use crate::merkle::{leaf_of, MerkleTree};

const CHALLENGE_BYTES: usize = 32;

/// A batch of private challenges and the public leaf row they commit to.
#[derive(Debug, Clone)]
pub struct AuditPlan {
    challenges: Vec<String>,
    leaves: Vec<String>,
}

impl AuditPlan {
    /// Generate `count` random challenges over the shard bytes.
    pub fn generate(shard: &[u8], count: usize) -> Self {
        let mut rng = rand::rngs::OsRng;
        let challenges = (0..count)
            .map(|_| {
                let mut salt = [0u8; CHALLENGE_BYTES];
                rng.fill_bytes(&mut salt);
                hex::encode(salt)
            })
            .collect();
        Self::from_challenges(challenges, shard)
    }

    /// Build the leaf row for a known challenge batch.
    pub fn from_challenges(challenges: Vec<String>, shard: &[u8]) -> Self {
        let leaves = challenges
            .iter()
            .map(|challenge| {
                let salt = hex::decode(challenge).expect("challenge is hex");
                let mut hasher = Sha256::new();
                hasher.update(&salt);
                hasher.update(shard);
                let digest: [u8; 32] = hasher.finalize().into();
                hex::encode(leaf_of(&rmd160(&digest)))
            })
            .collect();
        Self { challenges, leaves }
    }

    pub fn challenges(&self) -> &[String] {
        &self.challenges
    }

    pub fn leaves(&self) -> &[String] {
        &self.leaves
    }

    fn tree(&self) -> MerkleTree {
        let decoded: Vec<[u8; 20]> = self
            .leaves
            .iter()
            .map(|l| {
                hex::decode(l)
                    .expect("leaf is hex")
                    .try_into()
                    .expect("leaf is 20 bytes")
            })
            .collect();
        MerkleTree::from_leaves(&decoded)
    }

    /// Audit root the verifier compares proofs against.
    pub fn root_hex(&self) -> String {
        hex::encode(self.tree().root())
    }

    /// Expected proof path length.
    pub fn depth(&self) -> usize {
        self.tree().depth()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_generate_produces_distinct_challenges() {
        let plan = AuditPlan::generate(b"shard", 4);
        assert_eq!(plan.challenges().len(), 4);
        assert_eq!(plan.leaves().len(), 4);
        let mut sorted = plan.challenges().to_vec();
        sorted.sort();
        sorted.dedup();
        assert_eq!(sorted.len(), 4);
    }

    #[test]
    fn test_leaves_are_deterministic_for_fixed_challenges() {
        let challenges = vec!["11".repeat(32), "22".repeat(32)];
        let a = AuditPlan::from_challenges(challenges.clone(), b"shard");
        let b = AuditPlan::from_challenges(challenges, b"shard");
        assert_eq!(a.leaves(), b.leaves());
        assert_eq!(a.root_hex(), b.root_hex());
    }

    #[test]
    fn test_leaves_depend_on_shard_bytes() {
        let challenges = vec!["11".repeat(32)];
        let a = AuditPlan::from_challenges(challenges.clone(), b"shard-a");
        let b = AuditPlan::from_challenges(challenges, b"shard-b");
        assert_ne!(a.leaves(), b.leaves());
    }

    #[test]
    fn test_depth_tracks_padded_row() {
        assert_eq!(AuditPlan::generate(b"s", 1).depth(), 0);
        assert_eq!(AuditPlan::generate(b"s", 2).depth(), 1);
        assert_eq!(AuditPlan::generate(b"s", 3).depth(), 2);
        assert_eq!(AuditPlan::generate(b"s", 4).depth(), 2);
    }
}
