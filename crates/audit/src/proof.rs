//! Streaming proof generation and compact proof verification.

use serde::{Deserialize, Serialize};
use sha2::{Digest as _, Sha256};
use tokio::io::{AsyncRead, AsyncReadExt};

use silo_protocol::hashing::rmd160;

use crate::merkle::{fold_path, leaf_of, Digest, MerkleTree, Sibling, SiblingSide};

const READ_CHUNK: usize = 64 * 1024;

/// Errors during proof generation or verification.
#[derive(Debug, thiserror::Error)]
pub enum ProofError {
    /// Challenge or leaf is not valid hex.
    #[error("invalid hex in audit record: {0}")]
    Encoding(String),

    /// A published leaf is not 20 bytes.
    #[error("audit leaf must be a 20-byte hash")]
    MalformedLeaf,

    /// The streamed bytes do not hash to any published leaf: the shard is
    /// corrupt, truncated, or the challenge is not part of the record.
    #[error("challenge response does not match any published leaf")]
    ChallengeMismatch,

    /// Proof path length disagrees with the expected tree depth.
    #[error("proof depth {got} does not match expected depth {expected}")]
    DepthMismatch { got: usize, expected: usize },

    /// Shard stream I/O failure.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// One step of a serialized compact proof.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProofStep {
    pub side: SiblingSide,
    pub hash: String,
}

/// A compact inclusion proof: the challenged leaf's pre-hash payload, its
/// index in the published row, and the sibling path to the root.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CompactProof {
    pub index: usize,
    pub prehash: String,
    pub path: Vec<ProofStep>,
}

/// Streaming prover.
///
/// Consumes shard bytes after being seeded with the challenge, then emits
/// the compact proof for the leaf the response hashes to.
pub struct ProofStream {
    hasher: Sha256,
    leaves: Vec<Digest>,
}

impl ProofStream {
    /// Seed a prover with the published leaf row and the challenge. The
    /// challenge is prepended to the shard bytes before hashing.
    pub fn new(leaves: &[String], challenge: &str) -> Result<Self, ProofError> {
        let challenge_bytes =
            hex::decode(challenge).map_err(|e| ProofError::Encoding(e.to_string()))?;
        let leaves = decode_leaves(leaves)?;
        let mut hasher = Sha256::new();
        hasher.update(&challenge_bytes);
        Ok(Self { hasher, leaves })
    }

    /// Feed a chunk of shard bytes.
    pub fn update(&mut self, chunk: &[u8]) {
        self.hasher.update(chunk);
    }

    /// Finish the stream and build the proof.
    pub fn finalize(self) -> Result<CompactProof, ProofError> {
        let digest: [u8; 32] = self.hasher.finalize().into();
        let prehash = rmd160(&digest);
        let leaf = leaf_of(&prehash);

        let index = self
            .leaves
            .iter()
            .position(|l| *l == leaf)
            .ok_or(ProofError::ChallengeMismatch)?;

        let tree = MerkleTree::from_leaves(&self.leaves);
        let path = tree
            .proof_for(index)
            .expect("index found in leaf row")
            .into_iter()
            .map(|s| ProofStep {
                side: s.side,
                hash: hex::encode(s.hash),
            })
            .collect();

        Ok(CompactProof {
            index,
            prehash: hex::encode(prehash),
            path,
        })
    }
}

/// Stream a reader through a [`ProofStream`].
pub async fn prove_reader<R>(
    leaves: &[String],
    challenge: &str,
    mut reader: R,
) -> Result<CompactProof, ProofError>
where
    R: AsyncRead + Unpin,
{
    let mut stream = ProofStream::new(leaves, challenge)?;
    let mut buffer = vec![0u8; READ_CHUNK];
    loop {
        let read = reader.read(&mut buffer).await?;
        if read == 0 {
            break;
        }
        stream.update(&buffer[..read]);
    }
    stream.finalize()
}

/// Recompute the root from a compact proof.
///
/// Returns `(expected_root, computed_root)`; the caller compares for
/// equality. The path length must equal the expected tree depth.
pub fn verify(
    proof: &CompactProof,
    expected_root: &str,
    depth: usize,
) -> Result<(Digest, Digest), ProofError> {
    if proof.path.len() != depth {
        return Err(ProofError::DepthMismatch {
            got: proof.path.len(),
            expected: depth,
        });
    }
    let expected = decode_digest(expected_root)?;
    let prehash = hex::decode(&proof.prehash).map_err(|e| ProofError::Encoding(e.to_string()))?;

    let mut path = Vec::with_capacity(proof.path.len());
    for step in &proof.path {
        path.push(Sibling {
            side: step.side,
            hash: decode_digest(&step.hash)?,
        });
    }
    let computed = fold_path(leaf_of(&prehash), &path);
    Ok((expected, computed))
}

fn decode_leaves(leaves: &[String]) -> Result<Vec<Digest>, ProofError> {
    leaves.iter().map(|l| decode_digest(l)).collect()
}

fn decode_digest(value: &str) -> Result<Digest, ProofError> {
    let bytes = hex::decode(value).map_err(|e| ProofError::Encoding(e.to_string()))?;
    bytes.try_into().map_err(|_| ProofError::MalformedLeaf)
}
