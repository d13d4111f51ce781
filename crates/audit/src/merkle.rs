//! Binary Merkle tree over audit leaves.
//!
//! Leaves are 20-byte network hashes. The leaf set is padded to the next
//! power of two with the empty-leaf digest so every proof path has the
//! same depth.

use silo_protocol::hashing::rmd160_sha256;

/// Digest type used throughout the tree.
pub type Digest = [u8; 20];

/// Padding digest for incomplete leaf sets: the hash of nothing.
pub fn empty_leaf() -> Digest {
    rmd160_sha256(b"")
}

/// Which side of the path a sibling sits on.
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SiblingSide {
    Left,
    Right,
}

/// One step of an inclusion proof.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Sibling {
    pub side: SiblingSide,
    pub hash: Digest,
}

/// A fully materialized tree. Level 0 is the padded leaf row; the last
/// level holds the single root.
#[derive(Debug, Clone)]
pub struct MerkleTree {
    levels: Vec<Vec<Digest>>,
}

impl MerkleTree {
    /// Build a tree from the published leaf row.
    pub fn from_leaves(leaves: &[Digest]) -> Self {
        let mut row: Vec<Digest> = leaves.to_vec();
        if row.is_empty() {
            row.push(empty_leaf());
        }
        let width = row.len().next_power_of_two();
        row.resize(width, empty_leaf());

        let mut levels = vec![row];
        while levels.last().expect("at least one level").len() > 1 {
            let below = levels.last().expect("at least one level");
            let mut above = Vec::with_capacity(below.len() / 2);
            for pair in below.chunks(2) {
                above.push(combine(&pair[0], &pair[1]));
            }
            levels.push(above);
        }
        Self { levels }
    }

    pub fn root(&self) -> Digest {
        self.levels.last().expect("root level")[0]
    }

    /// Number of sibling steps from a leaf to the root.
    pub fn depth(&self) -> usize {
        self.levels.len() - 1
    }

    /// Width of the padded leaf row.
    pub fn leaf_count(&self) -> usize {
        self.levels[0].len()
    }

    /// Sibling hashes along the path from the indexed leaf to the root,
    /// bottom-up. None if the index is outside the leaf row.
    pub fn proof_for(&self, index: usize) -> Option<Vec<Sibling>> {
        if index >= self.leaf_count() {
            return None;
        }
        let mut path = Vec::with_capacity(self.depth());
        let mut position = index;
        for level in &self.levels[..self.levels.len() - 1] {
            let (side, sibling_index) = if position % 2 == 0 {
                (SiblingSide::Right, position + 1)
            } else {
                (SiblingSide::Left, position - 1)
            };
            path.push(Sibling {
                side,
                hash: level[sibling_index],
            });
            position /= 2;
        }
        Some(path)
    }
}

/// Parent digest of two children.
pub fn combine(left: &Digest, right: &Digest) -> Digest {
    let mut joined = [0u8; 40];
    joined[..20].copy_from_slice(left);
    joined[20..].copy_from_slice(right);
    rmd160_sha256(&joined)
}

/// Leaf digest of a pre-hash payload.
pub fn leaf_of(prehash: &[u8]) -> Digest {
    rmd160_sha256(prehash)
}

/// Fold a proof path up from a leaf digest.
pub fn fold_path(leaf: Digest, path: &[Sibling]) -> Digest {
    let mut acc = leaf;
    for step in path {
        acc = match step.side {
            SiblingSide::Left => combine(&step.hash, &acc),
            SiblingSide::Right => combine(&acc, &step.hash),
        };
    }
    acc
}

#[cfg(test)]
mod tests {
    use super::*;

    fn leaves(n: usize) -> Vec<Digest> {
        (0..n)
            .map(|i| rmd160_sha256(format!("leaf-{i}").as_bytes()))
            .collect()
    }

    #[test]
    fn test_single_leaf_tree() {
        let tree = MerkleTree::from_leaves(&leaves(1));
        assert_eq!(tree.depth(), 0);
        assert_eq!(tree.root(), leaves(1)[0]);
    }

    #[test]
    fn test_pads_to_power_of_two() {
        let tree = MerkleTree::from_leaves(&leaves(5));
        assert_eq!(tree.leaf_count(), 8);
        assert_eq!(tree.depth(), 3);
    }

    #[test]
    fn test_every_leaf_proves_inclusion() {
        let input = leaves(6);
        let tree = MerkleTree::from_leaves(&input);
        for (index, leaf) in input.iter().enumerate() {
            let path = tree.proof_for(index).expect("path");
            assert_eq!(path.len(), tree.depth());
            assert_eq!(fold_path(*leaf, &path), tree.root());
        }
    }

    #[test]
    fn test_wrong_leaf_does_not_fold_to_root() {
        let input = leaves(4);
        let tree = MerkleTree::from_leaves(&input);
        let path = tree.proof_for(0).unwrap();
        let impostor = rmd160_sha256(b"not a leaf");
        assert_ne!(fold_path(impostor, &path), tree.root());
    }

    #[test]
    fn test_proof_for_out_of_range() {
        let tree = MerkleTree::from_leaves(&leaves(4));
        assert!(tree.proof_for(4).is_none());
    }

    #[test]
    fn test_root_depends_on_leaf_order() {
        let mut input = leaves(4);
        let root_a = MerkleTree::from_leaves(&input).root();
        input.swap(0, 1);
        let root_b = MerkleTree::from_leaves(&input).root();
        assert_ne!(root_a, root_b);
    }
}
