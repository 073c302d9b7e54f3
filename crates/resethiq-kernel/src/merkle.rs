//! Merkle engine over BLAKE2b-512 leaves.
//!
//! Provides:
//! - [`merkle_root`]: root computation with odd-node duplication.
//! - [`build_levels`]: explicit level construction (leaves bottom, root top).
//! - [`inclusion_proof`] / [`verify_inclusion`]: sibling co-paths without
//!   stored orientation; the verifier recovers left/right from index parity.
//!
//! The empty tree has a fixed sentinel root, `BLAKE2b-512("resethiq:empty")`.
//! That constant is part of the on-wire contract: bundles for zero-byte
//! artifacts carry it, and independent verifiers must reproduce it.

use blake2::{Blake2b512, Digest};
use thiserror::Error;

/// Width of every digest in the tree (BLAKE2b-512).
pub const HASH_LEN: usize = 64;

/// Digest of one chunk or one internal node.
pub type LeafHash = [u8; HASH_LEN];

/// Domain tag hashed to produce the empty-tree root.
pub const EMPTY_TREE_TAG: &[u8] = b"resethiq:empty";

#[derive(Debug, Error, PartialEq, Eq)]
pub enum ProofError {
    #[error("cannot prove inclusion in an empty tree")]
    EmptyTree,
    #[error("leaf index {index} out of range for {leaf_count} leaves")]
    IndexOutOfRange { index: usize, leaf_count: usize },
}

/// Inclusion proof for one leaf: the sibling co-path from leaf to root,
/// bottom-up. Orientation at each level is derived from index parity and is
/// deliberately not stored.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InclusionProof {
    pub index: usize,
    pub leaf_hash: LeafHash,
    pub siblings: Vec<LeafHash>,
}

/// BLAKE2b-512 of an arbitrary byte string.
#[must_use]
pub fn hash_bytes(data: &[u8]) -> LeafHash {
    let mut hasher = Blake2b512::new();
    hasher.update(data);
    hasher.finalize().into()
}

/// Root of the zero-leaf tree.
#[must_use]
pub fn empty_root() -> LeafHash {
    hash_bytes(EMPTY_TREE_TAG)
}

/// Parent digest: BLAKE2b-512 over the 128 concatenated child bytes.
#[must_use]
pub fn parent(left: &LeafHash, right: &LeafHash) -> LeafHash {
    let mut hasher = Blake2b512::new();
    hasher.update(left);
    hasher.update(right);
    hasher.finalize().into()
}

fn next_level(level: &[LeafHash]) -> Vec<LeafHash> {
    let mut next = Vec::with_capacity(level.len().div_ceil(2));
    for pair in level.chunks(2) {
        // Odd level: the last node pairs with itself.
        let right = pair.get(1).unwrap_or(&pair[0]);
        next.push(parent(&pair[0], right));
    }
    next
}

/// Compute the root over ordered leaf hashes.
///
/// A single leaf is its own root; an empty slice yields the sentinel root.
#[must_use]
pub fn merkle_root(leaves: &[LeafHash]) -> LeafHash {
    if leaves.is_empty() {
        return empty_root();
    }
    let mut level = leaves.to_vec();
    while level.len() > 1 {
        level = next_level(&level);
    }
    level[0]
}

/// Build every level of the tree, leaves first, root last.
///
/// The empty tree is represented as the single-level `[[empty_root()]]`.
#[must_use]
pub fn build_levels(leaves: &[LeafHash]) -> Vec<Vec<LeafHash>> {
    if leaves.is_empty() {
        return vec![vec![empty_root()]];
    }
    let mut levels = vec![leaves.to_vec()];
    loop {
        let top = &levels[levels.len() - 1];
        if top.len() == 1 {
            return levels;
        }
        let next = next_level(top);
        levels.push(next);
    }
}

/// Generate the inclusion proof for `index`.
///
/// Proofs over an empty tree are rejected even though the empty root is
/// defined: there is no leaf to prove.
pub fn inclusion_proof(leaves: &[LeafHash], index: usize) -> Result<InclusionProof, ProofError> {
    if leaves.is_empty() {
        return Err(ProofError::EmptyTree);
    }
    if index >= leaves.len() {
        return Err(ProofError::IndexOutOfRange {
            index,
            leaf_count: leaves.len(),
        });
    }

    let levels = build_levels(leaves);
    let mut siblings = Vec::with_capacity(levels.len() - 1);
    let mut idx = index;
    for level in &levels[..levels.len() - 1] {
        let sibling = if idx % 2 == 0 {
            // Last node of an odd level duplicates itself.
            *level.get(idx + 1).unwrap_or(&level[idx])
        } else {
            level[idx - 1]
        };
        siblings.push(sibling);
        idx /= 2;
    }

    Ok(InclusionProof {
        index,
        leaf_hash: leaves[index],
        siblings,
    })
}

/// Fold a proof back up to the root and compare.
#[must_use]
pub fn verify_inclusion(root: &LeafHash, proof: &InclusionProof) -> bool {
    let mut node = proof.leaf_hash;
    let mut idx = proof.index;
    for sibling in &proof.siblings {
        node = if idx % 2 == 1 {
            parent(sibling, &node)
        } else {
            parent(&node, sibling)
        };
        idx /= 2;
    }
    node == *root
}

#[cfg(test)]
mod tests {
    use super::*;

    fn leaves(n: usize) -> Vec<LeafHash> {
        (0..n).map(|i| hash_bytes(&[i as u8; 16])).collect()
    }

    #[test]
    fn empty_root_is_the_tag_hash() {
        assert_eq!(empty_root(), hash_bytes(b"resethiq:empty"));
        assert_eq!(merkle_root(&[]), empty_root());
    }

    #[test]
    fn single_leaf_root_is_the_leaf() {
        let l = leaves(1);
        assert_eq!(merkle_root(&l), l[0]);
    }

    #[test]
    fn two_leaf_root_is_their_parent() {
        let l = leaves(2);
        assert_eq!(merkle_root(&l), parent(&l[0], &l[1]));
    }

    #[test]
    fn three_leaves_duplicate_the_last() {
        let l = leaves(3);
        let n01 = parent(&l[0], &l[1]);
        let n22 = parent(&l[2], &l[2]);
        assert_eq!(merkle_root(&l), parent(&n01, &n22));
    }

    #[test]
    fn levels_shrink_to_the_root() {
        let l = leaves(5);
        let levels = build_levels(&l);
        assert_eq!(levels[0].len(), 5);
        assert_eq!(levels.last().map(Vec::len), Some(1));
        assert_eq!(levels.last().unwrap()[0], merkle_root(&l));
    }

    #[test]
    fn empty_tree_has_one_sentinel_level() {
        let levels = build_levels(&[]);
        assert_eq!(levels, vec![vec![empty_root()]]);
    }

    #[test]
    fn proofs_verify_for_every_index() {
        for n in 1..=17 {
            let l = leaves(n);
            let root = merkle_root(&l);
            for i in 0..n {
                let proof = inclusion_proof(&l, i).unwrap();
                assert!(verify_inclusion(&root, &proof), "n={n} i={i}");
            }
        }
    }

    #[test]
    fn tampered_sibling_fails() {
        let l = leaves(7);
        let root = merkle_root(&l);
        let mut proof = inclusion_proof(&l, 4).unwrap();
        proof.siblings[1][0] ^= 0x01;
        assert!(!verify_inclusion(&root, &proof));
    }

    #[test]
    fn wrong_index_parity_fails() {
        let l = leaves(4);
        let root = merkle_root(&l);
        let mut proof = inclusion_proof(&l, 2).unwrap();
        proof.index = 3;
        assert!(!verify_inclusion(&root, &proof));
    }

    #[test]
    fn empty_and_out_of_range_are_errors() {
        assert_eq!(inclusion_proof(&[], 0), Err(ProofError::EmptyTree));
        let l = leaves(3);
        assert_eq!(
            inclusion_proof(&l, 3),
            Err(ProofError::IndexOutOfRange {
                index: 3,
                leaf_count: 3
            })
        );
    }
}
