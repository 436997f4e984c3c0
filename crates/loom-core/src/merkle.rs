//! Append-only binary Merkle tree
//!
//! Level 0 is `SHA256(leaf)` for every leaf, internal nodes are
//! `SHA256(left || right)`, and a node left without a sibling at the end
//! of a level is paired with itself. The root of an empty tree is the
//! empty byte string, not the digest of one.

use serde::{Deserialize, Serialize};

use crate::digest::{sha256, sha256_multi, Digest};
use crate::error::{CoreError, Result};

/// Deterministic Merkle tree over an ordered list of byte-string leaves
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct MerkleTree {
    leaves: Vec<Vec<u8>>,
    /// All nodes, level by level (leaf hashes first)
    levels: Vec<Vec<[u8; 32]>>,
}

/// Sibling path from a leaf up to the root
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MerkleProof {
    pub index: usize,
    pub siblings: Vec<Digest>,
}

impl MerkleTree {
    /// Build a tree over `leaves` in order
    pub fn new<I, L>(leaves: I) -> Self
    where
        I: IntoIterator<Item = L>,
        L: AsRef<[u8]>,
    {
        let leaves: Vec<Vec<u8>> = leaves.into_iter().map(|l| l.as_ref().to_vec()).collect();
        let levels = build_levels(&leaves);
        Self { leaves, levels }
    }

    /// Append one leaf and rebuild the upper levels
    pub fn add_leaf(&mut self, leaf: impl AsRef<[u8]>) {
        let leaf = leaf.as_ref().to_vec();
        let hash = sha256(&leaf);
        self.leaves.push(leaf);

        match self.levels.first_mut() {
            Some(level0) => level0.push(hash),
            None => self.levels.push(vec![hash]),
        }
        self.levels.truncate(1);
        extend_levels(&mut self.levels);
    }

    /// Root bytes; empty when the tree has no leaves
    pub fn root(&self) -> Vec<u8> {
        self.root_digest()
            .map(|d| d.as_bytes().to_vec())
            .unwrap_or_default()
    }

    /// Root as a digest, `None` for an empty tree
    pub fn root_digest(&self) -> Option<Digest> {
        self.levels
            .last()
            .and_then(|level| level.first())
            .map(|root| Digest::new(*root))
    }

    /// Root as hex; the empty string for an empty tree
    pub fn root_hex(&self) -> String {
        hex::encode(self.root())
    }

    pub fn leaf_count(&self) -> usize {
        self.leaves.len()
    }

    pub fn is_empty(&self) -> bool {
        self.leaves.is_empty()
    }

    pub fn leaves(&self) -> &[Vec<u8>] {
        &self.leaves
    }

    /// Inclusion proof for the leaf at `index`
    pub fn proof(&self, index: usize) -> Result<MerkleProof> {
        if index >= self.leaves.len() {
            return Err(CoreError::MerkleTree(format!(
                "Index {} out of range (tree has {} leaves)",
                index,
                self.leaves.len()
            )));
        }

        let mut siblings = Vec::with_capacity(self.levels.len().saturating_sub(1));
        let mut current = index;
        for level in &self.levels[..self.levels.len() - 1] {
            let sibling = if current % 2 == 0 {
                // Last node of an odd level is its own sibling
                if current + 1 < level.len() {
                    current + 1
                } else {
                    current
                }
            } else {
                current - 1
            };
            siblings.push(Digest::new(level[sibling]));
            current /= 2;
        }

        Ok(MerkleProof { index, siblings })
    }

    /// Check that `leaf` sits at `proof.index` under `root`
    pub fn verify_proof(root: &[u8], leaf: &[u8], proof: &MerkleProof) -> bool {
        let mut current = sha256(leaf);
        let mut index = proof.index;

        for sibling in &proof.siblings {
            current = if index % 2 == 0 {
                sha256_multi(&[&current, sibling.as_bytes()])
            } else {
                sha256_multi(&[sibling.as_bytes(), &current])
            };
            index /= 2;
        }

        // A proof that walked to the top leaves index at zero
        index == 0 && root == current.as_slice()
    }
}

fn build_levels(leaves: &[Vec<u8>]) -> Vec<Vec<[u8; 32]>> {
    if leaves.is_empty() {
        return Vec::new();
    }
    let mut levels = vec![leaves.iter().map(|leaf| sha256(leaf)).collect()];
    extend_levels(&mut levels);
    levels
}

fn extend_levels(levels: &mut Vec<Vec<[u8; 32]>>) {
    while let Some(current) = levels.last() {
        if current.len() <= 1 {
            break;
        }
        let next: Vec<[u8; 32]> = current
            .chunks(2)
            .map(|pair| {
                let left = &pair[0];
                let right = pair.get(1).unwrap_or(left);
                sha256_multi(&[left, right])
            })
            .collect();
        levels.push(next);
    }
}
