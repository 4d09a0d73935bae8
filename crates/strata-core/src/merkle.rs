//! Merkle tree over chunk leaf hashes.
//!
//! Levels are folded bottom-up, pairing left to right. When a level has an
//! odd number of nodes the last one is promoted to the next level unchanged
//! (never duplicated). The proof for a promoted node carries no step for
//! that level. `path_shape` is the single source of truth for which levels
//! contribute a sibling and on which side; building proofs and verifying
//! them both go through it, so the two can never disagree.
//!
//! Zero leaves is a valid tree: its root is `leaf_hash(b"")`. Real chunks
//! are never empty, so no non-empty file can share that root.

use serde::{Deserialize, Serialize};

use crate::chunker::{Chunk, ChunkError, Chunker};
use crate::crypto::{leaf_hash, node_hash, Digest};
use crate::ids::RootHash;

/// Which side of the running hash a proof sibling sits on.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Side {
    /// Sibling is the left operand: `node_hash(sibling, acc)`.
    Left,
    /// Sibling is the right operand: `node_hash(acc, sibling)`.
    Right,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProofStep {
    pub sibling: Digest,
    pub side: Side,
}

/// Membership proof for one leaf, ordered from the leaf up to the root.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MerkleProof {
    pub leaf_index: u64,
    pub leaf_count: u64,
    pub path: Vec<ProofStep>,
}

#[derive(Debug, thiserror::Error)]
pub enum MerkleError {
    #[error(transparent)]
    Chunk(#[from] ChunkError),
    #[error("leaf {index} out of range ({count} leaves)")]
    IndexOutOfRange { index: u64, count: u64 },
}

/// Sibling sides from leaf `index` up to the root of a tree with `count`
/// leaves. Promoted levels contribute nothing. `None` if out of range.
pub fn path_shape(index: u64, count: u64) -> Option<Vec<Side>> {
    if index >= count {
        return None;
    }
    let mut shape = Vec::new();
    let (mut i, mut n) = (index, count);
    while n > 1 {
        if i % 2 == 1 {
            shape.push(Side::Left);
        } else if i + 1 < n {
            shape.push(Side::Right);
        }
        i /= 2;
        n = n.div_ceil(2);
    }
    Some(shape)
}

/// A fully materialised tree. `levels[0]` holds the leaves, the last level
/// holds only the root.
#[derive(Debug, Clone)]
pub struct MerkleTree {
    levels: Vec<Vec<Digest>>,
}

impl MerkleTree {
    /// Root of the zero-chunk (empty file) tree.
    pub fn empty_root() -> RootHash {
        RootHash(leaf_hash(b""))
    }

    pub fn from_leaves(leaves: Vec<Digest>) -> Self {
        let mut levels = vec![leaves];
        while levels.last().map_or(0, Vec::len) > 1 {
            let prev = &levels[levels.len() - 1];
            let next: Vec<Digest> = prev
                .chunks(2)
                .map(|pair| match pair {
                    [left, right] => node_hash(left, right),
                    [lone] => *lone,
                    _ => unreachable!("chunks(2) yields one or two items"),
                })
                .collect();
            levels.push(next);
        }
        Self { levels }
    }

    /// Hash every chunk and build the tree. Chunks must arrive in index order.
    pub fn from_chunks<I>(chunks: I) -> Result<Self, ChunkError>
    where
        I: IntoIterator<Item = Result<Chunk, ChunkError>>,
    {
        let mut leaves = Vec::new();
        for chunk in chunks {
            leaves.push(leaf_hash(&chunk?.data));
        }
        Ok(Self::from_leaves(leaves))
    }

    /// Build a tree over an in-memory buffer.
    pub fn from_bytes(data: &[u8], chunk_size: usize) -> Result<Self, ChunkError> {
        Self::from_chunks(Chunker::new(data, chunk_size)?)
    }

    pub fn root(&self) -> RootHash {
        match self.levels.last() {
            Some(top) if top.len() == 1 => RootHash(top[0]),
            _ => Self::empty_root(),
        }
    }

    pub fn leaf_count(&self) -> u64 {
        self.levels[0].len() as u64
    }

    pub fn leaf(&self, index: u64) -> Option<&Digest> {
        self.levels[0].get(index as usize)
    }

    pub fn depth(&self) -> usize {
        self.levels.len() - 1
    }

    /// Proof of membership for leaf `index`.
    pub fn proof(&self, index: u64) -> Result<MerkleProof, MerkleError> {
        let count = self.leaf_count();
        if index >= count {
            return Err(MerkleError::IndexOutOfRange { index, count });
        }

        let mut path = Vec::new();
        let mut i = index as usize;
        for level in &self.levels[..self.levels.len() - 1] {
            if i % 2 == 1 {
                path.push(ProofStep {
                    sibling: level[i - 1],
                    side: Side::Left,
                });
            } else if i + 1 < level.len() {
                path.push(ProofStep {
                    sibling: level[i + 1],
                    side: Side::Right,
                });
            }
            i /= 2;
        }

        Ok(MerkleProof {
            leaf_index: index,
            leaf_count: count,
            path,
        })
    }
}

/// `BuildRoot(chunks) -> RootHash`
pub fn build_root<I>(chunks: I) -> Result<RootHash, ChunkError>
where
    I: IntoIterator<Item = Result<Chunk, ChunkError>>,
{
    Ok(MerkleTree::from_chunks(chunks)?.root())
}

/// `GenerateProof(chunks, index) -> MerkleProof`
pub fn generate_proof<I>(chunks: I, index: u64) -> Result<MerkleProof, MerkleError>
where
    I: IntoIterator<Item = Result<Chunk, ChunkError>>,
{
    MerkleTree::from_chunks(chunks)?.proof(index)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn leaves(n: usize) -> Vec<Digest> {
        (0..n).map(|i| leaf_hash(&[i as u8])).collect()
    }

    #[test]
    fn empty_tree_has_fixed_root() {
        let tree = MerkleTree::from_leaves(Vec::new());
        assert_eq!(tree.root(), MerkleTree::empty_root());
        assert_eq!(tree.leaf_count(), 0);
        assert!(tree.proof(0).is_err());
    }

    #[test]
    fn single_leaf_root_is_leaf() {
        let l = leaves(1);
        let tree = MerkleTree::from_leaves(l.clone());
        assert_eq!(tree.root().0, l[0]);
        assert!(tree.proof(0).unwrap().path.is_empty());
    }

    #[test]
    fn odd_leaf_is_promoted() {
        let l = leaves(3);
        let tree = MerkleTree::from_leaves(l.clone());
        let expected = node_hash(&node_hash(&l[0], &l[1]), &l[2]);
        assert_eq!(tree.root().0, expected);

        let proof = tree.proof(2).unwrap();
        assert_eq!(proof.path.len(), 1);
        assert_eq!(proof.path[0].side, Side::Left);
        assert_eq!(proof.path[0].sibling, node_hash(&l[0], &l[1]));
    }

    #[test]
    fn proof_shape_matches_path_shape() {
        for n in 1..40u64 {
            let tree = MerkleTree::from_leaves(leaves(n as usize));
            for i in 0..n {
                let proof = tree.proof(i).unwrap();
                let sides: Vec<Side> = proof.path.iter().map(|s| s.side).collect();
                assert_eq!(Some(sides), path_shape(i, n), "n={n} i={i}");
            }
        }
    }

    #[test]
    fn path_shape_out_of_range() {
        assert_eq!(path_shape(5, 5), None);
        assert_eq!(path_shape(0, 0), None);
    }

    #[test]
    fn root_is_deterministic_and_content_sensitive() {
        let data: Vec<u8> = (0..5000u32).map(|i| (i % 256) as u8).collect();
        let a = MerkleTree::from_bytes(&data, 512).unwrap().root();
        let b = MerkleTree::from_bytes(&data, 512).unwrap().root();
        assert_eq!(a, b);

        let mut flipped = data.clone();
        flipped[4321] ^= 0x01;
        assert_ne!(MerkleTree::from_bytes(&flipped, 512).unwrap().root(), a);
    }

    #[test]
    fn generate_proof_from_chunk_stream() {
        let data = b"0123456789abcdef";
        let chunks = || Chunker::new(&data[..], 4).unwrap();
        let root = build_root(chunks()).unwrap();
        let proof = generate_proof(chunks(), 3).unwrap();
        assert_eq!(proof.leaf_index, 3);
        assert_eq!(proof.leaf_count, 4);
        assert_eq!(root, MerkleTree::from_bytes(data, 4).unwrap().root());
        assert!(matches!(
            generate_proof(chunks(), 4),
            Err(MerkleError::IndexOutOfRange { index: 4, count: 4 })
        ));
    }
}
