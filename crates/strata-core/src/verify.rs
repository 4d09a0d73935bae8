//! Verifier — proves a chunk belongs to a committed root.
//!
//! This is the trust boundary for downloads. Storage nodes are untrusted;
//! a chunk is accepted only if its proof folds to the expected root.
//! Every failure mode returns `false`, nothing here panics or errors.

use crate::crypto::{leaf_hash, node_hash};
use crate::ids::RootHash;
use crate::merkle::{path_shape, MerkleProof, MerkleTree, Side};

/// `Verify(chunkBytes, proof, expectedRoot) -> bool`
///
/// The proof's step count and sides must match the shape implied by its
/// own `(leaf_index, leaf_count)`.
pub fn verify(chunk: &[u8], proof: &MerkleProof, expected_root: &RootHash) -> bool {
    let Some(shape) = path_shape(proof.leaf_index, proof.leaf_count) else {
        return false;
    };
    if shape.len() != proof.path.len() {
        return false;
    }

    let mut acc = leaf_hash(chunk);
    for (step, side) in proof.path.iter().zip(shape) {
        if step.side != side {
            return false;
        }
        acc = match side {
            Side::Left => node_hash(&step.sibling, &acc),
            Side::Right => node_hash(&acc, &step.sibling),
        };
    }
    acc == expected_root.0
}

/// Verify chunk `index` of a file known to have `leaf_count` chunks.
///
/// Binds the proof to the position the caller asked for, so a node cannot
/// answer a request for chunk `i` with a valid chunk `j`.
pub fn verify_chunk(
    index: u64,
    leaf_count: u64,
    chunk: &[u8],
    proof: &MerkleProof,
    expected_root: &RootHash,
) -> bool {
    proof.leaf_index == index && proof.leaf_count == leaf_count && verify(chunk, proof, expected_root)
}

/// Whether `root` is the root of a zero-chunk file.
pub fn is_empty_root(root: &RootHash) -> bool {
    *root == MerkleTree::empty_root()
}
