//! Hashing primitives for Strata.
//!
//! Everything content-addressed in Strata is BLAKE3:
//!   1. chunk leaf hashes      — BLAKE3(0x00 || chunk bytes)
//!   2. Merkle inner nodes     — BLAKE3(0x01 || left || right)
//!   3. plain content digests  — BLAKE3(bytes), used for whole-file checks
//!
//! The one-byte prefixes keep leaves and inner nodes in separate domains,
//! so a leaf hash can never be passed off as an interior node of a tree.

/// A 32-byte BLAKE3 digest.
pub type Digest = [u8; 32];

const LEAF_PREFIX: u8 = 0x00;
const NODE_PREFIX: u8 = 0x01;

/// Hash a byte slice, returning a 32-byte BLAKE3 digest.
pub fn hash(data: &[u8]) -> Digest {
    *blake3::hash(data).as_bytes()
}

/// Leaf hash of one chunk's raw bytes.
pub fn leaf_hash(chunk: &[u8]) -> Digest {
    let mut h = blake3::Hasher::new();
    h.update(&[LEAF_PREFIX]);
    h.update(chunk);
    *h.finalize().as_bytes()
}

/// Parent hash of two adjacent tree nodes, left first.
pub fn node_hash(left: &Digest, right: &Digest) -> Digest {
    let mut h = blake3::Hasher::new();
    h.update(&[NODE_PREFIX]);
    h.update(left);
    h.update(right);
    *h.finalize().as_bytes()
}

/// Incremental BLAKE3 hasher for payloads that arrive in pieces.
///
/// # Example
/// ```
/// use strata_core::crypto::Hasher;
/// let mut h = Hasher::new();
/// h.update(b"hello ");
/// h.update(b"world");
/// let digest = h.finalize();
/// assert_eq!(digest, strata_core::crypto::hash(b"hello world"));
/// ```
pub struct Hasher(blake3::Hasher);

impl Hasher {
    pub fn new() -> Self {
        Self(blake3::Hasher::new())
    }

    pub fn update(&mut self, data: &[u8]) {
        self.0.update(data);
    }

    pub fn finalize(self) -> Digest {
        *self.0.finalize().as_bytes()
    }
}

impl Default for Hasher {
    fn default() -> Self {
        Self::new()
    }
}
