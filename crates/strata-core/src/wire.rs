//! Strata wire format — byte layout of Merkle proofs and file metadata.
//!
//! A proof on the wire is one `ProofHeader` followed by `step_count`
//! `ProofStepWire` records, ordered leaf to root. Integers are little-endian
//! byte arrays so the layout is identical on every host. Both structs are
//! #[repr(C, packed)] with zerocopy derives. There is no unsafe code in
//! this module.
//!
//! Changing any field or size here breaks proof exchange with nodes.

use serde::{Deserialize, Serialize};
use static_assertions::assert_eq_size;
use zerocopy::{AsBytes, FromBytes, FromZeroes};

use crate::chunker::chunk_count;
use crate::ids::RootHash;
use crate::merkle::{MerkleProof, ProofStep, Side};

/// Current proof encoding version.
pub const PROOF_VERSION: u8 = 0x01;

const SIDE_LEFT: u8 = 0x00;
const SIDE_RIGHT: u8 = 0x01;

/// Longest path any tree with `u64` leaves can have.
const MAX_PROOF_STEPS: u32 = 64;

// ── Proof Header ──────────────────────────────────────────────────────────────

/// Wire size: 24 bytes.
#[derive(Debug, Clone, AsBytes, FromBytes, FromZeroes)]
#[repr(C, packed)]
pub struct ProofHeader {
    /// Index of the proven leaf, u64 LE.
    pub leaf_index: [u8; 8],
    /// Number of leaves in the tree, u64 LE.
    pub leaf_count: [u8; 8],
    /// Number of `ProofStepWire` records that follow, u32 LE.
    pub step_count: [u8; 4],
    /// Encoding version. Currently 0x01.
    pub version: u8,
    /// Must be zero.
    pub reserved: [u8; 3],
}

assert_eq_size!(ProofHeader, [u8; 24]);

// ── Proof Step ────────────────────────────────────────────────────────────────

/// Wire size: 33 bytes.
#[derive(Debug, Clone, AsBytes, FromBytes, FromZeroes)]
#[repr(C, packed)]
pub struct ProofStepWire {
    pub sibling: [u8; 32],
    /// 0x00 = sibling on the left, 0x01 = sibling on the right.
    pub side: u8,
}

assert_eq_size!(ProofStepWire, [u8; 33]);

#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum WireError {
    #[error("proof truncated: need {need} bytes, have {have}")]
    Truncated { need: usize, have: usize },
    #[error("unknown proof version {0:#04x}")]
    UnknownVersion(u8),
    #[error("reserved bytes must be zero")]
    ReservedNonZero,
    #[error("unknown side byte {0:#04x}")]
    UnknownSide(u8),
    #[error("proof claims {0} steps")]
    TooManySteps(u32),
    #[error("{0} trailing bytes after proof")]
    TrailingBytes(usize),
}

/// Serialize a proof to its wire bytes.
pub fn encode_proof(proof: &MerkleProof) -> Vec<u8> {
    let header = ProofHeader {
        leaf_index: proof.leaf_index.to_le_bytes(),
        leaf_count: proof.leaf_count.to_le_bytes(),
        step_count: (proof.path.len() as u32).to_le_bytes(),
        version: PROOF_VERSION,
        reserved: [0; 3],
    };

    let mut out = Vec::with_capacity(
        std::mem::size_of::<ProofHeader>()
            + proof.path.len() * std::mem::size_of::<ProofStepWire>(),
    );
    out.extend_from_slice(header.as_bytes());
    for step in &proof.path {
        let wire = ProofStepWire {
            sibling: step.sibling,
            side: match step.side {
                Side::Left => SIDE_LEFT,
                Side::Right => SIDE_RIGHT,
            },
        };
        out.extend_from_slice(wire.as_bytes());
    }
    out
}

/// Parse wire bytes back into a proof. Rejects anything malformed.
pub fn decode_proof(bytes: &[u8]) -> Result<MerkleProof, WireError> {
    let header_len = std::mem::size_of::<ProofHeader>();
    let step_len = std::mem::size_of::<ProofStepWire>();

    let header = ProofHeader::read_from_prefix(bytes).ok_or(WireError::Truncated {
        need: header_len,
        have: bytes.len(),
    })?;
    if header.version != PROOF_VERSION {
        return Err(WireError::UnknownVersion(header.version));
    }
    if header.reserved != [0; 3] {
        return Err(WireError::ReservedNonZero);
    }

    let step_count = u32::from_le_bytes(header.step_count);
    if step_count > MAX_PROOF_STEPS {
        return Err(WireError::TooManySteps(step_count));
    }
    let need = header_len + step_count as usize * step_len;
    if bytes.len() < need {
        return Err(WireError::Truncated {
            need,
            have: bytes.len(),
        });
    }
    if bytes.len() > need {
        return Err(WireError::TrailingBytes(bytes.len() - need));
    }

    let mut path = Vec::with_capacity(step_count as usize);
    for record in bytes[header_len..].chunks_exact(step_len) {
        let wire = ProofStepWire::read_from(record).ok_or(WireError::Truncated {
            need: step_len,
            have: record.len(),
        })?;
        let side = match wire.side {
            SIDE_LEFT => Side::Left,
            SIDE_RIGHT => Side::Right,
            other => return Err(WireError::UnknownSide(other)),
        };
        path.push(ProofStep {
            sibling: wire.sibling,
            side,
        });
    }

    Ok(MerkleProof {
        leaf_index: u64::from_le_bytes(header.leaf_index),
        leaf_count: u64::from_le_bytes(header.leaf_count),
        path,
    })
}

// ── File metadata ─────────────────────────────────────────────────────────────

/// Layout of a stored file, as reported by a node that holds it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FileInfo {
    pub root: RootHash,
    pub size: u64,
    pub chunk_size: usize,
    pub chunk_count: u64,
}

impl FileInfo {
    pub fn new(root: RootHash, size: u64, chunk_size: usize) -> Self {
        Self {
            root,
            size,
            chunk_size,
            chunk_count: chunk_count(size, chunk_size),
        }
    }

    /// Chunk count agrees with size and chunk size.
    pub fn is_consistent(&self) -> bool {
        self.chunk_size > 0 && self.chunk_count == chunk_count(self.size, self.chunk_size)
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────────
