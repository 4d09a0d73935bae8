//! strata-core — chunking, Merkle trees, proof verification, wire layout
//! and configuration. Synchronous and free of network I/O; the transfer
//! engine builds on it.

pub mod chunker;
pub mod config;
pub mod crypto;
pub mod ids;
pub mod merkle;
pub mod verify;
pub mod wire;

pub use chunker::{Chunk, ChunkError, ChunkReader, Chunker, DEFAULT_CHUNK_SIZE};
pub use config::{SelectionStrategy, StrataConfig, TransferConfig};
pub use ids::{RootHash, TxHash};
pub use merkle::{MerkleProof, MerkleTree};
pub use wire::FileInfo;
