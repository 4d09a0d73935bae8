//! Collaborator contracts consumed by the engine.
//!
//! Three external services: the node registry (who is out there), the
//! node transfer protocol (move chunks and proofs), and the chain (commit
//! a root, get a transaction). The engine only sees these traits.
//! Implementations live in `rpc` (HTTP JSON-RPC) and `memory` (in-process).

use bytes::Bytes;
use futures::future::BoxFuture;

use strata_core::{FileInfo, RootHash, TxHash};

use crate::error::RemoteError;
use crate::node::StorageNode;

/// `ListNodes() -> set of StorageNode` with a health signal per node.
pub trait NodeRegistry: Send + Sync {
    fn list_nodes(&self) -> BoxFuture<'_, Result<Vec<StorageNode>, RemoteError>>;
}

/// Everything a node needs to store one chunk and later serve it.
#[derive(Debug, Clone)]
pub struct ChunkUpload {
    pub info: FileInfo,
    pub index: u64,
    pub data: Bytes,
    /// Wire-encoded Merkle proof for this chunk.
    pub proof: Vec<u8>,
}

/// Per-node chunk RPCs. Treated as a black box: success/failure and bytes.
pub trait NodeClient: Send + Sync {
    fn push_chunk<'a>(
        &'a self,
        node: &'a StorageNode,
        chunk: &'a ChunkUpload,
    ) -> BoxFuture<'a, Result<(), RemoteError>>;

    fn pull_chunk<'a>(
        &'a self,
        node: &'a StorageNode,
        root: RootHash,
        index: u64,
    ) -> BoxFuture<'a, Result<Bytes, RemoteError>>;

    /// Wire-encoded proof for chunk `index`.
    fn get_proof<'a>(
        &'a self,
        node: &'a StorageNode,
        root: RootHash,
        index: u64,
    ) -> BoxFuture<'a, Result<Vec<u8>, RemoteError>>;

    fn file_info<'a>(
        &'a self,
        node: &'a StorageNode,
        root: RootHash,
    ) -> BoxFuture<'a, Result<FileInfo, RemoteError>>;
}

/// `Commit(rootHash, metadata) -> TransactionID`
pub trait ChainCommitter: Send + Sync {
    fn commit<'a>(
        &'a self,
        root: RootHash,
        metadata: &'a FileInfo,
    ) -> BoxFuture<'a, Result<TxHash, RemoteError>>;
}
