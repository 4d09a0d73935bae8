//! Error taxonomy for the transfer engine.
//!
//! Per-chunk failures are retried inside the coordinators and only reach
//! the caller once a chunk's retry budget is spent. A failed attempt
//! against a node is recorded as `ChunkTransfer`, whose text becomes the
//! `cause` of the aggregate `*Incomplete` error. Each Upload/Download call
//! ends in exactly one `Ok` or one of these.

use std::path::PathBuf;
use std::time::Duration;

use strata_core::chunker::ChunkError;
use strata_core::config::ConfigError;
use strata_core::ids::IdError;
use strata_core::RootHash;

use crate::node::NodeId;

/// Failure reported by an external collaborator (registry, node, chain).
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum RemoteError {
    #[error("transport error: {0}")]
    Transport(String),
    #[error("rejected: {0}")]
    Rejected(String),
    #[error("not found")]
    NotFound,
    #[error("malformed response: {0}")]
    Decode(String),
}

#[derive(Debug, thiserror::Error)]
pub enum TransferError {
    #[error("failed to read {path}: {source}")]
    IoRead {
        path: PathBuf,
        #[source]
        source: ChunkError,
    },
    #[error("failed to write {path}: {source}")]
    Write {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("insufficient nodes: need {required}, {available} eligible")]
    InsufficientNodes { required: usize, available: usize },
    #[error("chunk {index} transfer via {node} failed: {cause}")]
    ChunkTransfer {
        index: u64,
        node: NodeId,
        cause: RemoteError,
    },
    #[error("chunk {index} failed verification on every attempt")]
    ChunkVerification { index: u64 },
    #[error("upload incomplete: chunks {chunks:?} failed, last cause: {cause}")]
    UploadIncomplete { chunks: Vec<u64>, cause: String },
    #[error("download incomplete: chunks {chunks:?} failed, last cause: {cause}")]
    DownloadIncomplete { chunks: Vec<u64>, cause: String },
    #[error("upload timed out after {0:?}")]
    UploadTimeout(Duration),
    #[error("download timed out after {0:?}")]
    DownloadTimeout(Duration),
    #[error("on-chain commit failed: {0}")]
    ChainCommit(#[source] RemoteError),
    #[error("node registry unavailable: {0}")]
    Registry(#[source] RemoteError),
    #[error("no node could describe {root}: {cause}")]
    FileInfoUnavailable { root: RootHash, cause: String },
    #[error("invalid root hash: {0}")]
    InvalidRootHash(#[from] IdError),
    #[error(transparent)]
    Config(#[from] ConfigError),
    #[error("transfer task failed: {0}")]
    Task(String),
}

impl TransferError {
    pub fn is_timeout(&self) -> bool {
        matches!(
            self,
            TransferError::UploadTimeout(_) | TransferError::DownloadTimeout(_)
        )
    }
}

/// Outcome of one failed attempt at one chunk.
#[derive(Debug)]
pub(crate) enum AttemptError {
    /// Node-side failure, always `TransferError::ChunkTransfer`; retry
    /// elsewhere.
    Remote(TransferError),
    /// Data or proof did not check out; retry elsewhere.
    Verification(String),
    /// Local failure that no retry can fix.
    Fatal(TransferError),
}

impl std::fmt::Display for AttemptError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            AttemptError::Remote(e) => write!(f, "{e}"),
            AttemptError::Verification(why) => write!(f, "verification failed: {why}"),
            AttemptError::Fatal(e) => write!(f, "{e}"),
        }
    }
}

impl AttemptError {
    pub(crate) fn remote(index: u64, node: &NodeId, cause: RemoteError) -> Self {
        AttemptError::Remote(TransferError::ChunkTransfer {
            index,
            node: node.clone(),
            cause,
        })
    }
}
