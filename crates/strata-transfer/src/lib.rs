//! strata-transfer — the networked half of Strata.
//!
//! Node selection, per-transfer session state, the upload and download
//! coordinators, and the collaborator traits they run against. HTTP
//! JSON-RPC collaborators live in `rpc`; an in-process network with fault
//! injection lives in `memory`.

pub mod client;
pub mod download;
pub mod error;
pub mod memory;
pub mod node;
pub mod remote;
pub mod rpc;
pub mod selector;
pub mod session;
pub mod upload;

pub use client::StorageClient;
pub use download::Downloader;
pub use error::{RemoteError, TransferError};
pub use memory::{Fault, MemoryNetwork};
pub use node::{NodeHealth, NodeId, StorageNode};
pub use remote::{ChainCommitter, ChunkUpload, NodeClient, NodeRegistry};
pub use selector::{NodeSelector, ReplicaSet};
pub use session::{ChunkState, TransferSession};
pub use upload::Uploader;
