//! In-process storage network.
//!
//! Implements all three collaborator traits against node state held in
//! memory. Used by the tests and by `strata-ctl simulate`. Nodes validate
//! what they are sent the way real storage nodes do: a pushed chunk must
//! have the right length and a proof that folds to the file root.
//!
//! Faults are injected per node with [`Fault`].

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use bytes::Bytes;
use dashmap::DashMap;
use futures::future::BoxFuture;
use futures::FutureExt;

use strata_core::chunker::chunk_len;
use strata_core::crypto::Hasher;
use strata_core::verify::verify_chunk;
use strata_core::{wire, FileInfo, MerkleTree, RootHash, TxHash};

use crate::error::RemoteError;
use crate::node::{NodeHealth, NodeId, StorageNode};
use crate::remote::{ChainCommitter, ChunkUpload, NodeClient, NodeRegistry};

/// Misbehaviour injected into one node.
#[derive(Debug, Clone, Default)]
pub struct Fault {
    /// Every RPC fails with a transport error.
    pub offline: bool,
    /// Pulled chunks come back with a flipped byte.
    pub corrupt: bool,
    /// Served proofs are tampered with.
    pub wrong_proof: bool,
    /// Delay before every RPC is answered.
    pub latency: Duration,
    /// Drop this many pushes before accepting any.
    pub fail_pushes: u32,
}

#[derive(Debug)]
struct StoredFile {
    info: FileInfo,
    chunks: HashMap<u64, Bytes>,
    proofs: HashMap<u64, Vec<u8>>,
}

#[derive(Debug)]
struct MemoryNode {
    node: StorageNode,
    fault: Fault,
    files: HashMap<RootHash, StoredFile>,
}

/// Decrements the in-flight counter when an RPC future finishes or is
/// dropped mid-flight.
struct InFlight<'a>(&'a AtomicUsize);

impl<'a> InFlight<'a> {
    fn enter(counter: &'a AtomicUsize) -> Self {
        counter.fetch_add(1, Ordering::SeqCst);
        Self(counter)
    }
}

impl Drop for InFlight<'_> {
    fn drop(&mut self) {
        self.0.fetch_sub(1, Ordering::SeqCst);
    }
}

#[derive(Default)]
pub struct MemoryNetwork {
    nodes: DashMap<NodeId, MemoryNode>,
    commits: DashMap<u64, (RootHash, TxHash)>,
    commit_seq: AtomicU64,
    fail_commits: AtomicBool,
    in_flight: AtomicUsize,
    pushes: AtomicU64,
}

impl MemoryNetwork {
    pub fn new() -> Self {
        Self::default()
    }

    /// `n` healthy nodes named `node-0`.. with equal capacity.
    pub fn with_nodes(n: usize) -> Arc<Self> {
        let net = Self::new();
        for i in 0..n {
            let id = format!("node-{i}");
            net.add_node(StorageNode::new(&id, &format!("memory://{id}"), 1 << 40));
        }
        Arc::new(net)
    }

    pub fn add_node(&self, node: StorageNode) {
        self.nodes.insert(
            node.id.clone(),
            MemoryNode {
                node,
                fault: Fault::default(),
                files: HashMap::new(),
            },
        );
    }

    pub fn set_fault(&self, id: &str, fault: Fault) {
        if let Some(mut entry) = self.nodes.get_mut(&NodeId::from(id)) {
            entry.fault = fault;
        }
    }

    /// Health the registry reports for `id`.
    pub fn set_health(&self, id: &str, health: NodeHealth) {
        if let Some(mut entry) = self.nodes.get_mut(&NodeId::from(id)) {
            entry.node.health = health;
        }
    }

    pub fn fail_commits(&self, fail: bool) {
        self.fail_commits.store(fail, Ordering::SeqCst);
    }

    /// Place a whole file on node `id`, bypassing the push path.
    pub fn store_file(&self, id: &str, data: &[u8], chunk_size: usize) -> Option<FileInfo> {
        let tree = MerkleTree::from_bytes(data, chunk_size).ok()?;
        let info = FileInfo::new(tree.root(), data.len() as u64, chunk_size);
        let mut stored = StoredFile {
            info: info.clone(),
            chunks: HashMap::new(),
            proofs: HashMap::new(),
        };
        for (index, piece) in data.chunks(chunk_size).enumerate() {
            let index = index as u64;
            let proof = tree.proof(index).ok()?;
            stored.chunks.insert(index, Bytes::copy_from_slice(piece));
            stored.proofs.insert(index, wire::encode_proof(&proof));
        }
        let mut entry = self.nodes.get_mut(&NodeId::from(id))?;
        entry.files.insert(info.root, stored);
        Some(info)
    }

    /// Nodes holding chunk `index` of `root`.
    pub fn holders(&self, root: RootHash, index: u64) -> usize {
        self.nodes
            .iter()
            .filter(|entry| {
                entry
                    .files
                    .get(&root)
                    .is_some_and(|f| f.chunks.contains_key(&index))
            })
            .count()
    }

    /// Chunks stored on node `id` across all files.
    pub fn stored_chunks(&self, id: &str) -> usize {
        self.nodes
            .get(&NodeId::from(id))
            .map(|entry| entry.files.values().map(|f| f.chunks.len()).sum())
            .unwrap_or(0)
    }

    /// Committed roots in commit order.
    pub fn commits(&self) -> Vec<(RootHash, TxHash)> {
        let mut out: Vec<(u64, (RootHash, TxHash))> =
            self.commits.iter().map(|e| (*e.key(), *e.value())).collect();
        out.sort_by_key(|(seq, _)| *seq);
        out.into_iter().map(|(_, c)| c).collect()
    }

    /// RPCs currently executing.
    pub fn in_flight(&self) -> usize {
        self.in_flight.load(Ordering::SeqCst)
    }

    /// Push RPCs received, accepted or not.
    pub fn total_pushes(&self) -> u64 {
        self.pushes.load(Ordering::SeqCst)
    }

    /// Fault of a reachable node. Unknown and offline nodes are transport
    /// errors.
    fn reach(&self, id: &NodeId) -> Result<Fault, RemoteError> {
        let entry = self
            .nodes
            .get(id)
            .ok_or_else(|| RemoteError::Transport(format!("{id} is unreachable")))?;
        if entry.fault.offline {
            return Err(RemoteError::Transport(format!("{id} is offline")));
        }
        Ok(entry.fault.clone())
    }

    async fn delay(fault: &Fault) {
        if !fault.latency.is_zero() {
            tokio::time::sleep(fault.latency).await;
        }
    }

    fn accept(&self, id: &NodeId, chunk: &ChunkUpload) -> Result<(), RemoteError> {
        let mut entry = self
            .nodes
            .get_mut(id)
            .ok_or_else(|| RemoteError::Transport(format!("{id} is unreachable")))?;
        if entry.fault.fail_pushes > 0 {
            entry.fault.fail_pushes -= 1;
            return Err(RemoteError::Transport(format!("{id} dropped the connection")));
        }

        let info = &chunk.info;
        if !info.is_consistent() || chunk.index >= info.chunk_count {
            return Err(RemoteError::Rejected(format!(
                "chunk {} outside file layout",
                chunk.index
            )));
        }
        if chunk.data.len() != chunk_len(info.size, info.chunk_size, chunk.index) {
            return Err(RemoteError::Rejected(format!(
                "chunk {} has wrong length",
                chunk.index
            )));
        }
        let proof =
            wire::decode_proof(&chunk.proof).map_err(|e| RemoteError::Rejected(e.to_string()))?;
        if !verify_chunk(chunk.index, info.chunk_count, &chunk.data, &proof, &info.root) {
            return Err(RemoteError::Rejected(format!(
                "chunk {} proof does not match root",
                chunk.index
            )));
        }

        let stored = entry.files.entry(info.root).or_insert_with(|| StoredFile {
            info: info.clone(),
            chunks: HashMap::new(),
            proofs: HashMap::new(),
        });
        stored.chunks.insert(chunk.index, chunk.data.clone());
        stored.proofs.insert(chunk.index, chunk.proof.clone());
        Ok(())
    }

    fn lookup<T>(
        &self,
        id: &NodeId,
        root: &RootHash,
        read: impl FnOnce(&StoredFile) -> Option<T>,
    ) -> Result<T, RemoteError> {
        let entry = self
            .nodes
            .get(id)
            .ok_or_else(|| RemoteError::Transport(format!("{id} is unreachable")))?;
        entry
            .files
            .get(root)
            .and_then(read)
            .ok_or(RemoteError::NotFound)
    }
}

fn flip_first_byte(data: &Bytes) -> Bytes {
    let mut out = data.to_vec();
    match out.first_mut() {
        Some(b) => *b ^= 0xFF,
        None => out.push(0xFF),
    }
    Bytes::from(out)
}

fn tamper_proof(encoded: &[u8]) -> Result<Vec<u8>, RemoteError> {
    let mut proof = wire::decode_proof(encoded).map_err(|e| RemoteError::Decode(e.to_string()))?;
    match proof.path.first_mut() {
        Some(step) => step.sibling[0] ^= 0xFF,
        None => proof.leaf_count += 1,
    }
    Ok(wire::encode_proof(&proof))
}

impl NodeRegistry for MemoryNetwork {
    fn list_nodes(&self) -> BoxFuture<'_, Result<Vec<StorageNode>, RemoteError>> {
        async move {
            let mut nodes: Vec<StorageNode> =
                self.nodes.iter().map(|entry| entry.node.clone()).collect();
            nodes.sort_by(|a, b| a.id.cmp(&b.id));
            Ok(nodes)
        }
        .boxed()
    }
}

impl NodeClient for MemoryNetwork {
    fn push_chunk<'a>(
        &'a self,
        node: &'a StorageNode,
        chunk: &'a ChunkUpload,
    ) -> BoxFuture<'a, Result<(), RemoteError>> {
        async move {
            let _guard = InFlight::enter(&self.in_flight);
            self.pushes.fetch_add(1, Ordering::SeqCst);
            let fault = self.reach(&node.id)?;
            Self::delay(&fault).await;
            self.accept(&node.id, chunk)
        }
        .boxed()
    }

    fn pull_chunk<'a>(
        &'a self,
        node: &'a StorageNode,
        root: RootHash,
        index: u64,
    ) -> BoxFuture<'a, Result<Bytes, RemoteError>> {
        async move {
            let _guard = InFlight::enter(&self.in_flight);
            let fault = self.reach(&node.id)?;
            Self::delay(&fault).await;
            let data = self.lookup(&node.id, &root, |f| f.chunks.get(&index).cloned())?;
            Ok(if fault.corrupt {
                flip_first_byte(&data)
            } else {
                data
            })
        }
        .boxed()
    }

    fn get_proof<'a>(
        &'a self,
        node: &'a StorageNode,
        root: RootHash,
        index: u64,
    ) -> BoxFuture<'a, Result<Vec<u8>, RemoteError>> {
        async move {
            let _guard = InFlight::enter(&self.in_flight);
            let fault = self.reach(&node.id)?;
            Self::delay(&fault).await;
            let proof = self.lookup(&node.id, &root, |f| f.proofs.get(&index).cloned())?;
            if fault.wrong_proof {
                tamper_proof(&proof)
            } else {
                Ok(proof)
            }
        }
        .boxed()
    }

    fn file_info<'a>(
        &'a self,
        node: &'a StorageNode,
        root: RootHash,
    ) -> BoxFuture<'a, Result<FileInfo, RemoteError>> {
        async move {
            let _guard = InFlight::enter(&self.in_flight);
            let fault = self.reach(&node.id)?;
            Self::delay(&fault).await;
            self.lookup(&node.id, &root, |f| Some(f.info.clone()))
        }
        .boxed()
    }
}

impl ChainCommitter for MemoryNetwork {
    fn commit<'a>(
        &'a self,
        root: RootHash,
        _metadata: &'a FileInfo,
    ) -> BoxFuture<'a, Result<TxHash, RemoteError>> {
        async move {
            if self.fail_commits.load(Ordering::SeqCst) {
                return Err(RemoteError::Rejected("commit reverted".into()));
            }
            let seq = self.commit_seq.fetch_add(1, Ordering::SeqCst);
            let mut hasher = Hasher::new();
            hasher.update(root.as_bytes());
            hasher.update(&seq.to_le_bytes());
            let tx = TxHash(hasher.finalize());
            self.commits.insert(seq, (root, tx));
            Ok(tx)
        }
        .boxed()
    }
}
