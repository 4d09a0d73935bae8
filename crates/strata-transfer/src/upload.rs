//! Upload coordinator — hash, select, commit, then push every chunk to
//! every replica.
//!
//! The root hash is computed locally before any network I/O. The chain
//! commit happens before the first chunk push. Pushes run on a bounded
//! pool of tasks; a failed push excludes its node for the rest of the
//! upload and the chunk is retried on a replacement (a spare from the
//! replica set, or a freshly selected node once spares run out).
//!
//! The whole call runs under one deadline. On expiry the pool is dropped,
//! which aborts every in-flight push, and any on-chain commit already made
//! is left for the caller to inspect.
//!
//! File reads and hashing run on the blocking pool. Hashing checks the
//! deadline between chunks so a large file cannot hold the call past it.

use std::collections::VecDeque;
use std::path::Path;
use std::sync::Arc;
use std::time::{Duration, Instant};

use tokio::task::JoinSet;

use strata_core::chunker::{ChunkError, ChunkReader, Chunker};
use strata_core::crypto::{leaf_hash, Digest};
use strata_core::{wire, FileInfo, MerkleTree, RootHash, TransferConfig, TxHash};

use crate::error::{AttemptError, TransferError};
use crate::node::StorageNode;
use crate::remote::{ChainCommitter, ChunkUpload, NodeClient};
use crate::selector::NodeSelector;
use crate::session::{ChunkState, Retry, TransferSession};

/// One chunk, one target node.
#[derive(Debug, Clone)]
struct PushJob {
    index: u64,
    node: StorageNode,
}

/// State shared read-only by every push task of one upload.
struct PushContext {
    reader: ChunkReader,
    tree: MerkleTree,
    info: FileInfo,
    nodes: Arc<dyn NodeClient>,
}

impl PushContext {
    async fn push(&self, job: &PushJob) -> Result<(), AttemptError> {
        let io_err = |source| {
            AttemptError::Fatal(TransferError::IoRead {
                path: self.reader.path().to_path_buf(),
                source,
            })
        };

        let reader = self.reader.clone();
        let index = job.index;
        let chunk = tokio::task::spawn_blocking(move || reader.read(index))
            .await
            .map_err(|e| AttemptError::Fatal(TransferError::Task(e.to_string())))?
            .map_err(io_err)?;
        if self.tree.leaf(job.index) != Some(&leaf_hash(&chunk.data)) {
            return Err(io_err(ChunkError::Modified { index: job.index }));
        }
        let proof = self
            .tree
            .proof(job.index)
            .map_err(|e| AttemptError::Fatal(TransferError::Task(e.to_string())))?;

        let upload = ChunkUpload {
            info: self.info.clone(),
            index: job.index,
            data: chunk.data,
            proof: wire::encode_proof(&proof),
        };
        self.nodes
            .push_chunk(&job.node, &upload)
            .await
            .map_err(|cause| AttemptError::remote(job.index, &job.node.id, cause))
    }
}

pub struct Uploader {
    selector: Arc<NodeSelector>,
    nodes: Arc<dyn NodeClient>,
    chain: Arc<dyn ChainCommitter>,
    config: TransferConfig,
}

impl Uploader {
    pub fn new(
        selector: Arc<NodeSelector>,
        nodes: Arc<dyn NodeClient>,
        chain: Arc<dyn ChainCommitter>,
        config: TransferConfig,
    ) -> Self {
        Self {
            selector,
            nodes,
            chain,
            config,
        }
    }

    /// `Upload(file, replicaCount) -> (TransactionID, RootHash)`
    pub async fn upload(
        &self,
        path: &Path,
        replicas: usize,
    ) -> Result<(TxHash, RootHash), TransferError> {
        let deadline = self.config.timeout();
        let expires = Instant::now() + deadline;
        let run = self.run(path, replicas, expires, deadline);
        match tokio::time::timeout(deadline, run).await {
            Ok(result) => result,
            Err(_) => {
                tracing::warn!(
                    path = %path.display(),
                    ?deadline,
                    "upload deadline exceeded, in-flight pushes cancelled"
                );
                Err(TransferError::UploadTimeout(deadline))
            }
        }
    }

    async fn run(
        &self,
        path: &Path,
        replicas: usize,
        expires: Instant,
        deadline: Duration,
    ) -> Result<(TxHash, RootHash), TransferError> {
        let started = Instant::now();
        let replicas = replicas.max(1);
        let chunk_size = self.config.chunk_size;
        let io_err = |source| TransferError::IoRead {
            path: path.to_path_buf(),
            source,
        };

        // 1. Root hash up front.
        let owned = path.to_path_buf();
        let hashed = tokio::task::spawn_blocking(move || hash_file(&owned, chunk_size, expires))
            .await
            .map_err(|e| TransferError::Task(e.to_string()))?
            .map_err(io_err)?;
        let Some((reader, tree)) = hashed else {
            tracing::warn!(
                path = %path.display(),
                ?deadline,
                "upload deadline exceeded while hashing"
            );
            return Err(TransferError::UploadTimeout(deadline));
        };
        let root = tree.root();
        let info = FileInfo::new(root, reader.size(), chunk_size);
        if tree.leaf_count() != info.chunk_count {
            return Err(io_err(ChunkError::Modified {
                index: tree.leaf_count().min(info.chunk_count),
            }));
        }
        tracing::info!(
            root = %root,
            bytes = info.size,
            chunks = info.chunk_count,
            replicas,
            "upload prepared"
        );

        // 2. Replica set: primaries plus spares.
        let set = self
            .selector
            .select(
                replicas,
                replicas + self.config.spare_nodes,
                &[],
                self.config.strategy,
            )
            .await?
            .with_primaries(replicas);

        // 3. Commit before any chunk is pushed.
        let tx = self
            .chain
            .commit(root, &info)
            .await
            .map_err(TransferError::ChainCommit)?;
        tracing::info!(root = %root, tx = %tx, "root committed on chain");

        // 4. Push.
        let session = Arc::new(TransferSession::new(
            root,
            info.chunk_count,
            replicas,
            self.config.max_attempts,
            set.clone(),
        ));
        let mut queue: VecDeque<PushJob> = VecDeque::new();
        for index in 0..info.chunk_count {
            for node in set.primaries() {
                session.assign(index, &node.id);
                queue.push_back(PushJob {
                    index,
                    node: node.clone(),
                });
            }
        }
        let ctx = Arc::new(PushContext {
            reader,
            tree,
            info: info.clone(),
            nodes: self.nodes.clone(),
        });

        let mut tasks: JoinSet<(PushJob, Result<(), AttemptError>)> = JoinSet::new();
        loop {
            while tasks.len() < self.config.workers {
                let Some(mut job) = queue.pop_front() else {
                    break;
                };
                if matches!(
                    session.state(job.index),
                    Some(ChunkState::Done | ChunkState::Failed)
                ) {
                    continue;
                }
                // Node dropped out after this job was queued.
                if session.is_excluded(&job.node.id) {
                    match self.replacement(&session, job.index).await {
                        Some(node) => job.node = node,
                        None => {
                            session.abandon(job.index, "no replacement node available");
                            continue;
                        }
                    }
                }
                if !session.begin(job.index, &job.node.id) {
                    continue;
                }
                let ctx = ctx.clone();
                tasks.spawn(async move {
                    let result = ctx.push(&job).await;
                    (job, result)
                });
            }

            let Some(joined) = tasks.join_next().await else {
                break;
            };
            let (job, result) = joined.map_err(|e| TransferError::Task(e.to_string()))?;

            match result {
                Ok(()) => {
                    if session.mark_done(job.index, &job.node.id) {
                        tracing::debug!(chunk = job.index, "chunk fully replicated");
                    }
                }
                Err(AttemptError::Fatal(e)) => return Err(e),
                Err(e) => {
                    tracing::warn!(
                        chunk = job.index,
                        node = %job.node.id,
                        error = %e,
                        "chunk push failed"
                    );
                    if session.exclude(&job.node.id) {
                        tracing::warn!(node = %job.node.id, "node excluded for rest of upload");
                    }
                    let verification = matches!(e, AttemptError::Verification(_));
                    match session.mark_failed(job.index, &e.to_string(), verification) {
                        Retry::Again => match self.replacement(&session, job.index).await {
                            Some(node) => queue.push_back(PushJob {
                                index: job.index,
                                node,
                            }),
                            None => session.abandon(job.index, &e.to_string()),
                        },
                        Retry::Exhausted => {
                            tracing::warn!(chunk = job.index, "chunk retry budget exhausted");
                        }
                        Retry::Settled => {}
                    }
                }
            }
        }

        // 5. Every chunk needs `replicas` acknowledgements.
        if !session.is_complete() {
            let chunks = session.unfinished();
            tracing::warn!(root = %root, failed = chunks.len(), "upload incomplete");
            return Err(TransferError::UploadIncomplete {
                chunks,
                cause: session.last_cause(),
            });
        }

        tracing::info!(
            root = %root,
            tx = %tx,
            chunks = info.chunk_count,
            bytes = info.size,
            elapsed_ms = started.elapsed().as_millis() as u64,
            "upload complete"
        );
        Ok((tx, root))
    }

    async fn replacement(&self, session: &TransferSession, index: u64) -> Option<StorageNode> {
        session
            .replacement(&self.selector, index, 0, self.config.strategy)
            .await
    }
}

/// Hash every chunk of `path` on the calling (blocking) thread. `None`
/// once `expires` passes.
fn hash_file(
    path: &Path,
    chunk_size: usize,
    expires: Instant,
) -> Result<Option<(ChunkReader, MerkleTree)>, ChunkError> {
    let reader = ChunkReader::open(path, chunk_size)?;
    let mut leaves: Vec<Digest> = Vec::new();
    for chunk in Chunker::open(path, chunk_size)? {
        if Instant::now() >= expires {
            return Ok(None);
        }
        leaves.push(leaf_hash(&chunk?.data));
    }
    Ok(Some((reader, MerkleTree::from_leaves(leaves))))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::memory::{Fault, MemoryNetwork};
    use std::sync::atomic::{AtomicU64, Ordering};
    use std::time::Duration;

    static COUNTER: AtomicU64 = AtomicU64::new(0);

    fn temp_file(data: &[u8]) -> std::path::PathBuf {
        let id = COUNTER.fetch_add(1, Ordering::Relaxed);
        let path = std::env::temp_dir()
            .join(format!("strata-upload-test-{}-{}", std::process::id(), id));
        std::fs::write(&path, data).unwrap();
        path
    }

    fn config() -> TransferConfig {
        TransferConfig {
            chunk_size: 64,
            workers: 4,
            max_attempts: 3,
            timeout_secs: 10,
            ..TransferConfig::default()
        }
    }

    fn uploader(net: &Arc<MemoryNetwork>, config: TransferConfig) -> Uploader {
        Uploader::new(
            Arc::new(NodeSelector::new(net.clone())),
            net.clone(),
            net.clone(),
            config,
        )
    }

    #[tokio::test]
    async fn root_matches_local_tree_and_commit() {
        let net = MemoryNetwork::with_nodes(3);
        let data: Vec<u8> = (0..1000u32).map(|i| (i % 256) as u8).collect();
        let path = temp_file(&data);

        let (tx, root) = uploader(&net, config()).upload(&path, 2).await.unwrap();
        assert_eq!(root, MerkleTree::from_bytes(&data, 64).unwrap().root());
        assert_eq!(net.commits(), vec![(root, tx)]);
        for index in 0..16 {
            assert_eq!(net.holders(root, index), 2, "chunk {index}");
        }

        let _ = std::fs::remove_file(&path);
    }

    #[tokio::test]
    async fn failing_node_is_replaced() {
        let net = MemoryNetwork::with_nodes(4);
        net.set_fault(
            "node-0",
            Fault {
                offline: true,
                ..Fault::default()
            },
        );
        let path = temp_file(&[7u8; 300]);

        let (_, root) = uploader(&net, config()).upload(&path, 2).await.unwrap();
        for index in 0..5 {
            assert_eq!(net.holders(root, index), 2);
        }
        assert_eq!(net.stored_chunks("node-0"), 0);

        let _ = std::fs::remove_file(&path);
    }

    #[tokio::test]
    async fn exhausted_retries_report_chunks() {
        let net = MemoryNetwork::with_nodes(2);
        for id in ["node-0", "node-1"] {
            net.set_fault(
                id,
                Fault {
                    offline: true,
                    ..Fault::default()
                },
            );
        }
        let path = temp_file(&[1u8; 100]);

        let err = uploader(&net, config()).upload(&path, 1).await.unwrap_err();
        match err {
            TransferError::UploadIncomplete { chunks, cause } => {
                assert_eq!(chunks, vec![0, 1]);
                assert!(cause.contains("offline"), "cause: {cause}");
            }
            other => panic!("unexpected error: {other}"),
        }

        let _ = std::fs::remove_file(&path);
    }

    #[tokio::test]
    async fn chain_failure_is_fatal_and_pushes_nothing() {
        let net = MemoryNetwork::with_nodes(3);
        net.fail_commits(true);
        let path = temp_file(b"commit me");

        let err = uploader(&net, config()).upload(&path, 1).await.unwrap_err();
        assert!(matches!(err, TransferError::ChainCommit(_)));
        assert_eq!(net.total_pushes(), 0);

        let _ = std::fs::remove_file(&path);
    }

    #[tokio::test]
    async fn missing_file_is_io_error() {
        let net = MemoryNetwork::with_nodes(1);
        let path = std::env::temp_dir().join("strata-upload-test-does-not-exist");
        let err = uploader(&net, config()).upload(&path, 1).await.unwrap_err();
        assert!(matches!(err, TransferError::IoRead { .. }));
        assert!(net.commits().is_empty());
    }

    #[tokio::test]
    async fn not_enough_nodes_for_replicas() {
        let net = MemoryNetwork::with_nodes(2);
        let path = temp_file(b"abc");
        let err = uploader(&net, config()).upload(&path, 3).await.unwrap_err();
        assert!(matches!(
            err,
            TransferError::InsufficientNodes {
                required: 3,
                available: 2
            }
        ));
        let _ = std::fs::remove_file(&path);
    }

    #[test]
    fn hashing_stops_at_the_deadline() {
        let path = temp_file(&[3u8; 1024]);
        let expired = Instant::now();
        assert!(hash_file(&path, 64, expired).unwrap().is_none());

        let later = Instant::now() + Duration::from_secs(60);
        let (reader, tree) = hash_file(&path, 64, later).unwrap().unwrap();
        assert_eq!(reader.count(), 16);
        assert_eq!(tree.root(), MerkleTree::from_bytes(&[3u8; 1024], 64).unwrap().root());

        let _ = std::fs::remove_file(&path);
    }

    #[tokio::test]
    async fn expired_deadline_commits_nothing() {
        let net = MemoryNetwork::with_nodes(2);
        let path = temp_file(&[5u8; 4096]);
        let config = TransferConfig {
            timeout_secs: 0,
            ..config()
        };

        let err = uploader(&net, config).upload(&path, 1).await.unwrap_err();
        assert!(matches!(err, TransferError::UploadTimeout(_)));
        assert!(net.commits().is_empty());
        assert_eq!(net.total_pushes(), 0);

        let _ = std::fs::remove_file(&path);
    }

    #[tokio::test]
    async fn deadline_cancels_pushes() {
        let net = MemoryNetwork::with_nodes(2);
        net.set_fault(
            "node-0",
            Fault {
                latency: Duration::from_secs(30),
                ..Fault::default()
            },
        );
        let path = temp_file(&[9u8; 640]);
        let config = TransferConfig {
            timeout_secs: 0,
            ..config()
        };

        let err = uploader(&net, config).upload(&path, 2).await.unwrap_err();
        assert!(matches!(err, TransferError::UploadTimeout(_)));
        tokio::time::sleep(Duration::from_millis(50)).await;
        assert_eq!(net.in_flight(), 0);

        let _ = std::fs::remove_file(&path);
    }
}
