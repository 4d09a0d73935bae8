use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use bytes::Bytes;
use futures::future::BoxFuture;
use futures::FutureExt;

use strata_core::{FileInfo, RootHash};
use strata_transfer::{
    ChunkUpload, Fault, MemoryNetwork, NodeClient, NodeHealth, NodeId, RemoteError, StorageNode,
    TransferError,
};

use crate::*;

const CHUNK: usize = 128;

fn offline() -> Fault {
    Fault {
        offline: true,
        ..Fault::default()
    }
}

fn corrupt() -> Fault {
    Fault {
        corrupt: true,
        ..Fault::default()
    }
}

#[tokio::test]
async fn test_offline_node_replaced_during_upload() {
    let fx = Fixture::new(5);
    fx.net.set_fault("node-0", offline());
    let data = pattern(CHUNK * 8 + 3);
    let src = fx.write("src.bin", &data);
    let client = fx.client(|t| t.chunk_size = CHUNK);

    let (_, root) = client.upload(&src, 3).await.unwrap();
    for index in 0..9 {
        assert_eq!(fx.net.holders(root, index), 3, "chunk {index}");
    }
    assert_eq!(fx.net.stored_chunks("node-0"), 0);

    // A holder going away afterwards does not block the download.
    fx.net.set_fault("node-1", offline());
    let out = fx.path("out.bin");
    client.download(root, &out, true).await.unwrap();
    assert_eq!(std::fs::read(&out).unwrap(), data);
}

#[tokio::test]
async fn test_dropped_pushes_are_retried() {
    let fx = Fixture::new(4);
    fx.net.set_fault(
        "node-1",
        Fault {
            fail_pushes: 2,
            ..Fault::default()
        },
    );
    let src = fx.write("src.bin", &pattern(CHUNK * 4));
    let client = fx.client(|t| t.chunk_size = CHUNK);

    let (_, root) = client.upload(&src, 2).await.unwrap();
    for index in 0..4 {
        assert_eq!(fx.net.holders(root, index), 2);
    }
}

#[tokio::test]
async fn test_down_nodes_are_never_used() {
    let fx = Fixture::new(4);
    fx.net.set_health("node-0", NodeHealth::Down);
    let src = fx.write("src.bin", &pattern(CHUNK * 3));
    let client = fx.client(|t| t.chunk_size = CHUNK);

    let (_, root) = client.upload(&src, 3).await.unwrap();
    assert_eq!(fx.net.stored_chunks("node-0"), 0);
    for index in 0..3 {
        assert_eq!(fx.net.holders(root, index), 3);
    }
}

#[tokio::test]
async fn test_corrupt_node_is_retried_elsewhere() {
    let fx = Fixture::new(3);
    let data = pattern(CHUNK * 6 + 50);
    let src = fx.write("src.bin", &data);
    let client = fx.client(|t| t.chunk_size = CHUNK);

    let (_, root) = client.upload(&src, 2).await.unwrap();
    fx.net.set_fault("node-0", corrupt());

    let out = fx.path("out.bin");
    client.download(root, &out, true).await.unwrap();
    assert_eq!(std::fs::read(&out).unwrap(), data);
}

#[tokio::test]
async fn test_all_copies_corrupt_is_verification_error() {
    let fx = Fixture::new(3);
    let src = fx.write("src.bin", &pattern(CHUNK * 4));
    let client = fx.client(|t| t.chunk_size = CHUNK);

    let (_, root) = client.upload(&src, 3).await.unwrap();
    for id in ["node-0", "node-1", "node-2"] {
        fx.net.set_fault(id, corrupt());
    }

    let out = fx.path("out.bin");
    let err = client.download(root, &out, true).await.unwrap_err();
    assert!(
        matches!(err, TransferError::ChunkVerification { .. }),
        "unexpected error: {err}"
    );
    assert!(!out.exists());
    assert!(!fx.path("out.bin.part").exists());
}

#[tokio::test]
async fn test_insufficient_nodes() {
    let fx = Fixture::new(2);
    let src = fx.write("src.bin", &pattern(CHUNK));
    let client = fx.client(|t| t.chunk_size = CHUNK);

    let err = client.upload(&src, 3).await.unwrap_err();
    assert!(matches!(
        err,
        TransferError::InsufficientNodes {
            required: 3,
            available: 2
        }
    ));
    assert!(fx.net.commits().is_empty());
}

#[tokio::test]
async fn test_chain_failure_stops_upload() {
    let fx = Fixture::new(3);
    fx.net.fail_commits(true);
    let src = fx.write("src.bin", &pattern(CHUNK * 2));
    let client = fx.client(|t| t.chunk_size = CHUNK);

    let err = client.upload(&src, 1).await.unwrap_err();
    assert!(matches!(err, TransferError::ChainCommit(_)));
    assert_eq!(fx.net.total_pushes(), 0);
}

#[tokio::test]
async fn test_every_node_failing_reports_chunks() {
    let fx = Fixture::new(2);
    for id in ["node-0", "node-1"] {
        fx.net.set_fault(id, offline());
    }
    let src = fx.write("src.bin", &pattern(CHUNK * 2));
    let client = fx.client(|t| t.chunk_size = CHUNK);

    match client.upload(&src, 1).await.unwrap_err() {
        TransferError::UploadIncomplete { chunks, cause } => {
            assert_eq!(chunks, vec![0, 1]);
            assert!(cause.contains("offline"), "cause: {cause}");
        }
        other => panic!("unexpected error: {other}"),
    }
}

// ── Misreporting nodes ────────────────────────────────────────────────────────

/// Node RPCs that go straight to the network, except that some nodes lie
/// about the file layout and pulls stop being served once `pull_budget`
/// runs out.
struct Misreporting {
    net: Arc<MemoryNetwork>,
    layouts: HashMap<NodeId, FileInfo>,
    pull_budget: AtomicUsize,
}

impl Misreporting {
    fn new(net: &Arc<MemoryNetwork>) -> Self {
        Self {
            net: net.clone(),
            layouts: HashMap::new(),
            pull_budget: AtomicUsize::new(usize::MAX),
        }
    }

    fn claims(mut self, id: &str, info: FileInfo) -> Self {
        self.layouts.insert(NodeId::from(id), info);
        self
    }

    fn serving(self, pulls: usize) -> Self {
        self.pull_budget.store(pulls, Ordering::SeqCst);
        self
    }
}

impl NodeClient for Misreporting {
    fn push_chunk<'a>(
        &'a self,
        node: &'a StorageNode,
        chunk: &'a ChunkUpload,
    ) -> BoxFuture<'a, Result<(), RemoteError>> {
        self.net.push_chunk(node, chunk)
    }

    fn pull_chunk<'a>(
        &'a self,
        node: &'a StorageNode,
        root: RootHash,
        index: u64,
    ) -> BoxFuture<'a, Result<Bytes, RemoteError>> {
        let served = self
            .pull_budget
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok();
        if served {
            self.net.pull_chunk(node, root, index)
        } else {
            let id = node.id.clone();
            async move { Err(RemoteError::Transport(format!("{id} went offline"))) }.boxed()
        }
    }

    fn get_proof<'a>(
        &'a self,
        node: &'a StorageNode,
        root: RootHash,
        index: u64,
    ) -> BoxFuture<'a, Result<Vec<u8>, RemoteError>> {
        self.net.get_proof(node, root, index)
    }

    fn file_info<'a>(
        &'a self,
        node: &'a StorageNode,
        root: RootHash,
    ) -> BoxFuture<'a, Result<FileInfo, RemoteError>> {
        match self.layouts.get(&node.id) {
            Some(info) => {
                let info = info.clone();
                async move { Ok(info) }.boxed()
            }
            None => self.net.file_info(node, root),
        }
    }
}

#[tokio::test]
async fn test_forged_layout_from_top_node_is_ignored() {
    let fx = Fixture::new(3);
    let data = pattern(640);
    let src = fx.write("src.bin", &data);
    let (_, root) = fx
        .client(|t| t.chunk_size = 10)
        .upload(&src, 3)
        .await
        .unwrap();

    let nodes = Misreporting::new(&fx.net).claims("node-0", FileInfo::new(root, 640, 32));
    let client = fx.client_via(Arc::new(nodes), |t| t.chunk_size = 10);
    let out = fx.path("out.bin");
    client.download(root, &out, true).await.unwrap();
    assert_eq!(std::fs::read(&out).unwrap(), data);
}

#[tokio::test]
async fn test_outnumbering_liars_fall_back_to_honest_layout() {
    let fx = Fixture::new(3);
    let data = pattern(640);
    let src = fx.write("src.bin", &data);
    let (_, root) = fx
        .client(|t| t.chunk_size = 10)
        .upload(&src, 3)
        .await
        .unwrap();

    let forged = FileInfo::new(root, 640, 32);
    let nodes = Misreporting::new(&fx.net)
        .claims("node-0", forged.clone())
        .claims("node-1", forged);
    let client = fx.client_via(Arc::new(nodes), |t| t.chunk_size = 10);
    let out = fx.path("out.bin");
    client.download(root, &out, true).await.unwrap();
    assert_eq!(std::fs::read(&out).unwrap(), data);
}

#[tokio::test]
async fn test_forged_chunk_count_fails_within_deadline() {
    let fx = Fixture::new(3);
    let src = fx.write("src.bin", &pattern(640));
    let (_, root) = fx
        .client(|t| t.chunk_size = 10)
        .upload(&src, 3)
        .await
        .unwrap();

    let huge = FileInfo::new(root, 1 << 22, 1);
    let nodes = Misreporting::new(&fx.net)
        .claims("node-0", huge.clone())
        .claims("node-1", huge.clone())
        .claims("node-2", huge);
    let client = fx.client_via(Arc::new(nodes), |t| t.timeout_secs = 1);

    let out = fx.path("out.bin");
    let started = Instant::now();
    let err = client.download(root, &out, true).await.unwrap_err();
    assert!(started.elapsed() < Duration::from_secs(2), "took {:?}", started.elapsed());
    assert!(
        matches!(err, TransferError::FileInfoUnavailable { .. }),
        "unexpected error: {err}"
    );
    assert!(!fx.path("out.bin.part").exists());
}

#[tokio::test]
async fn test_download_all_holders_offline_is_incomplete() {
    let fx = Fixture::new(2);
    let src = fx.write("src.bin", &pattern(CHUNK * 4));
    let (_, root) = fx
        .client(|t| t.chunk_size = CHUNK)
        .upload(&src, 2)
        .await
        .unwrap();

    // Only the layout check is served; every chunk pull after it fails.
    let nodes = Misreporting::new(&fx.net).serving(1);
    let client = fx.client_via(Arc::new(nodes), |t| {
        t.chunk_size = CHUNK;
        t.workers = 1;
        t.max_attempts = 3;
    });

    let out = fx.path("out.bin");
    match client.download(root, &out, true).await.unwrap_err() {
        TransferError::DownloadIncomplete { chunks, cause } => {
            assert_eq!(chunks, vec![0]);
            assert!(cause.contains("chunk 0"), "cause: {cause}");
            assert!(cause.contains("went offline"), "cause: {cause}");
        }
        other => panic!("unexpected error: {other}"),
    }
    assert!(!out.exists());
    assert!(!fx.path("out.bin.part").exists());
}
