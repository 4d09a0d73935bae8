//! Download coordinator — fetch, verify and reassemble a file by root.
//!
//! Chunks are pulled concurrently but written strictly in index order:
//! out-of-order arrivals wait in a bounded reorder buffer, and dispatch
//! never runs more than a window ahead of the writer. Bytes go to
//! `<dest>.part` and the file only appears at `dest` once every chunk has
//! been written and flushed. Any failure removes the partial file.
//!
//! With verification on, each chunk must arrive with a proof binding it to
//! the requested index and the expected root. A node that serves bad data
//! or a bad proof is excluded and the chunk is retried elsewhere.
//!
//! The file layout (size, chunk size, chunk count) comes from the nodes
//! themselves, so it is not taken on trust: before any chunk is scheduled
//! one holder must serve the last chunk of the claimed layout, and with
//! verification on its proof must fix the leaf count under the root.

use std::collections::{BTreeMap, VecDeque};
use std::ffi::OsString;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Instant;

use bytes::Bytes;
use futures::future::join_all;
use tokio::io::{AsyncWriteExt, BufWriter};
use tokio::task::JoinSet;

use strata_core::chunker::chunk_len;
use strata_core::verify::{is_empty_root, verify_chunk};
use strata_core::{wire, FileInfo, RootHash, TransferConfig};

use crate::error::{AttemptError, RemoteError, TransferError};
use crate::node::StorageNode;
use crate::remote::NodeClient;
use crate::selector::{NodeSelector, ReplicaSet};
use crate::session::{Retry, TransferSession};

/// `<dest>.part`
pub fn part_path(dest: &Path) -> PathBuf {
    let mut name = OsString::from(dest.as_os_str());
    name.push(".part");
    PathBuf::from(name)
}

// ── Ordered writer ────────────────────────────────────────────────────────────

/// Writes chunks to disk in index order regardless of arrival order.
struct OrderedWriter {
    path: PathBuf,
    out: BufWriter<tokio::fs::File>,
    next: u64,
    pending: BTreeMap<u64, Bytes>,
}

impl OrderedWriter {
    async fn create(path: PathBuf) -> Result<Self, TransferError> {
        let file = tokio::fs::File::create(&path)
            .await
            .map_err(|source| TransferError::Write {
                path: path.clone(),
                source,
            })?;
        Ok(Self {
            path,
            out: BufWriter::new(file),
            next: 0,
            pending: BTreeMap::new(),
        })
    }

    /// Next index the file is waiting for.
    fn next_index(&self) -> u64 {
        self.next
    }

    fn buffered(&self) -> usize {
        self.pending.len()
    }

    async fn push(&mut self, index: u64, data: Bytes) -> Result<(), TransferError> {
        if index < self.next {
            return Ok(());
        }
        self.pending.insert(index, data);
        while let Some(data) = self.pending.remove(&self.next) {
            self.out.write_all(&data).await.map_err(|e| self.err(e))?;
            self.next += 1;
        }
        Ok(())
    }

    async fn finish(mut self) -> Result<PathBuf, TransferError> {
        self.out.flush().await.map_err(|e| self.err(e))?;
        self.out.get_ref().sync_all().await.map_err(|e| self.err(e))?;
        Ok(self.path)
    }

    fn err(&self, source: std::io::Error) -> TransferError {
        TransferError::Write {
            path: self.path.clone(),
            source,
        }
    }
}

// ── Pulling ───────────────────────────────────────────────────────────────────

#[derive(Debug, Clone)]
struct PullJob {
    index: u64,
    node: StorageNode,
}

struct PullContext {
    info: FileInfo,
    verify: bool,
    nodes: Arc<dyn NodeClient>,
}

impl PullContext {
    async fn pull(&self, job: &PullJob) -> Result<Bytes, AttemptError> {
        let root = self.info.root;
        let remote = |cause| AttemptError::remote(job.index, &job.node.id, cause);
        let data = self
            .nodes
            .pull_chunk(&job.node, root, job.index)
            .await
            .map_err(remote)?;

        let expected = chunk_len(self.info.size, self.info.chunk_size, job.index);
        if data.len() != expected {
            return Err(AttemptError::Verification(format!(
                "chunk {} is {} bytes, expected {expected}",
                job.index,
                data.len()
            )));
        }

        if self.verify {
            let encoded = self
                .nodes
                .get_proof(&job.node, root, job.index)
                .await
                .map_err(remote)?;
            let proof = wire::decode_proof(&encoded)
                .map_err(|e| AttemptError::Verification(format!("bad proof encoding: {e}")))?;
            if !verify_chunk(job.index, self.info.chunk_count, &data, &proof, &root) {
                return Err(AttemptError::Verification(format!(
                    "chunk {} does not match root {}",
                    job.index,
                    root.short()
                )));
            }
        }
        Ok(data)
    }
}

pub struct Downloader {
    selector: Arc<NodeSelector>,
    nodes: Arc<dyn NodeClient>,
    config: TransferConfig,
}

impl Downloader {
    pub fn new(
        selector: Arc<NodeSelector>,
        nodes: Arc<dyn NodeClient>,
        config: TransferConfig,
    ) -> Self {
        Self {
            selector,
            nodes,
            config,
        }
    }

    /// `Download(rootHash, destinationPath, verify)`
    pub async fn download(
        &self,
        root: RootHash,
        dest: &Path,
        verify: bool,
    ) -> Result<(), TransferError> {
        let deadline = self.config.timeout();
        let part = part_path(dest);
        let result = match tokio::time::timeout(deadline, self.run(root, dest, &part, verify)).await
        {
            Ok(result) => result,
            Err(_) => {
                tracing::warn!(root = %root, ?deadline, "download deadline exceeded, in-flight pulls cancelled");
                Err(TransferError::DownloadTimeout(deadline))
            }
        };
        if result.is_err() {
            let _ = tokio::fs::remove_file(&part).await;
        }
        result
    }

    async fn run(
        &self,
        root: RootHash,
        dest: &Path,
        part: &Path,
        verify: bool,
    ) -> Result<(), TransferError> {
        let started = Instant::now();
        let min = self.config.min_nodes.max(1);
        let candidates = self
            .selector
            .select(min, usize::MAX, &[], self.config.strategy)
            .await?;

        let (info, holders) = if is_empty_root(&root) {
            (FileInfo::new(root, 0, self.config.chunk_size), candidates)
        } else {
            self.discover(&candidates, root, verify).await?
        };
        tracing::info!(
            root = %root,
            bytes = info.size,
            chunks = info.chunk_count,
            verify,
            "download started"
        );

        let mut writer = OrderedWriter::create(part.to_path_buf()).await?;
        let session = Arc::new(TransferSession::new(
            root,
            info.chunk_count,
            1,
            self.config.max_attempts,
            holders,
        ));
        let ctx = Arc::new(PullContext {
            info: info.clone(),
            verify,
            nodes: self.nodes.clone(),
        });

        let workers = self.config.workers.max(1);
        let window = (workers * 2) as u64;
        let mut next: u64 = 0;
        let mut retries: VecDeque<PullJob> = VecDeque::new();
        let mut halted = false;
        let mut tasks: JoinSet<(PullJob, Result<Bytes, AttemptError>)> = JoinSet::new();

        loop {
            while !halted && tasks.len() < workers {
                let mut job = if let Some(job) = retries.pop_front() {
                    job
                } else if next < info.chunk_count && next < writer.next_index() + window {
                    let index = next;
                    next += 1;
                    match session.candidate(index, index as usize).await {
                        Some(node) => PullJob { index, node },
                        None => match self.replacement(&session, index).await {
                            Some(node) => PullJob { index, node },
                            None => {
                                session.abandon(index, "no eligible node");
                                halted = true;
                                break;
                            }
                        },
                    }
                } else {
                    break;
                };

                if session.is_excluded(&job.node.id) {
                    match self.replacement(&session, job.index).await {
                        Some(node) => job.node = node,
                        None => {
                            session.abandon(job.index, "no replacement node available");
                            halted = true;
                            break;
                        }
                    }
                }
                if !session.begin(job.index, &job.node.id) {
                    continue;
                }
                let ctx = ctx.clone();
                tasks.spawn(async move {
                    let result = ctx.pull(&job).await;
                    (job, result)
                });
            }

            let Some(joined) = tasks.join_next().await else {
                break;
            };
            let (job, result) = joined.map_err(|e| TransferError::Task(e.to_string()))?;

            match result {
                Ok(data) => {
                    if session.mark_done(job.index, &job.node.id) {
                        writer.push(job.index, data).await?;
                    }
                }
                Err(AttemptError::Fatal(e)) => return Err(e),
                Err(e) => {
                    let verification = matches!(e, AttemptError::Verification(_));
                    tracing::warn!(
                        chunk = job.index,
                        node = %job.node.id,
                        error = %e,
                        verification,
                        "chunk pull failed"
                    );
                    if session.exclude(&job.node.id) {
                        tracing::warn!(node = %job.node.id, "node excluded for rest of download");
                    }
                    match session.mark_failed(job.index, &e.to_string(), verification) {
                        Retry::Again => match self.replacement(&session, job.index).await {
                            Some(node) => retries.push_back(PullJob {
                                index: job.index,
                                node,
                            }),
                            None => {
                                session.abandon(job.index, &e.to_string());
                                halted = true;
                            }
                        },
                        Retry::Exhausted => {
                            tracing::warn!(chunk = job.index, "chunk retry budget exhausted");
                            halted = true;
                        }
                        Retry::Settled => {}
                    }
                }
            }
        }

        if !session.is_complete() {
            if let Some(index) = session.first_verification_failure() {
                return Err(TransferError::ChunkVerification { index });
            }
            return Err(TransferError::DownloadIncomplete {
                chunks: session.failed(),
                cause: session.last_cause(),
            });
        }
        debug_assert_eq!(writer.buffered(), 0);

        let written = writer.finish().await?;
        tokio::fs::rename(&written, dest)
            .await
            .map_err(|source| TransferError::Write {
                path: dest.to_path_buf(),
                source,
            })?;

        tracing::info!(
            root = %root,
            dest = %dest.display(),
            bytes = info.size,
            elapsed_ms = started.elapsed().as_millis() as u64,
            "download complete"
        );
        Ok(())
    }

    /// Ask every candidate for the file layout and settle on one a holder
    /// can back with data.
    ///
    /// Answers are grouped by layout and tried by how many nodes report
    /// them, ties in rank order. A layout is accepted once one of its
    /// holders passes a pull of the layout's last chunk; holders that fail
    /// that pull are left out of the download set.
    async fn discover(
        &self,
        candidates: &ReplicaSet,
        root: RootHash,
        verify: bool,
    ) -> Result<(FileInfo, ReplicaSet), TransferError> {
        let answers = join_all(
            candidates
                .nodes()
                .iter()
                .map(|node| self.nodes.file_info(node, root)),
        )
        .await;

        let mut layouts: Vec<(FileInfo, Vec<StorageNode>)> = Vec::new();
        let mut cause = RemoteError::NotFound.to_string();
        for (node, answer) in candidates.nodes().iter().zip(answers) {
            match answer {
                Ok(info) if info.root == root && info.is_consistent() && info.chunk_count > 0 => {
                    match layouts.iter_mut().find(|(known, _)| *known == info) {
                        Some((_, holders)) => holders.push(node.clone()),
                        None => layouts.push((info, vec![node.clone()])),
                    }
                }
                Ok(_) => {
                    tracing::debug!(node = %node.id, root = %root, "node reported inconsistent file info");
                    cause = format!("{} reported inconsistent file info", node.id);
                }
                Err(e) => {
                    tracing::debug!(node = %node.id, root = %root, error = %e, "file info lookup failed");
                    cause = e.to_string();
                }
            }
        }
        if layouts.len() > 1 {
            tracing::warn!(root = %root, layouts = layouts.len(), "holders disagree on file layout");
        }
        layouts.sort_by_key(|(_, holders)| std::cmp::Reverse(holders.len()));

        // Lowest last-chunk index of a layout every holder failed to prove.
        let mut unproven: Option<u64> = None;
        for (info, holders) in layouts {
            let ctx = PullContext {
                info: info.clone(),
                verify,
                nodes: self.nodes.clone(),
            };
            let last = info.chunk_count - 1;
            let mut kept = Vec::with_capacity(holders.len());
            let mut confirmed = false;
            let mut only_verification = true;
            for node in holders {
                if confirmed {
                    kept.push(node);
                    continue;
                }
                let job = PullJob {
                    index: last,
                    node: node.clone(),
                };
                match ctx.pull(&job).await {
                    Ok(_) => {
                        confirmed = true;
                        kept.push(node);
                    }
                    Err(e) => {
                        tracing::warn!(
                            node = %node.id,
                            root = %root,
                            chunks = info.chunk_count,
                            error = %e,
                            "node cannot back its file layout"
                        );
                        only_verification &= matches!(e, AttemptError::Verification(_));
                        cause = e.to_string();
                    }
                }
            }

            if confirmed {
                tracing::debug!(root = %root, holders = kept.len(), "file located");
                return Ok((info, ReplicaSet::new(kept)));
            }
            if only_verification {
                unproven = Some(unproven.map_or(last, |lowest| lowest.min(last)));
            }
        }

        match unproven {
            Some(index) => Err(TransferError::ChunkVerification { index }),
            None => Err(TransferError::FileInfoUnavailable { root, cause }),
        }
    }

    async fn replacement(&self, session: &TransferSession, index: u64) -> Option<StorageNode> {
        session
            .replacement(&self.selector, index, index as usize, self.config.strategy)
            .await
    }
}
