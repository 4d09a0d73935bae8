//! Transfer session — per-chunk progress shared by every worker of one
//! upload or download.
//!
//! Each chunk runs a bounded state machine:
//!
//! ```text
//!   Pending ──begin──▶ InFlight ──enough acks──▶ Done
//!      ▲                  │
//!      └──── retry ◀── failure ──budget spent──▶ Failed
//! ```
//!
//! A chunk may have several attempts in flight at once (one per replica on
//! upload). Completion is idempotent: acknowledging the same node twice, or
//! completing a chunk that is already done, changes nothing. Failed nodes
//! are excluded for the rest of the session. Sessions are never reused.
//!
//! Chunk state is created on first touch, so memory follows the chunks a
//! coordinator has actually dispatched rather than the declared count.

use std::collections::HashSet;

use dashmap::mapref::one::RefMut;
use dashmap::{DashMap, DashSet};
use tokio::sync::Mutex;

use strata_core::{RootHash, SelectionStrategy};

use crate::node::{NodeId, StorageNode};
use crate::selector::{NodeSelector, ReplicaSet};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChunkState {
    Pending,
    InFlight,
    Done,
    Failed,
}

/// What the coordinator should do after an attempt failed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Retry {
    /// Budget remains; schedule another attempt on a different node.
    Again,
    /// Budget spent; the chunk is now `Failed`.
    Exhausted,
    /// The chunk completed through another attempt. Nothing to do.
    Settled,
}

#[derive(Debug)]
struct ChunkSlot {
    state: ChunkState,
    in_flight: usize,
    failures: u32,
    acks: HashSet<NodeId>,
    tried: HashSet<NodeId>,
    last_error: Option<String>,
    last_was_verification: bool,
}

impl ChunkSlot {
    fn new() -> Self {
        Self {
            state: ChunkState::Pending,
            in_flight: 0,
            failures: 0,
            acks: HashSet::new(),
            tried: HashSet::new(),
            last_error: None,
            last_was_verification: false,
        }
    }
}

pub struct TransferSession {
    root: RootHash,
    chunk_count: u64,
    chunks: DashMap<u64, ChunkSlot>,
    required_acks: usize,
    max_attempts: u32,
    excluded: DashSet<NodeId>,
    replicas: Mutex<ReplicaSet>,
}

impl TransferSession {
    pub fn new(
        root: RootHash,
        chunk_count: u64,
        required_acks: usize,
        max_attempts: u32,
        replicas: ReplicaSet,
    ) -> Self {
        Self {
            root,
            chunk_count,
            chunks: DashMap::new(),
            required_acks: required_acks.max(1),
            max_attempts: max_attempts.max(1),
            excluded: DashSet::new(),
            replicas: Mutex::new(replicas),
        }
    }

    pub fn root(&self) -> RootHash {
        self.root
    }

    pub fn chunk_count(&self) -> u64 {
        self.chunk_count
    }

    /// Chunks with recorded state.
    pub fn tracked(&self) -> usize {
        self.chunks.len()
    }

    fn slot(&self, index: u64) -> Option<RefMut<'_, u64, ChunkSlot>> {
        (index < self.chunk_count)
            .then(|| self.chunks.entry(index).or_insert_with(ChunkSlot::new))
    }

    pub fn state(&self, index: u64) -> Option<ChunkState> {
        if index >= self.chunk_count {
            return None;
        }
        Some(
            self.chunks
                .get(&index)
                .map_or(ChunkState::Pending, |slot| slot.state),
        )
    }

    /// Start an attempt at `index` on `node`. Returns false if the chunk is
    /// already settled (done or failed) and the attempt should be dropped.
    pub fn begin(&self, index: u64, node: &NodeId) -> bool {
        let Some(mut slot) = self.slot(index) else {
            return false;
        };
        let state = slot.state;
        match state {
            ChunkState::Done | ChunkState::Failed => false,
            ChunkState::Pending | ChunkState::InFlight => {
                slot.state = ChunkState::InFlight;
                slot.in_flight += 1;
                slot.tried.insert(node.clone());
                true
            }
        }
    }

    /// Record a successful attempt. Returns true only on the transition
    /// into `Done`.
    pub fn mark_done(&self, index: u64, node: &NodeId) -> bool {
        let Some(mut slot) = self.slot(index) else {
            return false;
        };
        slot.in_flight = slot.in_flight.saturating_sub(1);
        slot.acks.insert(node.clone());
        let state = slot.state;
        let acked = slot.acks.len();
        match state {
            ChunkState::Done | ChunkState::Failed => false,
            _ if acked >= self.required_acks => {
                slot.state = ChunkState::Done;
                true
            }
            _ => {
                if slot.in_flight == 0 {
                    slot.state = ChunkState::Pending;
                }
                false
            }
        }
    }

    /// Record a failed attempt and decide whether to retry.
    pub fn mark_failed(&self, index: u64, error: &str, verification: bool) -> Retry {
        let Some(mut slot) = self.slot(index) else {
            return Retry::Settled;
        };
        slot.in_flight = slot.in_flight.saturating_sub(1);
        let state = slot.state;
        match state {
            ChunkState::Done => return Retry::Settled,
            ChunkState::Failed => return Retry::Exhausted,
            _ => {}
        }

        slot.failures += 1;
        slot.last_error = Some(error.to_string());
        slot.last_was_verification = verification;
        if slot.failures >= self.max_attempts {
            slot.state = ChunkState::Failed;
            Retry::Exhausted
        } else {
            if slot.in_flight == 0 {
                slot.state = ChunkState::Pending;
            }
            Retry::Again
        }
    }

    /// Give up on a chunk that has no node left to try.
    pub fn abandon(&self, index: u64, error: &str) {
        if let Some(mut slot) = self.slot(index) {
            if slot.state != ChunkState::Done {
                slot.state = ChunkState::Failed;
                slot.last_error = Some(error.to_string());
            }
        }
    }

    pub fn is_complete(&self) -> bool {
        self.done_count() == self.chunk_count
    }

    pub fn done_count(&self) -> u64 {
        self.chunks
            .iter()
            .filter(|slot| slot.state == ChunkState::Done)
            .count() as u64
    }

    /// Indices of chunks that are not done, ascending. Walks the whole
    /// declared range.
    pub fn unfinished(&self) -> Vec<u64> {
        (0..self.chunk_count)
            .filter(|index| self.state(*index) != Some(ChunkState::Done))
            .collect()
    }

    /// Lowest failed chunk whose final failure was a proof mismatch.
    pub fn first_verification_failure(&self) -> Option<u64> {
        self.chunks
            .iter()
            .filter(|slot| slot.state == ChunkState::Failed && slot.last_was_verification)
            .map(|slot| *slot.key())
            .min()
    }

    /// Indices of chunks that ran out of attempts or nodes, ascending.
    pub fn failed(&self) -> Vec<u64> {
        let mut out: Vec<u64> = self
            .chunks
            .iter()
            .filter(|slot| slot.state == ChunkState::Failed)
            .map(|slot| *slot.key())
            .collect();
        out.sort_unstable();
        out
    }

    pub fn any_failed(&self) -> bool {
        self.chunks.iter().any(|slot| slot.state == ChunkState::Failed)
    }

    /// Last recorded cause among unfinished chunks, lowest index first.
    pub fn last_cause(&self) -> String {
        self.chunks
            .iter()
            .filter(|slot| slot.state != ChunkState::Done)
            .filter_map(|slot| slot.last_error.clone().map(|cause| (*slot.key(), cause)))
            .min_by_key(|(index, _)| *index)
            .map(|(_, cause)| cause)
            .unwrap_or_else(|| "no attempt recorded".to_string())
    }

    pub fn has_acked(&self, index: u64, node: &NodeId) -> bool {
        self.chunks
            .get(&index)
            .is_some_and(|slot| slot.acks.contains(node))
    }

    pub fn has_tried(&self, index: u64, node: &NodeId) -> bool {
        self.chunks
            .get(&index)
            .is_some_and(|slot| slot.tried.contains(node))
    }

    /// Reserve `node` for chunk `index` before the attempt starts, so no
    /// replacement picks it for the same chunk in the meantime.
    pub fn assign(&self, index: u64, node: &NodeId) {
        if let Some(mut slot) = self.slot(index) {
            slot.tried.insert(node.clone());
        }
    }

    pub fn tried(&self, index: u64) -> Vec<NodeId> {
        self.chunks
            .get(&index)
            .map(|slot| slot.tried.iter().cloned().collect())
            .unwrap_or_default()
    }

    // ── Nodes ────────────────────────────────────────────────────────────────

    pub fn exclude(&self, node: &NodeId) -> bool {
        self.excluded.insert(node.clone())
    }

    pub fn is_excluded(&self, node: &NodeId) -> bool {
        self.excluded.contains(node)
    }

    pub fn excluded(&self) -> Vec<NodeId> {
        self.excluded.iter().map(|id| id.clone()).collect()
    }

    pub async fn replica_set(&self) -> ReplicaSet {
        self.replicas.lock().await.clone()
    }

    pub async fn add_node(&self, node: StorageNode) {
        self.replicas.lock().await.add(node);
    }

    /// A node in the replica set that is not excluded and has not been
    /// tried for `index` yet. Scans from `start`, wrapping.
    pub async fn candidate(&self, index: u64, start: usize) -> Option<StorageNode> {
        let set = self.replicas.lock().await;
        set.pick_from(start, |id| self.is_excluded(id) || self.has_tried(index, id))
            .cloned()
    }

    /// A node that can take over chunk `index`: a replica-set node not yet
    /// tried for it, else one freshly selected from the registry and added
    /// to the set as a spare.
    pub async fn replacement(
        &self,
        selector: &NodeSelector,
        index: u64,
        start: usize,
        strategy: SelectionStrategy,
    ) -> Option<StorageNode> {
        if let Some(node) = self.candidate(index, start).await {
            self.assign(index, &node.id);
            return Some(node);
        }

        let mut exclude = self.excluded();
        exclude.extend(self.tried(index));
        match selector.select(1, 1, &exclude, strategy).await {
            Ok(set) => {
                let node = set.nodes().first().cloned()?;
                tracing::info!(chunk = index, node = %node.id, "selected replacement node");
                self.add_node(node.clone()).await;
                self.assign(index, &node.id);
                Some(node)
            }
            Err(e) => {
                tracing::warn!(chunk = index, error = %e, "no replacement node");
                None
            }
        }
    }
}
