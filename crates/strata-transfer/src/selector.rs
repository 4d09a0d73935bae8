//! Node selection — ranks registry nodes into a replica set.
//!
//! `select` never returns a node from the exclusion list and never returns
//! a node the registry reports as down. Fewer than `min_count` eligible
//! nodes is an error; otherwise up to `replica_count` nodes come back in
//! rank order.

use std::collections::HashSet;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use rand::seq::SliceRandom;

use strata_core::SelectionStrategy;

use crate::error::TransferError;
use crate::node::{NodeId, StorageNode};
use crate::remote::NodeRegistry;

/// Ordered nodes chosen for one transfer. The first `primaries` nodes are
/// the initial targets; the rest are spares used as replacements.
#[derive(Debug, Clone, Default)]
pub struct ReplicaSet {
    nodes: Vec<StorageNode>,
    primaries: usize,
}

impl ReplicaSet {
    /// All nodes are primaries.
    pub fn new(nodes: Vec<StorageNode>) -> Self {
        let primaries = nodes.len();
        Self { nodes, primaries }
    }

    /// Keep only the first `n` nodes as primaries, the rest become spares.
    pub fn with_primaries(mut self, n: usize) -> Self {
        self.primaries = n.min(self.nodes.len());
        self
    }

    pub fn primaries(&self) -> &[StorageNode] {
        &self.nodes[..self.primaries]
    }

    pub fn spares(&self) -> &[StorageNode] {
        &self.nodes[self.primaries..]
    }

    pub fn nodes(&self) -> &[StorageNode] {
        &self.nodes
    }

    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    pub fn contains(&self, id: &NodeId) -> bool {
        self.nodes.iter().any(|n| &n.id == id)
    }

    pub fn ids(&self) -> Vec<NodeId> {
        self.nodes.iter().map(|n| n.id.clone()).collect()
    }

    /// Add a node as a spare. Ignored if already present.
    pub fn add(&mut self, node: StorageNode) {
        if !self.contains(&node.id) {
            self.nodes.push(node);
        }
    }

    /// First node, primaries before spares, for which `skip` is false.
    pub fn pick(&self, skip: impl Fn(&NodeId) -> bool) -> Option<&StorageNode> {
        self.nodes.iter().find(|n| !skip(&n.id))
    }

    /// Like `pick`, but starts scanning at `start` and wraps around.
    /// Spreads reads across the set.
    pub fn pick_from(&self, start: usize, skip: impl Fn(&NodeId) -> bool) -> Option<&StorageNode> {
        let len = self.nodes.len();
        if len == 0 {
            return None;
        }
        (0..len)
            .map(|offset| &self.nodes[(start + offset) % len])
            .find(|n| !skip(&n.id))
    }
}

/// Ranks nodes from the registry. One selector may serve many transfers;
/// only the round-robin cursor is shared between them.
pub struct NodeSelector {
    registry: Arc<dyn NodeRegistry>,
    cursor: AtomicUsize,
}

impl NodeSelector {
    pub fn new(registry: Arc<dyn NodeRegistry>) -> Self {
        Self {
            registry,
            cursor: AtomicUsize::new(0),
        }
    }

    /// `Select(minCount, replicaCount, excludeList, strategy) -> ReplicaSet`
    pub async fn select(
        &self,
        min_count: usize,
        replica_count: usize,
        exclude: &[NodeId],
        strategy: SelectionStrategy,
    ) -> Result<ReplicaSet, TransferError> {
        let listed = self
            .registry
            .list_nodes()
            .await
            .map_err(TransferError::Registry)?;

        let excluded: HashSet<&NodeId> = exclude.iter().collect();
        let mut seen = HashSet::new();
        let mut eligible: Vec<StorageNode> = listed
            .into_iter()
            .filter(|n| n.is_usable() && !excluded.contains(&n.id))
            .filter(|n| seen.insert(n.id.clone()))
            .collect();

        if eligible.len() < min_count {
            tracing::warn!(
                required = min_count,
                available = eligible.len(),
                excluded = exclude.len(),
                "not enough eligible storage nodes"
            );
            return Err(TransferError::InsufficientNodes {
                required: min_count,
                available: eligible.len(),
            });
        }

        self.rank(&mut eligible, strategy);
        eligible.truncate(replica_count.max(min_count));

        tracing::debug!(
            %strategy,
            nodes = ?eligible.iter().map(|n| n.id.0.as_str()).collect::<Vec<_>>(),
            "selected storage nodes"
        );
        Ok(ReplicaSet::new(eligible))
    }

    fn rank(&self, nodes: &mut [StorageNode], strategy: SelectionStrategy) {
        match strategy {
            SelectionStrategy::Max => {
                nodes.sort_by(|a, b| {
                    b.capacity
                        .cmp(&a.capacity)
                        .then(a.latency_ms.cmp(&b.latency_ms))
                        .then(a.id.cmp(&b.id))
                });
            }
            SelectionStrategy::RoundRobin => {
                nodes.sort_by(|a, b| a.id.cmp(&b.id));
                if !nodes.is_empty() {
                    let start = self.cursor.fetch_add(1, Ordering::Relaxed) % nodes.len();
                    nodes.rotate_left(start);
                }
            }
            SelectionStrategy::Random => {
                nodes.shuffle(&mut rand::thread_rng());
            }
        }
    }
}
