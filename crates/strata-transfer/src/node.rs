//! Storage node descriptors, as reported by the node registry.
//!
//! The engine never owns node state. It reads these snapshots and ranks
//! them; liveness and capacity are whatever the registry last said.

use std::fmt;

use serde::{Deserialize, Serialize};

/// Stable node identifier (registry-assigned, usually the node URL).
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct NodeId(pub String);

impl fmt::Display for NodeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for NodeId {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum NodeHealth {
    Healthy,
    /// Reachable but struggling. Still eligible, ranked as-is.
    Degraded,
    /// Never selected.
    Down,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StorageNode {
    pub id: NodeId,
    /// RPC endpoint.
    pub url: String,
    /// Free bytes the node advertises.
    pub capacity: u64,
    /// Last measured round trip.
    pub latency_ms: u32,
    pub health: NodeHealth,
}

impl StorageNode {
    pub fn new(id: &str, url: &str, capacity: u64) -> Self {
        Self {
            id: NodeId::from(id),
            url: url.to_string(),
            capacity,
            latency_ms: 0,
            health: NodeHealth::Healthy,
        }
    }

    pub fn is_usable(&self) -> bool {
        self.health != NodeHealth::Down
    }
}
