//! Strata integration test harness.
//!
//! Every test runs the full client (selection, sessions, coordinators,
//! Merkle proofs, on-disk reassembly) against an in-process storage
//! network with injected faults. No external services are needed:
//!
//!   cargo test --test integration
//!
//! Each test owns a private temp directory that is removed on drop.

use std::path::PathBuf;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use strata_core::{StrataConfig, TransferConfig};
use strata_transfer::{MemoryNetwork, NodeClient, StorageClient};

mod faults;
mod roundtrip;
mod scenario;
mod timeouts;

// ── Harness ───────────────────────────────────────────────────────────────────

static COUNTER: AtomicU64 = AtomicU64::new(0);

/// A storage network of `n` nodes plus a scratch directory.
pub struct Fixture {
    pub dir: PathBuf,
    pub net: Arc<MemoryNetwork>,
}

impl Fixture {
    pub fn new(nodes: usize) -> Self {
        let id = COUNTER.fetch_add(1, Ordering::Relaxed);
        let dir = std::env::temp_dir().join(format!(
            "strata-integration-{}-{}",
            std::process::id(),
            id
        ));
        std::fs::create_dir_all(&dir).unwrap();
        Self {
            dir,
            net: MemoryNetwork::with_nodes(nodes),
        }
    }

    /// Write `data` to a file in the scratch directory.
    pub fn write(&self, name: &str, data: &[u8]) -> PathBuf {
        let path = self.dir.join(name);
        std::fs::write(&path, data).unwrap();
        path
    }

    pub fn path(&self, name: &str) -> PathBuf {
        self.dir.join(name)
    }

    /// Client over this network with transfer settings adjusted by `tune`.
    pub fn client(&self, tune: impl FnOnce(&mut TransferConfig)) -> StorageClient {
        self.client_via(self.net.clone(), tune)
    }

    /// Like `client`, but chunk RPCs go through `nodes` instead of straight
    /// to the network.
    pub fn client_via(
        &self,
        nodes: Arc<dyn NodeClient>,
        tune: impl FnOnce(&mut TransferConfig),
    ) -> StorageClient {
        let mut config = StrataConfig::default();
        config.transfer.timeout_secs = 30;
        tune(&mut config.transfer);
        StorageClient::new(config, self.net.clone(), nodes, self.net.clone()).unwrap()
    }
}

impl Drop for Fixture {
    fn drop(&mut self) {
        let _ = std::fs::remove_dir_all(&self.dir);
    }
}

/// Deterministic, non-repeating-per-chunk test content.
pub fn pattern(len: usize) -> Vec<u8> {
    (0..len)
        .map(|i| ((i as u64).wrapping_mul(2654435761) >> 13) as u8)
        .collect()
}
