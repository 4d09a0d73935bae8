//! Configuration system for Strata.
//!
//! Resolution order: environment variables → config file → defaults.
//!
//! Config file location:
//!   1. $STRATA_CONFIG (explicit override)
//!   2. $XDG_CONFIG_HOME/strata/config.toml
//!   3. ~/.config/strata/config.toml

use std::fmt;
use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::chunker::DEFAULT_CHUNK_SIZE;

/// Top-level configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct StrataConfig {
    pub network: NetworkConfig,
    pub transfer: TransferConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct NetworkConfig {
    /// Chain endpoint that accepts root commitments.
    pub evm_rpc: String,
    /// Node indexer (registry) endpoint.
    pub indexer_rpc: String,
    /// Turbo-tier indexer endpoint, used when `use_turbo` is set.
    pub indexer_rpc_turbo: String,
    pub use_turbo: bool,
    /// Per-request HTTP timeout. Independent of the transfer deadline.
    pub request_timeout_secs: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct TransferConfig {
    pub chunk_size: usize,
    /// Distinct nodes that must acknowledge every chunk on upload.
    pub replicas: usize,
    /// Fewest usable nodes a selection may return.
    pub min_nodes: usize,
    /// Extra nodes selected up front as replacements.
    pub spare_nodes: usize,
    /// Concurrent chunk transfers per operation.
    pub workers: usize,
    /// Attempts per chunk before it is declared failed.
    pub max_attempts: u32,
    /// Deadline for a whole upload or download.
    pub timeout_secs: u64,
    pub strategy: SelectionStrategy,
    /// Check Merkle proofs on download.
    pub verify: bool,
}

/// How the node selector ranks eligible nodes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SelectionStrategy {
    /// Largest free capacity first.
    #[default]
    Max,
    /// Rotate the starting node on every selection.
    RoundRobin,
    /// Uniform shuffle.
    Random,
}

impl fmt::Display for SelectionStrategy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            SelectionStrategy::Max => "max",
            SelectionStrategy::RoundRobin => "round_robin",
            SelectionStrategy::Random => "random",
        };
        f.write_str(name)
    }
}

impl FromStr for SelectionStrategy {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "max" => Ok(SelectionStrategy::Max),
            "round_robin" | "roundrobin" => Ok(SelectionStrategy::RoundRobin),
            "random" => Ok(SelectionStrategy::Random),
            other => Err(ConfigError::Invalid(format!("unknown strategy: {other}"))),
        }
    }
}

// ── Defaults ──────────────────────────────────────────────────────────────────

impl Default for NetworkConfig {
    fn default() -> Self {
        Self {
            evm_rpc: "https://evmrpc-testnet.0g.ai".to_string(),
            indexer_rpc: "https://indexer-storage-testnet-turbo.0g.ai".to_string(),
            indexer_rpc_turbo: "https://indexer-storage-testnet-turbo.0g.ai".to_string(),
            use_turbo: true,
            request_timeout_secs: 30,
        }
    }
}

impl Default for TransferConfig {
    fn default() -> Self {
        Self {
            chunk_size: DEFAULT_CHUNK_SIZE,
            replicas: 1,
            min_nodes: 1,
            spare_nodes: 1,
            workers: 8,
            max_attempts: 3,
            timeout_secs: 300,
            strategy: SelectionStrategy::Max,
            verify: true,
        }
    }
}

impl NetworkConfig {
    /// Indexer endpoint in effect.
    pub fn indexer_endpoint(&self) -> &str {
        if self.use_turbo {
            &self.indexer_rpc_turbo
        } else {
            &self.indexer_rpc
        }
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs)
    }
}

impl TransferConfig {
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }

    /// Reject settings the engine cannot run with.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.chunk_size == 0 {
            return Err(ConfigError::Invalid("chunk_size must be non-zero".into()));
        }
        if self.replicas == 0 {
            return Err(ConfigError::Invalid("replicas must be non-zero".into()));
        }
        if self.workers == 0 {
            return Err(ConfigError::Invalid("workers must be non-zero".into()));
        }
        if self.max_attempts == 0 {
            return Err(ConfigError::Invalid("max_attempts must be non-zero".into()));
        }
        if self.min_nodes > self.replicas {
            return Err(ConfigError::Invalid(format!(
                "min_nodes ({}) exceeds replicas ({})",
                self.min_nodes, self.replicas
            )));
        }
        Ok(())
    }
}

// ── Path helpers ──────────────────────────────────────────────────────────────

fn config_dir() -> PathBuf {
    std::env::var("XDG_CONFIG_HOME")
        .map(PathBuf::from)
        .unwrap_or_else(|_| dirs_or_home().join(".config"))
        .join("strata")
}

fn dirs_or_home() -> PathBuf {
    std::env::var("HOME")
        .map(PathBuf::from)
        .unwrap_or_else(|_| PathBuf::from("/tmp"))
}

// ── Errors ────────────────────────────────────────────────────────────────────

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("failed to read {0}: {1}")]
    ReadFailed(PathBuf, std::io::Error),
    #[error("failed to parse {0}: {1}")]
    ParseFailed(PathBuf, toml::de::Error),
    #[error("failed to write {0}: {1}")]
    WriteFailed(PathBuf, std::io::Error),
    #[error("failed to serialize: {0}")]
    SerializeFailed(toml::ser::Error),
    #[error("invalid config: {0}")]
    Invalid(String),
}

// ── Loading ───────────────────────────────────────────────────────────────────

impl StrataConfig {
    /// Load config: env vars → file → defaults.
    pub fn load() -> Result<Self, ConfigError> {
        Self::load_from(Self::file_path())
    }

    /// Load from an explicit file path, then apply env overrides.
    pub fn load_from(path: PathBuf) -> Result<Self, ConfigError> {
        let mut config = if path.exists() {
            let text = std::fs::read_to_string(&path)
                .map_err(|e| ConfigError::ReadFailed(path.clone(), e))?;
            toml::from_str(&text).map_err(|e| ConfigError::ParseFailed(path.clone(), e))?
        } else {
            StrataConfig::default()
        };
        config.apply_env_overrides();
        config.transfer.validate()?;
        Ok(config)
    }

    /// Config file path.
    pub fn file_path() -> PathBuf {
        std::env::var("STRATA_CONFIG")
            .map(PathBuf::from)
            .unwrap_or_else(|_| config_dir().join("config.toml"))
    }

    /// Write default config if none exists. Returns the path.
    pub fn write_default_if_missing() -> Result<PathBuf, ConfigError> {
        let path = Self::file_path();
        if !path.exists() {
            if let Some(parent) = path.parent() {
                std::fs::create_dir_all(parent)
                    .map_err(|e| ConfigError::WriteFailed(path.clone(), e))?;
            }
            let text = StrataConfig::default().to_toml()?;
            std::fs::write(&path, text).map_err(|e| ConfigError::WriteFailed(path.clone(), e))?;
        }
        Ok(path)
    }

    pub fn to_toml(&self) -> Result<String, ConfigError> {
        toml::to_string_pretty(self).map_err(ConfigError::SerializeFailed)
    }

    /// Apply STRATA_* env var overrides.
    fn apply_env_overrides(&mut self) {
        if let Ok(v) = std::env::var("STRATA_NETWORK__EVM_RPC") {
            self.network.evm_rpc = v;
        }
        if let Ok(v) = std::env::var("STRATA_NETWORK__INDEXER_RPC") {
            self.network.indexer_rpc = v;
        }
        if let Ok(v) = std::env::var("STRATA_NETWORK__USE_TURBO") {
            self.network.use_turbo = v == "true" || v == "1";
        }
        if let Ok(v) = std::env::var("STRATA_TRANSFER__REPLICAS") {
            if let Ok(n) = v.parse() {
                self.transfer.replicas = n;
            }
        }
        if let Ok(v) = std::env::var("STRATA_TRANSFER__WORKERS") {
            if let Ok(n) = v.parse() {
                self.transfer.workers = n;
            }
        }
        if let Ok(v) = std::env::var("STRATA_TRANSFER__TIMEOUT_SECS") {
            if let Ok(n) = v.parse() {
                self.transfer.timeout_secs = n;
            }
        }
        if let Ok(v) = std::env::var("STRATA_TRANSFER__STRATEGY") {
            if let Ok(s) = v.parse() {
                self.transfer.strategy = s;
            }
        }
        if let Ok(v) = std::env::var("STRATA_TRANSFER__VERIFY") {
            self.transfer.verify = v == "true" || v == "1";
        }
    }
}
