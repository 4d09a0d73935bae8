//! `StorageClient` — the public entry point.
//!
//! Wires a config and three collaborators into an uploader and a
//! downloader that share one node selector. `connect` builds the HTTP
//! collaborators from the network section of the config; tests and the
//! simulator pass in-memory ones to `new`.

use std::path::Path;
use std::sync::Arc;

use strata_core::chunker::Chunker;
use strata_core::{MerkleTree, RootHash, StrataConfig, TxHash};

use crate::download::Downloader;
use crate::error::TransferError;
use crate::remote::{ChainCommitter, NodeClient, NodeRegistry};
use crate::rpc::{HttpChain, HttpIndexer, HttpNodeClient, RpcClient};
use crate::selector::NodeSelector;
use crate::upload::Uploader;

pub struct StorageClient {
    config: StrataConfig,
    selector: Arc<NodeSelector>,
    uploader: Uploader,
    downloader: Downloader,
}

impl StorageClient {
    pub fn new(
        config: StrataConfig,
        registry: Arc<dyn NodeRegistry>,
        nodes: Arc<dyn NodeClient>,
        chain: Arc<dyn ChainCommitter>,
    ) -> Result<Self, TransferError> {
        config.transfer.validate()?;
        let selector = Arc::new(NodeSelector::new(registry));
        let uploader = Uploader::new(
            selector.clone(),
            nodes.clone(),
            chain,
            config.transfer.clone(),
        );
        let downloader = Downloader::new(selector.clone(), nodes, config.transfer.clone());
        Ok(Self {
            config,
            selector,
            uploader,
            downloader,
        })
    }

    /// Client backed by the indexer, storage nodes and chain named in
    /// `config.network`.
    pub fn connect(config: StrataConfig) -> Result<Self, TransferError> {
        let rpc = RpcClient::new(config.network.request_timeout())
            .map_err(TransferError::Registry)?;
        let indexer = HttpIndexer::new(rpc.clone(), config.network.indexer_endpoint());
        let chain = HttpChain::new(rpc.clone(), &config.network.evm_rpc);
        tracing::debug!(
            indexer = config.network.indexer_endpoint(),
            evm_rpc = %config.network.evm_rpc,
            "storage client configured"
        );
        Self::new(
            config,
            Arc::new(indexer),
            Arc::new(HttpNodeClient::new(rpc)),
            Arc::new(chain),
        )
    }

    pub fn config(&self) -> &StrataConfig {
        &self.config
    }

    pub fn selector(&self) -> &NodeSelector {
        &self.selector
    }

    pub async fn upload(
        &self,
        path: &Path,
        replicas: usize,
    ) -> Result<(TxHash, RootHash), TransferError> {
        self.uploader.upload(path, replicas).await
    }

    pub async fn download(
        &self,
        root: RootHash,
        dest: &Path,
        verify: bool,
    ) -> Result<(), TransferError> {
        self.downloader.download(root, dest, verify).await
    }

    /// `UploadFile(filePath) -> (txHashString, rootHashString)`
    ///
    /// Uses the configured replica count.
    pub async fn upload_file(&self, path: &Path) -> Result<(String, String), TransferError> {
        let (tx, root) = self.upload(path, self.config.transfer.replicas).await?;
        Ok((tx.to_string(), root.to_string()))
    }

    /// `DownloadFile(rootHashString, outputPath)`
    ///
    /// Creates missing parent directories and verifies proofs unless the
    /// config turns verification off.
    pub async fn download_file(&self, root: &str, output: &Path) -> Result<(), TransferError> {
        let root: RootHash = root.parse()?;
        if let Some(parent) = output.parent().filter(|p| !p.as_os_str().is_empty()) {
            tokio::fs::create_dir_all(parent)
                .await
                .map_err(|source| TransferError::Write {
                    path: parent.to_path_buf(),
                    source,
                })?;
        }
        self.download(root, output, self.config.transfer.verify)
            .await
    }

    /// Root hash of a local file, without touching the network.
    pub fn root_of(&self, path: &Path) -> Result<RootHash, TransferError> {
        let io_err = |source| TransferError::IoRead {
            path: path.to_path_buf(),
            source,
        };
        let chunks = Chunker::open(path, self.config.transfer.chunk_size).map_err(io_err)?;
        MerkleTree::from_chunks(chunks)
            .map(|tree| tree.root())
            .map_err(io_err)
    }
}
