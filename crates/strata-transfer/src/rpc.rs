//! HTTP JSON-RPC collaborators.
//!
//! One request shape for all three services: a JSON-RPC 2.0 envelope
//! POSTed to the service endpoint. Binary payloads travel as hex strings.
//! Storage nodes are addressed by the `url` the indexer reports for them.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use bytes::Bytes;
use futures::future::BoxFuture;
use futures::FutureExt;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};

use strata_core::{FileInfo, RootHash, TxHash};

use crate::error::RemoteError;
use crate::node::StorageNode;
use crate::remote::{ChainCommitter, ChunkUpload, NodeClient, NodeRegistry};

/// Server error code for "no such file or chunk".
pub const NOT_FOUND_CODE: i64 = -32004;

#[derive(Serialize)]
struct Request<'a> {
    jsonrpc: &'static str,
    id: u64,
    method: &'a str,
    params: Value,
}

#[derive(Deserialize)]
struct Response {
    #[serde(default)]
    result: Option<Value>,
    #[serde(default)]
    error: Option<ErrorBody>,
}

#[derive(Deserialize)]
struct ErrorBody {
    code: i64,
    message: String,
}

/// Shared JSON-RPC transport. Cheap to clone.
#[derive(Clone)]
pub struct RpcClient {
    http: reqwest::Client,
    next_id: Arc<AtomicU64>,
}

impl RpcClient {
    pub fn new(timeout: Duration) -> Result<Self, RemoteError> {
        let http = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| RemoteError::Transport(e.to_string()))?;
        Ok(Self {
            http,
            next_id: Arc::new(AtomicU64::new(1)),
        })
    }

    pub async fn call<R: DeserializeOwned>(
        &self,
        endpoint: &str,
        method: &str,
        params: Value,
    ) -> Result<R, RemoteError> {
        let request = Request {
            jsonrpc: "2.0",
            id: self.next_id.fetch_add(1, Ordering::Relaxed),
            method,
            params,
        };

        let resp = self
            .http
            .post(endpoint)
            .json(&request)
            .send()
            .await
            .map_err(|e| RemoteError::Transport(format!("{endpoint}: {e}")))?;
        let status = resp.status();
        if !status.is_success() {
            return Err(RemoteError::Transport(format!("{endpoint}: HTTP {status}")));
        }
        let body: Response = resp
            .json()
            .await
            .map_err(|e| RemoteError::Decode(format!("{method}: {e}")))?;

        if let Some(err) = body.error {
            return Err(if err.code == NOT_FOUND_CODE {
                RemoteError::NotFound
            } else {
                RemoteError::Rejected(format!("{method}: {} ({})", err.message, err.code))
            });
        }
        serde_json::from_value(body.result.unwrap_or(Value::Null))
            .map_err(|e| RemoteError::Decode(format!("{method}: {e}")))
    }
}

fn unhex(method: &str, s: &str) -> Result<Vec<u8>, RemoteError> {
    hex::decode(s.strip_prefix("0x").unwrap_or(s))
        .map_err(|e| RemoteError::Decode(format!("{method}: {e}")))
}

// ── Indexer ───────────────────────────────────────────────────────────────────

pub struct HttpIndexer {
    rpc: RpcClient,
    endpoint: String,
}

impl HttpIndexer {
    pub fn new(rpc: RpcClient, endpoint: &str) -> Self {
        Self {
            rpc,
            endpoint: endpoint.to_string(),
        }
    }
}

impl NodeRegistry for HttpIndexer {
    fn list_nodes(&self) -> BoxFuture<'_, Result<Vec<StorageNode>, RemoteError>> {
        async move {
            self.rpc
                .call(&self.endpoint, "indexer_listNodes", json!([]))
                .await
        }
        .boxed()
    }
}

// ── Storage nodes ─────────────────────────────────────────────────────────────

pub struct HttpNodeClient {
    rpc: RpcClient,
}

impl HttpNodeClient {
    pub fn new(rpc: RpcClient) -> Self {
        Self { rpc }
    }
}

impl NodeClient for HttpNodeClient {
    fn push_chunk<'a>(
        &'a self,
        node: &'a StorageNode,
        chunk: &'a ChunkUpload,
    ) -> BoxFuture<'a, Result<(), RemoteError>> {
        async move {
            let params = json!({
                "info": chunk.info,
                "index": chunk.index,
                "data": hex::encode(&chunk.data),
                "proof": hex::encode(&chunk.proof),
            });
            let _: Value = self.rpc.call(&node.url, "node_pushChunk", params).await?;
            Ok(())
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
            let method = "node_pullChunk";
            let params = json!({ "root": root, "index": index });
            let data: String = self.rpc.call(&node.url, method, params).await?;
            unhex(method, &data).map(Bytes::from)
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
            let method = "node_getProof";
            let params = json!({ "root": root, "index": index });
            let proof: String = self.rpc.call(&node.url, method, params).await?;
            unhex(method, &proof)
        }
        .boxed()
    }

    fn file_info<'a>(
        &'a self,
        node: &'a StorageNode,
        root: RootHash,
    ) -> BoxFuture<'a, Result<FileInfo, RemoteError>> {
        async move {
            self.rpc
                .call(&node.url, "node_getFileInfo", json!({ "root": root }))
                .await
        }
        .boxed()
    }
}

// ── Chain ─────────────────────────────────────────────────────────────────────

pub struct HttpChain {
    rpc: RpcClient,
    endpoint: String,
}

impl HttpChain {
    pub fn new(rpc: RpcClient, endpoint: &str) -> Self {
        Self {
            rpc,
            endpoint: endpoint.to_string(),
        }
    }
}

impl ChainCommitter for HttpChain {
    fn commit<'a>(
        &'a self,
        root: RootHash,
        metadata: &'a FileInfo,
    ) -> BoxFuture<'a, Result<TxHash, RemoteError>> {
        async move {
            let params = json!({ "root": root, "info": metadata });
            self.rpc.call(&self.endpoint, "chain_commitRoot", params).await
        }
        .boxed()
    }
}
