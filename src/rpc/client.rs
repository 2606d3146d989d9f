//! One HTTP JSON-RPC call to a configured upstream. See SPEC_FULL.md §4.1.

use crate::error::RpcCallError;
use crate::types::SourceId;
use serde::Deserialize;
use serde_json::Value;
use std::time::Duration;

/// Minimum idle connections kept open regardless of host (SPEC_FULL.md §5).
const POOL_IDLE_MIN: usize = 100;
/// Idle connections kept open per host.
const POOL_IDLE_PER_HOST: usize = 50;
/// Idle connection timeout before the pool closes it.
const POOL_IDLE_TIMEOUT: Duration = Duration::from_secs(60);

/// One upstream JSON-RPC endpoint. Identity is immutable once constructed
/// from configuration; `backoff_until` tracking lives in `BackoffTable`,
/// not here.
#[derive(Debug, Clone)]
pub struct Source {
    pub id: SourceId,
    pub url: reqwest::Url,
    pub user: Option<String>,
    pub pass: Option<String>,
}

impl Source {
    pub fn new(url: &str, user: Option<String>, pass: Option<String>) -> Result<Self, reqwest::Error> {
        let url = url.parse()?;
        Ok(Self { id: url.to_string(), url, user, pass })
    }
}

/// The tip as reported by one `getblockchaininfo` call.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Tip {
    pub hash: String,
    pub height: u64,
}

#[derive(Deserialize)]
struct RpcEnvelope {
    result: Option<Value>,
    error: Option<RpcErrorBody>,
}

#[derive(Deserialize)]
struct RpcErrorBody {
    code: i64,
    message: String,
}

/// Issues JSON-RPC 1.0 calls over HTTP Basic auth. Owns its own
/// `reqwest::Client` — deliberately not shared with the metrics poster
/// (SPEC_FULL.md §9).
#[derive(Clone)]
pub struct RpcClient {
    http: reqwest::Client,
    /// `getblockchaininfo` takes no parameters, so its request body is
    /// identical on every call; it is built once here and reused instead
    /// of re-serializing it on every hot-path tick.
    blockchain_info_body: Value,
}

impl RpcClient {
    pub fn new() -> Self {
        let http = reqwest::Client::builder()
            .pool_max_idle_per_host(POOL_IDLE_PER_HOST)
            .pool_idle_timeout(POOL_IDLE_TIMEOUT)
            // HTTP/1.1 keep-alive minimizes head-of-line blocking on short
            // requests; HTTP/2 multiplexing buys nothing here.
            .http1_only()
            .build()
            .expect("reqwest client builds with static configuration");
        debug_assert!(POOL_IDLE_MIN <= POOL_IDLE_PER_HOST * 8, "pool sizing sanity");
        let blockchain_info_body = serde_json::json!({
            "jsonrpc": "1.0",
            "id": "sprint",
            "method": "getblockchaininfo",
            "params": [],
        });
        Self { http, blockchain_info_body }
    }

    /// `getblockchaininfo` — the hot-path poll. Timeout is the caller's
    /// responsibility to bound to <= 1s for the tick path.
    pub async fn get_blockchain_info(&self, source: &Source, timeout: Duration) -> Result<Tip, RpcCallError> {
        let result = self.call(source, &self.blockchain_info_body, timeout).await?;
        let hash = result
            .get("bestblockhash")
            .and_then(Value::as_str)
            .ok_or_else(|| RpcCallError::Decode("missing bestblockhash".into()))?
            .to_string();
        let height = result
            .get("blocks")
            .and_then(Value::as_u64)
            .ok_or_else(|| RpcCallError::Decode("missing blocks".into()))?;
        if hash.is_empty() {
            return Err(RpcCallError::Decode("empty bestblockhash".into()));
        }
        Ok(Tip { hash, height })
    }

    /// `getblockheader` — background prefetch; the caller discards the
    /// result and only cares that the connection got warmed.
    pub async fn get_block_header(&self, source: &Source, hash: &str, timeout: Duration) -> Result<Value, RpcCallError> {
        let body = serde_json::json!({
            "jsonrpc": "1.0",
            "id": "sprint",
            "method": "getblockheader",
            "params": [hash],
        });
        self.call(source, &body, timeout).await
    }

    /// `getmempoolinfo` — returns the current mempool transaction count.
    pub async fn get_mempool_size(&self, source: &Source, timeout: Duration) -> Result<u64, RpcCallError> {
        let body = serde_json::json!({
            "jsonrpc": "1.0",
            "id": "sprint",
            "method": "getmempoolinfo",
            "params": [],
        });
        let result = self.call(source, &body, timeout).await?;
        result
            .get("size")
            .and_then(Value::as_u64)
            .ok_or_else(|| RpcCallError::Decode("missing mempool size".into()))
    }

    async fn call(&self, source: &Source, body: &Value, timeout: Duration) -> Result<Value, RpcCallError> {
        let mut req = self.http.post(source.url.clone()).json(body).timeout(timeout);
        if let Some(user) = &source.user {
            req = req.basic_auth(user, source.pass.clone());
        }

        let resp = req.send().await?;
        let status = resp.status();
        if status.as_u16() == 401 || status.as_u16() == 403 {
            return Err(RpcCallError::Auth(status.as_u16()));
        }
        if !status.is_success() {
            return Err(RpcCallError::Http(status.as_u16()));
        }

        let envelope: RpcEnvelope = resp
            .json()
            .await
            .map_err(|e| RpcCallError::Decode(e.to_string()))?;

        if let Some(err) = envelope.error {
            return Err(RpcCallError::Rpc { code: err.code, message: err.message });
        }
        envelope.result.ok_or_else(|| RpcCallError::Decode("missing result".into()))
    }
}

impl Default for RpcClient {
    fn default() -> Self {
        Self::new()
    }
}
