use anyhow::{anyhow, Context, Result};
use async_trait::async_trait;
use serde_json::{json, Value};
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use crate::feed::retry::{http_status_error, permanent};
use crate::feed::{BlockSource, RawBlock};

/// JSON-RPC 2.0 block source over HTTP.
pub struct JsonRpcSource {
    http: reqwest::Client,
    rpc_url: String,
    next_id: AtomicU64,
}

impl JsonRpcSource {
    pub fn new(rpc_url: &str, timeout_ms: u64) -> Result<Self> {
        let http = reqwest::Client::builder()
            .timeout(Duration::from_millis(timeout_ms))
            .build()
            .context("building http client")?;
        Ok(Self {
            http,
            rpc_url: rpc_url.to_string(),
            next_id: AtomicU64::new(1),
        })
    }

    async fn call(&self, method: &str, params: Value) -> Result<Value> {
        let request = json!({
            "jsonrpc": "2.0",
            "id": self.next_id.fetch_add(1, Ordering::Relaxed),
            "method": method,
            "params": params,
        });

        let response = self
            .http
            .post(&self.rpc_url)
            .json(&request)
            .send()
            .await
            .with_context(|| format!("RPC {method} request failed"))?;
        let status = response.status();
        if !status.is_success() {
            return Err(http_status_error(method, status.as_u16()));
        }
        let body: Value = response
            .json()
            .await
            .map_err(|e| permanent(format!("RPC {method} invalid JSON response: {e}")))?;
        rpc_result(method, body)
    }
}

/// Pull `result` out of a JSON-RPC response body. An `error` member means
/// the node understood and refused, so it is not retried.
fn rpc_result(method: &str, body: Value) -> Result<Value> {
    if let Some(error) = body.get("error") {
        return Err(permanent(format!("RPC {method} error payload: {error}")));
    }
    body.get("result")
        .cloned()
        .ok_or_else(|| permanent(format!("RPC {method} response missing `result`")))
}

#[async_trait]
impl BlockSource for JsonRpcSource {
    async fn fetch_latest_block(&self) -> Result<RawBlock> {
        let (number, block, gas_price) = tokio::try_join!(
            self.call("eth_blockNumber", json!([])),
            self.call("eth_getBlockByNumber", json!(["latest", true])),
            self.call("eth_gasPrice", json!([])),
        )?;

        if block.is_null() {
            return Err(anyhow!("eth_getBlockByNumber returned null"));
        }
        let mut raw: RawBlock = serde_json::from_value(block)
            .map_err(|e| permanent(format!("decoding eth_getBlockByNumber result: {e}")))?;
        // eth_blockNumber is authoritative for the height; "latest" may lag it.
        if let Some(n) = number.as_str() {
            raw.number = n.to_string();
        }
        raw.gas_price = gas_price.as_str().map(str::to_string);
        Ok(raw)
    }

    fn name(&self) -> &'static str {
        "json_rpc"
    }
}
