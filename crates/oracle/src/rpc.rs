//! Minimal HTTP JSON-RPC client for the calls the oracle makes.

use alloy::primitives::{Address, B256};
use serde_json::{json, Value};
use std::sync::atomic::{AtomicU64, Ordering};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum RpcError {
    #[error("HTTP request failed: {0}")]
    Http(#[from] reqwest::Error),
    #[error("RPC error: {0}")]
    Rpc(String),
    #[error("decode error: {0}")]
    Decode(String),
}

/// JSON-RPC over HTTP against one node.
#[derive(Debug)]
pub struct RpcClient {
    client: reqwest::Client,
    url: String,
    next_id: AtomicU64,
}

impl RpcClient {
    pub fn new(url: impl Into<String>) -> Result<Self, RpcError> {
        // No system proxy: avoids SCDynamicStore panics in sandboxes.
        let client = reqwest::Client::builder().no_proxy().build()?;
        Ok(Self {
            client,
            url: url.into(),
            next_id: AtomicU64::new(1),
        })
    }

    pub async fn request(&self, method: &str, params: Value) -> Result<Value, RpcError> {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let body = json!({
            "jsonrpc": "2.0",
            "id": id,
            "method": method,
            "params": params
        });
        let resp = self.client.post(&self.url).json(&body).send().await?;
        let json: Value = resp.json().await?;
        if let Some(err) = json.get("error") {
            return Err(RpcError::Rpc(err.to_string()));
        }
        json.get("result")
            .cloned()
            .ok_or_else(|| RpcError::Decode("Missing result".into()))
    }

    pub async fn chain_id(&self) -> Result<u64, RpcError> {
        let result = self.request("eth_chainId", json!([])).await?;
        parse_quantity(&result)
    }

    pub async fn gas_price(&self) -> Result<u64, RpcError> {
        let result = self.request("eth_gasPrice", json!([])).await?;
        parse_quantity(&result)
    }

    /// Nonce including pending transactions.
    pub async fn pending_nonce(&self, address: &Address) -> Result<u64, RpcError> {
        let result = self
            .request(
                "eth_getTransactionCount",
                json!([format!("0x{}", hex::encode(address.as_slice())), "pending"]),
            )
            .await?;
        parse_quantity(&result)
    }

    pub async fn call(&self, to: &Address, calldata: &[u8]) -> Result<Vec<u8>, RpcError> {
        let params = json!([{
            "to": format!("0x{}", hex::encode(to.as_slice())),
            "data": format!("0x{}", hex::encode(calldata)),
        }, "latest"]);
        let result = self.request("eth_call", params).await?;
        let s = result
            .as_str()
            .ok_or_else(|| RpcError::Decode("eth_call result not string".into()))?;
        hex::decode(s.strip_prefix("0x").unwrap_or(s)).map_err(|e| RpcError::Decode(e.to_string()))
    }

    /// Broadcast a signed transaction; returns its hash.
    pub async fn send_raw_transaction(&self, raw_tx: &[u8]) -> Result<B256, RpcError> {
        let result = self
            .request(
                "eth_sendRawTransaction",
                json!([format!("0x{}", hex::encode(raw_tx))]),
            )
            .await?;
        let s = result
            .as_str()
            .ok_or_else(|| RpcError::Decode("tx hash not string".into()))?;
        let bytes =
            hex::decode(s.strip_prefix("0x").unwrap_or(s)).map_err(|e| RpcError::Decode(e.to_string()))?;
        if bytes.len() != 32 {
            return Err(RpcError::Decode(format!("tx hash is {} bytes", bytes.len())));
        }
        Ok(B256::from_slice(&bytes))
    }
}

fn parse_quantity(v: &Value) -> Result<u64, RpcError> {
    let s = v
        .as_str()
        .ok_or_else(|| RpcError::Decode("quantity not string".into()))?;
    let s = s.strip_prefix("0x").unwrap_or(s);
    u64::from_str_radix(s, 16).map_err(|e| RpcError::Decode(e.to_string()))
}
