//! QuerySubscription: live `Incoming` logs for this provider over a WebSocket.
//!
//! Forwards raw log objects to the dispatcher in delivery order. There is no reconnect loop:
//! a closed socket or rejected subscription is returned as an error and treated as fatal by
//! the caller (the process exits and its supervisor restarts it).

use crate::abi::{event_topic, parse_hex_bytes, INCOMING_EVENT};
use alloy::primitives::Address;
use anyhow::{Context, Result};
use futures_util::stream::{SplitSink, SplitStream};
use futures_util::{SinkExt, StreamExt};
use serde_json::{json, Value};
use tokio::net::TcpStream;
use tokio::sync::mpsc;
use tokio::time::{timeout, Duration};
use tokio_tungstenite::{connect_async, tungstenite::Message, MaybeTlsStream, WebSocketStream};

/// Subscription target.
#[derive(Debug, Clone)]
pub struct SubscriptionConfig {
    pub ws_url: String,
    /// Dispatch contract emitting `Incoming`.
    pub dispatch_address: Address,
    /// Only queries addressed to this provider are forwarded.
    pub provider_address: Address,
}

/// Topic filter `[Incoming, any id, provider]`.
fn build_logs_filter(dispatch: &Address, provider: &Address) -> Value {
    json!({
        "address": format!("0x{}", hex::encode(dispatch.as_slice())),
        "topics": [
            format!("0x{}", hex::encode(event_topic(INCOMING_EVENT))),
            Value::Null,
            format!("0x{}", hex::encode(crate::abi::address_word(provider))),
        ],
    })
}

/// Client-side equivalent of [build_logs_filter] for nodes that reject filtered subscriptions.
pub fn log_matches(log: &Value, dispatch: &Address, provider: &Address) -> bool {
    let addr = match log.get("address").and_then(|a| a.as_str()) {
        Some(a) => a,
        None => return false,
    };
    match parse_hex_bytes(addr) {
        Ok(b) if b.as_slice() == dispatch.as_slice() => {}
        _ => return false,
    }
    let topics = match log.get("topics").and_then(|t| t.as_array()) {
        Some(t) if t.len() >= 3 => t,
        _ => return false,
    };
    let topic_is = |i: usize, expected: &[u8; 32]| {
        topics[i]
            .as_str()
            .and_then(|s| parse_hex_bytes(s).ok())
            .map(|b| b.as_slice() == expected)
            .unwrap_or(false)
    };
    topic_is(0, &event_topic(INCOMING_EVENT)) && topic_is(2, &crate::abi::address_word(provider))
}

type WsStream = WebSocketStream<MaybeTlsStream<TcpStream>>;
type WsSink = SplitSink<WsStream, Message>;
type WsSource = SplitStream<WsStream>;

const SUBSCRIBE_TIMEOUT: Duration = Duration::from_secs(10);

/// Whether a subscribe error is a node refusing the topic filter itself (Anvil rejects the
/// `null` wildcard with a serde "data did not match any variant" message).
fn is_filter_rejection(error: &Value) -> bool {
    let msg = error.get("message").and_then(|m| m.as_str()).unwrap_or("");
    msg.contains("data did not match") || msg.contains("variant")
}

/// Send `eth_subscribe(params)` and wait for its reply: the subscription id, or the node's
/// JSON-RPC error object.
async fn subscribe(
    sender: &mut WsSink,
    receiver: &mut WsSource,
    params: Value,
) -> Result<std::result::Result<String, Value>> {
    let req = json!({
        "jsonrpc": "2.0",
        "id": 1,
        "method": "eth_subscribe",
        "params": params
    });
    sender
        .send(Message::Text(serde_json::to_string(&req)?))
        .await
        .map_err(|e| anyhow::anyhow!("send subscribe: {}", e))?;

    let text = timeout(SUBSCRIBE_TIMEOUT, async {
        loop {
            match receiver.next().await {
                Some(Ok(Message::Text(t))) => return Ok::<_, anyhow::Error>(t),
                Some(Ok(Message::Close(_))) | None => anyhow::bail!("ws closed"),
                Some(Ok(_)) => continue,
                Some(Err(e)) => anyhow::bail!("ws: {}", e),
            }
        }
    })
    .await
    .map_err(|_| anyhow::anyhow!("subscribe timeout"))??;

    let reply: Value = serde_json::from_str(&text).context("parse sub response")?;
    if let Some(err) = reply.get("error") {
        return Ok(Err(err.clone()));
    }
    let id = reply
        .get("result")
        .and_then(|r| r.as_str())
        .ok_or_else(|| anyhow::anyhow!("no subscription id in {}", reply))?;
    Ok(Ok(id.to_string()))
}

pub struct QuerySubscription {
    config: SubscriptionConfig,
}

impl QuerySubscription {
    pub fn new(config: SubscriptionConfig) -> Self {
        Self { config }
    }

    /// Subscribe and forward matching logs to `events` until the socket fails (error) or the
    /// receiver is dropped (Ok).
    pub async fn run(&self, events: mpsc::Sender<Value>) -> Result<()> {
        let config = &self.config;
        let (ws_stream, _) = connect_async(config.ws_url.as_str())
            .await
            .context("WS connect")?;
        let (mut ws_sender, mut ws_receiver) = ws_stream.split();

        let filter = build_logs_filter(&config.dispatch_address, &config.provider_address);
        let client_filter =
            match subscribe(&mut ws_sender, &mut ws_receiver, json!(["logs", filter])).await? {
                Ok(_) => false,
                Err(err) if is_filter_rejection(&err) => {
                    tracing::warn!("RPC does not support logs filter (Anvil?), using client-side filter");
                    subscribe(&mut ws_sender, &mut ws_receiver, json!(["logs"]))
                        .await?
                        .map_err(|e| anyhow::anyhow!("subscribe error: {}", e))?;
                    true
                }
                Err(err) => anyhow::bail!("subscribe error: {}", err),
            };
        tracing::info!(
            dispatch = %config.dispatch_address,
            provider = %config.provider_address,
            client_filter,
            "listening for queries"
        );

        while let Some(msg) = ws_receiver.next().await {
            let text = match msg.map_err(|e| anyhow::anyhow!("ws: {}", e))? {
                Message::Text(t) => t,
                Message::Close(_) => break,
                _ => continue,
            };
            let v: Value = serde_json::from_str(&text).context("parse ws message")?;
            if v.get("method").and_then(|m| m.as_str()) != Some("eth_subscription") {
                continue;
            }
            let log = match v.get("params").and_then(|p| p.get("result")) {
                Some(r) => r.clone(),
                None => anyhow::bail!("no params.result"),
            };
            if client_filter && !log_matches(&log, &config.dispatch_address, &config.provider_address) {
                continue;
            }
            if log.get("removed").and_then(|r| r.as_bool()) == Some(true) {
                tracing::debug!("skipping removed log");
                continue;
            }
            if events.send(log).await.is_err() {
                tracing::info!("dispatcher gone, closing subscription");
                return Ok(());
            }
        }
        anyhow::bail!("subscription closed by node")
    }
}
