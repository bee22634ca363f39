//! Common helpers for integration tests: Incoming log builder, fake resolvers, recording submitter.
//! Some helpers are only used by specific test binaries; allow dead_code to avoid per-binary warnings.
#![allow(dead_code)]

use alloy::primitives::{Address, B256};
use async_trait::async_trait;
use oracle::abi::{address_word, event_topic, usize_word, utf8_to_bytes32, INCOMING_EVENT};
use oracle::rpc::RpcError;
use oracle::{QueryRecord, Resolver, ResolverError, Response, SubmissionError, SubmissionResult, Submitter};
use serde_json::{json, Value};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};
use tracing_subscriber::EnvFilter;

pub const PROVIDER: [u8; 20] = [0x11; 20];
pub const SUBSCRIBER: [u8; 20] = [0x22; 20];
pub const DISPATCH: [u8; 20] = [0x33; 20];

pub fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env().add_directive("oracle=debug".parse().unwrap()))
        .with_test_writer()
        .try_init();
}

/// Query id whose first and last bytes are `n`.
pub fn query_id(n: u8) -> B256 {
    let mut id = [0u8; 32];
    id[0] = n;
    id[31] = n;
    B256::from(id)
}

/// ABI-encoded `Incoming` log as delivered by eth_subscription.
pub fn incoming_log(id: u8, query: &str, endpoint: &str, params: &[&str], onchain: bool) -> Value {
    let head = 4 * 32;
    let query_words = query.len().div_ceil(32) * 32;
    let params_offset = head + 32 + query_words;
    let mut data = Vec::new();
    data.extend_from_slice(&usize_word(head));
    data.extend_from_slice(&utf8_to_bytes32(endpoint).unwrap());
    data.extend_from_slice(&usize_word(params_offset));
    data.extend_from_slice(&usize_word(onchain as usize));
    data.extend_from_slice(&usize_word(query.len()));
    data.extend_from_slice(query.as_bytes());
    data.resize(params_offset, 0);
    data.extend_from_slice(&usize_word(params.len()));
    for p in params {
        data.extend_from_slice(&utf8_to_bytes32(p).unwrap());
    }
    json!({
        "address": format!("0x{}", hex::encode(DISPATCH)),
        "topics": [
            format!("0x{}", hex::encode(event_topic(INCOMING_EVENT))),
            format!("0x{}", hex::encode(query_id(id))),
            format!("0x{}", hex::encode(address_word(&Address::from(PROVIDER)))),
            format!("0x{}", hex::encode(address_word(&Address::from(SUBSCRIBER)))),
        ],
        "data": format!("0x{}", hex::encode(data)),
        "blockNumber": "0x10",
        "logIndex": "0x0",
        "removed": false,
    })
}

/// Records every response; optionally rejects them all.
#[derive(Default)]
pub struct RecordingSubmitter {
    responses: Mutex<Vec<Response>>,
    reject: bool,
}

impl RecordingSubmitter {
    pub fn rejecting() -> Self {
        Self {
            responses: Mutex::new(Vec::new()),
            reject: true,
        }
    }

    pub fn responses(&self) -> Vec<Response> {
        self.responses.lock().unwrap().clone()
    }
}

#[async_trait]
impl Submitter for RecordingSubmitter {
    async fn respond(&self, response: &Response) -> Result<SubmissionResult, SubmissionError> {
        if self.reject {
            return Err(SubmissionError::Rpc(RpcError::Rpc("nonce too low".into())));
        }
        let mut responses = self.responses.lock().unwrap();
        responses.push(response.clone());
        let mut hash = [0u8; 32];
        hash[31] = responses.len() as u8;
        Ok(SubmissionResult {
            transaction_hash: B256::from(hash),
        })
    }
}

/// Answers (or fails) after an optional delay, tracking calls and peak concurrency.
pub struct FakeResolver {
    answer: Result<String, String>,
    delay: Duration,
    calls: AtomicUsize,
    in_flight: AtomicUsize,
    peak: AtomicUsize,
}

impl FakeResolver {
    pub fn answering(answer: &str) -> Self {
        Self::new(Ok(answer.to_string()), Duration::ZERO)
    }

    pub fn failing(reason: &str) -> Self {
        Self::new(Err(reason.to_string()), Duration::ZERO)
    }

    pub fn slow(answer: &str, delay: Duration) -> Self {
        Self::new(Ok(answer.to_string()), delay)
    }

    fn new(answer: Result<String, String>, delay: Duration) -> Self {
        Self {
            answer,
            delay,
            calls: AtomicUsize::new(0),
            in_flight: AtomicUsize::new(0),
            peak: AtomicUsize::new(0),
        }
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    pub fn peak(&self) -> usize {
        self.peak.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl Resolver for FakeResolver {
    async fn resolve(&self, _query: &QueryRecord) -> Result<String, ResolverError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        let now = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        self.peak.fetch_max(now, Ordering::SeqCst);
        if !self.delay.is_zero() {
            tokio::time::sleep(self.delay).await;
        }
        self.in_flight.fetch_sub(1, Ordering::SeqCst);
        self.answer.clone().map_err(ResolverError::Other)
    }
}

/// Query record for resolver tests.
pub fn record(query: &str) -> QueryRecord {
    QueryRecord {
        query_id: query_id(1),
        query: query.to_string(),
        endpoint: "wolfram-2".into(),
        subscriber: Address::from(SUBSCRIBER),
        endpoint_params: vec![],
        onchain_subscriber: false,
    }
}

/// Local HTTP/1.1 server answering one request per connection. `handler(target, body)` returns
/// the status and body; the URL (`http://127.0.0.1:<port>`) is returned.
pub async fn serve_http<F>(handler: F) -> String
where
    F: Fn(&str, &str) -> (u16, String) + Send + Sync + 'static,
{
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let url = format!("http://{}", listener.local_addr().unwrap());
    tokio::spawn(async move {
        while let Ok((mut stream, _)) = listener.accept().await {
            let Some((target, body)) = read_request(&mut stream).await else {
                continue;
            };
            let (status, reply) = handler(&target, &body);
            let head = format!(
                "HTTP/1.1 {} {}\r\nContent-Type: text/plain\r\nContent-Length: {}\r\nConnection: close\r\n\r\n",
                status,
                if status == 200 { "OK" } else { "Error" },
                reply.len()
            );
            let _ = stream.write_all(head.as_bytes()).await;
            let _ = stream.write_all(reply.as_bytes()).await;
            let _ = stream.shutdown().await;
        }
    });
    url
}

async fn read_request(stream: &mut TcpStream) -> Option<(String, String)> {
    let mut buf = Vec::new();
    let mut chunk = [0u8; 4096];
    let head_end = loop {
        if let Some(i) = buf.windows(4).position(|w| w == b"\r\n\r\n") {
            break i + 4;
        }
        let n = stream.read(&mut chunk).await.ok()?;
        if n == 0 {
            return None;
        }
        buf.extend_from_slice(&chunk[..n]);
    };
    let head = String::from_utf8_lossy(&buf[..head_end]).to_string();
    let target = head.split_whitespace().nth(1)?.to_string();
    let content_length = head
        .lines()
        .filter_map(|l| l.split_once(':'))
        .find(|(k, _)| k.trim().eq_ignore_ascii_case("content-length"))
        .and_then(|(_, v)| v.trim().parse::<usize>().ok())
        .unwrap_or(0);
    while buf.len() < head_end + content_length {
        let n = stream.read(&mut chunk).await.ok()?;
        if n == 0 {
            return None;
        }
        buf.extend_from_slice(&chunk[..n]);
    }
    let body = String::from_utf8_lossy(&buf[head_end..head_end + content_length]).to_string();
    Some((target, body))
}

/// JSON-RPC node stub. `handler(method, params)` returns the result, or an error message sent
/// back as a JSON-RPC error. Every call is recorded in order.
pub struct MockRpc {
    pub url: String,
    calls: Arc<Mutex<Vec<(String, Value)>>>,
}

impl MockRpc {
    pub async fn start<F>(handler: F) -> Self
    where
        F: Fn(&str, &Value) -> Result<Value, String> + Send + Sync + 'static,
    {
        let calls = Arc::new(Mutex::new(Vec::new()));
        let recorded = Arc::clone(&calls);
        let url = serve_http(move |_, body| {
            let req: Value = serde_json::from_str(body).unwrap_or(Value::Null);
            let method = req["method"].as_str().unwrap_or_default().to_string();
            let params = req["params"].clone();
            recorded.lock().unwrap().push((method.clone(), params.clone()));
            let reply = match handler(&method, &params) {
                Ok(result) => json!({"jsonrpc": "2.0", "id": req["id"], "result": result}),
                Err(message) => json!({
                    "jsonrpc": "2.0",
                    "id": req["id"],
                    "error": {"code": -32000, "message": message}
                }),
            };
            (200, reply.to_string())
        })
        .await;
        Self { url, calls }
    }

    pub fn methods(&self) -> Vec<String> {
        self.calls.lock().unwrap().iter().map(|(m, _)| m.clone()).collect()
    }

    /// Transactions received via eth_sendRawTransaction, in order (including rejected ones).
    pub fn sent_transactions(&self) -> Vec<SentTx> {
        self.calls
            .lock()
            .unwrap()
            .iter()
            .filter(|(m, _)| m == "eth_sendRawTransaction")
            .map(|(_, params)| SentTx::decode(params))
            .collect()
    }

    pub fn calls(&self) -> Vec<(String, Value)> {
        self.calls.lock().unwrap().clone()
    }
}

/// Fields of a signed legacy transaction.
#[derive(Debug, Clone)]
pub struct SentTx {
    pub nonce: u64,
    pub to: Vec<u8>,
    pub data: Vec<u8>,
}

impl SentTx {
    fn decode(params: &Value) -> Self {
        let raw = params[0].as_str().unwrap();
        let raw = hex::decode(raw.strip_prefix("0x").unwrap_or(raw)).unwrap();
        let rlp = rlp::Rlp::new(&raw);
        Self {
            nonce: rlp.val_at(0).unwrap(),
            to: rlp.val_at(3).unwrap(),
            data: rlp.val_at(5).unwrap(),
        }
    }
}

/// Hash the stub returns for the `n`-th accepted transaction.
pub fn tx_hash(n: u8) -> B256 {
    B256::from([n; 32])
}
