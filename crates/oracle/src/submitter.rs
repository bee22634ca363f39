//! Response submission: sign and broadcast `respondBytes32Array` transactions.
//!
//! - **LocalSigner**: EIP-155 legacy transactions signed in-process (k256 over a Keccak-256
//!   digest of the RLP payload).
//! - **Transactor**: nonce tracking and broadcast via `eth_sendRawTransaction`.
//! - **DispatchSubmitter**: the [Submitter] the dispatcher uses; one transaction per response.

use crate::abi::{keccak256, respond_bytes32_array_calldata};
use crate::encoder::EncodedResponse;
use crate::rpc::{RpcClient, RpcError};
use alloy::primitives::{Address, B256};
use async_trait::async_trait;
use k256::ecdsa::SigningKey;
use rlp::RlpStream;
use sha3::{Digest, Keccak256};
use std::sync::Arc;
use thiserror::Error;
use tokio::sync::Mutex;

/// Response to one query, as written to the Dispatch contract.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Response {
    pub query_id: B256,
    pub params: EncodedResponse,
}

impl Response {
    /// Responses are always variable-length word sequences (`respondBytes32Array`).
    pub const DYNAMIC: bool = true;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SubmissionResult {
    pub transaction_hash: B256,
}

#[derive(Debug, Error)]
pub enum SubmissionError {
    #[error(transparent)]
    Rpc(#[from] RpcError),
    #[error("signing failed: {0}")]
    Signing(String),
}

/// Writes responses on-chain. Implemented by [DispatchSubmitter]; tests substitute recorders.
#[async_trait]
pub trait Submitter: Send + Sync {
    async fn respond(&self, response: &Response) -> Result<SubmissionResult, SubmissionError>;
}

/// Unsigned legacy transaction fields.
#[derive(Debug, Clone)]
pub struct LegacyTx {
    pub nonce: u64,
    pub gas_price: u64,
    pub gas_limit: u64,
    pub to: Address,
    pub value: u64,
    pub data: Vec<u8>,
}

/// In-process key for one chain.
pub struct LocalSigner {
    key: SigningKey,
    address: Address,
    chain_id: u64,
}

impl std::fmt::Debug for LocalSigner {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LocalSigner")
            .field("address", &self.address)
            .field("chain_id", &self.chain_id)
            .finish_non_exhaustive()
    }
}

impl LocalSigner {
    /// Load a key from hex (`0x` prefix optional).
    pub fn from_hex(private_key: &str, chain_id: u64) -> Result<Self, SubmissionError> {
        let s = private_key.trim();
        let bytes = hex::decode(s.strip_prefix("0x").unwrap_or(s))
            .map_err(|e| SubmissionError::Signing(format!("private key: {}", e)))?;
        let bytes: [u8; 32] = bytes
            .as_slice()
            .try_into()
            .map_err(|_| SubmissionError::Signing("private key must be 32 bytes".into()))?;
        let key = SigningKey::from_bytes((&bytes).into())
            .map_err(|e| SubmissionError::Signing(format!("invalid signing key: {}", e)))?;
        let address = address_of(&key);
        Ok(Self {
            key,
            address,
            chain_id,
        })
    }

    pub fn address(&self) -> Address {
        self.address
    }

    /// RLP-encoded signed transaction, ready for `eth_sendRawTransaction`.
    pub fn sign_legacy(&self, tx: &LegacyTx) -> Result<Vec<u8>, SubmissionError> {
        let mut unsigned = RlpStream::new();
        unsigned.begin_list(9);
        append_fields(&mut unsigned, tx);
        unsigned.append(&self.chain_id);
        unsigned.append(&0u8);
        unsigned.append(&0u8);
        let unsigned_rlp = unsigned.out().to_vec();

        let (signature, recovery_id) = self
            .key
            .sign_digest_recoverable(Keccak256::new_with_prefix(unsigned_rlp))
            .map_err(|e| SubmissionError::Signing(e.to_string()))?;
        let v = self
            .chain_id
            .checked_mul(2)
            .and_then(|x| x.checked_add(35))
            .and_then(|x| x.checked_add(u64::from(recovery_id.to_byte())))
            .ok_or_else(|| SubmissionError::Signing("v overflow".into()))?;

        let sig_bytes = signature.to_bytes();
        let (r, s) = sig_bytes.split_at(32);

        let mut signed = RlpStream::new();
        signed.begin_list(9);
        append_fields(&mut signed, tx);
        signed.append(&v);
        signed.append(&trim_leading_zeros(r));
        signed.append(&trim_leading_zeros(s));
        Ok(signed.out().to_vec())
    }
}

fn append_fields(stream: &mut RlpStream, tx: &LegacyTx) {
    stream.append(&tx.nonce);
    stream.append(&tx.gas_price);
    stream.append(&tx.gas_limit);
    stream.append(&tx.to.as_slice());
    stream.append(&tx.value);
    stream.append(&tx.data);
}

/// Trim leading zero bytes for RLP integer encoding (zero encodes as the empty string).
fn trim_leading_zeros(b: &[u8]) -> &[u8] {
    let start = b.iter().position(|x| *x != 0).unwrap_or(b.len());
    &b[start..]
}

/// Address of a key: last 20 bytes of keccak256 of the uncompressed public key (sans 0x04).
pub fn address_of(key: &SigningKey) -> Address {
    let point = key.verifying_key().to_encoded_point(false);
    let hash = keccak256(&point.as_bytes()[1..]);
    Address::from_slice(&hash[12..])
}

/// Signs and broadcasts transactions from one account, tracking its nonce locally.
#[derive(Debug)]
pub struct Transactor {
    rpc: Arc<RpcClient>,
    signer: LocalSigner,
    gas_limit: u64,
    nonce: Mutex<Option<u64>>,
}

impl Transactor {
    pub fn new(rpc: Arc<RpcClient>, signer: LocalSigner, gas_limit: u64) -> Self {
        Self {
            rpc,
            signer,
            gas_limit,
            nonce: Mutex::new(None),
        }
    }

    pub fn address(&self) -> Address {
        self.signer.address()
    }

    pub fn rpc(&self) -> &RpcClient {
        &self.rpc
    }

    /// Send `calldata` to `to`. Sends are serialized so nonces stay contiguous; a failed send
    /// drops the cached nonce and the next send re-reads it from the node.
    pub async fn send(&self, to: &Address, calldata: Vec<u8>) -> Result<B256, SubmissionError> {
        let mut nonce_guard = self.nonce.lock().await;
        let nonce = match *nonce_guard {
            Some(n) => n,
            None => self.rpc.pending_nonce(&self.signer.address()).await?,
        };
        let gas_price = self.rpc.gas_price().await?;
        let raw = self.signer.sign_legacy(&LegacyTx {
            nonce,
            gas_price,
            gas_limit: self.gas_limit,
            to: *to,
            value: 0,
            data: calldata,
        })?;
        match self.rpc.send_raw_transaction(&raw).await {
            Ok(hash) => {
                *nonce_guard = Some(nonce + 1);
                Ok(hash)
            }
            Err(e) => {
                *nonce_guard = None;
                Err(e.into())
            }
        }
    }
}

/// Submits responses to the Dispatch contract.
#[derive(Debug)]
pub struct DispatchSubmitter {
    transactor: Arc<Transactor>,
    dispatch_address: Address,
}

impl DispatchSubmitter {
    pub fn new(transactor: Arc<Transactor>, dispatch_address: Address) -> Self {
        Self {
            transactor,
            dispatch_address,
        }
    }
}

#[async_trait]
impl Submitter for DispatchSubmitter {
    async fn respond(&self, response: &Response) -> Result<SubmissionResult, SubmissionError> {
        let calldata = respond_bytes32_array_calldata(&response.query_id, &response.params);
        let transaction_hash = self
            .transactor
            .send(&self.dispatch_address, calldata)
            .await?;
        Ok(SubmissionResult { transaction_hash })
    }
}
