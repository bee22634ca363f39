//! Canonical query record parsed from one `Incoming` event.

use alloy::primitives::{Address, B256};

/// One query to answer. Immutable once parsed; owned by a single dispatch.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct QueryRecord {
    pub query_id: B256,
    /// Raw query text, passed verbatim to the resolver.
    pub query: String,
    pub endpoint: String,
    pub subscriber: Address,
    pub endpoint_params: Vec<String>,
    /// True when the query came from a contract rather than an off-chain subscriber.
    pub onchain_subscriber: bool,
}

impl QueryRecord {
    /// First 8 hex digits of the query id, the only part shown in logs.
    pub fn short_id(&self) -> String {
        hex::encode(&self.query_id[..4])
    }

    pub fn origin(&self) -> &'static str {
        if self.onchain_subscriber {
            "contract"
        } else {
            "offchain subscriber"
        }
    }
}
