//! ABI types and encoding for the Zap Dispatch and Registry contracts.
//!
//! Incoming event: decode from the JSON-RPC log shape (eth_subscription result).
//! Calls: `respondBytes32Array` on Dispatch, and the provider registration calls on Registry.

use crate::encoder::EncodedResponse;
use crate::query::QueryRecord;
use alloy::primitives::{Address, B256, U256};
use anyhow::{Context, Result};
use serde_json::Value;
use sha3::{Digest, Keccak256};

pub const INCOMING_EVENT: &str =
    "Incoming(uint256,address,address,string,bytes32,bytes32[],bool)";
pub const RESPOND_BYTES32_ARRAY: &str = "respondBytes32Array(uint256,bytes32[])";
pub const GET_PROVIDER_TITLE: &str = "getProviderTitle(address)";
pub const INITIATE_PROVIDER: &str = "initiateProvider(uint256,bytes32)";
pub const SET_ENDPOINT_PARAMS: &str = "setEndpointParams(bytes32,bytes32[])";
pub const INITIATE_PROVIDER_CURVE: &str = "initiateProviderCurve(bytes32,int256[],address)";

const WORD: usize = 32;

pub fn keccak256(data: &[u8]) -> [u8; 32] {
    Keccak256::digest(data).into()
}

/// topic0 of an event: full keccak256 of its signature.
pub fn event_topic(signature: &str) -> [u8; 32] {
    keccak256(signature.as_bytes())
}

/// Function selector: first 4 bytes of keccak256 of the signature.
pub fn selector(signature: &str) -> [u8; 4] {
    let h = keccak256(signature.as_bytes());
    [h[0], h[1], h[2], h[3]]
}

/// Decode a JSON-RPC log (eth_subscription result) of the `Incoming` event into a [QueryRecord].
///
/// Topics: `[Incoming, id, provider, subscriber]`.
/// Data: `(string query, bytes32 endpoint, bytes32[] endpointParams, bool onchainSubscriber)`.
pub fn decode_incoming_log(log_value: &Value) -> Result<QueryRecord> {
    let topics = log_value
        .get("topics")
        .and_then(|t| t.as_array())
        .ok_or_else(|| anyhow::anyhow!("Missing topics"))?;
    if topics.len() < 4 {
        anyhow::bail!("Expected 4 topics, got {}", topics.len());
    }
    let topic = |i: usize| -> Result<&str> {
        topics[i]
            .as_str()
            .ok_or_else(|| anyhow::anyhow!("topic{} not str", i))
    };
    if parse_hex_bytes_32(topic(0)?)? != event_topic(INCOMING_EVENT) {
        anyhow::bail!("topic0 is not Incoming");
    }
    let query_id = B256::from(parse_hex_bytes_32(topic(1)?)?);
    let subscriber = Address::from(parse_hex_bytes_20(topic(3)?)?);
    let data = parse_hex_bytes(
        log_value
            .get("data")
            .and_then(|d| d.as_str())
            .ok_or_else(|| anyhow::anyhow!("Missing data"))?,
    )?;
    if data.len() < 4 * WORD {
        anyhow::bail!("Data too short for Incoming head ({} bytes)", data.len());
    }

    let query_offset = read_usize(&data, 0)?;
    let query_len = read_usize(&data, query_offset)?;
    let query_bytes = read_bytes(&data, query_offset + WORD, query_len)?;
    let query = String::from_utf8(query_bytes.to_vec()).context("query is not UTF-8")?;

    let endpoint = bytes32_to_utf8(read_word(&data, WORD)?).context("endpoint")?;

    let params_offset = read_usize(&data, 2 * WORD)?;
    let params_len = read_usize(&data, params_offset)?;
    let mut endpoint_params = Vec::with_capacity(params_len.min(64));
    for i in 0..params_len {
        let at = i
            .checked_mul(WORD)
            .and_then(|o| o.checked_add(params_offset + WORD))
            .ok_or_else(|| anyhow::anyhow!("endpointParams offset overflow"))?;
        let param = bytes32_to_utf8(read_word(&data, at)?)
            .with_context(|| format!("endpointParams[{}]", i))?;
        endpoint_params.push(param);
    }

    let onchain_word = read_word(&data, 3 * WORD)?;
    if onchain_word[..WORD - 1].iter().any(|b| *b != 0) || onchain_word[WORD - 1] > 1 {
        anyhow::bail!("onchainSubscriber is not a bool");
    }
    let onchain_subscriber = onchain_word[WORD - 1] == 1;

    Ok(QueryRecord {
        query_id,
        query,
        endpoint,
        subscriber,
        endpoint_params,
        onchain_subscriber,
    })
}

/// Decode a `bytes32` holding short text: NUL padding is stripped from both ends, the rest
/// must be UTF-8.
pub fn bytes32_to_utf8(word: &[u8]) -> Result<String> {
    let start = word.iter().position(|b| *b != 0).unwrap_or(word.len());
    let end = word.iter().rposition(|b| *b != 0).map_or(start, |i| i + 1);
    String::from_utf8(word[start..end].to_vec()).context("bytes32 is not UTF-8")
}

/// Encode short text as a right-padded `bytes32` (Solidity string literal layout).
pub fn utf8_to_bytes32(text: &str) -> Result<[u8; 32]> {
    let bytes = text.as_bytes();
    if bytes.len() > WORD {
        anyhow::bail!("'{}' does not fit in bytes32 ({} bytes)", text, bytes.len());
    }
    let mut out = [0u8; 32];
    out[..bytes.len()].copy_from_slice(bytes);
    Ok(out)
}

/// Calldata for `respondBytes32Array(uint256 id, bytes32[] response)`.
pub fn respond_bytes32_array_calldata(query_id: &B256, response: &EncodedResponse) -> Vec<u8> {
    let mut out = Vec::with_capacity(4 + WORD * (3 + response.len()));
    out.extend_from_slice(&selector(RESPOND_BYTES32_ARRAY));
    out.extend_from_slice(query_id.as_slice());
    out.extend_from_slice(&usize_word(2 * WORD));
    out.extend_from_slice(&usize_word(response.len()));
    for w in response.words() {
        out.extend_from_slice(w);
    }
    out
}

/// Calldata for `getProviderTitle(address provider)`.
pub fn get_provider_title_calldata(provider: &Address) -> Vec<u8> {
    let mut out = selector(GET_PROVIDER_TITLE).to_vec();
    out.extend_from_slice(&address_word(provider));
    out
}

/// Calldata for `initiateProvider(uint256 publicKey, bytes32 title)`.
pub fn initiate_provider_calldata(public_key: &U256, title: &[u8; 32]) -> Vec<u8> {
    let mut out = selector(INITIATE_PROVIDER).to_vec();
    out.extend_from_slice(&public_key.to_be_bytes::<32>());
    out.extend_from_slice(title);
    out
}

/// Calldata for `setEndpointParams(bytes32 endpoint, bytes32[] params)`.
pub fn set_endpoint_params_calldata(endpoint: &[u8; 32], params: &[[u8; 32]]) -> Vec<u8> {
    let mut out = selector(SET_ENDPOINT_PARAMS).to_vec();
    out.extend_from_slice(endpoint);
    out.extend_from_slice(&usize_word(2 * WORD));
    out.extend_from_slice(&usize_word(params.len()));
    for p in params {
        out.extend_from_slice(p);
    }
    out
}

/// Calldata for `initiateProviderCurve(bytes32 endpoint, int256[] curve, address broker)`.
pub fn initiate_provider_curve_calldata(
    endpoint: &[u8; 32],
    curve: &[U256],
    broker: &Address,
) -> Vec<u8> {
    let mut out = selector(INITIATE_PROVIDER_CURVE).to_vec();
    out.extend_from_slice(endpoint);
    out.extend_from_slice(&usize_word(3 * WORD));
    out.extend_from_slice(&address_word(broker));
    out.extend_from_slice(&usize_word(curve.len()));
    for term in curve {
        out.extend_from_slice(&term.to_be_bytes::<32>());
    }
    out
}

pub fn usize_word(n: usize) -> [u8; 32] {
    U256::from(n).to_be_bytes::<32>()
}

pub fn address_word(addr: &Address) -> [u8; 32] {
    let mut out = [0u8; 32];
    out[12..].copy_from_slice(addr.as_slice());
    out
}

fn read_word(data: &[u8], offset: usize) -> Result<&[u8]> {
    read_bytes(data, offset, WORD)
}

fn read_bytes(data: &[u8], offset: usize, len: usize) -> Result<&[u8]> {
    let end = offset
        .checked_add(len)
        .ok_or_else(|| anyhow::anyhow!("offset overflow"))?;
    data.get(offset..end)
        .ok_or_else(|| anyhow::anyhow!("Data too short: need {} bytes, have {}", end, data.len()))
}

/// Read a word as an offset or length. Values beyond u32 are rejected as malformed.
fn read_usize(data: &[u8], offset: usize) -> Result<usize> {
    let word = read_word(data, offset)?;
    if word[..WORD - 4].iter().any(|b| *b != 0) {
        anyhow::bail!("word at {} too large for an offset/length", offset);
    }
    let n = u32::from_be_bytes([word[28], word[29], word[30], word[31]]);
    Ok(n as usize)
}

pub fn parse_hex_bytes(s: &str) -> Result<Vec<u8>> {
    let s = s.strip_prefix("0x").unwrap_or(s);
    hex::decode(s).context("parse hex bytes")
}

pub fn parse_hex_bytes_32(s: &str) -> Result<[u8; 32]> {
    let bytes = parse_hex_bytes(s)?;
    if bytes.len() != 32 {
        anyhow::bail!("Expected 32 bytes, got {}", bytes.len());
    }
    let mut out = [0u8; 32];
    out.copy_from_slice(&bytes);
    Ok(out)
}

pub fn parse_hex_bytes_20(s: &str) -> Result<[u8; 20]> {
    let bytes = parse_hex_bytes(s)?;
    if bytes.len() == 20 {
        let mut out = [0u8; 20];
        out.copy_from_slice(&bytes);
        Ok(out)
    } else if bytes.len() == 32 {
        // Indexed address in EVM is 32 bytes (left-padded); take last 20.
        let mut out = [0u8; 20];
        out.copy_from_slice(&bytes[12..32]);
        Ok(out)
    } else {
        anyhow::bail!("Expected 20 or 32 bytes for address, got {}", bytes.len());
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::encoder::encode;
    use serde_json::json;

    fn incoming_log(query: &str, endpoint: &str, params: &[&str], onchain: bool) -> Value {
        let mut data = Vec::new();
        let padded_query_len = query.len().div_ceil(32) * 32;
        let params_offset = 4 * WORD + WORD + padded_query_len;
        data.extend_from_slice(&usize_word(4 * WORD));
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
        let mut id = [0u8; 32];
        id[0] = 0xab;
        id[31] = 7;
        json!({
            "topics": [
                format!("0x{}", hex::encode(event_topic(INCOMING_EVENT))),
                format!("0x{}", hex::encode(id)),
                format!("0x{}", hex::encode([0x11u8; 32])),
                format!("0x{}{}", "00".repeat(12), "22".repeat(20)),
            ],
            "data": format!("0x{}", hex::encode(data)),
        })
    }

    #[test]
    fn known_selectors() {
        assert_eq!(selector("transfer(address,uint256)"), [0xa9, 0x05, 0x9c, 0xbb]);
        assert_eq!(selector("balanceOf(address)"), [0x70, 0xa0, 0x82, 0x31]);
    }

    #[test]
    fn decodes_incoming_event() {
        let log = incoming_log("population of France", "wolfram-2", &["short", "en"], true);
        let q = decode_incoming_log(&log).unwrap();
        assert_eq!(q.query, "population of France");
        assert_eq!(q.endpoint, "wolfram-2");
        assert_eq!(q.endpoint_params, vec!["short".to_string(), "en".to_string()]);
        assert!(q.onchain_subscriber);
        assert_eq!(q.subscriber, Address::from([0x22u8; 20]));
        assert_eq!(q.short_id(), "ab000000");
        assert_eq!(q.query_id[31], 7);
    }

    #[test]
    fn decodes_empty_query_and_params() {
        let q = decode_incoming_log(&incoming_log("", "ping", &[], false)).unwrap();
        assert_eq!(q.query, "");
        assert!(q.endpoint_params.is_empty());
        assert!(!q.onchain_subscriber);
    }

    #[test]
    fn malformed_endpoint_fails_whole_event() {
        let mut log = incoming_log("q", "ok", &[], false);
        let data = log["data"].as_str().unwrap().to_string();
        // endpoint word starts at byte 32 (hex offset 2 + 64); put an invalid UTF-8 byte there.
        let mut bytes = parse_hex_bytes(&data).unwrap();
        bytes[32] = 0xff;
        log["data"] = json!(format!("0x{}", hex::encode(bytes)));
        assert!(decode_incoming_log(&log).is_err());
    }

    #[test]
    fn truncated_data_is_rejected() {
        let mut log = incoming_log("some query", "wolfram-2", &["p"], false);
        let data = log["data"].as_str().unwrap();
        log["data"] = json!(data[..data.len() - 64].to_string());
        assert!(decode_incoming_log(&log).is_err());
    }

    #[test]
    fn wrong_topic0_is_rejected() {
        let mut log = incoming_log("q", "e", &[], false);
        log["topics"][0] = json!(format!("0x{}", "00".repeat(32)));
        assert!(decode_incoming_log(&log).is_err());
    }

    #[test]
    fn bytes32_text_trims_padding() {
        let w = utf8_to_bytes32("wolfram-2").unwrap();
        assert_eq!(bytes32_to_utf8(&w).unwrap(), "wolfram-2");
        assert_eq!(bytes32_to_utf8(&[0u8; 32]).unwrap(), "");
        assert!(utf8_to_bytes32(&"x".repeat(33)).is_err());
    }

    #[test]
    fn respond_calldata_layout() {
        let id = B256::from([0x01u8; 32]);
        let resp = encode(&"z".repeat(40));
        let cd = respond_bytes32_array_calldata(&id, &resp);
        assert_eq!(cd.len(), 4 + 32 * 5);
        assert_eq!(&cd[..4], &selector(RESPOND_BYTES32_ARRAY));
        assert_eq!(&cd[4..36], id.as_slice());
        assert_eq!(cd[67], 0x40);
        assert_eq!(cd[99], 2);
        assert_eq!(&cd[100..132], &resp.words()[0]);
        assert_eq!(&cd[132..164], &resp.words()[1]);
    }

    #[test]
    fn curve_calldata_layout() {
        let endpoint = utf8_to_bytes32("wolfram-2").unwrap();
        let curve = [U256::from(1u64), U256::from(10u64).pow(U256::from(18u64)), U256::from(1000u64)];
        let cd = initiate_provider_curve_calldata(&endpoint, &curve, &Address::ZERO);
        assert_eq!(cd.len(), 4 + 32 * 7);
        assert_eq!(cd[4 + 63], 0x60);
        assert_eq!(cd[4 + 127], 3);
        assert_eq!(&cd[4 + 128..4 + 160], &curve[0].to_be_bytes::<32>());
    }
}
