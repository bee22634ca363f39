//! Response encoding: answer text to the `bytes32[]` words of a dynamic response.
//!
//! The Dispatch contract reassembles a dynamic response by concatenating its words in order,
//! so the chunk size is fixed at 32 raw bytes of the UTF-8 answer. Each chunk is left-padded
//! with zeros to a full word; only the last chunk can be shorter than a word.

use thiserror::Error;

/// Raw bytes carried per response word. Changing this breaks on-chain reassembly.
pub const WORD_SIZE: usize = 32;

/// Ordered `bytes32` words of a dynamic response.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct EncodedResponse {
    words: Vec<[u8; WORD_SIZE]>,
}

#[derive(Debug, Error, PartialEq)]
pub enum DecodeError {
    #[error("word {index}: invalid hex: {source}")]
    Hex {
        index: usize,
        source: hex::FromHexError,
    },
    #[error("word {index}: expected 32 bytes, got {len}")]
    WordLength { index: usize, len: usize },
    #[error("response is not valid UTF-8: {0}")]
    Utf8(#[from] std::string::FromUtf8Error),
}

impl EncodedResponse {
    pub fn words(&self) -> &[[u8; WORD_SIZE]] {
        &self.words
    }

    pub fn len(&self) -> usize {
        self.words.len()
    }

    pub fn is_empty(&self) -> bool {
        self.words.is_empty()
    }

    /// Words as 64-digit lowercase hex strings (no `0x` prefix).
    pub fn hex_words(&self) -> Vec<String> {
        self.words.iter().map(hex::encode).collect()
    }

    /// Parse words from hex strings (`0x` prefix optional). Every word must be exactly 32 bytes.
    pub fn from_hex_words<S: AsRef<str>>(words: &[S]) -> Result<Self, DecodeError> {
        let mut out = Vec::with_capacity(words.len());
        for (index, w) in words.iter().enumerate() {
            let s = w.as_ref();
            let bytes = hex::decode(s.strip_prefix("0x").unwrap_or(s))
                .map_err(|source| DecodeError::Hex { index, source })?;
            let word: [u8; WORD_SIZE] = bytes
                .as_slice()
                .try_into()
                .map_err(|_| DecodeError::WordLength {
                    index,
                    len: bytes.len(),
                })?;
            out.push(word);
        }
        Ok(Self { words: out })
    }
}

/// Split `answer` into 32-byte chunks, each left-padded to a full word.
///
/// Empty input yields an empty response.
pub fn encode(answer: &str) -> EncodedResponse {
    let words = answer
        .as_bytes()
        .chunks(WORD_SIZE)
        .map(|chunk| {
            let mut word = [0u8; WORD_SIZE];
            word[WORD_SIZE - chunk.len()..].copy_from_slice(chunk);
            word
        })
        .collect();
    EncodedResponse { words }
}

/// Rebuild the answer text: full words are taken as-is, the last word has its left padding
/// trimmed. An answer whose final chunk starts with NUL bytes cannot be recovered exactly.
pub fn decode(response: &EncodedResponse) -> Result<String, DecodeError> {
    let mut bytes = Vec::with_capacity(response.len() * WORD_SIZE);
    if let Some((last, full)) = response.words.split_last() {
        for word in full {
            bytes.extend_from_slice(word);
        }
        let start = last.iter().position(|b| *b != 0).unwrap_or(WORD_SIZE);
        bytes.extend_from_slice(&last[start..]);
    }
    Ok(String::from_utf8(bytes)?)
}
