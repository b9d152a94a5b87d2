//! Solidity ABI Encoding Module
//!
//! Minimal ABI encoder for the contract entry points and message digests the
//! relay works with. Supports the static types (address, uint256, bytes32, bool)
//! and the dynamic ones (bytes, string, T[], tuples containing dynamic members)
//! using the standard head/tail layout.

use anyhow::{Context, Result};
use ethereum_types::{Address, H256, U256};
use sha3::{Digest, Keccak256};

/// Selector of the `Error(string)` revert payload.
pub const ERROR_STRING_SELECTOR: [u8; 4] = [0x08, 0xc3, 0x79, 0xa0];

const WORD: usize = 32;

// ============================================================================
// TOKENS
// ============================================================================

/// A single ABI value.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Token {
    Address(Address),
    Uint(U256),
    FixedBytes(H256),
    Bool(bool),
    Bytes(Vec<u8>),
    String(String),
    /// Dynamic array `T[]`
    Array(Vec<Token>),
    Tuple(Vec<Token>),
}

impl Token {
    pub fn uint(value: u64) -> Self {
        Token::Uint(U256::from(value))
    }

    fn is_dynamic(&self) -> bool {
        match self {
            Token::Bytes(_) | Token::String(_) | Token::Array(_) => true,
            Token::Tuple(members) => members.iter().any(Token::is_dynamic),
            _ => false,
        }
    }

    /// Size of this token's slot in the enclosing head.
    fn head_len(&self) -> usize {
        match self {
            Token::Tuple(members) if !self.is_dynamic() => {
                members.iter().map(Token::head_len).sum()
            }
            _ => WORD,
        }
    }
}

// ============================================================================
// ENCODING
// ============================================================================

/// Computes the 4-byte function selector for a canonical signature,
/// e.g. `"balanceOf(address)"`.
pub fn selector(signature: &str) -> [u8; 4] {
    let hash = Keccak256::digest(signature.as_bytes());
    let mut out = [0u8; 4];
    out.copy_from_slice(&hash[..4]);
    out
}

/// ABI-encodes a parameter list (equivalent to Solidity `abi.encode`).
pub fn encode(tokens: &[Token]) -> Vec<u8> {
    let head_len: usize = tokens.iter().map(Token::head_len).sum();
    let mut head = Vec::with_capacity(head_len);
    let mut tail = Vec::new();

    for token in tokens {
        if token.is_dynamic() {
            head.extend_from_slice(&uint_word(U256::from(head_len + tail.len())));
            tail.extend(encode_dynamic(token));
        } else {
            head.extend(encode_static(token));
        }
    }

    head.extend(tail);
    head
}

/// Builds full calldata: selector followed by the encoded arguments.
pub fn encode_call(signature: &str, tokens: &[Token]) -> Vec<u8> {
    let mut data = selector(signature).to_vec();
    data.extend(encode(tokens));
    data
}

fn encode_static(token: &Token) -> Vec<u8> {
    match token {
        Token::Address(addr) => address_word(addr).to_vec(),
        Token::Uint(value) => uint_word(*value).to_vec(),
        Token::FixedBytes(bytes) => bytes.as_bytes().to_vec(),
        Token::Bool(flag) => uint_word(U256::from(*flag as u8)).to_vec(),
        Token::Tuple(members) => encode(members),
        // Dynamic tokens never reach here
        _ => encode_dynamic(token),
    }
}

fn encode_dynamic(token: &Token) -> Vec<u8> {
    match token {
        Token::Bytes(bytes) => encode_byte_string(bytes),
        Token::String(text) => encode_byte_string(text.as_bytes()),
        Token::Array(items) => {
            let mut out = uint_word(U256::from(items.len())).to_vec();
            out.extend(encode(items));
            out
        }
        Token::Tuple(members) => encode(members),
        _ => encode_static(token),
    }
}

fn encode_byte_string(bytes: &[u8]) -> Vec<u8> {
    let mut out = uint_word(U256::from(bytes.len())).to_vec();
    out.extend_from_slice(bytes);
    let padding = (WORD - bytes.len() % WORD) % WORD;
    out.extend(std::iter::repeat(0u8).take(padding));
    out
}

/// Big-endian 32-byte word for a uint256.
pub fn uint_word(value: U256) -> [u8; 32] {
    let mut word = [0u8; 32];
    value.to_big_endian(&mut word);
    word
}

/// Left-padded 32-byte word for an address.
pub fn address_word(addr: &Address) -> [u8; 32] {
    let mut word = [0u8; 32];
    word[12..].copy_from_slice(addr.as_bytes());
    word
}

// ============================================================================
// DECODING
// ============================================================================

/// Returns the `index`-th 32-byte word of return data.
pub fn word_at(data: &[u8], index: usize) -> Result<&[u8]> {
    let start = index * WORD;
    data.get(start..start + WORD)
        .with_context(|| format!("Return data too short: need word {}, have {} bytes", index, data.len()))
}

pub fn decode_uint(data: &[u8], index: usize) -> Result<U256> {
    Ok(U256::from_big_endian(word_at(data, index)?))
}

pub fn decode_address(data: &[u8], index: usize) -> Result<Address> {
    Ok(Address::from_slice(&word_at(data, index)?[12..]))
}

pub fn decode_bool(data: &[u8], index: usize) -> Result<bool> {
    Ok(word_at(data, index)?[WORD - 1] != 0)
}

/// Decodes a dynamic `string` whose offset is stored in head word `index`.
pub fn decode_string(data: &[u8], index: usize) -> Result<String> {
    let offset = decode_uint(data, index)?;
    if offset > U256::from(data.len()) {
        anyhow::bail!("String offset {} out of bounds", offset);
    }
    let offset = offset.as_usize();
    let len_word = data
        .get(offset..offset + WORD)
        .context("String length word out of bounds")?;
    let len = U256::from_big_endian(len_word);
    if len > U256::from(data.len()) {
        anyhow::bail!("String length {} out of bounds", len);
    }
    let len = len.as_usize();
    let bytes = data
        .get(offset + WORD..offset + WORD + len)
        .context("String body out of bounds")?;
    String::from_utf8(bytes.to_vec()).context("String is not valid UTF-8")
}

/// Extracts the message of an `Error(string)` revert payload, if that is what
/// the payload is.
pub fn decode_revert_reason(data: &[u8]) -> Option<String> {
    if data.len() < 4 || data[..4] != ERROR_STRING_SELECTOR {
        return None;
    }
    decode_string(&data[4..], 0).ok()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_selector_matches_erc20_transfer() {
        assert_eq!(hex::encode(selector("transfer(address,uint256)")), "a9059cbb");
    }

    #[test]
    fn test_encode_static_words() {
        let encoded = encode(&[Token::uint(1), Token::Bool(true)]);
        assert_eq!(encoded.len(), 64);
        assert_eq!(encoded[31], 1);
        assert_eq!(encoded[63], 1);
    }

    #[test]
    fn test_encode_dynamic_string_offset() {
        // (uint256, string): head is two words, string starts at 0x40
        let encoded = encode(&[Token::uint(7), Token::String("krw".to_string())]);
        assert_eq!(encoded.len(), 4 * 32);
        assert_eq!(decode_uint(&encoded, 1).unwrap(), U256::from(64));
        assert_eq!(decode_uint(&encoded, 2).unwrap(), U256::from(3));
        assert_eq!(&encoded[96..99], b"krw");
        assert_eq!(decode_string(&encoded, 1).unwrap(), "krw");
    }

    #[test]
    fn test_static_tuple_is_inlined() {
        let tuple = Token::Tuple(vec![Token::uint(1), Token::uint(2)]);
        let encoded = encode(&[tuple, Token::uint(3)]);
        assert_eq!(encoded.len(), 96);
        assert_eq!(decode_uint(&encoded, 2).unwrap(), U256::from(3));
    }

    #[test]
    fn test_dynamic_array_of_bytes32() {
        let array = Token::Array(vec![
            Token::FixedBytes(H256::repeat_byte(0xaa)),
            Token::FixedBytes(H256::repeat_byte(0xbb)),
        ]);
        let encoded = encode(&[array]);
        // offset, length, two elements
        assert_eq!(encoded.len(), 4 * 32);
        assert_eq!(decode_uint(&encoded, 0).unwrap(), U256::from(32));
        assert_eq!(decode_uint(&encoded, 1).unwrap(), U256::from(2));
        assert_eq!(word_at(&encoded, 2).unwrap(), &[0xaa; 32]);
    }

    #[test]
    fn test_decode_revert_reason() {
        let mut payload = ERROR_STRING_SELECTOR.to_vec();
        payload.extend(encode(&[Token::String("Invalid nonce".to_string())]));
        assert_eq!(decode_revert_reason(&payload).as_deref(), Some("Invalid nonce"));
        assert_eq!(decode_revert_reason(&[0u8; 4]), None);
    }
}
