//! EVM Client Module
//!
//! This module provides a client for communicating with EVM-compatible blockchain nodes
//! via their JSON-RPC API. It handles view calls, locally signed legacy transactions
//! and receipt lookups. Keys never leave the process: transactions are signed here and
//! broadcast with `eth_sendRawTransaction`, so public RPC endpoints work.

use anyhow::{Context, Result};
use ethereum_types::{Address, H256, U256};
use k256::ecdsa::SigningKey;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tracing::debug;

use crate::abi;
use crate::crypto;
use crate::error::GatewayError;

// ============================================================================
// API RESPONSE STRUCTURES
// ============================================================================

/// EVM JSON-RPC request wrapper
#[derive(Debug, Serialize)]
struct JsonRpcRequest {
    jsonrpc: String,
    method: String,
    params: Vec<serde_json::Value>,
    id: u64,
}

/// EVM JSON-RPC response wrapper
#[derive(Debug, Deserialize)]
struct JsonRpcResponse<T> {
    result: Option<T>,
    error: Option<JsonRpcError>,
}

#[derive(Debug, Deserialize)]
struct JsonRpcError {
    code: i64,
    message: String,
    #[serde(default)]
    data: Option<serde_json::Value>,
}

impl JsonRpcError {
    fn is_revert(&self) -> bool {
        // geth and anvil report reverts as code 3; hardhat only in the message
        self.code == 3 || self.message.to_lowercase().contains("revert")
    }

    /// Decoded `Error(string)` reason, falling back to the node's message.
    fn revert_reason(&self) -> String {
        let data_hex = match &self.data {
            Some(serde_json::Value::String(s)) => Some(s.clone()),
            Some(serde_json::Value::Object(o)) => o.get("data").and_then(|d| d.as_str()).map(str::to_string),
            _ => None,
        };
        data_hex
            .and_then(|h| crypto::hex_to_bytes(&h).ok())
            .and_then(|bytes| abi::decode_revert_reason(&bytes))
            .unwrap_or_else(|| {
                self.message
                    .strip_prefix("execution reverted: ")
                    .unwrap_or(&self.message)
                    .to_string()
            })
    }
}

/// Transaction receipt fields the relay reads.
#[derive(Debug, Clone, Deserialize)]
pub struct EvmReceipt {
    #[serde(rename = "transactionHash")]
    pub transaction_hash: String,
    #[serde(rename = "blockNumber")]
    pub block_number: Option<String>,
    /// "0x1" success, "0x0" reverted
    pub status: Option<String>,
}

impl EvmReceipt {
    pub fn succeeded(&self) -> bool {
        self.status.as_deref() == Some("0x1")
    }
}

// ============================================================================
// EVM CLIENT IMPLEMENTATION
// ============================================================================

/// Client for communicating with EVM-compatible blockchain nodes via JSON-RPC
#[derive(Clone)]
pub struct EvmClient {
    /// HTTP client for making requests
    client: Client,
    /// URL of the EVM node (e.g., "http://127.0.0.1:8545")
    base_url: String,
}

impl EvmClient {
    /// Creates a new EVM client for the given node URL
    ///
    /// # Arguments
    ///
    /// * `node_url` - URL of the EVM node
    /// * `timeout` - Timeout of each JSON-RPC request
    ///
    /// # Returns
    ///
    /// * `Ok(EvmClient)` - Successfully created client
    /// * `Err(anyhow::Error)` - Failed to create client
    pub fn new(node_url: &str, timeout: Duration) -> Result<Self> {
        let client = Client::builder()
            .timeout(timeout)
            .build()
            .context("Failed to create HTTP client")?;

        Ok(Self {
            client,
            base_url: node_url.to_string(),
        })
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    /// Sends one JSON-RPC request and returns the raw envelope.
    async fn request<T: serde::de::DeserializeOwned>(
        &self,
        method: &str,
        params: Vec<serde_json::Value>,
    ) -> Result<JsonRpcResponse<T>> {
        let request = JsonRpcRequest {
            jsonrpc: "2.0".to_string(),
            method: method.to_string(),
            params,
            id: 1,
        };

        self.client
            .post(&self.base_url)
            .json(&request)
            .send()
            .await
            .with_context(|| format!("Failed to send {} request to {}", method, self.base_url))?
            .json()
            .await
            .with_context(|| format!("Failed to parse {} response from {}", method, self.base_url))
    }

    /// Generic JSON-RPC call helper. Node errors become `anyhow` errors.
    async fn json_rpc<T: serde::de::DeserializeOwned>(
        &self,
        method: &str,
        params: Vec<serde_json::Value>,
    ) -> Result<Option<T>> {
        let response: JsonRpcResponse<T> = self.request(method, params).await?;
        if let Some(error) = response.error {
            anyhow::bail!(
                "JSON-RPC error from {} ({}): {} (code: {})",
                self.base_url,
                method,
                error.message,
                error.code
            );
        }
        Ok(response.result)
    }

    async fn json_rpc_required<T: serde::de::DeserializeOwned>(
        &self,
        method: &str,
        params: Vec<serde_json::Value>,
    ) -> Result<T> {
        self.json_rpc(method, params)
            .await?
            .ok_or_else(|| anyhow::anyhow!("No result in {} response", method))
    }

    /// Executes a view call (`eth_call` at "latest").
    ///
    /// # Arguments
    ///
    /// * `from` - Caller to simulate as (affects `msg.sender`)
    /// * `to` - Contract address
    /// * `data` - Calldata
    ///
    /// # Returns
    ///
    /// * `Ok(Vec<u8>)` - Return data
    /// * `Err(GatewayError::Reverted)` - The call reverted; reason decoded where possible
    /// * `Err(GatewayError::Transport)` - Node unreachable or malformed response
    pub async fn call(
        &self,
        from: Option<&Address>,
        to: &Address,
        data: &[u8],
    ) -> std::result::Result<Vec<u8>, GatewayError> {
        let mut tx = serde_json::json!({
            "to": crypto::format_address(to),
            "data": crypto::format_bytes(data),
        });
        if let Some(from) = from {
            tx["from"] = serde_json::json!(crypto::format_address(from));
        }

        let response: JsonRpcResponse<String> = self
            .request("eth_call", vec![tx, serde_json::json!("latest")])
            .await?;

        if let Some(error) = response.error {
            if error.is_revert() {
                return Err(GatewayError::Reverted(error.revert_reason()));
            }
            return Err(GatewayError::Transport(anyhow::anyhow!(
                "JSON-RPC error from {} (eth_call): {} (code: {})",
                self.base_url,
                error.message,
                error.code
            )));
        }

        let result = response
            .result
            .ok_or_else(|| anyhow::anyhow!("No result in eth_call response"))?;
        Ok(crypto::hex_to_bytes(&result)?)
    }

    /// Pending transaction count of `address`.
    pub async fn get_transaction_count(&self, address: &Address) -> Result<U256> {
        let nonce_hex: String = self
            .json_rpc_required(
                "eth_getTransactionCount",
                vec![
                    serde_json::json!(crypto::format_address(address)),
                    serde_json::json!("pending"),
                ],
            )
            .await
            .context("eth_getTransactionCount failed")?;
        parse_quantity(&nonce_hex).context("Failed to parse nonce")
    }

    pub async fn gas_price(&self) -> Result<U256> {
        let gas_price_hex: String = self
            .json_rpc_required("eth_gasPrice", vec![])
            .await
            .context("eth_gasPrice failed")?;
        parse_quantity(&gas_price_hex).context("Failed to parse gas price")
    }

    /// Get the current block number.
    pub async fn get_block_number(&self) -> Result<u64> {
        let block_hex: String = self
            .json_rpc_required("eth_blockNumber", vec![])
            .await
            .context("eth_blockNumber failed")?;
        Ok(parse_quantity(&block_hex).context("Failed to parse block number")?.low_u64())
    }

    /// Receipt of `tx_hash`, or `None` while the transaction is pending.
    pub async fn get_transaction_receipt(&self, tx_hash: &H256) -> Result<Option<EvmReceipt>> {
        self.json_rpc(
            "eth_getTransactionReceipt",
            vec![serde_json::json!(crypto::format_h256(tx_hash))],
        )
        .await
        .context("eth_getTransactionReceipt failed")
    }

    /// Send a locally-signed transaction via eth_sendRawTransaction.
    ///
    /// Builds a legacy (pre-EIP-1559) EIP-155 transaction, signs it with `key`
    /// and broadcasts it.
    ///
    /// # Returns
    ///
    /// * `Ok(H256)` - Transaction hash reported by the node
    /// * `Err(anyhow::Error)` - Nonce/gas lookup, signing or broadcast failed
    pub async fn send_raw_transaction(
        &self,
        key: &SigningKey,
        to: &Address,
        calldata: &[u8],
        chain_id: u64,
        gas_limit: u64,
    ) -> Result<H256> {
        let from = crypto::address_of(key);

        // 1. Fetch nonce and gas price
        let nonce = self.get_transaction_count(&from).await?;
        let gas_price = self.gas_price().await?;

        // 2. RLP-encode unsigned tx for EIP-155 signing:
        //    [nonce, gasPrice, gasLimit, to, value, data, chainId, 0, 0]
        let unsigned_items: Vec<Vec<u8>> = vec![
            rlp_encode_u256(nonce),
            rlp_encode_u256(gas_price),
            rlp_encode_u64(gas_limit),
            to.as_bytes().to_vec(),
            vec![], // value = 0
            calldata.to_vec(),
            rlp_encode_u64(chain_id),
            vec![],
            vec![],
        ];
        let tx_hash = crypto::keccak256(&rlp_encode_list(&unsigned_items));

        // 3. Sign and compute EIP-155 v: recovery_id + chainId * 2 + 35
        let (r, s, recovery_id) = crypto::sign_transaction_hash(key, tx_hash.as_fixed_bytes())
            .context("Failed to sign EVM transaction")?;
        let v = (recovery_id as u64) + chain_id * 2 + 35;

        // 4. Signed tx RLP: [nonce, gasPrice, gasLimit, to, value, data, v, r, s]
        let signed_items: Vec<Vec<u8>> = vec![
            rlp_encode_u256(nonce),
            rlp_encode_u256(gas_price),
            rlp_encode_u64(gas_limit),
            to.as_bytes().to_vec(),
            vec![],
            calldata.to_vec(),
            rlp_encode_u64(v),
            trim_leading_zeros(&r),
            trim_leading_zeros(&s),
        ];
        let raw_tx = crypto::format_bytes(&rlp_encode_list(&signed_items));

        debug!(
            "EVM raw tx: nonce={}, gas_price={}, chain_id={}, from={}",
            nonce,
            gas_price,
            chain_id,
            crypto::format_address(&from)
        );

        let tx_hash_result: String = self
            .json_rpc_required("eth_sendRawTransaction", vec![serde_json::json!(raw_tx)])
            .await
            .context("eth_sendRawTransaction failed")?;

        crypto::parse_h256(&tx_hash_result)
    }
}

/// Parses a hex JSON-RPC quantity ("0x1a").
pub fn parse_quantity(value: &str) -> Result<U256> {
    let clean = crypto::strip_0x(value);
    if clean.is_empty() {
        return Ok(U256::zero());
    }
    U256::from_str_radix(clean, 16).map_err(|e| anyhow::anyhow!("Invalid quantity {}: {:?}", value, e))
}

// ============================================================================
// RLP ENCODING HELPERS (for legacy EVM transactions)
// ============================================================================

fn trim_leading_zeros(bytes: &[u8]) -> Vec<u8> {
    let start = bytes.iter().position(|&b| b != 0).unwrap_or(bytes.len());
    bytes[start..].to_vec()
}

/// Encode a u64 as big-endian bytes with no leading zeros (RLP integer format).
fn rlp_encode_u64(val: u64) -> Vec<u8> {
    trim_leading_zeros(&val.to_be_bytes())
}

fn rlp_encode_u256(val: U256) -> Vec<u8> {
    trim_leading_zeros(&abi::uint_word(val))
}

/// RLP-encode a single byte-string item.
fn rlp_encode_item(data: &[u8]) -> Vec<u8> {
    if data.len() == 1 && data[0] < 0x80 {
        vec![data[0]]
    } else if data.len() <= 55 {
        let mut out = vec![0x80 + data.len() as u8];
        out.extend_from_slice(data);
        out
    } else {
        let len_bytes = rlp_encode_u64(data.len() as u64);
        let mut out = vec![0xb7 + len_bytes.len() as u8];
        out.extend_from_slice(&len_bytes);
        out.extend_from_slice(data);
        out
    }
}

/// RLP-encode a list of items (each item is raw bytes, not yet RLP-encoded).
fn rlp_encode_list(items: &[Vec<u8>]) -> Vec<u8> {
    let payload: Vec<u8> = items.iter().flat_map(|item| rlp_encode_item(item)).collect();

    let mut out = if payload.len() <= 55 {
        vec![0xc0 + payload.len() as u8]
    } else {
        let len_bytes = rlp_encode_u64(payload.len() as u64);
        let mut prefix = vec![0xf7 + len_bytes.len() as u8];
        prefix.extend_from_slice(&len_bytes);
        prefix
    };
    out.extend(payload);
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_rlp_encode_item_short_and_empty() {
        assert_eq!(rlp_encode_item(&[]), vec![0x80]);
        assert_eq!(rlp_encode_item(&[0x7f]), vec![0x7f]);
        assert_eq!(rlp_encode_item(&[0x80]), vec![0x81, 0x80]);
    }

    #[test]
    fn test_rlp_encode_list_of_strings() {
        // ["cat", "dog"] = 0xc8 0x83 'c' 'a' 't' 0x83 'd' 'o' 'g'
        let encoded = rlp_encode_list(&[b"cat".to_vec(), b"dog".to_vec()]);
        assert_eq!(encoded, vec![0xc8, 0x83, b'c', b'a', b't', 0x83, b'd', b'o', b'g']);
    }

    #[test]
    fn test_rlp_integer_has_no_leading_zeros() {
        assert_eq!(rlp_encode_u64(0), Vec::<u8>::new());
        assert_eq!(rlp_encode_u64(1024), vec![0x04, 0x00]);
        assert_eq!(rlp_encode_u256(U256::from(1024)), vec![0x04, 0x00]);
    }

    #[test]
    fn test_parse_quantity() {
        assert_eq!(parse_quantity("0x1a").unwrap(), U256::from(26));
        assert_eq!(parse_quantity("0x").unwrap(), U256::zero());
    }
}
