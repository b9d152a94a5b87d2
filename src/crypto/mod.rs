//! Cryptographic Operations Module
//!
//! Signing utilities shared by every relay component: keccak digests, the
//! Ethereum signed-message prefix, secp256k1 signing and public-key recovery,
//! and the domain-separated message builders the ledger contracts verify.
//!
//! Every message digest starts with `keccak256(purpose)` and ends with the
//! chain id, so a signature produced for one entry point or one network can
//! never be replayed against another. The chain id is always an explicit
//! argument.
//!
//! ## Security Requirements
//!
//! **CRITICAL**: Private keys must never be logged or returned from the API.

use anyhow::{Context, Result};
use ethereum_types::{Address, H256, U256};
use k256::ecdsa::{RecoveryId, Signature as EcdsaSignature, SigningKey, VerifyingKey};
use k256::elliptic_curve::sec1::ToEncodedPoint;
use rand::rngs::OsRng;
use rand::RngCore;
use sha3::{Digest, Keccak256};

use crate::abi::{self, Token};

/// Length of an `r || s || v` signature.
pub const SIGNATURE_LEN: usize = 65;

const ETH_MESSAGE_PREFIX: &[u8] = b"\x19Ethereum Signed Message:\n32";

// ============================================================================
// MESSAGE PURPOSES
// ============================================================================

/// Domain separators, one per signed entry point.
pub mod purpose {
    pub const REGISTER_PROVISION_AGENT: &str = "RegisterProvisionAgent";
    pub const REGISTER_REFUND_AGENT: &str = "RegisterRefundAgent";
    pub const REGISTER_WITHDRAWAL_AGENT: &str = "RegisterWithdrawalAgent";
    pub const CHANGE_TO_LOYALTY_TOKEN: &str = "ChangeToLoyaltyToken";
    pub const CHANGE_TO_PAYABLE_POINT: &str = "ChangeToPayablePoint";
    pub const OPEN_NEW_PAYMENT: &str = "OpenNewLoyaltyPayment";
    pub const OPEN_CANCEL_PAYMENT: &str = "OpenCancelLoyaltyPayment";
    pub const BRIDGE_TRANSFER: &str = "BridgeTransfer";
    pub const PURCHASE: &str = "Purchase";
    pub const PURCHASE_BATCH: &str = "PurchaseBatch";
    pub const CURRENCY_RATE: &str = "CurrencyRate";
    pub const CURRENCY_RATE_BATCH: &str = "CurrencyRateBatch";
    pub const PROPOSE: &str = "Propose";
}

// ============================================================================
// HASHING
// ============================================================================

pub fn keccak256(data: &[u8]) -> H256 {
    H256::from_slice(&Keccak256::digest(data))
}

pub fn purpose_hash(purpose: &str) -> H256 {
    keccak256(purpose.as_bytes())
}

/// Applies the Ethereum signed-message prefix:
/// keccak256("\x19Ethereum Signed Message:\n32" || digest)
pub fn eth_signed_message_hash(digest: &H256) -> H256 {
    let mut prefixed = Vec::with_capacity(ETH_MESSAGE_PREFIX.len() + 32);
    prefixed.extend_from_slice(ETH_MESSAGE_PREFIX);
    prefixed.extend_from_slice(digest.as_bytes());
    keccak256(&prefixed)
}

/// Hashes `purpose`, the given fields and the chain id as one ABI-encoded tuple.
fn domain_digest(purpose: &str, fields: Vec<Token>, chain_id: u64) -> H256 {
    let mut tokens = Vec::with_capacity(fields.len() + 2);
    tokens.push(Token::FixedBytes(purpose_hash(purpose)));
    tokens.extend(fields);
    tokens.push(Token::uint(chain_id));
    keccak256(&abi::encode(&tokens))
}

// ============================================================================
// MESSAGE BUILDERS
// ============================================================================

/// Generic account-scoped message: (purpose, account, nonce, chainId).
pub fn account_message(purpose: &str, account: &Address, nonce: U256, chain_id: u64) -> H256 {
    domain_digest(
        purpose,
        vec![Token::Address(*account), Token::Uint(nonce)],
        chain_id,
    )
}

/// Message an account signs to register `agent` for one of its agent roles.
pub fn agent_message(
    purpose: &str,
    account: &Address,
    agent: &Address,
    nonce: U256,
    chain_id: u64,
) -> H256 {
    domain_digest(
        purpose,
        vec![
            Token::Address(*account),
            Token::Address(*agent),
            Token::Uint(nonce),
        ],
        chain_id,
    )
}

/// Message binding a phone hash to an account when points become payable.
pub fn payable_point_message(
    phone_hash: &H256,
    account: &Address,
    nonce: U256,
    chain_id: u64,
) -> H256 {
    domain_digest(
        purpose::CHANGE_TO_PAYABLE_POINT,
        vec![
            Token::FixedBytes(*phone_hash),
            Token::Address(*account),
            Token::Uint(nonce),
        ],
        chain_id,
    )
}

/// Fields of a new-payment approval.
#[derive(Debug, Clone)]
pub struct NewPaymentMessage<'a> {
    pub payment_id: H256,
    pub purchase_id: &'a str,
    pub amount: U256,
    pub currency: &'a str,
    pub shop_id: H256,
    pub account: Address,
    pub nonce: U256,
}

/// Digest over (paymentId, purchaseId, amount, currency, shopId, account, nonce, chainId).
pub fn new_payment_message(message: &NewPaymentMessage<'_>, chain_id: u64) -> H256 {
    domain_digest(
        purpose::OPEN_NEW_PAYMENT,
        vec![
            Token::FixedBytes(message.payment_id),
            Token::String(message.purchase_id.to_string()),
            Token::Uint(message.amount),
            Token::String(message.currency.to_string()),
            Token::FixedBytes(message.shop_id),
            Token::Address(message.account),
            Token::Uint(message.nonce),
        ],
        chain_id,
    )
}

/// Digest a shop signs to approve cancelling one of its payments.
pub fn cancel_payment_message(
    payment_id: &H256,
    purchase_id: &str,
    shop_account: &Address,
    nonce: U256,
    chain_id: u64,
) -> H256 {
    domain_digest(
        purpose::OPEN_CANCEL_PAYMENT,
        vec![
            Token::FixedBytes(*payment_id),
            Token::String(purchase_id.to_string()),
            Token::Address(*shop_account),
            Token::Uint(nonce),
        ],
        chain_id,
    )
}

/// Bridge transfer authorization over (chainId, token, from, to, amount, nonce, expiry).
pub fn transfer_message(
    chain_id: u64,
    token: &Address,
    from: &Address,
    to: &Address,
    amount: U256,
    nonce: U256,
    expiry: u64,
) -> H256 {
    let tokens = vec![
        Token::FixedBytes(purpose_hash(purpose::BRIDGE_TRANSFER)),
        Token::uint(chain_id),
        Token::Address(*token),
        Token::Address(*from),
        Token::Address(*to),
        Token::Uint(amount),
        Token::Uint(nonce),
        Token::uint(expiry),
    ];
    keccak256(&abi::encode(&tokens))
}

// ============================================================================
// SIGNING AND RECOVERY
// ============================================================================

/// Signs a message digest the way wallets do for `personal_sign`: the digest is
/// prefixed, hashed and signed, and the result is `r || s || v` with v in {27, 28}.
pub fn sign_digest(key: &SigningKey, digest: &H256) -> Result<Vec<u8>> {
    let prefixed = eth_signed_message_hash(digest);
    let (signature, recovery_id) = key
        .sign_prehash_recoverable(prefixed.as_bytes())
        .map_err(|e| anyhow::anyhow!("Failed to sign digest: {}", e))?;

    let mut out = Vec::with_capacity(SIGNATURE_LEN);
    out.extend_from_slice(&signature.to_bytes());
    out.push(27 + recovery_id.to_byte());
    Ok(out)
}

/// Signs a raw transaction hash (no message prefix).
///
/// # Returns
///
/// * `Ok((r, s, recovery_id))` - r and s are 32-byte big-endian, recovery_id is 0 or 1
pub fn sign_transaction_hash(key: &SigningKey, tx_hash: &[u8; 32]) -> Result<([u8; 32], [u8; 32], u8)> {
    let (signature, recovery_id) = key
        .sign_prehash_recoverable(tx_hash)
        .map_err(|e| anyhow::anyhow!("Failed to sign transaction hash: {}", e))?;

    let sig_bytes = signature.to_bytes();
    let mut r = [0u8; 32];
    let mut s = [0u8; 32];
    r.copy_from_slice(&sig_bytes[..32]);
    s.copy_from_slice(&sig_bytes[32..64]);
    Ok((r, s, recovery_id.to_byte()))
}

/// Recovers the address that produced `signature` over `digest`
/// (with the signed-message prefix applied).
pub fn recover_signer(digest: &H256, signature: &[u8]) -> Result<Address> {
    if signature.len() != SIGNATURE_LEN {
        anyhow::bail!(
            "Invalid signature length: expected {} bytes, got {}",
            SIGNATURE_LEN,
            signature.len()
        );
    }

    let v = signature[64];
    let recovery_byte = match v {
        27 | 28 => v - 27,
        0 | 1 => v,
        _ => anyhow::bail!("Invalid recovery byte {}", v),
    };
    let recovery_id =
        RecoveryId::from_byte(recovery_byte).context("Invalid recovery id")?;
    let signature = EcdsaSignature::from_slice(&signature[..64])
        .map_err(|e| anyhow::anyhow!("Malformed signature: {}", e))?;

    let prefixed = eth_signed_message_hash(digest);
    let key = VerifyingKey::recover_from_prehash(prefixed.as_bytes(), &signature, recovery_id)
        .map_err(|e| anyhow::anyhow!("Signature recovery failed: {}", e))?;
    Ok(address_of_verifying_key(&key))
}

/// Whether `signature` over `digest` was produced by `account`.
/// Malformed signatures verify as `false`.
pub fn verify_signature(account: &Address, digest: &H256, signature: &[u8]) -> bool {
    matches!(recover_signer(digest, signature), Ok(signer) if signer == *account)
}

// ============================================================================
// KEYS AND ADDRESSES
// ============================================================================

/// Derives the Ethereum address: keccak256(uncompressed_public_key[1..])[12..].
pub fn address_of_verifying_key(key: &VerifyingKey) -> Address {
    let point = key.to_encoded_point(false);
    let hash = keccak256(&point.as_bytes()[1..]);
    Address::from_slice(&hash.as_bytes()[12..])
}

pub fn address_of(key: &SigningKey) -> Address {
    address_of_verifying_key(key.verifying_key())
}

/// Parses a hex-encoded secp256k1 private key (with or without 0x).
pub fn parse_private_key(hex_key: &str) -> Result<SigningKey> {
    let bytes = hex::decode(strip_0x(hex_key.trim())).context("Private key is not valid hex")?;
    SigningKey::from_slice(&bytes).map_err(|e| anyhow::anyhow!("Invalid secp256k1 private key: {}", e))
}

pub fn generate_key() -> SigningKey {
    SigningKey::random(&mut OsRng)
}

/// 32 bytes from the operating system CSPRNG.
pub fn random_h256() -> H256 {
    let mut bytes = [0u8; 32];
    OsRng.fill_bytes(&mut bytes);
    H256::from(bytes)
}

// ============================================================================
// HEX HELPERS
// ============================================================================

pub fn strip_0x(value: &str) -> &str {
    value.strip_prefix("0x").unwrap_or(value)
}

pub fn hex_to_bytes(value: &str) -> Result<Vec<u8>> {
    hex::decode(strip_0x(value)).with_context(|| format!("Invalid hex: {}", value))
}

pub fn parse_address(value: &str) -> Result<Address> {
    let bytes = hex_to_bytes(value)?;
    if bytes.len() != 20 {
        anyhow::bail!("Invalid address {}: expected 20 bytes, got {}", value, bytes.len());
    }
    Ok(Address::from_slice(&bytes))
}

pub fn parse_h256(value: &str) -> Result<H256> {
    let bytes = hex_to_bytes(value)?;
    if bytes.len() != 32 {
        anyhow::bail!("Invalid 32-byte value {}: got {} bytes", value, bytes.len());
    }
    Ok(H256::from_slice(&bytes))
}

/// Full lowercase 0x form (ethereum-types' `Display` abbreviates).
pub fn format_address(addr: &Address) -> String {
    format!("0x{}", hex::encode(addr.as_bytes()))
}

pub fn format_h256(value: &H256) -> String {
    format!("0x{}", hex::encode(value.as_bytes()))
}

pub fn format_bytes(value: &[u8]) -> String {
    format!("0x{}", hex::encode(value))
}

// ============================================================================
// SERDE HELPERS
// ============================================================================

/// Serializes byte strings as 0x-prefixed hex.
pub mod serde_hex {
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(bytes: &[u8], serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&super::format_bytes(bytes))
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Vec<u8>, D::Error> {
        let value = String::deserialize(deserializer)?;
        super::hex_to_bytes(&value).map_err(serde::de::Error::custom)
    }
}

/// Serializes a U256 as a decimal string (amounts on the wire).
pub mod serde_u256_dec {
    use ethereum_types::U256;
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(value: &U256, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&value.to_string())
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<U256, D::Error> {
        let value = String::deserialize(deserializer)?;
        super::parse_amount(&value).map_err(serde::de::Error::custom)
    }
}

/// Parses a decimal amount string.
pub fn parse_amount(value: &str) -> Result<U256> {
    let trimmed = value.trim();
    if trimmed.is_empty() || !trimmed.chars().all(|c| c.is_ascii_digit()) {
        anyhow::bail!("Invalid amount '{}': expected a decimal integer", value);
    }
    U256::from_dec_str(trimmed).map_err(|e| anyhow::anyhow!("Invalid amount '{}': {:?}", value, e))
}
