//! Validator Batch-Commit Module
//!
//! Off-chain purchase records and currency-rate tables reach the ledger only under
//! quorum agreement, in two signing rounds:
//!
//! 1. Each record is hashed with its fields and the chain id. The ordered record
//!    hashes, the batch `height` and its length are hashed into the **batch digest**.
//! 2. Validators sign the batch digest independently.
//! 3. The **propose digest** covers the batch metadata, the batch digest and the
//!    hash of every collected signature, in order.
//! 4. A single proposer signs the propose digest.
//! 5. Batch, validator signatures and proposer signature go on chain in one
//!    transaction; the contract repeats the checks of [`ValidatorSet::verify_commit`].
//!
//! Binding the proposer signature to the exact signature list rules out mixing
//! signatures across batches or silently dropping them. `height` is tracked on
//! chain and must advance by one per commit.

use ethereum_types::{Address, H256, U256};
use k256::ecdsa::SigningKey;
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::sync::Arc;
use thiserror::Error;
use tracing::{info, warn};

use crate::abi::{self, Token};
use crate::config::{Network, ValidatorConfig};
use crate::crypto::{self, purpose};
use crate::error::{RelayError, RelayResult};
use crate::gateway::{BatchKind, ContractCall, ContractGateway};
use crate::signer_pool::SignerPool;

// ============================================================================
// RECORDS
// ============================================================================

/// One purchase, signed by the system that observed it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PurchaseRecord {
    pub purchase_id: String,
    #[serde(with = "crypto::serde_u256_dec")]
    pub amount: U256,
    #[serde(with = "crypto::serde_u256_dec")]
    pub loyalty: U256,
    pub currency: String,
    pub shop_id: H256,
    pub account: Address,
    pub phone_hash: H256,
    pub sender: Address,
    #[serde(with = "crypto::serde_hex")]
    pub sender_signature: Vec<u8>,
}

impl PurchaseRecord {
    pub fn record_hash(&self, chain_id: u64) -> H256 {
        crypto::keccak256(&abi::encode(&[
            Token::FixedBytes(crypto::purpose_hash(purpose::PURCHASE)),
            Token::String(self.purchase_id.clone()),
            Token::Uint(self.amount),
            Token::Uint(self.loyalty),
            Token::String(self.currency.clone()),
            Token::FixedBytes(self.shop_id),
            Token::Address(self.account),
            Token::FixedBytes(self.phone_hash),
            Token::Address(self.sender),
            Token::uint(chain_id),
        ]))
    }

    /// Tuple layout used by `savePurchase`.
    pub fn to_token(&self) -> Token {
        Token::Tuple(vec![
            Token::String(self.purchase_id.clone()),
            Token::Uint(self.amount),
            Token::Uint(self.loyalty),
            Token::String(self.currency.clone()),
            Token::FixedBytes(self.shop_id),
            Token::Address(self.account),
            Token::FixedBytes(self.phone_hash),
            Token::Address(self.sender),
            Token::Bytes(self.sender_signature.clone()),
        ])
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PurchaseBatch {
    #[serde(with = "crypto::serde_u256_dec")]
    pub height: U256,
    pub chain_id: u64,
    pub records: Vec<PurchaseRecord>,
}

impl PurchaseBatch {
    pub fn record_hashes(&self) -> Vec<H256> {
        self.records.iter().map(|r| r.record_hash(self.chain_id)).collect()
    }

    pub fn digest(&self) -> H256 {
        batch_digest(BatchKind::Purchase, self.height, &self.record_hashes(), self.chain_id)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CurrencyRate {
    pub symbol: String,
    #[serde(with = "crypto::serde_u256_dec")]
    pub rate: U256,
}

impl CurrencyRate {
    pub fn record_hash(&self, chain_id: u64) -> H256 {
        crypto::keccak256(&abi::encode(&[
            Token::FixedBytes(crypto::purpose_hash(purpose::CURRENCY_RATE)),
            Token::String(self.symbol.clone()),
            Token::Uint(self.rate),
            Token::uint(chain_id),
        ]))
    }

    pub fn to_token(&self) -> Token {
        Token::Tuple(vec![Token::String(self.symbol.clone()), Token::Uint(self.rate)])
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CurrencyRateSet {
    #[serde(with = "crypto::serde_u256_dec")]
    pub height: U256,
    pub chain_id: u64,
    pub rates: Vec<CurrencyRate>,
}

impl CurrencyRateSet {
    pub fn record_hashes(&self) -> Vec<H256> {
        self.rates.iter().map(|r| r.record_hash(self.chain_id)).collect()
    }

    pub fn digest(&self) -> H256 {
        batch_digest(BatchKind::CurrencyRate, self.height, &self.record_hashes(), self.chain_id)
    }
}

// ============================================================================
// DIGESTS
// ============================================================================

fn kind_purpose(kind: BatchKind) -> &'static str {
    match kind {
        BatchKind::Purchase => purpose::PURCHASE_BATCH,
        BatchKind::CurrencyRate => purpose::CURRENCY_RATE_BATCH,
    }
}

/// Digest validators sign: kind, height, length and the ordered record hashes.
pub fn batch_digest(kind: BatchKind, height: U256, record_hashes: &[H256], chain_id: u64) -> H256 {
    crypto::keccak256(&abi::encode(&[
        Token::FixedBytes(crypto::purpose_hash(kind_purpose(kind))),
        Token::Uint(height),
        Token::uint(record_hashes.len() as u64),
        Token::Array(record_hashes.iter().map(|h| Token::FixedBytes(*h)).collect()),
        Token::uint(chain_id),
    ]))
}

/// Digest the proposer signs: batch metadata plus the hash of each collected
/// validator signature, in submission order.
pub fn propose_digest(
    kind: BatchKind,
    height: U256,
    length: usize,
    batch_digest: &H256,
    validator_signatures: &[Vec<u8>],
    chain_id: u64,
) -> H256 {
    let signature_hashes: Vec<Token> = validator_signatures
        .iter()
        .map(|sig| Token::FixedBytes(crypto::keccak256(sig)))
        .collect();
    crypto::keccak256(&abi::encode(&[
        Token::FixedBytes(crypto::purpose_hash(purpose::PROPOSE)),
        Token::FixedBytes(crypto::purpose_hash(kind_purpose(kind))),
        Token::Uint(height),
        Token::uint(length as u64),
        Token::FixedBytes(*batch_digest),
        Token::Array(signature_hashes),
        Token::uint(chain_id),
    ]))
}

/// Validator round: sign a batch digest.
pub fn sign_batch(key: &SigningKey, batch_digest: &H256) -> anyhow::Result<Vec<u8>> {
    crypto::sign_digest(key, batch_digest)
}

// ============================================================================
// VERIFICATION
// ============================================================================

#[derive(Debug, Error, PartialEq, Eq)]
pub enum CommitError {
    #[error("malformed batch: {0}")]
    Malformed(String),

    #[error("validator signature {index} does not recover to a recognised validator")]
    UnknownSigner { index: usize },

    #[error("validator signature {index} repeats an earlier signer")]
    DuplicateSigner { index: usize },

    #[error("{got} valid validator signatures, threshold is {need}")]
    BelowThreshold { got: usize, need: usize },

    #[error("proposer signature does not recover to a recognised validator")]
    InvalidProposer,

    #[error("purchase {index} sender signature does not recover to its sender")]
    InvalidSender { index: usize },
}

impl From<CommitError> for RelayError {
    fn from(err: CommitError) -> Self {
        match err {
            CommitError::Malformed(_) | CommitError::BelowThreshold { .. } => {
                RelayError::Validation(err.to_string())
            }
            _ => RelayError::InvalidSignature(err.to_string()),
        }
    }
}

/// A commit as the contract sees it.
pub struct CommitProof<'a> {
    pub kind: BatchKind,
    pub height: U256,
    pub length: usize,
    pub chain_id: u64,
    pub batch_digest: H256,
    pub validator_signatures: &'a [Vec<u8>],
    pub proposer_signature: &'a [u8],
}

/// Recognised validators and the quorum threshold.
#[derive(Debug, Clone)]
pub struct ValidatorSet {
    validators: HashSet<Address>,
    threshold: usize,
}

impl ValidatorSet {
    pub fn new(validators: impl IntoIterator<Item = Address>, threshold: usize) -> Self {
        Self {
            validators: validators.into_iter().collect(),
            threshold,
        }
    }

    pub fn from_config(config: &ValidatorConfig) -> anyhow::Result<Self> {
        let validators = config
            .validators
            .iter()
            .map(|v| crypto::parse_address(v))
            .collect::<anyhow::Result<Vec<_>>>()?;
        Ok(Self::new(validators, config.threshold))
    }

    pub fn threshold(&self) -> usize {
        self.threshold
    }

    pub fn contains(&self, address: &Address) -> bool {
        self.validators.contains(address)
    }

    /// Checks a commit the way the contract does: every validator signature
    /// recovers to a distinct recognised validator, their number reaches the
    /// threshold, and the proposer signature over the propose digest recovers
    /// to a recognised validator.
    pub fn verify_commit(&self, proof: &CommitProof<'_>) -> Result<(), CommitError> {
        if proof.length == 0 {
            return Err(CommitError::Malformed("empty batch".to_string()));
        }

        let mut seen = HashSet::new();
        for (index, signature) in proof.validator_signatures.iter().enumerate() {
            let signer = crypto::recover_signer(&proof.batch_digest, signature)
                .map_err(|_| CommitError::UnknownSigner { index })?;
            if !self.validators.contains(&signer) {
                return Err(CommitError::UnknownSigner { index });
            }
            if !seen.insert(signer) {
                return Err(CommitError::DuplicateSigner { index });
            }
        }

        if seen.len() < self.threshold {
            return Err(CommitError::BelowThreshold {
                got: seen.len(),
                need: self.threshold,
            });
        }

        let propose = propose_digest(
            proof.kind,
            proof.height,
            proof.length,
            &proof.batch_digest,
            proof.validator_signatures,
            proof.chain_id,
        );
        match crypto::recover_signer(&propose, proof.proposer_signature) {
            Ok(proposer) if self.validators.contains(&proposer) => Ok(()),
            _ => Err(CommitError::InvalidProposer),
        }
    }
}

/// Sender signatures of every purchase record.
pub fn verify_purchase_senders(batch: &PurchaseBatch) -> Result<(), CommitError> {
    for (index, record) in batch.records.iter().enumerate() {
        let hash = record.record_hash(batch.chain_id);
        if !crypto::verify_signature(&record.sender, &hash, &record.sender_signature) {
            return Err(CommitError::InvalidSender { index });
        }
    }
    Ok(())
}

// ============================================================================
// COMMITTER
// ============================================================================

/// Result of a submitted commit.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CommitReceipt {
    #[serde(with = "crypto::serde_u256_dec")]
    pub height: U256,
    pub batch_digest: H256,
    pub tx_hash: H256,
}

/// Proposer role: verifies collected validator signatures, endorses them and
/// submits the batch on the side chain.
pub struct BatchCommitter {
    gateway: Arc<dyn ContractGateway>,
    signer_pool: Arc<SignerPool>,
    validators: ValidatorSet,
    proposer_key: SigningKey,
}

impl BatchCommitter {
    pub fn new(
        gateway: Arc<dyn ContractGateway>,
        signer_pool: Arc<SignerPool>,
        validators: ValidatorSet,
        proposer_key: SigningKey,
    ) -> Self {
        Self {
            gateway,
            signer_pool,
            validators,
            proposer_key,
        }
    }

    pub fn proposer_address(&self) -> Address {
        crypto::address_of(&self.proposer_key)
    }

    /// Checks chain id and that `height` is the next height after the chain's.
    async fn check_height(&self, kind: BatchKind, height: U256, chain_id: u64) -> RelayResult<()> {
        if chain_id != self.gateway.chain_id() {
            return Err(RelayError::validation(format!(
                "batch chain id {} does not match network chain id {}",
                chain_id,
                self.gateway.chain_id()
            )));
        }
        let latest = self.gateway.latest_height(kind).await?;
        if height != latest + U256::one() {
            return Err(RelayError::validation(format!(
                "batch height {} is not the next height after {}",
                height, latest
            )));
        }
        Ok(())
    }

    /// Proposer signature over the given validator signatures, verified as a whole commit.
    fn endorse(
        &self,
        kind: BatchKind,
        height: U256,
        length: usize,
        chain_id: u64,
        batch_digest: H256,
        validator_signatures: &[Vec<u8>],
    ) -> RelayResult<Vec<u8>> {
        let propose = propose_digest(kind, height, length, &batch_digest, validator_signatures, chain_id);
        let proposer_signature = crypto::sign_digest(&self.proposer_key, &propose)
            .map_err(|e| RelayError::Internal(e.to_string()))?;

        self.validators.verify_commit(&CommitProof {
            kind,
            height,
            length,
            chain_id,
            batch_digest,
            validator_signatures,
            proposer_signature: &proposer_signature,
        })?;
        Ok(proposer_signature)
    }

    /// Commits a purchase batch.
    ///
    /// # Arguments
    ///
    /// * `batch` - Records tagged with height and chain id
    /// * `validator_signatures` - Validator signatures over the batch digest
    pub async fn commit_purchases(
        &self,
        batch: PurchaseBatch,
        validator_signatures: Vec<Vec<u8>>,
    ) -> RelayResult<CommitReceipt> {
        self.check_height(BatchKind::Purchase, batch.height, batch.chain_id).await?;
        verify_purchase_senders(&batch)?;

        let digest = batch.digest();
        let proposer_signature = self.endorse(
            BatchKind::Purchase,
            batch.height,
            batch.records.len(),
            batch.chain_id,
            digest,
            &validator_signatures,
        )?;

        let height = batch.height;
        let lease = self.signer_pool.acquire(Network::Side).await?;
        let tx_hash = self
            .gateway
            .send(
                &lease,
                ContractCall::SavePurchase {
                    batch,
                    validator_signatures,
                    proposer_signature,
                },
            )
            .await
            .map_err(|e| {
                warn!("savePurchase at height {} failed: {}", height, e);
                RelayError::from(e)
            })?;

        info!("Committed purchase batch height={} tx={}", height, crypto::format_h256(&tx_hash));
        Ok(CommitReceipt {
            height,
            batch_digest: digest,
            tx_hash,
        })
    }

    /// Commits a currency rate table.
    pub async fn commit_rates(
        &self,
        rates: CurrencyRateSet,
        validator_signatures: Vec<Vec<u8>>,
    ) -> RelayResult<CommitReceipt> {
        self.check_height(BatchKind::CurrencyRate, rates.height, rates.chain_id).await?;

        let digest = rates.digest();
        let proposer_signature = self.endorse(
            BatchKind::CurrencyRate,
            rates.height,
            rates.rates.len(),
            rates.chain_id,
            digest,
            &validator_signatures,
        )?;

        let height = rates.height;
        let lease = self.signer_pool.acquire(Network::Side).await?;
        let tx_hash = self
            .gateway
            .send(
                &lease,
                ContractCall::SetCurrencyRates {
                    rates,
                    validator_signatures,
                    proposer_signature,
                },
            )
            .await?;

        info!("Committed currency rates height={} tx={}", height, crypto::format_h256(&tx_hash));
        Ok(CommitReceipt {
            height,
            batch_digest: digest,
            tx_hash,
        })
    }
}
