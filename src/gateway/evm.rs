//! EVM Contract Gateway
//!
//! [`ContractGateway`] over JSON-RPC. Reads are `eth_call`s against the configured
//! contracts. Writes are simulated from the leased signer first so a revert is
//! reported synchronously with its reason, then signed locally and broadcast.

use anyhow::Context;
use async_trait::async_trait;
use ethereum_types::{Address, H256, U256};
use std::time::Duration;
use tracing::{info, warn};

use super::{
    AgentKind, BatchKind, ContractCall, ContractGateway, GatewayResult, OnChainPaymentState,
    TxOutcome,
};
use crate::abi::{self, Token};
use crate::config::{EvmChainConfig, Network, RelayConfig};
use crate::crypto;
use crate::error::GatewayError;
use crate::evm_client::EvmClient;
use crate::signer_pool::SignerLease;

/// Contract addresses of one network. Side-chain-only contracts are optional.
#[derive(Debug, Clone)]
pub struct EvmContracts {
    pub token: Address,
    pub bridge: Address,
    pub ledger: Option<Address>,
    pub shop: Option<Address>,
    pub purchase: Option<Address>,
    pub currency_rate: Option<Address>,
}

impl EvmContracts {
    pub fn from_config(chain: &EvmChainConfig) -> anyhow::Result<Self> {
        let optional = |value: &Option<String>| -> anyhow::Result<Option<Address>> {
            value.as_deref().map(crypto::parse_address).transpose()
        };
        Ok(Self {
            token: crypto::parse_address(&chain.token_address).context("token_address")?,
            bridge: crypto::parse_address(&chain.bridge_address).context("bridge_address")?,
            ledger: optional(&chain.ledger_address).context("ledger_address")?,
            shop: optional(&chain.shop_address).context("shop_address")?,
            purchase: optional(&chain.purchase_address).context("purchase_address")?,
            currency_rate: optional(&chain.currency_rate_address).context("currency_rate_address")?,
        })
    }
}

pub struct EvmContractGateway {
    network: Network,
    chain_id: u64,
    client: EvmClient,
    contracts: EvmContracts,
    gas_limit: u64,
}

impl EvmContractGateway {
    pub fn new(network: Network, client: EvmClient, chain_id: u64, contracts: EvmContracts, gas_limit: u64) -> Self {
        Self {
            network,
            chain_id,
            client,
            contracts,
            gas_limit,
        }
    }

    /// Builds the gateway of `network` from its chain section.
    pub fn from_config(network: Network, chain: &EvmChainConfig, relay: &RelayConfig) -> anyhow::Result<Self> {
        let client = EvmClient::new(&chain.rpc_url, Duration::from_millis(relay.rpc_timeout_ms))?;
        let contracts = EvmContracts::from_config(chain)
            .with_context(|| format!("Invalid contract address for {}", chain.name))?;
        info!(
            "{} gateway: chain_id={}, rpc={}",
            network, chain.chain_id, chain.rpc_url
        );
        Ok(Self::new(network, client, chain.chain_id, contracts, relay.gas_limit))
    }

    fn require(&self, contract: Option<Address>, name: &str) -> GatewayResult<Address> {
        contract.ok_or_else(|| {
            GatewayError::Transport(anyhow::anyhow!(
                "No {} contract configured on {} network",
                name,
                self.network
            ))
        })
    }

    fn ledger(&self) -> GatewayResult<Address> {
        self.require(self.contracts.ledger, "ledger")
    }

    async fn view(&self, to: Address, signature: &str, args: &[Token]) -> GatewayResult<Vec<u8>> {
        let data = abi::encode_call(signature, args);
        self.client.call(None, &to, &data).await
    }

    async fn view_uint(&self, to: Address, signature: &str, args: &[Token]) -> GatewayResult<U256> {
        let out = self.view(to, signature, args).await?;
        Ok(abi::decode_uint(&out, 0).with_context(|| format!("Failed to decode {}", signature))?)
    }

    async fn view_address(&self, to: Address, signature: &str, args: &[Token]) -> GatewayResult<Option<Address>> {
        let out = self.view(to, signature, args).await?;
        let address = abi::decode_address(&out, 0).with_context(|| format!("Failed to decode {}", signature))?;
        Ok(if address.is_zero() { None } else { Some(address) })
    }

    /// Target contract and calldata of a write.
    fn encode(&self, call: &ContractCall) -> GatewayResult<(Address, Vec<u8>)> {
        let encoded = match call {
            ContractCall::RegisterAgent {
                account,
                agent,
                signature,
                ..
            } => (
                self.ledger()?,
                abi::encode_call(
                    &format!("{}(address,address,bytes)", call.name()),
                    &[
                        Token::Address(*account),
                        Token::Address(*agent),
                        Token::Bytes(signature.clone()),
                    ],
                ),
            ),
            ContractCall::ChangeToLoyaltyToken { account, signature } => (
                self.ledger()?,
                abi::encode_call(
                    "changeToLoyaltyToken(address,bytes)",
                    &[Token::Address(*account), Token::Bytes(signature.clone())],
                ),
            ),
            ContractCall::ChangeToPayablePoint {
                phone_hash,
                account,
                signature,
            } => (
                self.ledger()?,
                abi::encode_call(
                    "changeToPayablePoint(bytes32,address,bytes)",
                    &[
                        Token::FixedBytes(*phone_hash),
                        Token::Address(*account),
                        Token::Bytes(signature.clone()),
                    ],
                ),
            ),
            ContractCall::OpenNewPayment {
                payment_id,
                purchase_id,
                amount,
                currency,
                shop_id,
                account,
                signature,
                secret_lock,
            } => (
                self.ledger()?,
                abi::encode_call(
                    "openNewLoyaltyPayment(bytes32,string,uint256,string,bytes32,address,bytes,bytes32)",
                    &[
                        Token::FixedBytes(*payment_id),
                        Token::String(purchase_id.clone()),
                        Token::Uint(*amount),
                        Token::String(currency.clone()),
                        Token::FixedBytes(*shop_id),
                        Token::Address(*account),
                        Token::Bytes(signature.clone()),
                        Token::FixedBytes(*secret_lock),
                    ],
                ),
            ),
            ContractCall::CloseNewPayment {
                payment_id,
                secret,
                confirm,
            } => (
                self.ledger()?,
                abi::encode_call(
                    "closeNewLoyaltyPayment(bytes32,bytes32,bool)",
                    &[
                        Token::FixedBytes(*payment_id),
                        Token::FixedBytes(*secret),
                        Token::Bool(*confirm),
                    ],
                ),
            ),
            ContractCall::OpenCancelPayment {
                payment_id,
                purchase_id,
                shop_account,
                signature,
                secret_lock,
            } => (
                self.ledger()?,
                abi::encode_call(
                    "openCancelLoyaltyPayment(bytes32,string,address,bytes,bytes32)",
                    &[
                        Token::FixedBytes(*payment_id),
                        Token::String(purchase_id.clone()),
                        Token::Address(*shop_account),
                        Token::Bytes(signature.clone()),
                        Token::FixedBytes(*secret_lock),
                    ],
                ),
            ),
            ContractCall::CloseCancelPayment {
                payment_id,
                secret,
                confirm,
            } => (
                self.ledger()?,
                abi::encode_call(
                    "closeCancelLoyaltyPayment(bytes32,bytes32,bool)",
                    &[
                        Token::FixedBytes(*payment_id),
                        Token::FixedBytes(*secret),
                        Token::Bool(*confirm),
                    ],
                ),
            ),
            ContractCall::DepositToBridge {
                token_id,
                deposit_id,
                account,
                amount,
                expiry,
                signature,
            } => (
                self.contracts.bridge,
                abi::encode_call(
                    "depositToBridge(bytes32,bytes32,address,uint256,uint256,bytes)",
                    &[
                        Token::FixedBytes(*token_id),
                        Token::FixedBytes(*deposit_id),
                        Token::Address(*account),
                        Token::Uint(*amount),
                        Token::uint(*expiry),
                        Token::Bytes(signature.clone()),
                    ],
                ),
            ),
            ContractCall::SavePurchase {
                batch,
                validator_signatures,
                proposer_signature,
            } => (
                self.require(self.contracts.purchase, "purchase")?,
                abi::encode_call(
                    "savePurchase(uint256,(string,uint256,uint256,string,bytes32,address,bytes32,address,bytes)[],bytes[],bytes)",
                    &[
                        Token::Uint(batch.height),
                        Token::Array(batch.records.iter().map(|r| r.to_token()).collect()),
                        signatures_token(validator_signatures),
                        Token::Bytes(proposer_signature.clone()),
                    ],
                ),
            ),
            ContractCall::SetCurrencyRates {
                rates,
                validator_signatures,
                proposer_signature,
            } => (
                self.require(self.contracts.currency_rate, "currency rate")?,
                abi::encode_call(
                    "setCurrencyRates(uint256,(string,uint256)[],bytes[],bytes)",
                    &[
                        Token::Uint(rates.height),
                        Token::Array(rates.rates.iter().map(|r| r.to_token()).collect()),
                        signatures_token(validator_signatures),
                        Token::Bytes(proposer_signature.clone()),
                    ],
                ),
            ),
        };
        Ok(encoded)
    }
}

fn signatures_token(signatures: &[Vec<u8>]) -> Token {
    Token::Array(signatures.iter().map(|s| Token::Bytes(s.clone())).collect())
}

#[async_trait]
impl ContractGateway for EvmContractGateway {
    fn network(&self) -> Network {
        self.network
    }

    fn chain_id(&self) -> u64 {
        self.chain_id
    }

    fn token_address(&self) -> Address {
        self.contracts.token
    }

    fn bridge_address(&self) -> Address {
        self.contracts.bridge
    }

    async fn ledger_nonce_of(&self, account: &Address) -> GatewayResult<U256> {
        self.view_uint(self.ledger()?, "nonceOf(address)", &[Token::Address(*account)])
            .await
    }

    async fn token_nonce_of(&self, account: &Address) -> GatewayResult<U256> {
        self.view_uint(self.contracts.token, "nonceOf(address)", &[Token::Address(*account)])
            .await
    }

    async fn balance_of(&self, account: &Address) -> GatewayResult<U256> {
        self.view_uint(self.contracts.token, "balanceOf(address)", &[Token::Address(*account)])
            .await
    }

    async fn agent_of(&self, kind: AgentKind, account: &Address) -> GatewayResult<Option<Address>> {
        let signature = format!("{}AgentOf(address)", kind.as_str());
        self.view_address(self.ledger()?, &signature, &[Token::Address(*account)])
            .await
    }

    async fn shop_account(&self, shop_id: &H256) -> GatewayResult<Option<Address>> {
        let shop = self.require(self.contracts.shop, "shop")?;
        self.view_address(shop, "shopAccountOf(bytes32)", &[Token::FixedBytes(*shop_id)])
            .await
    }

    async fn payment_state(&self, payment_id: &H256) -> GatewayResult<OnChainPaymentState> {
        let raw = self
            .view_uint(
                self.ledger()?,
                "loyaltyPaymentStatusOf(bytes32)",
                &[Token::FixedBytes(*payment_id)],
            )
            .await?;
        if raw > U256::from(u8::MAX) {
            return Err(anyhow::anyhow!("Payment status {} out of range", raw).into());
        }
        OnChainPaymentState::from_u8(raw.low_u32() as u8)
            .ok_or_else(|| anyhow::anyhow!("Unknown payment status {}", raw).into())
    }

    async fn is_available_deposit_id(&self, deposit_id: &H256) -> GatewayResult<bool> {
        let out = self
            .view(
                self.contracts.bridge,
                "isAvailableDepositId(bytes32)",
                &[Token::FixedBytes(*deposit_id)],
            )
            .await?;
        Ok(abi::decode_bool(&out, 0)?)
    }

    async fn latest_height(&self, kind: BatchKind) -> GatewayResult<U256> {
        let contract = match kind {
            BatchKind::Purchase => self.require(self.contracts.purchase, "purchase")?,
            BatchKind::CurrencyRate => self.require(self.contracts.currency_rate, "currency rate")?,
        };
        self.view_uint(contract, "latestHeight()", &[]).await
    }

    async fn send(&self, lease: &SignerLease, call: ContractCall) -> GatewayResult<H256> {
        if lease.network() != self.network {
            return Err(anyhow::anyhow!(
                "{} signer used on {} network",
                lease.network(),
                self.network
            )
            .into());
        }

        let (to, data) = self.encode(&call)?;
        let from = lease.address();

        // Simulate first so reverts come back with their reason
        if let Err(e) = self.client.call(Some(&from), &to, &data).await {
            warn!("{} simulation on {} failed: {}", call.name(), self.network, e);
            return Err(e);
        }

        let tx_hash = self
            .client
            .send_raw_transaction(lease.key(), &to, &data, self.chain_id, self.gas_limit)
            .await
            .with_context(|| format!("Failed to submit {} on {}", call.name(), self.network))?;

        info!(
            "Submitted {} on {} from {}: {}",
            call.name(),
            self.network,
            crypto::format_address(&from),
            crypto::format_h256(&tx_hash)
        );
        Ok(tx_hash)
    }

    async fn transaction_outcome(&self, tx_hash: &H256) -> GatewayResult<TxOutcome> {
        let receipt = self.client.get_transaction_receipt(tx_hash).await?;
        Ok(match receipt {
            None => TxOutcome::Pending,
            Some(r) if r.succeeded() => TxOutcome::Confirmed,
            Some(_) => TxOutcome::Reverted("transaction reverted on chain".to_string()),
        })
    }
}
