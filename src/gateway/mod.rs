//! Contract Gateway Module
//!
//! The read/submit surface over the ledger, shop, purchase, currency-rate, token
//! and bridge contracts of one network. Components receive gateways by
//! `Arc<dyn ContractGateway>` at construction, so tests substitute an in-memory
//! chain and production wires one [`evm::EvmContractGateway`] per network.

use async_trait::async_trait;
use ethereum_types::{Address, H256, U256};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

use crate::batch::{CurrencyRateSet, PurchaseBatch};
use crate::config::Network;
use crate::crypto::purpose;
use crate::error::GatewayError;
use crate::signer_pool::SignerLease;

pub mod evm;

pub use evm::EvmContractGateway;

pub type GatewayResult<T> = std::result::Result<T, GatewayError>;

// ============================================================================
// DOMAIN TYPES
// ============================================================================

/// Agent roles an account can delegate.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AgentKind {
    Provision,
    Refund,
    Withdrawal,
}

impl AgentKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            AgentKind::Provision => "provision",
            AgentKind::Refund => "refund",
            AgentKind::Withdrawal => "withdrawal",
        }
    }

    /// Domain separator of the registration message.
    pub fn purpose(&self) -> &'static str {
        match self {
            AgentKind::Provision => purpose::REGISTER_PROVISION_AGENT,
            AgentKind::Refund => purpose::REGISTER_REFUND_AGENT,
            AgentKind::Withdrawal => purpose::REGISTER_WITHDRAWAL_AGENT,
        }
    }
}

impl FromStr for AgentKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "provision" => Ok(AgentKind::Provision),
            "refund" => Ok(AgentKind::Refund),
            "withdrawal" => Ok(AgentKind::Withdrawal),
            other => Err(format!("unknown agent kind: {}", other)),
        }
    }
}

impl fmt::Display for AgentKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Data kinds committed through the validator protocol.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BatchKind {
    Purchase,
    CurrencyRate,
}

/// Payment status as recorded by the ledger contract.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OnChainPaymentState {
    /// Unknown payment id
    Invalid,
    OpenedNew,
    ClosedNew,
    FailedNew,
    OpenedCancel,
    ClosedCancel,
    FailedCancel,
}

impl OnChainPaymentState {
    pub fn from_u8(value: u8) -> Option<Self> {
        match value {
            0 => Some(OnChainPaymentState::Invalid),
            1 => Some(OnChainPaymentState::OpenedNew),
            2 => Some(OnChainPaymentState::ClosedNew),
            3 => Some(OnChainPaymentState::FailedNew),
            4 => Some(OnChainPaymentState::OpenedCancel),
            5 => Some(OnChainPaymentState::ClosedCancel),
            6 => Some(OnChainPaymentState::FailedCancel),
            _ => None,
        }
    }

    pub fn as_u8(self) -> u8 {
        self as u8
    }
}

/// Terminal outcome of a submitted transaction.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TxOutcome {
    Pending,
    Confirmed,
    Reverted(String),
}

/// Every state-changing contract entry point the relay submits.
#[derive(Debug, Clone)]
pub enum ContractCall {
    RegisterAgent {
        kind: AgentKind,
        account: Address,
        agent: Address,
        signature: Vec<u8>,
    },
    ChangeToLoyaltyToken {
        account: Address,
        signature: Vec<u8>,
    },
    ChangeToPayablePoint {
        phone_hash: H256,
        account: Address,
        signature: Vec<u8>,
    },
    /// Opens the payment on the ledger and commits its secret lock.
    OpenNewPayment {
        payment_id: H256,
        purchase_id: String,
        amount: U256,
        currency: String,
        shop_id: H256,
        account: Address,
        signature: Vec<u8>,
        secret_lock: H256,
    },
    /// Reveals the secret. `confirm = false` settles the payment as failed.
    CloseNewPayment {
        payment_id: H256,
        secret: H256,
        confirm: bool,
    },
    OpenCancelPayment {
        payment_id: H256,
        purchase_id: String,
        shop_account: Address,
        signature: Vec<u8>,
        secret_lock: H256,
    },
    CloseCancelPayment {
        payment_id: H256,
        secret: H256,
        confirm: bool,
    },
    DepositToBridge {
        token_id: H256,
        deposit_id: H256,
        account: Address,
        amount: U256,
        expiry: u64,
        signature: Vec<u8>,
    },
    SavePurchase {
        batch: PurchaseBatch,
        validator_signatures: Vec<Vec<u8>>,
        proposer_signature: Vec<u8>,
    },
    SetCurrencyRates {
        rates: CurrencyRateSet,
        validator_signatures: Vec<Vec<u8>>,
        proposer_signature: Vec<u8>,
    },
}

impl ContractCall {
    /// Entry point name, for logs.
    pub fn name(&self) -> &'static str {
        match self {
            ContractCall::RegisterAgent { kind, .. } => match kind {
                AgentKind::Provision => "registerProvisionAgent",
                AgentKind::Refund => "registerRefundAgent",
                AgentKind::Withdrawal => "registerWithdrawalAgent",
            },
            ContractCall::ChangeToLoyaltyToken { .. } => "changeToLoyaltyToken",
            ContractCall::ChangeToPayablePoint { .. } => "changeToPayablePoint",
            ContractCall::OpenNewPayment { .. } => "openNewLoyaltyPayment",
            ContractCall::CloseNewPayment { .. } => "closeNewLoyaltyPayment",
            ContractCall::OpenCancelPayment { .. } => "openCancelLoyaltyPayment",
            ContractCall::CloseCancelPayment { .. } => "closeCancelLoyaltyPayment",
            ContractCall::DepositToBridge { .. } => "depositToBridge",
            ContractCall::SavePurchase { .. } => "savePurchase",
            ContractCall::SetCurrencyRates { .. } => "setCurrencyRates",
        }
    }
}

// ============================================================================
// GATEWAY TRAIT
// ============================================================================

/// Contract surface of one network.
#[async_trait]
pub trait ContractGateway: Send + Sync {
    fn network(&self) -> Network;

    fn chain_id(&self) -> u64;

    /// Loyalty token contract of this network.
    fn token_address(&self) -> Address;

    /// Bridge contract of this network.
    fn bridge_address(&self) -> Address;

    /// Ledger nonce of `account` (ledger, agent and payment messages).
    async fn ledger_nonce_of(&self, account: &Address) -> GatewayResult<U256>;

    /// Token nonce of `account` (bridge transfer authorizations).
    async fn token_nonce_of(&self, account: &Address) -> GatewayResult<U256>;

    /// Token balance of `account`.
    async fn balance_of(&self, account: &Address) -> GatewayResult<U256>;

    /// Registered agent of `account`, `None` when unset.
    async fn agent_of(&self, kind: AgentKind, account: &Address) -> GatewayResult<Option<Address>>;

    /// Account of a registered shop, `None` for an unknown shop id.
    async fn shop_account(&self, shop_id: &H256) -> GatewayResult<Option<Address>>;

    async fn payment_state(&self, payment_id: &H256) -> GatewayResult<OnChainPaymentState>;

    async fn is_available_deposit_id(&self, deposit_id: &H256) -> GatewayResult<bool>;

    /// Last committed batch height of `kind`.
    async fn latest_height(&self, kind: BatchKind) -> GatewayResult<U256>;

    /// Submits `call` paying fees from `lease`, returning the transaction hash.
    async fn send(&self, lease: &SignerLease, call: ContractCall) -> GatewayResult<H256>;

    async fn transaction_outcome(&self, tx_hash: &H256) -> GatewayResult<TxOutcome>;
}
