//! Shared test helpers
//!
//! - **Keys**: deterministic secp256k1 keys and signing shortcuts
//! - **FakeGateway**: in-memory [`ContractGateway`] with seeded chain state that
//!   records every submitted call and applies its effect
//! - **RecordingCallback**: collects payment events
//! - **Builders**: test configuration, signer pool and orchestrator

use async_trait::async_trait;
use ethereum_types::{Address, H256, U256};
use k256::ecdsa::SigningKey;
use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use loyalty_relay::config::{Config, Network};
use loyalty_relay::crypto;
use loyalty_relay::error::GatewayError;
use loyalty_relay::gateway::{
    AgentKind, BatchKind, ContractCall, ContractGateway, GatewayResult, OnChainPaymentState, TxOutcome,
};
use loyalty_relay::payment::{OrchestratorSettings, PaymentCallback, PaymentEvent, PaymentOrchestrator};
use loyalty_relay::signer_pool::{SignerLease, SignerPool};
use loyalty_relay::storage::PaymentTaskStore;

// ============================================================================
// CONSTANTS
// ============================================================================

pub const SIDE_CHAIN_ID: u64 = 24680;
pub const MAIN_CHAIN_ID: u64 = 13579;

pub const DUMMY_PURCHASE_ID: &str = "P000001";
pub const DUMMY_CURRENCY: &str = "krw";
pub const DUMMY_AMOUNT: u64 = 1000;

// ============================================================================
// KEYS
// ============================================================================

/// Deterministic key from a non-zero seed byte.
pub fn key(seed: u8) -> SigningKey {
    SigningKey::from_slice(&[seed; 32]).unwrap()
}

pub fn address(seed: u8) -> Address {
    crypto::address_of(&key(seed))
}

pub fn sign(key: &SigningKey, digest: &H256) -> Vec<u8> {
    crypto::sign_digest(key, digest).unwrap()
}

// ============================================================================
// FAKE GATEWAY
// ============================================================================

/// Chain state behind a [`FakeGateway`].
#[derive(Default)]
pub struct FakeState {
    pub ledger_nonces: HashMap<Address, U256>,
    pub token_nonces: HashMap<Address, U256>,
    pub balances: HashMap<Address, U256>,
    pub agents: HashMap<(AgentKind, Address), Address>,
    pub shops: HashMap<H256, Address>,
    pub payment_states: HashMap<H256, OnChainPaymentState>,
    pub used_deposit_ids: HashSet<H256>,
    pub latest_heights: HashMap<BatchKind, U256>,
    /// Outcome reported per transaction; sent transactions default to `Confirmed`
    pub outcomes: HashMap<H256, TxOutcome>,
    /// Submitted calls with the signer that paid for them
    pub sent: Vec<(Address, ContractCall)>,
    /// Next `send` reverts with this reason
    pub revert_next: Option<String>,
    /// Next `send` fails with a transport error
    pub fail_next: Option<String>,
    /// Delay inside `send`, to hold signer leases
    pub send_delay: Option<Duration>,
    /// Transactions stay pending instead of confirming
    pub hold_outcomes: bool,
    tx_counter: u64,
}

pub struct FakeGateway {
    network: Network,
    chain_id: u64,
    token: Address,
    bridge: Address,
    pub state: Mutex<FakeState>,
}

impl FakeGateway {
    pub fn new(network: Network, chain_id: u64) -> Self {
        let (token, bridge) = match network {
            Network::Side => (Address::from_low_u64_be(0x01), Address::from_low_u64_be(0x02)),
            Network::Main => (Address::from_low_u64_be(0x11), Address::from_low_u64_be(0x12)),
        };
        Self {
            network,
            chain_id,
            token,
            bridge,
            state: Mutex::new(FakeState::default()),
        }
    }

    pub fn side() -> Self {
        Self::new(Network::Side, SIDE_CHAIN_ID)
    }

    pub fn main() -> Self {
        Self::new(Network::Main, MAIN_CHAIN_ID)
    }

    pub fn with_shop(self, shop_id: H256, account: Address) -> Self {
        self.state.lock().unwrap().shops.insert(shop_id, account);
        self
    }

    pub fn with_balance(self, account: Address, amount: u64) -> Self {
        self.state.lock().unwrap().balances.insert(account, U256::from(amount));
        self
    }

    pub fn sent_calls(&self) -> Vec<ContractCall> {
        self.state.lock().unwrap().sent.iter().map(|(_, c)| c.clone()).collect()
    }

    pub fn sent_count(&self) -> usize {
        self.state.lock().unwrap().sent.len()
    }

    pub fn set_payment_state(&self, payment_id: H256, state: OnChainPaymentState) {
        self.state.lock().unwrap().payment_states.insert(payment_id, state);
    }

    pub fn payment_state_of(&self, payment_id: &H256) -> OnChainPaymentState {
        self.state
            .lock()
            .unwrap()
            .payment_states
            .get(payment_id)
            .copied()
            .unwrap_or(OnChainPaymentState::Invalid)
    }

    fn bump(map: &mut HashMap<Address, U256>, account: Address) {
        let nonce = map.entry(account).or_default();
        *nonce = *nonce + U256::one();
    }

    /// Effect of a successfully mined call.
    fn apply(state: &mut FakeState, call: &ContractCall) {
        match call {
            ContractCall::RegisterAgent { kind, account, agent, .. } => {
                state.agents.insert((*kind, *account), *agent);
                Self::bump(&mut state.ledger_nonces, *account);
            }
            ContractCall::ChangeToLoyaltyToken { account, .. }
            | ContractCall::ChangeToPayablePoint { account, .. } => {
                Self::bump(&mut state.ledger_nonces, *account);
            }
            ContractCall::OpenNewPayment { payment_id, account, .. } => {
                state.payment_states.insert(*payment_id, OnChainPaymentState::OpenedNew);
                Self::bump(&mut state.ledger_nonces, *account);
            }
            ContractCall::CloseNewPayment { payment_id, confirm, .. } => {
                let next = if *confirm {
                    OnChainPaymentState::ClosedNew
                } else {
                    OnChainPaymentState::FailedNew
                };
                state.payment_states.insert(*payment_id, next);
            }
            ContractCall::OpenCancelPayment { payment_id, shop_account, .. } => {
                state.payment_states.insert(*payment_id, OnChainPaymentState::OpenedCancel);
                Self::bump(&mut state.ledger_nonces, *shop_account);
            }
            ContractCall::CloseCancelPayment { payment_id, confirm, .. } => {
                let next = if *confirm {
                    OnChainPaymentState::ClosedCancel
                } else {
                    OnChainPaymentState::FailedCancel
                };
                state.payment_states.insert(*payment_id, next);
            }
            ContractCall::DepositToBridge { deposit_id, account, .. } => {
                state.used_deposit_ids.insert(*deposit_id);
                Self::bump(&mut state.token_nonces, *account);
            }
            ContractCall::SavePurchase { batch, .. } => {
                state.latest_heights.insert(BatchKind::Purchase, batch.height);
            }
            ContractCall::SetCurrencyRates { rates, .. } => {
                state.latest_heights.insert(BatchKind::CurrencyRate, rates.height);
            }
        }
    }
}

#[async_trait]
impl ContractGateway for FakeGateway {
    fn network(&self) -> Network {
        self.network
    }

    fn chain_id(&self) -> u64 {
        self.chain_id
    }

    fn token_address(&self) -> Address {
        self.token
    }

    fn bridge_address(&self) -> Address {
        self.bridge
    }

    async fn ledger_nonce_of(&self, account: &Address) -> GatewayResult<U256> {
        Ok(self.state.lock().unwrap().ledger_nonces.get(account).copied().unwrap_or_default())
    }

    async fn token_nonce_of(&self, account: &Address) -> GatewayResult<U256> {
        Ok(self.state.lock().unwrap().token_nonces.get(account).copied().unwrap_or_default())
    }

    async fn balance_of(&self, account: &Address) -> GatewayResult<U256> {
        Ok(self.state.lock().unwrap().balances.get(account).copied().unwrap_or_default())
    }

    async fn agent_of(&self, kind: AgentKind, account: &Address) -> GatewayResult<Option<Address>> {
        Ok(self.state.lock().unwrap().agents.get(&(kind, *account)).copied())
    }

    async fn shop_account(&self, shop_id: &H256) -> GatewayResult<Option<Address>> {
        Ok(self.state.lock().unwrap().shops.get(shop_id).copied())
    }

    async fn payment_state(&self, payment_id: &H256) -> GatewayResult<OnChainPaymentState> {
        Ok(self.payment_state_of(payment_id))
    }

    async fn is_available_deposit_id(&self, deposit_id: &H256) -> GatewayResult<bool> {
        Ok(!self.state.lock().unwrap().used_deposit_ids.contains(deposit_id))
    }

    async fn latest_height(&self, kind: BatchKind) -> GatewayResult<U256> {
        Ok(self.state.lock().unwrap().latest_heights.get(&kind).copied().unwrap_or_default())
    }

    async fn send(&self, lease: &SignerLease, call: ContractCall) -> GatewayResult<H256> {
        assert_eq!(lease.network(), self.network, "lease of the wrong network");
        let delay = self.state.lock().unwrap().send_delay;
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }

        let mut state = self.state.lock().unwrap();
        if let Some(reason) = state.revert_next.take() {
            return Err(GatewayError::Reverted(reason));
        }
        if let Some(message) = state.fail_next.take() {
            return Err(GatewayError::Transport(anyhow::anyhow!(message)));
        }

        state.tx_counter += 1;
        let tx_hash = H256::from_low_u64_be(state.tx_counter);
        Self::apply(&mut state, &call);
        if !state.hold_outcomes {
            state.outcomes.insert(tx_hash, TxOutcome::Confirmed);
        }
        state.sent.push((lease.address(), call));
        Ok(tx_hash)
    }

    async fn transaction_outcome(&self, tx_hash: &H256) -> GatewayResult<TxOutcome> {
        Ok(self
            .state
            .lock()
            .unwrap()
            .outcomes
            .get(tx_hash)
            .cloned()
            .unwrap_or(TxOutcome::Pending))
    }
}

// ============================================================================
// CALLBACK
// ============================================================================

#[derive(Default)]
pub struct RecordingCallback {
    pub events: Mutex<Vec<PaymentEvent>>,
}

impl RecordingCallback {
    pub fn events(&self) -> Vec<PaymentEvent> {
        self.events.lock().unwrap().clone()
    }

    pub fn count_for(&self, payment_id: &H256) -> usize {
        self.events
            .lock()
            .unwrap()
            .iter()
            .filter(|e| e.payment_id == *payment_id)
            .count()
    }
}

#[async_trait]
impl PaymentCallback for RecordingCallback {
    async fn notify(&self, event: PaymentEvent) {
        self.events.lock().unwrap().push(event);
    }
}

// ============================================================================
// BUILDERS
// ============================================================================

/// Configuration with the placeholder addresses of [`Config::default`].
pub fn build_test_config() -> Config {
    let mut config = Config::default();
    config.relay.forced_close_second = 300;
    config.relay.max_retries = 2;
    config.validator.validators = vec![
        crypto::format_address(&address(0xa1)),
        crypto::format_address(&address(0xa2)),
        crypto::format_address(&address(0xa3)),
    ];
    config.validator.threshold = 2;
    config
}

/// Two side chain signers and one main chain signer.
pub fn signer_pool() -> SignerPool {
    SignerPool::new(Duration::from_millis(200))
        .with_signers(Network::Side, vec![key(0x51), key(0x52)])
        .with_signers(Network::Main, vec![key(0x61)])
}

pub fn build_orchestrator(
    gateway: Arc<FakeGateway>,
    store: Arc<dyn PaymentTaskStore>,
    callback: Arc<RecordingCallback>,
    settings: OrchestratorSettings,
) -> Arc<PaymentOrchestrator> {
    Arc::new(PaymentOrchestrator::new(
        gateway,
        Arc::new(signer_pool()),
        store,
        callback,
        settings,
    ))
}
