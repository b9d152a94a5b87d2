//! Bridge Relay
//!
//! Relays signed token transfers between the side chain and the main chain.
//! The account signs a transfer authorization to the source bridge; the relay
//! checks it, draws a deposit id unused on both bridges and submits the
//! deposit on the source network with a pooled signer.

use ethereum_types::{Address, H256, U256};
use rand::rngs::StdRng;
use rand::{RngCore, SeedableRng};
use serde::Serialize;
use std::fmt;
use std::sync::{Arc, Mutex};
use tracing::{debug, info};

use crate::abi::{self, Token};
use crate::config::BridgeConfig;
use crate::crypto;
use crate::error::{RelayError, RelayResult};
use crate::gateway::{ContractCall, ContractGateway};
use crate::payment::current_timestamp;
use crate::signer_pool::SignerPool;

/// Direction of a bridge transfer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Direction {
    /// Side chain to main chain
    Withdraw,
    /// Main chain to side chain
    Deposit,
}

impl fmt::Display for Direction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Direction::Withdraw => write!(f, "withdraw"),
            Direction::Deposit => write!(f, "deposit"),
        }
    }
}

/// Signed transfer authorization submitted by an account.
#[derive(Debug, Clone)]
pub struct TransferRequest {
    pub account: Address,
    pub amount: U256,
    /// Unix timestamp after which the authorization is void
    pub expiry: u64,
    pub signature: Vec<u8>,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct BridgeReceipt {
    pub token_id: H256,
    pub deposit_id: H256,
    #[serde(with = "crypto::serde_u256_dec")]
    pub amount: U256,
    pub tx_hash: H256,
}

/// `keccak256(abi.encode(name, symbol))`, the bridge's id of the loyalty token.
pub fn token_id(name: &str, symbol: &str) -> H256 {
    crypto::keccak256(&abi::encode(&[
        Token::String(name.to_string()),
        Token::String(symbol.to_string()),
    ]))
}

pub struct BridgeRelay {
    side: Arc<dyn ContractGateway>,
    main: Arc<dyn ContractGateway>,
    signer_pool: Arc<SignerPool>,
    token_id: H256,
    max_attempts: usize,
    rng: Mutex<StdRng>,
}

impl BridgeRelay {
    /// # Arguments
    ///
    /// * `side` - Side chain gateway
    /// * `main` - Main chain gateway
    /// * `signer_pool` - Pool the deposit submissions lease from
    /// * `bridge` - Bridged token name and symbol
    /// * `max_attempts` - Deposit id draws before giving up
    pub fn new(
        side: Arc<dyn ContractGateway>,
        main: Arc<dyn ContractGateway>,
        signer_pool: Arc<SignerPool>,
        bridge: &BridgeConfig,
        max_attempts: usize,
    ) -> Self {
        Self {
            side,
            main,
            signer_pool,
            token_id: token_id(&bridge.token_name, &bridge.token_symbol),
            max_attempts: max_attempts.max(1),
            rng: Mutex::new(StdRng::from_entropy()),
        }
    }

    /// Replaces the deposit id generator with a deterministic one.
    pub fn with_seed(mut self, seed: u64) -> Self {
        self.rng = Mutex::new(StdRng::seed_from_u64(seed));
        self
    }

    pub fn token_id(&self) -> H256 {
        self.token_id
    }

    /// Side chain to main chain.
    pub async fn withdraw(&self, request: TransferRequest) -> RelayResult<BridgeReceipt> {
        self.transfer(Direction::Withdraw, request).await
    }

    /// Main chain to side chain.
    pub async fn deposit(&self, request: TransferRequest) -> RelayResult<BridgeReceipt> {
        self.transfer(Direction::Deposit, request).await
    }

    fn gateways(&self, direction: Direction) -> (&Arc<dyn ContractGateway>, &Arc<dyn ContractGateway>) {
        match direction {
            Direction::Withdraw => (&self.side, &self.main),
            Direction::Deposit => (&self.main, &self.side),
        }
    }

    /// Submits `depositToBridge` on the source network: the signed authorization
    /// names the source token and bridge, and the destination side only supplies
    /// deposit id uniqueness.
    async fn transfer(&self, direction: Direction, request: TransferRequest) -> RelayResult<BridgeReceipt> {
        let (source, destination) = self.gateways(direction);
        if request.amount.is_zero() {
            return Err(RelayError::validation("amount must be positive"));
        }

        let available = source.balance_of(&request.account).await?;
        if available < request.amount {
            return Err(RelayError::InsufficientBalance {
                required: request.amount,
                available,
            });
        }

        let now = current_timestamp();
        if now > request.expiry {
            return Err(RelayError::Expired {
                expiry: request.expiry,
                now,
            });
        }

        // The authorization is bound to the source chain and pays the source bridge
        let nonce = source.token_nonce_of(&request.account).await?;
        let digest = crypto::transfer_message(
            source.chain_id(),
            &source.token_address(),
            &request.account,
            &source.bridge_address(),
            request.amount,
            nonce,
            request.expiry,
        );
        if !crypto::verify_signature(&request.account, &digest, &request.signature) {
            return Err(RelayError::InvalidSignature(format!(
                "{} authorization is not signed by {} at nonce {}",
                direction,
                crypto::format_address(&request.account),
                nonce
            )));
        }

        let deposit_id = self.unused_deposit_id(source, destination).await?;
        let lease = self.signer_pool.acquire(source.network()).await?;
        let tx_hash = source
            .send(
                &lease,
                ContractCall::DepositToBridge {
                    token_id: self.token_id,
                    deposit_id,
                    account: request.account,
                    amount: request.amount,
                    expiry: request.expiry,
                    signature: request.signature,
                },
            )
            .await?;
        lease.release();

        info!(
            "Bridge {} of {} for {} submitted on {}: deposit {} tx {}",
            direction,
            request.amount,
            crypto::format_address(&request.account),
            source.network(),
            crypto::format_h256(&deposit_id),
            crypto::format_h256(&tx_hash)
        );

        Ok(BridgeReceipt {
            token_id: self.token_id,
            deposit_id,
            amount: request.amount,
            tx_hash,
        })
    }

    fn draw(&self) -> H256 {
        let mut bytes = [0u8; 32];
        let mut rng = self.rng.lock().unwrap_or_else(|e| e.into_inner());
        rng.fill_bytes(&mut bytes);
        H256(bytes)
    }

    /// Draws deposit ids until one is available on both bridges.
    async fn unused_deposit_id(
        &self,
        source: &Arc<dyn ContractGateway>,
        destination: &Arc<dyn ContractGateway>,
    ) -> RelayResult<H256> {
        for attempt in 1..=self.max_attempts {
            let candidate = self.draw();
            if destination.is_available_deposit_id(&candidate).await?
                && source.is_available_deposit_id(&candidate).await?
            {
                return Ok(candidate);
            }
            debug!(
                "Deposit id {} taken (attempt {}/{})",
                crypto::format_h256(&candidate),
                attempt,
                self.max_attempts
            );
        }
        Err(RelayError::Infrastructure(anyhow::anyhow!(
            "no unused deposit id after {} attempts",
            self.max_attempts
        )))
    }
}
