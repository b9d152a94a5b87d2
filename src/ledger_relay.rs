//! Ledger relay
//!
//! Gas-less relay of account-signed ledger operations: agent registration and
//! the switch between loyalty tokens and payable points. Each signature is
//! checked against the account's current ledger nonce before a pooled signer
//! submits it on the side chain.

use ethereum_types::{Address, H256};
use std::sync::Arc;
use tracing::info;

use crate::crypto::{self, purpose};
use crate::error::{RelayError, RelayResult};
use crate::gateway::{AgentKind, ContractCall, ContractGateway};
use crate::signer_pool::SignerPool;

pub struct LedgerRelay {
    /// Side chain gateway
    gateway: Arc<dyn ContractGateway>,
    signer_pool: Arc<SignerPool>,
}

impl LedgerRelay {
    pub fn new(gateway: Arc<dyn ContractGateway>, signer_pool: Arc<SignerPool>) -> Self {
        Self {
            gateway,
            signer_pool,
        }
    }

    /// Registers `agent` as the `kind` agent of `account`.
    ///
    /// # Returns
    ///
    /// Hash of the registration transaction
    pub async fn register_agent(
        &self,
        kind: AgentKind,
        account: Address,
        agent: Address,
        signature: Vec<u8>,
    ) -> RelayResult<H256> {
        if account.is_zero() {
            return Err(RelayError::validation("account is the zero address"));
        }
        let nonce = self.gateway.ledger_nonce_of(&account).await?;
        let digest = crypto::agent_message(kind.purpose(), &account, &agent, nonce, self.gateway.chain_id());
        self.check_signer(&account, &digest, &signature)?;

        let tx_hash = self
            .submit(ContractCall::RegisterAgent {
                kind,
                account,
                agent,
                signature,
            })
            .await?;
        info!(
            "Registered {} agent {} for {}",
            kind,
            crypto::format_address(&agent),
            crypto::format_address(&account)
        );
        Ok(tx_hash)
    }

    pub async fn agent_of(&self, kind: AgentKind, account: &Address) -> RelayResult<Option<Address>> {
        Ok(self.gateway.agent_of(kind, account).await?)
    }

    /// Converts the account's payable points into loyalty tokens.
    pub async fn change_to_loyalty_token(&self, account: Address, signature: Vec<u8>) -> RelayResult<H256> {
        let nonce = self.gateway.ledger_nonce_of(&account).await?;
        let digest = crypto::account_message(
            purpose::CHANGE_TO_LOYALTY_TOKEN,
            &account,
            nonce,
            self.gateway.chain_id(),
        );
        self.check_signer(&account, &digest, &signature)?;

        self.submit(ContractCall::ChangeToLoyaltyToken { account, signature })
            .await
    }

    /// Moves the points held under `phone_hash` to the account as payable points.
    pub async fn change_to_payable_point(
        &self,
        phone_hash: H256,
        account: Address,
        signature: Vec<u8>,
    ) -> RelayResult<H256> {
        let nonce = self.gateway.ledger_nonce_of(&account).await?;
        let digest = crypto::payable_point_message(&phone_hash, &account, nonce, self.gateway.chain_id());
        self.check_signer(&account, &digest, &signature)?;

        self.submit(ContractCall::ChangeToPayablePoint {
            phone_hash,
            account,
            signature,
        })
        .await
    }

    fn check_signer(&self, account: &Address, digest: &H256, signature: &[u8]) -> RelayResult<()> {
        if crypto::verify_signature(account, digest, signature) {
            Ok(())
        } else {
            Err(RelayError::InvalidSignature(format!(
                "not signed by {}",
                crypto::format_address(account)
            )))
        }
    }

    async fn submit(&self, call: ContractCall) -> RelayResult<H256> {
        let name = call.name();
        let lease = self.signer_pool.acquire(self.gateway.network()).await?;
        let tx_hash = self.gateway.send(&lease, call).await?;
        lease.release();
        info!("Relayed {}: {}", name, crypto::format_h256(&tx_hash));
        Ok(tx_hash)
    }
}
