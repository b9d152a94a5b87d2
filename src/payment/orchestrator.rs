//! Payment Orchestrator
//!
//! Drives [`PaymentTask`]s through the open / approve / submit / confirm / close
//! state machine of both phases.
//!
//! Every operation on a payment runs under that payment's own async lock and
//! persists its transition with a status-guarded store update, so there is at
//! most one in-flight submission per payment id. Payments never share a lock.
//!
//! Lock entries live only while some caller holds or waits on them.
//!
//! Synchronous operations never retry. A failed or reverted submission is left in
//! `*_FAILED_TX` / `*_REVERTED_TX` for the watch scheduler, and an abandoned task
//! is resolved by the close scheduler through [`PaymentOrchestrator::force_close`].

use ethereum_types::{Address, H256, U256};
use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use tokio::sync::OwnedMutexGuard;
use tracing::{debug, info, warn};

use super::callback::{PaymentCallback, PaymentEvent};
use super::{current_timestamp, Approval, HashLock, PaymentInfo, PaymentStatus, PaymentTask, Phase};
use crate::config::{Network, RelayConfig};
use crate::crypto::{self, NewPaymentMessage};
use crate::error::{GatewayError, RelayError, RelayResult};
use crate::gateway::{ContractCall, ContractGateway, OnChainPaymentState, TxOutcome};
use crate::signer_pool::SignerPool;
use crate::storage::PaymentTaskStore;

/// Attempts at drawing a payment id unused in the store and on chain.
const PAYMENT_ID_ATTEMPTS: usize = 8;

// ============================================================================
// REQUESTS AND SETTINGS
// ============================================================================

/// Input of [`PaymentOrchestrator::open_new`].
#[derive(Debug, Clone)]
pub struct NewPaymentRequest {
    pub purchase_id: String,
    pub amount: U256,
    pub currency: String,
    pub shop_id: H256,
    pub account: Address,
}

#[derive(Debug, Clone, Copy)]
pub struct OrchestratorSettings {
    /// Age after which an unresolved phase is force-closed
    pub forced_close_second: u64,
    /// Resubmissions per phase before the task fails
    pub max_retries: u32,
}

impl From<&RelayConfig> for OrchestratorSettings {
    fn from(config: &RelayConfig) -> Self {
        Self {
            forced_close_second: config.forced_close_second,
            max_retries: config.max_retries,
        }
    }
}

// ============================================================================
// PAYMENT LOCKS
// ============================================================================

type LockMap = Mutex<HashMap<H256, Arc<tokio::sync::Mutex<()>>>>;

/// Held lock of one payment id. Dropping the last holder removes the map entry.
struct PaymentGuard<'a> {
    locks: &'a LockMap,
    payment_id: H256,
    guard: Option<OwnedMutexGuard<()>>,
}

impl Drop for PaymentGuard<'_> {
    fn drop(&mut self) {
        self.guard.take();
        let mut locks = self.locks.lock().unwrap_or_else(|e| e.into_inner());
        // Waiters hold a clone, so a count of one means nobody else needs the entry
        if locks
            .get(&self.payment_id)
            .is_some_and(|lock| Arc::strong_count(lock) == 1)
        {
            locks.remove(&self.payment_id);
        }
    }
}

// ============================================================================
// ORCHESTRATOR
// ============================================================================

pub struct PaymentOrchestrator {
    /// Side chain gateway (ledger and shop contracts)
    gateway: Arc<dyn ContractGateway>,
    signer_pool: Arc<SignerPool>,
    store: Arc<dyn PaymentTaskStore>,
    callback: Arc<dyn PaymentCallback>,
    settings: OrchestratorSettings,
    locks: LockMap,
}

impl PaymentOrchestrator {
    pub fn new(
        gateway: Arc<dyn ContractGateway>,
        signer_pool: Arc<SignerPool>,
        store: Arc<dyn PaymentTaskStore>,
        callback: Arc<dyn PaymentCallback>,
        settings: OrchestratorSettings,
    ) -> Self {
        Self {
            gateway,
            signer_pool,
            store,
            callback,
            settings,
            locks: Mutex::new(HashMap::new()),
        }
    }

    pub fn settings(&self) -> OrchestratorSettings {
        self.settings
    }

    /// Serializes operations on one payment id.
    async fn lock(&self, payment_id: &H256) -> PaymentGuard<'_> {
        let lock = {
            let mut locks = self.locks.lock().unwrap_or_else(|e| e.into_inner());
            locks.entry(*payment_id).or_default().clone()
        };
        PaymentGuard {
            locks: &self.locks,
            payment_id: *payment_id,
            guard: Some(lock.lock_owned().await),
        }
    }

    /// Payment ids with a lock entry, i.e. currently held or awaited.
    pub fn active_locks(&self) -> usize {
        self.locks.lock().unwrap_or_else(|e| e.into_inner()).len()
    }

    async fn load(&self, payment_id: &H256) -> RelayResult<PaymentTask> {
        self.store
            .get(payment_id)
            .await?
            .ok_or_else(|| RelayError::UnknownId(crypto::format_h256(payment_id)))
    }

    /// Applies `status` and persists, guarded by the status the task had before.
    async fn save(&self, task: &mut PaymentTask, status: PaymentStatus) -> RelayResult<()> {
        let expected = task.status;
        task.transition(status, current_timestamp());
        self.store.update(task, expected).await?;
        debug!(
            "Payment {}: {} -> {}",
            crypto::format_h256(&task.payment_id),
            expected,
            status
        );
        Ok(())
    }

    async fn notify(&self, task: &PaymentTask) {
        self.callback.notify(PaymentEvent::from_task(task)).await;
    }

    /// Whether the current phase has gone unresolved for longer than the forced-close age.
    pub fn is_expired(&self, task: &PaymentTask, now: u64) -> bool {
        now.saturating_sub(task.phase_timestamp(task.phase())) > self.settings.forced_close_second
    }

    // ------------------------------------------------------------------------
    // NEW PHASE
    // ------------------------------------------------------------------------

    /// Opens a new payment: validates input, mints the hash lock and a payment id
    /// unused both locally and on chain, and persists `OPENED_NEW`.
    pub async fn open_new(&self, request: NewPaymentRequest) -> RelayResult<PaymentInfo> {
        if request.purchase_id.trim().is_empty() {
            return Err(RelayError::validation("purchaseId is empty"));
        }
        if request.currency.trim().is_empty() {
            return Err(RelayError::validation("currency is empty"));
        }
        if request.amount.is_zero() {
            return Err(RelayError::validation("amount must be positive"));
        }
        if request.account.is_zero() {
            return Err(RelayError::validation("account is the zero address"));
        }
        if self.gateway.shop_account(&request.shop_id).await?.is_none() {
            return Err(RelayError::validation(format!(
                "shop {} is not registered",
                crypto::format_h256(&request.shop_id)
            )));
        }

        let payment_id = self.mint_payment_id().await?;
        let task = PaymentTask::new(
            payment_id,
            request.purchase_id,
            request.account,
            request.shop_id,
            request.currency,
            request.amount,
            HashLock::mint(),
            current_timestamp(),
        );
        self.store.insert(task.clone()).await?;

        info!(
            "Opened payment {} for {} ({} {})",
            crypto::format_h256(&payment_id),
            crypto::format_address(&task.account),
            task.amount,
            task.currency
        );
        Ok(task.info())
    }

    async fn mint_payment_id(&self) -> RelayResult<H256> {
        for _ in 0..PAYMENT_ID_ATTEMPTS {
            let candidate = crypto::random_h256();
            if self.store.contains(&candidate).await? {
                continue;
            }
            if self.gateway.payment_state(&candidate).await? != OnChainPaymentState::Invalid {
                continue;
            }
            return Ok(candidate);
        }
        Err(RelayError::Internal("could not draw an unused payment id".to_string()))
    }

    /// Applies the account's decision on an `OPENED_NEW` payment.
    ///
    /// The signature must recover to the payment's account over the new-payment
    /// digest at the account's current ledger nonce; otherwise nothing changes.
    /// A denial moves to `DENIED_NEW`. An approval submits the ledger open call
    /// (committing the secret lock) and moves to `APPROVED_NEW_SENT_TX`.
    pub async fn approve_new(
        &self,
        payment_id: &H256,
        approve: bool,
        signature: Vec<u8>,
    ) -> RelayResult<PaymentInfo> {
        let _guard = self.lock(payment_id).await;
        let mut task = self.load(payment_id).await?;
        if task.status != PaymentStatus::OpenedNew {
            return Err(RelayError::illegal_state("approve new payment", task.status));
        }

        let nonce = self.gateway.ledger_nonce_of(&task.account).await?;
        let digest = crypto::new_payment_message(
            &NewPaymentMessage {
                payment_id: task.payment_id,
                purchase_id: &task.purchase_id,
                amount: task.amount,
                currency: &task.currency,
                shop_id: task.shop_id,
                account: task.account,
                nonce,
            },
            self.gateway.chain_id(),
        );
        if !crypto::verify_signature(&task.account, &digest, &signature) {
            return Err(RelayError::InvalidSignature(format!(
                "approval of {} is not signed by {}",
                crypto::format_h256(payment_id),
                crypto::format_address(&task.account)
            )));
        }

        if !approve {
            self.save(&mut task, PaymentStatus::DeniedNew).await?;
            info!("Payment {} denied by account", crypto::format_h256(payment_id));
            self.notify(&task).await;
            return Ok(task.info());
        }

        task.new_approval = Some(Approval {
            signer: task.account,
            signature,
        });
        let task = self.submit_open(task, Phase::New).await?;
        Ok(task.info())
    }

    /// Closes the new phase. See [`Self::close`].
    pub async fn close_new(&self, payment_id: &H256, confirm: bool) -> RelayResult<PaymentInfo> {
        self.close(payment_id, Phase::New, confirm).await
    }

    // ------------------------------------------------------------------------
    // CANCEL PHASE
    // ------------------------------------------------------------------------

    /// Opens the cancel phase of a payment whose new phase closed with confirmation.
    pub async fn open_cancel(&self, payment_id: &H256) -> RelayResult<PaymentInfo> {
        let _guard = self.lock(payment_id).await;
        let mut task = self.load(payment_id).await?;
        if task.status != PaymentStatus::ClosedNew || !task.closed_with_confirm {
            return Err(RelayError::illegal_state("open cancel", task.status));
        }
        if let Some(pending) = task.pending_close {
            match self.gateway.transaction_outcome(&pending.tx_hash).await? {
                TxOutcome::Confirmed => task.pending_close = None,
                _ => {
                    return Err(RelayError::illegal_state(
                        "open cancel before the new phase close is confirmed",
                        task.status,
                    ))
                }
            }
        }

        task.cancel_lock = Some(HashLock::mint());
        task.open_cancel_timestamp = Some(current_timestamp());
        task.revert_reason = None;
        self.save(&mut task, PaymentStatus::OpenedCancel).await?;

        info!("Opened cancel of payment {}", crypto::format_h256(payment_id));
        Ok(task.info())
    }

    /// Applies the shop's decision on an `OPENED_CANCEL` payment. The principal is
    /// the shop account registered on chain.
    pub async fn approve_cancel(
        &self,
        payment_id: &H256,
        approve: bool,
        signature: Vec<u8>,
    ) -> RelayResult<PaymentInfo> {
        let _guard = self.lock(payment_id).await;
        let mut task = self.load(payment_id).await?;
        if task.status != PaymentStatus::OpenedCancel {
            return Err(RelayError::illegal_state("approve cancel", task.status));
        }

        let shop_account = self
            .gateway
            .shop_account(&task.shop_id)
            .await?
            .ok_or_else(|| {
                RelayError::validation(format!(
                    "shop {} is not registered",
                    crypto::format_h256(&task.shop_id)
                ))
            })?;
        let nonce = self.gateway.ledger_nonce_of(&shop_account).await?;
        let digest = crypto::cancel_payment_message(
            &task.payment_id,
            &task.purchase_id,
            &shop_account,
            nonce,
            self.gateway.chain_id(),
        );
        if !crypto::verify_signature(&shop_account, &digest, &signature) {
            return Err(RelayError::InvalidSignature(format!(
                "cancel of {} is not signed by shop account {}",
                crypto::format_h256(payment_id),
                crypto::format_address(&shop_account)
            )));
        }

        if !approve {
            self.save(&mut task, PaymentStatus::DeniedCancel).await?;
            info!("Cancel of payment {} denied by shop", crypto::format_h256(payment_id));
            self.notify(&task).await;
            return Ok(task.info());
        }

        task.cancel_approval = Some(Approval {
            signer: shop_account,
            signature,
        });
        let task = self.submit_open(task, Phase::Cancel).await?;
        Ok(task.info())
    }

    /// Closes the cancel phase. See [`Self::close`].
    pub async fn close_cancel(&self, payment_id: &H256, confirm: bool) -> RelayResult<PaymentInfo> {
        self.close(payment_id, Phase::Cancel, confirm).await
    }

    // ------------------------------------------------------------------------
    // SHARED TRANSITIONS
    // ------------------------------------------------------------------------

    /// Ledger open call of `phase`, built from the stored approval.
    fn open_call(task: &PaymentTask, phase: Phase) -> RelayResult<ContractCall> {
        let approval = task
            .approval(phase)
            .ok_or_else(|| RelayError::Internal(format!("{} approval missing", phase)))?;
        let lock = task
            .lock(phase)
            .ok_or_else(|| RelayError::Internal(format!("{} hash lock missing", phase)))?;

        Ok(match phase {
            Phase::New => ContractCall::OpenNewPayment {
                payment_id: task.payment_id,
                purchase_id: task.purchase_id.clone(),
                amount: task.amount,
                currency: task.currency.clone(),
                shop_id: task.shop_id,
                account: task.account,
                signature: approval.signature.clone(),
                secret_lock: lock.lock,
            },
            Phase::Cancel => ContractCall::OpenCancelPayment {
                payment_id: task.payment_id,
                purchase_id: task.purchase_id.clone(),
                shop_account: approval.signer,
                signature: approval.signature.clone(),
                secret_lock: lock.lock,
            },
        })
    }

    fn close_call(task: &PaymentTask, phase: Phase, confirm: bool) -> RelayResult<ContractCall> {
        let secret = task
            .lock(phase)
            .ok_or_else(|| RelayError::Internal(format!("{} hash lock missing", phase)))?
            .secret;
        Ok(match phase {
            Phase::New => ContractCall::CloseNewPayment {
                payment_id: task.payment_id,
                secret,
                confirm,
            },
            Phase::Cancel => ContractCall::CloseCancelPayment {
                payment_id: task.payment_id,
                secret,
                confirm,
            },
        })
    }

    /// Submits the open call of `phase` with a pooled signer and records the result:
    /// `*_SENT_TX` on broadcast, `*_REVERTED_TX` on a contract rejection,
    /// `*_FAILED_TX` on an infrastructure failure. The failure is still returned.
    async fn submit_open(&self, mut task: PaymentTask, phase: Phase) -> RelayResult<PaymentTask> {
        let call = Self::open_call(&task, phase)?;
        let lease = self.signer_pool.acquire(Network::Side).await?;
        let result = self.gateway.send(&lease, call).await;
        lease.release();

        match result {
            Ok(tx_hash) => {
                task.set_open_tx(phase, tx_hash);
                task.revert_reason = None;
                self.save(&mut task, phase.sent()).await?;
                info!(
                    "Payment {} {} submitted: {}",
                    crypto::format_h256(&task.payment_id),
                    phase,
                    crypto::format_h256(&tx_hash)
                );
                Ok(task)
            }
            Err(GatewayError::Reverted(reason)) => {
                warn!(
                    "Payment {} {} reverted: {}",
                    crypto::format_h256(&task.payment_id),
                    phase,
                    reason
                );
                task.revert_reason = Some(reason.clone());
                self.save(&mut task, phase.reverted()).await?;
                Err(RelayError::ChainRevert(reason))
            }
            Err(GatewayError::Transport(e)) => {
                warn!(
                    "Payment {} {} submission failed: {:#}",
                    crypto::format_h256(&task.payment_id),
                    phase,
                    e
                );
                self.save(&mut task, phase.failed_tx()).await?;
                Err(RelayError::Infrastructure(e))
            }
        }
    }

    /// Closes `phase` of a payment.
    ///
    /// - Resolved (`*_CONFIRMED_TX` / `REPLY_COMPLETED_*`): reveals the secret on
    ///   chain with `confirm` and moves to `CLOSED_*`.
    /// - Denied: moves to `CLOSED_*` without a chain call.
    /// - Unresolved and past the forced-close age: force-closed into a failure state.
    /// - Anything else is an illegal transition.
    async fn close(&self, payment_id: &H256, phase: Phase, confirm: bool) -> RelayResult<PaymentInfo> {
        let _guard = self.lock(payment_id).await;
        let mut task = self.load(payment_id).await?;
        let action = format!("close {} payment", phase);
        if task.phase() != phase {
            return Err(RelayError::illegal_state(action, task.status));
        }

        let status = task.status;
        if status == phase.confirmed() || status == phase.reply_completed() {
            let call = Self::close_call(&task, phase, confirm)?;
            let lease = self.signer_pool.acquire(Network::Side).await?;
            let tx_hash = self.gateway.send(&lease, call).await?;
            lease.release();

            task.record_close(phase, tx_hash, confirm);
            if phase == Phase::New {
                task.closed_with_confirm = confirm;
            }
            self.save(&mut task, phase.closed()).await?;
            info!(
                "Payment {} {} closed (confirm={}): {}",
                crypto::format_h256(payment_id),
                phase,
                confirm,
                crypto::format_h256(&tx_hash)
            );
            return Ok(task.info());
        }

        if status == phase.denied() {
            self.save(&mut task, phase.closed()).await?;
            info!("Payment {} {} closed after denial", crypto::format_h256(payment_id), phase);
            return Ok(task.info());
        }

        let unresolved = [phase.opened(), phase.sent(), phase.reverted(), phase.failed_tx()];
        if unresolved.contains(&status) && self.is_expired(&task, current_timestamp()) {
            let task = self.force_close_locked(task).await?;
            return Ok(task.info());
        }

        Err(RelayError::illegal_state(action, status))
    }

    /// Records an on-chain resolution of a submitted open call.
    ///
    /// Confirmed moves through `*_CONFIRMED_TX` to `REPLY_COMPLETED_*`; reverted
    /// moves to `*_REVERTED_TX`. The callback fires exactly once per resolution
    /// because only the caller that wins the `*_SENT_TX` transition reaches it.
    pub async fn confirm(&self, payment_id: &H256, outcome: TxOutcome) -> RelayResult<PaymentInfo> {
        let _guard = self.lock(payment_id).await;
        let mut task = self.load(payment_id).await?;
        if !task.status.is_sent() {
            return Err(RelayError::illegal_state("confirm", task.status));
        }
        let phase = task.phase();

        match outcome {
            TxOutcome::Pending => {}
            TxOutcome::Confirmed => {
                self.save(&mut task, phase.confirmed()).await?;
                self.notify(&task).await;
                self.save(&mut task, phase.reply_completed()).await?;
                info!("Payment {} {} confirmed", crypto::format_h256(payment_id), phase);
            }
            TxOutcome::Reverted(reason) => {
                task.revert_reason = Some(reason);
                self.save(&mut task, phase.reverted()).await?;
                self.notify(&task).await;
                warn!("Payment {} {} reverted on chain", crypto::format_h256(payment_id), phase);
            }
        }
        Ok(task.info())
    }

    /// Resubmits a failed or reverted open call.
    ///
    /// Re-reads the chain first: a broadcast may have landed after all, in which
    /// case the phase counts as confirmed. Below the retry budget the stored
    /// approval is resubmitted with a fresh signer; at the budget the task fails.
    pub async fn retry(&self, payment_id: &H256) -> RelayResult<PaymentInfo> {
        let _guard = self.lock(payment_id).await;
        let mut task = self.load(payment_id).await?;
        if !task.status.is_retriable() {
            return Err(RelayError::illegal_state("retry", task.status));
        }
        let phase = task.phase();

        let on_chain = self.gateway.payment_state(payment_id).await?;
        match (phase, on_chain) {
            (Phase::New, OnChainPaymentState::OpenedNew)
            | (Phase::Cancel, OnChainPaymentState::OpenedCancel) => {
                info!(
                    "Payment {} {} found open on chain, treating as confirmed",
                    crypto::format_h256(payment_id),
                    phase
                );
                task.revert_reason = None;
                self.save(&mut task, phase.confirmed()).await?;
                self.notify(&task).await;
                self.save(&mut task, phase.reply_completed()).await?;
                return Ok(task.info());
            }
            (Phase::New, OnChainPaymentState::ClosedNew)
            | (Phase::Cancel, OnChainPaymentState::ClosedCancel) => {
                self.save(&mut task, phase.closed()).await?;
                return Ok(task.info());
            }
            (Phase::New, OnChainPaymentState::FailedNew)
            | (Phase::Cancel, OnChainPaymentState::FailedCancel) => {
                self.save(&mut task, phase.failed()).await?;
                self.notify(&task).await;
                return Ok(task.info());
            }
            _ => {}
        }

        if task.retries(phase) >= self.settings.max_retries {
            warn!(
                "Payment {} {} exhausted {} retries",
                crypto::format_h256(payment_id),
                phase,
                self.settings.max_retries
            );
            self.save(&mut task, phase.failed()).await?;
            self.notify(&task).await;
            return Ok(task.info());
        }

        task.bump_retries(phase);
        info!(
            "Retrying payment {} {} (attempt {}/{})",
            crypto::format_h256(payment_id),
            phase,
            task.retries(phase),
            self.settings.max_retries
        );
        let task = self.submit_open(task, phase).await?;
        Ok(task.info())
    }

    /// Force-closes a non-terminal task (close without confirmation). Used by
    /// the close scheduler; a task that resolved meanwhile is left alone.
    pub async fn force_close(&self, payment_id: &H256) -> RelayResult<PaymentInfo> {
        let _guard = self.lock(payment_id).await;
        let task = self.load(payment_id).await?;
        if task.status.is_terminal() {
            return Ok(task.info());
        }
        let task = self.force_close_locked(task).await?;
        Ok(task.info())
    }

    /// Resolves the current phase from the chain's view. A `*_SENT_TX` task whose
    /// open call is still unmined is left as is, since the call may land later.
    /// Otherwise:
    /// - open on chain: submit the close call with `confirm = false`, then `FAILED_*`
    /// - closed on chain: `CLOSED_*`
    /// - failed on chain: `FAILED_*`
    /// - never opened on chain: `CLOSED_*` for a denied phase, `FAILED_*` otherwise
    async fn force_close_locked(&self, mut task: PaymentTask) -> RelayResult<PaymentTask> {
        let phase = task.phase();
        let previous = task.status;

        if previous.is_sent() {
            if let Some(open_tx) = task.open_tx(phase) {
                if self.gateway.transaction_outcome(&open_tx).await? == TxOutcome::Pending {
                    debug!(
                        "Payment {} {} open call {} still pending, not force-closing yet",
                        crypto::format_h256(&task.payment_id),
                        phase,
                        crypto::format_h256(&open_tx)
                    );
                    return Ok(task);
                }
            }
        }

        let on_chain = self.gateway.payment_state(&task.payment_id).await?;

        let target = match (phase, on_chain) {
            (Phase::New, OnChainPaymentState::OpenedNew)
            | (Phase::Cancel, OnChainPaymentState::OpenedCancel) => {
                let call = Self::close_call(&task, phase, false)?;
                let lease = self.signer_pool.acquire(Network::Side).await?;
                let tx_hash = self.gateway.send(&lease, call).await?;
                lease.release();
                task.record_close(phase, tx_hash, false);
                phase.failed()
            }
            (Phase::New, OnChainPaymentState::FailedNew)
            | (Phase::Cancel, OnChainPaymentState::FailedCancel) => phase.failed(),
            (Phase::New, OnChainPaymentState::Invalid)
            | (Phase::Cancel, OnChainPaymentState::ClosedNew) => {
                if previous == phase.denied() {
                    phase.closed()
                } else {
                    phase.failed()
                }
            }
            (Phase::Cancel, OnChainPaymentState::Invalid) => phase.failed(),
            // Closed on chain, or already past this phase
            _ => phase.closed(),
        };

        self.save(&mut task, target).await?;
        warn!(
            "Force-closed payment {} {}: {} -> {} (chain: {:?})",
            crypto::format_h256(&task.payment_id),
            phase,
            previous,
            target,
            on_chain
        );
        self.notify(&task).await;
        Ok(task)
    }

    /// Records the receipt of a broadcast close call.
    ///
    /// A confirmed close clears the pending record. A reverted one is sent again
    /// with the same `confirm` flag while the phase is still open on chain; if
    /// the chain already moved on, or the resubmission is rejected in simulation,
    /// the record is dropped.
    pub async fn settle_close(&self, payment_id: &H256, outcome: TxOutcome) -> RelayResult<PaymentInfo> {
        let _guard = self.lock(payment_id).await;
        let mut task = self.load(payment_id).await?;
        let Some(pending) = task.pending_close else {
            return Ok(task.info());
        };
        let status = task.status;
        let phase = pending.phase;

        let reason = match outcome {
            TxOutcome::Pending => return Ok(task.info()),
            TxOutcome::Confirmed => {
                task.pending_close = None;
                self.save(&mut task, status).await?;
                info!("Payment {} {} close confirmed", crypto::format_h256(payment_id), phase);
                return Ok(task.info());
            }
            TxOutcome::Reverted(reason) => reason,
        };

        let on_chain = self.gateway.payment_state(payment_id).await?;
        let still_open = matches!(
            (phase, on_chain),
            (Phase::New, OnChainPaymentState::OpenedNew) | (Phase::Cancel, OnChainPaymentState::OpenedCancel)
        );
        if !still_open {
            warn!(
                "Payment {} {} close reverted ({}) but chain is {:?}",
                crypto::format_h256(payment_id),
                phase,
                reason,
                on_chain
            );
            task.pending_close = None;
            self.save(&mut task, status).await?;
            return Ok(task.info());
        }

        let call = Self::close_call(&task, phase, pending.confirm)?;
        let lease = self.signer_pool.acquire(Network::Side).await?;
        let result = self.gateway.send(&lease, call).await;
        lease.release();

        match result {
            Ok(tx_hash) => {
                task.record_close(phase, tx_hash, pending.confirm);
                self.save(&mut task, status).await?;
                warn!(
                    "Payment {} {} close reverted ({}), resubmitted: {}",
                    crypto::format_h256(payment_id),
                    phase,
                    reason,
                    crypto::format_h256(&tx_hash)
                );
                Ok(task.info())
            }
            Err(GatewayError::Reverted(rejected)) => {
                task.pending_close = None;
                task.revert_reason = Some(rejected.clone());
                self.save(&mut task, status).await?;
                Err(RelayError::ChainRevert(rejected))
            }
            Err(GatewayError::Transport(e)) => Err(RelayError::Infrastructure(e)),
        }
    }

    /// Read model of a payment.
    pub async fn payment_info(&self, payment_id: &H256) -> RelayResult<PaymentInfo> {
        Ok(self.load(payment_id).await?.info())
    }
}
