//! Payment Module
//!
//! Data model of relayed loyalty payments. A [`PaymentTask`] carries one purchase
//! payment through two phases, the "new" payment and its optional cancellation,
//! each with its own hash lock, approval, transactions and retry counter.
//!
//! ```text
//! OPENED_NEW ──approve──▶ APPROVED_NEW_SENT_TX ──▶ APPROVED_NEW_CONFIRMED_TX ──▶ REPLY_COMPLETED_NEW ──close──▶ CLOSED_NEW
//!      │                        ├──▶ APPROVED_NEW_REVERTED_TX ─┐
//!      │                        └──▶ APPROVED_NEW_FAILED_TX ───┴─ retry / budget ─▶ FAILED_NEW
//!      └──deny──▶ DENIED_NEW ──close──▶ CLOSED_NEW
//! ```
//!
//! The cancel phase mirrors this with `_CANCEL` statuses and opens only from a
//! `CLOSED_NEW` task that was closed with confirmation.
//!
//! A task reaches `CLOSED_*` (or `FAILED_*` on a forced close) when its close
//! call is broadcast. The call stays recorded in [`PaymentTask::pending_close`]
//! until the watch scheduler has seen its receipt.

use ethereum_types::{Address, H256, U256};
use serde::{Deserialize, Serialize};
use std::fmt;

use crate::crypto;

pub mod callback;
pub mod orchestrator;

pub use callback::{HttpCallback, NoopCallback, PaymentCallback, PaymentEvent};
pub use orchestrator::{NewPaymentRequest, OrchestratorSettings, PaymentOrchestrator};

// ============================================================================
// STATUS
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum PaymentStatus {
    OpenedNew,
    ApprovedNewSentTx,
    ApprovedNewConfirmedTx,
    ApprovedNewRevertedTx,
    ApprovedNewFailedTx,
    DeniedNew,
    ReplyCompletedNew,
    ClosedNew,
    FailedNew,
    OpenedCancel,
    ApprovedCancelSentTx,
    ApprovedCancelConfirmedTx,
    ApprovedCancelRevertedTx,
    ApprovedCancelFailedTx,
    DeniedCancel,
    ReplyCompletedCancel,
    ClosedCancel,
    FailedCancel,
}

impl PaymentStatus {
    pub const ALL: [PaymentStatus; 18] = [
        PaymentStatus::OpenedNew,
        PaymentStatus::ApprovedNewSentTx,
        PaymentStatus::ApprovedNewConfirmedTx,
        PaymentStatus::ApprovedNewRevertedTx,
        PaymentStatus::ApprovedNewFailedTx,
        PaymentStatus::DeniedNew,
        PaymentStatus::ReplyCompletedNew,
        PaymentStatus::ClosedNew,
        PaymentStatus::FailedNew,
        PaymentStatus::OpenedCancel,
        PaymentStatus::ApprovedCancelSentTx,
        PaymentStatus::ApprovedCancelConfirmedTx,
        PaymentStatus::ApprovedCancelRevertedTx,
        PaymentStatus::ApprovedCancelFailedTx,
        PaymentStatus::DeniedCancel,
        PaymentStatus::ReplyCompletedCancel,
        PaymentStatus::ClosedCancel,
        PaymentStatus::FailedCancel,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            PaymentStatus::OpenedNew => "OPENED_NEW",
            PaymentStatus::ApprovedNewSentTx => "APPROVED_NEW_SENT_TX",
            PaymentStatus::ApprovedNewConfirmedTx => "APPROVED_NEW_CONFIRMED_TX",
            PaymentStatus::ApprovedNewRevertedTx => "APPROVED_NEW_REVERTED_TX",
            PaymentStatus::ApprovedNewFailedTx => "APPROVED_NEW_FAILED_TX",
            PaymentStatus::DeniedNew => "DENIED_NEW",
            PaymentStatus::ReplyCompletedNew => "REPLY_COMPLETED_NEW",
            PaymentStatus::ClosedNew => "CLOSED_NEW",
            PaymentStatus::FailedNew => "FAILED_NEW",
            PaymentStatus::OpenedCancel => "OPENED_CANCEL",
            PaymentStatus::ApprovedCancelSentTx => "APPROVED_CANCEL_SENT_TX",
            PaymentStatus::ApprovedCancelConfirmedTx => "APPROVED_CANCEL_CONFIRMED_TX",
            PaymentStatus::ApprovedCancelRevertedTx => "APPROVED_CANCEL_REVERTED_TX",
            PaymentStatus::ApprovedCancelFailedTx => "APPROVED_CANCEL_FAILED_TX",
            PaymentStatus::DeniedCancel => "DENIED_CANCEL",
            PaymentStatus::ReplyCompletedCancel => "REPLY_COMPLETED_CANCEL",
            PaymentStatus::ClosedCancel => "CLOSED_CANCEL",
            PaymentStatus::FailedCancel => "FAILED_CANCEL",
        }
    }

    pub fn phase(&self) -> Phase {
        match self {
            PaymentStatus::OpenedNew
            | PaymentStatus::ApprovedNewSentTx
            | PaymentStatus::ApprovedNewConfirmedTx
            | PaymentStatus::ApprovedNewRevertedTx
            | PaymentStatus::ApprovedNewFailedTx
            | PaymentStatus::DeniedNew
            | PaymentStatus::ReplyCompletedNew
            | PaymentStatus::ClosedNew
            | PaymentStatus::FailedNew => Phase::New,
            _ => Phase::Cancel,
        }
    }

    /// `CLOSED_*` and `FAILED_*`. A `CLOSED_NEW` task may still open a cancel phase.
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            PaymentStatus::ClosedNew
                | PaymentStatus::FailedNew
                | PaymentStatus::ClosedCancel
                | PaymentStatus::FailedCancel
        )
    }

    /// Submitted but not yet resolved on chain.
    pub fn is_sent(&self) -> bool {
        matches!(
            self,
            PaymentStatus::ApprovedNewSentTx | PaymentStatus::ApprovedCancelSentTx
        )
    }

    /// Submission failed or reverted; eligible for scheduler retry.
    pub fn is_retriable(&self) -> bool {
        matches!(
            self,
            PaymentStatus::ApprovedNewRevertedTx
                | PaymentStatus::ApprovedNewFailedTx
                | PaymentStatus::ApprovedCancelRevertedTx
                | PaymentStatus::ApprovedCancelFailedTx
        )
    }

    /// Terminal statuses that may still carry an unconfirmed close call.
    pub const SETTLED: [PaymentStatus; 4] = [
        PaymentStatus::ClosedNew,
        PaymentStatus::FailedNew,
        PaymentStatus::ClosedCancel,
        PaymentStatus::FailedCancel,
    ];

    /// Every status that is not terminal.
    pub fn non_terminal() -> Vec<PaymentStatus> {
        Self::ALL.iter().copied().filter(|s| !s.is_terminal()).collect()
    }
}

impl fmt::Display for PaymentStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// The two phases of a payment.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Phase {
    New,
    Cancel,
}

impl Phase {
    pub fn opened(self) -> PaymentStatus {
        match self {
            Phase::New => PaymentStatus::OpenedNew,
            Phase::Cancel => PaymentStatus::OpenedCancel,
        }
    }

    pub fn sent(self) -> PaymentStatus {
        match self {
            Phase::New => PaymentStatus::ApprovedNewSentTx,
            Phase::Cancel => PaymentStatus::ApprovedCancelSentTx,
        }
    }

    pub fn confirmed(self) -> PaymentStatus {
        match self {
            Phase::New => PaymentStatus::ApprovedNewConfirmedTx,
            Phase::Cancel => PaymentStatus::ApprovedCancelConfirmedTx,
        }
    }

    pub fn reverted(self) -> PaymentStatus {
        match self {
            Phase::New => PaymentStatus::ApprovedNewRevertedTx,
            Phase::Cancel => PaymentStatus::ApprovedCancelRevertedTx,
        }
    }

    pub fn failed_tx(self) -> PaymentStatus {
        match self {
            Phase::New => PaymentStatus::ApprovedNewFailedTx,
            Phase::Cancel => PaymentStatus::ApprovedCancelFailedTx,
        }
    }

    pub fn denied(self) -> PaymentStatus {
        match self {
            Phase::New => PaymentStatus::DeniedNew,
            Phase::Cancel => PaymentStatus::DeniedCancel,
        }
    }

    pub fn reply_completed(self) -> PaymentStatus {
        match self {
            Phase::New => PaymentStatus::ReplyCompletedNew,
            Phase::Cancel => PaymentStatus::ReplyCompletedCancel,
        }
    }

    pub fn closed(self) -> PaymentStatus {
        match self {
            Phase::New => PaymentStatus::ClosedNew,
            Phase::Cancel => PaymentStatus::ClosedCancel,
        }
    }

    pub fn failed(self) -> PaymentStatus {
        match self {
            Phase::New => PaymentStatus::FailedNew,
            Phase::Cancel => PaymentStatus::FailedCancel,
        }
    }
}

impl fmt::Display for Phase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Phase::New => write!(f, "new"),
            Phase::Cancel => write!(f, "cancel"),
        }
    }
}

// ============================================================================
// TASK
// ============================================================================

/// Commit/reveal pair. `lock = keccak256(secret)` goes on chain at open; the
/// secret is revealed only by the close call.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HashLock {
    pub secret: H256,
    pub lock: H256,
}

impl HashLock {
    /// Mints a lock from a fresh CSPRNG secret.
    pub fn mint() -> Self {
        let secret = crypto::random_h256();
        Self {
            secret,
            lock: crypto::keccak256(secret.as_bytes()),
        }
    }

    pub fn opens(&self) -> bool {
        crypto::keccak256(self.secret.as_bytes()) == self.lock
    }
}

/// Principal's signed approval of one phase.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Approval {
    pub signer: Address,
    #[serde(with = "crypto::serde_hex")]
    pub signature: Vec<u8>,
}

/// Close call broadcast for a phase whose receipt has not been seen yet.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct PendingClose {
    pub phase: Phase,
    pub tx_hash: H256,
    pub confirm: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PaymentTask {
    pub payment_id: H256,
    pub purchase_id: String,
    pub account: Address,
    pub shop_id: H256,
    pub currency: String,
    #[serde(with = "crypto::serde_u256_dec")]
    pub amount: U256,
    pub status: PaymentStatus,
    pub new_lock: HashLock,
    #[serde(default)]
    pub cancel_lock: Option<HashLock>,
    pub open_new_timestamp: u64,
    #[serde(default)]
    pub open_cancel_timestamp: Option<u64>,
    #[serde(default)]
    pub new_approval: Option<Approval>,
    #[serde(default)]
    pub cancel_approval: Option<Approval>,
    #[serde(default)]
    pub open_new_tx: Option<H256>,
    #[serde(default)]
    pub close_new_tx: Option<H256>,
    #[serde(default)]
    pub open_cancel_tx: Option<H256>,
    #[serde(default)]
    pub close_cancel_tx: Option<H256>,
    #[serde(default)]
    pub new_retries: u32,
    #[serde(default)]
    pub cancel_retries: u32,
    /// Whether the new phase closed with confirmation (cancel precondition)
    #[serde(default)]
    pub closed_with_confirm: bool,
    #[serde(default)]
    pub pending_close: Option<PendingClose>,
    #[serde(default)]
    pub revert_reason: Option<String>,
    pub updated_at: u64,
}

impl PaymentTask {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        payment_id: H256,
        purchase_id: String,
        account: Address,
        shop_id: H256,
        currency: String,
        amount: U256,
        new_lock: HashLock,
        now: u64,
    ) -> Self {
        Self {
            payment_id,
            purchase_id,
            account,
            shop_id,
            currency,
            amount,
            status: PaymentStatus::OpenedNew,
            new_lock,
            cancel_lock: None,
            open_new_timestamp: now,
            open_cancel_timestamp: None,
            new_approval: None,
            cancel_approval: None,
            open_new_tx: None,
            close_new_tx: None,
            open_cancel_tx: None,
            close_cancel_tx: None,
            new_retries: 0,
            cancel_retries: 0,
            closed_with_confirm: false,
            pending_close: None,
            revert_reason: None,
            updated_at: now,
        }
    }

    pub fn phase(&self) -> Phase {
        self.status.phase()
    }

    /// When the current phase was opened.
    pub fn phase_timestamp(&self, phase: Phase) -> u64 {
        match phase {
            Phase::New => self.open_new_timestamp,
            Phase::Cancel => self.open_cancel_timestamp.unwrap_or(self.open_new_timestamp),
        }
    }

    pub fn lock(&self, phase: Phase) -> Option<&HashLock> {
        match phase {
            Phase::New => Some(&self.new_lock),
            Phase::Cancel => self.cancel_lock.as_ref(),
        }
    }

    pub fn approval(&self, phase: Phase) -> Option<&Approval> {
        match phase {
            Phase::New => self.new_approval.as_ref(),
            Phase::Cancel => self.cancel_approval.as_ref(),
        }
    }

    pub fn retries(&self, phase: Phase) -> u32 {
        match phase {
            Phase::New => self.new_retries,
            Phase::Cancel => self.cancel_retries,
        }
    }

    pub fn bump_retries(&mut self, phase: Phase) {
        match phase {
            Phase::New => self.new_retries += 1,
            Phase::Cancel => self.cancel_retries += 1,
        }
    }

    pub fn open_tx(&self, phase: Phase) -> Option<H256> {
        match phase {
            Phase::New => self.open_new_tx,
            Phase::Cancel => self.open_cancel_tx,
        }
    }

    pub fn set_open_tx(&mut self, phase: Phase, tx: H256) {
        match phase {
            Phase::New => self.open_new_tx = Some(tx),
            Phase::Cancel => self.open_cancel_tx = Some(tx),
        }
    }

    pub fn set_close_tx(&mut self, phase: Phase, tx: H256) {
        match phase {
            Phase::New => self.close_new_tx = Some(tx),
            Phase::Cancel => self.close_cancel_tx = Some(tx),
        }
    }

    /// Records a broadcast close call of `phase` that still awaits its receipt.
    pub fn record_close(&mut self, phase: Phase, tx_hash: H256, confirm: bool) {
        self.set_close_tx(phase, tx_hash);
        self.pending_close = Some(PendingClose {
            phase,
            tx_hash,
            confirm,
        });
    }

    /// Moves to `status` and stamps `updated_at`.
    pub fn transition(&mut self, status: PaymentStatus, now: u64) {
        self.status = status;
        self.updated_at = now;
    }

    pub fn info(&self) -> PaymentInfo {
        PaymentInfo::from(self)
    }
}

/// Read model of a task. Never carries the secrets.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PaymentInfo {
    pub payment_id: H256,
    pub purchase_id: String,
    pub account: Address,
    pub shop_id: H256,
    pub currency: String,
    #[serde(with = "crypto::serde_u256_dec")]
    pub amount: U256,
    pub status: PaymentStatus,
    pub secret_lock: H256,
    pub cancel_secret_lock: Option<H256>,
    pub open_new_timestamp: u64,
    pub open_cancel_timestamp: Option<u64>,
    pub open_new_tx_hash: Option<H256>,
    pub close_new_tx_hash: Option<H256>,
    pub open_cancel_tx_hash: Option<H256>,
    pub close_cancel_tx_hash: Option<H256>,
    pub revert_reason: Option<String>,
}

impl From<&PaymentTask> for PaymentInfo {
    fn from(task: &PaymentTask) -> Self {
        Self {
            payment_id: task.payment_id,
            purchase_id: task.purchase_id.clone(),
            account: task.account,
            shop_id: task.shop_id,
            currency: task.currency.clone(),
            amount: task.amount,
            status: task.status,
            secret_lock: task.new_lock.lock,
            cancel_secret_lock: task.cancel_lock.as_ref().map(|l| l.lock),
            open_new_timestamp: task.open_new_timestamp,
            open_cancel_timestamp: task.open_cancel_timestamp,
            open_new_tx_hash: task.open_new_tx,
            close_new_tx_hash: task.close_new_tx,
            open_cancel_tx_hash: task.open_cancel_tx,
            close_cancel_tx_hash: task.close_cancel_tx,
            revert_reason: task.revert_reason.clone(),
        }
    }
}

/// Current Unix timestamp in seconds.
pub fn current_timestamp() -> u64 {
    chrono::Utc::now().timestamp().max(0) as u64
}
