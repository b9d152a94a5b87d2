//! Watch scheduler
//!
//! Every `watch_interval_ms`:
//! 1. Polls the outcome of each `*_SENT_TX` open call and reports it to the orchestrator
//! 2. Resubmits each `*_REVERTED_TX` / `*_FAILED_TX` task within its retry budget
//! 3. Polls the receipt of each close call not yet seen mined

use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, error, info, warn};

use super::TickReport;
use crate::crypto;
use crate::gateway::{ContractGateway, TxOutcome};
use crate::payment::{PaymentOrchestrator, PaymentStatus};
use crate::storage::PaymentTaskStore;

const SENT: [PaymentStatus; 2] = [
    PaymentStatus::ApprovedNewSentTx,
    PaymentStatus::ApprovedCancelSentTx,
];

const RETRIABLE: [PaymentStatus; 4] = [
    PaymentStatus::ApprovedNewRevertedTx,
    PaymentStatus::ApprovedNewFailedTx,
    PaymentStatus::ApprovedCancelRevertedTx,
    PaymentStatus::ApprovedCancelFailedTx,
];

pub struct WatchScheduler {
    orchestrator: Arc<PaymentOrchestrator>,
    store: Arc<dyn PaymentTaskStore>,
    /// Side chain gateway, for transaction receipts
    gateway: Arc<dyn ContractGateway>,
    interval: Duration,
}

impl WatchScheduler {
    pub fn new(
        orchestrator: Arc<PaymentOrchestrator>,
        store: Arc<dyn PaymentTaskStore>,
        gateway: Arc<dyn ContractGateway>,
        interval: Duration,
    ) -> Self {
        Self {
            orchestrator,
            store,
            gateway,
            interval,
        }
    }

    pub async fn tick(&self) -> anyhow::Result<TickReport> {
        let mut report = TickReport::default();
        // Snapshot both sets first so a task moves at most one step per pass
        let sent = self.store.find_by_status(&SENT).await?;
        let retriable = self.store.find_by_status(&RETRIABLE).await?;
        let closing: Vec<_> = self
            .store
            .find_by_status(&PaymentStatus::SETTLED)
            .await?
            .into_iter()
            .filter(|task| task.pending_close.is_some())
            .collect();

        for task in sent {
            report.scanned += 1;
            let id = crypto::format_h256(&task.payment_id);
            let Some(tx_hash) = task.open_tx(task.phase()) else {
                warn!("Payment {} is {} without a transaction hash", id, task.status);
                report.failed += 1;
                continue;
            };

            let outcome = match self.gateway.transaction_outcome(&tx_hash).await {
                Ok(outcome) => outcome,
                Err(e) => {
                    report.failed += 1;
                    warn!("Receipt lookup for {} failed: {:#}", id, e);
                    continue;
                }
            };
            if outcome == TxOutcome::Pending {
                debug!("Payment {} still pending", id);
                continue;
            }

            match self.orchestrator.confirm(&task.payment_id, outcome).await {
                Ok(info) => {
                    report.advanced += 1;
                    info!("Watch scheduler resolved {}: {}", id, info.status);
                }
                Err(e) => {
                    report.failed += 1;
                    warn!("Watch scheduler could not resolve {}: {}", id, e);
                }
            }
        }

        for task in retriable {
            report.scanned += 1;
            let id = crypto::format_h256(&task.payment_id);

            match self.orchestrator.retry(&task.payment_id).await {
                Ok(info) => {
                    report.advanced += 1;
                    info!("Watch scheduler moved {}: {} -> {}", id, task.status, info.status);
                }
                Err(e) => {
                    report.failed += 1;
                    warn!("Retry of {} failed: {}", id, e);
                }
            }
        }

        for task in closing {
            let Some(pending) = task.pending_close else {
                continue;
            };
            report.scanned += 1;
            let id = crypto::format_h256(&task.payment_id);

            let outcome = match self.gateway.transaction_outcome(&pending.tx_hash).await {
                Ok(TxOutcome::Pending) => {
                    debug!("Close of payment {} still pending", id);
                    continue;
                }
                Ok(outcome) => outcome,
                Err(e) => {
                    report.failed += 1;
                    warn!("Close receipt lookup for {} failed: {:#}", id, e);
                    continue;
                }
            };

            match self.orchestrator.settle_close(&task.payment_id, outcome).await {
                Ok(_) => report.advanced += 1,
                Err(e) => {
                    report.failed += 1;
                    warn!("Watch scheduler could not settle close of {}: {}", id, e);
                }
            }
        }

        Ok(report)
    }

    pub async fn run(&self) {
        info!("Watch scheduler started (interval: {:?})", self.interval);

        loop {
            if let Err(e) = self.tick().await {
                error!("Watch scheduler pass failed: {:#}", e);
            }
            tokio::time::sleep(self.interval).await;
        }
    }
}
