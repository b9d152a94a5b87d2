//! Close scheduler
//!
//! Every `close_interval_ms`, force-closes each non-terminal task whose current
//! phase opened more than `forced_close_second` ago.

use std::sync::Arc;
use std::time::Duration;
use tracing::{error, info, warn};

use super::TickReport;
use crate::crypto;
use crate::payment::{current_timestamp, PaymentOrchestrator, PaymentStatus};
use crate::storage::PaymentTaskStore;

pub struct CloseScheduler {
    orchestrator: Arc<PaymentOrchestrator>,
    store: Arc<dyn PaymentTaskStore>,
    interval: Duration,
}

impl CloseScheduler {
    pub fn new(
        orchestrator: Arc<PaymentOrchestrator>,
        store: Arc<dyn PaymentTaskStore>,
        interval: Duration,
    ) -> Self {
        Self {
            orchestrator,
            store,
            interval,
        }
    }

    /// One pass over the expired non-terminal tasks.
    ///
    /// Per-task failures are logged and left for the next pass.
    ///
    /// # Arguments
    ///
    /// * `now` - Unix timestamp the task ages are measured against
    pub async fn tick(&self, now: u64) -> anyhow::Result<TickReport> {
        let candidates = self.store.find_by_status(&PaymentStatus::non_terminal()).await?;
        let mut report = TickReport::default();

        for task in candidates {
            if !self.orchestrator.is_expired(&task, now) {
                continue;
            }
            report.scanned += 1;
            let id = crypto::format_h256(&task.payment_id);

            match self.orchestrator.force_close(&task.payment_id).await {
                Ok(info) if info.status != task.status => {
                    report.advanced += 1;
                    info!("Close scheduler resolved {}: {} -> {}", id, task.status, info.status);
                }
                Ok(_) => {}
                Err(e) => {
                    report.failed += 1;
                    warn!("Close scheduler could not force-close {}: {}", id, e);
                }
            }
        }

        Ok(report)
    }

    pub async fn run(&self) {
        info!("Close scheduler started (interval: {:?})", self.interval);

        loop {
            if let Err(e) = self.tick(current_timestamp()).await {
                error!("Close scheduler pass failed: {:#}", e);
            }
            tokio::time::sleep(self.interval).await;
        }
    }
}
