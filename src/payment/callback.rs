//! Payment notification callbacks.
//!
//! The orchestrator reports every resolution of a payment phase exactly once.
//! Delivery failures are logged and not retried; the task state on the relay
//! stays authoritative and can be polled through the info endpoint.

use async_trait::async_trait;
use ethereum_types::{Address, H256, U256};
use reqwest::Client;
use serde::Serialize;
use std::time::Duration;
use tracing::{debug, warn};

use super::{PaymentStatus, PaymentTask, Phase};
use crate::crypto;

/// Body posted to the shop endpoint.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PaymentEvent {
    pub payment_id: H256,
    pub purchase_id: String,
    pub account: Address,
    pub shop_id: H256,
    pub phase: Phase,
    pub status: PaymentStatus,
    #[serde(with = "crypto::serde_u256_dec")]
    pub amount: U256,
    pub currency: String,
    pub tx_hash: Option<H256>,
    pub reason: Option<String>,
}

impl PaymentEvent {
    pub fn from_task(task: &PaymentTask) -> Self {
        let phase = task.phase();
        Self {
            payment_id: task.payment_id,
            purchase_id: task.purchase_id.clone(),
            account: task.account,
            shop_id: task.shop_id,
            phase,
            status: task.status,
            amount: task.amount,
            currency: task.currency.clone(),
            tx_hash: task.open_tx(phase),
            reason: task.revert_reason.clone(),
        }
    }
}

#[async_trait]
pub trait PaymentCallback: Send + Sync {
    async fn notify(&self, event: PaymentEvent);
}

/// Callback used when no endpoint is configured.
pub struct NoopCallback;

#[async_trait]
impl PaymentCallback for NoopCallback {
    async fn notify(&self, event: PaymentEvent) {
        debug!(
            "No callback endpoint, dropping {} event for {}",
            event.status,
            crypto::format_h256(&event.payment_id)
        );
    }
}

/// POSTs events as JSON to a shop endpoint.
pub struct HttpCallback {
    client: Client,
    url: String,
    access_key: Option<String>,
}

impl HttpCallback {
    pub fn new(url: &str, access_key: Option<String>, timeout: Duration) -> anyhow::Result<Self> {
        let client = Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| anyhow::anyhow!("Failed to create HTTP client: {}", e))?;
        Ok(Self {
            client,
            url: url.to_string(),
            access_key,
        })
    }
}

#[async_trait]
impl PaymentCallback for HttpCallback {
    async fn notify(&self, event: PaymentEvent) {
        let mut request = self.client.post(&self.url).json(&event);
        if let Some(ref key) = self.access_key {
            request = request.header("Authorization", key);
        }

        match request.send().await {
            Ok(response) if response.status().is_success() => {
                debug!(
                    "Delivered {} callback for {}",
                    event.status,
                    crypto::format_h256(&event.payment_id)
                );
            }
            Ok(response) => warn!(
                "Callback for {} rejected by {}: HTTP {}",
                crypto::format_h256(&event.payment_id),
                self.url,
                response.status()
            ),
            Err(e) => warn!(
                "Callback for {} to {} failed: {}",
                crypto::format_h256(&event.payment_id),
                self.url,
                e
            ),
        }
    }
}
