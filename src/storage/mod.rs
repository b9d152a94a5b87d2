//! Storage Module
//!
//! Durable record of payment tasks. The relay only relies on the contract of
//! [`PaymentTaskStore`]: lookups by id and by status set, and status-guarded
//! updates that are read-your-writes consistent per payment id.

use async_trait::async_trait;
use ethereum_types::H256;
use thiserror::Error;

use crate::payment::{PaymentStatus, PaymentTask};

pub mod payment_tasks;

// Re-export for convenience
pub use payment_tasks::{JsonFileTaskStore, MemoryTaskStore};

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("payment {0} already exists")]
    Duplicate(String),

    #[error("payment {0} not found")]
    NotFound(String),

    /// The stored status moved on since the caller read the task.
    #[error("payment {id} is {actual}, expected {expected}")]
    StaleStatus {
        id: String,
        expected: String,
        actual: String,
    },

    #[error("storage failure: {0:#}")]
    Io(anyhow::Error),
}

pub type StoreResult<T> = std::result::Result<T, StoreError>;

#[async_trait]
pub trait PaymentTaskStore: Send + Sync {
    /// Stores a new task. Fails with `Duplicate` if the id is taken.
    async fn insert(&self, task: PaymentTask) -> StoreResult<()>;

    async fn get(&self, payment_id: &H256) -> StoreResult<Option<PaymentTask>>;

    /// Replaces the stored task if its status still equals `expected`.
    async fn update(&self, task: &PaymentTask, expected: PaymentStatus) -> StoreResult<()>;

    /// All tasks whose status is one of `statuses`.
    async fn find_by_status(&self, statuses: &[PaymentStatus]) -> StoreResult<Vec<PaymentTask>>;

    async fn contains(&self, payment_id: &H256) -> StoreResult<bool> {
        Ok(self.get(payment_id).await?.is_some())
    }
}
