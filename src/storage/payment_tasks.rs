//! Payment Task Storage
//!
//! Two [`PaymentTaskStore`] backends: an in-memory map, and the same map
//! snapshotted to a JSON file after every write so tasks survive restarts.

use anyhow::Context;
use async_trait::async_trait;
use ethereum_types::H256;
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use tokio::sync::RwLock;
use tracing::{debug, info};

use super::{PaymentTaskStore, StoreError, StoreResult};
use crate::crypto;
use crate::payment::{PaymentStatus, PaymentTask};

type TaskMap = HashMap<H256, PaymentTask>;

fn apply_insert(tasks: &mut TaskMap, task: PaymentTask) -> StoreResult<()> {
    if tasks.contains_key(&task.payment_id) {
        return Err(StoreError::Duplicate(crypto::format_h256(&task.payment_id)));
    }
    tasks.insert(task.payment_id, task);
    Ok(())
}

fn apply_update(tasks: &mut TaskMap, task: &PaymentTask, expected: PaymentStatus) -> StoreResult<()> {
    let id = crypto::format_h256(&task.payment_id);
    let stored = tasks
        .get_mut(&task.payment_id)
        .ok_or_else(|| StoreError::NotFound(id.clone()))?;
    if stored.status != expected {
        return Err(StoreError::StaleStatus {
            id,
            expected: expected.to_string(),
            actual: stored.status.to_string(),
        });
    }
    *stored = task.clone();
    Ok(())
}

fn select_by_status(tasks: &TaskMap, statuses: &[PaymentStatus]) -> Vec<PaymentTask> {
    let mut found: Vec<PaymentTask> = tasks
        .values()
        .filter(|t| statuses.contains(&t.status))
        .cloned()
        .collect();
    found.sort_by_key(|t| t.open_new_timestamp);
    found
}

// ============================================================================
// IN-MEMORY STORE
// ============================================================================

/// In-memory task store. Thread-safe via RwLock.
pub struct MemoryTaskStore {
    tasks: RwLock<TaskMap>,
}

impl MemoryTaskStore {
    pub fn new() -> Self {
        Self {
            tasks: RwLock::new(HashMap::new()),
        }
    }

    pub async fn len(&self) -> usize {
        self.tasks.read().await.len()
    }
}

impl Default for MemoryTaskStore {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl PaymentTaskStore for MemoryTaskStore {
    async fn insert(&self, task: PaymentTask) -> StoreResult<()> {
        let mut tasks = self.tasks.write().await;
        apply_insert(&mut tasks, task)
    }

    async fn get(&self, payment_id: &H256) -> StoreResult<Option<PaymentTask>> {
        Ok(self.tasks.read().await.get(payment_id).cloned())
    }

    async fn update(&self, task: &PaymentTask, expected: PaymentStatus) -> StoreResult<()> {
        let mut tasks = self.tasks.write().await;
        apply_update(&mut tasks, task, expected)
    }

    async fn find_by_status(&self, statuses: &[PaymentStatus]) -> StoreResult<Vec<PaymentTask>> {
        Ok(select_by_status(&*self.tasks.read().await, statuses))
    }
}

// ============================================================================
// JSON FILE STORE
// ============================================================================

/// Task store persisted as a JSON snapshot.
///
/// Every write is applied to a copy of the map, written to `<path>.tmp` and
/// renamed over `<path>`; the in-memory map only changes once the file has.
pub struct JsonFileTaskStore {
    path: PathBuf,
    tasks: RwLock<TaskMap>,
}

impl JsonFileTaskStore {
    /// Opens the store at `path`, loading existing tasks if the file exists.
    pub async fn open(path: impl AsRef<Path>) -> anyhow::Result<Self> {
        let path = path.as_ref().to_path_buf();
        let tasks = if tokio::fs::try_exists(&path).await.unwrap_or(false) {
            let content = tokio::fs::read_to_string(&path)
                .await
                .with_context(|| format!("Failed to read task store {}", path.display()))?;
            let list: Vec<PaymentTask> = serde_json::from_str(&content)
                .with_context(|| format!("Failed to parse task store {}", path.display()))?;
            list.into_iter().map(|t| (t.payment_id, t)).collect()
        } else {
            if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
                tokio::fs::create_dir_all(parent)
                    .await
                    .with_context(|| format!("Failed to create {}", parent.display()))?;
            }
            HashMap::new()
        };
        info!("Opened task store {} with {} task(s)", path.display(), tasks.len());
        Ok(Self {
            path,
            tasks: RwLock::new(tasks),
        })
    }

    async fn persist(&self, tasks: &TaskMap) -> StoreResult<()> {
        let mut list: Vec<&PaymentTask> = tasks.values().collect();
        list.sort_by_key(|t| t.open_new_timestamp);
        let json = serde_json::to_vec_pretty(&list)
            .context("Failed to serialize task store")
            .map_err(StoreError::Io)?;

        let tmp = self.path.with_extension("tmp");
        tokio::fs::write(&tmp, json)
            .await
            .with_context(|| format!("Failed to write {}", tmp.display()))
            .map_err(StoreError::Io)?;
        tokio::fs::rename(&tmp, &self.path)
            .await
            .with_context(|| format!("Failed to replace {}", self.path.display()))
            .map_err(StoreError::Io)?;
        debug!("Persisted {} task(s) to {}", list.len(), self.path.display());
        Ok(())
    }
}

#[async_trait]
impl PaymentTaskStore for JsonFileTaskStore {
    async fn insert(&self, task: PaymentTask) -> StoreResult<()> {
        let mut tasks = self.tasks.write().await;
        let mut next = tasks.clone();
        apply_insert(&mut next, task)?;
        self.persist(&next).await?;
        *tasks = next;
        Ok(())
    }

    async fn get(&self, payment_id: &H256) -> StoreResult<Option<PaymentTask>> {
        Ok(self.tasks.read().await.get(payment_id).cloned())
    }

    async fn update(&self, task: &PaymentTask, expected: PaymentStatus) -> StoreResult<()> {
        let mut tasks = self.tasks.write().await;
        let mut next = tasks.clone();
        apply_update(&mut next, task, expected)?;
        self.persist(&next).await?;
        *tasks = next;
        Ok(())
    }

    async fn find_by_status(&self, statuses: &[PaymentStatus]) -> StoreResult<Vec<PaymentTask>> {
        Ok(select_by_status(&*self.tasks.read().await, statuses))
    }
}
