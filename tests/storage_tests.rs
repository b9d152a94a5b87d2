//! Unit tests for the payment task stores

use ethereum_types::{H256, U256};
use std::path::PathBuf;

use loyalty_relay::payment::{HashLock, PaymentStatus, PaymentTask};
use loyalty_relay::storage::{JsonFileTaskStore, MemoryTaskStore, PaymentTaskStore, StoreError};

#[path = "mod.rs"]
mod test_helpers;
use test_helpers::{address, DUMMY_AMOUNT, DUMMY_CURRENCY, DUMMY_PURCHASE_ID};

// ============================================================================
// HELPER FUNCTIONS
// ============================================================================

fn task(seed: u64, opened_at: u64) -> PaymentTask {
    PaymentTask::new(
        H256::from_low_u64_be(seed),
        DUMMY_PURCHASE_ID.to_string(),
        address(0x0a),
        H256::from_low_u64_be(0x5109),
        DUMMY_CURRENCY.to_string(),
        U256::from(DUMMY_AMOUNT),
        HashLock::mint(),
        opened_at,
    )
}

fn temp_store_path(name: &str) -> PathBuf {
    let dir = std::env::temp_dir().join(format!("loyalty-relay-store-{}-{}", std::process::id(), name));
    let _ = std::fs::remove_dir_all(&dir);
    dir.join("tasks").join("payment_tasks.json")
}

/// Runs the store contract checks shared by both backends.
async fn exercise_store_contract(store: &dyn PaymentTaskStore) {
    let mut first = task(1, 100);
    store.insert(first.clone()).await.unwrap();
    store.insert(task(2, 50)).await.unwrap();

    assert!(matches!(
        store.insert(task(1, 100)).await,
        Err(StoreError::Duplicate(_))
    ));
    assert!(store.contains(&first.payment_id).await.unwrap());
    assert!(store.get(&H256::from_low_u64_be(99)).await.unwrap().is_none());

    first.transition(PaymentStatus::DeniedNew, 110);
    store.update(&first, PaymentStatus::OpenedNew).await.unwrap();
    assert_eq!(
        store.get(&first.payment_id).await.unwrap().unwrap().status,
        PaymentStatus::DeniedNew
    );

    // A writer that read the task before the first update loses.
    let mut stale = task(1, 100);
    stale.transition(PaymentStatus::ApprovedNewSentTx, 111);
    assert!(matches!(
        store.update(&stale, PaymentStatus::OpenedNew).await,
        Err(StoreError::StaleStatus { .. })
    ));
    assert_eq!(
        store.get(&first.payment_id).await.unwrap().unwrap().status,
        PaymentStatus::DeniedNew
    );

    assert!(matches!(
        store.update(&task(7, 1), PaymentStatus::OpenedNew).await,
        Err(StoreError::NotFound(_))
    ));

    let opened = store.find_by_status(&[PaymentStatus::OpenedNew]).await.unwrap();
    assert_eq!(opened.len(), 1);
    assert_eq!(opened[0].payment_id, H256::from_low_u64_be(2));

    let both = store
        .find_by_status(&[PaymentStatus::OpenedNew, PaymentStatus::DeniedNew])
        .await
        .unwrap();
    let ids: Vec<H256> = both.iter().map(|t| t.payment_id).collect();
    assert_eq!(ids, vec![H256::from_low_u64_be(2), H256::from_low_u64_be(1)]);
}

// ============================================================================
// BACKENDS
// ============================================================================

/// Test the in-memory store contract
/// What is tested: insert, duplicate rejection, status-guarded update, find_by_status ordering
/// Why: the orchestrator relies on the guarded update to serialize transitions
#[tokio::test]
async fn test_memory_store_contract() {
    let store = MemoryTaskStore::new();
    exercise_store_contract(&store).await;
    assert_eq!(store.len().await, 2);
}

/// Test the JSON file store contract
/// What is tested: the same contract as the in-memory store, on a fresh file
/// Why: both backends are interchangeable behind the trait
#[tokio::test]
async fn test_json_store_contract() {
    let path = temp_store_path("contract");
    let store = JsonFileTaskStore::open(&path).await.unwrap();
    exercise_store_contract(&store).await;
    assert!(path.exists());
}

/// Test that tasks survive a restart
/// What is tested: reopening the file returns the same tasks, locks and statuses
/// Why: a restarted relay must still be able to close open payments with their secrets
#[tokio::test]
async fn test_json_store_persists_across_reopen() {
    let path = temp_store_path("reopen");
    let mut stored = task(3, 200);
    stored.open_new_tx = Some(H256::from_low_u64_be(0xabc));
    {
        let store = JsonFileTaskStore::open(&path).await.unwrap();
        store.insert(stored.clone()).await.unwrap();
        stored.transition(PaymentStatus::ApprovedNewSentTx, 201);
        store.update(&stored, PaymentStatus::OpenedNew).await.unwrap();
    }

    let reopened = JsonFileTaskStore::open(&path).await.unwrap();
    let loaded = reopened.get(&stored.payment_id).await.unwrap().unwrap();
    assert_eq!(loaded.status, PaymentStatus::ApprovedNewSentTx);
    assert_eq!(loaded.new_lock, stored.new_lock);
    assert!(loaded.new_lock.opens());
    assert_eq!(loaded.amount, U256::from(DUMMY_AMOUNT));
    assert_eq!(loaded.open_new_tx, Some(H256::from_low_u64_be(0xabc)));
    assert_eq!(loaded.updated_at, 201);
}

/// Test that a rejected write leaves the file untouched
/// What is tested: a stale update is not persisted
/// Why: the file and the in-memory map must never diverge
#[tokio::test]
async fn test_json_store_rejected_write_not_persisted() {
    let path = temp_store_path("rejected");
    let mut stored = task(4, 300);
    {
        let store = JsonFileTaskStore::open(&path).await.unwrap();
        store.insert(stored.clone()).await.unwrap();
        stored.transition(PaymentStatus::ClosedNew, 301);
        assert!(store.update(&stored, PaymentStatus::DeniedNew).await.is_err());
    }

    let reopened = JsonFileTaskStore::open(&path).await.unwrap();
    let loaded = reopened.get(&stored.payment_id).await.unwrap().unwrap();
    assert_eq!(loaded.status, PaymentStatus::OpenedNew);
}

/// Test that a corrupt file is reported
/// What is tested: open fails on a file that is not a task list
/// Why: starting with an empty store over a damaged file would lose open payments
#[tokio::test]
async fn test_json_store_rejects_corrupt_file() {
    let path = temp_store_path("corrupt");
    std::fs::create_dir_all(path.parent().unwrap()).unwrap();
    std::fs::write(&path, "{ not json").unwrap();

    assert!(JsonFileTaskStore::open(&path).await.is_err());
}
