//! Unit tests for the signer pool
//!
//! Leases must be exclusive, bounded in wait time, and released on every exit path.

use std::collections::HashSet;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use loyalty_relay::config::{Config, Network};
use loyalty_relay::error::{ErrorCode, RelayError, RelayResult};
use loyalty_relay::signer_pool::SignerPool;

#[path = "mod.rs"]
mod test_helpers;
use test_helpers::{address, key, signer_pool};

fn single_signer_pool(timeout: Duration) -> SignerPool {
    SignerPool::new(timeout).with_signers(Network::Side, vec![key(0x51)])
}

// ============================================================================
// EXCLUSIVITY
// ============================================================================

/// Test that no signer is lent twice at once
/// What is tested: concurrent borrowers of a one-signer pool never overlap
/// Why: two transactions from one wallet at once would collide on the account nonce
#[tokio::test]
async fn test_leases_are_exclusive() {
    let pool = Arc::new(single_signer_pool(Duration::from_secs(5)));
    let holders = Arc::new(AtomicUsize::new(0));
    let max_seen = Arc::new(AtomicUsize::new(0));

    let mut handles = Vec::new();
    for _ in 0..8 {
        let pool = pool.clone();
        let holders = holders.clone();
        let max_seen = max_seen.clone();
        handles.push(tokio::spawn(async move {
            let lease = pool.acquire(Network::Side).await.unwrap();
            let now = holders.fetch_add(1, Ordering::SeqCst) + 1;
            max_seen.fetch_max(now, Ordering::SeqCst);
            tokio::time::sleep(Duration::from_millis(5)).await;
            holders.fetch_sub(1, Ordering::SeqCst);
            drop(lease);
        }));
    }
    for handle in handles {
        handle.await.unwrap();
    }

    assert_eq!(max_seen.load(Ordering::SeqCst), 1);
    assert_eq!(pool.available(Network::Side), 1);
}

/// Test that simultaneous leases get distinct wallets
/// What is tested: both side signers are handed out, then the pool is exhausted
/// Why: the pool must use every configured wallet
#[tokio::test]
async fn test_distinct_signers() {
    let pool = signer_pool();

    let first = pool.acquire(Network::Side).await.unwrap();
    let second = pool.acquire(Network::Side).await.unwrap();

    let addresses: HashSet<_> = [first.address(), second.address()].into_iter().collect();
    assert_eq!(addresses, [address(0x51), address(0x52)].into_iter().collect());
    assert_eq!(first.network(), Network::Side);
    assert_eq!(pool.available(Network::Side), 0);
    assert_eq!(pool.available(Network::Main), 1);
}

/// Test that a lease prints without its key
/// What is tested: Debug output of a lease names the network and wallet address only
/// Why: leases end up in assertion and log output, the private key must not
#[tokio::test]
async fn test_lease_debug_hides_key() {
    let pool = single_signer_pool(Duration::from_millis(50));
    let lease = pool.acquire(Network::Side).await.unwrap();

    let printed = format!("{:?}", lease);
    assert!(printed.contains("Side"));
    assert!(printed.contains(&loyalty_relay::crypto::format_address(&address(0x51))));
    assert!(!printed.contains(&hex::encode([0x51u8; 32])));
}

// ============================================================================
// TIMEOUTS AND RELEASE
// ============================================================================

/// Test that waiting for a busy pool times out
/// What is tested: acquire fails with SignerUnavailable after the acquire timeout
/// Why: requests must fail rather than hang when all wallets are busy
#[tokio::test]
async fn test_acquire_times_out() {
    let pool = single_signer_pool(Duration::from_millis(50));
    let _held = pool.acquire(Network::Side).await.unwrap();

    let err = pool.acquire(Network::Side).await.unwrap_err();
    assert!(matches!(err, RelayError::SignerUnavailable(_)));
    assert_eq!(err.code(), ErrorCode::SignerUnavailable);
    assert_eq!(err.code().as_u16(), 8);
}

/// Test that a waiter is served when a lease is released
/// What is tested: a blocked acquire completes once the holder drops its lease
/// Why: release must wake waiters, not only mark the item free
#[tokio::test]
async fn test_waiter_served_after_release() {
    let pool = Arc::new(single_signer_pool(Duration::from_secs(2)));
    let held = pool.acquire(Network::Side).await.unwrap();

    let waiter = {
        let pool = pool.clone();
        tokio::spawn(async move { pool.acquire(Network::Side).await.map(|l| l.address()) })
    };
    tokio::time::sleep(Duration::from_millis(20)).await;
    held.release();

    assert_eq!(waiter.await.unwrap().unwrap(), address(0x51));
}

/// Test release on early return
/// What is tested: a lease held by a function that fails with `?` is returned to the pool
/// Why: every error path of a relayed operation must give the wallet back
#[tokio::test]
async fn test_release_on_error_path() {
    async fn failing_operation(pool: &SignerPool) -> RelayResult<()> {
        let _lease = pool.acquire(Network::Side).await?;
        Err(RelayError::validation("rejected after acquiring"))
    }

    let pool = single_signer_pool(Duration::from_millis(50));
    assert!(failing_operation(&pool).await.is_err());
    assert_eq!(pool.available(Network::Side), 1);
    assert!(pool.acquire(Network::Side).await.is_ok());
}

/// Test a network without signers
/// What is tested: acquire on an unconfigured network fails immediately
/// Why: misconfiguration must surface as SignerUnavailable, not a hang
#[tokio::test]
async fn test_network_without_signers() {
    let pool = single_signer_pool(Duration::from_secs(5));

    let err = pool.acquire(Network::Main).await.unwrap_err();
    assert_eq!(err.code(), ErrorCode::SignerUnavailable);
    assert_eq!(pool.size(Network::Main), 0);
}

// ============================================================================
// CONFIGURATION
// ============================================================================

/// Test building the pool from configured environment variables
/// What is tested: from_config parses the keys named by each chain's signer_keys_env
/// Why: this is how the service builds its pool at startup
#[test]
fn test_from_config() {
    let mut config = Config::default();
    config.side_chain.signer_keys_env = "LOYALTY_RELAY_TEST_POOL_SIDE_KEYS".to_string();
    config.main_chain.signer_keys_env = "LOYALTY_RELAY_TEST_POOL_MAIN_KEYS".to_string();
    std::env::set_var(
        "LOYALTY_RELAY_TEST_POOL_SIDE_KEYS",
        format!("0x{},{}", hex::encode(key(0x71).to_bytes()), hex::encode(key(0x72).to_bytes())),
    );
    std::env::set_var("LOYALTY_RELAY_TEST_POOL_MAIN_KEYS", hex::encode(key(0x73).to_bytes()));

    let pool = SignerPool::from_config(&config).unwrap();
    assert_eq!(pool.size(Network::Side), 2);
    assert_eq!(pool.size(Network::Main), 1);
    assert_eq!(pool.items(Network::Main)[0].address(), address(0x73));

    std::env::set_var("LOYALTY_RELAY_TEST_POOL_MAIN_KEYS", "0xnothex");
    assert!(SignerPool::from_config(&config).is_err());
}
