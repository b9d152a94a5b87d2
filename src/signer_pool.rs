//! Signer Pool Module
//!
//! Owns the fee-paying wallets of each network and lends them out one borrower
//! at a time, so two relayed transactions never race for the same account nonce.
//!
//! A borrow is represented by a [`SignerLease`]. Dropping the lease returns the
//! wallet to the pool, which makes release unconditional on every exit path of
//! the borrowing operation, including `?` early returns and panics.

use anyhow::Result;
use ethereum_types::Address;
use k256::ecdsa::SigningKey;
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{OwnedSemaphorePermit, Semaphore};
use tracing::{debug, info, warn};

use crate::config::{Config, Network};
use crate::crypto;
use crate::error::{RelayError, RelayResult};

// ============================================================================
// SIGNER ITEMS
// ============================================================================

/// One fee-paying wallet.
pub struct SignerItem {
    network: Network,
    key: SigningKey,
    address: Address,
    in_use: AtomicBool,
}

impl SignerItem {
    fn new(network: Network, key: SigningKey) -> Self {
        let address = crypto::address_of(&key);
        Self {
            network,
            key,
            address,
            in_use: AtomicBool::new(false),
        }
    }

    pub fn address(&self) -> Address {
        self.address
    }

    pub fn is_in_use(&self) -> bool {
        self.in_use.load(Ordering::Acquire)
    }

    /// Marks the item busy if it is free. Returns whether this call claimed it.
    fn try_claim(&self) -> bool {
        self.in_use
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .is_ok()
    }
}

impl std::fmt::Debug for SignerItem {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SignerItem")
            .field("network", &self.network)
            .field("address", &crypto::format_address(&self.address))
            .field("in_use", &self.is_in_use())
            .finish()
    }
}

/// Exclusive borrow of a [`SignerItem`].
pub struct SignerLease {
    item: Arc<SignerItem>,
    // Dropped after `Drop::drop` has cleared `in_use`, so a woken waiter
    // always finds a free item.
    _permit: OwnedSemaphorePermit,
}

impl SignerLease {
    pub fn address(&self) -> Address {
        self.item.address
    }

    pub fn network(&self) -> Network {
        self.item.network
    }

    pub fn key(&self) -> &SigningKey {
        &self.item.key
    }

    /// Returns the signer to the pool.
    pub fn release(self) {
        drop(self);
    }
}

impl std::fmt::Debug for SignerLease {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SignerLease")
            .field("network", &self.item.network)
            .field("address", &crypto::format_address(&self.item.address))
            .finish()
    }
}

impl Drop for SignerLease {
    fn drop(&mut self) {
        self.item.in_use.store(false, Ordering::Release);
        debug!(
            "Released {} signer {}",
            self.item.network,
            crypto::format_address(&self.item.address)
        );
    }
}

// ============================================================================
// SIGNER POOL
// ============================================================================

struct NetworkSigners {
    items: Vec<Arc<SignerItem>>,
    permits: Arc<Semaphore>,
}

/// Pool of fee-paying wallets, per network.
pub struct SignerPool {
    networks: HashMap<Network, NetworkSigners>,
    acquire_timeout: Duration,
}

impl SignerPool {
    /// Creates an empty pool. Waiting for a signer gives up after `acquire_timeout`.
    pub fn new(acquire_timeout: Duration) -> Self {
        Self {
            networks: HashMap::new(),
            acquire_timeout,
        }
    }

    /// Adds the wallets of one network.
    pub fn with_signers(mut self, network: Network, keys: Vec<SigningKey>) -> Self {
        let entry = self.networks.entry(network).or_insert_with(|| NetworkSigners {
            items: Vec::new(),
            permits: Arc::new(Semaphore::new(0)),
        });
        entry.permits.add_permits(keys.len());
        entry
            .items
            .extend(keys.into_iter().map(|key| Arc::new(SignerItem::new(network, key))));
        self
    }

    /// Builds the pool from the keys named by each chain's `signer_keys_env`.
    pub fn from_config(config: &Config) -> Result<Self> {
        let mut pool = Self::new(Duration::from_millis(config.relay.signer_acquire_timeout_ms));
        for network in [Network::Side, Network::Main] {
            let keys = config
                .chain(network)
                .get_signer_keys()?
                .iter()
                .map(|k| crypto::parse_private_key(k))
                .collect::<Result<Vec<_>>>()?;
            info!("Loaded {} {} signer(s)", keys.len(), network);
            pool = pool.with_signers(network, keys);
        }
        Ok(pool)
    }

    /// Borrows a free signer of `network`, waiting up to the acquire timeout.
    ///
    /// # Returns
    ///
    /// * `Ok(SignerLease)` - Exclusive lease, released on drop
    /// * `Err(RelayError::SignerUnavailable)` - Timed out or no signers configured
    pub async fn acquire(&self, network: Network) -> RelayResult<SignerLease> {
        let signers = self.networks.get(&network).ok_or_else(|| {
            RelayError::SignerUnavailable(format!("no signers configured for {} network", network))
        })?;

        let permit = tokio::time::timeout(self.acquire_timeout, signers.permits.clone().acquire_owned())
            .await
            .map_err(|_| {
                warn!("Timed out after {:?} waiting for a {} signer", self.acquire_timeout, network);
                RelayError::SignerUnavailable(format!(
                    "all {} signers busy for {:?}",
                    network, self.acquire_timeout
                ))
            })?
            .map_err(|_| RelayError::SignerUnavailable("signer pool closed".to_string()))?;

        // Holding a permit guarantees at least one unclaimed item.
        let item = signers
            .items
            .iter()
            .find(|item| item.try_claim())
            .cloned()
            .ok_or_else(|| RelayError::Internal(format!("{} permit held but no free signer", network)))?;

        debug!("Acquired {} signer {}", network, crypto::format_address(&item.address));
        Ok(SignerLease { item, _permit: permit })
    }

    /// Number of free signers of `network`.
    pub fn available(&self, network: Network) -> usize {
        self.networks
            .get(&network)
            .map(|s| s.items.iter().filter(|i| !i.is_in_use()).count())
            .unwrap_or(0)
    }

    /// Number of signers configured for `network`.
    pub fn size(&self, network: Network) -> usize {
        self.networks.get(&network).map(|s| s.items.len()).unwrap_or(0)
    }

    /// Snapshot of the items of `network`.
    pub fn items(&self, network: Network) -> Vec<Arc<SignerItem>> {
        self.networks
            .get(&network)
            .map(|s| s.items.clone())
            .unwrap_or_default()
    }
}
