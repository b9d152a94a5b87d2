//! Loyalty Relay Library
//!
//! A gas-less relay for a multi-chain loyalty points ledger. Users and shops
//! sign typed messages off chain; the relay checks them and submits the
//! matching contract calls with a pool of funded signer keys. It also drives
//! two-phase hash-locked payments, relays bridge transfers between the side
//! and main chains and submits validator-signed data batches.

pub mod abi;
pub mod api;
pub mod batch;
pub mod bridge;
pub mod config;
pub mod crypto;
pub mod error;
pub mod evm_client;
pub mod gateway;
pub mod ledger_relay;
pub mod payment;
pub mod scheduler;
pub mod signer_pool;
pub mod storage;

// Re-export commonly used types
pub use config::{Config, Network};
pub use error::{ErrorCode, RelayError, RelayResult};
pub use gateway::{ContractCall, ContractGateway, EvmContractGateway};
pub use payment::{PaymentInfo, PaymentOrchestrator, PaymentStatus, PaymentTask};
pub use signer_pool::{SignerLease, SignerPool};
pub use storage::{JsonFileTaskStore, MemoryTaskStore, PaymentTaskStore};
