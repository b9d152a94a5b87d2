//! Loyalty Relay Service
//!
//! Relays signed loyalty ledger operations, payments, bridge transfers and
//! validator batches to the side and main chains.
//!
//! ## Overview
//!
//! The relay:
//! 1. Serves the REST API that accepts signed requests
//! 2. Submits contract calls with pooled signer keys
//! 3. Watches submitted payment transactions and retries failed ones
//! 4. Force-closes payments abandoned past the forced-close age

use anyhow::{Context, Result};
use std::sync::Arc;
use std::time::Duration;
use tracing::{error, info};

use loyalty_relay::api::{ApiServer, RelayServices};
use loyalty_relay::batch::{BatchCommitter, ValidatorSet};
use loyalty_relay::bridge::BridgeRelay;
use loyalty_relay::config::{Config, Network};
use loyalty_relay::crypto;
use loyalty_relay::gateway::{ContractGateway, EvmContractGateway};
use loyalty_relay::ledger_relay::LedgerRelay;
use loyalty_relay::payment::{
    HttpCallback, NoopCallback, OrchestratorSettings, PaymentCallback, PaymentOrchestrator,
};
use loyalty_relay::scheduler::{CloseScheduler, WatchScheduler};
use loyalty_relay::signer_pool::SignerPool;
use loyalty_relay::storage::{JsonFileTaskStore, MemoryTaskStore, PaymentTaskStore};

// ============================================================================
// MAIN APPLICATION ENTRY POINT
// ============================================================================

/// Main application entry point.
///
/// This function:
/// 1. Initializes logging and tracing
/// 2. Loads configuration from TOML file
/// 3. Builds gateways, signer pool, task store and services
/// 4. Spawns the watch and close schedulers
/// 5. Runs the API server until shutdown
#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt::init();

    info!("Starting Loyalty Relay");

    let args: Vec<String> = std::env::args().collect();

    if args.iter().any(|arg| arg == "--help" || arg == "-h") {
        println!("Loyalty Relay");
        println!();
        println!("Usage: loyalty-relay [OPTIONS]");
        println!();
        println!("Options:");
        println!("  --config <path>   Use custom config file path (default: config/relay.toml)");
        println!("  --help, -h        Show this help message");
        println!();
        println!("Environment variables:");
        println!("  LOYALTY_RELAY_CONFIG_PATH    Path to config file (overrides --config)");
        return Ok(());
    }

    if std::env::var("LOYALTY_RELAY_CONFIG_PATH").is_err() {
        if let Some(i) = args.iter().position(|arg| arg == "--config") {
            let path = args.get(i + 1).context("--config requires a path")?;
            std::env::set_var("LOYALTY_RELAY_CONFIG_PATH", path);
            info!("Using custom config: {}", path);
        }
    }

    let config = Config::load()?;
    info!("Configuration loaded successfully");

    // Chain access
    let side: Arc<dyn ContractGateway> = Arc::new(EvmContractGateway::from_config(
        Network::Side,
        &config.side_chain,
        &config.relay,
    )?);
    let main_chain: Arc<dyn ContractGateway> = Arc::new(EvmContractGateway::from_config(
        Network::Main,
        &config.main_chain,
        &config.relay,
    )?);
    let signer_pool = Arc::new(SignerPool::from_config(&config)?);

    // Payment task persistence
    let store: Arc<dyn PaymentTaskStore> = match config.storage.task_store_path {
        Some(ref path) => Arc::new(JsonFileTaskStore::open(path).await?),
        None => {
            info!("No task_store_path configured, payment tasks are kept in memory");
            Arc::new(MemoryTaskStore::new())
        }
    };

    let callback: Arc<dyn PaymentCallback> = match config.relay.callback_url {
        Some(ref url) => Arc::new(HttpCallback::new(
            url,
            config.relay.get_callback_access_key()?,
            Duration::from_millis(config.relay.rpc_timeout_ms),
        )?),
        None => Arc::new(NoopCallback),
    };

    let orchestrator = Arc::new(PaymentOrchestrator::new(
        side.clone(),
        signer_pool.clone(),
        store.clone(),
        callback,
        OrchestratorSettings::from(&config.relay),
    ));

    let proposer_key = crypto::parse_private_key(&config.validator.get_proposer_key()?)
        .context("Invalid proposer key")?;
    let committer = BatchCommitter::new(
        side.clone(),
        signer_pool.clone(),
        ValidatorSet::from_config(&config.validator)?,
        proposer_key,
    );
    info!(
        "Proposer address: {}",
        crypto::format_address(&committer.proposer_address())
    );

    let services = RelayServices {
        orchestrator: orchestrator.clone(),
        ledger: Arc::new(LedgerRelay::new(side.clone(), signer_pool.clone())),
        bridge: Arc::new(BridgeRelay::new(
            side.clone(),
            main_chain,
            signer_pool,
            &config.bridge,
            config.relay.deposit_id_max_attempts as usize,
        )),
        batch: Arc::new(committer),
    };

    // Background schedulers
    let watch = WatchScheduler::new(
        orchestrator.clone(),
        store.clone(),
        side,
        Duration::from_millis(config.relay.watch_interval_ms),
    );
    tokio::spawn(async move { watch.run().await });

    let close = CloseScheduler::new(
        orchestrator,
        store,
        Duration::from_millis(config.relay.close_interval_ms),
    );
    tokio::spawn(async move { close.run().await });

    let api_server = ApiServer::new(config, services);
    if let Err(e) = api_server.run().await {
        error!("API server stopped: {:#}", e);
        return Err(e);
    }

    Ok(())
}
