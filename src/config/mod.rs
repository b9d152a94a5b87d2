//! Configuration Management Module
//!
//! This module handles loading and managing configuration for the loyalty relay.
//! Configuration includes both chain endpoints and contract addresses, relay timing,
//! validator quorum settings and API settings.
//!
//! Private keys are never stored in the config file. The file only names the
//! environment variables that hold them.

use serde::{Deserialize, Serialize};
use std::fmt;

use crate::crypto;

// ============================================================================
// NETWORKS
// ============================================================================

/// The two networks the relay submits to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Network {
    /// Everyday activity: ledger, shops, purchases, currency rates
    Side,
    /// Underlying token
    Main,
}

impl Network {
    pub fn other(self) -> Network {
        match self {
            Network::Side => Network::Main,
            Network::Main => Network::Side,
        }
    }
}

impl fmt::Display for Network {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Network::Side => write!(f, "side"),
            Network::Main => write!(f, "main"),
        }
    }
}

// ============================================================================
// CONFIGURATION STRUCTURES
// ============================================================================

/// Main configuration structure containing all service settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    /// Side chain (ledger, shop, purchase and currency rate contracts)
    pub side_chain: EvmChainConfig,
    /// Main chain (underlying token)
    pub main_chain: EvmChainConfig,
    /// Relay timing and retry settings
    pub relay: RelayConfig,
    /// Bridged token identity
    pub bridge: BridgeConfig,
    /// Validator quorum for batch commits
    pub validator: ValidatorConfig,
    /// Payment task persistence
    #[serde(default)]
    pub storage: StorageConfig,
    /// API server configuration (host, port, CORS settings)
    pub api: ApiConfig,
}

/// Configuration for one EVM network and the contracts the relay calls on it.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EvmChainConfig {
    /// Human-readable name for the chain
    pub name: String,
    /// RPC endpoint URL for EVM chain communication
    pub rpc_url: String,
    /// Chain ID (e.g., 31337 for Hardhat)
    pub chain_id: u64,
    /// Loyalty token contract
    pub token_address: String,
    /// Bridge contract
    pub bridge_address: String,
    /// Ledger contract (side chain only)
    #[serde(default)]
    pub ledger_address: Option<String>,
    /// Shop registry contract (side chain only)
    #[serde(default)]
    pub shop_address: Option<String>,
    /// Purchase batch contract (side chain only)
    #[serde(default)]
    pub purchase_address: Option<String>,
    /// Currency rate contract (side chain only)
    #[serde(default)]
    pub currency_rate_address: Option<String>,
    /// Environment variable holding the comma-separated hex keys of the
    /// fee-paying signer wallets for this network
    #[serde(default = "default_signer_keys_env")]
    pub signer_keys_env: String,
}

fn default_signer_keys_env() -> String {
    "LOYALTY_RELAY_SIGNER_KEYS".to_string()
}

impl EvmChainConfig {
    /// Loads the signer private keys from the environment variable.
    ///
    /// # Returns
    ///
    /// * `Ok(Vec<String>)` - Hex-encoded private keys (at least one)
    /// * `Err(anyhow::Error)` - Variable unset or empty
    pub fn get_signer_keys(&self) -> anyhow::Result<Vec<String>> {
        let raw = std::env::var(&self.signer_keys_env).map_err(|_| {
            anyhow::anyhow!(
                "Environment variable {} not set for {} signer keys",
                self.signer_keys_env,
                self.name
            )
        })?;
        let keys: Vec<String> = raw
            .split(',')
            .map(|k| k.trim().to_string())
            .filter(|k| !k.is_empty())
            .collect();
        if keys.is_empty() {
            anyhow::bail!("Environment variable {} holds no signer keys", self.signer_keys_env);
        }
        Ok(keys)
    }
}

/// Relay timing, retry and callback settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RelayConfig {
    /// Interval of the watch scheduler in milliseconds
    #[serde(default = "default_watch_interval_ms")]
    pub watch_interval_ms: u64,
    /// Interval of the close scheduler in milliseconds
    #[serde(default = "default_close_interval_ms")]
    pub close_interval_ms: u64,
    /// Age in seconds after which an unresolved payment is force-closed
    #[serde(default = "default_forced_close_second")]
    pub forced_close_second: u64,
    /// Resubmissions allowed per payment phase before it is marked failed
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,
    /// How long an operation waits for a free signer
    #[serde(default = "default_signer_acquire_timeout_ms")]
    pub signer_acquire_timeout_ms: u64,
    /// Timeout of a single JSON-RPC request
    #[serde(default = "default_rpc_timeout_ms")]
    pub rpc_timeout_ms: u64,
    /// Gas limit of relayed transactions
    #[serde(default = "default_gas_limit")]
    pub gas_limit: u64,
    /// Random deposit ids drawn before the bridge relay gives up
    #[serde(default = "default_deposit_id_max_attempts")]
    pub deposit_id_max_attempts: u32,
    /// Shop endpoint notified when a payment resolves (optional)
    #[serde(default)]
    pub callback_url: Option<String>,
    /// Environment variable holding the callback access key (optional)
    #[serde(default)]
    pub callback_access_key_env: Option<String>,
}

fn default_watch_interval_ms() -> u64 {
    2000
}

fn default_close_interval_ms() -> u64 {
    5000
}

fn default_forced_close_second() -> u64 {
    300
}

fn default_max_retries() -> u32 {
    3
}

fn default_signer_acquire_timeout_ms() -> u64 {
    10_000
}

fn default_rpc_timeout_ms() -> u64 {
    15_000
}

fn default_gas_limit() -> u64 {
    2_000_000
}

fn default_deposit_id_max_attempts() -> u32 {
    16
}

impl Default for RelayConfig {
    fn default() -> Self {
        Self {
            watch_interval_ms: default_watch_interval_ms(),
            close_interval_ms: default_close_interval_ms(),
            forced_close_second: default_forced_close_second(),
            max_retries: default_max_retries(),
            signer_acquire_timeout_ms: default_signer_acquire_timeout_ms(),
            rpc_timeout_ms: default_rpc_timeout_ms(),
            gas_limit: default_gas_limit(),
            deposit_id_max_attempts: default_deposit_id_max_attempts(),
            callback_url: None,
            callback_access_key_env: None,
        }
    }
}

impl RelayConfig {
    /// Loads the callback access key, if one is configured.
    pub fn get_callback_access_key(&self) -> anyhow::Result<Option<String>> {
        match &self.callback_access_key_env {
            Some(env) => std::env::var(env)
                .map(Some)
                .map_err(|_| anyhow::anyhow!("Environment variable {} not set for callback access key", env)),
            None => Ok(None),
        }
    }
}

/// Name and symbol of the bridged token; the bridge token id derives from them.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BridgeConfig {
    pub token_name: String,
    pub token_symbol: String,
}

/// Validator quorum used by the batch-commit protocol.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ValidatorConfig {
    /// Recognised validator addresses
    pub validators: Vec<String>,
    /// Minimum number of distinct validator signatures per batch
    pub threshold: usize,
    /// Environment variable holding this relay's proposer key
    #[serde(default = "default_proposer_key_env")]
    pub proposer_key_env: String,
}

fn default_proposer_key_env() -> String {
    "LOYALTY_RELAY_PROPOSER_KEY".to_string()
}

impl ValidatorConfig {
    /// Loads the proposer private key from the environment variable.
    pub fn get_proposer_key(&self) -> anyhow::Result<String> {
        std::env::var(&self.proposer_key_env).map_err(|_| {
            anyhow::anyhow!(
                "Environment variable {} not set for proposer key",
                self.proposer_key_env
            )
        })
    }
}

/// Payment task persistence. Without a path tasks are kept in memory.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct StorageConfig {
    #[serde(default)]
    pub task_store_path: Option<String>,
}

/// API server configuration for external communication.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ApiConfig {
    /// Host address to bind the API server to
    pub host: String,
    /// Port number to bind the API server to
    pub port: u16,
    /// Allowed CORS origins for cross-origin requests
    #[serde(default)]
    pub cors_origins: Vec<String>,
}

// ============================================================================
// CONFIGURATION LOADING AND MANAGEMENT
// ============================================================================

impl Config {
    pub fn chain(&self, network: Network) -> &EvmChainConfig {
        match network {
            Network::Side => &self.side_chain,
            Network::Main => &self.main_chain,
        }
    }

    /// Validates the configuration.
    ///
    /// This function ensures that:
    /// - Side and main chain IDs differ
    /// - RPC and callback URLs parse
    /// - All contract and validator addresses are 20-byte hex
    /// - The validator threshold is reachable
    ///
    /// # Returns
    ///
    /// - `Ok(())` - Configuration is valid
    /// - `Err(anyhow::Error)` - First problem found
    pub fn validate(&self) -> anyhow::Result<()> {
        if self.side_chain.chain_id == self.main_chain.chain_id {
            return Err(anyhow::anyhow!(
                "Configuration error: Side chain and main chain have the same chain ID {}. Each chain must have a unique chain ID.",
                self.side_chain.chain_id
            ));
        }

        for chain in [&self.side_chain, &self.main_chain] {
            url::Url::parse(&chain.rpc_url).map_err(|e| {
                anyhow::anyhow!("Configuration error: {} rpc_url '{}' is invalid: {}", chain.name, chain.rpc_url, e)
            })?;

            let addresses = [
                Some(&chain.token_address),
                Some(&chain.bridge_address),
                chain.ledger_address.as_ref(),
                chain.shop_address.as_ref(),
                chain.purchase_address.as_ref(),
                chain.currency_rate_address.as_ref(),
            ];
            for address in addresses.into_iter().flatten() {
                crypto::parse_address(address).map_err(|e| {
                    anyhow::anyhow!("Configuration error: {} contract address: {}", chain.name, e)
                })?;
            }
        }

        if self.side_chain.ledger_address.is_none() {
            anyhow::bail!("Configuration error: side_chain.ledger_address is required");
        }

        if let Some(ref callback_url) = self.relay.callback_url {
            url::Url::parse(callback_url).map_err(|e| {
                anyhow::anyhow!("Configuration error: callback_url '{}' is invalid: {}", callback_url, e)
            })?;
        }

        for validator in &self.validator.validators {
            crypto::parse_address(validator)
                .map_err(|e| anyhow::anyhow!("Configuration error: validator address: {}", e))?;
        }
        if self.validator.threshold == 0 || self.validator.threshold > self.validator.validators.len() {
            return Err(anyhow::anyhow!(
                "Configuration error: validator threshold {} must be between 1 and the number of validators ({})",
                self.validator.threshold,
                self.validator.validators.len()
            ));
        }

        Ok(())
    }

    /// Loads configuration from the TOML file.
    ///
    /// The path is `config/relay.toml` unless `LOYALTY_RELAY_CONFIG_PATH` is set.
    ///
    /// # Returns
    ///
    /// - `Ok(Config)` - Successfully loaded and validated configuration
    /// - `Err(anyhow::Error)` - Failed to load configuration, file doesn't exist, or validation failed
    pub fn load() -> anyhow::Result<Self> {
        // Check for custom config path via environment variable (for tests)
        let config_path = std::env::var("LOYALTY_RELAY_CONFIG_PATH")
            .unwrap_or_else(|_| "config/relay.toml".to_string());
        Self::load_from(&config_path)
    }

    /// Loads and validates configuration from an explicit path.
    pub fn load_from(config_path: &str) -> anyhow::Result<Self> {
        if std::path::Path::new(config_path).exists() {
            let content = std::fs::read_to_string(config_path)?;
            let config: Config = toml::from_str(&content)?;
            config.validate()?;
            Ok(config)
        } else {
            // Configuration file doesn't exist - user needs to copy template
            Err(anyhow::anyhow!(
                "Configuration file '{}' not found. Please copy the template:\n\
                cp config/relay.template.toml config/relay.toml\n\
                Then edit config/relay.toml with your actual values.",
                config_path
            ))
        }
    }

    /// Creates a default configuration with placeholder values.
    ///
    /// This configuration is suitable for local development against two local
    /// nodes. For production use, every address must be replaced.
    #[allow(dead_code)]
    pub fn default() -> Self {
        Self {
            side_chain: EvmChainConfig {
                name: "Side Chain".to_string(),
                rpc_url: "http://127.0.0.1:8545".to_string(),
                chain_id: 24680,
                token_address: "0x0000000000000000000000000000000000000001".to_string(),
                bridge_address: "0x0000000000000000000000000000000000000002".to_string(),
                ledger_address: Some("0x0000000000000000000000000000000000000003".to_string()),
                shop_address: Some("0x0000000000000000000000000000000000000004".to_string()),
                purchase_address: Some("0x0000000000000000000000000000000000000005".to_string()),
                currency_rate_address: Some("0x0000000000000000000000000000000000000006".to_string()),
                signer_keys_env: "LOYALTY_RELAY_SIDE_SIGNER_KEYS".to_string(),
            },
            main_chain: EvmChainConfig {
                name: "Main Chain".to_string(),
                rpc_url: "http://127.0.0.1:8546".to_string(),
                chain_id: 13579,
                token_address: "0x0000000000000000000000000000000000000011".to_string(),
                bridge_address: "0x0000000000000000000000000000000000000012".to_string(),
                ledger_address: None,
                shop_address: None,
                purchase_address: None,
                currency_rate_address: None,
                signer_keys_env: "LOYALTY_RELAY_MAIN_SIGNER_KEYS".to_string(),
            },
            relay: RelayConfig::default(),
            bridge: BridgeConfig {
                token_name: "Loyalty Coin".to_string(),
                token_symbol: "LYT".to_string(),
            },
            validator: ValidatorConfig {
                validators: vec!["0x00000000000000000000000000000000000000aa".to_string()],
                threshold: 1,
                proposer_key_env: default_proposer_key_env(),
            },
            storage: StorageConfig::default(),
            api: ApiConfig {
                host: "127.0.0.1".to_string(),
                port: 3400,
                cors_origins: vec!["http://localhost:3400".to_string()],
            },
        }
    }
}
