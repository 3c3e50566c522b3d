//! Environment-based Configuration for the Withdrawal Orchestrator
//!
//! All deployment-specific values come from environment variables;
//! devnet gets working defaults so the service boots without a .env file.
//!
//! # Environment Variables
//!
//! ## Network Configuration
//! - `DEFUNDS_NETWORK` - "mainnet", "testnet", or "devnet" (default: "devnet")
//! - `DEFUNDS_SOLANA_RPC` - Solana RPC endpoint URL
//! - `DEFUNDS_ROUTER_API` - Swap-routing service base URL
//!
//! ## Program Addresses (must match deployed contracts)
//! - `DEFUNDS_PROGRAM_ID` - managed-funds ledger program ID
//! - `DEFUNDS_SETTLEMENT_MINT` - settlement asset mint (wrapped native)
//! - `DEFUNDS_TREASURY` - platform treasury wallet
//!
//! ## Pipeline Tuning
//! - `DEFUNDS_DUST_THRESHOLD` - minimum quoted value in settlement base units
//! - `DEFUNDS_SLIPPAGE_BPS` - default quote slippage (default 2000)
//! - `DEFUNDS_QUOTE_TIMEOUT_SECS` - per-quote timeout
//! - `DEFUNDS_PLAN_TIMEOUT_SECS` - ceiling timeout for a whole planning pass
//! - `DEFUNDS_QUOTE_CONCURRENCY` - concurrent outbound quote calls
//! - `DEFUNDS_PRIORITY_MICROLAMPORTS` - priority fee per compute unit
//! - `DEFUNDS_SWAP_COMPUTE_UNITS` - compute budget for swap transactions
//! - `DEFUNDS_FINALIZE_COMPUTE_UNITS` - compute budget for finalize
//! - `DEFUNDS_BATCH_CAP` - max recipients per payout transfer
//!
//! ## Optional Settings
//! - `DEFUNDS_DB_PATH` - SQLite database path (default: data/defunds.db)
//! - `DEFUNDS_PORT` - API listen port (default 3001)
//! - `DEFUNDS_LOG_LEVEL` - Logging level (debug, info, warn, error)

use std::env;
use std::str::FromStr;
use thiserror::Error;

/// Configuration errors
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("missing required environment variable: {0}")]
    MissingEnvVar(String),

    #[error("invalid value for {0}: {1}")]
    InvalidValue(String, String),

    #[error("network mismatch: expected {0}, got {1}")]
    NetworkMismatch(String, String),
}

/// Network environment
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Network {
    Mainnet,
    Testnet,
    Devnet,
}

impl FromStr for Network {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "mainnet" | "main" => Ok(Network::Mainnet),
            "testnet" | "test" => Ok(Network::Testnet),
            "devnet" | "dev" => Ok(Network::Devnet),
            _ => Err(ConfigError::InvalidValue(
                "DEFUNDS_NETWORK".to_string(),
                format!("unknown network: {}", s),
            )),
        }
    }
}

impl Network {
    /// Get default Solana RPC for this network
    pub fn default_solana_rpc(&self) -> &'static str {
        match self {
            Network::Mainnet => "https://api.mainnet-beta.solana.com",
            Network::Testnet => "https://api.testnet.solana.com",
            Network::Devnet => "https://api.devnet.solana.com",
        }
    }

    /// Get default swap-routing service for this network
    pub fn default_router_api(&self) -> &'static str {
        "https://lite-api.jup.ag"
    }
}

/// Main configuration struct
#[derive(Debug, Clone)]
pub struct OrchestratorConfig {
    /// Network environment
    pub network: Network,

    /// Solana RPC endpoint
    pub solana_rpc: String,

    /// Swap-routing service base URL
    pub router_api: String,

    /// Managed-funds ledger program ID
    pub program_id: String,

    /// Settlement asset mint (wrapped native)
    pub settlement_mint: String,

    /// Platform treasury wallet
    pub treasury: String,

    /// Minimum quoted value (settlement base units) below which an asset is dust
    pub dust_threshold: u64,

    /// Default quote slippage in basis points
    pub slippage_bps: u16,

    /// Per-quote timeout in seconds
    pub quote_timeout_secs: u64,

    /// Ceiling timeout for a whole planning pass in seconds
    pub plan_timeout_secs: u64,

    /// Concurrent outbound quote calls
    pub quote_concurrency: usize,

    /// Priority fee per compute unit (micro-lamports)
    pub priority_microlamports: u64,

    /// Compute budget for swap transactions
    pub swap_compute_units: u32,

    /// Compute budget for finalize / unwrap transactions
    pub finalize_compute_units: u32,

    /// Max recipients per payout transfer transaction
    pub batch_cap: usize,

    /// SQLite database path
    pub db_path: String,

    /// API listen port
    pub port: u16,

    /// Log level
    pub log_level: String,
}

impl OrchestratorConfig {
    /// Load configuration from environment variables
    pub fn from_env() -> Result<Self, ConfigError> {
        let network: Network = env::var("DEFUNDS_NETWORK")
            .unwrap_or_else(|_| "devnet".to_string())
            .parse()?;

        let solana_rpc = env::var("DEFUNDS_SOLANA_RPC")
            .unwrap_or_else(|_| network.default_solana_rpc().to_string());

        let router_api = env::var("DEFUNDS_ROUTER_API")
            .unwrap_or_else(|_| network.default_router_api().to_string());

        let program_id = get_required_or_devnet_default(
            "DEFUNDS_PROGRAM_ID",
            "DFnds11111111111111111111111111111111111111",
            network,
        )?;

        // Wrapped native mint, same address on all clusters
        let settlement_mint = env::var("DEFUNDS_SETTLEMENT_MINT")
            .unwrap_or_else(|_| "So11111111111111111111111111111111111111112".to_string());

        let treasury = get_required_or_devnet_default(
            "DEFUNDS_TREASURY",
            "Trsy111111111111111111111111111111111111111",
            network,
        )?;

        Ok(Self {
            network,
            solana_rpc,
            router_api,
            program_id,
            settlement_mint,
            treasury,
            dust_threshold: parse_env("DEFUNDS_DUST_THRESHOLD", 100_000_000)?, // ~0.1 settlement unit
            slippage_bps: parse_env("DEFUNDS_SLIPPAGE_BPS", 2000)?,
            quote_timeout_secs: parse_env("DEFUNDS_QUOTE_TIMEOUT_SECS", 5)?,
            plan_timeout_secs: parse_env("DEFUNDS_PLAN_TIMEOUT_SECS", 20)?,
            quote_concurrency: parse_env("DEFUNDS_QUOTE_CONCURRENCY", 4)?,
            priority_microlamports: parse_env("DEFUNDS_PRIORITY_MICROLAMPORTS", 20_000)?,
            swap_compute_units: parse_env("DEFUNDS_SWAP_COMPUTE_UNITS", 600_000)?,
            finalize_compute_units: parse_env("DEFUNDS_FINALIZE_COMPUTE_UNITS", 300_000)?,
            batch_cap: parse_env("DEFUNDS_BATCH_CAP", 20)?,
            db_path: env::var("DEFUNDS_DB_PATH").unwrap_or_else(|_| "data/defunds.db".to_string()),
            port: parse_env("DEFUNDS_PORT", 3001)?,
            log_level: env::var("DEFUNDS_LOG_LEVEL").unwrap_or_else(|_| "info".to_string()),
        })
    }

    /// Validate configuration for production readiness
    pub fn validate_for_production(&self) -> Result<(), ConfigError> {
        if self.network != Network::Mainnet {
            return Err(ConfigError::NetworkMismatch(
                "mainnet".to_string(),
                format!("{:?}", self.network),
            ));
        }

        if self.batch_cap == 0 || self.batch_cap > 25 {
            return Err(ConfigError::InvalidValue(
                "DEFUNDS_BATCH_CAP".to_string(),
                "must be between 1 and 25 to fit per-transaction account limits".to_string(),
            ));
        }

        if self.slippage_bps > 10_000 {
            return Err(ConfigError::InvalidValue(
                "DEFUNDS_SLIPPAGE_BPS".to_string(),
                "cannot exceed 10000".to_string(),
            ));
        }

        Ok(())
    }
}

/// Get required env var, or use default for devnet only
fn get_required_or_devnet_default(
    var_name: &str,
    devnet_default: &str,
    network: Network,
) -> Result<String, ConfigError> {
    match env::var(var_name) {
        Ok(value) => Ok(value),
        Err(_) => {
            if network == Network::Devnet {
                Ok(devnet_default.to_string())
            } else {
                Err(ConfigError::MissingEnvVar(var_name.to_string()))
            }
        }
    }
}

/// Parse an optional numeric env var, falling back to a default
fn parse_env<T: FromStr>(var_name: &str, default: T) -> Result<T, ConfigError> {
    match env::var(var_name) {
        Ok(value) => value.parse().map_err(|_| {
            ConfigError::InvalidValue(var_name.to_string(), format!("cannot parse '{}'", value))
        }),
        Err(_) => Ok(default),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_network_parsing() {
        assert!(matches!("mainnet".parse::<Network>(), Ok(Network::Mainnet)));
        assert!(matches!("testnet".parse::<Network>(), Ok(Network::Testnet)));
        assert!(matches!("devnet".parse::<Network>(), Ok(Network::Devnet)));
        assert!("invalid".parse::<Network>().is_err());
    }

    #[test]
    fn test_production_validation_rejects_devnet() {
        let mut config = OrchestratorConfig::from_env().unwrap();
        config.network = Network::Devnet;
        assert!(config.validate_for_production().is_err());

        config.network = Network::Mainnet;
        assert!(config.validate_for_production().is_ok());

        config.batch_cap = 0;
        assert!(config.validate_for_production().is_err());
    }
}
