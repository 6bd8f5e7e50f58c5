//! Configuration management for the strategy execution engine
//!
//! Loads configuration from YAML files and environment variables.
//! Environment variables override YAML values.

use config::{Config, ConfigError, Environment, File};
use serde::Deserialize;
use std::path::PathBuf;

/// Root configuration structure
#[derive(Debug, Clone, Deserialize)]
pub struct AppConfig {
    /// Server configuration
    pub server: ServerConfig,
    /// RPC endpoint configuration
    pub rpc: RpcConfig,
    /// Database configuration
    pub database: DatabaseConfig,
    /// Price feed configuration
    #[serde(default)]
    pub price_feed: PriceFeedConfig,
    /// Swap gateway configuration
    #[serde(default)]
    pub swap: SwapConfig,
    /// Wallet-mirror policy parameters
    #[serde(default)]
    pub mirror: MirrorPolicy,
    /// Valuation service configuration
    #[serde(default)]
    pub valuation: ValuationConfig,
    /// Worker/job configuration
    #[serde(default)]
    pub jobs: JobsConfig,
}

/// HTTP server configuration
#[derive(Debug, Clone, Deserialize)]
pub struct ServerConfig {
    /// Host to bind to
    #[serde(default = "default_host")]
    pub host: String,
    /// Port to listen on
    #[serde(default = "default_port")]
    pub port: u16,
}

fn default_host() -> String {
    "0.0.0.0".to_string()
}

fn default_port() -> u16 {
    8080
}

/// Chain RPC configuration
#[derive(Debug, Clone, Deserialize)]
pub struct RpcConfig {
    /// RPC endpoint URL
    #[serde(default = "default_rpc_url")]
    pub url: String,
    /// Request timeout in milliseconds
    #[serde(default = "default_rpc_timeout")]
    pub timeout_ms: u64,
}

fn default_rpc_url() -> String {
    "https://api.mainnet-beta.solana.com".to_string()
}

fn default_rpc_timeout() -> u64 {
    10_000
}

/// Database configuration
#[derive(Debug, Clone, Deserialize)]
pub struct DatabaseConfig {
    /// Path to SQLite database file
    #[serde(default = "default_db_path")]
    pub path: PathBuf,
    /// Maximum connections in pool
    #[serde(default = "default_max_connections")]
    pub max_connections: u32,
}

fn default_db_path() -> PathBuf {
    PathBuf::from("data/engine.db")
}

fn default_max_connections() -> u32 {
    5
}

/// Price feed configuration
#[derive(Debug, Clone, Deserialize)]
pub struct PriceFeedConfig {
    /// Price API endpoint (Jupiter price API shape)
    #[serde(default = "default_price_endpoint")]
    pub endpoint: String,
    /// Polling interval in seconds
    #[serde(default = "default_price_poll_interval")]
    pub poll_interval_secs: u64,
    /// Cache TTL for latest prices in seconds
    #[serde(default = "default_price_ttl")]
    pub cache_ttl_secs: i64,
}

fn default_price_endpoint() -> String {
    "https://price.jup.ag/v6/price".to_string()
}

fn default_price_poll_interval() -> u64 {
    5
}

fn default_price_ttl() -> i64 {
    30
}

impl Default for PriceFeedConfig {
    fn default() -> Self {
        Self {
            endpoint: default_price_endpoint(),
            poll_interval_secs: default_price_poll_interval(),
            cache_ttl_secs: default_price_ttl(),
        }
    }
}

/// Swap gateway configuration
#[derive(Debug, Clone, Deserialize)]
pub struct SwapConfig {
    /// Quote API endpoint
    #[serde(default = "default_quote_endpoint")]
    pub quote_endpoint: String,
    /// Swap build API endpoint
    #[serde(default = "default_swap_endpoint")]
    pub swap_endpoint: String,
    /// Default slippage tolerance in basis points
    #[serde(default = "default_slippage_bps")]
    pub default_slippage_bps: u16,
    /// Maximum submission attempts per swap (fresh blockhash per attempt)
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,
    /// Overall deadline for a swap submission in seconds
    #[serde(default = "default_swap_deadline")]
    pub deadline_secs: u64,
    /// Optional platform fee account forwarded to the aggregator
    #[serde(default)]
    pub fee_account: Option<String>,
}

fn default_quote_endpoint() -> String {
    "https://quote-api.jup.ag/v6/quote".to_string()
}

fn default_swap_endpoint() -> String {
    "https://quote-api.jup.ag/v6/swap".to_string()
}

fn default_slippage_bps() -> u16 {
    100
}

fn default_max_attempts() -> u32 {
    3
}

fn default_swap_deadline() -> u64 {
    90
}

impl Default for SwapConfig {
    fn default() -> Self {
        Self {
            quote_endpoint: default_quote_endpoint(),
            swap_endpoint: default_swap_endpoint(),
            default_slippage_bps: default_slippage_bps(),
            max_attempts: default_max_attempts(),
            deadline_secs: default_swap_deadline(),
            fee_account: None,
        }
    }
}

/// Wallet-mirror policy parameters
///
/// These are empirically chosen product constants, surfaced as configuration
/// rather than hard-coded in the mirror algorithm.
#[derive(Debug, Clone, Deserialize)]
pub struct MirrorPolicy {
    /// Source-wallet sell percentage above which we mirror our entire balance
    /// (prevents holding unsellable dust when the source fully exits)
    #[serde(default = "default_dust_threshold")]
    pub dust_threshold_pct: f64,
    /// Minimum native-asset trade size in lamports
    #[serde(default = "default_min_native")]
    pub min_native_lamports: u64,
    /// Minimum token trade size in raw units
    #[serde(default = "default_min_token")]
    pub min_token_amount: u64,
    /// Native-asset reserve kept back for network fees, in lamports
    #[serde(default = "default_fee_reserve")]
    pub fee_reserve_lamports: u64,
    /// Native-asset delta below this is treated as fee noise, not a swap leg
    #[serde(default = "default_native_threshold")]
    pub native_threshold_lamports: u64,
}

fn default_dust_threshold() -> f64 {
    98.0
}

fn default_min_native() -> u64 {
    1_000_000 // 0.001 SOL
}

fn default_min_token() -> u64 {
    1_000
}

fn default_fee_reserve() -> u64 {
    10_000_000 // 0.01 SOL
}

fn default_native_threshold() -> u64 {
    100_000
}

impl Default for MirrorPolicy {
    fn default() -> Self {
        Self {
            dust_threshold_pct: default_dust_threshold(),
            min_native_lamports: default_min_native(),
            min_token_amount: default_min_token(),
            fee_reserve_lamports: default_fee_reserve(),
            native_threshold_lamports: default_native_threshold(),
        }
    }
}

/// Valuation service configuration
#[derive(Debug, Clone, Deserialize)]
pub struct ValuationConfig {
    /// Upstream oracle endpoint
    #[serde(default)]
    pub endpoint: String,
    /// Cache TTL in seconds
    #[serde(default = "default_valuation_ttl")]
    pub cache_ttl_secs: i64,
    /// Upstream request timeout in milliseconds
    #[serde(default = "default_valuation_timeout")]
    pub request_timeout_ms: u64,
}

fn default_valuation_ttl() -> i64 {
    300 // 5 minutes
}

fn default_valuation_timeout() -> u64 {
    5_000
}

impl Default for ValuationConfig {
    fn default() -> Self {
        Self {
            endpoint: String::new(),
            cache_ttl_secs: default_valuation_ttl(),
            request_timeout_ms: default_valuation_timeout(),
        }
    }
}

/// Worker/job configuration
#[derive(Debug, Clone, Deserialize)]
pub struct JobsConfig {
    /// Interval between wallet-activity polls in seconds
    #[serde(default = "default_wallet_poll_interval")]
    pub wallet_poll_interval_secs: u64,
    /// Signatures fetched per wallet poll
    #[serde(default = "default_signature_fetch_limit")]
    pub signature_fetch_limit: usize,
    /// Seen-signature cache capacity
    #[serde(default = "default_seen_capacity")]
    pub seen_signature_capacity: usize,
    /// Seen-signature max age in seconds
    #[serde(default = "default_seen_max_age")]
    pub seen_signature_max_age_secs: i64,
    /// Re-evaluation suppression window after a price trigger fires, seconds
    #[serde(default = "default_trigger_cooldown")]
    pub trigger_cooldown_secs: i64,
}

fn default_wallet_poll_interval() -> u64 {
    5
}

fn default_signature_fetch_limit() -> usize {
    10
}

fn default_seen_capacity() -> usize {
    50
}

fn default_seen_max_age() -> i64 {
    3_600
}

fn default_trigger_cooldown() -> i64 {
    60
}

impl Default for JobsConfig {
    fn default() -> Self {
        Self {
            wallet_poll_interval_secs: default_wallet_poll_interval(),
            signature_fetch_limit: default_signature_fetch_limit(),
            seen_signature_capacity: default_seen_capacity(),
            seen_signature_max_age_secs: default_seen_max_age(),
            trigger_cooldown_secs: default_trigger_cooldown(),
        }
    }
}

impl AppConfig {
    /// Load configuration from files and environment
    ///
    /// Precedence (last wins): `config/default.yaml`, `config/local.yaml`,
    /// environment variables prefixed `ENGINE__` (e.g. `ENGINE__SERVER__PORT`).
    pub fn load() -> Result<Self, ConfigError> {
        let config = Config::builder()
            .add_source(File::with_name("config/default").required(false))
            .add_source(File::with_name("config/local").required(false))
            .add_source(Environment::with_prefix("ENGINE").separator("__"))
            .build()?;

        config.try_deserialize()
    }

    /// Validate configuration invariants
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.mirror.dust_threshold_pct <= 0.0 || self.mirror.dust_threshold_pct > 100.0 {
            return Err(ConfigError::Message(format!(
                "mirror.dust_threshold_pct must be in (0, 100], got {}",
                self.mirror.dust_threshold_pct
            )));
        }

        if self.swap.max_attempts == 0 {
            return Err(ConfigError::Message(
                "swap.max_attempts must be at least 1".to_string(),
            ));
        }

        if self.valuation.cache_ttl_secs <= 0 {
            return Err(ConfigError::Message(
                "valuation.cache_ttl_secs must be positive".to_string(),
            ));
        }

        if self.jobs.seen_signature_capacity == 0 {
            return Err(ConfigError::Message(
                "jobs.seen_signature_capacity must be positive".to_string(),
            ));
        }

        Ok(())
    }
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            server: ServerConfig {
                host: default_host(),
                port: default_port(),
            },
            rpc: RpcConfig {
                url: default_rpc_url(),
                timeout_ms: default_rpc_timeout(),
            },
            database: DatabaseConfig {
                path: default_db_path(),
                max_connections: default_max_connections(),
            },
            price_feed: PriceFeedConfig::default(),
            swap: SwapConfig::default(),
            mirror: MirrorPolicy::default(),
            valuation: ValuationConfig::default(),
            jobs: JobsConfig::default(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config_is_valid() {
        let config = AppConfig::default();
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_dust_threshold_bounds() {
        let mut config = AppConfig::default();
        config.mirror.dust_threshold_pct = 0.0;
        assert!(config.validate().is_err());

        config.mirror.dust_threshold_pct = 101.0;
        assert!(config.validate().is_err());

        config.mirror.dust_threshold_pct = 98.0;
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_zero_attempts_rejected() {
        let mut config = AppConfig::default();
        config.swap.max_attempts = 0;
        assert!(config.validate().is_err());
    }
}
