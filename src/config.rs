//! Configuration module for environment variables and application settings

use std::env;
use std::time::Duration;
use anyhow::{Result, anyhow};
use rust_decimal::Decimal;

use crate::services::rate_limiter::MIN_REQUESTS_PER_SECOND;

/// Native asset placeholder address understood by the aggregator
pub const NATIVE_TOKEN_ADDRESS: &str = "0xeeeeeeeeeeeeeeeeeeeeeeeeeeeeeeeeeeeeeeee";

#[derive(Debug, Clone)]
pub struct Config {
    /// Database configuration
    pub database: DatabaseConfig,

    /// Server configuration
    pub server: ServerConfig,

    /// Chain-write service credentials. `None` when the service is not configured,
    /// which makes every swap batch fail fast.
    pub multibaas: Option<MultiBaasConfig>,

    /// Swap orchestration configuration
    pub swap: SwapConfig,

    /// Chat relay configuration
    pub chat: ChatConfig,

    /// Timeout applied to every outbound HTTP call
    pub http_timeout: Duration,
}

#[derive(Debug, Clone)]
pub struct DatabaseConfig {
    pub url: Option<String>,
    pub max_connections: usize,
}

#[derive(Debug, Clone)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
    pub cors_origins: Vec<String>,
}

#[derive(Debug, Clone)]
pub struct MultiBaasConfig {
    pub url: String,
    pub api_key: String,
    pub contract_address: String,
    pub contract_label: String,
}

#[derive(Debug, Clone)]
pub struct SwapConfig {
    /// DEX aggregator base URL (the `/swap` path is appended)
    pub aggregator_url: String,
    pub aggregator_api_key: Option<String>,
    /// Price oracle base URL
    pub price_oracle_url: String,
    /// Oracle id of the native asset
    pub native_asset_id: String,
    /// Pins the native asset price instead of asking the oracle
    pub fixed_native_usd_price: Option<Decimal>,
    /// Loyalty token mint endpoint
    pub mint_url: Option<String>,
    /// Tenant whose allocations are swapped; all rows when unset
    pub portfolio_owner: Option<String>,
    pub slippage_bps: u16,
    /// Requests per second allowed against the aggregator
    pub aggregator_rps: f64,
    /// Requests per second allowed against the chain-write service
    pub chain_writer_rps: f64,
    pub rate_limit_burst: u32,
    pub mint_max_attempts: u32,
    pub mint_retry_base: Duration,
}

#[derive(Debug, Clone)]
pub struct ChatConfig {
    pub backend_url: Option<String>,
}

fn env_parse<T: std::str::FromStr>(key: &str) -> Option<T> {
    env::var(key).ok().and_then(|v| v.trim().parse().ok())
}

fn env_non_empty(key: &str) -> Option<String> {
    env::var(key).ok().map(|v| v.trim().to_string()).filter(|v| !v.is_empty())
}

impl Config {
    /// Load configuration from environment variables
    pub fn from_env() -> Result<Self> {
        let multibaas = match (env_non_empty("MULTIBAAS_URL"), env_non_empty("MULTIBAAS_API_KEY")) {
            (Some(url), Some(api_key)) => Some(MultiBaasConfig {
                url: url.trim_end_matches('/').to_string(),
                api_key,
                contract_address: env_non_empty("MULTIBAAS_CONTRACT_ADDRESS").unwrap_or_default(),
                contract_label: env_non_empty("MULTIBAAS_CONTRACT_LABEL").unwrap_or_default(),
            }),
            _ => None,
        };

        let fixed_native_usd_price = match env_non_empty("NATIVE_USD_PRICE") {
            Some(raw) => {
                let price: Decimal = raw
                    .parse()
                    .map_err(|_| anyhow!("NATIVE_USD_PRICE must be a decimal number, got {raw}"))?;
                if price <= Decimal::ZERO {
                    return Err(anyhow!("NATIVE_USD_PRICE must be positive"));
                }
                Some(price)
            }
            None => None,
        };

        let aggregator_rps = env_parse::<f64>("AGGREGATOR_RPS").unwrap_or(1.0 / 3.0);
        let chain_writer_rps = env_parse::<f64>("CHAIN_WRITER_RPS").unwrap_or(1.0 / 3.0);
        let sane_rps = |rps: f64| rps.is_finite() && rps >= MIN_REQUESTS_PER_SECOND;
        if !sane_rps(aggregator_rps) || !sane_rps(chain_writer_rps) {
            return Err(anyhow!(
                "AGGREGATOR_RPS and CHAIN_WRITER_RPS must be finite and at least {MIN_REQUESTS_PER_SECOND}"
            ));
        }

        let slippage_bps = env_parse::<u16>("SWAP_SLIPPAGE_BPS").unwrap_or(500);
        if slippage_bps == 0 || slippage_bps > 5_000 {
            return Err(anyhow!("SWAP_SLIPPAGE_BPS must be within 1..=5000"));
        }

        Ok(Self {
            database: DatabaseConfig {
                url: env_non_empty("DATABASE_URL"),
                max_connections: env_parse("DATABASE_MAX_CONNECTIONS").unwrap_or(16),
            },

            server: ServerConfig {
                host: env::var("SERVER_HOST").unwrap_or_else(|_| "0.0.0.0".to_string()),
                // $PORT wins when set by the hosting platform
                port: env_parse("PORT")
                    .or_else(|| env_parse("SERVER_PORT"))
                    .unwrap_or(3000),
                cors_origins: env::var("CORS_ORIGINS")
                    .unwrap_or_else(|_| "http://localhost:3001".to_string())
                    .split(',')
                    .map(|origin| origin.trim().to_string())
                    .filter(|origin| !origin.is_empty())
                    .collect(),
            },

            multibaas,

            swap: SwapConfig {
                aggregator_url: env::var("AGGREGATOR_URL")
                    .unwrap_or_else(|_| "https://api.1inch.dev/swap/v6.0/8453".to_string())
                    .trim_end_matches('/')
                    .to_string(),
                aggregator_api_key: env_non_empty("AGGREGATOR_API_KEY"),
                price_oracle_url: env::var("PRICE_ORACLE_URL")
                    .unwrap_or_else(|_| "https://api.coingecko.com/api/v3".to_string())
                    .trim_end_matches('/')
                    .to_string(),
                native_asset_id: env::var("NATIVE_ASSET_ID").unwrap_or_else(|_| "ethereum".to_string()),
                fixed_native_usd_price,
                mint_url: env_non_empty("MINT_URL"),
                portfolio_owner: env_non_empty("PORTFOLIO_OWNER"),
                slippage_bps,
                aggregator_rps,
                chain_writer_rps,
                rate_limit_burst: env_parse::<u32>("RATE_LIMIT_BURST").unwrap_or(1).max(1),
                mint_max_attempts: env_parse::<u32>("MINT_MAX_ATTEMPTS").unwrap_or(5).max(1),
                mint_retry_base: Duration::from_millis(env_parse("MINT_RETRY_BASE_MS").unwrap_or(2_000)),
            },

            chat: ChatConfig {
                backend_url: env_non_empty("CHAT_BACKEND_URL"),
            },

            http_timeout: Duration::from_secs(env_parse("HTTP_TIMEOUT_SECS").unwrap_or(30)),
        })
    }
}
