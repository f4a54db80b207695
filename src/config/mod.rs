//! Configuration management for the web-authentication service
//!
//! Loads and validates configuration from environment variables. One
//! config per tenant; secrets are excluded from the Debug output.

use std::env;
use thiserror::Error;

/// Configuration errors
#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Missing required environment variable: {0}")]
    MissingEnvVar(String),

    #[error("Invalid environment value: {0}")]
    InvalidValue(String),
}

/// Application environment
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Environment {
    #[default]
    Development,
    Staging,
    Production,
}

impl Environment {
    /// Parse environment from string
    pub fn parse(s: &str) -> Result<Self, ConfigError> {
        match s.to_lowercase().as_str() {
            "dev" | "development" => Ok(Environment::Development),
            "staging" => Ok(Environment::Staging),
            "prod" | "production" => Ok(Environment::Production),
            _ => Err(ConfigError::InvalidValue(format!(
                "Invalid environment: '{}'. Expected: dev, staging, or prod",
                s
            ))),
        }
    }

    pub fn is_production(&self) -> bool {
        matches!(self, Environment::Production)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Environment::Development => "development",
            Environment::Staging => "staging",
            Environment::Production => "production",
        }
    }
}

/// Service configuration
#[derive(Clone)]
pub struct Config {
    /// Public base URL of this service
    pub base_url: String,

    /// Network passphrase of the ledger network
    pub network_passphrase: String,

    /// Ledger RPC URL for simulations
    pub rpc_url: String,

    /// Contract id of the ownership-verification contract
    pub web_auth_contract_id: String,

    /// Secret seed of the server signing keypair
    pub server_signing_seed: String,

    /// Secret used to sign session tokens
    pub jwt_secret: String,

    /// Session token expiration for deposit and service tokens, in ms
    pub jwt_expiration_ms: i64,

    /// Retry domain-key fetches over plain HTTP when HTTPS fails
    pub allow_http_retry: bool,

    /// Nonce validity window in seconds
    pub nonce_ttl_seconds: i64,

    /// Log level (RUST_LOG)
    pub log_level: String,

    /// Current environment
    pub environment: Environment,
}

impl std::fmt::Debug for Config {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Config")
            .field("base_url", &self.base_url)
            .field("network_passphrase", &self.network_passphrase)
            .field("rpc_url", &self.rpc_url)
            .field("web_auth_contract_id", &self.web_auth_contract_id)
            .field("jwt_expiration_ms", &self.jwt_expiration_ms)
            .field("allow_http_retry", &self.allow_http_retry)
            .field("nonce_ttl_seconds", &self.nonce_ttl_seconds)
            .field("log_level", &self.log_level)
            .field("environment", &self.environment)
            .finish_non_exhaustive()
    }
}

impl Config {
    /// Load configuration from environment variables
    pub fn from_env() -> Result<Self, ConfigError> {
        // Load .env file if present (ignore errors)
        dotenvy::dotenv().ok();

        let environment = env::var("ENVIRONMENT")
            .map(|s| Environment::parse(&s))
            .unwrap_or(Ok(Environment::Development))?;

        let base_url =
            env::var("BASE_URL").unwrap_or_else(|_| "http://localhost:8000".to_string());

        let network_passphrase = env::var("NETWORK_PASSPHRASE")
            .unwrap_or_else(|_| "Test SDF Network ; September 2015".to_string());

        let rpc_url = env::var("RPC_URL")
            .unwrap_or_else(|_| "https://soroban-testnet.stellar.org".to_string());

        let web_auth_contract_id = env::var("WEB_AUTH_CONTRACT_ID")
            .map_err(|_| ConfigError::MissingEnvVar("WEB_AUTH_CONTRACT_ID".to_string()))?;

        let server_signing_seed = env::var("SERVER_SIGNING_SEED")
            .map_err(|_| ConfigError::MissingEnvVar("SERVER_SIGNING_SEED".to_string()))?;

        let jwt_secret = env::var("JWT_SECRET")
            .unwrap_or_else(|_| "development-secret-change-in-production".to_string());

        let jwt_expiration_ms = env::var("JWT_EXPIRATION_MS")
            .unwrap_or_else(|_| "15000".to_string())
            .parse::<i64>()
            .unwrap_or(15000);

        let allow_http_retry = env::var("ALLOW_HTTP_RETRY")
            .map(|v| v == "true" || v == "1")
            .unwrap_or(false);

        let nonce_ttl_seconds = env::var("NONCE_TTL_SECONDS")
            .unwrap_or_else(|_| crate::nonce::DEFAULT_NONCE_TTL_SECONDS.to_string())
            .parse::<i64>()
            .unwrap_or(crate::nonce::DEFAULT_NONCE_TTL_SECONDS);

        let log_level = env::var("RUST_LOG").unwrap_or_else(|_| "info".to_string());

        Ok(Config {
            base_url,
            network_passphrase,
            rpc_url,
            web_auth_contract_id,
            server_signing_seed,
            jwt_secret,
            jwt_expiration_ms,
            allow_http_retry,
            nonce_ttl_seconds,
            log_level,
            environment,
        })
    }
}
