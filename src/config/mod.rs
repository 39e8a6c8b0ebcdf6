use crate::alert::Severity;
use alloy::primitives::Address;
use serde::Deserialize;
use std::path::Path;
use std::str::FromStr;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("failed to read config file: {0}")]
    Io(#[from] std::io::Error),
    #[error("failed to parse config: {0}")]
    Parse(#[from] toml::de::Error),
    #[error("missing required env var: {0}")]
    MissingEnv(String),
    #[error("invalid pool address {0:?}")]
    InvalidAddress(String),
    #[error("invalid alert threshold: {0}")]
    InvalidSeverity(String),
}

#[derive(Debug, Clone, Deserialize)]
pub struct Config {
    pub pool: PoolConfig,
    #[serde(default)]
    pub rpc: RpcConfig,
    #[serde(default)]
    pub alerts: AlertConfig,
    #[serde(default)]
    pub logging: LoggingConfig,
}

#[derive(Debug, Clone, Deserialize)]
pub struct PoolConfig {
    /// Marginal v1 pool contract - env CONTRACT_ADDRESS_MARGV1_POOL
    #[serde(default)]
    pub address: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct RpcConfig {
    /// Primary WebSocket RPC URL
    #[serde(default = "default_ws_url")]
    pub ws_url: String,
    /// Fallback WebSocket URLs, tried in order when the primary fails
    #[serde(default)]
    pub fallback_ws_urls: Vec<String>,
    /// Per-request timeout for state and log queries
    #[serde(default = "default_request_timeout_secs")]
    pub request_timeout_secs: u64,
    /// Cap on reconnect backoff
    #[serde(default = "default_max_backoff_secs")]
    pub max_backoff_secs: u64,
}

#[derive(Debug, Clone, Deserialize)]
pub struct AlertConfig {
    /// Least important severity that still gets sent (error = breaches only)
    #[serde(default = "default_threshold")]
    pub threshold: Severity,
    #[serde(default = "default_telegram_api_url")]
    pub telegram_api_url: String,
    /// Bot token - loaded from env TELEGRAM_BOT_TOKEN
    #[serde(default)]
    pub telegram_bot_token: String,
    /// Target chat - loaded from env TELEGRAM_CHAT_ID
    #[serde(default)]
    pub telegram_chat_id: String,
    /// Per-request timeout for alert delivery
    #[serde(default = "default_alert_timeout_secs")]
    pub request_timeout_secs: u64,
}

#[derive(Debug, Clone, Deserialize)]
pub struct LoggingConfig {
    #[serde(default = "default_log_level")]
    pub level: String,
    #[serde(default)]
    pub json: bool,
    /// Log passing invariant checks at info
    #[serde(default)]
    pub verbose: bool,
    /// Seconds between periodic metrics summaries (0 = shutdown only)
    #[serde(default = "default_metrics_interval_secs")]
    pub metrics_interval_secs: u64,
}

fn default_ws_url() -> String {
    "ws://127.0.0.1:8546".to_string()
}
fn default_request_timeout_secs() -> u64 {
    10
}
fn default_max_backoff_secs() -> u64 {
    60
}
fn default_threshold() -> Severity {
    Severity::Error
}
fn default_alert_timeout_secs() -> u64 {
    10
}
fn default_telegram_api_url() -> String {
    "https://api.telegram.org".to_string()
}
fn default_log_level() -> String {
    "info".to_string()
}
fn default_metrics_interval_secs() -> u64 {
    300
}

impl Default for RpcConfig {
    fn default() -> Self {
        Self {
            ws_url: default_ws_url(),
            fallback_ws_urls: Vec::new(),
            request_timeout_secs: default_request_timeout_secs(),
            max_backoff_secs: default_max_backoff_secs(),
        }
    }
}

impl Default for AlertConfig {
    fn default() -> Self {
        Self {
            threshold: default_threshold(),
            telegram_api_url: default_telegram_api_url(),
            telegram_bot_token: String::new(),
            telegram_chat_id: String::new(),
            request_timeout_secs: default_alert_timeout_secs(),
        }
    }
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            json: false,
            verbose: false,
            metrics_interval_secs: default_metrics_interval_secs(),
        }
    }
}

impl Config {
    /// Load config from a TOML file, then overlay environment variables.
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let contents = std::fs::read_to_string(path)?;
        let mut config: Config = toml::from_str(&contents)?;
        config.apply_env()?;
        Ok(config)
    }

    /// Load a default config from environment variables only (no file needed).
    pub fn from_env() -> Result<Self, ConfigError> {
        let address = std::env::var("CONTRACT_ADDRESS_MARGV1_POOL")
            .map_err(|_| ConfigError::MissingEnv("CONTRACT_ADDRESS_MARGV1_POOL".to_string()))?;

        let mut config = Config {
            pool: PoolConfig { address },
            rpc: RpcConfig::default(),
            alerts: AlertConfig::default(),
            logging: LoggingConfig::default(),
        };
        config.apply_env()?;
        Ok(config)
    }

    /// Environment wins over the file. Secrets are never stored in the file.
    fn apply_env(&mut self) -> Result<(), ConfigError> {
        if let Ok(address) = std::env::var("CONTRACT_ADDRESS_MARGV1_POOL") {
            self.pool.address = address;
        }
        if let Ok(url) = std::env::var("ETH_WS_URL") {
            self.rpc.ws_url = url;
        }
        if let Ok(urls) = std::env::var("ETH_WS_FALLBACK_URLS") {
            self.rpc.fallback_ws_urls = split_urls(&urls);
        }
        if let Ok(threshold) = std::env::var("ALERT_THRESHOLD") {
            self.alerts.threshold =
                Severity::from_str(&threshold).map_err(ConfigError::InvalidSeverity)?;
        }
        if let Ok(token) = std::env::var("TELEGRAM_BOT_TOKEN") {
            self.alerts.telegram_bot_token = token;
        }
        if let Ok(chat) = std::env::var("TELEGRAM_CHAT_ID") {
            self.alerts.telegram_chat_id = chat;
        }
        if let Ok(level) = std::env::var("LOG_LEVEL") {
            self.logging.level = level;
        }
        Ok(())
    }

    pub fn pool_address(&self) -> Result<Address, ConfigError> {
        Address::from_str(self.pool.address.trim())
            .map_err(|_| ConfigError::InvalidAddress(self.pool.address.clone()))
    }

    pub fn has_telegram(&self) -> bool {
        !self.alerts.telegram_bot_token.is_empty() && !self.alerts.telegram_chat_id.is_empty()
    }
}

fn split_urls(raw: &str) -> Vec<String> {
    raw.split(',')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(String::from)
        .collect()
}
