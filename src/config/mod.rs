//! Application configuration.
//!
//! Aggregates the per-concern sections into a single Config struct that is
//! loaded from YAML files and environment variables.

mod chain;
mod delivery;
mod server;
mod storage;

pub use chain::{ChainConfig, PollerConfig, WebhookConfig};
pub use delivery::{EmailConfig, FulfillmentConfig, TelegramConfig};
pub use server::ServerConfig;
pub use storage::StorageConfig;

use serde::Deserialize;

/// Default configuration file name.
pub const DEFAULT_CONFIG_FILE: &str = "config.yaml";
/// Environment variable for configuration file path.
pub const CONFIG_ENV_VAR: &str = "TRIGGERS_CONFIG";
/// Prefix for configuration environment variables.
pub const CONFIG_ENV_PREFIX: &str = "TRIGGERS";
/// Environment variable for logging configuration.
pub const LOG_ENV_VAR: &str = "TRIGGERS_LOG";
/// Environment variable selecting the log output format (`json` or text).
pub const LOG_FORMAT_ENV_VAR: &str = "TRIGGERS_LOG_FORMAT";

/// Configuration errors.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Failed to load config: {0}")]
    Load(#[from] ::config::ConfigError),

    #[error("Missing required setting: {0}")]
    Missing(&'static str),

    #[error("Invalid setting {0}: {1}")]
    Invalid(&'static str, String),
}

/// Main application configuration.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct Config {
    pub server: ServerConfig,
    pub storage: StorageConfig,
    pub chain: ChainConfig,
    pub webhook: WebhookConfig,
    pub poller: PollerConfig,
    pub fulfillment: FulfillmentConfig,
    pub telegram: TelegramConfig,
    pub email: EmailConfig,
}

impl Config {
    /// Load configuration from file and environment.
    ///
    /// Configuration sources (in order of priority, later overrides earlier):
    /// 1. `config.yaml` in current directory (if exists)
    /// 2. File specified by `path` argument (if provided)
    /// 3. File specified by `CONFIG_ENV_VAR` environment variable (if set)
    /// 4. Environment variables with `CONFIG_ENV_PREFIX` prefix, sections
    ///    separated by `__` (`TRIGGERS__TELEGRAM__BOT_TOKEN`)
    pub fn load(path: Option<&str>) -> Result<Self, ConfigError> {
        use ::config::{Config as ConfigLib, Environment, File, FileFormat};

        let mut builder = ConfigLib::builder()
            .add_source(File::new(DEFAULT_CONFIG_FILE, FileFormat::Yaml).required(false));

        if let Some(config_path) = path {
            builder = builder.add_source(File::new(config_path, FileFormat::Yaml).required(true));
        }

        if let Ok(config_path) = std::env::var(CONFIG_ENV_VAR) {
            builder = builder.add_source(File::new(&config_path, FileFormat::Yaml).required(true));
        }

        let config = builder
            .add_source(
                Environment::with_prefix(CONFIG_ENV_PREFIX)
                    .separator("__")
                    .try_parsing(true),
            )
            .build()?;

        let config: Config = config.try_deserialize()?;
        Ok(config)
    }

    /// Check that every secret and endpoint needed to run the service is set.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.chain.contract_address.trim().is_empty() {
            return Err(ConfigError::Missing("chain.contract_address"));
        }
        crate::model::parse_address(&self.chain.contract_address)
            .map_err(|e| ConfigError::Invalid("chain.contract_address", e.to_string()))?;

        if self.chain.rpc_url.trim().is_empty() {
            return Err(ConfigError::Missing("chain.rpc_url"));
        }
        if is_blank(&self.telegram.bot_token) {
            return Err(ConfigError::Missing("telegram.bot_token"));
        }
        if is_blank(&self.email.api_key) {
            return Err(ConfigError::Missing("email.api_key"));
        }
        if is_blank(&self.webhook.moralis_secret) {
            return Err(ConfigError::Missing("webhook.moralis_secret"));
        }
        if self.fulfillment.max_attempts == 0 {
            return Err(ConfigError::Invalid(
                "fulfillment.max_attempts",
                "must be at least 1".to_string(),
            ));
        }
        if self.poller.batch_size == 0 {
            return Err(ConfigError::Invalid(
                "poller.batch_size",
                "must be at least 1".to_string(),
            ));
        }
        Ok(())
    }
}

fn is_blank(value: &Option<String>) -> bool {
    value.as_deref().map(str::trim).unwrap_or_default().is_empty()
}
