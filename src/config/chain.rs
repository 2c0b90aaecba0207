//! Chain access and event intake configuration.

use std::time::Duration;

use serde::Deserialize;

/// EVM endpoint and contract.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ChainConfig {
    /// HTTP JSON-RPC endpoint (Alchemy, Infura, public node).
    pub rpc_url: String,
    pub chain_id: u64,
    /// Invitation contract address.
    pub contract_address: String,
}

impl Default for ChainConfig {
    fn default() -> Self {
        Self {
            rpc_url: "http://localhost:8545".to_string(),
            chain_id: 43113,
            contract_address: String::new(),
        }
    }
}

/// Inbound webhook authentication.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct WebhookConfig {
    /// Moralis Streams secret used to verify `x-signature`.
    pub moralis_secret: Option<String>,
    /// Value Telegram echoes in `X-Telegram-Bot-Api-Secret-Token`.
    pub telegram_secret: Option<String>,
    /// Ignore Moralis deliveries with `confirmed: false`.
    pub require_confirmed: bool,
}

impl Default for WebhookConfig {
    fn default() -> Self {
        Self {
            moralis_secret: None,
            telegram_secret: None,
            require_confirmed: true,
        }
    }
}

/// Log poller settings.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct PollerConfig {
    pub enabled: bool,
    pub interval_secs: u64,
    /// Maximum blocks scanned per `eth_getLogs` call.
    pub batch_size: u64,
    /// Blocks behind head considered final.
    pub confirmations: u64,
    /// First block to scan when no watermark is stored.
    pub start_block: Option<u64>,
}

impl Default for PollerConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            interval_secs: 15,
            batch_size: 2_000,
            confirmations: 3,
            start_block: None,
        }
    }
}

impl PollerConfig {
    pub fn interval(&self) -> Duration {
        Duration::from_secs(self.interval_secs.max(1))
    }
}
