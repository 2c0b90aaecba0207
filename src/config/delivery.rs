//! Fulfillment worker and outbound delivery configuration.

use std::time::Duration;

use serde::Deserialize;

/// Fulfillment worker and retry schedule.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct FulfillmentConfig {
    /// Idle poll interval when no ingest wakes the worker.
    pub interval_ms: u64,
    /// Jobs claimed per pass.
    pub batch_size: u32,
    /// Total processing attempts before a job is dead-lettered.
    pub max_attempts: u32,
    pub min_delay_ms: u64,
    pub max_delay_ms: u64,
    /// How long a claimed job stays invisible to other passes.
    pub lease_secs: u64,
}

impl Default for FulfillmentConfig {
    fn default() -> Self {
        Self {
            interval_ms: 2_000,
            batch_size: 20,
            max_attempts: 5,
            min_delay_ms: 1_000,
            max_delay_ms: 300_000,
            lease_secs: 60,
        }
    }
}

impl FulfillmentConfig {
    pub fn interval(&self) -> Duration {
        Duration::from_millis(self.interval_ms.max(10))
    }

    pub fn lease(&self) -> Duration {
        Duration::from_secs(self.lease_secs)
    }
}

/// Telegram Bot API.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct TelegramConfig {
    pub api_url: String,
    pub bot_token: Option<String>,
    /// Lifetime of issued invite links. Zero means no expiry.
    pub invite_link_ttl_secs: u64,
}

impl Default for TelegramConfig {
    fn default() -> Self {
        Self {
            api_url: "https://api.telegram.org".to_string(),
            bot_token: None,
            invite_link_ttl_secs: 7 * 24 * 60 * 60,
        }
    }
}

/// Transactional email (Resend API).
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct EmailConfig {
    pub api_url: String,
    pub api_key: Option<String>,
    pub from: String,
    pub subject: String,
}

impl Default for EmailConfig {
    fn default() -> Self {
        Self {
            api_url: "https://api.resend.com".to_string(),
            api_key: None,
            from: "Social Triggers <invites@socialtriggers.app>".to_string(),
            subject: "Your Telegram group invitation".to_string(),
        }
    }
}
