//! Telegram Bot API client.

use std::time::Duration;

use async_trait::async_trait;
use backon::{ExponentialBuilder, Retryable};
use reqwest::Client;
use serde::de::DeserializeOwned;
use serde::Deserialize;
use serde_json::{json, Value};
use tracing::{debug, warn};

use crate::config::TelegramConfig;
use crate::utils::retry::{http_backoff, is_retryable_error, is_retryable_status};

/// Telegram limits invite link names to 32 characters.
const MAX_LINK_NAME: usize = 32;

/// Errors that can occur calling the Bot API.
#[derive(Debug, thiserror::Error)]
pub enum TelegramError {
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("Telegram API error {code}: {description}")]
    Api { code: u16, description: String },

    #[error("Unexpected response: {0}")]
    Decode(String),

    #[error("Telegram configuration error: {0}")]
    Config(String),
}

impl TelegramError {
    /// Network failures, rate limits and server errors may clear on retry.
    pub fn is_transient(&self) -> bool {
        match self {
            TelegramError::Http(e) => is_retryable_error(e),
            TelegramError::Api { code, .. } => reqwest::StatusCode::from_u16(*code)
                .map(is_retryable_status)
                .unwrap_or(false),
            TelegramError::Decode(_) | TelegramError::Config(_) => false,
        }
    }
}

pub type Result<T> = std::result::Result<T, TelegramError>;

/// Bot operations used by the service.
#[async_trait]
pub trait TelegramApi: Send + Sync {
    /// Create a single-use invite link for `chat_id`.
    ///
    /// `expire_date` is a Unix timestamp in seconds.
    async fn create_invite_link(
        &self,
        chat_id: i64,
        name: &str,
        expire_date: Option<i64>,
    ) -> Result<String>;

    async fn send_message(&self, chat_id: i64, text: &str) -> Result<()>;

    /// Whether `user_id` is the creator or an administrator of `chat_id`.
    async fn is_chat_admin(&self, chat_id: i64, user_id: i64) -> Result<bool>;
}

#[derive(Debug, Deserialize)]
struct ApiResponse<T> {
    ok: bool,
    result: Option<T>,
    description: Option<String>,
    error_code: Option<u16>,
}

#[derive(Debug, Deserialize)]
struct ChatInviteLink {
    invite_link: String,
}

#[derive(Debug, Deserialize)]
struct ChatMember {
    status: String,
}

/// Bot API over HTTPS.
pub struct BotApiClient {
    client: Client,
    base_url: String,
    backoff: ExponentialBuilder,
}

impl BotApiClient {
    pub fn new(config: &TelegramConfig) -> Result<Self> {
        let token = config
            .bot_token
            .as_deref()
            .filter(|t| !t.trim().is_empty())
            .ok_or_else(|| TelegramError::Config("bot token not configured".to_string()))?;

        let client = Client::builder().timeout(Duration::from_secs(15)).build()?;

        Ok(Self {
            client,
            base_url: format!("{}/bot{}", config.api_url.trim_end_matches('/'), token),
            backoff: http_backoff(),
        })
    }

    /// Replace the in-call retry backoff.
    pub fn with_backoff(mut self, backoff: ExponentialBuilder) -> Self {
        self.backoff = backoff;
        self
    }

    async fn call_once<T: DeserializeOwned>(&self, method: &str, body: &Value) -> Result<T> {
        let response = self
            .client
            .post(format!("{}/{}", self.base_url, method))
            .json(body)
            .send()
            .await?;

        let status = response.status();
        let text = response.text().await?;

        let parsed: ApiResponse<T> = match serde_json::from_str(&text) {
            Ok(parsed) => parsed,
            Err(e) if status.is_success() => {
                return Err(TelegramError::Decode(format!("{}: {}", method, e)));
            }
            Err(_) => {
                return Err(TelegramError::Api {
                    code: status.as_u16(),
                    description: text.chars().take(200).collect(),
                });
            }
        };

        match parsed {
            ApiResponse {
                ok: true,
                result: Some(result),
                ..
            } => Ok(result),
            ApiResponse {
                ok: true,
                result: None,
                ..
            } => Err(TelegramError::Decode(format!("{}: missing result", method))),
            ApiResponse {
                description,
                error_code,
                ..
            } => Err(TelegramError::Api {
                code: error_code.unwrap_or(status.as_u16()),
                description: description.unwrap_or_default(),
            }),
        }
    }

    async fn call<T: DeserializeOwned>(&self, method: &str, body: Value) -> Result<T> {
        (|| async { self.call_once(method, &body).await })
            .retry(self.backoff)
            .when(TelegramError::is_transient)
            .notify(|err, delay| {
                warn!(method, error = %err, ?delay, "Retrying Telegram call");
            })
            .await
    }
}

#[async_trait]
impl TelegramApi for BotApiClient {
    async fn create_invite_link(
        &self,
        chat_id: i64,
        name: &str,
        expire_date: Option<i64>,
    ) -> Result<String> {
        let name: String = name.chars().take(MAX_LINK_NAME).collect();
        let mut body = json!({
            "chat_id": chat_id,
            "name": name,
            "member_limit": 1,
        });
        if let Some(expire_date) = expire_date {
            body["expire_date"] = json!(expire_date);
        }

        let link: ChatInviteLink = self.call("createChatInviteLink", body).await?;
        debug!(chat_id, "Created invite link");
        Ok(link.invite_link)
    }

    async fn send_message(&self, chat_id: i64, text: &str) -> Result<()> {
        let _: Value = self
            .call("sendMessage", json!({ "chat_id": chat_id, "text": text }))
            .await?;
        Ok(())
    }

    async fn is_chat_admin(&self, chat_id: i64, user_id: i64) -> Result<bool> {
        let member: ChatMember = self
            .call(
                "getChatMember",
                json!({ "chat_id": chat_id, "user_id": user_id }),
            )
            .await?;
        Ok(matches!(member.status.as_str(), "creator" | "administrator"))
    }
}
