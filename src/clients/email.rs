//! Invitation email delivery through the Resend API.

use std::time::Duration;

use async_trait::async_trait;
use backon::{ExponentialBuilder, Retryable};
use reqwest::Client;
use serde::Serialize;
use tracing::{debug, warn};

use crate::config::EmailConfig;
use crate::model::InvitationConfig;
use crate::utils::retry::{http_backoff, is_retryable_error, is_retryable_status};

/// Errors that can occur sending email.
#[derive(Debug, thiserror::Error)]
pub enum EmailError {
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("Email API error {status}: {message}")]
    Api { status: u16, message: String },

    #[error("Email configuration error: {0}")]
    Config(String),
}

impl EmailError {
    pub fn is_transient(&self) -> bool {
        match self {
            EmailError::Http(e) => is_retryable_error(e),
            EmailError::Api { status, .. } => reqwest::StatusCode::from_u16(*status)
                .map(is_retryable_status)
                .unwrap_or(false),
            EmailError::Config(_) => false,
        }
    }
}

pub type Result<T> = std::result::Result<T, EmailError>;

/// Delivers invite links to buyers.
#[async_trait]
pub trait Mailer: Send + Sync {
    /// Email `link` for `group` to `to`.
    ///
    /// `idempotency_key` is stable across retries of the same delivery.
    async fn send_invitation(
        &self,
        to: &str,
        group: &InvitationConfig,
        link: &str,
        idempotency_key: &str,
    ) -> Result<()>;
}

#[derive(Debug, Serialize)]
struct SendEmail<'a> {
    from: &'a str,
    to: [&'a str; 1],
    subject: &'a str,
    html: String,
    text: String,
}

/// Resend (`POST /emails`) mailer.
pub struct ResendMailer {
    client: Client,
    config: EmailConfig,
    api_key: String,
    backoff: ExponentialBuilder,
}

impl ResendMailer {
    pub fn new(config: &EmailConfig) -> Result<Self> {
        let api_key = config
            .api_key
            .clone()
            .filter(|k| !k.trim().is_empty())
            .ok_or_else(|| EmailError::Config("email api key not configured".to_string()))?;

        let client = Client::builder().timeout(Duration::from_secs(15)).build()?;

        Ok(Self {
            client,
            config: config.clone(),
            api_key,
            backoff: http_backoff(),
        })
    }

    /// Replace the in-call retry backoff.
    pub fn with_backoff(mut self, backoff: ExponentialBuilder) -> Self {
        self.backoff = backoff;
        self
    }

    async fn post(&self, email: &SendEmail<'_>, idempotency_key: &str) -> Result<()> {
        let response = self
            .client
            .post(format!("{}/emails", self.config.api_url.trim_end_matches('/')))
            .bearer_auth(&self.api_key)
            .header("Idempotency-Key", idempotency_key)
            .json(email)
            .send()
            .await?;

        let status = response.status();
        if status.is_success() {
            return Ok(());
        }

        let body = response.text().await.unwrap_or_default();
        Err(EmailError::Api {
            status: status.as_u16(),
            message: body.chars().take(200).collect(),
        })
    }
}

#[async_trait]
impl Mailer for ResendMailer {
    async fn send_invitation(
        &self,
        to: &str,
        group: &InvitationConfig,
        link: &str,
        idempotency_key: &str,
    ) -> Result<()> {
        let email = SendEmail {
            from: &self.config.from,
            to: [to],
            subject: &self.config.subject,
            html: render_html(group, link),
            text: render_text(group, link),
        };

        (|| async { self.post(&email, idempotency_key).await })
            .retry(self.backoff)
            .when(EmailError::is_transient)
            .notify(|err, delay| {
                warn!(error = %err, ?delay, "Retrying invitation email");
            })
            .await?;

        debug!(group_id = %group.group_id, "Invitation email sent");
        Ok(())
    }
}

fn group_label(group: &InvitationConfig) -> String {
    group
        .description
        .as_deref()
        .map(str::trim)
        .filter(|d| !d.is_empty())
        .map(str::to_string)
        .unwrap_or_else(|| "your Telegram group".to_string())
}

fn render_text(group: &InvitationConfig, link: &str) -> String {
    format!(
        "Your purchase is confirmed.\n\nJoin {} with this one-time link:\n{}\n\nThe link admits a single member.",
        group_label(group),
        link
    )
}

fn render_html(group: &InvitationConfig, link: &str) -> String {
    let link = escape_html(link);
    format!(
        "<p>Your purchase is confirmed.</p>\
         <p>Join <strong>{}</strong> with this one-time link:</p>\
         <p><a href=\"{link}\">{link}</a></p>\
         <p>The link admits a single member.</p>",
        escape_html(&group_label(group)),
    )
}

fn escape_html(raw: &str) -> String {
    let mut out = String::with_capacity(raw.len());
    for c in raw.chars() {
        match c {
            '&' => out.push_str("&amp;"),
            '<' => out.push_str("&lt;"),
            '>' => out.push_str("&gt;"),
            '"' => out.push_str("&quot;"),
            '\'' => out.push_str("&#39;"),
            c => out.push(c),
        }
    }
    out
}
