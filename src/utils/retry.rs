//! Retry utilities: backoff builders and retryable error classification.
//!
//! Two schedules use `backon`:
//! - in-call retry for a single outbound HTTP request
//! - the durable schedule of the fulfillment queue, where each delay is
//!   persisted as the job's next attempt time instead of slept

use std::time::Duration;

use backon::{BackoffBuilder, ExponentialBuilder};

use crate::config::FulfillmentConfig;

/// Backoff for a single outbound HTTP call (Telegram, email).
///
/// - Min delay: 200ms
/// - Max delay: 5s
/// - Max retries: 3
/// - Jitter enabled
pub fn http_backoff() -> ExponentialBuilder {
    ExponentialBuilder::default()
        .with_min_delay(Duration::from_millis(200))
        .with_max_delay(Duration::from_secs(5))
        .with_max_times(3)
        .with_jitter()
}

/// Timeouts and connection failures may clear on retry.
pub fn is_retryable_error(err: &reqwest::Error) -> bool {
    err.is_timeout() || err.is_connect()
}

/// 429 (rate limit) and 5xx are retryable; other statuses are final.
pub fn is_retryable_status(status: reqwest::StatusCode) -> bool {
    status == reqwest::StatusCode::TOO_MANY_REQUESTS || status.is_server_error()
}

/// Durable retry schedule of fulfillment jobs.
#[derive(Debug, Clone, Copy)]
pub struct RetrySchedule {
    builder: ExponentialBuilder,
}

impl RetrySchedule {
    /// `max_attempts` counts the first attempt, so a job is retried
    /// `max_attempts - 1` times.
    pub fn new(min_delay: Duration, max_delay: Duration, max_attempts: u32) -> Self {
        let builder = ExponentialBuilder::default()
            .with_min_delay(min_delay)
            .with_max_delay(max_delay)
            .with_max_times(max_attempts.saturating_sub(1) as usize);
        Self { builder }
    }

    pub fn from_config(config: &FulfillmentConfig) -> Self {
        Self::new(
            Duration::from_millis(config.min_delay_ms),
            Duration::from_millis(config.max_delay_ms),
            config.max_attempts,
        )
    }

    /// Delay before the next attempt after `failed_attempts` failures, or
    /// `None` once the budget is spent.
    pub fn delay_for_attempt(&self, failed_attempts: u32) -> Option<Duration> {
        if failed_attempts == 0 {
            return Some(Duration::ZERO);
        }
        self.builder
            .build()
            .nth(failed_attempts as usize - 1)
    }
}
