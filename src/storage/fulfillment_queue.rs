//! FulfillmentQueue trait definition.
//!
//! The queue is also the idempotency ledger: its primary key is the event
//! key, so a log delivered twice (webhook retry, webhook plus poller) is
//! stored once.

use std::fmt;
use std::str::FromStr;
use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use super::{Result, StorageError};
use crate::model::{EventKey, EventSource, PurchaseEvent};

/// State of a ledger entry.
///
/// ```text
/// pending ──▶ done
///    │ ▲
///    │ └──── requeue ────┐
///    ├──▶ unmatched ─────┤
///    └──▶ dead ──────────┘
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum JobState {
    Pending,
    Done,
    Unmatched,
    Dead,
}

impl JobState {
    pub fn as_str(&self) -> &'static str {
        match self {
            JobState::Pending => "pending",
            JobState::Done => "done",
            JobState::Unmatched => "unmatched",
            JobState::Dead => "dead",
        }
    }
}

impl fmt::Display for JobState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for JobState {
    type Err = StorageError;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "pending" => Ok(JobState::Pending),
            "done" => Ok(JobState::Done),
            "unmatched" => Ok(JobState::Unmatched),
            "dead" => Ok(JobState::Dead),
            other => Err(StorageError::Corrupt(format!("unknown job state {}", other))),
        }
    }
}

/// One observed purchase log and its processing state.
///
/// Chain values are kept in their canonical text form: hashes and addresses
/// as lowercase `0x` hex, amounts as decimal wei.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct FulfillmentJob {
    pub event_key: EventKey,
    pub chain_id: u64,
    pub tx_hash: String,
    pub log_index: u64,
    pub block_number: Option<u64>,
    pub group_id_hash: String,
    pub buyer_address: String,
    pub referrer_address: String,
    pub price: String,
    pub source: String,
    pub state: JobState,
    pub attempts: u32,
    /// Unix milliseconds.
    pub next_attempt_at: i64,
    pub last_error: Option<String>,
    pub created_at: String,
    pub updated_at: String,
}

/// Durable, idempotent work queue of purchase events.
///
/// Times are Unix milliseconds supplied by the caller.
#[async_trait]
pub trait FulfillmentQueue: Send + Sync {
    /// Record an event as a pending job due at `now`.
    ///
    /// Returns `false` when the event key is already present.
    async fn enqueue(&self, event: &PurchaseEvent, source: EventSource, now: i64) -> Result<bool>;

    /// Lease up to `limit` pending jobs due at `now`.
    ///
    /// A claimed job's `next_attempt_at` moves to `now + lease`, so another
    /// worker will not pick it up until the lease lapses.
    async fn claim_due(&self, now: i64, lease: Duration, limit: u32) -> Result<Vec<FulfillmentJob>>;

    async fn complete(&self, key: &EventKey) -> Result<()>;

    /// No pending invitation matched the event.
    async fn mark_unmatched(&self, key: &EventKey, reason: &str) -> Result<()>;

    /// Record a failed attempt and schedule the next one at `at`.
    async fn reschedule(&self, key: &EventKey, attempts: u32, at: i64, error: &str) -> Result<()>;

    /// Stop retrying.
    async fn dead_letter(&self, key: &EventKey, attempts: u32, error: &str) -> Result<()>;

    /// Move a dead or unmatched job back to pending with attempts reset.
    ///
    /// Fails with `NotFound` if no such job exists and `Conflict` if the job
    /// is pending or done.
    async fn requeue(&self, key: &EventKey, now: i64) -> Result<FulfillmentJob>;

    async fn get(&self, key: &EventKey) -> Result<Option<FulfillmentJob>>;

    /// Most recently updated jobs first, optionally filtered by state.
    async fn list(&self, state: Option<JobState>, limit: u32) -> Result<Vec<FulfillmentJob>>;
}
