//! Decoded on-chain purchase events.

use std::fmt;

use alloy::primitives::{Address, B256, U256};
use serde::{Deserialize, Serialize};

/// Identity of an on-chain log: `{chain_id}:{tx_hash}:{log_index}`.
///
/// Used as the primary key of the fulfillment ledger, so the same log seen
/// via the webhook and the poller (or delivered twice) collapses to one job.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct EventKey(String);

impl EventKey {
    pub fn new(chain_id: u64, tx_hash: &B256, log_index: u64) -> Self {
        Self(format!("{}:{:#x}:{}", chain_id, tx_hash, log_index))
    }

    /// Wrap a key previously produced by [`EventKey::new`].
    pub fn from_raw(raw: impl Into<String>) -> Self {
        Self(raw.into().to_lowercase())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for EventKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Where an event was observed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EventSource {
    Webhook,
    Poller,
}

impl EventSource {
    pub fn as_str(&self) -> &'static str {
        match self {
            EventSource::Webhook => "webhook",
            EventSource::Poller => "poller",
        }
    }
}

/// A decoded `InvitationBought` log plus its position on chain.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PurchaseEvent {
    pub chain_id: u64,
    pub tx_hash: B256,
    pub log_index: u64,
    pub block_number: Option<u64>,
    pub group_id_hash: B256,
    pub buyer: Address,
    pub referrer: Address,
    pub price: U256,
    pub owner_fee: U256,
    pub referrer_fee: U256,
    pub protocol_fee: U256,
}

impl PurchaseEvent {
    pub fn key(&self) -> EventKey {
        EventKey::new(self.chain_id, &self.tx_hash, self.log_index)
    }
}
