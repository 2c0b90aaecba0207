//! Log poller: the fallback path when webhook deliveries are lost.
//!
//! Scans confirmed blocks in bounded ranges and feeds decoded purchase
//! events into the same ledger the webhook uses, so overlap is harmless.
//! The last fully scanned block is persisted under [`watermark_key`].

use std::sync::Arc;

use alloy::primitives::Address;
use serde::Serialize;
use tokio::sync::watch;
use tokio::time::MissedTickBehavior;
use tracing::{debug, info, warn};

use super::{FulfillmentService, Result};
use crate::chain::ChainReader;
use crate::config::PollerConfig;
use crate::model::EventSource;
use crate::storage::PositionStore;

/// Position name for the poller of `contract` on `chain_id`.
pub fn watermark_key(chain_id: u64, contract: &Address) -> String {
    format!("poller:{}:{:#x}", chain_id, contract)
}

/// Result of one poll.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct PollReport {
    /// Scanned range, inclusive. `None` when nothing was scanned.
    pub range: Option<(u64, u64)>,
    pub events: usize,
    pub accepted: usize,
    /// True when the watermark reached the safe head.
    pub caught_up: bool,
}

pub struct PollerService {
    chain: Arc<dyn ChainReader>,
    positions: Arc<dyn PositionStore>,
    fulfillment: Arc<FulfillmentService>,
    config: PollerConfig,
    key: String,
}

impl PollerService {
    pub fn new(
        chain: Arc<dyn ChainReader>,
        positions: Arc<dyn PositionStore>,
        fulfillment: Arc<FulfillmentService>,
        config: PollerConfig,
        chain_id: u64,
        contract: Address,
    ) -> Self {
        Self {
            chain,
            positions,
            fulfillment,
            config,
            key: watermark_key(chain_id, &contract),
        }
    }

    /// Scan the next range of confirmed blocks.
    ///
    /// On first run without a configured start block the poller begins at
    /// the current safe head and records it, without scanning history.
    pub async fn tick(&self) -> Result<PollReport> {
        let head = self.chain.block_number().await?;
        let safe = head.saturating_sub(self.config.confirmations);

        let next = match self.positions.get(&self.key).await? {
            Some(watermark) => watermark + 1,
            None => match self.config.start_block {
                Some(start) => start,
                None => {
                    self.positions.put(&self.key, safe).await?;
                    info!(watermark = safe, key = %self.key, "Poller watermark initialized at safe head");
                    return Ok(PollReport {
                        caught_up: true,
                        ..Default::default()
                    });
                }
            },
        };

        if next > safe {
            return Ok(PollReport {
                caught_up: true,
                ..Default::default()
            });
        }

        let batch = self.config.batch_size.max(1);
        let to = next.saturating_add(batch - 1).min(safe);

        let events = self.chain.purchase_logs(next, to).await?;
        let ingest = self.fulfillment.ingest(&events, EventSource::Poller).await?;

        // Advance only after the range is durably in the ledger.
        self.positions.put(&self.key, to).await?;

        if !events.is_empty() {
            info!(
                from = next,
                to,
                events = events.len(),
                accepted = ingest.accepted,
                "Poller ingested purchase logs"
            );
        } else {
            debug!(from = next, to, "Poller scanned range");
        }

        Ok(PollReport {
            range: Some((next, to)),
            events: events.len(),
            accepted: ingest.accepted,
            caught_up: to >= safe,
        })
    }

    /// Poll on the configured interval until `shutdown` flips.
    ///
    /// While behind, ranges are scanned back to back.
    pub async fn run(self: Arc<Self>, mut shutdown: watch::Receiver<bool>) {
        let mut ticker = tokio::time::interval(self.config.interval());
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        info!(
            key = %self.key,
            interval_secs = self.config.interval_secs,
            confirmations = self.config.confirmations,
            "Log poller started"
        );

        loop {
            if *shutdown.borrow() {
                break;
            }

            tokio::select! {
                changed = shutdown.changed() => {
                    if changed.is_err() {
                        break;
                    }
                    continue;
                }
                _ = ticker.tick() => {}
            }

            loop {
                match self.tick().await {
                    Ok(report) if report.caught_up => break,
                    Ok(_) => {
                        if *shutdown.borrow() {
                            break;
                        }
                    }
                    Err(e) => {
                        warn!(error = %e, transient = e.is_transient(), "Poll failed");
                        break;
                    }
                }
            }
        }

        info!("Log poller stopped");
    }
}
