//! Fulfillment worker.
//!
//! Drains the durable queue: each purchase event is matched to a PENDING
//! invitation, a single-use Telegram link is issued and persisted, and the
//! link is emailed to the buyer. Failed attempts are rescheduled on the
//! [`RetrySchedule`] and dead-lettered once it is exhausted.

use std::sync::Arc;

use serde::Serialize;
use tokio::sync::{watch, Notify};
use tokio::time::MissedTickBehavior;
use tracing::{debug, error, info, warn};

use super::{Result, ServiceError};
use crate::clients::{EmailError, Mailer, TelegramApi, TelegramError};
use crate::config::FulfillmentConfig;
use crate::model::{EventKey, EventSource, Invitation, InvitationStatus, PurchaseEvent};
use crate::storage::{
    FulfillmentJob, FulfillmentQueue, GroupStore, InvitationStore, JobState, StorageError, Stores,
};
use crate::utils::now_millis;
use crate::utils::retry::RetrySchedule;

/// Outcome of handing events to the ledger.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct IngestReport {
    pub accepted: usize,
    pub duplicates: usize,
}

/// Counts from one pass over due jobs.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct RunReport {
    pub claimed: usize,
    pub completed: usize,
    pub unmatched: usize,
    pub retried: usize,
    pub dead: usize,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Outcome {
    Completed,
    Unmatched,
    Retried,
    Dead,
}

/// Why a delivery attempt failed.
#[derive(Debug, thiserror::Error)]
enum DeliveryError {
    #[error(transparent)]
    Storage(#[from] StorageError),

    #[error(transparent)]
    Telegram(#[from] TelegramError),

    #[error(transparent)]
    Email(#[from] EmailError),

    #[error("Group unavailable: {0}")]
    GroupMissing(String),
}

impl DeliveryError {
    fn is_transient(&self) -> bool {
        match self {
            DeliveryError::Storage(e) => e.is_transient(),
            DeliveryError::Telegram(e) => e.is_transient(),
            DeliveryError::Email(e) => e.is_transient(),
            DeliveryError::GroupMissing(_) => false,
        }
    }
}

pub struct FulfillmentService {
    queue: Arc<dyn FulfillmentQueue>,
    invitations: Arc<dyn InvitationStore>,
    groups: Arc<dyn GroupStore>,
    telegram: Arc<dyn TelegramApi>,
    mailer: Arc<dyn Mailer>,
    schedule: RetrySchedule,
    config: FulfillmentConfig,
    link_ttl_secs: u64,
    notify: Notify,
}

impl FulfillmentService {
    pub fn new(
        stores: &Stores,
        telegram: Arc<dyn TelegramApi>,
        mailer: Arc<dyn Mailer>,
        config: FulfillmentConfig,
        link_ttl_secs: u64,
    ) -> Self {
        Self {
            queue: stores.queue.clone(),
            invitations: stores.invitations.clone(),
            groups: stores.groups.clone(),
            telegram,
            mailer,
            schedule: RetrySchedule::from_config(&config),
            config,
            link_ttl_secs,
            notify: Notify::new(),
        }
    }

    /// Record events in the ledger and wake the worker.
    ///
    /// Events already present (same chain, transaction and log index) are
    /// counted as duplicates and otherwise ignored.
    pub async fn ingest(
        &self,
        events: &[PurchaseEvent],
        source: EventSource,
    ) -> std::result::Result<IngestReport, StorageError> {
        let now = now_millis();
        let mut report = IngestReport::default();

        for event in events {
            if self.queue.enqueue(event, source, now).await? {
                info!(
                    event_key = %event.key(),
                    tx_hash = %event.tx_hash,
                    source = source.as_str(),
                    "Purchase event accepted"
                );
                report.accepted += 1;
            } else {
                debug!(event_key = %event.key(), source = source.as_str(), "Duplicate purchase event");
                report.duplicates += 1;
            }
        }

        if report.accepted > 0 {
            self.notify.notify_one();
        }
        Ok(report)
    }

    /// Process every job due at `now`, up to one batch.
    ///
    /// A job whose bookkeeping fails keeps its lease and is picked up again
    /// once the lease lapses.
    pub async fn run_once(&self, now: i64) -> std::result::Result<RunReport, StorageError> {
        let jobs = self
            .queue
            .claim_due(now, self.config.lease(), self.config.batch_size)
            .await?;

        let mut report = RunReport {
            claimed: jobs.len(),
            ..Default::default()
        };

        for job in &jobs {
            match self.process(job, now).await {
                Ok(Outcome::Completed) => report.completed += 1,
                Ok(Outcome::Unmatched) => report.unmatched += 1,
                Ok(Outcome::Retried) => report.retried += 1,
                Ok(Outcome::Dead) => report.dead += 1,
                Err(e) => {
                    error!(event_key = %job.event_key, error = %e, "Failed to record job outcome");
                }
            }
        }

        Ok(report)
    }

    async fn process(
        &self,
        job: &FulfillmentJob,
        now: i64,
    ) -> std::result::Result<Outcome, StorageError> {
        let key = &job.event_key;

        // Delivered on an earlier attempt whose job update was lost.
        if let Some(invitation) = self.invitations.get_by_event(key).await? {
            if invitation.status == InvitationStatus::Completed {
                self.queue.complete(key).await?;
                return Ok(Outcome::Completed);
            }
        }

        let Some(invitation) = self
            .invitations
            .claim_pending(&job.group_id_hash, &job.buyer_address, key)
            .await?
        else {
            warn!(
                event_key = %key,
                tx_hash = %job.tx_hash,
                buyer = %job.buyer_address,
                "No pending invitation matches purchase"
            );
            self.queue
                .mark_unmatched(key, "no pending invitation for buyer")
                .await?;
            return Ok(Outcome::Unmatched);
        };

        let attempt = job.attempts + 1;
        match self.deliver(&invitation, job, now).await {
            Ok(()) => {
                self.invitations
                    .mark_completed(&invitation.group_id, &invitation.email)
                    .await?;
                self.queue.complete(key).await?;
                info!(
                    event_key = %key,
                    group_id = %invitation.group_id,
                    tx_hash = %job.tx_hash,
                    attempt,
                    "Invitation fulfilled"
                );
                Ok(Outcome::Completed)
            }
            Err(err) => self.fail(job, &invitation, attempt, err, now).await,
        }
    }

    /// Issue (or reuse) the invite link and email it.
    async fn deliver(
        &self,
        invitation: &Invitation,
        job: &FulfillmentJob,
        now: i64,
    ) -> std::result::Result<(), DeliveryError> {
        let group = self
            .groups
            .get(&invitation.group_id)
            .await?
            .ok_or_else(|| DeliveryError::GroupMissing(format!("group {} not found", invitation.group_id)))?;
        let chat_id = group.chat_id.ok_or_else(|| {
            DeliveryError::GroupMissing(format!("group {} has no linked chat", group.group_id))
        })?;

        // The link is persisted before emailing so a retry never issues a second one.
        let link = match &invitation.invite_link {
            Some(link) => link.clone(),
            None => {
                let ttl = i64::try_from(self.link_ttl_secs).unwrap_or(i64::MAX);
                let expire_date = (ttl > 0).then(|| (now / 1000).saturating_add(ttl));
                let link = self
                    .telegram
                    .create_invite_link(chat_id, &invitation.email, expire_date)
                    .await?;
                self.invitations
                    .set_invite_link(&invitation.group_id, &invitation.email, &link)
                    .await?;
                link
            }
        };

        self.mailer
            .send_invitation(&invitation.email, &group, &link, job.event_key.as_str())
            .await?;
        Ok(())
    }

    async fn fail(
        &self,
        job: &FulfillmentJob,
        invitation: &Invitation,
        attempt: u32,
        err: DeliveryError,
        now: i64,
    ) -> std::result::Result<Outcome, StorageError> {
        let key = &job.event_key;
        let reason = err.to_string();

        if err.is_transient() {
            if let Some(delay) = self.schedule.delay_for_attempt(attempt) {
                let delay_ms = i64::try_from(delay.as_millis()).unwrap_or(i64::MAX);
                self.queue
                    .reschedule(key, attempt, now.saturating_add(delay_ms), &reason)
                    .await?;
                warn!(
                    event_key = %key,
                    group_id = %invitation.group_id,
                    tx_hash = %job.tx_hash,
                    attempt,
                    ?delay,
                    error = %reason,
                    "Fulfillment attempt failed, retrying"
                );
                return Ok(Outcome::Retried);
            }
        }

        self.queue.dead_letter(key, attempt, &reason).await?;
        self.invitations
            .mark_failed(&invitation.group_id, &invitation.email, &reason)
            .await?;
        error!(
            event_key = %key,
            group_id = %invitation.group_id,
            tx_hash = %job.tx_hash,
            attempt,
            transient = err.is_transient(),
            error = %reason,
            "Fulfillment dead-lettered"
        );
        Ok(Outcome::Dead)
    }

    /// Run passes until `shutdown` flips, waking on the interval or on ingest.
    pub async fn run(self: Arc<Self>, mut shutdown: watch::Receiver<bool>) {
        let mut ticker = tokio::time::interval(self.config.interval());
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        info!(
            interval_ms = self.config.interval_ms,
            batch_size = self.config.batch_size,
            max_attempts = self.config.max_attempts,
            "Fulfillment worker started"
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
                _ = self.notify.notified() => {}
            }

            self.drain().await;
        }

        info!("Fulfillment worker stopped");
    }

    /// Keep claiming while full batches come back.
    async fn drain(&self) {
        loop {
            match self.run_once(now_millis()).await {
                Ok(report) => {
                    if report.claimed > 0 {
                        debug!(?report, "Fulfillment pass");
                    }
                    if report.claimed < self.config.batch_size as usize {
                        break;
                    }
                }
                Err(e) => {
                    error!(error = %e, "Failed to claim fulfillment jobs");
                    break;
                }
            }
        }
    }

    /// Put a dead or unmatched job back in the queue.
    ///
    /// A FAILED invitation bound to the event returns to PENDING so the next
    /// pass can deliver it.
    pub async fn requeue(&self, key: &EventKey) -> Result<FulfillmentJob> {
        let job = self
            .queue
            .requeue(key, now_millis())
            .await
            .map_err(|e| match e {
                StorageError::NotFound(what) => ServiceError::NotFound(what),
                StorageError::Conflict(why) => ServiceError::Conflict(why),
                other => other.into(),
            })?;

        let reset = self.invitations.reset_failed_for_event(key).await?;
        info!(event_key = %key, invitation_reset = reset, "Fulfillment requeued");

        self.notify.notify_one();
        Ok(job)
    }

    /// Ledger entries for operators, newest first.
    pub async fn list(&self, state: Option<JobState>, limit: u32) -> Result<Vec<FulfillmentJob>> {
        Ok(self.queue.list(state, limit.clamp(1, 500)).await?)
    }

    pub async fn job(&self, key: &EventKey) -> Result<FulfillmentJob> {
        self.queue
            .get(key)
            .await?
            .ok_or_else(|| ServiceError::NotFound(format!("job {}", key)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::chain::group_id_hash;
    use crate::model::{address_key, GroupId, InvitationConfig};
    use crate::storage::NewInvitation;
    use crate::test_utils::{linked_group, memory_stores, purchase_event, FailMode, Mocks};
    use alloy::primitives::Address;
    use std::time::Duration;

    const BUYER: Address = Address::repeat_byte(0xB0);

    struct Harness {
        service: Arc<FulfillmentService>,
        stores: Stores,
        mocks: Mocks,
        group: InvitationConfig,
    }

    fn config() -> FulfillmentConfig {
        FulfillmentConfig {
            interval_ms: 20,
            batch_size: 10,
            max_attempts: 3,
            min_delay_ms: 1_000,
            max_delay_ms: 10_000,
            lease_secs: 60,
        }
    }

    async fn harness_with(config: FulfillmentConfig) -> Harness {
        let stores = memory_stores().await.unwrap();
        let mocks = Mocks::new();
        let group = linked_group(-42, Address::repeat_byte(0xAA));
        stores.groups.create(&group).await.unwrap();

        let service = Arc::new(FulfillmentService::new(
            &stores,
            mocks.telegram.clone(),
            mocks.mailer.clone(),
            config,
            3_600,
        ));
        Harness {
            service,
            stores,
            mocks,
            group,
        }
    }

    async fn harness() -> Harness {
        harness_with(config()).await
    }

    impl Harness {
        async fn pending(&self, email: &str) {
            self.pending_in(self.group.group_id, email).await;
        }

        async fn pending_in(&self, group_id: GroupId, email: &str) {
            self.stores
                .invitations
                .upsert_pending(&NewInvitation {
                    group_id,
                    email: email.to_string(),
                    group_id_hash: format!("{:#x}", group_id_hash(&group_id)),
                    buyer_address: address_key(&BUYER),
                    referral_address: None,
                })
                .await
                .unwrap();
        }

        async fn status(&self, email: &str) -> Invitation {
            self.stores
                .invitations
                .get(&self.group.group_id, email)
                .await
                .unwrap()
                .unwrap()
        }

        async fn job_state(&self, event: &PurchaseEvent) -> FulfillmentJob {
            self.stores.queue.get(&event.key()).await.unwrap().unwrap()
        }
    }

    #[tokio::test]
    async fn test_happy_path_delivers_once() {
        let h = harness().await;
        h.pending("buyer@example.com").await;
        let event = purchase_event(&h.group.group_id, BUYER, 0, 10);

        let ingest = h.service.ingest(&[event.clone()], EventSource::Webhook).await.unwrap();
        assert_eq!(ingest, IngestReport { accepted: 1, duplicates: 0 });

        let now = now_millis();
        let report = h.service.run_once(now).await.unwrap();
        assert_eq!(report.claimed, 1);
        assert_eq!(report.completed, 1);

        let invitation = h.status("buyer@example.com").await;
        assert_eq!(invitation.status, InvitationStatus::Completed);
        assert_eq!(invitation.invite_link.as_deref(), Some("https://t.me/+mock1"));
        assert_eq!(invitation.event_key.as_deref(), Some(event.key().as_str()));

        let links = h.mocks.telegram.links().await;
        assert_eq!(links.len(), 1);
        assert_eq!(links[0].chat_id, -42);
        assert_eq!(links[0].name, "buyer@example.com");
        assert_eq!(links[0].expire_date, Some(now / 1000 + 3_600));

        let sent = h.mocks.mailer.sent().await;
        assert_eq!(sent.len(), 1);
        assert_eq!(sent[0].to, "buyer@example.com");
        assert_eq!(sent[0].idempotency_key, event.key().as_str());

        assert_eq!(h.job_state(&event).await.state, JobState::Done);
    }

    #[tokio::test]
    async fn test_duplicate_event_is_processed_once() {
        let h = harness().await;
        h.pending("buyer@example.com").await;
        let event = purchase_event(&h.group.group_id, BUYER, 0, 10);

        h.service.ingest(&[event.clone()], EventSource::Webhook).await.unwrap();
        let again = h
            .service
            .ingest(&[event.clone()], EventSource::Poller)
            .await
            .unwrap();
        assert_eq!(again, IngestReport { accepted: 0, duplicates: 1 });

        h.service.run_once(now_millis()).await.unwrap();
        let second = h.service.run_once(now_millis() + 100_000).await.unwrap();
        assert_eq!(second.claimed, 0);
        assert_eq!(h.mocks.mailer.sent().await.len(), 1);
        assert_eq!(h.job_state(&event).await.source, "webhook");
    }

    #[tokio::test]
    async fn test_unmatched_event() {
        let h = harness().await;
        let event = purchase_event(&h.group.group_id, BUYER, 0, 10);
        h.service.ingest(&[event.clone()], EventSource::Poller).await.unwrap();

        let report = h.service.run_once(now_millis()).await.unwrap();
        assert_eq!(report.unmatched, 1);
        assert_eq!(h.job_state(&event).await.state, JobState::Unmatched);
        assert!(h.mocks.telegram.links().await.is_empty());
    }

    #[tokio::test]
    async fn test_two_purchases_fill_two_invitations_oldest_first() {
        let h = harness().await;
        h.pending("first@example.com").await;
        h.pending("second@example.com").await;

        let events = [
            purchase_event(&h.group.group_id, BUYER, 0, 10),
            purchase_event(&h.group.group_id, BUYER, 1, 10),
        ];
        h.service.ingest(&events, EventSource::Webhook).await.unwrap();

        let report = h.service.run_once(now_millis()).await.unwrap();
        assert_eq!(report.completed, 2);

        let recipients: Vec<String> = h.mocks.mailer.sent().await.into_iter().map(|s| s.to).collect();
        assert_eq!(recipients, vec!["first@example.com", "second@example.com"]);
    }

    #[tokio::test]
    async fn test_transient_failure_is_retried_with_backoff() {
        let h = harness().await;
        h.pending("buyer@example.com").await;
        h.mocks.telegram.fail_links(1, FailMode::Transient).await;
        let event = purchase_event(&h.group.group_id, BUYER, 0, 10);
        h.service.ingest(&[event.clone()], EventSource::Webhook).await.unwrap();

        let now = now_millis();
        let report = h.service.run_once(now).await.unwrap();
        assert_eq!(report.retried, 1);

        let job = h.job_state(&event).await;
        assert_eq!(job.state, JobState::Pending);
        assert_eq!(job.attempts, 1);
        assert_eq!(job.next_attempt_at, now + 1_000);
        assert!(job.last_error.unwrap().contains("429"));
        assert_eq!(h.status("buyer@example.com").await.status, InvitationStatus::Pending);

        // Not due yet.
        assert_eq!(h.service.run_once(now + 500).await.unwrap().claimed, 0);

        let report = h.service.run_once(now + 1_000).await.unwrap();
        assert_eq!(report.completed, 1);
        assert_eq!(h.status("buyer@example.com").await.status, InvitationStatus::Completed);
    }

    #[tokio::test]
    async fn test_email_retry_reuses_persisted_link() {
        let h = harness().await;
        h.pending("buyer@example.com").await;
        h.mocks.mailer.fail_sends(1, FailMode::Transient).await;
        let event = purchase_event(&h.group.group_id, BUYER, 0, 10);
        h.service.ingest(&[event], EventSource::Webhook).await.unwrap();

        let now = now_millis();
        assert_eq!(h.service.run_once(now).await.unwrap().retried, 1);
        assert_eq!(
            h.status("buyer@example.com").await.invite_link.as_deref(),
            Some("https://t.me/+mock1")
        );

        assert_eq!(h.service.run_once(now + 1_000).await.unwrap().completed, 1);
        assert_eq!(h.mocks.telegram.links().await.len(), 1);

        let sent = h.mocks.mailer.sent().await;
        assert_eq!(sent.len(), 1);
        assert_eq!(sent[0].link, "https://t.me/+mock1");
    }

    #[tokio::test]
    async fn test_resubmit_during_retry_keeps_claimed_invitation() {
        let h = harness().await;
        h.pending("buyer@example.com").await;
        h.mocks.mailer.fail_sends(1, FailMode::Transient).await;
        let event = purchase_event(&h.group.group_id, BUYER, 0, 10);
        h.service.ingest(&[event.clone()], EventSource::Webhook).await.unwrap();

        let now = now_millis();
        assert_eq!(h.service.run_once(now).await.unwrap().retried, 1);

        // Same wallet, then a different one: both are refused while the paid
        // attempt is still being delivered.
        for buyer in [BUYER, Address::repeat_byte(0xC1)] {
            let err = h
                .stores
                .invitations
                .upsert_pending(&NewInvitation {
                    group_id: h.group.group_id,
                    email: "buyer@example.com".to_string(),
                    group_id_hash: format!("{:#x}", group_id_hash(&h.group.group_id)),
                    buyer_address: address_key(&buyer),
                    referral_address: None,
                })
                .await
                .unwrap_err();
            assert!(matches!(err, StorageError::Conflict(_)));
        }

        let report = h.service.run_once(now + 1_000).await.unwrap();
        assert_eq!(report.completed, 1);
        assert_eq!(h.mocks.telegram.links().await.len(), 1);
        assert_eq!(h.mocks.mailer.sent().await.len(), 1);

        let invitation = h.status("buyer@example.com").await;
        assert_eq!(invitation.status, InvitationStatus::Completed);
        assert_eq!(invitation.buyer_address, address_key(&BUYER));
        assert_eq!(h.job_state(&event).await.state, JobState::Done);
    }

    #[tokio::test]
    async fn test_requeue_unmatched_after_late_intent() {
        let h = harness().await;
        let event = purchase_event(&h.group.group_id, BUYER, 0, 10);
        h.service.ingest(&[event.clone()], EventSource::Webhook).await.unwrap();
        assert_eq!(h.service.run_once(now_millis()).await.unwrap().unmatched, 1);

        h.pending("buyer@example.com").await;
        let job = h.service.requeue(&event.key()).await.unwrap();
        assert_eq!(job.state, JobState::Pending);

        assert_eq!(h.service.run_once(now_millis()).await.unwrap().completed, 1);
        assert_eq!(h.status("buyer@example.com").await.status, InvitationStatus::Completed);
    }

    #[tokio::test]
    async fn test_permanent_failure_dead_letters_immediately() {
        let h = harness().await;
        h.pending("buyer@example.com").await;
        h.mocks.telegram.fail_links(1, FailMode::Permanent).await;
        let event = purchase_event(&h.group.group_id, BUYER, 0, 10);
        h.service.ingest(&[event.clone()], EventSource::Webhook).await.unwrap();

        let report = h.service.run_once(now_millis()).await.unwrap();
        assert_eq!(report.dead, 1);

        let job = h.job_state(&event).await;
        assert_eq!(job.state, JobState::Dead);
        assert_eq!(job.attempts, 1);

        let invitation = h.status("buyer@example.com").await;
        assert_eq!(invitation.status, InvitationStatus::Failed);
        assert!(invitation.failure_reason.unwrap().contains("chat not found"));
    }

    #[tokio::test]
    async fn test_exhausted_retries_dead_letter() {
        let h = harness_with(FulfillmentConfig {
            max_attempts: 2,
            ..config()
        })
        .await;
        h.pending("buyer@example.com").await;
        h.mocks.mailer.fail_sends(10, FailMode::Transient).await;
        let event = purchase_event(&h.group.group_id, BUYER, 0, 10);
        h.service.ingest(&[event.clone()], EventSource::Webhook).await.unwrap();

        let now = now_millis();
        assert_eq!(h.service.run_once(now).await.unwrap().retried, 1);
        assert_eq!(h.service.run_once(now + 1_000).await.unwrap().dead, 1);

        let job = h.job_state(&event).await;
        assert_eq!(job.state, JobState::Dead);
        assert_eq!(job.attempts, 2);
        assert_eq!(h.status("buyer@example.com").await.status, InvitationStatus::Failed);
    }

    #[tokio::test]
    async fn test_group_without_chat_is_permanent() {
        let h = harness().await;
        let mut orphan = linked_group(0, Address::repeat_byte(0xAB));
        orphan.chat_id = None;
        h.stores.groups.create(&orphan).await.unwrap();
        h.pending_in(orphan.group_id, "buyer@example.com").await;

        let event = purchase_event(&orphan.group_id, BUYER, 0, 10);
        h.service.ingest(&[event.clone()], EventSource::Webhook).await.unwrap();

        let report = h.service.run_once(now_millis()).await.unwrap();
        assert_eq!(report.dead, 1);
        assert!(h
            .job_state(&event)
            .await
            .last_error
            .unwrap()
            .contains("no linked chat"));
    }

    #[tokio::test]
    async fn test_requeue_dead_job_delivers() {
        let h = harness().await;
        h.pending("buyer@example.com").await;
        h.mocks.telegram.fail_links(1, FailMode::Permanent).await;
        let event = purchase_event(&h.group.group_id, BUYER, 0, 10);
        h.service.ingest(&[event.clone()], EventSource::Webhook).await.unwrap();
        h.service.run_once(now_millis()).await.unwrap();

        let job = h.service.requeue(&event.key()).await.unwrap();
        assert_eq!(job.state, JobState::Pending);
        assert_eq!(job.attempts, 0);
        assert_eq!(h.status("buyer@example.com").await.status, InvitationStatus::Pending);

        let report = h.service.run_once(now_millis()).await.unwrap();
        assert_eq!(report.completed, 1);
        assert_eq!(h.status("buyer@example.com").await.status, InvitationStatus::Completed);
    }

    #[tokio::test]
    async fn test_requeue_errors() {
        let h = harness().await;
        let event = purchase_event(&h.group.group_id, BUYER, 0, 10);

        assert!(matches!(
            h.service.requeue(&event.key()).await,
            Err(ServiceError::NotFound(_))
        ));

        h.service.ingest(&[event.clone()], EventSource::Webhook).await.unwrap();
        assert!(matches!(
            h.service.requeue(&event.key()).await,
            Err(ServiceError::Conflict(_))
        ));
    }

    #[tokio::test]
    async fn test_list_by_state() {
        let h = harness().await;
        let events = [
            purchase_event(&h.group.group_id, BUYER, 0, 10),
            purchase_event(&h.group.group_id, BUYER, 1, 10),
        ];
        h.service.ingest(&events, EventSource::Webhook).await.unwrap();
        h.service.run_once(now_millis()).await.unwrap();

        let unmatched = h.service.list(Some(JobState::Unmatched), 50).await.unwrap();
        assert_eq!(unmatched.len(), 2);
        assert!(h.service.list(Some(JobState::Dead), 50).await.unwrap().is_empty());
        assert_eq!(h.service.job(&events[0].key()).await.unwrap().state, JobState::Unmatched);
    }

    #[tokio::test]
    async fn test_worker_wakes_on_ingest_and_stops() {
        let h = harness_with(FulfillmentConfig {
            interval_ms: 60_000,
            ..config()
        })
        .await;
        h.pending("buyer@example.com").await;

        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        let worker = tokio::spawn(h.service.clone().run(shutdown_rx));

        let event = purchase_event(&h.group.group_id, BUYER, 0, 10);
        h.service.ingest(&[event.clone()], EventSource::Webhook).await.unwrap();

        let done = tokio::time::timeout(Duration::from_secs(5), async {
            loop {
                if h.job_state(&event).await.state == JobState::Done {
                    break;
                }
                tokio::time::sleep(Duration::from_millis(10)).await;
            }
        })
        .await;
        assert!(done.is_ok(), "worker did not fulfill the job");

        shutdown_tx.send(true).unwrap();
        tokio::time::timeout(Duration::from_secs(5), worker)
            .await
            .unwrap()
            .unwrap();
    }
}
