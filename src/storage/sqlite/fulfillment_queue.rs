//! SQLite FulfillmentQueue implementation.

use std::time::Duration;

use async_trait::async_trait;
use sea_query::{Expr, OnConflict, Order, Query, SelectStatement, SqliteQueryBuilder};
use sqlx::sqlite::SqliteRow;
use sqlx::{Row, SqlitePool};
use tracing::debug;

use crate::model::{address_key, EventKey, EventSource, PurchaseEvent};
use crate::storage::schema::FulfillmentJobs;
use crate::storage::{
    timestamp, FulfillmentJob, FulfillmentQueue, JobState, Result, StorageError,
};

/// SQLite implementation of FulfillmentQueue.
pub struct SqliteFulfillmentQueue {
    pool: SqlitePool,
}

impl SqliteFulfillmentQueue {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    /// Apply a state change to one job, failing with `NotFound` if absent.
    async fn transition(
        &self,
        key: &EventKey,
        values: Vec<(FulfillmentJobs, sea_query::SimpleExpr)>,
    ) -> Result<()> {
        let query = Query::update()
            .table(FulfillmentJobs::Table)
            .values(values)
            .value(FulfillmentJobs::UpdatedAt, timestamp())
            .and_where(Expr::col(FulfillmentJobs::EventKey).eq(key.as_str()))
            .to_string(SqliteQueryBuilder);

        let result = sqlx::query(&query).execute(&self.pool).await?;
        if result.rows_affected() == 0 {
            return Err(StorageError::NotFound(format!("job {}", key)));
        }
        Ok(())
    }
}

fn select() -> SelectStatement {
    Query::select()
        .columns([
            FulfillmentJobs::EventKey,
            FulfillmentJobs::ChainId,
            FulfillmentJobs::TxHash,
            FulfillmentJobs::LogIndex,
            FulfillmentJobs::BlockNumber,
            FulfillmentJobs::GroupIdHash,
            FulfillmentJobs::BuyerAddress,
            FulfillmentJobs::ReferrerAddress,
            FulfillmentJobs::Price,
            FulfillmentJobs::Source,
            FulfillmentJobs::State,
            FulfillmentJobs::Attempts,
            FulfillmentJobs::NextAttemptAt,
            FulfillmentJobs::LastError,
            FulfillmentJobs::CreatedAt,
            FulfillmentJobs::UpdatedAt,
        ])
        .from(FulfillmentJobs::Table)
        .to_owned()
}

fn by_key(key: &EventKey) -> String {
    select()
        .and_where(Expr::col(FulfillmentJobs::EventKey).eq(key.as_str()))
        .to_string(SqliteQueryBuilder)
}

fn unsigned<T: TryFrom<i64>>(value: i64, column: &str) -> Result<T> {
    T::try_from(value).map_err(|_| StorageError::Corrupt(format!("{} out of range: {}", column, value)))
}

fn signed(value: u64, what: &str) -> Result<i64> {
    i64::try_from(value).map_err(|_| StorageError::Conflict(format!("{} too large: {}", what, value)))
}

fn row_to_job(row: &SqliteRow) -> Result<FulfillmentJob> {
    let state: String = row.get("state");
    let block_number: Option<i64> = row.get("block_number");

    Ok(FulfillmentJob {
        event_key: EventKey::from_raw(row.get::<String, _>("event_key")),
        chain_id: unsigned(row.get("chain_id"), "chain_id")?,
        tx_hash: row.get("tx_hash"),
        log_index: unsigned(row.get("log_index"), "log_index")?,
        block_number: block_number
            .map(|b| unsigned(b, "block_number"))
            .transpose()?,
        group_id_hash: row.get("group_id_hash"),
        buyer_address: row.get("buyer_address"),
        referrer_address: row.get("referrer_address"),
        price: row.get("price"),
        source: row.get("source"),
        state: state.parse()?,
        attempts: unsigned(row.get("attempts"), "attempts")?,
        next_attempt_at: row.get("next_attempt_at"),
        last_error: row.get("last_error"),
        created_at: row.get("created_at"),
        updated_at: row.get("updated_at"),
    })
}

#[async_trait]
impl FulfillmentQueue for SqliteFulfillmentQueue {
    async fn enqueue(&self, event: &PurchaseEvent, source: EventSource, now: i64) -> Result<bool> {
        let key = event.key();
        let block_number = event
            .block_number
            .map(|b| signed(b, "block_number"))
            .transpose()?;
        let created_at = timestamp();

        let query = Query::insert()
            .into_table(FulfillmentJobs::Table)
            .columns([
                FulfillmentJobs::EventKey,
                FulfillmentJobs::ChainId,
                FulfillmentJobs::TxHash,
                FulfillmentJobs::LogIndex,
                FulfillmentJobs::BlockNumber,
                FulfillmentJobs::GroupIdHash,
                FulfillmentJobs::BuyerAddress,
                FulfillmentJobs::ReferrerAddress,
                FulfillmentJobs::Price,
                FulfillmentJobs::Source,
                FulfillmentJobs::State,
                FulfillmentJobs::Attempts,
                FulfillmentJobs::NextAttemptAt,
                FulfillmentJobs::CreatedAt,
                FulfillmentJobs::UpdatedAt,
            ])
            .values_panic([
                key.as_str().into(),
                signed(event.chain_id, "chain_id")?.into(),
                format!("{:#x}", event.tx_hash).into(),
                signed(event.log_index, "log_index")?.into(),
                block_number.into(),
                format!("{:#x}", event.group_id_hash).into(),
                address_key(&event.buyer).into(),
                address_key(&event.referrer).into(),
                event.price.to_string().into(),
                source.as_str().into(),
                JobState::Pending.as_str().into(),
                0i64.into(),
                now.into(),
                created_at.clone().into(),
                created_at.into(),
            ])
            .on_conflict(
                OnConflict::column(FulfillmentJobs::EventKey)
                    .do_nothing()
                    .to_owned(),
            )
            .to_string(SqliteQueryBuilder);

        let result = sqlx::query(&query).execute(&self.pool).await?;
        let inserted = result.rows_affected() > 0;

        debug!(event_key = %key, source = source.as_str(), inserted, "Enqueued purchase event");

        Ok(inserted)
    }

    async fn claim_due(&self, now: i64, lease: Duration, limit: u32) -> Result<Vec<FulfillmentJob>> {
        let lease_ms = i64::try_from(lease.as_millis()).unwrap_or(i64::MAX);
        let lease_until = now.saturating_add(lease_ms);

        let mut tx = self.pool.begin().await?;

        let query = select()
            .and_where(Expr::col(FulfillmentJobs::State).eq(JobState::Pending.as_str()))
            .and_where(Expr::col(FulfillmentJobs::NextAttemptAt).lte(now))
            .order_by(FulfillmentJobs::NextAttemptAt, Order::Asc)
            .limit(u64::from(limit))
            .to_string(SqliteQueryBuilder);

        let rows = sqlx::query(&query).fetch_all(&mut *tx).await?;

        let mut claimed = Vec::with_capacity(rows.len());
        for row in rows {
            let mut job = row_to_job(&row)?;

            // Compare-and-set on the observed due time.
            let update = Query::update()
                .table(FulfillmentJobs::Table)
                .value(FulfillmentJobs::NextAttemptAt, lease_until)
                .and_where(Expr::col(FulfillmentJobs::EventKey).eq(job.event_key.as_str()))
                .and_where(Expr::col(FulfillmentJobs::State).eq(JobState::Pending.as_str()))
                .and_where(Expr::col(FulfillmentJobs::NextAttemptAt).eq(job.next_attempt_at))
                .to_string(SqliteQueryBuilder);

            let result = sqlx::query(&update).execute(&mut *tx).await?;
            if result.rows_affected() == 1 {
                job.next_attempt_at = lease_until;
                claimed.push(job);
            }
        }

        tx.commit().await?;
        Ok(claimed)
    }

    async fn complete(&self, key: &EventKey) -> Result<()> {
        self.transition(
            key,
            vec![(FulfillmentJobs::State, JobState::Done.as_str().into())],
        )
        .await
    }

    async fn mark_unmatched(&self, key: &EventKey, reason: &str) -> Result<()> {
        self.transition(
            key,
            vec![
                (FulfillmentJobs::State, JobState::Unmatched.as_str().into()),
                (FulfillmentJobs::LastError, reason.into()),
            ],
        )
        .await
    }

    async fn reschedule(&self, key: &EventKey, attempts: u32, at: i64, error: &str) -> Result<()> {
        self.transition(
            key,
            vec![
                (FulfillmentJobs::State, JobState::Pending.as_str().into()),
                (FulfillmentJobs::Attempts, i64::from(attempts).into()),
                (FulfillmentJobs::NextAttemptAt, at.into()),
                (FulfillmentJobs::LastError, error.into()),
            ],
        )
        .await
    }

    async fn dead_letter(&self, key: &EventKey, attempts: u32, error: &str) -> Result<()> {
        self.transition(
            key,
            vec![
                (FulfillmentJobs::State, JobState::Dead.as_str().into()),
                (FulfillmentJobs::Attempts, i64::from(attempts).into()),
                (FulfillmentJobs::LastError, error.into()),
            ],
        )
        .await
    }

    async fn requeue(&self, key: &EventKey, now: i64) -> Result<FulfillmentJob> {
        let mut tx = self.pool.begin().await?;

        let row = sqlx::query(&by_key(key)).fetch_optional(&mut *tx).await?;
        let job = match row {
            Some(row) => row_to_job(&row)?,
            None => return Err(StorageError::NotFound(format!("job {}", key))),
        };

        if !matches!(job.state, JobState::Dead | JobState::Unmatched) {
            return Err(StorageError::Conflict(format!(
                "job {} is {}, only dead or unmatched jobs can be requeued",
                key, job.state
            )));
        }

        let update = Query::update()
            .table(FulfillmentJobs::Table)
            .value(FulfillmentJobs::State, JobState::Pending.as_str())
            .value(FulfillmentJobs::Attempts, 0i64)
            .value(FulfillmentJobs::NextAttemptAt, now)
            .value(FulfillmentJobs::LastError, Option::<String>::None)
            .value(FulfillmentJobs::UpdatedAt, timestamp())
            .and_where(Expr::col(FulfillmentJobs::EventKey).eq(key.as_str()))
            .to_string(SqliteQueryBuilder);
        sqlx::query(&update).execute(&mut *tx).await?;

        let row = sqlx::query(&by_key(key)).fetch_one(&mut *tx).await?;
        let job = row_to_job(&row)?;

        tx.commit().await?;
        Ok(job)
    }

    async fn get(&self, key: &EventKey) -> Result<Option<FulfillmentJob>> {
        let row = sqlx::query(&by_key(key)).fetch_optional(&self.pool).await?;
        row.map(|r| row_to_job(&r)).transpose()
    }

    async fn list(&self, state: Option<JobState>, limit: u32) -> Result<Vec<FulfillmentJob>> {
        let mut query = select();
        if let Some(state) = state {
            query.and_where(Expr::col(FulfillmentJobs::State).eq(state.as_str()));
        }
        let sql = query
            .order_by(FulfillmentJobs::UpdatedAt, Order::Desc)
            .order_by(FulfillmentJobs::EventKey, Order::Asc)
            .limit(u64::from(limit))
            .to_string(SqliteQueryBuilder);

        let rows = sqlx::query(&sql).fetch_all(&self.pool).await?;
        rows.iter().map(row_to_job).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::sqlite::test_pool;
    use alloy::primitives::{Address, B256, U256};

    fn event(log_index: u64) -> PurchaseEvent {
        PurchaseEvent {
            chain_id: 43113,
            tx_hash: B256::repeat_byte(0x11),
            log_index,
            block_number: Some(500),
            group_id_hash: B256::repeat_byte(0x22),
            buyer: Address::repeat_byte(0xB0),
            referrer: Address::ZERO,
            price: U256::from(1_000u64),
            owner_fee: U256::from(900u64),
            referrer_fee: U256::ZERO,
            protocol_fee: U256::from(100u64),
        }
    }

    const LEASE: Duration = Duration::from_secs(30);

    #[tokio::test]
    async fn test_enqueue_is_idempotent() {
        let queue = SqliteFulfillmentQueue::new(test_pool().await);

        assert!(queue.enqueue(&event(0), EventSource::Webhook, 1_000).await.unwrap());
        assert!(!queue.enqueue(&event(0), EventSource::Poller, 2_000).await.unwrap());
        assert!(queue.enqueue(&event(1), EventSource::Poller, 2_000).await.unwrap());

        let job = queue.get(&event(0).key()).await.unwrap().unwrap();
        assert_eq!(job.source, "webhook");
        assert_eq!(job.state, JobState::Pending);
        assert_eq!(job.next_attempt_at, 1_000);
        assert_eq!(job.buyer_address, format!("0x{}", "b0".repeat(20)));
        assert_eq!(job.price, "1000");
        assert_eq!(job.block_number, Some(500));
    }

    #[tokio::test]
    async fn test_claim_due_leases_jobs() {
        let queue = SqliteFulfillmentQueue::new(test_pool().await);
        queue.enqueue(&event(0), EventSource::Webhook, 1_000).await.unwrap();
        queue.enqueue(&event(1), EventSource::Webhook, 5_000).await.unwrap();

        let claimed = queue.claim_due(2_000, LEASE, 10).await.unwrap();
        assert_eq!(claimed.len(), 1);
        assert_eq!(claimed[0].event_key, event(0).key());
        assert_eq!(claimed[0].next_attempt_at, 32_000);

        // Leased job is invisible until the lease lapses.
        assert!(queue.claim_due(2_000, LEASE, 10).await.unwrap().is_empty());
        let later = queue.claim_due(40_000, LEASE, 10).await.unwrap();
        assert_eq!(later.len(), 2);
    }

    #[tokio::test]
    async fn test_claim_due_respects_limit() {
        let queue = SqliteFulfillmentQueue::new(test_pool().await);
        for i in 0..5 {
            queue.enqueue(&event(i), EventSource::Poller, 0).await.unwrap();
        }
        assert_eq!(queue.claim_due(10, LEASE, 2).await.unwrap().len(), 2);
        assert_eq!(queue.claim_due(10, LEASE, 10).await.unwrap().len(), 3);
    }

    #[tokio::test]
    async fn test_terminal_states_are_not_claimed() {
        let queue = SqliteFulfillmentQueue::new(test_pool().await);
        queue.enqueue(&event(0), EventSource::Webhook, 0).await.unwrap();
        queue.enqueue(&event(1), EventSource::Webhook, 0).await.unwrap();
        queue.enqueue(&event(2), EventSource::Webhook, 0).await.unwrap();

        queue.complete(&event(0).key()).await.unwrap();
        queue.mark_unmatched(&event(1).key(), "no pending invitation").await.unwrap();
        queue.dead_letter(&event(2).key(), 5, "smtp down").await.unwrap();

        assert!(queue.claim_due(10, LEASE, 10).await.unwrap().is_empty());

        let dead = queue.get(&event(2).key()).await.unwrap().unwrap();
        assert_eq!(dead.state, JobState::Dead);
        assert_eq!(dead.attempts, 5);
        assert_eq!(dead.last_error.as_deref(), Some("smtp down"));
    }

    #[tokio::test]
    async fn test_reschedule_sets_next_attempt() {
        let queue = SqliteFulfillmentQueue::new(test_pool().await);
        queue.enqueue(&event(0), EventSource::Webhook, 0).await.unwrap();
        queue.claim_due(0, LEASE, 10).await.unwrap();

        queue.reschedule(&event(0).key(), 1, 500, "429").await.unwrap();

        assert!(queue.claim_due(499, LEASE, 10).await.unwrap().is_empty());
        let claimed = queue.claim_due(500, LEASE, 10).await.unwrap();
        assert_eq!(claimed.len(), 1);
        assert_eq!(claimed[0].attempts, 1);
        assert_eq!(claimed[0].last_error.as_deref(), Some("429"));
    }

    #[tokio::test]
    async fn test_requeue_dead_job() {
        let queue = SqliteFulfillmentQueue::new(test_pool().await);
        queue.enqueue(&event(0), EventSource::Webhook, 0).await.unwrap();
        queue.dead_letter(&event(0).key(), 5, "boom").await.unwrap();

        let job = queue.requeue(&event(0).key(), 9_000).await.unwrap();
        assert_eq!(job.state, JobState::Pending);
        assert_eq!(job.attempts, 0);
        assert_eq!(job.next_attempt_at, 9_000);
        assert!(job.last_error.is_none());

        assert_eq!(queue.claim_due(9_000, LEASE, 10).await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_requeue_rejects_pending_and_missing() {
        let queue = SqliteFulfillmentQueue::new(test_pool().await);
        queue.enqueue(&event(0), EventSource::Webhook, 0).await.unwrap();

        assert!(matches!(
            queue.requeue(&event(0).key(), 0).await,
            Err(StorageError::Conflict(_))
        ));
        assert!(matches!(
            queue.requeue(&event(7).key(), 0).await,
            Err(StorageError::NotFound(_))
        ));
    }

    #[tokio::test]
    async fn test_list_filters_by_state() {
        let queue = SqliteFulfillmentQueue::new(test_pool().await);
        for i in 0..3 {
            queue.enqueue(&event(i), EventSource::Webhook, 0).await.unwrap();
        }
        queue.dead_letter(&event(1).key(), 3, "x").await.unwrap();

        let dead = queue.list(Some(JobState::Dead), 10).await.unwrap();
        assert_eq!(dead.len(), 1);
        assert_eq!(dead[0].event_key, event(1).key());

        assert_eq!(queue.list(None, 10).await.unwrap().len(), 3);
        assert_eq!(queue.list(None, 2).await.unwrap().len(), 2);
    }

    #[tokio::test]
    async fn test_transition_on_missing_job() {
        let queue = SqliteFulfillmentQueue::new(test_pool().await);
        assert!(matches!(
            queue.complete(&event(0).key()).await,
            Err(StorageError::NotFound(_))
        ));
    }
}
