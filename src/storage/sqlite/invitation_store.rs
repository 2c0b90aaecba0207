//! SQLite InvitationStore implementation.

use async_trait::async_trait;
use sea_query::{Expr, Order, Query, SelectStatement, SqliteQueryBuilder};
use sqlx::sqlite::SqliteRow;
use sqlx::{Row, SqlitePool};

use crate::model::{EventKey, GroupId, Invitation, InvitationStatus, ValidationError};
use crate::storage::schema::Invitations;
use crate::storage::{timestamp, InvitationStore, NewInvitation, Result, StorageError};

/// SQLite implementation of InvitationStore.
pub struct SqliteInvitationStore {
    pool: SqlitePool,
}

impl SqliteInvitationStore {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }
}

fn select() -> SelectStatement {
    Query::select()
        .columns([
            Invitations::GroupId,
            Invitations::Email,
            Invitations::GroupIdHash,
            Invitations::BuyerAddress,
            Invitations::ReferralAddress,
            Invitations::Status,
            Invitations::InviteLink,
            Invitations::FailureReason,
            Invitations::EventKey,
            Invitations::CreatedAt,
            Invitations::UpdatedAt,
        ])
        .from(Invitations::Table)
        .to_owned()
}

fn by_key(group_id: &GroupId, email: &str) -> String {
    select()
        .and_where(Expr::col(Invitations::GroupId).eq(group_id.to_string()))
        .and_where(Expr::col(Invitations::Email).eq(email))
        .to_string(SqliteQueryBuilder)
}

/// Oldest PENDING row for a buyer, either bound to `event_key` or unbound.
fn oldest_pending(group_id_hash: &str, buyer: &str, event_key: Option<&EventKey>) -> String {
    let mut query = select();
    query
        .and_where(Expr::col(Invitations::GroupIdHash).eq(group_id_hash))
        .and_where(Expr::col(Invitations::BuyerAddress).eq(buyer))
        .and_where(Expr::col(Invitations::Status).eq(InvitationStatus::Pending.as_str()));

    match event_key {
        Some(key) => query.and_where(Expr::col(Invitations::EventKey).eq(key.as_str())),
        None => query.and_where(Expr::col(Invitations::EventKey).is_null()),
    };

    query
        .order_by(Invitations::CreatedAt, Order::Asc)
        .order_by(Invitations::Email, Order::Asc)
        .limit(1)
        .to_string(SqliteQueryBuilder)
}

fn row_to_invitation(row: &SqliteRow) -> Result<Invitation> {
    let group_id: String = row.get("group_id");
    let status: String = row.get("status");

    Ok(Invitation {
        group_id: group_id.parse::<GroupId>().map_err(corrupt)?,
        email: row.get("email"),
        group_id_hash: row.get("group_id_hash"),
        buyer_address: row.get("buyer_address"),
        referral_address: row.get("referral_address"),
        status: status.parse::<InvitationStatus>().map_err(corrupt)?,
        invite_link: row.get("invite_link"),
        failure_reason: row.get("failure_reason"),
        event_key: row.get("event_key"),
        created_at: row.get("created_at"),
        updated_at: row.get("updated_at"),
    })
}

fn corrupt(e: ValidationError) -> StorageError {
    StorageError::Corrupt(e.to_string())
}

fn not_found(group_id: &GroupId, email: &str) -> StorageError {
    StorageError::NotFound(format!("invitation {} / {}", group_id, email))
}

#[async_trait]
impl InvitationStore for SqliteInvitationStore {
    async fn upsert_pending(&self, new: &NewInvitation) -> Result<Invitation> {
        let mut tx = self.pool.begin().await?;

        let existing = sqlx::query(&by_key(&new.group_id, &new.email))
            .fetch_optional(&mut *tx)
            .await?
            .map(|r| row_to_invitation(&r))
            .transpose()?;

        let now = timestamp();
        let statement = match existing {
            Some(inv) if inv.status == InvitationStatus::Completed => {
                return Err(StorageError::AlreadyCompleted {
                    group_id: new.group_id.to_string(),
                    email: new.email.clone(),
                });
            }
            Some(inv) if inv.status == InvitationStatus::Pending && inv.event_key.is_some() => {
                return Err(StorageError::Conflict(format!(
                    "payment for invitation {} / {} is already being delivered",
                    new.group_id, new.email
                )));
            }
            Some(_) => Query::update()
                .table(Invitations::Table)
                .value(Invitations::GroupIdHash, new.group_id_hash.clone())
                .value(Invitations::BuyerAddress, new.buyer_address.clone())
                .value(Invitations::ReferralAddress, new.referral_address.clone())
                .value(Invitations::Status, InvitationStatus::Pending.as_str())
                .value(Invitations::InviteLink, Option::<String>::None)
                .value(Invitations::FailureReason, Option::<String>::None)
                .value(Invitations::EventKey, Option::<String>::None)
                .value(Invitations::UpdatedAt, now)
                .and_where(Expr::col(Invitations::GroupId).eq(new.group_id.to_string()))
                .and_where(Expr::col(Invitations::Email).eq(new.email.as_str()))
                .to_string(SqliteQueryBuilder),
            None => Query::insert()
                .into_table(Invitations::Table)
                .columns([
                    Invitations::GroupId,
                    Invitations::Email,
                    Invitations::GroupIdHash,
                    Invitations::BuyerAddress,
                    Invitations::ReferralAddress,
                    Invitations::Status,
                    Invitations::CreatedAt,
                    Invitations::UpdatedAt,
                ])
                .values_panic([
                    new.group_id.to_string().into(),
                    new.email.clone().into(),
                    new.group_id_hash.clone().into(),
                    new.buyer_address.clone().into(),
                    new.referral_address.clone().into(),
                    InvitationStatus::Pending.as_str().into(),
                    now.clone().into(),
                    now.into(),
                ])
                .to_string(SqliteQueryBuilder),
        };
        sqlx::query(&statement).execute(&mut *tx).await?;

        let row = sqlx::query(&by_key(&new.group_id, &new.email))
            .fetch_one(&mut *tx)
            .await?;
        let invitation = row_to_invitation(&row)?;

        tx.commit().await?;
        Ok(invitation)
    }

    async fn get(&self, group_id: &GroupId, email: &str) -> Result<Option<Invitation>> {
        let row = sqlx::query(&by_key(group_id, email))
            .fetch_optional(&self.pool)
            .await?;
        row.map(|r| row_to_invitation(&r)).transpose()
    }

    async fn get_by_event(&self, event_key: &EventKey) -> Result<Option<Invitation>> {
        let query = select()
            .and_where(Expr::col(Invitations::EventKey).eq(event_key.as_str()))
            .limit(1)
            .to_string(SqliteQueryBuilder);
        let row = sqlx::query(&query).fetch_optional(&self.pool).await?;
        row.map(|r| row_to_invitation(&r)).transpose()
    }

    async fn find_pending(&self, group_id_hash: &str, buyer: &str) -> Result<Option<Invitation>> {
        let row = sqlx::query(&oldest_pending(group_id_hash, buyer, None))
            .fetch_optional(&self.pool)
            .await?;
        row.map(|r| row_to_invitation(&r)).transpose()
    }

    async fn claim_pending(
        &self,
        group_id_hash: &str,
        buyer: &str,
        event_key: &EventKey,
    ) -> Result<Option<Invitation>> {
        let mut tx = self.pool.begin().await?;

        let bound = sqlx::query(&oldest_pending(group_id_hash, buyer, Some(event_key)))
            .fetch_optional(&mut *tx)
            .await?;
        if let Some(row) = bound {
            let invitation = row_to_invitation(&row)?;
            tx.commit().await?;
            return Ok(Some(invitation));
        }

        let unbound = sqlx::query(&oldest_pending(group_id_hash, buyer, None))
            .fetch_optional(&mut *tx)
            .await?;
        let Some(row) = unbound else {
            tx.commit().await?;
            return Ok(None);
        };
        let mut invitation = row_to_invitation(&row)?;
        let now = timestamp();

        let update = Query::update()
            .table(Invitations::Table)
            .value(Invitations::EventKey, event_key.as_str())
            .value(Invitations::UpdatedAt, now.clone())
            .and_where(Expr::col(Invitations::GroupId).eq(invitation.group_id.to_string()))
            .and_where(Expr::col(Invitations::Email).eq(invitation.email.as_str()))
            .and_where(Expr::col(Invitations::EventKey).is_null())
            .to_string(SqliteQueryBuilder);

        let result = sqlx::query(&update).execute(&mut *tx).await?;
        tx.commit().await?;

        if result.rows_affected() == 0 {
            return Ok(None);
        }

        invitation.event_key = Some(event_key.to_string());
        invitation.updated_at = now;
        Ok(Some(invitation))
    }

    async fn set_invite_link(&self, group_id: &GroupId, email: &str, link: &str) -> Result<()> {
        let query = Query::update()
            .table(Invitations::Table)
            .value(Invitations::InviteLink, link)
            .value(Invitations::UpdatedAt, timestamp())
            .and_where(Expr::col(Invitations::GroupId).eq(group_id.to_string()))
            .and_where(Expr::col(Invitations::Email).eq(email))
            .to_string(SqliteQueryBuilder);

        let result = sqlx::query(&query).execute(&self.pool).await?;
        if result.rows_affected() == 0 {
            return Err(not_found(group_id, email));
        }
        Ok(())
    }

    async fn mark_completed(&self, group_id: &GroupId, email: &str) -> Result<()> {
        let query = Query::update()
            .table(Invitations::Table)
            .value(Invitations::Status, InvitationStatus::Completed.as_str())
            .value(Invitations::FailureReason, Option::<String>::None)
            .value(Invitations::UpdatedAt, timestamp())
            .and_where(Expr::col(Invitations::GroupId).eq(group_id.to_string()))
            .and_where(Expr::col(Invitations::Email).eq(email))
            .to_string(SqliteQueryBuilder);

        let result = sqlx::query(&query).execute(&self.pool).await?;
        if result.rows_affected() == 0 {
            return Err(not_found(group_id, email));
        }
        Ok(())
    }

    async fn mark_failed(&self, group_id: &GroupId, email: &str, reason: &str) -> Result<()> {
        // COMPLETED is terminal.
        let query = Query::update()
            .table(Invitations::Table)
            .value(Invitations::Status, InvitationStatus::Failed.as_str())
            .value(Invitations::FailureReason, reason)
            .value(Invitations::UpdatedAt, timestamp())
            .and_where(Expr::col(Invitations::GroupId).eq(group_id.to_string()))
            .and_where(Expr::col(Invitations::Email).eq(email))
            .and_where(Expr::col(Invitations::Status).ne(InvitationStatus::Completed.as_str()))
            .to_string(SqliteQueryBuilder);

        let result = sqlx::query(&query).execute(&self.pool).await?;
        if result.rows_affected() == 0 {
            return Err(not_found(group_id, email));
        }
        Ok(())
    }

    async fn reset_failed_for_event(&self, event_key: &EventKey) -> Result<bool> {
        let query = Query::update()
            .table(Invitations::Table)
            .value(Invitations::Status, InvitationStatus::Pending.as_str())
            .value(Invitations::FailureReason, Option::<String>::None)
            .value(Invitations::UpdatedAt, timestamp())
            .and_where(Expr::col(Invitations::EventKey).eq(event_key.as_str()))
            .and_where(Expr::col(Invitations::Status).eq(InvitationStatus::Failed.as_str()))
            .to_string(SqliteQueryBuilder);

        let result = sqlx::query(&query).execute(&self.pool).await?;
        Ok(result.rows_affected() > 0)
    }
}
