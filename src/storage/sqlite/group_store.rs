//! SQLite GroupStore implementation.

use async_trait::async_trait;
use sea_query::{Expr, Query, SelectStatement, SqliteQueryBuilder};
use sqlx::sqlite::SqliteRow;
use sqlx::{Row, SqlitePool};

use crate::model::{GroupId, InvitationConfig};
use crate::storage::schema::Groups;
use crate::storage::{timestamp, GroupStore, GroupUpdate, Result, StorageError};

/// SQLite implementation of GroupStore.
pub struct SqliteGroupStore {
    pool: SqlitePool,
}

impl SqliteGroupStore {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    fn select() -> SelectStatement {
        Query::select()
            .columns([
                Groups::GroupId,
                Groups::ChatId,
                Groups::OwnerAddress,
                Groups::Price,
                Groups::ReferralCommission,
                Groups::Description,
                Groups::CreatedAt,
                Groups::UpdatedAt,
            ])
            .from(Groups::Table)
            .to_owned()
    }

    async fn fetch_one(&self, query: SelectStatement) -> Result<Option<InvitationConfig>> {
        let sql = query.to_string(SqliteQueryBuilder);
        let row = sqlx::query(&sql).fetch_optional(&self.pool).await?;
        row.map(|r| row_to_group(&r)).transpose()
    }
}

fn row_to_group(row: &SqliteRow) -> Result<InvitationConfig> {
    let group_id: String = row.get("group_id");
    let group_id = group_id
        .parse::<GroupId>()
        .map_err(|e| StorageError::Corrupt(e.to_string()))?;

    let commission: Option<i64> = row.get("referral_commission");
    let referral_commission = commission
        .map(u8::try_from)
        .transpose()
        .map_err(|_| StorageError::Corrupt(format!("commission out of range in {}", group_id)))?;

    Ok(InvitationConfig {
        group_id,
        chat_id: row.get("chat_id"),
        owner_address: row.get("owner_address"),
        price: row.get("price"),
        referral_commission,
        description: row.get("description"),
        created_at: row.get("created_at"),
        updated_at: row.get("updated_at"),
    })
}

#[async_trait]
impl GroupStore for SqliteGroupStore {
    async fn create(&self, group: &InvitationConfig) -> Result<()> {
        let query = Query::insert()
            .into_table(Groups::Table)
            .columns([
                Groups::GroupId,
                Groups::ChatId,
                Groups::OwnerAddress,
                Groups::Price,
                Groups::ReferralCommission,
                Groups::Description,
                Groups::CreatedAt,
                Groups::UpdatedAt,
            ])
            .values_panic([
                group.group_id.to_string().into(),
                group.chat_id.into(),
                group.owner_address.clone().into(),
                group.price.clone().into(),
                group.referral_commission.map(i64::from).into(),
                group.description.clone().into(),
                group.created_at.clone().into(),
                group.updated_at.clone().into(),
            ])
            .to_string(SqliteQueryBuilder);

        match sqlx::query(&query).execute(&self.pool).await {
            Ok(_) => Ok(()),
            Err(sqlx::Error::Database(db)) if db.is_unique_violation() => {
                Err(StorageError::Conflict(format!(
                    "chat {:?} or group {} already linked",
                    group.chat_id, group.group_id
                )))
            }
            Err(e) => Err(e.into()),
        }
    }

    async fn get(&self, group_id: &GroupId) -> Result<Option<InvitationConfig>> {
        let query = Self::select()
            .and_where(Expr::col(Groups::GroupId).eq(group_id.to_string()))
            .to_owned();
        self.fetch_one(query).await
    }

    async fn get_by_chat(&self, chat_id: i64) -> Result<Option<InvitationConfig>> {
        let query = Self::select()
            .and_where(Expr::col(Groups::ChatId).eq(chat_id))
            .to_owned();
        self.fetch_one(query).await
    }

    async fn update_terms(
        &self,
        group_id: &GroupId,
        update: &GroupUpdate,
    ) -> Result<InvitationConfig> {
        let nonce = i64::try_from(update.nonce)
            .map_err(|_| StorageError::Conflict(format!("nonce {} out of range", update.nonce)))?;

        let query = Query::update()
            .table(Groups::Table)
            .value(Groups::Price, update.price.clone())
            .value(
                Groups::ReferralCommission,
                update.referral_commission.map(i64::from),
            )
            .value(Groups::Description, update.description.clone())
            .value(Groups::LastNonce, nonce)
            .value(Groups::UpdatedAt, timestamp())
            .and_where(Expr::col(Groups::GroupId).eq(group_id.to_string()))
            .and_where(
                Expr::col(Groups::LastNonce)
                    .is_null()
                    .or(Expr::col(Groups::LastNonce).lt(nonce)),
            )
            .to_string(SqliteQueryBuilder);

        let result = sqlx::query(&query).execute(&self.pool).await?;
        if result.rows_affected() == 0 {
            return match self.get(group_id).await? {
                Some(_) => Err(StorageError::Conflict(format!(
                    "nonce {} already used for group {}",
                    update.nonce, group_id
                ))),
                None => Err(StorageError::NotFound(format!("group {}", group_id))),
            };
        }

        self.get(group_id)
            .await?
            .ok_or_else(|| StorageError::NotFound(format!("group {}", group_id)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::sqlite::test_pool;

    fn group(chat_id: i64) -> InvitationConfig {
        let now = timestamp();
        InvitationConfig {
            group_id: GroupId::new(),
            chat_id: Some(chat_id),
            owner_address: "0x00000000000000000000000000000000000000aa".to_string(),
            price: "0".to_string(),
            referral_commission: None,
            description: None,
            created_at: now.clone(),
            updated_at: now,
        }
    }

    #[tokio::test]
    async fn test_create_and_get() {
        let store = SqliteGroupStore::new(test_pool().await);
        let g = group(-100123);
        store.create(&g).await.unwrap();

        assert_eq!(store.get(&g.group_id).await.unwrap(), Some(g.clone()));
        assert_eq!(store.get_by_chat(-100123).await.unwrap(), Some(g));
    }

    #[tokio::test]
    async fn test_get_missing() {
        let store = SqliteGroupStore::new(test_pool().await);
        assert!(store.get(&GroupId::new()).await.unwrap().is_none());
        assert!(store.get_by_chat(42).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_duplicate_chat_is_conflict() {
        let store = SqliteGroupStore::new(test_pool().await);
        store.create(&group(-1)).await.unwrap();

        let err = store.create(&group(-1)).await.unwrap_err();
        assert!(matches!(err, StorageError::Conflict(_)));
    }

    #[tokio::test]
    async fn test_update_terms() {
        let store = SqliteGroupStore::new(test_pool().await);
        let g = group(-7);
        store.create(&g).await.unwrap();

        let update = GroupUpdate {
            price: "1000000000000000000".to_string(),
            referral_commission: Some(10),
            description: Some("alpha calls".to_string()),
            nonce: 10,
        };
        let updated = store.update_terms(&g.group_id, &update).await.unwrap();

        assert_eq!(updated.price, "1000000000000000000");
        assert_eq!(updated.referral_commission, Some(10));
        assert_eq!(updated.description.as_deref(), Some("alpha calls"));
        assert_eq!(updated.chat_id, Some(-7));
        assert_eq!(updated.created_at, g.created_at);
    }

    #[tokio::test]
    async fn test_update_missing_group() {
        let store = SqliteGroupStore::new(test_pool().await);
        let update = GroupUpdate {
            price: "1".to_string(),
            referral_commission: None,
            description: None,
            nonce: 1,
        };
        let err = store.update_terms(&GroupId::new(), &update).await.unwrap_err();
        assert!(matches!(err, StorageError::NotFound(_)));
    }

    #[tokio::test]
    async fn test_update_rejects_stale_nonce() {
        let store = SqliteGroupStore::new(test_pool().await);
        let g = group(-8);
        store.create(&g).await.unwrap();

        let first = GroupUpdate {
            price: "100".to_string(),
            referral_commission: None,
            description: None,
            nonce: 50,
        };
        store.update_terms(&g.group_id, &first).await.unwrap();

        let replay = store.update_terms(&g.group_id, &first).await.unwrap_err();
        assert!(matches!(replay, StorageError::Conflict(_)));

        let older = GroupUpdate {
            price: "1".to_string(),
            nonce: 49,
            ..first.clone()
        };
        assert!(matches!(
            store.update_terms(&g.group_id, &older).await,
            Err(StorageError::Conflict(_))
        ));
        assert_eq!(store.get(&g.group_id).await.unwrap().unwrap().price, "100");

        let newer = GroupUpdate {
            price: "200".to_string(),
            nonce: 51,
            ..first
        };
        assert_eq!(store.update_terms(&g.group_id, &newer).await.unwrap().price, "200");
    }
}
