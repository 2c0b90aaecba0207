//! SQLite PositionStore implementation.

use async_trait::async_trait;
use sea_query::{Expr, OnConflict, Query, SqliteQueryBuilder};
use sqlx::{Row, SqlitePool};

use crate::storage::schema::Positions;
use crate::storage::{timestamp, PositionStore, Result, StorageError};

/// SQLite implementation of PositionStore.
pub struct SqlitePositionStore {
    pool: SqlitePool,
}

impl SqlitePositionStore {
    /// Create a new SQLite position store.
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl PositionStore for SqlitePositionStore {
    async fn get(&self, name: &str) -> Result<Option<u64>> {
        let query = Query::select()
            .column(Positions::Block)
            .from(Positions::Table)
            .and_where(Expr::col(Positions::Name).eq(name))
            .to_string(SqliteQueryBuilder);

        let row = sqlx::query(&query).fetch_optional(&self.pool).await?;

        match row {
            Some(row) => {
                let block: i64 = row.get("block");
                let block = u64::try_from(block)
                    .map_err(|_| StorageError::Corrupt(format!("negative block for {}", name)))?;
                Ok(Some(block))
            }
            None => Ok(None),
        }
    }

    async fn put(&self, name: &str, block: u64) -> Result<()> {
        let block = i64::try_from(block)
            .map_err(|_| StorageError::Conflict(format!("block {} out of range", block)))?;

        let query = Query::insert()
            .into_table(Positions::Table)
            .columns([Positions::Name, Positions::Block, Positions::UpdatedAt])
            .values_panic([name.into(), block.into(), timestamp().into()])
            .on_conflict(
                OnConflict::column(Positions::Name)
                    .update_columns([Positions::Block, Positions::UpdatedAt])
                    .to_owned(),
            )
            .to_string(SqliteQueryBuilder);

        sqlx::query(&query).execute(&self.pool).await?;

        Ok(())
    }
}
