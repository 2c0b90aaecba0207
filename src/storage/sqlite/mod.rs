//! SQLite implementations of storage interfaces.

use std::time::Duration;

use sea_query::SqliteQueryBuilder;
use sqlx::sqlite::{SqliteConnectOptions, SqliteJournalMode, SqlitePoolOptions};
use sqlx::SqlitePool;

use super::schema;
use super::Result;

mod fulfillment_queue;
mod group_store;
mod invitation_store;
mod position_store;

pub use fulfillment_queue::SqliteFulfillmentQueue;
pub use group_store::SqliteGroupStore;
pub use invitation_store::SqliteInvitationStore;
pub use position_store::SqlitePositionStore;

/// Open a pool on `path`, creating the file and its directory if needed.
///
/// `":memory:"` opens a private in-memory database on a single connection
/// that is never recycled.
pub async fn connect(path: &str) -> Result<SqlitePool> {
    if path == ":memory:" {
        let opts = SqliteConnectOptions::new()
            .filename(":memory:")
            .create_if_missing(true);
        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .idle_timeout(None)
            .max_lifetime(None)
            .connect_with(opts)
            .await?;
        return Ok(pool);
    }

    if let Some(parent) = std::path::Path::new(path).parent() {
        if !parent.as_os_str().is_empty() {
            std::fs::create_dir_all(parent).map_err(sqlx::Error::Io)?;
        }
    }

    let opts = SqliteConnectOptions::new()
        .filename(path)
        .journal_mode(SqliteJournalMode::Wal)
        .busy_timeout(Duration::from_secs(30))
        .create_if_missing(true);

    let pool = SqlitePoolOptions::new()
        .max_connections(5)
        .connect_with(opts)
        .await?;

    Ok(pool)
}

/// Create all tables and indexes if they do not exist.
pub async fn init_schema(pool: &SqlitePool) -> Result<()> {
    let tables = [
        schema::create_groups_table(),
        schema::create_invitations_table(),
        schema::create_fulfillment_jobs_table(),
        schema::create_positions_table(),
    ];
    for table in tables {
        sqlx::query(&table.to_string(SqliteQueryBuilder))
            .execute(pool)
            .await?;
    }

    let indexes = [
        schema::create_invitations_match_index(),
        schema::create_fulfillment_jobs_due_index(),
    ];
    for index in indexes {
        sqlx::query(&index.to_string(SqliteQueryBuilder))
            .execute(pool)
            .await?;
    }

    Ok(())
}

#[cfg(test)]
pub(crate) async fn test_pool() -> SqlitePool {
    let pool = connect(":memory:")
        .await
        .expect("failed to create in-memory pool");
    init_schema(&pool).await.expect("failed to init schema");
    pool
}
