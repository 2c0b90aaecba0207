//! Persistence for groups, invitations, the fulfillment ledger and
//! poller watermarks.
//!
//! Every store is a trait with a SQLite implementation. Statements are built
//! with sea-query against the identifiers in [`schema`].

use std::sync::Arc;

use tracing::{error, info};

use crate::config::StorageConfig;

mod fulfillment_queue;
mod group_store;
mod invitation_store;
mod position_store;
pub mod schema;
pub mod sqlite;

pub use fulfillment_queue::{FulfillmentJob, FulfillmentQueue, JobState};
pub use group_store::{GroupStore, GroupUpdate};
pub use invitation_store::{InvitationStore, NewInvitation};
pub use position_store::PositionStore;
pub use sqlite::{
    SqliteFulfillmentQueue, SqliteGroupStore, SqliteInvitationStore, SqlitePositionStore,
};

/// Result type for storage operations.
pub type Result<T> = std::result::Result<T, StorageError>;

/// Errors that can occur during storage operations.
#[derive(Debug, thiserror::Error)]
pub enum StorageError {
    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Invitation for {email} in group {group_id} is already completed")]
    AlreadyCompleted { group_id: String, email: String },

    #[error("Conflict: {0}")]
    Conflict(String),

    #[error("Corrupt row: {0}")]
    Corrupt(String),

    #[error("Unknown storage type: {0}")]
    UnknownType(String),
}

impl StorageError {
    /// Database errors (locked, pool timeout, I/O) may clear on retry.
    pub fn is_transient(&self) -> bool {
        matches!(self, StorageError::Database(_))
    }
}

/// All stores, sharing one pool.
#[derive(Clone)]
pub struct Stores {
    pub groups: Arc<dyn GroupStore>,
    pub invitations: Arc<dyn InvitationStore>,
    pub queue: Arc<dyn FulfillmentQueue>,
    pub positions: Arc<dyn PositionStore>,
}

/// Initialize storage based on configuration.
pub async fn init_storage(config: &StorageConfig) -> Result<Stores> {
    info!("Storage: {} at {}", config.storage_type, config.path);

    match config.storage_type.as_str() {
        "sqlite" => {
            let pool = sqlite::connect(&config.path).await?;
            sqlite::init_schema(&pool).await?;

            Ok(Stores {
                groups: Arc::new(SqliteGroupStore::new(pool.clone())),
                invitations: Arc::new(SqliteInvitationStore::new(pool.clone())),
                queue: Arc::new(SqliteFulfillmentQueue::new(pool.clone())),
                positions: Arc::new(SqlitePositionStore::new(pool)),
            })
        }
        other => {
            error!("Unknown storage type: {}", other);
            Err(StorageError::UnknownType(other.to_string()))
        }
    }
}

/// Current time as an RFC 3339 string, the format of every `*_at` text column.
pub(crate) fn timestamp() -> String {
    chrono::Utc::now().to_rfc3339_opts(chrono::SecondsFormat::Micros, true)
}
