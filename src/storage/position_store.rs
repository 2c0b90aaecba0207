//! PositionStore trait definition.

use async_trait::async_trait;

use super::Result;

/// Named block watermarks.
///
/// The poller records the last block it has fully scanned here so a restart
/// resumes where it stopped instead of rescanning from the head.
///
/// # Implementations
///
/// - `SqlitePositionStore`: SQLite storage
#[async_trait]
pub trait PositionStore: Send + Sync {
    /// Last recorded block for `name`, or `None` if never written.
    async fn get(&self, name: &str) -> Result<Option<u64>>;

    /// Record `block` for `name`, replacing any previous value.
    async fn put(&self, name: &str, block: u64) -> Result<()>;
}
