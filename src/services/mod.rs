//! Application services: group management, purchase intents, the
//! fulfillment worker and the log poller.
//!
//! Services own the business rules and talk to storage, the chain and the
//! outbound clients only through their traits.

pub mod fulfillment;
pub mod groups;
pub mod poller;
pub mod purchase;

pub use fulfillment::{FulfillmentService, IngestReport, RunReport};
pub use groups::{ConfigUpdate, GroupMetadata, GroupService, LinkOutcome};
pub use poller::{watermark_key, PollReport, PollerService};
pub use purchase::{PurchaseIntent, PurchaseRequest, PurchaseService};

use crate::chain::ChainError;
use crate::clients::TelegramError;
use crate::model::ValidationError;
use crate::storage::StorageError;

/// Result type for service operations.
pub type Result<T> = std::result::Result<T, ServiceError>;

/// Errors surfaced to callers of the services.
#[derive(Debug, thiserror::Error)]
pub enum ServiceError {
    #[error(transparent)]
    Validation(#[from] ValidationError),

    #[error("Invalid request: {0}")]
    Invalid(String),

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Conflict: {0}")]
    Conflict(String),

    #[error("Forbidden: {0}")]
    Forbidden(String),

    #[error(transparent)]
    Storage(#[from] StorageError),

    #[error(transparent)]
    Chain(#[from] ChainError),

    #[error(transparent)]
    Telegram(#[from] TelegramError),
}

impl ServiceError {
    pub fn is_transient(&self) -> bool {
        match self {
            ServiceError::Storage(e) => e.is_transient(),
            ServiceError::Chain(e) => e.is_transient(),
            ServiceError::Telegram(e) => e.is_transient(),
            _ => false,
        }
    }
}
