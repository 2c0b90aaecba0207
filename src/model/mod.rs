//! Domain types shared by storage, services and HTTP handlers.
//!
//! - [`InvitationConfig`]: one row per linked Telegram group
//! - [`Invitation`]: one purchase attempt for `(group_id, email)`
//! - [`PurchaseEvent`]: a decoded `InvitationBought` log

mod event;
mod group;
mod invitation;

pub use event::{EventKey, EventSource, PurchaseEvent};
pub use group::{GroupId, InvitationConfig};
pub(crate) use group::validate_price;
pub use invitation::{normalize_email, Invitation, InvitationStatus};

use alloy::primitives::Address;

/// Canonical textual form for addresses: lowercase, `0x`-prefixed.
pub fn address_key(address: &Address) -> String {
    format!("{:#x}", address)
}

/// Errors raised while validating user-supplied domain values.
#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum ValidationError {
    #[error("Invalid email address: {0}")]
    Email(String),

    #[error("Invalid address: {0}")]
    Address(String),

    #[error("Invalid group id: {0}")]
    GroupId(String),

    #[error("Invalid price: {0}")]
    Price(String),

    #[error("Commission must be between 0 and 100, got {0}")]
    Commission(u8),

    #[error("Unknown invitation status: {0}")]
    Status(String),
}

/// Parse a user-supplied hex address.
pub fn parse_address(raw: &str) -> Result<Address, ValidationError> {
    raw.trim()
        .parse::<Address>()
        .map_err(|_| ValidationError::Address(raw.to_string()))
}
