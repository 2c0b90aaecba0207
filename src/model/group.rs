//! Telegram group invitation configuration.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::ValidationError;

/// Application-generated identifier of a linked Telegram group.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct GroupId(Uuid);

impl GroupId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }

    pub fn as_uuid(&self) -> &Uuid {
        &self.0
    }
}

impl Default for GroupId {
    fn default() -> Self {
        Self::new()
    }
}

impl From<Uuid> for GroupId {
    fn from(value: Uuid) -> Self {
        Self(value)
    }
}

impl fmt::Display for GroupId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        // Hyphenated lowercase; this exact string is hashed on-chain.
        write!(f, "{}", self.0.hyphenated())
    }
}

impl FromStr for GroupId {
    type Err = ValidationError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Uuid::parse_str(s.trim())
            .map(Self)
            .map_err(|_| ValidationError::GroupId(s.to_string()))
    }
}

/// Stored configuration of a group that sells invitations.
///
/// `price` mirrors the on-chain price in wei; the contract remains the
/// source of truth when quoting a purchase.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct InvitationConfig {
    pub group_id: GroupId,
    /// Telegram chat the bot was linked in. `None` only for rows created
    /// outside the `/linkgroup` flow.
    pub chat_id: Option<i64>,
    /// Owner wallet, lowercase hex.
    pub owner_address: String,
    /// Price in wei as a decimal string.
    pub price: String,
    /// Referral commission percentage (0-100).
    pub referral_commission: Option<u8>,
    pub description: Option<String>,
    pub created_at: String,
    pub updated_at: String,
}

/// Validate a wei amount given as a decimal string.
pub(crate) fn validate_price(price: &str) -> Result<(), ValidationError> {
    if price.is_empty() || price.len() > 78 || !price.bytes().all(|b| b.is_ascii_digit()) {
        return Err(ValidationError::Price(price.to_string()));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_group_id_roundtrip_display() {
        let raw = "3f2504e0-4f89-41d3-9a0c-0305e82c3301";
        let id: GroupId = raw.parse().unwrap();
        assert_eq!(id.to_string(), raw);
    }

    #[test]
    fn test_group_id_display_is_lowercase() {
        let id: GroupId = "3F2504E0-4F89-41D3-9A0C-0305E82C3301".parse().unwrap();
        assert_eq!(id.to_string(), "3f2504e0-4f89-41d3-9a0c-0305e82c3301");
    }

    #[test]
    fn test_group_id_rejects_garbage() {
        assert!("group-1".parse::<GroupId>().is_err());
    }

    #[test]
    fn test_validate_price() {
        assert!(validate_price("0").is_ok());
        assert!(validate_price("1000000000000000000").is_ok());
        assert!(validate_price("").is_err());
        assert!(validate_price("1.5").is_err());
        assert!(validate_price("-1").is_err());
    }
}
