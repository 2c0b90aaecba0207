//! Purchase attempts.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use super::{GroupId, ValidationError};

/// Lifecycle of a purchase attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum InvitationStatus {
    Pending,
    Completed,
    Failed,
}

impl InvitationStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            InvitationStatus::Pending => "PENDING",
            InvitationStatus::Completed => "COMPLETED",
            InvitationStatus::Failed => "FAILED",
        }
    }
}

impl fmt::Display for InvitationStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for InvitationStatus {
    type Err = ValidationError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "PENDING" => Ok(InvitationStatus::Pending),
            "COMPLETED" => Ok(InvitationStatus::Completed),
            "FAILED" => Ok(InvitationStatus::Failed),
            other => Err(ValidationError::Status(other.to_string())),
        }
    }
}

/// One purchase attempt, keyed by `(group_id, email)`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Invitation {
    pub group_id: GroupId,
    pub email: String,
    /// keccak256 of the group id, `0x`-prefixed hex. Matches the indexed
    /// topic of `InvitationBought`.
    pub group_id_hash: String,
    /// Buyer wallet, lowercase hex.
    pub buyer_address: String,
    pub referral_address: Option<String>,
    pub status: InvitationStatus,
    pub invite_link: Option<String>,
    pub failure_reason: Option<String>,
    /// Event key of the purchase that settled this invitation.
    pub event_key: Option<String>,
    pub created_at: String,
    pub updated_at: String,
}

/// Trim and lowercase an email address, rejecting obviously malformed input.
pub fn normalize_email(raw: &str) -> Result<String, ValidationError> {
    let email = raw.trim().to_lowercase();
    let mut parts = email.split('@');
    let (local, domain) = match (parts.next(), parts.next(), parts.next()) {
        (Some(local), Some(domain), None) => (local, domain),
        _ => return Err(ValidationError::Email(raw.to_string())),
    };

    if local.is_empty()
        || domain.is_empty()
        || !domain.contains('.')
        || domain.starts_with('.')
        || domain.ends_with('.')
        || email.chars().any(char::is_whitespace)
    {
        return Err(ValidationError::Email(raw.to_string()));
    }

    Ok(email)
}
