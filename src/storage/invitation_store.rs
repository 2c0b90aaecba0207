//! InvitationStore trait definition.

use async_trait::async_trait;

use super::Result;
use crate::model::{EventKey, GroupId, Invitation};

/// Fields of a fresh purchase attempt.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NewInvitation {
    pub group_id: GroupId,
    /// Normalized email.
    pub email: String,
    pub group_id_hash: String,
    pub buyer_address: String,
    pub referral_address: Option<String>,
}

/// Interface for purchase attempts keyed by `(group_id, email)`.
///
/// # Status transitions
///
/// ```text
/// (none) ──upsert_pending──▶ PENDING ──mark_completed──▶ COMPLETED
///                               │  ▲
///                   mark_failed │  │ upsert_pending / reset_failed_for_event
///                               ▼  │
///                              FAILED
/// ```
///
/// COMPLETED is terminal.
#[async_trait]
pub trait InvitationStore: Send + Sync {
    /// Create the attempt, or reset a non-completed one to PENDING.
    ///
    /// A reset clears any link, failure reason and claimed event. Fails with
    /// `AlreadyCompleted` if the existing row is COMPLETED, and with
    /// `Conflict` if it is PENDING but already claimed by a purchase event.
    async fn upsert_pending(&self, new: &NewInvitation) -> Result<Invitation>;

    async fn get(&self, group_id: &GroupId, email: &str) -> Result<Option<Invitation>>;

    /// Invitation bound to a purchase event, in any status.
    async fn get_by_event(&self, event_key: &EventKey) -> Result<Option<Invitation>>;

    /// Oldest PENDING invitation for `(group_id_hash, buyer)` that no purchase
    /// event has claimed yet.
    async fn find_pending(&self, group_id_hash: &str, buyer: &str) -> Result<Option<Invitation>>;

    /// Bind a purchase event to the oldest matching PENDING invitation.
    ///
    /// An invitation already bound to `event_key` is returned again, so a
    /// retried job keeps working on the same row. Two distinct events never
    /// claim the same invitation.
    async fn claim_pending(
        &self,
        group_id_hash: &str,
        buyer: &str,
        event_key: &EventKey,
    ) -> Result<Option<Invitation>>;

    /// Persist the invite link before it is delivered.
    async fn set_invite_link(&self, group_id: &GroupId, email: &str, link: &str) -> Result<()>;

    async fn mark_completed(&self, group_id: &GroupId, email: &str) -> Result<()>;

    async fn mark_failed(&self, group_id: &GroupId, email: &str, reason: &str) -> Result<()>;

    /// Move the FAILED invitation bound to `event_key` back to PENDING.
    ///
    /// Returns whether a row changed.
    async fn reset_failed_for_event(&self, event_key: &EventKey) -> Result<bool>;
}
