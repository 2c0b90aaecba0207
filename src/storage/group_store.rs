//! GroupStore trait definition.

use async_trait::async_trait;

use super::Result;
use crate::model::{GroupId, InvitationConfig};

/// Owner-editable terms of a group.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GroupUpdate {
    pub price: String,
    pub referral_commission: Option<u8>,
    pub description: Option<String>,
    /// Signed nonce of the update; must exceed every nonce applied before.
    pub nonce: u64,
}

/// Interface for linked-group persistence.
///
/// Groups are created once by `/linkgroup` and never deleted.
#[async_trait]
pub trait GroupStore: Send + Sync {
    /// Insert a new group.
    ///
    /// Fails with `Conflict` when the chat is already linked to another group.
    async fn create(&self, group: &InvitationConfig) -> Result<()>;

    async fn get(&self, group_id: &GroupId) -> Result<Option<InvitationConfig>>;

    /// Group linked to a Telegram chat.
    async fn get_by_chat(&self, chat_id: i64) -> Result<Option<InvitationConfig>>;

    /// Replace price, commission and description. Returns the updated row.
    ///
    /// Fails with `NotFound` if the group does not exist and with `Conflict`
    /// if `update.nonce` is not above the last applied nonce.
    async fn update_terms(&self, group_id: &GroupId, update: &GroupUpdate)
        -> Result<InvitationConfig>;
}
