//! Group linking, metadata and owner-authorized configuration updates.

use std::sync::Arc;

use alloy::primitives::Address;
use serde::Serialize;
use tracing::info;

use super::{Result, ServiceError};
use crate::chain::{
    group_id_hash, owner_update_message, verify_owner_signature, ChainError, ChainReader,
    GroupTerms,
};
use crate::clients::TelegramApi;
use crate::model::{
    address_key, parse_address, validate_price, GroupId, InvitationConfig, ValidationError,
};
use crate::storage::{GroupStore, GroupUpdate, StorageError};
use crate::utils::now_millis;

/// Signed owner nonces older or newer than this are rejected.
const NONCE_WINDOW_MS: i64 = 10 * 60 * 1000;

const MAX_DESCRIPTION_CHARS: usize = 500;

/// Result of `/linkgroup`.
#[derive(Debug, Clone)]
pub struct LinkOutcome {
    pub group: InvitationConfig,
    /// False when the chat was already linked.
    pub created: bool,
}

/// Stored group plus its live on-chain terms.
#[derive(Debug, Clone, Serialize)]
pub struct GroupMetadata {
    #[serde(flatten)]
    pub group: InvitationConfig,
    pub group_id_hash: String,
    pub contract_address: String,
    pub chain_id: u64,
    pub on_chain: GroupTerms,
}

/// Owner request to change the terms of a group.
#[derive(Debug, Clone)]
pub struct ConfigUpdate {
    pub price: String,
    pub referral_commission: Option<u8>,
    pub description: Option<String>,
    /// Millisecond timestamp chosen by the signer.
    pub nonce: u64,
    /// EIP-191 signature over [`owner_update_message`].
    pub signature: String,
}

pub struct GroupService {
    groups: Arc<dyn GroupStore>,
    chain: Arc<dyn ChainReader>,
    telegram: Arc<dyn TelegramApi>,
    contract: Address,
    chain_id: u64,
}

impl GroupService {
    pub fn new(
        groups: Arc<dyn GroupStore>,
        chain: Arc<dyn ChainReader>,
        telegram: Arc<dyn TelegramApi>,
        contract: Address,
        chain_id: u64,
    ) -> Self {
        Self {
            groups,
            chain,
            telegram,
            contract,
            chain_id,
        }
    }

    /// Link a Telegram chat to a new group owned by `owner_address`.
    ///
    /// Only chat administrators may link. Linking an already linked chat
    /// returns the existing group unchanged.
    pub async fn link_group(
        &self,
        chat_id: i64,
        user_id: i64,
        owner_address: &str,
    ) -> Result<LinkOutcome> {
        let owner = parse_address(owner_address)?;

        if !self.telegram.is_chat_admin(chat_id, user_id).await? {
            return Err(ServiceError::Forbidden(
                "only chat administrators can link a group".to_string(),
            ));
        }

        if let Some(group) = self.groups.get_by_chat(chat_id).await? {
            return Ok(LinkOutcome {
                group,
                created: false,
            });
        }

        let now = crate::storage::timestamp();
        let group = InvitationConfig {
            group_id: GroupId::new(),
            chat_id: Some(chat_id),
            owner_address: address_key(&owner),
            price: "0".to_string(),
            referral_commission: None,
            description: None,
            created_at: now.clone(),
            updated_at: now,
        };

        match self.groups.create(&group).await {
            Ok(()) => {
                info!(group_id = %group.group_id, chat_id, owner = %group.owner_address, "Linked group");
                Ok(LinkOutcome {
                    group,
                    created: true,
                })
            }
            // Lost a race with a concurrent /linkgroup in the same chat.
            Err(StorageError::Conflict(_)) => {
                let group = self.groups.get_by_chat(chat_id).await?.ok_or_else(|| {
                    ServiceError::Conflict(format!("chat {} is being linked", chat_id))
                })?;
                Ok(LinkOutcome {
                    group,
                    created: false,
                })
            }
            Err(e) => Err(e.into()),
        }
    }

    /// Stored configuration combined with the contract's view of the group.
    pub async fn metadata(&self, group_id: &GroupId) -> Result<GroupMetadata> {
        let group = self.require(group_id).await?;
        let hash = group_id_hash(group_id);
        let on_chain = self.chain.group_terms(hash).await?;

        Ok(GroupMetadata {
            group,
            group_id_hash: format!("{:#x}", hash),
            contract_address: address_key(&self.contract),
            chain_id: self.chain_id,
            on_chain,
        })
    }

    /// Apply an owner-signed update of price, commission and description.
    pub async fn update_config(
        &self,
        group_id: &GroupId,
        update: &ConfigUpdate,
    ) -> Result<InvitationConfig> {
        validate_price(&update.price)?;
        if let Some(commission) = update.referral_commission {
            if commission > 100 {
                return Err(ValidationError::Commission(commission).into());
            }
        }
        let description = update
            .description
            .as_deref()
            .map(str::trim)
            .filter(|d| !d.is_empty())
            .map(str::to_string);
        if description
            .as_ref()
            .is_some_and(|d| d.chars().count() > MAX_DESCRIPTION_CHARS)
        {
            return Err(ServiceError::Invalid(format!(
                "description longer than {} characters",
                MAX_DESCRIPTION_CHARS
            )));
        }

        let nonce = i64::try_from(update.nonce)
            .map_err(|_| ServiceError::Invalid("nonce out of range".to_string()))?;
        if (now_millis() - nonce).abs() > NONCE_WINDOW_MS {
            return Err(ServiceError::Invalid(
                "nonce must be a current millisecond timestamp".to_string(),
            ));
        }

        let group = self.require(group_id).await?;
        let owner = parse_address(&group.owner_address)?;
        let message = owner_update_message(
            group_id,
            &update.price,
            update.referral_commission,
            update.nonce,
        );
        verify_owner_signature(&message, &update.signature, &owner).map_err(|e| match e {
            ChainError::Signature(reason) => ServiceError::Forbidden(reason),
            other => other.into(),
        })?;

        let updated = self
            .groups
            .update_terms(
                group_id,
                &GroupUpdate {
                    price: update.price.clone(),
                    referral_commission: update.referral_commission,
                    description,
                    nonce: update.nonce,
                },
            )
            .await
            .map_err(|e| match e {
                StorageError::Conflict(_) => ServiceError::Conflict(
                    "nonce already used, sign the update with a newer nonce".to_string(),
                ),
                other => other.into(),
            })?;

        info!(group_id = %group_id, price = %updated.price, "Updated group terms");
        Ok(updated)
    }

    async fn require(&self, group_id: &GroupId) -> Result<InvitationConfig> {
        self.groups
            .get(group_id)
            .await?
            .ok_or_else(|| ServiceError::NotFound(format!("group {}", group_id)))
    }
}
