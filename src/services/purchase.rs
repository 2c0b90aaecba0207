//! Purchase intents: record the attempt, hand back calldata to sign.

use std::sync::Arc;

use alloy::primitives::Address;
use serde::Serialize;
use tracing::info;

use super::{Result, ServiceError};
use crate::chain::{build_purchase_tx, group_id_hash, ChainReader, UnsignedTransaction};
use crate::model::{address_key, normalize_email, parse_address, GroupId, Invitation};
use crate::storage::{GroupStore, InvitationStore, NewInvitation, StorageError};

/// Buyer input for a purchase.
#[derive(Debug, Clone)]
pub struct PurchaseRequest {
    pub group_id: GroupId,
    pub email: String,
    pub buyer: String,
    pub referral: Option<String>,
}

/// PENDING invitation plus the transaction that settles it.
#[derive(Debug, Clone, Serialize)]
pub struct PurchaseIntent {
    pub invitation: Invitation,
    pub transaction: UnsignedTransaction,
}

pub struct PurchaseService {
    groups: Arc<dyn GroupStore>,
    invitations: Arc<dyn InvitationStore>,
    chain: Arc<dyn ChainReader>,
    contract: Address,
    chain_id: u64,
}

impl PurchaseService {
    pub fn new(
        groups: Arc<dyn GroupStore>,
        invitations: Arc<dyn InvitationStore>,
        chain: Arc<dyn ChainReader>,
        contract: Address,
        chain_id: u64,
    ) -> Self {
        Self {
            groups,
            invitations,
            chain,
            contract,
            chain_id,
        }
    }

    /// Record a PENDING invitation and build the `buyInvitation` call.
    ///
    /// The price comes from the contract, not the stored row.
    pub async fn create_intent(&self, request: &PurchaseRequest) -> Result<PurchaseIntent> {
        let email = normalize_email(&request.email)?;
        let buyer = parse_address(&request.buyer)?;
        let referral = request
            .referral
            .as_deref()
            .map(str::trim)
            .filter(|r| !r.is_empty())
            .map(parse_address)
            .transpose()?
            .filter(|r| *r != Address::ZERO);

        if referral == Some(buyer) {
            return Err(ServiceError::Invalid(
                "referral address must differ from the buyer".to_string(),
            ));
        }

        let group = self
            .groups
            .get(&request.group_id)
            .await?
            .ok_or_else(|| ServiceError::NotFound(format!("group {}", request.group_id)))?;
        if group.chat_id.is_none() {
            return Err(ServiceError::Conflict(format!(
                "group {} is not linked to a Telegram chat",
                group.group_id
            )));
        }

        let hash = group_id_hash(&group.group_id);
        let terms = self.chain.group_terms(hash).await?;
        if terms.is_unregistered() {
            return Err(ServiceError::Conflict(format!(
                "group {} is not registered on the contract",
                group.group_id
            )));
        }

        let invitation = self
            .invitations
            .upsert_pending(&NewInvitation {
                group_id: group.group_id,
                email,
                group_id_hash: format!("{:#x}", hash),
                buyer_address: address_key(&buyer),
                referral_address: referral.as_ref().map(address_key),
            })
            .await
            .map_err(|e| match e {
                StorageError::AlreadyCompleted { group_id, .. } => ServiceError::Conflict(
                    format!("an invitation to group {} was already delivered to this email", group_id),
                ),
                StorageError::Conflict(reason) => ServiceError::Conflict(reason),
                other => other.into(),
            })?;

        let transaction =
            build_purchase_tx(self.contract, self.chain_id, &group.group_id, referral, terms.price);

        info!(
            group_id = %group.group_id,
            buyer = %invitation.buyer_address,
            value = %transaction.value,
            "Created purchase intent"
        );

        Ok(PurchaseIntent {
            invitation,
            transaction,
        })
    }

    /// Current state of the attempt for `(group_id, email)`.
    pub async fn status(&self, group_id: &GroupId, email: &str) -> Result<Invitation> {
        let email = normalize_email(email)?;
        self.invitations
            .get(group_id, &email)
            .await?
            .ok_or_else(|| ServiceError::NotFound(format!("invitation for {} in group {}", email, group_id)))
    }
}
