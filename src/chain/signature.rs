//! Owner authorization via EIP-191 personal signatures.

use std::str::FromStr;

use alloy::primitives::{Address, Signature};

use super::{ChainError, Result};
use crate::model::GroupId;

/// Message an owner signs to authorize a configuration update.
///
/// The nonce is caller-chosen (typically a millisecond timestamp) and only
/// makes each signed message distinct.
pub fn owner_update_message(
    group_id: &GroupId,
    price: &str,
    commission: Option<u8>,
    nonce: u64,
) -> String {
    let commission = commission.map(|c| c.to_string()).unwrap_or_default();
    format!(
        "social-triggers:update:{}:{}:{}:{}",
        group_id, price, commission, nonce
    )
}

/// Check that `signature` over `message` was produced by `owner`.
pub fn verify_owner_signature(message: &str, signature: &str, owner: &Address) -> Result<()> {
    let signature = Signature::from_str(signature.trim())
        .map_err(|e| ChainError::Signature(e.to_string()))?;

    let recovered = signature
        .recover_address_from_msg(message.as_bytes())
        .map_err(|e| ChainError::Signature(e.to_string()))?;

    if recovered != *owner {
        return Err(ChainError::Signature(format!(
            "signed by {:#x}, expected {:#x}",
            recovered, owner
        )));
    }

    Ok(())
}
