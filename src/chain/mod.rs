//! EVM integration: contract ABI, log decoding and chain reads.
//!
//! The service never signs or broadcasts transactions. It only:
//! - decodes `InvitationBought` logs (webhook payloads and polled logs)
//! - encodes `buyInvitation` calldata for the buyer's wallet
//! - reads group terms (`getGroup`) and scans logs over JSON-RPC

mod contract;
mod rpc;
mod signature;

pub use contract::{
    build_purchase_tx, decode_purchase_log, group_id_hash, LogPosition, SocialTriggers,
    UnsignedTransaction, INVITATION_BOUGHT_TOPIC,
};
pub use rpc::RpcChainReader;
pub use signature::{owner_update_message, verify_owner_signature};

use alloy::primitives::{Address, B256, U256};
use async_trait::async_trait;
use serde::Serialize;

use crate::model::PurchaseEvent;

/// Result type for chain operations.
pub type Result<T> = std::result::Result<T, ChainError>;

/// Errors that can occur talking to or decoding from the chain.
#[derive(Debug, thiserror::Error)]
pub enum ChainError {
    #[error("RPC transport error: {0}")]
    Transport(String),

    #[error("Decode error: {0}")]
    Decode(String),

    #[error("Invalid signature: {0}")]
    Signature(String),

    #[error("Chain configuration error: {0}")]
    Config(String),
}

impl ChainError {
    /// Transport failures may succeed on retry; decoding never will.
    pub fn is_transient(&self) -> bool {
        matches!(self, ChainError::Transport(_))
    }
}

/// On-chain terms of a group as returned by `getGroup`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct GroupTerms {
    #[serde(serialize_with = "serialize_address")]
    pub owner: Address,
    #[serde(serialize_with = "serialize_u256")]
    pub price: U256,
    #[serde(serialize_with = "serialize_u256")]
    pub commission: U256,
}

impl GroupTerms {
    /// True when the contract has no record of the group.
    pub fn is_unregistered(&self) -> bool {
        self.owner == Address::ZERO
    }
}

fn serialize_address<S: serde::Serializer>(
    value: &Address,
    serializer: S,
) -> std::result::Result<S::Ok, S::Error> {
    serializer.serialize_str(&format!("{:#x}", value))
}

fn serialize_u256<S: serde::Serializer>(
    value: &U256,
    serializer: S,
) -> std::result::Result<S::Ok, S::Error> {
    serializer.serialize_str(&value.to_string())
}

/// Read access to the invitation contract.
///
/// Implementations:
/// - `RpcChainReader`: JSON-RPC over HTTP (Alchemy, public nodes)
/// - `MockChain` (test_utils): in-memory chain for tests
#[async_trait]
pub trait ChainReader: Send + Sync {
    /// Latest block number.
    async fn block_number(&self) -> Result<u64>;

    /// Decoded `InvitationBought` logs emitted by the contract in `[from, to]`.
    async fn purchase_logs(&self, from: u64, to: u64) -> Result<Vec<PurchaseEvent>>;

    /// Current terms of a group.
    async fn group_terms(&self, group_id_hash: B256) -> Result<GroupTerms>;
}
