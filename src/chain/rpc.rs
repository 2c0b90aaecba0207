//! JSON-RPC chain reader.

use alloy::primitives::{Address, B256};
use alloy::providers::{DynProvider, Provider, ProviderBuilder};
use alloy::rpc::types::{Filter, Log, TransactionInput, TransactionRequest};
use async_trait::async_trait;
use tracing::{debug, warn};

use super::contract::{decode_get_group, get_group_calldata};
use super::{decode_purchase_log, ChainError, ChainReader, GroupTerms, LogPosition, Result};
use super::INVITATION_BOUGHT_TOPIC;
use crate::model::PurchaseEvent;

/// Reads the invitation contract through an HTTP JSON-RPC endpoint.
pub struct RpcChainReader {
    provider: DynProvider,
    contract: Address,
    chain_id: u64,
}

impl RpcChainReader {
    /// Connect to the RPC endpoint.
    pub async fn connect(rpc_url: &str, contract: Address, chain_id: u64) -> Result<Self> {
        let provider = ProviderBuilder::new()
            .connect(rpc_url)
            .await
            .map_err(|e| ChainError::Config(format!("cannot connect to {}: {}", rpc_url, e)))?
            .erased();

        Ok(Self {
            provider,
            contract,
            chain_id,
        })
    }

    fn decode(&self, log: &Log) -> Option<PurchaseEvent> {
        let (Some(tx_hash), Some(log_index)) = (log.transaction_hash, log.log_index) else {
            warn!("Skipping pending log without transaction hash or index");
            return None;
        };

        let position = LogPosition {
            chain_id: self.chain_id,
            tx_hash,
            log_index,
            block_number: log.block_number,
        };

        match decode_purchase_log(log.inner.data.topics(), &log.inner.data.data, position) {
            Ok(event) => Some(event),
            Err(e) => {
                warn!(tx_hash = %tx_hash, log_index, error = %e, "Skipping undecodable log");
                None
            }
        }
    }
}

#[async_trait]
impl ChainReader for RpcChainReader {
    async fn block_number(&self) -> Result<u64> {
        self.provider
            .get_block_number()
            .await
            .map_err(|e| ChainError::Transport(e.to_string()))
    }

    async fn purchase_logs(&self, from: u64, to: u64) -> Result<Vec<PurchaseEvent>> {
        let filter = Filter::new()
            .address(self.contract)
            .event_signature(INVITATION_BOUGHT_TOPIC)
            .from_block(from)
            .to_block(to);

        let logs = self
            .provider
            .get_logs(&filter)
            .await
            .map_err(|e| ChainError::Transport(e.to_string()))?;

        debug!(from, to, count = logs.len(), "Fetched purchase logs");

        Ok(logs.iter().filter_map(|log| self.decode(log)).collect())
    }

    async fn group_terms(&self, group_id_hash: B256) -> Result<GroupTerms> {
        let request = TransactionRequest::default()
            .to(self.contract)
            .input(TransactionInput::new(get_group_calldata(group_id_hash)));

        let output = self
            .provider
            .call(request)
            .await
            .map_err(|e| ChainError::Transport(e.to_string()))?;

        let ret = decode_get_group(&output)?;
        Ok(GroupTerms {
            owner: ret.owner,
            price: ret.price,
            commission: ret.commission,
        })
    }
}
