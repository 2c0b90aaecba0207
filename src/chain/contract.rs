//! Invitation contract ABI, log decoding and purchase calldata.

use alloy::primitives::{keccak256, Address, Bytes, B256, U256};
use alloy::sol;
use alloy::sol_types::{SolCall, SolEvent};
use serde::Serialize;

use super::{ChainError, Result};
use crate::model::{GroupId, PurchaseEvent};

sol! {
    /// Invitation marketplace contract.
    interface SocialTriggers {
        event InvitationBought(
            bytes32 indexed groupIdHash,
            address indexed buyer,
            address indexed referrer,
            uint256 price,
            uint256 ownerFee,
            uint256 referrerFee,
            uint256 protocolFee
        );

        function buyInvitation(bytes32 groupIdHash, address referrer) external payable;

        function getGroup(bytes32 groupIdHash)
            external
            view
            returns (address owner, uint256 price, uint256 commission);
    }
}

/// Topic0 of `InvitationBought`.
pub const INVITATION_BOUGHT_TOPIC: B256 = SocialTriggers::InvitationBought::SIGNATURE_HASH;

/// On-chain identifier of a group: keccak256 of its canonical UUID string.
pub fn group_id_hash(group_id: &GroupId) -> B256 {
    keccak256(group_id.to_string().as_bytes())
}

/// Position metadata of a raw log.
#[derive(Debug, Clone, Copy)]
pub struct LogPosition {
    pub chain_id: u64,
    pub tx_hash: B256,
    pub log_index: u64,
    pub block_number: Option<u64>,
}

/// Decode a raw `InvitationBought` log.
pub fn decode_purchase_log(
    topics: &[B256],
    data: &[u8],
    position: LogPosition,
) -> Result<PurchaseEvent> {
    match topics.first() {
        Some(topic0) if *topic0 == INVITATION_BOUGHT_TOPIC => {}
        Some(topic0) => {
            return Err(ChainError::Decode(format!(
                "unexpected topic0 {:#x}",
                topic0
            )))
        }
        None => return Err(ChainError::Decode("log has no topics".to_string())),
    }

    let event = SocialTriggers::InvitationBought::decode_raw_log(topics.iter().copied(), data)
        .map_err(|e| ChainError::Decode(e.to_string()))?;

    Ok(PurchaseEvent {
        chain_id: position.chain_id,
        tx_hash: position.tx_hash,
        log_index: position.log_index,
        block_number: position.block_number,
        group_id_hash: event.groupIdHash,
        buyer: event.buyer,
        referrer: event.referrer,
        price: event.price,
        owner_fee: event.ownerFee,
        referrer_fee: event.referrerFee,
        protocol_fee: event.protocolFee,
    })
}

/// Transaction the buyer's wallet signs and broadcasts.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct UnsignedTransaction {
    pub to: String,
    pub data: String,
    /// Wei, decimal string.
    pub value: String,
    pub chain_id: u64,
}

/// Build the `buyInvitation` call for a group at the given price.
pub fn build_purchase_tx(
    contract: Address,
    chain_id: u64,
    group_id: &GroupId,
    referrer: Option<Address>,
    price: U256,
) -> UnsignedTransaction {
    let call = SocialTriggers::buyInvitationCall {
        groupIdHash: group_id_hash(group_id),
        referrer: referrer.unwrap_or(Address::ZERO),
    };
    let data = Bytes::from(call.abi_encode());

    UnsignedTransaction {
        to: format!("{:#x}", contract),
        data: data.to_string(),
        value: price.to_string(),
        chain_id,
    }
}

/// Calldata for the `getGroup` view.
pub(crate) fn get_group_calldata(hash: B256) -> Bytes {
    Bytes::from(SocialTriggers::getGroupCall { groupIdHash: hash }.abi_encode())
}

/// Decode the `getGroup` return data.
pub(crate) fn decode_get_group(data: &[u8]) -> Result<SocialTriggers::getGroupReturn> {
    SocialTriggers::getGroupCall::abi_decode_returns(data)
        .map_err(|e| ChainError::Decode(e.to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use alloy::primitives::address;

    fn position() -> LogPosition {
        LogPosition {
            chain_id: 43113,
            tx_hash: B256::repeat_byte(0x11),
            log_index: 3,
            block_number: Some(100),
        }
    }

    fn sample_event() -> SocialTriggers::InvitationBought {
        SocialTriggers::InvitationBought {
            groupIdHash: B256::repeat_byte(0x22),
            buyer: address!("00000000000000000000000000000000000000b0"),
            referrer: Address::ZERO,
            price: U256::from(1_000u64),
            ownerFee: U256::from(900u64),
            referrerFee: U256::ZERO,
            protocolFee: U256::from(100u64),
        }
    }

    #[test]
    fn test_group_id_hash_matches_keccak_of_string() {
        let id: GroupId = "3f2504e0-4f89-41d3-9a0c-0305e82c3301".parse().unwrap();
        assert_eq!(
            group_id_hash(&id),
            keccak256(b"3f2504e0-4f89-41d3-9a0c-0305e82c3301")
        );
    }

    #[test]
    fn test_decode_purchase_log() {
        let log = sample_event().encode_log_data();
        let decoded = decode_purchase_log(log.topics(), &log.data, position()).unwrap();

        assert_eq!(decoded.group_id_hash, B256::repeat_byte(0x22));
        assert_eq!(
            decoded.buyer,
            address!("00000000000000000000000000000000000000b0")
        );
        assert_eq!(decoded.price, U256::from(1_000u64));
        assert_eq!(decoded.protocol_fee, U256::from(100u64));
        assert_eq!(decoded.log_index, 3);
        assert_eq!(decoded.block_number, Some(100));
    }

    #[test]
    fn test_decode_rejects_other_events() {
        let log = sample_event().encode_log_data();
        let mut topics = log.topics().to_vec();
        topics[0] = B256::repeat_byte(0x99);

        let err = decode_purchase_log(&topics, &log.data, position()).unwrap_err();
        assert!(matches!(err, ChainError::Decode(_)));
    }

    #[test]
    fn test_decode_rejects_truncated_data() {
        let log = sample_event().encode_log_data();
        let err = decode_purchase_log(log.topics(), &log.data[..10], position()).unwrap_err();
        assert!(matches!(err, ChainError::Decode(_)));
    }

    #[test]
    fn test_build_purchase_tx() {
        let contract = address!("1000000000000000000000000000000000000001");
        let id = GroupId::new();
        let tx = build_purchase_tx(contract, 43114, &id, None, U256::from(5u64));

        assert_eq!(tx.to, "0x1000000000000000000000000000000000000001");
        assert_eq!(tx.value, "5");
        assert_eq!(tx.chain_id, 43114);

        let selector = hex::encode(SocialTriggers::buyInvitationCall::SELECTOR);
        assert!(tx.data.starts_with(&format!("0x{}", selector)));

        let raw = hex::decode(tx.data.trim_start_matches("0x")).unwrap();
        let call = SocialTriggers::buyInvitationCall::abi_decode(&raw).unwrap();
        assert_eq!(call.groupIdHash, group_id_hash(&id));
        assert_eq!(call.referrer, Address::ZERO);
    }
}
