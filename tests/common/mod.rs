//! Shared wiring for integration tests.

#![allow(dead_code)]

use std::sync::Arc;

use alloy::primitives::{keccak256, Address, B256, U256};
use alloy::sol_types::SolEvent;
use axum::body::Body;
use axum::Router;
use http::Request;
use serde_json::{json, Value};
use tower::ServiceExt;

use social_triggers::chain::{group_id_hash, SocialTriggers};
use social_triggers::config::{FulfillmentConfig, PollerConfig};
use social_triggers::handlers::{router, AppState, HttpSettings};
use social_triggers::model::{GroupId, PurchaseEvent};
use social_triggers::services::{FulfillmentService, GroupService, PollerService, PurchaseService};
use social_triggers::storage::Stores;
use social_triggers::test_utils::Mocks;

pub const CHAIN_ID: u64 = 43113;
pub const CONTRACT: Address = Address::repeat_byte(0xC0);
pub const MORALIS_SECRET: &str = "stream-secret";
pub const TELEGRAM_SECRET: &str = "bot-secret";

pub struct System {
    pub stores: Stores,
    pub mocks: Mocks,
    pub fulfillment: Arc<FulfillmentService>,
    pub poller: Arc<PollerService>,
    pub router: Router,
}

pub fn fast_retries() -> FulfillmentConfig {
    FulfillmentConfig {
        interval_ms: 20,
        batch_size: 10,
        max_attempts: 3,
        min_delay_ms: 100,
        max_delay_ms: 1_000,
        lease_secs: 30,
    }
}

pub fn poller_config(start_block: Option<u64>) -> PollerConfig {
    PollerConfig {
        enabled: true,
        interval_secs: 1,
        batch_size: 1_000,
        confirmations: 2,
        start_block,
    }
}

/// Services and router over `stores`, with fresh mocks.
pub fn system(stores: Stores, mocks: Mocks, start_block: Option<u64>) -> System {
    let fulfillment = Arc::new(FulfillmentService::new(
        &stores,
        mocks.telegram.clone(),
        mocks.mailer.clone(),
        fast_retries(),
        86_400,
    ));
    let poller = Arc::new(PollerService::new(
        mocks.chain.clone(),
        stores.positions.clone(),
        fulfillment.clone(),
        poller_config(start_block),
        CHAIN_ID,
        CONTRACT,
    ));

    let state = AppState {
        groups: Arc::new(GroupService::new(
            stores.groups.clone(),
            mocks.chain.clone(),
            mocks.telegram.clone(),
            CONTRACT,
            CHAIN_ID,
        )),
        purchases: Arc::new(PurchaseService::new(
            stores.groups.clone(),
            stores.invitations.clone(),
            mocks.chain.clone(),
            CONTRACT,
            CHAIN_ID,
        )),
        fulfillment: fulfillment.clone(),
        telegram: mocks.telegram.clone(),
        settings: Arc::new(HttpSettings {
            moralis_secret: MORALIS_SECRET.to_string(),
            telegram_secret: Some(TELEGRAM_SECRET.to_string()),
            admin_token: Some("ops".to_string()),
            require_confirmed: true,
            contract: CONTRACT,
            chain_id: CHAIN_ID,
        }),
    };

    System {
        router: router(state),
        stores,
        mocks,
        fulfillment,
        poller,
    }
}

impl System {
    pub async fn send(&self, request: Request<Body>) -> (http::StatusCode, Value) {
        let response = self.router.clone().oneshot(request).await.unwrap();
        let status = response.status();
        let body = axum::body::to_bytes(response.into_body(), 1024 * 1024)
            .await
            .unwrap();
        let json = if body.is_empty() {
            Value::Null
        } else {
            serde_json::from_slice(&body).unwrap()
        };
        (status, json)
    }
}

pub fn json_request(method: &str, uri: &str, body: &Value) -> Request<Body> {
    Request::builder()
        .method(method)
        .uri(uri)
        .header("content-type", "application/json")
        .body(Body::from(body.to_string()))
        .unwrap()
}

pub fn telegram_update(chat_id: i64, user_id: i64, text: &str) -> Request<Body> {
    let body = json!({
        "update_id": 1,
        "message": {
            "message_id": 1,
            "date": 1700000000,
            "chat": {"id": chat_id, "type": "supergroup", "title": "Alpha"},
            "from": {"id": user_id, "is_bot": false, "first_name": "Owner"},
            "text": text,
        }
    });
    Request::builder()
        .method("POST")
        .uri("/api/webhooks/telegram")
        .header("content-type", "application/json")
        .header("x-telegram-bot-api-secret-token", TELEGRAM_SECRET)
        .body(Body::from(body.to_string()))
        .unwrap()
}

/// The decoded event and its Moralis delivery for one purchase.
pub fn purchase(
    group_id: &GroupId,
    buyer: Address,
    tx_hash: B256,
    log_index: u64,
    block: u64,
) -> (PurchaseEvent, Value) {
    let raw = SocialTriggers::InvitationBought {
        groupIdHash: group_id_hash(group_id),
        buyer,
        referrer: Address::ZERO,
        price: U256::from(2_500u64),
        ownerFee: U256::from(2_250u64),
        referrerFee: U256::ZERO,
        protocolFee: U256::from(250u64),
    };
    let log = raw.encode_log_data();

    let event = PurchaseEvent {
        chain_id: CHAIN_ID,
        tx_hash,
        log_index,
        block_number: Some(block),
        group_id_hash: raw.groupIdHash,
        buyer,
        referrer: Address::ZERO,
        price: raw.price,
        owner_fee: raw.ownerFee,
        referrer_fee: raw.referrerFee,
        protocol_fee: raw.protocolFee,
    };

    let topics: Vec<String> = log.topics().iter().map(|t| format!("{:#x}", t)).collect();
    let delivery = json!({
        "confirmed": true,
        "chainId": format!("{:#x}", CHAIN_ID),
        "block": {"number": block.to_string()},
        "logs": [{
            "logIndex": log_index.to_string(),
            "transactionHash": format!("{:#x}", tx_hash),
            "address": format!("{:#x}", CONTRACT),
            "data": format!("0x{}", hex::encode(&log.data)),
            "topic0": topics[0],
            "topic1": topics[1],
            "topic2": topics[2],
            "topic3": topics[3],
        }],
    });

    (event, delivery)
}

pub fn moralis_request(delivery: &Value) -> Request<Body> {
    let body = delivery.to_string();
    let mut signed = body.clone().into_bytes();
    signed.extend_from_slice(MORALIS_SECRET.as_bytes());

    Request::builder()
        .method("POST")
        .uri("/api/webhooks/moralis")
        .header("content-type", "application/json")
        .header("x-signature", format!("{:#x}", keccak256(&signed)))
        .body(Body::from(body))
        .unwrap()
}
