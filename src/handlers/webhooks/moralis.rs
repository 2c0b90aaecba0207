//! Moralis Streams webhook.
//!
//! Each delivery carries the logs of one block that matched the stream's
//! filter. Moralis sends a block twice, first unconfirmed and then
//! confirmed; with `require_confirmed` only the confirmed copy is ingested.
//! Registering a stream sends a test delivery with no logs, which must be
//! answered with 200.

use alloy::primitives::{keccak256, Address, B256};
use axum::body::Bytes;
use axum::extract::State;
use axum::http::HeaderMap;
use axum::Json;
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use super::{header, secrets_match};
use crate::chain::{decode_purchase_log, LogPosition, INVITATION_BOUGHT_TOPIC};
use crate::handlers::{ApiError, AppState};
use crate::model::{EventSource, PurchaseEvent};

const SIGNATURE_HEADER: &str = "x-signature";

/// Reply to a delivery.
#[derive(Debug, Default, Serialize, PartialEq, Eq)]
pub(crate) struct MoralisAck {
    accepted: usize,
    duplicates: usize,
    ignored: usize,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase", default)]
struct StreamPayload {
    confirmed: bool,
    chain_id: Option<Quantity>,
    block: Option<StreamBlock>,
    logs: Vec<StreamLog>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct StreamBlock {
    number: Option<Quantity>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct StreamLog {
    log_index: Quantity,
    transaction_hash: String,
    address: String,
    #[serde(default)]
    data: String,
    topic0: Option<String>,
    topic1: Option<String>,
    topic2: Option<String>,
    topic3: Option<String>,
}

/// Moralis encodes numbers as decimal or `0x` hex strings.
#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum Quantity {
    Number(u64),
    Text(String),
}

impl Quantity {
    fn value(&self) -> Option<u64> {
        match self {
            Quantity::Number(n) => Some(*n),
            Quantity::Text(s) => {
                let s = s.trim();
                match s.strip_prefix("0x").or_else(|| s.strip_prefix("0X")) {
                    Some(hex) => u64::from_str_radix(hex, 16).ok(),
                    None => s.parse().ok(),
                }
            }
        }
    }
}

/// `0x`-prefixed keccak256 of the raw body followed by the stream secret.
pub(crate) fn expected_signature(body: &[u8], secret: &str) -> String {
    let mut signed = Vec::with_capacity(body.len() + secret.len());
    signed.extend_from_slice(body);
    signed.extend_from_slice(secret.as_bytes());
    format!("{:#x}", keccak256(&signed))
}

/// `POST /api/webhooks/moralis`
pub(crate) async fn moralis(
    State(state): State<AppState>,
    headers: HeaderMap,
    body: Bytes,
) -> Result<Json<MoralisAck>, ApiError> {
    let settings = &state.settings;

    let provided = header(&headers, SIGNATURE_HEADER)
        .map(|s| s.trim().to_lowercase())
        .ok_or(ApiError::Unauthorized("missing x-signature header"))?;
    let expected = expected_signature(&body, &settings.moralis_secret);
    if !secrets_match(expected.as_bytes(), provided.as_bytes()) {
        warn!("Rejected Moralis delivery with invalid signature");
        return Err(ApiError::Unauthorized("invalid signature"));
    }

    if body.iter().all(u8::is_ascii_whitespace) {
        return Ok(Json(MoralisAck::default()));
    }

    let payload: StreamPayload = serde_json::from_slice(&body)
        .map_err(|e| ApiError::BadRequest(format!("invalid payload: {}", e)))?;

    if payload.logs.is_empty() {
        debug!("Moralis delivery without logs");
        return Ok(Json(MoralisAck::default()));
    }

    let mut ack = MoralisAck::default();

    if settings.require_confirmed && !payload.confirmed {
        debug!(logs = payload.logs.len(), "Ignoring unconfirmed Moralis delivery");
        ack.ignored = payload.logs.len();
        return Ok(Json(ack));
    }

    if let Some(chain_id) = payload.chain_id.as_ref().and_then(Quantity::value) {
        if chain_id != settings.chain_id {
            warn!(chain_id, expected = settings.chain_id, "Moralis delivery for another chain");
            ack.ignored = payload.logs.len();
            return Ok(Json(ack));
        }
    }

    let block_number = payload
        .block
        .as_ref()
        .and_then(|b| b.number.as_ref())
        .and_then(Quantity::value);

    let mut events = Vec::with_capacity(payload.logs.len());
    for log in &payload.logs {
        match decode_stream_log(log, settings.contract, settings.chain_id, block_number) {
            Some(event) => events.push(event),
            None => ack.ignored += 1,
        }
    }

    let report = state.fulfillment.ingest(&events, EventSource::Webhook).await?;
    ack.accepted = report.accepted;
    ack.duplicates = report.duplicates;

    info!(
        block = ?block_number,
        accepted = ack.accepted,
        duplicates = ack.duplicates,
        ignored = ack.ignored,
        "Moralis delivery processed"
    );
    Ok(Json(ack))
}

/// Decode one log, or `None` if it is not an `InvitationBought` from our contract.
fn decode_stream_log(
    log: &StreamLog,
    contract: Address,
    chain_id: u64,
    block_number: Option<u64>,
) -> Option<PurchaseEvent> {
    let emitter = log.address.trim().parse::<Address>().ok()?;
    if emitter != contract {
        debug!(address = %log.address, "Ignoring log from another contract");
        return None;
    }

    let topics = [&log.topic0, &log.topic1, &log.topic2, &log.topic3]
        .into_iter()
        .flatten()
        .map(|t| t.trim().parse::<B256>())
        .collect::<Result<Vec<_>, _>>()
        .ok()?;
    if topics.first() != Some(&INVITATION_BOUGHT_TOPIC) {
        return None;
    }

    let tx_hash = log.transaction_hash.trim().parse::<B256>().ok()?;
    let log_index = log.log_index.value()?;
    let data = hex::decode(log.data.trim().trim_start_matches("0x")).ok()?;

    let position = LogPosition {
        chain_id,
        tx_hash,
        log_index,
        block_number,
    };
    match decode_purchase_log(&topics, &data, position) {
        Ok(event) => Some(event),
        Err(e) => {
            warn!(tx_hash = %tx_hash, log_index, error = %e, "Skipping undecodable log");
            None
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::chain::{group_id_hash, SocialTriggers};
    use crate::handlers::test_support::*;
    use crate::model::GroupId;
    use crate::storage::JobState;
    use alloy::primitives::U256;
    use alloy::sol_types::SolEvent;
    use axum::body::Body;
    use http::{Request, StatusCode};
    use serde_json::{json, Value};

    const TX: &str = "0x1111111111111111111111111111111111111111111111111111111111111111";

    fn stream_log(address: Address, log_index: u64) -> Value {
        let event = SocialTriggers::InvitationBought {
            groupIdHash: group_id_hash(&GroupId::new()),
            buyer: Address::repeat_byte(0xB0),
            referrer: Address::ZERO,
            price: U256::from(1_000u64),
            ownerFee: U256::from(900u64),
            referrerFee: U256::ZERO,
            protocolFee: U256::from(100u64),
        };
        let log = event.encode_log_data();
        let topics: Vec<String> = log.topics().iter().map(|t| format!("{:#x}", t)).collect();
        json!({
            "logIndex": log_index.to_string(),
            "transactionHash": TX,
            "address": format!("{:#x}", address),
            "data": format!("0x{}", hex::encode(&log.data)),
            "topic0": topics[0],
            "topic1": topics[1],
            "topic2": topics[2],
            "topic3": topics[3],
        })
    }

    fn delivery(confirmed: bool, logs: Vec<Value>) -> Value {
        json!({
            "confirmed": confirmed,
            "chainId": "0xa869",
            "streamId": "c28d9e2e-ae9d-4fe6-9f0c-5b2e4bba4d5f",
            "tag": "invitations",
            "retries": 0,
            "block": {"number": "123", "hash": TX, "timestamp": "1700000000"},
            "logs": logs,
            "txs": [],
            "abi": [],
        })
    }

    fn signed(body: &str, secret: &str) -> Request<Body> {
        Request::builder()
            .method("POST")
            .uri("/api/webhooks/moralis")
            .header("content-type", "application/json")
            .header(SIGNATURE_HEADER, expected_signature(body.as_bytes(), secret))
            .body(Body::from(body.to_string()))
            .unwrap()
    }

    #[test]
    fn test_quantity_formats() {
        assert_eq!(Quantity::Number(5).value(), Some(5));
        assert_eq!(Quantity::Text("12".into()).value(), Some(12));
        assert_eq!(Quantity::Text("0xa869".into()).value(), Some(43113));
        assert_eq!(Quantity::Text(String::new()).value(), None);
    }

    #[tokio::test]
    async fn test_rejects_bad_signature() {
        let app = test_app().await;
        let body = delivery(true, vec![]).to_string();

        let response = app.send(signed(&body, "wrong-secret")).await;
        assert_eq!(response.status(), StatusCode::UNAUTHORIZED);

        let unsigned = Request::builder()
            .method("POST")
            .uri("/api/webhooks/moralis")
            .body(Body::from(body))
            .unwrap();
        assert_eq!(app.send(unsigned).await.status(), StatusCode::UNAUTHORIZED);
    }

    #[tokio::test]
    async fn test_empty_and_test_deliveries_are_acknowledged() {
        let app = test_app().await;

        let response = app.send(signed("", MORALIS_SECRET)).await;
        assert_eq!(response.status(), StatusCode::OK);

        let test_payload = json!({
            "abi": [],
            "block": {"number": "", "hash": "", "timestamp": ""},
            "txs": [],
            "txsInternal": [],
            "logs": [],
            "chainId": "",
            "confirmed": true,
            "retries": 0,
            "streamId": "",
            "tag": ""
        })
        .to_string();
        let response = app.send(signed(&test_payload, MORALIS_SECRET)).await;
        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(
            json_body(response).await,
            json!({"accepted": 0, "duplicates": 0, "ignored": 0})
        );
    }

    #[tokio::test]
    async fn test_ingests_matching_logs_once() {
        let app = test_app().await;
        let body = delivery(
            true,
            vec![
                stream_log(CONTRACT, 0),
                stream_log(Address::repeat_byte(0x01), 1),
            ],
        )
        .to_string();

        let response = app.send(signed(&body, MORALIS_SECRET)).await;
        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(
            json_body(response).await,
            json!({"accepted": 1, "duplicates": 0, "ignored": 1})
        );

        let jobs = app.stores.queue.list(Some(JobState::Pending), 10).await.unwrap();
        assert_eq!(jobs.len(), 1);
        assert_eq!(jobs[0].event_key.as_str(), format!("43113:{}:0", TX));
        assert_eq!(jobs[0].block_number, Some(123));
        assert_eq!(jobs[0].source, "webhook");

        // Moralis retries the same delivery.
        let response = app.send(signed(&body, MORALIS_SECRET)).await;
        assert_eq!(
            json_body(response).await,
            json!({"accepted": 0, "duplicates": 1, "ignored": 1})
        );
    }

    #[tokio::test]
    async fn test_unconfirmed_delivery_is_ignored() {
        let app = test_app().await;
        let body = delivery(false, vec![stream_log(CONTRACT, 0)]).to_string();

        let response = app.send(signed(&body, MORALIS_SECRET)).await;
        assert_eq!(
            json_body(response).await,
            json!({"accepted": 0, "duplicates": 0, "ignored": 1})
        );
        assert!(app.stores.queue.list(None, 10).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_unconfirmed_delivery_accepted_when_allowed() {
        let app = test_app_with(|s| s.require_confirmed = false).await;
        let body = delivery(false, vec![stream_log(CONTRACT, 0)]).to_string();

        let response = app.send(signed(&body, MORALIS_SECRET)).await;
        assert_eq!(json_body(response).await["accepted"], 1);
    }

    #[tokio::test]
    async fn test_other_chain_is_ignored() {
        let app = test_app_with(|s| s.chain_id = 1).await;
        let body = delivery(true, vec![stream_log(CONTRACT, 0)]).to_string();

        let response = app.send(signed(&body, MORALIS_SECRET)).await;
        assert_eq!(json_body(response).await["ignored"], 1);
    }

    #[tokio::test]
    async fn test_other_topics_and_garbage_are_ignored() {
        let app = test_app().await;
        let mut other_topic = stream_log(CONTRACT, 0);
        other_topic["topic0"] = json!(format!("{:#x}", B256::repeat_byte(0x99)));
        let mut truncated = stream_log(CONTRACT, 1);
        truncated["data"] = json!("0x1234");

        let body = delivery(true, vec![other_topic, truncated]).to_string();
        let response = app.send(signed(&body, MORALIS_SECRET)).await;
        assert_eq!(
            json_body(response).await,
            json!({"accepted": 0, "duplicates": 0, "ignored": 2})
        );
    }

    #[tokio::test]
    async fn test_malformed_json_is_bad_request() {
        let app = test_app().await;
        let response = app.send(signed("{not json", MORALIS_SECRET)).await;
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    }
}
