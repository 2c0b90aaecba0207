//! HTTP API.
//!
//! Routes:
//! - `GET  /api/health`
//! - `GET  /api/groups/{group_id}`: stored group plus on-chain terms
//! - `PUT  /api/groups/{group_id}`: owner-signed configuration update
//! - `POST /api/groups/{group_id}/invitations`: purchase intent
//! - `GET  /api/groups/{group_id}/invitations/{email}`: invitation status
//! - `POST /api/webhooks/moralis`: Moralis Streams deliveries
//! - `POST /api/webhooks/telegram`: Telegram bot updates
//! - `GET  /api/admin/fulfillments`, `POST /api/admin/fulfillments/{key}/requeue`

mod admin;
mod error;
mod extract;
mod groups;
mod webhooks;

pub use error::ApiError;

use std::sync::Arc;

use alloy::primitives::Address;
use axum::http::{Method, StatusCode};
use axum::routing::{get, post};
use axum::{Json, Router};
use serde_json::{json, Value};
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;

use crate::clients::TelegramApi;
use crate::services::{FulfillmentService, GroupService, PurchaseService};

/// Secrets and chain identity the handlers check requests against.
#[derive(Debug, Clone, Default)]
pub struct HttpSettings {
    pub moralis_secret: String,
    pub telegram_secret: Option<String>,
    /// `None` disables the admin routes.
    pub admin_token: Option<String>,
    pub require_confirmed: bool,
    pub contract: Address,
    pub chain_id: u64,
}

/// Shared state for axum handlers.
#[derive(Clone)]
pub struct AppState {
    pub groups: Arc<GroupService>,
    pub purchases: Arc<PurchaseService>,
    pub fulfillment: Arc<FulfillmentService>,
    pub telegram: Arc<dyn TelegramApi>,
    pub settings: Arc<HttpSettings>,
}

/// Build the axum router.
pub fn router(state: AppState) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods([Method::GET, Method::POST, Method::PUT, Method::OPTIONS])
        .allow_headers(Any);

    Router::new()
        .route("/api/health", get(health))
        .route(
            "/api/groups/{group_id}",
            get(groups::get_group).put(groups::update_group),
        )
        .route(
            "/api/groups/{group_id}/invitations",
            post(groups::create_invitation),
        )
        .route(
            "/api/groups/{group_id}/invitations/{email}",
            get(groups::get_invitation),
        )
        .route("/api/webhooks/moralis", post(webhooks::moralis))
        .route("/api/webhooks/telegram", post(webhooks::telegram))
        .route("/api/admin/fulfillments", get(admin::list_fulfillments))
        .route(
            "/api/admin/fulfillments/{key}/requeue",
            post(admin::requeue_fulfillment),
        )
        .layer(TraceLayer::new_for_http())
        .layer(cors)
        .with_state(state)
}

async fn health() -> (StatusCode, Json<Value>) {
    (StatusCode::OK, Json(json!({ "status": "ok" })))
}


#[cfg(test)]
mod tests {
    use super::test_support::*;
    use axum::body::Body;
    use http::Request;

    #[tokio::test]
    async fn test_health() {
        let app = test_app().await;
        let response = app
            .send(Request::builder().uri("/api/health").body(Body::empty()).unwrap())
            .await;

        assert_eq!(response.status(), http::StatusCode::OK);
        assert_eq!(json_body(response).await["status"], "ok");
    }

    #[tokio::test]
    async fn test_unknown_route() {
        let app = test_app().await;
        let response = app
            .send(Request::builder().uri("/api/nope").body(Body::empty()).unwrap())
            .await;
        assert_eq!(response.status(), http::StatusCode::NOT_FOUND);
    }
}
