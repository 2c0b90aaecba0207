//! Operator routes over the fulfillment ledger.

use axum::extract::rejection::QueryRejection;
use axum::extract::{Path, Query, State};
use axum::http::HeaderMap;
use axum::Json;
use serde::Deserialize;

use super::webhooks::secrets_match;
use super::{ApiError, AppState};
use crate::model::EventKey;
use crate::storage::{FulfillmentJob, JobState};

const TOKEN_HEADER: &str = "x-admin-token";
const DEFAULT_LIMIT: u32 = 100;

#[derive(Debug, Default, Deserialize)]
pub(super) struct ListQuery {
    state: Option<String>,
    limit: Option<u32>,
}

fn authorize(state: &AppState, headers: &HeaderMap) -> Result<(), ApiError> {
    let expected = state
        .settings
        .admin_token
        .as_deref()
        .filter(|t| !t.is_empty())
        .ok_or(ApiError::Forbidden("admin api disabled"))?;

    let provided = headers
        .get(TOKEN_HEADER)
        .and_then(|v| v.to_str().ok())
        .unwrap_or_default();
    if !secrets_match(expected.as_bytes(), provided.as_bytes()) {
        return Err(ApiError::Unauthorized("invalid admin token"));
    }
    Ok(())
}

/// `GET /api/admin/fulfillments?state=dead&limit=50`
pub(super) async fn list_fulfillments(
    State(state): State<AppState>,
    headers: HeaderMap,
    query: Result<Query<ListQuery>, QueryRejection>,
) -> Result<Json<Vec<FulfillmentJob>>, ApiError> {
    authorize(&state, &headers)?;
    let Query(query) = query?;

    let filter = query
        .state
        .as_deref()
        .map(str::parse::<JobState>)
        .transpose()
        .map_err(|e| ApiError::BadRequest(e.to_string()))?;

    let jobs = state
        .fulfillment
        .list(filter, query.limit.unwrap_or(DEFAULT_LIMIT))
        .await?;
    Ok(Json(jobs))
}

/// `POST /api/admin/fulfillments/{key}/requeue`
pub(super) async fn requeue_fulfillment(
    State(state): State<AppState>,
    headers: HeaderMap,
    Path(key): Path<String>,
) -> Result<Json<FulfillmentJob>, ApiError> {
    authorize(&state, &headers)?;

    let job = state.fulfillment.requeue(&EventKey::from_raw(key)).await?;
    Ok(Json(job))
}
