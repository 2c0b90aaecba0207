//! Group metadata, owner configuration and purchase intents.

use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::Json;
use serde::Deserialize;

use super::extract::ApiJson;
use super::{ApiError, AppState};
use crate::model::{GroupId, Invitation, InvitationConfig};
use crate::services::{ConfigUpdate, GroupMetadata, PurchaseIntent, PurchaseRequest};

#[derive(Debug, Deserialize)]
pub(super) struct UpdateGroupBody {
    price: String,
    #[serde(default)]
    referral_commission: Option<u8>,
    #[serde(default)]
    description: Option<String>,
    nonce: u64,
    signature: String,
}

#[derive(Debug, Deserialize)]
pub(super) struct CreateInvitationBody {
    email: String,
    buyer: String,
    #[serde(default)]
    referral: Option<String>,
}

fn parse_group_id(raw: &str) -> Result<GroupId, ApiError> {
    raw.parse::<GroupId>()
        .map_err(|e| ApiError::BadRequest(e.to_string()))
}

/// `GET /api/groups/{group_id}`
pub(super) async fn get_group(
    State(state): State<AppState>,
    Path(group_id): Path<String>,
) -> Result<Json<GroupMetadata>, ApiError> {
    let group_id = parse_group_id(&group_id)?;
    Ok(Json(state.groups.metadata(&group_id).await?))
}

/// `PUT /api/groups/{group_id}`
pub(super) async fn update_group(
    State(state): State<AppState>,
    Path(group_id): Path<String>,
    ApiJson(body): ApiJson<UpdateGroupBody>,
) -> Result<Json<InvitationConfig>, ApiError> {
    let group_id = parse_group_id(&group_id)?;
    let update = ConfigUpdate {
        price: body.price,
        referral_commission: body.referral_commission,
        description: body.description,
        nonce: body.nonce,
        signature: body.signature,
    };
    Ok(Json(state.groups.update_config(&group_id, &update).await?))
}

/// `POST /api/groups/{group_id}/invitations`
pub(super) async fn create_invitation(
    State(state): State<AppState>,
    Path(group_id): Path<String>,
    ApiJson(body): ApiJson<CreateInvitationBody>,
) -> Result<(StatusCode, Json<PurchaseIntent>), ApiError> {
    let request = PurchaseRequest {
        group_id: parse_group_id(&group_id)?,
        email: body.email,
        buyer: body.buyer,
        referral: body.referral,
    };
    let intent = state.purchases.create_intent(&request).await?;
    Ok((StatusCode::CREATED, Json(intent)))
}

/// `GET /api/groups/{group_id}/invitations/{email}`
pub(super) async fn get_invitation(
    State(state): State<AppState>,
    Path((group_id, email)): Path<(String, String)>,
) -> Result<Json<Invitation>, ApiError> {
    let group_id = parse_group_id(&group_id)?;
    Ok(Json(state.purchases.status(&group_id, &email).await?))
}
