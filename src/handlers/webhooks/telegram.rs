//! Telegram bot webhook.
//!
//! Handles `/linkgroup <owner_address>` sent in a group by one of its
//! administrators. Every authenticated update is answered with 200 so
//! Telegram does not redeliver it; outcomes are reported in the chat.

use axum::extract::State;
use axum::http::{HeaderMap, StatusCode};
use serde::Deserialize;
use tracing::{error, info, warn};

use super::{header, secrets_match};
use crate::handlers::extract::ApiJson;
use crate::handlers::{ApiError, AppState};
use crate::model::ValidationError;
use crate::services::{LinkOutcome, ServiceError};

const SECRET_HEADER: &str = "x-telegram-bot-api-secret-token";
const LINK_COMMAND: &str = "/linkgroup";

#[derive(Debug, Deserialize)]
pub(crate) struct Update {
    #[serde(default)]
    message: Option<Message>,
}

#[derive(Debug, Deserialize)]
struct Message {
    chat: Chat,
    #[serde(default)]
    from: Option<User>,
    #[serde(default)]
    text: Option<String>,
}

#[derive(Debug, Deserialize)]
struct Chat {
    id: i64,
    #[serde(rename = "type", default)]
    kind: String,
}

#[derive(Debug, Deserialize)]
struct User {
    id: i64,
}

/// Argument of a `/linkgroup` command, or `None` for any other text.
///
/// Accepts the `/linkgroup@botname` form Telegram uses in groups.
fn parse_link_command(text: &str) -> Option<Option<&str>> {
    let mut words = text.split_whitespace();
    let command = words.next()?;
    let name = command.split('@').next()?;
    if !name.eq_ignore_ascii_case(LINK_COMMAND) {
        return None;
    }
    Some(words.next())
}

/// `POST /api/webhooks/telegram`
pub(crate) async fn telegram(
    State(state): State<AppState>,
    headers: HeaderMap,
    ApiJson(update): ApiJson<Update>,
) -> Result<StatusCode, ApiError> {
    if let Some(expected) = &state.settings.telegram_secret {
        let provided = header(&headers, SECRET_HEADER).unwrap_or_default();
        if !secrets_match(expected.as_bytes(), provided.as_bytes()) {
            warn!("Rejected Telegram update with invalid secret token");
            return Err(ApiError::Unauthorized("invalid secret token"));
        }
    }

    let Some(message) = update.message else {
        return Ok(StatusCode::OK);
    };
    let Some(argument) = message.text.as_deref().and_then(parse_link_command) else {
        return Ok(StatusCode::OK);
    };

    let chat_id = message.chat.id;
    let reply = match (message.chat.kind.as_str(), argument, &message.from) {
        ("private", _, _) | ("channel", _, _) => {
            "Run /linkgroup inside the group you want to sell invitations to.".to_string()
        }
        (_, None, _) => "Usage: /linkgroup <owner wallet address>".to_string(),
        (_, Some(_), None) => return Ok(StatusCode::OK),
        (_, Some(owner), Some(from)) => {
            match state.groups.link_group(chat_id, from.id, owner).await {
                Ok(outcome) => linked_reply(&outcome),
                Err(ServiceError::Forbidden(_)) => {
                    "Only chat administrators can link this group.".to_string()
                }
                Err(ServiceError::Validation(ValidationError::Address(raw))) => {
                    format!("{} is not a valid wallet address.", raw)
                }
                Err(e) => {
                    error!(chat_id, error = %e, "Failed to link group");
                    "Could not link this group right now, please try again later.".to_string()
                }
            }
        }
    };

    if let Err(e) = state.telegram.send_message(chat_id, &reply).await {
        warn!(chat_id, error = %e, "Failed to reply in chat");
    }
    Ok(StatusCode::OK)
}

fn linked_reply(outcome: &LinkOutcome) -> String {
    let group = &outcome.group;
    if outcome.created {
        info!(chat_id = ?group.chat_id, group_id = %group.group_id, "Group linked via bot");
        format!(
            "Group linked.\nGroup ID: {}\nOwner: {}\nRegister this group ID on the contract and set a price to start selling invitations.",
            group.group_id, group.owner_address
        )
    } else {
        format!(
            "This chat is already linked.\nGroup ID: {}\nOwner: {}",
            group.group_id, group.owner_address
        )
    }
}
