use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::Deserialize;
use serde_json::json;
use uuid::Uuid;
use validator::Validate;

use super::{parse_payload, validation_error};
use crate::db;
use crate::error::{AppError, AppResult};
use crate::models::{MessageDto, User};
use crate::state::AppState;
use crate::ws::events::{EVENT_MESSAGES_LIST, EVENT_NEW_MESSAGE};
use crate::ws::{broadcast_event, reply, SessionHandle};

// ============================================================================
// Payloads
// ============================================================================

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GetMessagesRequest {
    pub channel_id: Uuid,
    /// Cursor half: creation time of the oldest message the client has.
    pub before_created_at: Option<DateTime<Utc>>,
    /// Cursor half: id of that message, breaking timestamp ties.
    pub before_id: Option<Uuid>,
}

#[derive(Debug, Deserialize, Validate)]
#[serde(rename_all = "camelCase")]
pub struct SendMessageRequest {
    pub channel_id: Uuid,
    #[validate(length(
        min = 1,
        max = 4000,
        message = "Message content must be 1–4 000 characters"
    ))]
    pub content: String,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MarkChannelReadRequest {
    pub channel_id: Uuid,
    pub last_read_message_id: Uuid,
    pub last_read_created_at: DateTime<Utc>,
}

// ============================================================================
// Handlers
// ============================================================================

/// `get_messages` — one reverse-chronological page of 25, returned in
/// chronological order. The response echoes the request cursor so clients
/// can match replies to in-flight requests idempotently.
pub async fn get_messages(
    state: &AppState,
    session: &Arc<SessionHandle>,
    _caller: &User,
    payload: serde_json::Value,
) -> AppResult<()> {
    let req: GetMessagesRequest = parse_payload(payload)?;

    let channel = db::channels::get(&state.pool, req.channel_id).await?;
    if !channel.channel_type.has_messages() {
        return Err(AppError::Validation(
            "Channel does not carry messages".into(),
        ));
    }

    let cursor = match (req.before_created_at, req.before_id) {
        (Some(created_at), Some(id)) => Some((created_at, id)),
        (None, None) => None,
        _ => {
            return Err(AppError::Validation(
                "beforeCreatedAt and beforeId must be provided together".into(),
            ));
        }
    };

    let (rows, has_more) = db::messages::page_before(&state.pool, channel.id, cursor).await?;
    let messages: Vec<MessageDto> = rows.into_iter().map(MessageDto::from).collect();

    reply(
        session,
        EVENT_MESSAGES_LIST,
        json!({
            "channelId": channel.id,
            "messages": messages,
            "hasMore": has_more,
            "requestBeforeCreatedAt": req.before_created_at,
            "requestBeforeId": req.before_id,
        }),
    );
    Ok(())
}

/// `send_message` — persists, advances the sender's own read cursor, then
/// broadcasts `new_message`, in that order, so observers that fetch
/// history after seeing the event always find the row.
pub async fn send_message(
    state: &AppState,
    _session: &Arc<SessionHandle>,
    caller: &User,
    payload: serde_json::Value,
) -> AppResult<()> {
    let req: SendMessageRequest = parse_payload(payload)?;
    req.validate().map_err(validation_error)?;

    let channel = db::channels::get(&state.pool, req.channel_id).await?;
    match channel.channel_type {
        crate::models::ChannelType::Text => {}
        crate::models::ChannelType::Rss => {
            if !caller.role.can_post_rss() {
                return Err(AppError::Forbidden(
                    "Only privileged roles may post in RSS channels".into(),
                ));
            }
        }
        _ => {
            return Err(AppError::Validation(
                "Channel does not accept messages".into(),
            ));
        }
    }

    let message = db::messages::insert(&state.pool, channel.id, caller.id, &req.content).await?;
    db::read_states::advance(
        &state.pool,
        caller.id,
        channel.id,
        message.id,
        message.created_at,
    )
    .await?;

    broadcast_event(state, EVENT_NEW_MESSAGE, MessageDto::from(message)).await;
    Ok(())
}

/// `mark_channel_read` — monotone cursor advance; stale cursors are a
/// silent no-op and there is no echo either way.
pub async fn mark_channel_read(
    state: &AppState,
    caller: &User,
    payload: serde_json::Value,
) -> AppResult<()> {
    let req: MarkChannelReadRequest = parse_payload(payload)?;
    let channel = db::channels::get(&state.pool, req.channel_id).await?;

    db::read_states::advance(
        &state.pool,
        caller.id,
        channel.id,
        req.last_read_message_id,
        req.last_read_created_at,
    )
    .await
}
