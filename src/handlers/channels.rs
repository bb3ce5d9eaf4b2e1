use std::sync::Arc;

use serde::Deserialize;
use serde_json::json;
use uuid::Uuid;
use validator::Validate;

use super::{parse_payload, require_admin, validation_error};
use crate::db;
use crate::error::{AppError, AppResult};
use crate::models::{ChannelDto, ChannelType, StorageType, User};
use crate::state::AppState;
use crate::storage;
use crate::ws::events::{
    EVENT_CHANNELS_LIST, EVENT_CHANNEL_CREATED, EVENT_CHANNEL_DELETED, EVENT_USER_LEFT_VOICE,
};
use crate::ws::{broadcast_event, reply, SessionHandle};

// ============================================================================
// Payloads
// ============================================================================

#[derive(Debug, Deserialize, Validate)]
#[serde(rename_all = "camelCase")]
pub struct CreateChannelRequest {
    pub category_id: Option<Uuid>,
    #[validate(length(min = 1, max = 64, message = "Channel name must be 1–64 characters"))]
    pub name: String,
    #[serde(rename = "type")]
    pub channel_type: ChannelType,
    pub feed_url: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DeleteChannelRequest {
    pub channel_id: Uuid,
}

// ============================================================================
// Handlers
// ============================================================================

/// `get_channels` — categories, channels, unread states, and a voice
/// participant snapshot. An empty hub gets a default `Text Channels`
/// category with a `general` channel that becomes the welcome channel.
pub async fn get_channels(
    state: &AppState,
    session: &Arc<SessionHandle>,
    caller: &User,
) -> AppResult<()> {
    if db::channels::count(&state.pool).await? == 0 {
        bootstrap_default_channels(state).await?;
    }

    let categories = db::channels::all_categories(&state.pool).await?;
    let channels = db::channels::all(&state.pool).await?;
    let unread_states = db::read_states::unread_states(&state.pool, caller.id).await?;
    let voice_participants = state.rooms.participants_snapshot().await;

    reply(
        session,
        EVENT_CHANNELS_LIST,
        json!({
            "categories": categories,
            "channels": channels.iter().map(ChannelDto::from).collect::<Vec<_>>(),
            "unreadStates": unread_states,
            "voiceParticipants": voice_participants,
        }),
    );
    Ok(())
}

/// `create_channel` — admin only. RSS channels must carry a parseable
/// http(s) feed URL; every other type must not.
pub async fn create_channel(
    state: &AppState,
    _session: &Arc<SessionHandle>,
    caller: &User,
    payload: serde_json::Value,
) -> AppResult<()> {
    require_admin(caller)?;
    let req: CreateChannelRequest = parse_payload(payload)?;
    req.validate().map_err(validation_error)?;

    let feed_url = match req.channel_type {
        ChannelType::Rss => {
            let raw = req
                .feed_url
                .as_deref()
                .map(str::trim)
                .filter(|u| !u.is_empty())
                .ok_or_else(|| {
                    AppError::Validation("RSS channels require a feed URL".into())
                })?;
            let parsed = url::Url::parse(raw)
                .map_err(|_| AppError::Validation("Feed URL is not a valid URL".into()))?;
            if parsed.scheme() != "http" && parsed.scheme() != "https" {
                return Err(AppError::Validation(
                    "Feed URL must use http or https".into(),
                ));
            }
            Some(raw.to_string())
        }
        _ => None,
    };

    if let Some(category_id) = req.category_id {
        // Reject dangling category references up front.
        let categories = db::channels::all_categories(&state.pool).await?;
        if !categories.iter().any(|c| c.id == category_id) {
            return Err(AppError::NotFound("Category not found".into()));
        }
    }

    let channel = db::channels::create(
        &state.pool,
        req.category_id,
        req.name.trim(),
        req.channel_type,
        feed_url.as_deref(),
    )
    .await?;

    tracing::info!(
        channel_id = %channel.id,
        channel_type = %channel.channel_type,
        created_by = %caller.id,
        "Channel created"
    );

    broadcast_event(
        state,
        EVENT_CHANNEL_CREATED,
        json!({ "channel": ChannelDto::from(&channel) }),
    )
    .await;
    Ok(())
}

/// `delete_channel` — admin only. Tears down any live voice room, deletes
/// folder file payloads from their providers, then drops the row (message,
/// read-state, RSS, and file rows cascade).
pub async fn delete_channel(
    state: &AppState,
    _session: &Arc<SessionHandle>,
    caller: &User,
    payload: serde_json::Value,
) -> AppResult<()> {
    require_admin(caller)?;
    let req: DeleteChannelRequest = parse_payload(payload)?;
    let channel = db::channels::get(&state.pool, req.channel_id).await?;

    if channel.channel_type == ChannelType::Voice {
        let evicted = state.rooms.destroy_channel(channel.id).await;
        for user_id in evicted {
            broadcast_event(
                state,
                EVENT_USER_LEFT_VOICE,
                json!({ "channelId": channel.id, "userId": user_id }),
            )
            .await;
        }
    }

    if channel.channel_type == ChannelType::Folder {
        delete_channel_file_bytes(state, channel.id).await?;
    }

    let server = db::servers::get(&state.pool).await?;
    db::servers::clear_channel_refs(&state.pool, server.id, channel.id).await?;
    db::channels::delete(&state.pool, channel.id).await?;

    tracing::info!(channel_id = %channel.id, deleted_by = %caller.id, "Channel deleted");

    broadcast_event(
        state,
        EVENT_CHANNEL_DELETED,
        json!({ "channelId": channel.id }),
    )
    .await;
    Ok(())
}

/// Delete every stored payload for a folder channel, each through the
/// provider that owns it. Row deletion follows via the channel cascade.
async fn delete_channel_file_bytes(state: &AppState, channel_id: Uuid) -> AppResult<()> {
    let files = db::folder_files::list_by_channel(&state.pool, channel_id).await?;
    if files.is_empty() {
        return Ok(());
    }

    let server = db::servers::get(&state.pool).await?;
    for file in files {
        let result = match file.storage_provider {
            StorageType::LocalDir => {
                let rel = storage::folder_local_rel_path(file.channel_id, &file.storage_name);
                state.storage.local.delete(&rel).await
            }
            StorageType::RemoteObjectStore => match (&file.storage_key, server.parsed_s3_config())
            {
                (Some(key), Some(config)) => {
                    let remote = state.storage.s3(&config).await?;
                    remote.delete(key).await
                }
                _ => {
                    tracing::warn!(file_id = %file.id, "Remote file has no key or config; skipping payload delete");
                    Ok(())
                }
            },
        };

        if let Err(e) = result {
            tracing::warn!(
                file_id = %file.id,
                error = %e,
                "Failed to delete file payload during channel delete; row will still be removed"
            );
        }
    }
    Ok(())
}

/// First-boot channel bootstrap: `Text Channels` category, a `general`
/// text channel, and the welcome-channel pointer.
async fn bootstrap_default_channels(state: &AppState) -> AppResult<()> {
    let category = db::channels::create_category(&state.pool, "Text Channels").await?;
    let general = db::channels::create(
        &state.pool,
        Some(category.id),
        "general",
        ChannelType::Text,
        None,
    )
    .await?;

    let server = db::servers::get(&state.pool).await?;
    db::servers::set_welcome_channel(&state.pool, server.id, general.id).await?;

    tracing::info!(channel_id = %general.id, "Bootstrapped default channels");
    Ok(())
}
