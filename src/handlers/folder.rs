//! Folder channel file sharing.
//!
//! Uploads arrive base64-encoded in the envelope payload, capped at
//! 25 MiB. New files go to whichever provider the server row currently
//! selects; reads and deletes follow each file's own provider binding.

use std::sync::Arc;

use base64::Engine;
use serde::Deserialize;
use serde_json::json;
use uuid::Uuid;

use super::{parse_payload, require_admin};
use crate::db;
use crate::error::{AppError, AppResult};
use crate::models::{ChannelType, FolderFileDto, StorageType, User};
use crate::state::AppState;
use crate::storage;
use crate::ws::events::{
    EVENT_FOLDER_DELETE_SUCCESS, EVENT_FOLDER_FILES_LIST, EVENT_FOLDER_FILE_DELETED,
    EVENT_FOLDER_FILE_DOWNLOAD, EVENT_FOLDER_FILE_UPLOADED, EVENT_FOLDER_UPLOAD_SUCCESS,
};
use crate::ws::{broadcast_event, reply, SessionHandle};

/// Upload byte cap. A file of exactly this size is accepted.
const MAX_UPLOAD_BYTES: usize = 25 * 1024 * 1024;

// ============================================================================
// Payloads
// ============================================================================

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FolderChannelRequest {
    pub channel_id: Uuid,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FolderUploadRequest {
    pub channel_id: Uuid,
    pub file_name: String,
    pub mime_type: Option<String>,
    pub data_base64: String,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FolderFileRequest {
    pub channel_id: Uuid,
    pub file_id: Uuid,
}

// ============================================================================
// Handlers
// ============================================================================

pub async fn list_files(
    state: &AppState,
    session: &Arc<SessionHandle>,
    _caller: &User,
    payload: serde_json::Value,
) -> AppResult<()> {
    let req: FolderChannelRequest = parse_payload(payload)?;
    let channel = require_folder_channel(state, req.channel_id).await?;

    let files = db::folder_files::list_by_channel(&state.pool, channel.id).await?;
    reply(
        session,
        EVENT_FOLDER_FILES_LIST,
        json!({
            "channelId": channel.id,
            "files": files.iter().map(FolderFileDto::from).collect::<Vec<_>>(),
        }),
    );
    Ok(())
}

/// `folder_upload_file` — admin only. The sanitized name keeps its
/// extension; executable-like extensions are refused outright.
pub async fn upload_file(
    state: &AppState,
    session: &Arc<SessionHandle>,
    caller: &User,
    payload: serde_json::Value,
) -> AppResult<()> {
    require_admin(caller)?;
    let req: FolderUploadRequest = parse_payload(payload)?;
    let channel = require_folder_channel(state, req.channel_id).await?;

    let data = base64::engine::general_purpose::STANDARD
        .decode(req.data_base64.as_bytes())
        .map_err(|_| AppError::Validation("File data is not valid base64".into()))?;

    if data.is_empty() {
        return Err(AppError::Validation("Files must not be empty".into()));
    }
    if data.len() > MAX_UPLOAD_BYTES {
        return Err(AppError::Validation(
            "File size exceeds the 25 MiB limit".into(),
        ));
    }

    let original_name = storage::sanitize_filename(&req.file_name);
    storage::check_extension_allowed(&original_name)?;

    let storage_name = format!("{}_{}", Uuid::new_v4().simple(), original_name);
    let server = db::servers::get(&state.pool).await?;

    // Provider selection happens at write time from the server row; the
    // row below records the binding for the file's whole lifetime.
    let storage_key = match server.storage_type {
        StorageType::LocalDir => {
            let rel = storage::folder_local_rel_path(channel.id, &storage_name);
            state.storage.local.put(&rel, &data).await?;
            None
        }
        StorageType::RemoteObjectStore => {
            let config = server.parsed_s3_config().ok_or_else(|| {
                tracing::error!("Server row selects remote storage but has no config");
                AppError::Internal
            })?;
            let key =
                storage::folder_remote_key(config.prefix.as_deref(), channel.id, &storage_name);
            let remote = state.storage.s3(&config).await?;
            remote.put(&key, &data, req.mime_type.as_deref()).await?;
            Some(key)
        }
    };

    let file = db::folder_files::insert(
        &state.pool,
        db::folder_files::NewFolderFile {
            channel_id: channel.id,
            original_name: &original_name,
            storage_name: &storage_name,
            storage_provider: server.storage_type,
            storage_key: storage_key.as_deref(),
            mime_type: req.mime_type.as_deref(),
            size_bytes: data.len() as i64,
            uploader_user_id: caller.id,
        },
    )
    .await?;

    let dto = FolderFileDto::from(&file);
    reply(session, EVENT_FOLDER_UPLOAD_SUCCESS, json!({ "file": dto }));
    broadcast_event(
        state,
        EVENT_FOLDER_FILE_UPLOADED,
        json!({ "file": FolderFileDto::from(&file) }),
    )
    .await;
    Ok(())
}

pub async fn download_file(
    state: &AppState,
    session: &Arc<SessionHandle>,
    _caller: &User,
    payload: serde_json::Value,
) -> AppResult<()> {
    let req: FolderFileRequest = parse_payload(payload)?;
    let file = db::folder_files::get(&state.pool, req.file_id).await?;
    if file.channel_id != req.channel_id {
        return Err(AppError::NotFound("File not found".into()));
    }

    let data = match file.storage_provider {
        StorageType::LocalDir => {
            let rel = storage::folder_local_rel_path(file.channel_id, &file.storage_name);
            state.storage.local.get(&rel).await?
        }
        StorageType::RemoteObjectStore => {
            let key = file
                .storage_key
                .as_deref()
                .ok_or_else(|| AppError::NotFound("File not found".into()))?;
            let server = db::servers::get(&state.pool).await?;
            let config = server
                .parsed_s3_config()
                .ok_or_else(|| AppError::NotFound("File not found".into()))?;
            let remote = state.storage.s3(&config).await?;
            remote.get(key).await?
        }
    };

    reply(
        session,
        EVENT_FOLDER_FILE_DOWNLOAD,
        json!({
            "fileId": file.id,
            "fileName": file.original_name,
            "mimeType": file.mime_type,
            "dataBase64": base64::engine::general_purpose::STANDARD.encode(&data),
        }),
    );
    Ok(())
}

/// `folder_delete_file` — admin only. Deleting the row must delete the
/// byte payload, so the payload goes first; a dangling payload with no row
/// would be unreachable forever.
pub async fn delete_file(
    state: &AppState,
    session: &Arc<SessionHandle>,
    caller: &User,
    payload: serde_json::Value,
) -> AppResult<()> {
    require_admin(caller)?;
    let req: FolderFileRequest = parse_payload(payload)?;
    let file = db::folder_files::get(&state.pool, req.file_id).await?;
    if file.channel_id != req.channel_id {
        return Err(AppError::NotFound("File not found".into()));
    }

    match file.storage_provider {
        StorageType::LocalDir => {
            let rel = storage::folder_local_rel_path(file.channel_id, &file.storage_name);
            state.storage.local.delete(&rel).await?;
        }
        StorageType::RemoteObjectStore => {
            if let Some(key) = file.storage_key.as_deref() {
                let server = db::servers::get(&state.pool).await?;
                if let Some(config) = server.parsed_s3_config() {
                    let remote = state.storage.s3(&config).await?;
                    remote.delete(key).await?;
                }
            }
        }
    }

    db::folder_files::delete(&state.pool, file.id).await?;

    reply(
        session,
        EVENT_FOLDER_DELETE_SUCCESS,
        json!({ "fileId": file.id }),
    );
    broadcast_event(
        state,
        EVENT_FOLDER_FILE_DELETED,
        json!({ "fileId": file.id, "channelId": file.channel_id }),
    )
    .await;
    Ok(())
}

async fn require_folder_channel(
    state: &AppState,
    channel_id: Uuid,
) -> AppResult<crate::models::Channel> {
    let channel = db::channels::get(&state.pool, channel_id).await?;
    if channel.channel_type != ChannelType::Folder {
        return Err(AppError::Validation("Not a folder channel".into()));
    }
    Ok(channel)
}
