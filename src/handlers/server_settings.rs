//! Admin-key elevation and server settings, including the storage switch.

use std::sync::Arc;

use base64::Engine;
use serde::Deserialize;
use serde_json::json;
use uuid::Uuid;
use validator::Validate;

use super::{parse_payload, require_admin, validation_error};
use crate::auth::admin_key_matches;
use crate::db;
use crate::error::{AppError, AppResult};
use crate::models::{Role, S3Config, Server, ServerDto, StorageSettingsDto, StorageType, User};
use crate::state::AppState;
use crate::storage::{self, migration, s3};
use crate::ws::events::{
    EVENT_ROLE_UPDATED, EVENT_SERVER_SETTINGS_UPDATED, EVENT_SERVER_STORAGE_SETTINGS,
    EVENT_SERVER_STORAGE_TEST_RESULT, EVENT_SERVER_UPDATED_LEGACY, EVENT_USER_UPDATED,
};
use crate::ws::{broadcast_event, reply, SessionHandle};

/// Server icons are small; anything bigger than this is not an icon.
const MAX_ICON_BYTES: usize = 5 * 1024 * 1024;

/// Masked secret placeholder round-tripped by the settings form.
const SECRET_MASK: &str = "********";

// ============================================================================
// Payloads
// ============================================================================

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SubmitAdminKeyRequest {
    pub key: String,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StorageUpdateRequest {
    pub storage_type: StorageType,
    pub endpoint: Option<String>,
    pub region: Option<String>,
    pub bucket: Option<String>,
    pub access_key_id: Option<String>,
    pub secret_access_key: Option<String>,
    pub prefix: Option<String>,
}

#[derive(Debug, Deserialize, Validate)]
#[serde(rename_all = "camelCase")]
pub struct UpdateServerSettingsRequest {
    pub server_id: Option<Uuid>,
    #[validate(length(min = 1, max = 64, message = "Title must be 1–64 characters"))]
    pub title: Option<String>,
    /// Absent = keep the current pointer; explicit null = clear it.
    #[serde(default, deserialize_with = "super::double_option")]
    pub rules_channel_id: Option<Option<Uuid>>,
    #[serde(default, deserialize_with = "super::double_option")]
    pub welcome_channel_id: Option<Option<Uuid>>,
    pub icon_data_url: Option<String>,
    #[serde(default)]
    pub remove_icon: bool,
    pub storage: Option<StorageUpdateRequest>,
}

// ============================================================================
// submit_admin_key
// ============================================================================

/// Elevate the caller to `admin` on a constant-time key match. Repeating
/// the command with the correct key is idempotent; owners keep their role.
pub async fn submit_admin_key(
    state: &AppState,
    session: &Arc<SessionHandle>,
    caller: &User,
    payload: serde_json::Value,
) -> AppResult<()> {
    let req: SubmitAdminKeyRequest = parse_payload(payload)?;

    if !admin_key_matches(&state.admin_key, req.key.trim()) {
        return Err(AppError::Forbidden("Invalid admin key".into()));
    }

    if !caller.role.is_admin() {
        db::users::set_role(&state.pool, caller.id, Role::Admin).await?;
        tracing::info!(user_id = %caller.id, "User elevated to admin");
    }

    let user = db::users::get(&state.pool, caller.id).await?;
    reply(session, EVENT_ROLE_UPDATED, json!({ "role": user.role }));
    broadcast_event(state, EVENT_USER_UPDATED, crate::models::UserDto::from(&user)).await;
    Ok(())
}

// ============================================================================
// Storage settings queries
// ============================================================================

/// `get_server_storage_settings` — admin only; the secret is masked.
pub async fn get_storage_settings(
    state: &AppState,
    session: &Arc<SessionHandle>,
    caller: &User,
) -> AppResult<()> {
    require_admin(caller)?;
    let server = db::servers::get(&state.pool).await?;
    reply(
        session,
        EVENT_SERVER_STORAGE_SETTINGS,
        StorageSettingsDto::from_server(&server),
    );
    Ok(())
}

/// `test_server_storage` — run the validation probe without persisting.
pub async fn test_storage(
    state: &AppState,
    session: &Arc<SessionHandle>,
    caller: &User,
    payload: serde_json::Value,
) -> AppResult<()> {
    require_admin(caller)?;
    let req: StorageUpdateRequest = parse_payload(payload)?;
    let server = db::servers::get(&state.pool).await?;

    if req.storage_type == StorageType::LocalDir {
        reply(
            session,
            EVENT_SERVER_STORAGE_TEST_RESULT,
            json!({ "ok": true, "message": "Local storage needs no validation" }),
        );
        return Ok(());
    }

    let outcome = match assemble_config(&req, &server) {
        Ok(config) => match s3::validate(&config).await {
            Ok(shape) => json!({
                "ok": true,
                "endpoint": shape.endpoint,
                "addressing": if shape.force_path_style { "path-style" } else { "virtual-host" },
            }),
            Err(diagnostic) => json!({ "ok": false, "message": diagnostic }),
        },
        Err(message) => json!({ "ok": false, "message": message }),
    };

    reply(session, EVENT_SERVER_STORAGE_TEST_RESULT, outcome);
    Ok(())
}

// ============================================================================
// update_server_settings
// ============================================================================

pub async fn update_server_settings(
    state: &AppState,
    session: &Arc<SessionHandle>,
    caller: &User,
    payload: serde_json::Value,
) -> AppResult<()> {
    require_admin(caller)?;
    let req: UpdateServerSettingsRequest = parse_payload(payload)?;
    req.validate().map_err(validation_error)?;

    let server = db::servers::get(&state.pool).await?;
    if let Some(server_id) = req.server_id {
        if server_id != server.id {
            return Err(AppError::NotFound("Server not found".into()));
        }
    }

    let rules_channel_id = match req.rules_channel_id {
        Some(pointer) => pointer,
        None => server.rules_channel_id,
    };
    let welcome_channel_id = match req.welcome_channel_id {
        Some(pointer) => pointer,
        None => server.welcome_channel_id,
    };
    for channel_ref in [rules_channel_id, welcome_channel_id].into_iter().flatten() {
        db::channels::get(&state.pool, channel_ref).await?;
    }

    let title = req.title.as_deref().unwrap_or(&server.title);
    db::servers::update_profile(
        &state.pool,
        server.id,
        title,
        rules_channel_id,
        welcome_channel_id,
    )
    .await?;

    if req.remove_icon {
        remove_existing_icon(state, &server).await;
        db::servers::set_icon_ref(&state.pool, server.id, None).await?;
    } else if let Some(data_url) = req.icon_data_url.as_deref() {
        let icon_ref = store_icon(state, &server, data_url).await?;
        if server.icon_ref.as_deref() != Some(icon_ref.as_str()) {
            remove_existing_icon(state, &server).await;
        }
        db::servers::set_icon_ref(&state.pool, server.id, Some(&icon_ref)).await?;
    }

    let storage_changed = match req.storage {
        Some(storage_req) => {
            apply_storage_update(state, session, &server, storage_req).await?;
            true
        }
        None => false,
    };

    let server = db::servers::get(&state.pool).await?;
    let dto = ServerDto::from(&server);
    broadcast_event(state, EVENT_SERVER_SETTINGS_UPDATED, json!({ "server": &dto })).await;
    broadcast_event(state, EVENT_SERVER_UPDATED_LEGACY, json!({ "server": &dto })).await;

    if storage_changed {
        reply(
            session,
            EVENT_SERVER_STORAGE_SETTINGS,
            StorageSettingsDto::from_server(&server),
        );
    }
    Ok(())
}

// ============================================================================
// Storage switch
// ============================================================================

/// Merge the request with the stored configuration (the masked secret
/// round-trips) and sanitize it.
fn assemble_config(req: &StorageUpdateRequest, server: &Server) -> Result<S3Config, String> {
    let existing = server.parsed_s3_config();

    let secret = match req.secret_access_key.as_deref() {
        Some(SECRET_MASK) | None => existing
            .as_ref()
            .map(|c| c.secret_access_key.clone())
            .ok_or_else(|| "Secret access key must not be empty".to_string())?,
        Some(secret) => secret.to_string(),
    };

    let config = S3Config {
        endpoint: req.endpoint.clone().unwrap_or_default(),
        region: req.region.clone().unwrap_or_default(),
        bucket: req.bucket.clone().unwrap_or_default(),
        access_key_id: req.access_key_id.clone().unwrap_or_default(),
        secret_access_key: secret,
        prefix: req.prefix.clone(),
    };

    s3::sanitize_config(&config)
}

/// Validate and persist a storage change.
///
/// Enabling remote storage validates first and rejects the change on
/// failure, recording the reason in `storage_last_error`. On success the
/// new configuration is persisted (clearing the error) and the background
/// migration is spawned. Switching back to local keeps the remote
/// configuration so files already migrated stay readable.
async fn apply_storage_update(
    state: &AppState,
    session: &Arc<SessionHandle>,
    server: &Server,
    req: StorageUpdateRequest,
) -> AppResult<()> {
    match req.storage_type {
        StorageType::LocalDir => {
            db::servers::set_storage(
                &state.pool,
                server.id,
                StorageType::LocalDir,
                server.s3_config.as_deref(),
            )
            .await?;
            tracing::info!("Storage switched to local directory");
            Ok(())
        }
        StorageType::RemoteObjectStore => {
            let config = match assemble_config(&req, server) {
                Ok(config) => config,
                Err(message) => {
                    db::servers::set_storage_error(&state.pool, server.id, Some(&message)).await?;
                    return Err(AppError::Validation(message));
                }
            };

            if let Err(diagnostic) = s3::validate(&config).await {
                db::servers::set_storage_error(&state.pool, server.id, Some(&diagnostic)).await?;
                reply(
                    session,
                    EVENT_SERVER_STORAGE_TEST_RESULT,
                    json!({ "ok": false, "message": diagnostic }),
                );
                return Err(AppError::Validation(
                    "Remote storage validation failed".into(),
                ));
            }

            let config_json = serde_json::to_string(&config).map_err(|e| {
                tracing::error!(error = ?e, "Failed to serialize storage config; this is a programming error");
                AppError::Internal
            })?;
            db::servers::set_storage(
                &state.pool,
                server.id,
                StorageType::RemoteObjectStore,
                Some(&config_json),
            )
            .await?;

            reply(
                session,
                EVENT_SERVER_STORAGE_TEST_RESULT,
                json!({ "ok": true }),
            );
            tracing::info!(bucket = %config.bucket, "Storage switched to remote object store; migration spawned");

            migration::spawn(
                state.pool.clone(),
                Arc::clone(&state.storage),
                config,
            );
            Ok(())
        }
    }
}

// ============================================================================
// Icons
// ============================================================================

/// Decode and store a `data:image/...;base64,` icon through the active
/// provider. Returns the new icon ref for the server row.
async fn store_icon(state: &AppState, server: &Server, data_url: &str) -> AppResult<String> {
    let (mime, data) = parse_data_url(data_url)?;
    let ext = storage::icon_extension_for_mime(&mime)
        .ok_or_else(|| AppError::Validation("Icon must be png, jpg, webp, or gif".into()))?;

    if data.len() > MAX_ICON_BYTES {
        return Err(AppError::Validation("Icon exceeds the 5 MiB limit".into()));
    }

    // The declared MIME type must agree with the magic bytes.
    let detected = infer::get(&data).map(|t| t.mime_type());
    if storage::icon_extension_for_mime(detected.unwrap_or_default()) != Some(ext) {
        return Err(AppError::Validation(
            "Icon data does not match its declared image type".into(),
        ));
    }

    let server_id = server.id.to_string();
    if !storage::is_safe_id(&server_id) {
        return Err(AppError::Validation("Invalid server id".into()));
    }
    let storage_name = format!("icon.{ext}");

    match server.storage_type {
        StorageType::LocalDir => {
            let rel = storage::icon_local_rel_path(&server_id, &storage_name);
            state.storage.local.put(&rel, &data).await?;
            Ok(format!("/server-icons/{server_id}/{storage_name}"))
        }
        StorageType::RemoteObjectStore => {
            let config = server
                .parsed_s3_config()
                .ok_or_else(|| AppError::Validation("Remote storage is not configured".into()))?;
            let key = storage::icon_remote_key(config.prefix.as_deref(), &server_id, &storage_name);
            let remote = state.storage.s3(&config).await?;
            remote.put(&key, &data, Some(&mime)).await?;
            Ok(format!("s3:{key}"))
        }
    }
}

/// Best-effort removal of the currently referenced icon payload.
async fn remove_existing_icon(state: &AppState, server: &Server) {
    let Some(icon_ref) = server.icon_ref.as_deref() else {
        return;
    };

    let result: AppResult<()> = async {
        match icon_ref.strip_prefix("s3:") {
            Some(key) => {
                if let Some(config) = server.parsed_s3_config() {
                    let remote = state.storage.s3(&config).await?;
                    remote.delete(key).await?;
                }
            }
            None => {
                let rel = icon_ref.trim_start_matches('/');
                state.storage.local.delete(rel).await?;
            }
        }
        Ok(())
    }
    .await;

    if let Err(e) = result {
        tracing::warn!(icon_ref = %icon_ref, error = %e, "Failed to delete previous icon payload");
    }
}

/// Split a base64 data URL into `(mime, bytes)`.
fn parse_data_url(data_url: &str) -> AppResult<(String, Vec<u8>)> {
    let rest = data_url
        .strip_prefix("data:")
        .ok_or_else(|| AppError::Validation("Icon must be a data URL".into()))?;
    let (meta, payload) = rest
        .split_once(',')
        .ok_or_else(|| AppError::Validation("Icon data URL has no payload".into()))?;
    let mime = meta
        .strip_suffix(";base64")
        .ok_or_else(|| AppError::Validation("Icon data URL must be base64".into()))?;

    let data = base64::engine::general_purpose::STANDARD
        .decode(payload.as_bytes())
        .map_err(|_| AppError::Validation("Icon data is not valid base64".into()))?;
    Ok((mime.to_ascii_lowercase(), data))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn data_url_parsing() {
        let (mime, data) = parse_data_url("data:image/png;base64,aGVsbG8=").unwrap();
        assert_eq!(mime, "image/png");
        assert_eq!(data, b"hello");

        assert!(parse_data_url("not a data url").is_err());
        assert!(parse_data_url("data:image/png,plain").is_err());
        assert!(parse_data_url("data:image/png;base64,!!!").is_err());
    }
}
