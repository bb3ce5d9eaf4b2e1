//! Auth-free server icon endpoint.
//!
//! `GET /server-icons/<serverId>/<name>` serves a locally stored icon;
//! `GET /server-icons/s3/<url-encoded-key>` serves a remotely stored one.
//! Either form is only honored when it matches the server row's current
//! `icon_ref`, so the endpoint can never be used to read arbitrary files
//! or bucket objects.

use axum::{
    body::Body,
    extract::{Path, State},
    http::{header, StatusCode},
    response::Response,
};

use crate::db;
use crate::error::{AppError, AppResult};
use crate::state::AppState;
use crate::storage;

pub async fn serve_icon(
    State(state): State<AppState>,
    Path((server_segment, file_name)): Path<(String, String)>,
) -> AppResult<Response> {
    let server = db::servers::get(&state.pool).await?;
    let icon_ref = server
        .icon_ref
        .as_deref()
        .ok_or_else(|| AppError::NotFound("Icon not found".into()))?;

    let (bytes, storage_name) = if server_segment == "s3" {
        // Remote form: the second segment is the url-encoded object key.
        let key = urlencoding::decode(&file_name)
            .map_err(|_| AppError::NotFound("Icon not found".into()))?
            .into_owned();
        if icon_ref != format!("s3:{key}") {
            return Err(AppError::NotFound("Icon not found".into()));
        }

        let config = server
            .parsed_s3_config()
            .ok_or_else(|| AppError::NotFound("Icon not found".into()))?;
        let remote = state.storage.s3(&config).await?;
        let name = key.rsplit('/').next().unwrap_or(&key).to_string();
        (remote.get(&key).await?, name)
    } else {
        if !storage::is_safe_id(&server_segment) {
            return Err(AppError::NotFound("Icon not found".into()));
        }
        let requested = format!("/server-icons/{server_segment}/{file_name}");
        if icon_ref != requested {
            return Err(AppError::NotFound("Icon not found".into()));
        }

        let rel = storage::icon_local_rel_path(&server_segment, &file_name);
        (state.storage.local.get(&rel).await?, file_name.clone())
    };

    let content_type = storage::icon_content_type(&storage_name)
        .ok_or_else(|| AppError::NotFound("Icon not found".into()))?;

    Response::builder()
        .status(StatusCode::OK)
        .header(header::CONTENT_TYPE, content_type)
        .header(header::CACHE_CONTROL, "public, max-age=300")
        .body(Body::from(bytes))
        .map_err(|_| AppError::Internal)
}
