use chrono::Utc;
use sqlx::SqlitePool;
use uuid::Uuid;

use crate::error::{AppError, AppResult};
use crate::models::{Server, StorageType};

const SERVER_COLUMNS: &str = "id, name, title, rules_channel_id, welcome_channel_id, icon_ref, \
     storage_type, s3_config, storage_last_error, storage_updated_at, created_at, updated_at";

/// Fetch the singleton server row. Exactly one exists after bootstrap.
pub async fn get(pool: &SqlitePool) -> AppResult<Server> {
    sqlx::query_as::<_, Server>(&format!(
        "SELECT {SERVER_COLUMNS} FROM servers ORDER BY created_at ASC LIMIT 1"
    ))
    .fetch_optional(pool)
    .await?
    .ok_or_else(|| AppError::NotFound("Server not found".into()))
}

/// Create the singleton server row with defaults if none exists.
pub async fn ensure(pool: &SqlitePool) -> AppResult<Server> {
    match get(pool).await {
        Ok(server) => return Ok(server),
        Err(AppError::NotFound(_)) => {}
        Err(e) => return Err(e),
    }

    let now = Utc::now();
    sqlx::query(
        "INSERT INTO servers (id, name, title, storage_type, created_at, updated_at)
         VALUES (?1, ?2, ?3, ?4, ?5, ?5)",
    )
    .bind(Uuid::new_v4())
    .bind("Bastion")
    .bind("Bastion")
    .bind(StorageType::LocalDir)
    .bind(now)
    .execute(pool)
    .await?;

    get(pool).await
}

pub async fn update_profile(
    pool: &SqlitePool,
    server_id: Uuid,
    title: &str,
    rules_channel_id: Option<Uuid>,
    welcome_channel_id: Option<Uuid>,
) -> AppResult<Server> {
    sqlx::query(
        "UPDATE servers
         SET title = ?1, rules_channel_id = ?2, welcome_channel_id = ?3, updated_at = ?4
         WHERE id = ?5",
    )
    .bind(title)
    .bind(rules_channel_id)
    .bind(welcome_channel_id)
    .bind(Utc::now())
    .bind(server_id)
    .execute(pool)
    .await?;

    get(pool).await
}

pub async fn set_welcome_channel(
    pool: &SqlitePool,
    server_id: Uuid,
    channel_id: Uuid,
) -> AppResult<()> {
    sqlx::query("UPDATE servers SET welcome_channel_id = ?1, updated_at = ?2 WHERE id = ?3")
        .bind(channel_id)
        .bind(Utc::now())
        .bind(server_id)
        .execute(pool)
        .await?;
    Ok(())
}

/// Clear dangling channel references after a channel delete.
pub async fn clear_channel_refs(
    pool: &SqlitePool,
    server_id: Uuid,
    channel_id: Uuid,
) -> AppResult<()> {
    sqlx::query(
        "UPDATE servers
         SET rules_channel_id = CASE WHEN rules_channel_id = ?1 THEN NULL ELSE rules_channel_id END,
             welcome_channel_id = CASE WHEN welcome_channel_id = ?1 THEN NULL ELSE welcome_channel_id END,
             updated_at = ?2
         WHERE id = ?3",
    )
    .bind(channel_id)
    .bind(Utc::now())
    .bind(server_id)
    .execute(pool)
    .await?;
    Ok(())
}

pub async fn set_icon_ref(
    pool: &SqlitePool,
    server_id: Uuid,
    icon_ref: Option<&str>,
) -> AppResult<()> {
    sqlx::query("UPDATE servers SET icon_ref = ?1, updated_at = ?2 WHERE id = ?3")
        .bind(icon_ref)
        .bind(Utc::now())
        .bind(server_id)
        .execute(pool)
        .await?;
    Ok(())
}

/// Persist a storage reconfiguration, clearing any previous error.
pub async fn set_storage(
    pool: &SqlitePool,
    server_id: Uuid,
    storage_type: StorageType,
    s3_config_json: Option<&str>,
) -> AppResult<()> {
    let now = Utc::now();
    sqlx::query(
        "UPDATE servers
         SET storage_type = ?1, s3_config = ?2, storage_last_error = NULL,
             storage_updated_at = ?3, updated_at = ?3
         WHERE id = ?4",
    )
    .bind(storage_type)
    .bind(s3_config_json)
    .bind(now)
    .bind(server_id)
    .execute(pool)
    .await?;
    Ok(())
}

/// Record a storage failure without touching the active configuration.
pub async fn set_storage_error(
    pool: &SqlitePool,
    server_id: Uuid,
    error: Option<&str>,
) -> AppResult<()> {
    sqlx::query("UPDATE servers SET storage_last_error = ?1, updated_at = ?2 WHERE id = ?3")
        .bind(error)
        .bind(Utc::now())
        .bind(server_id)
        .execute(pool)
        .await?;
    Ok(())
}
