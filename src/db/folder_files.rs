use chrono::Utc;
use sqlx::SqlitePool;
use uuid::Uuid;

use crate::error::{AppError, AppResult};
use crate::models::{FolderFile, StorageType};

const FILE_COLUMNS: &str = "id, channel_id, original_name, storage_name, storage_provider, \
     storage_key, mime_type, size_bytes, uploader_user_id, migrated_at, created_at, updated_at";

pub struct NewFolderFile<'a> {
    pub channel_id: Uuid,
    pub original_name: &'a str,
    pub storage_name: &'a str,
    pub storage_provider: StorageType,
    pub storage_key: Option<&'a str>,
    pub mime_type: Option<&'a str>,
    pub size_bytes: i64,
    pub uploader_user_id: Uuid,
}

pub async fn insert(pool: &SqlitePool, file: NewFolderFile<'_>) -> AppResult<FolderFile> {
    let id = Uuid::new_v4();
    let now = Utc::now();
    sqlx::query(
        "INSERT INTO folder_channel_files
             (id, channel_id, original_name, storage_name, storage_provider, storage_key,
              mime_type, size_bytes, uploader_user_id, created_at, updated_at)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?10)",
    )
    .bind(id)
    .bind(file.channel_id)
    .bind(file.original_name)
    .bind(file.storage_name)
    .bind(file.storage_provider)
    .bind(file.storage_key)
    .bind(file.mime_type)
    .bind(file.size_bytes)
    .bind(file.uploader_user_id)
    .bind(now)
    .execute(pool)
    .await?;

    get(pool, id).await
}

pub async fn get(pool: &SqlitePool, file_id: Uuid) -> AppResult<FolderFile> {
    sqlx::query_as::<_, FolderFile>(&format!(
        "SELECT {FILE_COLUMNS} FROM folder_channel_files WHERE id = ?1"
    ))
    .bind(file_id)
    .fetch_optional(pool)
    .await?
    .ok_or_else(|| AppError::NotFound("File not found".into()))
}

pub async fn list_by_channel(pool: &SqlitePool, channel_id: Uuid) -> AppResult<Vec<FolderFile>> {
    let files = sqlx::query_as::<_, FolderFile>(&format!(
        "SELECT {FILE_COLUMNS} FROM folder_channel_files
         WHERE channel_id = ?1 ORDER BY created_at ASC, id ASC"
    ))
    .bind(channel_id)
    .fetch_all(pool)
    .await?;
    Ok(files)
}

pub async fn delete(pool: &SqlitePool, file_id: Uuid) -> AppResult<()> {
    let result = sqlx::query("DELETE FROM folder_channel_files WHERE id = ?1")
        .bind(file_id)
        .execute(pool)
        .await?;

    if result.rows_affected() == 0 {
        return Err(AppError::NotFound("File not found".into()));
    }
    Ok(())
}

/// Files whose bytes still live on the local provider, oldest first. The
/// background migration drains this set.
pub async fn all_local(pool: &SqlitePool) -> AppResult<Vec<FolderFile>> {
    let files = sqlx::query_as::<_, FolderFile>(&format!(
        "SELECT {FILE_COLUMNS} FROM folder_channel_files
         WHERE storage_provider = 'local_dir' ORDER BY created_at ASC, id ASC"
    ))
    .fetch_all(pool)
    .await?;
    Ok(files)
}

/// Flip one file's binding to the remote provider after a successful
/// upload. Individually durable; the migration task calls this per file.
pub async fn mark_migrated(pool: &SqlitePool, file_id: Uuid, storage_key: &str) -> AppResult<()> {
    let now = Utc::now();
    sqlx::query(
        "UPDATE folder_channel_files
         SET storage_provider = 'remote_object_store', storage_key = ?1,
             migrated_at = ?2, updated_at = ?2
         WHERE id = ?3",
    )
    .bind(storage_key)
    .bind(now)
    .bind(file_id)
    .execute(pool)
    .await?;
    Ok(())
}
