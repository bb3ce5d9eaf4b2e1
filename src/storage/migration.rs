//! Background migration of folder files to the remote provider.
//!
//! Spawned after a successful switch to remote storage. Walks every file
//! still bound to `local_dir`, copies its bytes to the derived remote key,
//! flips the row, then deletes the local copy. Each file transition is
//! individually durable; failures record `storage_last_error` on the
//! server row but never interrupt serving.

use std::sync::Arc;

use sqlx::SqlitePool;

use crate::db;
use crate::error::AppResult;
use crate::models::S3Config;
use crate::storage::{folder_local_rel_path, folder_remote_key, StorageManager};

pub fn spawn(pool: SqlitePool, storage: Arc<StorageManager>, config: S3Config) {
    tokio::spawn(async move {
        if let Err(e) = run(&pool, &storage, &config).await {
            tracing::error!(error = ?e, "Storage migration task failed");
        }
    });
}

async fn run(pool: &SqlitePool, storage: &StorageManager, config: &S3Config) -> AppResult<()> {
    let files = db::folder_files::all_local(pool).await?;
    if files.is_empty() {
        tracing::info!("Storage migration: no local files to move");
        return Ok(());
    }

    tracing::info!(count = files.len(), "Storage migration started");
    let remote = storage.s3(config).await?;

    let mut moved = 0usize;
    let mut failed = 0usize;

    for file in files {
        let rel_path = folder_local_rel_path(file.channel_id, &file.storage_name);
        let key = folder_remote_key(config.prefix.as_deref(), file.channel_id, &file.storage_name);

        let result: AppResult<()> = async {
            let bytes = storage.local.get(&rel_path).await?;
            remote.put(&key, &bytes, file.mime_type.as_deref()).await?;
            db::folder_files::mark_migrated(pool, file.id, &key).await?;
            storage.local.delete(&rel_path).await?;
            Ok(())
        }
        .await;

        match result {
            Ok(()) => moved += 1,
            Err(e) => {
                failed += 1;
                tracing::warn!(
                    file_id = %file.id,
                    error = ?e,
                    "Failed to migrate folder file; it stays on local storage"
                );
                let server = db::servers::get(pool).await?;
                let message = format!("Migration failed for file {}: {}", file.id, e);
                db::servers::set_storage_error(pool, server.id, Some(&message)).await?;
            }
        }
    }

    tracing::info!(moved, failed, "Storage migration finished");
    Ok(())
}
