mod common;

use common::{create_user, test_pool};

use bastion_server::db;
use bastion_server::db::folder_files::NewFolderFile;
use bastion_server::models::{ChannelType, StorageType};

async fn create_folder_channel(pool: &sqlx::SqlitePool) -> bastion_server::models::Channel {
    db::channels::create(pool, None, "shared-files", ChannelType::Folder, None)
        .await
        .unwrap()
}

#[tokio::test]
async fn insert_list_and_delete_round_trip() {
    let pool = test_pool().await;
    let channel = create_folder_channel(&pool).await;
    let uploader = create_user(&pool, "uploader").await;

    let file = db::folder_files::insert(
        &pool,
        NewFolderFile {
            channel_id: channel.id,
            original_name: "report.pdf",
            storage_name: "abc123_report.pdf",
            storage_provider: StorageType::LocalDir,
            storage_key: None,
            mime_type: Some("application/pdf"),
            size_bytes: 1024,
            uploader_user_id: uploader.id,
        },
    )
    .await
    .unwrap();

    assert_eq!(file.storage_provider, StorageType::LocalDir);
    assert!(file.storage_key.is_none());

    let files = db::folder_files::list_by_channel(&pool, channel.id).await.unwrap();
    assert_eq!(files.len(), 1);
    assert_eq!(files[0].original_name, "report.pdf");

    db::folder_files::delete(&pool, file.id).await.unwrap();
    assert!(db::folder_files::list_by_channel(&pool, channel.id)
        .await
        .unwrap()
        .is_empty());
}

#[tokio::test]
async fn migration_flips_provider_and_sets_key() {
    let pool = test_pool().await;
    let channel = create_folder_channel(&pool).await;
    let uploader = create_user(&pool, "mover").await;

    let file = db::folder_files::insert(
        &pool,
        NewFolderFile {
            channel_id: channel.id,
            original_name: "video.mp4",
            storage_name: "def456_video.mp4",
            storage_provider: StorageType::LocalDir,
            storage_key: None,
            mime_type: Some("video/mp4"),
            size_bytes: 4096,
            uploader_user_id: uploader.id,
        },
    )
    .await
    .unwrap();

    assert_eq!(db::folder_files::all_local(&pool).await.unwrap().len(), 1);

    let key = format!("channels/{}/def456_video.mp4", channel.id);
    db::folder_files::mark_migrated(&pool, file.id, &key).await.unwrap();

    let file = db::folder_files::get(&pool, file.id).await.unwrap();
    assert_eq!(file.storage_provider, StorageType::RemoteObjectStore);
    assert_eq!(file.storage_key.as_deref(), Some(key.as_str()));
    assert!(file.migrated_at.is_some());

    // Nothing left for the migration task to move.
    assert!(db::folder_files::all_local(&pool).await.unwrap().is_empty());
}

#[tokio::test]
async fn channel_delete_cascades_file_rows() {
    let pool = test_pool().await;
    let channel = create_folder_channel(&pool).await;
    let uploader = create_user(&pool, "cascade").await;

    let file = db::folder_files::insert(
        &pool,
        NewFolderFile {
            channel_id: channel.id,
            original_name: "notes.txt",
            storage_name: "ghi789_notes.txt",
            storage_provider: StorageType::LocalDir,
            storage_key: None,
            mime_type: Some("text/plain"),
            size_bytes: 64,
            uploader_user_id: uploader.id,
        },
    )
    .await
    .unwrap();

    db::channels::delete(&pool, channel.id).await.unwrap();
    assert!(db::folder_files::get(&pool, file.id).await.is_err());
}
