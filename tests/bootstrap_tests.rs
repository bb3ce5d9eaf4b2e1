mod common;

use common::{create_text_channel, create_user, insert_message_at, test_pool};

use bastion_server::db;
use bastion_server::models::{ChannelType, Role, StorageType};

#[tokio::test]
async fn bootstrap_creates_singleton_server_and_synthetic_users() {
    let pool = test_pool().await;

    let server = db::servers::get(&pool).await.unwrap();
    assert_eq!(server.storage_type, StorageType::LocalDir);
    assert!(server.icon_ref.is_none());

    let system = db::users::get_by_public_key(&pool, db::SYSTEM_PUBLIC_KEY)
        .await
        .unwrap()
        .expect("System user");
    assert_eq!(system.username, db::SYSTEM_USERNAME);
    assert_eq!(system.role, Role::System);

    let bot = db::users::get_by_public_key(&pool, db::RSS_BOT_PUBLIC_KEY)
        .await
        .unwrap()
        .expect("RSS Bot user");
    assert_eq!(bot.role, Role::Bot);

    // Running bootstrap again must not duplicate anything.
    db::bootstrap(&pool).await.unwrap();
    let server_again = db::servers::get(&pool).await.unwrap();
    assert_eq!(server.id, server_again.id);
    assert_eq!(db::users::all(&pool).await.unwrap().len(), 2);
}

#[tokio::test]
async fn get_or_create_is_idempotent_per_public_key() {
    let pool = test_pool().await;

    let (alice, created) = db::users::get_or_create(&pool, "Alice", "pk:alice").await.unwrap();
    assert!(created);
    assert_eq!(alice.role, Role::User);

    // Same key, even with a different username, resolves to the same user.
    let (same, created) = db::users::get_or_create(&pool, "Alicia", "pk:alice").await.unwrap();
    assert!(!created);
    assert_eq!(same.id, alice.id);
    assert_eq!(same.username, "Alice");
}

#[tokio::test]
async fn role_elevation_is_idempotent() {
    let pool = test_pool().await;
    let user = create_user(&pool, "keyholder").await;

    db::users::set_role(&pool, user.id, Role::Admin).await.unwrap();
    db::users::set_role(&pool, user.id, Role::Admin).await.unwrap();

    let user = db::users::get(&pool, user.id).await.unwrap();
    assert_eq!(user.role, Role::Admin);
}

#[tokio::test]
async fn channel_delete_cascades_messages_and_rss_rows() {
    let pool = test_pool().await;
    let author = create_user(&pool, "cascader").await;

    let channel = db::channels::create(
        &pool,
        None,
        "doomed",
        ChannelType::Rss,
        Some("https://feeds.example.com/doomed.xml"),
    )
    .await
    .unwrap();

    let message =
        insert_message_at(&pool, channel.id, author.id, "news item", chrono::Utc::now()).await;
    db::rss_items::reserve(&pool, channel.id, "key-1", None).await.unwrap();
    db::rss_items::attach_message(&pool, channel.id, "key-1", message).await.unwrap();

    db::channels::delete(&pool, channel.id).await.unwrap();

    assert!(db::messages::latest_in_channel(&pool, channel.id)
        .await
        .unwrap()
        .is_none());
    assert_eq!(
        db::rss_items::count_for_channel(&pool, channel.id).await.unwrap(),
        0
    );
}

#[tokio::test]
async fn channel_positions_increase_monotonically() {
    let pool = test_pool().await;

    let first = create_text_channel(&pool, "first").await;
    let second = create_text_channel(&pool, "second").await;
    assert!(second.position > first.position);

    let channels = db::channels::all(&pool).await.unwrap();
    assert_eq!(channels[0].id, first.id);
    assert_eq!(channels[1].id, second.id);
}

#[tokio::test]
async fn storage_settings_round_trip_on_server_row() {
    let pool = test_pool().await;
    let server = db::servers::get(&pool).await.unwrap();

    db::servers::set_storage_error(&pool, server.id, Some("HeadBucket refused")).await.unwrap();
    let server = db::servers::get(&pool).await.unwrap();
    assert_eq!(server.storage_last_error.as_deref(), Some("HeadBucket refused"));

    // A successful save clears the recorded failure.
    db::servers::set_storage(
        &pool,
        server.id,
        StorageType::RemoteObjectStore,
        Some(r#"{"endpoint":"https://s3.example.com","region":"eu","bucket":"b","accessKeyId":"k","secretAccessKey":"s"}"#),
    )
    .await
    .unwrap();

    let server = db::servers::get(&pool).await.unwrap();
    assert_eq!(server.storage_type, StorageType::RemoteObjectStore);
    assert!(server.storage_last_error.is_none());
    assert!(server.storage_updated_at.is_some());
    assert!(server.parsed_s3_config().is_some());
}
