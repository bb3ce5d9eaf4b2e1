mod common;

use common::{create_user, test_pool};

use bastion_server::db;
use bastion_server::models::ChannelType;

async fn create_rss_channel(pool: &sqlx::SqlitePool) -> bastion_server::models::Channel {
    db::channels::create(
        pool,
        None,
        "news",
        ChannelType::Rss,
        Some("https://feeds.example.com/news.xml"),
    )
    .await
    .unwrap()
}

#[tokio::test]
async fn reservation_grants_exclusive_publish_rights() {
    let pool = test_pool().await;
    let channel = create_rss_channel(&pool).await;

    assert!(db::rss_items::reserve(&pool, channel.id, "item-1", None)
        .await
        .unwrap());
    // Second attempt on the same key is a duplicate.
    assert!(!db::rss_items::reserve(&pool, channel.id, "item-1", None)
        .await
        .unwrap());
}

#[tokio::test]
async fn same_key_in_another_channel_is_independent() {
    let pool = test_pool().await;
    let channel_a = create_rss_channel(&pool).await;
    let channel_b = db::channels::create(
        &pool,
        None,
        "other-news",
        ChannelType::Rss,
        Some("https://feeds.example.com/other.xml"),
    )
    .await
    .unwrap();

    assert!(db::rss_items::reserve(&pool, channel_a.id, "shared-key", None)
        .await
        .unwrap());
    assert!(db::rss_items::reserve(&pool, channel_b.id, "shared-key", None)
        .await
        .unwrap());
}

#[tokio::test]
async fn released_reservation_can_be_retried() {
    let pool = test_pool().await;
    let channel = create_rss_channel(&pool).await;

    assert!(db::rss_items::reserve(&pool, channel.id, "flaky", None)
        .await
        .unwrap());
    db::rss_items::release(&pool, channel.id, "flaky").await.unwrap();

    // The failed publish left no trace, so the next poll retries.
    assert!(db::rss_items::reserve(&pool, channel.id, "flaky", None)
        .await
        .unwrap());
    assert_eq!(
        db::rss_items::count_for_channel(&pool, channel.id).await.unwrap(),
        1
    );
}

#[tokio::test]
async fn attached_reservation_survives_release_attempts() {
    let pool = test_pool().await;
    let channel = create_rss_channel(&pool).await;
    let bot = create_user(&pool, "feed-bot").await;

    assert!(db::rss_items::reserve(&pool, channel.id, "published", None)
        .await
        .unwrap());

    let message = db::messages::insert(&pool, channel.id, bot.id, "Title\nhttps://x.example")
        .await
        .unwrap();
    db::rss_items::attach_message(&pool, channel.id, "published", message.id)
        .await
        .unwrap();

    // Release only removes unpublished reservations.
    db::rss_items::release(&pool, channel.id, "published").await.unwrap();
    assert!(!db::rss_items::reserve(&pool, channel.id, "published", None)
        .await
        .unwrap());
}

#[tokio::test]
async fn content_fingerprint_collision_counts_as_duplicate() {
    let pool = test_pool().await;
    let channel = create_rss_channel(&pool).await;

    assert!(
        db::rss_items::reserve(&pool, channel.id, "guid-old", Some("fingerprint-a"))
            .await
            .unwrap()
    );
    // Same content under a fresh guid: the fingerprint index rejects it.
    assert!(
        !db::rss_items::reserve(&pool, channel.id, "guid-new", Some("fingerprint-a"))
            .await
            .unwrap()
    );

    assert_eq!(
        db::rss_items::count_for_channel(&pool, channel.id).await.unwrap(),
        1
    );
}

#[tokio::test]
async fn first_poll_then_overlapping_second_poll() {
    let pool = test_pool().await;
    let channel = create_rss_channel(&pool).await;

    // First poll: I1, I2.
    assert!(db::rss_items::reserve(&pool, channel.id, "I1", None).await.unwrap());
    assert!(db::rss_items::reserve(&pool, channel.id, "I2", None).await.unwrap());

    // Second poll: I2 (dup), I3 (new).
    assert!(!db::rss_items::reserve(&pool, channel.id, "I2", None).await.unwrap());
    assert!(db::rss_items::reserve(&pool, channel.id, "I3", None).await.unwrap());

    assert_eq!(
        db::rss_items::count_for_channel(&pool, channel.id).await.unwrap(),
        3
    );
}
