mod common;

use chrono::{Duration, Utc};
use common::{create_text_channel, create_user, insert_message_at, test_pool};

use bastion_server::db;
use bastion_server::models::DeleteMode;

#[tokio::test]
async fn pagination_walks_sixty_messages_in_three_pages() {
    let pool = test_pool().await;
    let user = create_user(&pool, "paginator").await;
    let channel = create_text_channel(&pool, "history").await;

    let base = Utc::now() - Duration::hours(1);
    for i in 0..60 {
        insert_message_at(
            &pool,
            channel.id,
            user.id,
            &format!("message {i}"),
            base + Duration::seconds(i),
        )
        .await;
    }

    // First page: the newest 25, in chronological order.
    let (page1, has_more) = db::messages::page_before(&pool, channel.id, None)
        .await
        .unwrap();
    assert_eq!(page1.len(), 25);
    assert!(has_more);
    assert_eq!(page1.first().unwrap().content, "message 35");
    assert_eq!(page1.last().unwrap().content, "message 59");

    // Second page continues from the oldest returned message.
    let cursor = (page1[0].created_at, page1[0].id);
    let (page2, has_more) = db::messages::page_before(&pool, channel.id, Some(cursor))
        .await
        .unwrap();
    assert_eq!(page2.len(), 25);
    assert!(has_more);
    assert_eq!(page2.first().unwrap().content, "message 10");
    assert_eq!(page2.last().unwrap().content, "message 34");

    // Third page: the remaining 10, no more afterwards.
    let cursor = (page2[0].created_at, page2[0].id);
    let (page3, has_more) = db::messages::page_before(&pool, channel.id, Some(cursor))
        .await
        .unwrap();
    assert_eq!(page3.len(), 10);
    assert!(!has_more);
    assert_eq!(page3.first().unwrap().content, "message 0");

    // No overlap across pages.
    let mut all: Vec<_> = page1.iter().chain(&page2).chain(&page3).map(|m| m.id).collect();
    all.sort();
    all.dedup();
    assert_eq!(all.len(), 60);
}

#[tokio::test]
async fn cursor_at_oldest_message_returns_empty_last_page() {
    let pool = test_pool().await;
    let user = create_user(&pool, "edge").await;
    let channel = create_text_channel(&pool, "edge-case").await;

    let at = Utc::now();
    let oldest = insert_message_at(&pool, channel.id, user.id, "only", at).await;

    let (page, has_more) = db::messages::page_before(&pool, channel.id, Some((at, oldest)))
        .await
        .unwrap();
    assert!(page.is_empty());
    assert!(!has_more);
}

#[tokio::test]
async fn timestamp_ties_are_broken_by_id() {
    let pool = test_pool().await;
    let user = create_user(&pool, "tied").await;
    let channel = create_text_channel(&pool, "ties").await;

    let at = Utc::now();
    for i in 0..30 {
        insert_message_at(&pool, channel.id, user.id, &format!("tied {i}"), at).await;
    }

    let (page1, has_more) = db::messages::page_before(&pool, channel.id, None)
        .await
        .unwrap();
    assert_eq!(page1.len(), 25);
    assert!(has_more);

    let cursor = (page1[0].created_at, page1[0].id);
    let (page2, has_more) = db::messages::page_before(&pool, channel.id, Some(cursor))
        .await
        .unwrap();
    assert_eq!(page2.len(), 5);
    assert!(!has_more);

    let mut all: Vec<_> = page1.iter().chain(&page2).map(|m| m.id).collect();
    all.sort();
    all.dedup();
    assert_eq!(all.len(), 30, "tie-broken pages must not overlap");
}

#[tokio::test]
async fn purge_modes_none_hours_all() {
    let pool = test_pool().await;
    let target = create_user(&pool, "target").await;
    let other = create_user(&pool, "bystander").await;
    let channel = create_text_channel(&pool, "purged").await;

    let now = Utc::now();
    insert_message_at(&pool, channel.id, target.id, "old", now - Duration::hours(3)).await;
    insert_message_at(&pool, channel.id, target.id, "recent", now - Duration::minutes(10)).await;
    insert_message_at(&pool, channel.id, other.id, "innocent", now - Duration::minutes(5)).await;

    // none deletes nothing
    let deleted = db::messages::purge_user_messages(&pool, target.id, DeleteMode::None, None)
        .await
        .unwrap();
    assert_eq!(deleted, 0);

    // hours=1 deletes only the recent message
    let deleted = db::messages::purge_user_messages(&pool, target.id, DeleteMode::Hours, Some(1))
        .await
        .unwrap();
    assert_eq!(deleted, 1);

    // all deletes the remaining old message, leaving the bystander's
    let deleted = db::messages::purge_user_messages(&pool, target.id, DeleteMode::All, None)
        .await
        .unwrap();
    assert_eq!(deleted, 1);

    let remaining = db::messages::latest_in_channel(&pool, channel.id)
        .await
        .unwrap()
        .expect("bystander message survives");
    assert_eq!(remaining.user_id, other.id);
}

#[tokio::test]
async fn purge_hours_requires_valid_hours() {
    let pool = test_pool().await;
    let user = create_user(&pool, "invalid-purge").await;

    assert!(
        db::messages::purge_user_messages(&pool, user.id, DeleteMode::Hours, None)
            .await
            .is_err()
    );
    assert!(
        db::messages::purge_user_messages(&pool, user.id, DeleteMode::Hours, Some(0))
            .await
            .is_err()
    );
}
