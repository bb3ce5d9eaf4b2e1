mod common;

use chrono::{Duration, Utc};
use common::{create_text_channel, create_user, insert_message_at, test_pool};

use bastion_server::db;

#[tokio::test]
async fn seeding_points_at_channel_tail() {
    let pool = test_pool().await;
    let author = create_user(&pool, "author").await;
    let channel = create_text_channel(&pool, "seeded").await;

    let base = Utc::now() - Duration::minutes(30);
    insert_message_at(&pool, channel.id, author.id, "first", base).await;
    let tail = insert_message_at(
        &pool,
        channel.id,
        author.id,
        "latest",
        base + Duration::minutes(1),
    )
    .await;

    let reader = create_user(&pool, "reader").await;
    db::read_states::seed_for_user(&pool, reader.id).await.unwrap();

    let state = db::read_states::get(&pool, reader.id, channel.id)
        .await
        .unwrap()
        .expect("seeded row");
    assert_eq!(state.last_read_message_id, Some(tail));

    // Existing history is therefore not unread.
    let unread = db::read_states::unread_states(&pool, reader.id).await.unwrap();
    let entry = unread.iter().find(|u| u.channel_id == channel.id).unwrap();
    assert!(!entry.unread);
}

#[tokio::test]
async fn seeding_is_idempotent_and_preserves_existing_rows() {
    let pool = test_pool().await;
    let author = create_user(&pool, "writer").await;
    let reader = create_user(&pool, "re-seeded").await;
    let channel = create_text_channel(&pool, "stable").await;

    let base = Utc::now() - Duration::minutes(10);
    let first = insert_message_at(&pool, channel.id, author.id, "one", base).await;

    db::read_states::seed_for_user(&pool, reader.id).await.unwrap();

    // A new message arrives, then seeding runs again (as it does on every
    // auth). The existing cursor must not move.
    insert_message_at(&pool, channel.id, author.id, "two", base + Duration::minutes(1)).await;
    db::read_states::seed_for_user(&pool, reader.id).await.unwrap();

    let state = db::read_states::get(&pool, reader.id, channel.id)
        .await
        .unwrap()
        .unwrap();
    assert_eq!(state.last_read_message_id, Some(first));
}

#[tokio::test]
async fn cursor_advances_monotonically() {
    let pool = test_pool().await;
    let author = create_user(&pool, "poster").await;
    let reader = create_user(&pool, "cursor").await;
    let channel = create_text_channel(&pool, "monotone").await;

    let base = Utc::now() - Duration::minutes(5);
    let older = insert_message_at(&pool, channel.id, author.id, "older", base).await;
    let newer = insert_message_at(
        &pool,
        channel.id,
        author.id,
        "newer",
        base + Duration::seconds(30),
    )
    .await;

    db::read_states::advance(&pool, reader.id, channel.id, newer, base + Duration::seconds(30))
        .await
        .unwrap();

    // A stale cursor is a silent no-op.
    db::read_states::advance(&pool, reader.id, channel.id, older, base)
        .await
        .unwrap();

    let state = db::read_states::get(&pool, reader.id, channel.id)
        .await
        .unwrap()
        .unwrap();
    assert_eq!(state.last_read_message_id, Some(newer));
}

#[tokio::test]
async fn re_marking_the_same_cursor_is_a_noop() {
    let pool = test_pool().await;
    let author = create_user(&pool, "same").await;
    let reader = create_user(&pool, "same-reader").await;
    let channel = create_text_channel(&pool, "idempotent").await;

    let at = Utc::now();
    let message = insert_message_at(&pool, channel.id, author.id, "only", at).await;

    db::read_states::advance(&pool, reader.id, channel.id, message, at)
        .await
        .unwrap();
    db::read_states::advance(&pool, reader.id, channel.id, message, at)
        .await
        .unwrap();

    let state = db::read_states::get(&pool, reader.id, channel.id)
        .await
        .unwrap()
        .unwrap();
    assert_eq!(state.last_read_message_id, Some(message));
}

#[tokio::test]
async fn unread_flips_on_new_message_and_clears_on_advance() {
    let pool = test_pool().await;
    let author = create_user(&pool, "announcer").await;
    let reader = create_user(&pool, "watcher").await;
    let channel = create_text_channel(&pool, "activity").await;

    db::read_states::seed_for_user(&pool, reader.id).await.unwrap();

    let at = Utc::now();
    let message = insert_message_at(&pool, channel.id, author.id, "ping", at).await;

    let unread = db::read_states::unread_states(&pool, reader.id).await.unwrap();
    let entry = unread.iter().find(|u| u.channel_id == channel.id).unwrap();
    assert!(entry.unread);

    db::read_states::advance(&pool, reader.id, channel.id, message, at)
        .await
        .unwrap();

    let unread = db::read_states::unread_states(&pool, reader.id).await.unwrap();
    let entry = unread.iter().find(|u| u.channel_id == channel.id).unwrap();
    assert!(!entry.unread);
}

#[tokio::test]
async fn empty_channel_is_never_unread() {
    let pool = test_pool().await;
    let reader = create_user(&pool, "empty-watcher").await;
    let channel = create_text_channel(&pool, "silent").await;

    let unread = db::read_states::unread_states(&pool, reader.id).await.unwrap();
    let entry = unread.iter().find(|u| u.channel_id == channel.id).unwrap();
    assert!(!entry.unread);
}
