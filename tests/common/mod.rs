//! Shared test harness: an in-memory SQLite pool with the embedded
//! migrations applied and the bootstrap rows (server, synthetic users)
//! in place.

use chrono::{DateTime, Utc};
use sqlx::SqlitePool;
use uuid::Uuid;

use bastion_server::db;
use bastion_server::models::{Channel, ChannelType, User};

pub async fn test_pool() -> SqlitePool {
    let pool = db::create_memory_pool()
        .await
        .expect("Failed to create in-memory pool");
    sqlx::migrate!("./migrations")
        .run(&pool)
        .await
        .expect("Failed to run migrations");
    db::bootstrap(&pool).await.expect("Failed to bootstrap");
    pool
}

pub async fn create_user(pool: &SqlitePool, username: &str) -> User {
    db::users::create(pool, username, &format!("pk:{username}"))
        .await
        .expect("Failed to create user")
}

#[allow(dead_code)]
pub async fn create_text_channel(pool: &SqlitePool, name: &str) -> Channel {
    db::channels::create(pool, None, name, ChannelType::Text, None)
        .await
        .expect("Failed to create channel")
}

/// Insert a message with an explicit creation time, for tests that need
/// full control over the history timeline.
#[allow(dead_code)]
pub async fn insert_message_at(
    pool: &SqlitePool,
    channel_id: Uuid,
    user_id: Uuid,
    content: &str,
    created_at: DateTime<Utc>,
) -> Uuid {
    let id = Uuid::new_v4();
    sqlx::query(
        "INSERT INTO messages (id, channel_id, user_id, content, created_at)
         VALUES (?1, ?2, ?3, ?4, ?5)",
    )
    .bind(id)
    .bind(channel_id)
    .bind(user_id)
    .bind(content)
    .bind(created_at)
    .execute(pool)
    .await
    .expect("Failed to insert message");
    id
}
