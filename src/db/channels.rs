use chrono::Utc;
use sqlx::SqlitePool;
use uuid::Uuid;

use crate::error::{AppError, AppResult};
use crate::models::{Category, Channel, ChannelType};

const CHANNEL_COLUMNS: &str = "id, category_id, name, type, position, feed_url, created_at";

pub async fn get(pool: &SqlitePool, channel_id: Uuid) -> AppResult<Channel> {
    sqlx::query_as::<_, Channel>(&format!(
        "SELECT {CHANNEL_COLUMNS} FROM channels WHERE id = ?1"
    ))
    .bind(channel_id)
    .fetch_optional(pool)
    .await?
    .ok_or_else(|| AppError::NotFound("Channel not found".into()))
}

pub async fn all(pool: &SqlitePool) -> AppResult<Vec<Channel>> {
    let channels = sqlx::query_as::<_, Channel>(&format!(
        "SELECT {CHANNEL_COLUMNS} FROM channels ORDER BY position ASC, id ASC"
    ))
    .fetch_all(pool)
    .await?;
    Ok(channels)
}

pub async fn count(pool: &SqlitePool) -> AppResult<i64> {
    let count: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM channels")
        .fetch_one(pool)
        .await?;
    Ok(count)
}

/// Ordering is by position ascending, ties broken by id.
pub async fn all_categories(pool: &SqlitePool) -> AppResult<Vec<Category>> {
    let categories = sqlx::query_as::<_, Category>(
        "SELECT id, name, position FROM categories ORDER BY position ASC, id ASC",
    )
    .fetch_all(pool)
    .await?;
    Ok(categories)
}

pub async fn create_category(pool: &SqlitePool, name: &str) -> AppResult<Category> {
    let id = Uuid::new_v4();
    sqlx::query(
        "INSERT INTO categories (id, name, position)
         VALUES (?1, ?2, COALESCE((SELECT MAX(position) + 1 FROM categories), 0))",
    )
    .bind(id)
    .bind(name)
    .execute(pool)
    .await?;

    sqlx::query_as::<_, Category>("SELECT id, name, position FROM categories WHERE id = ?1")
        .bind(id)
        .fetch_one(pool)
        .await
        .map_err(AppError::Database)
}

pub async fn create(
    pool: &SqlitePool,
    category_id: Option<Uuid>,
    name: &str,
    channel_type: ChannelType,
    feed_url: Option<&str>,
) -> AppResult<Channel> {
    let id = Uuid::new_v4();
    sqlx::query(
        "INSERT INTO channels (id, category_id, name, type, position, feed_url, created_at)
         VALUES (?1, ?2, ?3, ?4,
                 COALESCE((SELECT MAX(position) + 1 FROM channels), 0),
                 ?5, ?6)",
    )
    .bind(id)
    .bind(category_id)
    .bind(name)
    .bind(channel_type)
    .bind(feed_url)
    .bind(Utc::now())
    .execute(pool)
    .await?;

    get(pool, id).await
}

/// Delete a channel row. Messages, read states, RSS dedupe rows, and folder
/// file rows cascade; byte payloads and voice-room teardown are the
/// caller's responsibility.
pub async fn delete(pool: &SqlitePool, channel_id: Uuid) -> AppResult<()> {
    let result = sqlx::query("DELETE FROM channels WHERE id = ?1")
        .bind(channel_id)
        .execute(pool)
        .await?;

    if result.rows_affected() == 0 {
        return Err(AppError::NotFound("Channel not found".into()));
    }
    Ok(())
}

/// Channels the RSS poller walks each cycle.
pub async fn rss_channels(pool: &SqlitePool) -> AppResult<Vec<Channel>> {
    let channels = sqlx::query_as::<_, Channel>(&format!(
        "SELECT {CHANNEL_COLUMNS} FROM channels WHERE type = 'rss' AND feed_url IS NOT NULL
         ORDER BY position ASC, id ASC"
    ))
    .fetch_all(pool)
    .await?;
    Ok(channels)
}
