use chrono::Utc;
use sqlx::SqlitePool;
use uuid::Uuid;

use crate::error::AppResult;

/// Attempt the dedupe reservation for one parsed feed item.
///
/// `INSERT OR IGNORE` makes the unique constraint the arbiter: a `true`
/// return grants exclusive publishing rights for `(channel, item_key)`;
/// `false` means the item (or its content fingerprint) was already seen.
pub async fn reserve(
    pool: &SqlitePool,
    channel_id: Uuid,
    item_key: &str,
    content_fingerprint: Option<&str>,
) -> AppResult<bool> {
    let result = sqlx::query(
        "INSERT OR IGNORE INTO rss_channel_items
             (channel_id, item_key, content_fingerprint, message_id, created_at)
         VALUES (?1, ?2, ?3, NULL, ?4)",
    )
    .bind(channel_id)
    .bind(item_key)
    .bind(content_fingerprint)
    .bind(Utc::now())
    .execute(pool)
    .await?;

    Ok(result.rows_affected() > 0)
}

/// Patch a reservation with the id of the message it produced.
pub async fn attach_message(
    pool: &SqlitePool,
    channel_id: Uuid,
    item_key: &str,
    message_id: Uuid,
) -> AppResult<()> {
    sqlx::query(
        "UPDATE rss_channel_items SET message_id = ?1
         WHERE channel_id = ?2 AND item_key = ?3",
    )
    .bind(message_id)
    .bind(channel_id)
    .bind(item_key)
    .execute(pool)
    .await?;
    Ok(())
}

/// Release a reservation after a failed publish so a later poll can retry.
pub async fn release(pool: &SqlitePool, channel_id: Uuid, item_key: &str) -> AppResult<()> {
    sqlx::query(
        "DELETE FROM rss_channel_items
         WHERE channel_id = ?1 AND item_key = ?2 AND message_id IS NULL",
    )
    .bind(channel_id)
    .bind(item_key)
    .execute(pool)
    .await?;
    Ok(())
}

pub async fn count_for_channel(pool: &SqlitePool, channel_id: Uuid) -> AppResult<i64> {
    let count: i64 =
        sqlx::query_scalar("SELECT COUNT(*) FROM rss_channel_items WHERE channel_id = ?1")
            .bind(channel_id)
            .fetch_one(pool)
            .await?;
    Ok(count)
}
