use chrono::{DateTime, Duration, Utc};
use sqlx::SqlitePool;
use uuid::Uuid;

use crate::error::{AppError, AppResult};
use crate::models::{DeleteMode, Message, MessageWithAuthor};

/// Fixed page size for history fetches.
pub const PAGE_SIZE: i64 = 25;

const JOINED_COLUMNS: &str = "m.id, m.channel_id, m.user_id, m.content, m.created_at, \
     u.username, u.avatar_url, u.role";

pub async fn insert(
    pool: &SqlitePool,
    channel_id: Uuid,
    user_id: Uuid,
    content: &str,
) -> AppResult<MessageWithAuthor> {
    let id = Uuid::new_v4();
    sqlx::query(
        "INSERT INTO messages (id, channel_id, user_id, content, created_at)
         VALUES (?1, ?2, ?3, ?4, ?5)",
    )
    .bind(id)
    .bind(channel_id)
    .bind(user_id)
    .bind(content)
    .bind(Utc::now())
    .execute(pool)
    .await?;

    get_with_author(pool, id).await
}

pub async fn get_with_author(pool: &SqlitePool, message_id: Uuid) -> AppResult<MessageWithAuthor> {
    sqlx::query_as::<_, MessageWithAuthor>(&format!(
        "SELECT {JOINED_COLUMNS} FROM messages m JOIN users u ON u.id = m.user_id
         WHERE m.id = ?1"
    ))
    .bind(message_id)
    .fetch_optional(pool)
    .await?
    .ok_or_else(|| AppError::NotFound("Message not found".into()))
}

/// Reverse-chronological page of `PAGE_SIZE` messages, returned in
/// chronological order.
///
/// The cursor selects rows strictly less than `(created_at, id)` in
/// `(created_at DESC, id DESC)` order. One extra row is fetched to derive
/// `has_more` without a second query.
pub async fn page_before(
    pool: &SqlitePool,
    channel_id: Uuid,
    before: Option<(DateTime<Utc>, Uuid)>,
) -> AppResult<(Vec<MessageWithAuthor>, bool)> {
    let mut rows = match before {
        Some((created_at, id)) => {
            sqlx::query_as::<_, MessageWithAuthor>(&format!(
                "SELECT {JOINED_COLUMNS} FROM messages m JOIN users u ON u.id = m.user_id
                 WHERE m.channel_id = ?1
                   AND (m.created_at < ?2 OR (m.created_at = ?2 AND m.id < ?3))
                 ORDER BY m.created_at DESC, m.id DESC
                 LIMIT ?4"
            ))
            .bind(channel_id)
            .bind(created_at)
            .bind(id)
            .bind(PAGE_SIZE + 1)
            .fetch_all(pool)
            .await?
        }
        None => {
            sqlx::query_as::<_, MessageWithAuthor>(&format!(
                "SELECT {JOINED_COLUMNS} FROM messages m JOIN users u ON u.id = m.user_id
                 WHERE m.channel_id = ?1
                 ORDER BY m.created_at DESC, m.id DESC
                 LIMIT ?2"
            ))
            .bind(channel_id)
            .bind(PAGE_SIZE + 1)
            .fetch_all(pool)
            .await?
        }
    };

    let has_more = rows.len() as i64 > PAGE_SIZE;
    rows.truncate(PAGE_SIZE as usize);
    rows.reverse();
    Ok((rows, has_more))
}

/// Newest message in a channel, if any.
pub async fn latest_in_channel(pool: &SqlitePool, channel_id: Uuid) -> AppResult<Option<Message>> {
    let message = sqlx::query_as::<_, Message>(
        "SELECT id, channel_id, user_id, content, created_at FROM messages
         WHERE channel_id = ?1 ORDER BY created_at DESC, id DESC LIMIT 1",
    )
    .bind(channel_id)
    .fetch_optional(pool)
    .await?;
    Ok(message)
}

/// Bulk-delete a user's messages per moderation delete mode. The `hours`
/// cutoff is computed in the DAL's time basis. Returns deleted row count.
pub async fn purge_user_messages(
    pool: &SqlitePool,
    user_id: Uuid,
    mode: DeleteMode,
    hours: Option<i64>,
) -> AppResult<u64> {
    let result = match mode {
        DeleteMode::None => return Ok(0),
        DeleteMode::All => {
            sqlx::query("DELETE FROM messages WHERE user_id = ?1")
                .bind(user_id)
                .execute(pool)
                .await?
        }
        DeleteMode::Hours => {
            let hours = hours.ok_or_else(|| {
                AppError::Validation("deleteHours is required when deleteMode is hours".into())
            })?;
            if hours < 1 {
                return Err(AppError::Validation("deleteHours must be at least 1".into()));
            }
            let cutoff = Utc::now() - Duration::hours(hours);
            sqlx::query("DELETE FROM messages WHERE user_id = ?1 AND created_at >= ?2")
                .bind(user_id)
                .bind(cutoff)
                .execute(pool)
                .await?
        }
    };

    Ok(result.rows_affected())
}
