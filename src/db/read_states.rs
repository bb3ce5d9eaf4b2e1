use chrono::{DateTime, Utc};
use sqlx::SqlitePool;
use uuid::Uuid;

use crate::error::AppResult;
use crate::models::{ChannelReadState, UnreadStateDto};

/// Seed read states for a user across every message-bearing channel.
///
/// Each missing `(user, channel)` row is created pointing at the channel's
/// current tail so pre-existing history does not show up as unread. Rows
/// that already exist are left untouched.
pub async fn seed_for_user(pool: &SqlitePool, user_id: Uuid) -> AppResult<()> {
    sqlx::query(
        "INSERT OR IGNORE INTO channel_read_states
             (user_id, channel_id, last_read_message_id, last_read_created_at, updated_at)
         SELECT ?1, c.id,
                (SELECT m.id FROM messages m WHERE m.channel_id = c.id
                 ORDER BY m.created_at DESC, m.id DESC LIMIT 1),
                (SELECT m.created_at FROM messages m WHERE m.channel_id = c.id
                 ORDER BY m.created_at DESC, m.id DESC LIMIT 1),
                ?2
         FROM channels c
         WHERE c.type IN ('text', 'rss')",
    )
    .bind(user_id)
    .bind(Utc::now())
    .execute(pool)
    .await?;
    Ok(())
}

/// Monotone cursor advance: the row only changes when the new
/// `(created_at, id)` pair is ≥ the stored one (created_at wins, id breaks
/// ties). A stale cursor is a silent no-op.
pub async fn advance(
    pool: &SqlitePool,
    user_id: Uuid,
    channel_id: Uuid,
    message_id: Uuid,
    message_created_at: DateTime<Utc>,
) -> AppResult<()> {
    sqlx::query(
        "INSERT INTO channel_read_states
             (user_id, channel_id, last_read_message_id, last_read_created_at, updated_at)
         VALUES (?1, ?2, ?3, ?4, ?5)
         ON CONFLICT (user_id, channel_id) DO UPDATE SET
             last_read_message_id = excluded.last_read_message_id,
             last_read_created_at = excluded.last_read_created_at,
             updated_at = excluded.updated_at
         WHERE channel_read_states.last_read_created_at IS NULL
            OR excluded.last_read_created_at > channel_read_states.last_read_created_at
            OR (excluded.last_read_created_at = channel_read_states.last_read_created_at
                AND excluded.last_read_message_id >= channel_read_states.last_read_message_id)",
    )
    .bind(user_id)
    .bind(channel_id)
    .bind(message_id)
    .bind(message_created_at)
    .bind(Utc::now())
    .execute(pool)
    .await?;
    Ok(())
}

pub async fn get(
    pool: &SqlitePool,
    user_id: Uuid,
    channel_id: Uuid,
) -> AppResult<Option<ChannelReadState>> {
    let state = sqlx::query_as::<_, ChannelReadState>(
        "SELECT user_id, channel_id, last_read_message_id, last_read_created_at, updated_at
         FROM channel_read_states WHERE user_id = ?1 AND channel_id = ?2",
    )
    .bind(user_id)
    .bind(channel_id)
    .fetch_optional(pool)
    .await?;
    Ok(state)
}

/// Server-side unread derivation for every text and rss channel:
/// unread iff a latest message exists and the stored cursor is missing or
/// behind it in `(created_at, id)` order.
pub async fn unread_states(pool: &SqlitePool, user_id: Uuid) -> AppResult<Vec<UnreadStateDto>> {
    let states = sqlx::query_as::<_, UnreadStateDto>(
        "SELECT c.id AS channel_id,
                CASE WHEN tail.id IS NOT NULL
                      AND (rs.last_read_created_at IS NULL
                           OR tail.created_at > rs.last_read_created_at
                           OR (tail.created_at = rs.last_read_created_at
                               AND tail.id > rs.last_read_message_id))
                     THEN 1 ELSE 0 END AS unread,
                rs.last_read_message_id, rs.last_read_created_at
         FROM channels c
         LEFT JOIN channel_read_states rs
                ON rs.channel_id = c.id AND rs.user_id = ?1
         LEFT JOIN (
             SELECT m.channel_id, m.id, m.created_at,
                    ROW_NUMBER() OVER (
                        PARTITION BY m.channel_id
                        ORDER BY m.created_at DESC, m.id DESC
                    ) AS rn
             FROM messages m
         ) tail ON tail.channel_id = c.id AND tail.rn = 1
         WHERE c.type IN ('text', 'rss')
         ORDER BY c.position ASC, c.id ASC",
    )
    .bind(user_id)
    .fetch_all(pool)
    .await?;
    Ok(states)
}
