use chrono::Utc;
use sqlx::SqlitePool;
use uuid::Uuid;

use crate::error::{AppError, AppResult};
use crate::models::{Role, User};

const USER_COLUMNS: &str = "id, username, public_key, avatar_url, last_ip, role, created_at";

pub async fn get(pool: &SqlitePool, user_id: Uuid) -> AppResult<User> {
    sqlx::query_as::<_, User>(&format!("SELECT {USER_COLUMNS} FROM users WHERE id = ?1"))
        .bind(user_id)
        .fetch_optional(pool)
        .await?
        .ok_or_else(|| AppError::NotFound("User not found".into()))
}

/// The public key is the stable identity; usernames are mutable labels.
pub async fn get_by_public_key(pool: &SqlitePool, public_key: &str) -> AppResult<Option<User>> {
    let user = sqlx::query_as::<_, User>(&format!(
        "SELECT {USER_COLUMNS} FROM users WHERE public_key = ?1"
    ))
    .bind(public_key)
    .fetch_optional(pool)
    .await?;
    Ok(user)
}

pub async fn create(pool: &SqlitePool, username: &str, public_key: &str) -> AppResult<User> {
    let id = Uuid::new_v4();
    sqlx::query(
        "INSERT INTO users (id, username, public_key, role, created_at)
         VALUES (?1, ?2, ?3, ?4, ?5)",
    )
    .bind(id)
    .bind(username)
    .bind(public_key)
    .bind(Role::User)
    .bind(Utc::now())
    .execute(pool)
    .await?;

    get(pool, id).await
}

/// Look up or lazily create the user for a fresh `auth:request`.
/// Returns `(user, is_new)` so the auth path can post the welcome message.
pub async fn get_or_create(
    pool: &SqlitePool,
    username: &str,
    public_key: &str,
) -> AppResult<(User, bool)> {
    if let Some(user) = get_by_public_key(pool, public_key).await? {
        return Ok((user, false));
    }
    let user = create(pool, username, public_key).await?;
    Ok((user, true))
}

pub async fn update_last_ip(pool: &SqlitePool, user_id: Uuid, ip: &str) -> AppResult<()> {
    sqlx::query("UPDATE users SET last_ip = ?1 WHERE id = ?2")
        .bind(ip)
        .bind(user_id)
        .execute(pool)
        .await?;
    Ok(())
}

pub async fn update_username(pool: &SqlitePool, user_id: Uuid, username: &str) -> AppResult<()> {
    sqlx::query("UPDATE users SET username = ?1 WHERE id = ?2")
        .bind(username)
        .bind(user_id)
        .execute(pool)
        .await?;
    Ok(())
}

pub async fn set_role(pool: &SqlitePool, user_id: Uuid, role: Role) -> AppResult<()> {
    sqlx::query("UPDATE users SET role = ?1 WHERE id = ?2")
        .bind(role)
        .bind(user_id)
        .execute(pool)
        .await?;
    Ok(())
}

/// Full member roster, synthetic identities included, oldest first.
pub async fn all(pool: &SqlitePool) -> AppResult<Vec<User>> {
    let users = sqlx::query_as::<_, User>(&format!(
        "SELECT {USER_COLUMNS} FROM users ORDER BY created_at ASC"
    ))
    .fetch_all(pool)
    .await?;
    Ok(users)
}

/// Idempotently create one of the built-in synthetic identities.
pub async fn ensure_synthetic(
    pool: &SqlitePool,
    username: &str,
    public_key: &str,
    role: Role,
) -> AppResult<User> {
    if let Some(user) = get_by_public_key(pool, public_key).await? {
        return Ok(user);
    }

    let id = Uuid::new_v4();
    sqlx::query(
        "INSERT INTO users (id, username, public_key, role, created_at)
         VALUES (?1, ?2, ?3, ?4, ?5)",
    )
    .bind(id)
    .bind(username)
    .bind(public_key)
    .bind(role)
    .bind(Utc::now())
    .execute(pool)
    .await?;

    get(pool, id).await
}
