use chrono::Utc;
use sqlx::SqlitePool;
use uuid::Uuid;

use crate::error::{AppError, AppResult};
use crate::models::{ActionType, BanRule, DeleteMode, ModerationAction};

const ACTION_COLUMNS: &str = "id, target_user_id, moderator_user_id, action_type, reason, \
     delete_mode, delete_hours, blacklist_identity, blacklist_ip, target_ip, enforced, \
     created_at, enforced_at";

const BAN_COLUMNS: &str = "id, target_user_id, target_public_key, target_ip, \
     blacklist_identity, blacklist_ip, reason, moderator_user_id, active, created_at, revoked_at";

pub struct NewAction<'a> {
    pub target_user_id: Uuid,
    pub moderator_user_id: Uuid,
    pub action_type: ActionType,
    pub reason: Option<&'a str>,
    pub delete_mode: DeleteMode,
    pub delete_hours: Option<i64>,
    pub blacklist_identity: bool,
    pub blacklist_ip: bool,
    pub target_ip: Option<&'a str>,
}

pub async fn create_action(pool: &SqlitePool, action: NewAction<'_>) -> AppResult<ModerationAction> {
    let id = Uuid::new_v4();
    sqlx::query(
        "INSERT INTO moderation_actions
             (id, target_user_id, moderator_user_id, action_type, reason, delete_mode,
              delete_hours, blacklist_identity, blacklist_ip, target_ip, enforced, created_at)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, 0, ?11)",
    )
    .bind(id)
    .bind(action.target_user_id)
    .bind(action.moderator_user_id)
    .bind(action.action_type)
    .bind(action.reason)
    .bind(action.delete_mode)
    .bind(action.delete_hours)
    .bind(action.blacklist_identity)
    .bind(action.blacklist_ip)
    .bind(action.target_ip)
    .bind(Utc::now())
    .execute(pool)
    .await?;

    get_action(pool, id).await
}

pub async fn get_action(pool: &SqlitePool, action_id: Uuid) -> AppResult<ModerationAction> {
    sqlx::query_as::<_, ModerationAction>(&format!(
        "SELECT {ACTION_COLUMNS} FROM moderation_actions WHERE id = ?1"
    ))
    .bind(action_id)
    .fetch_optional(pool)
    .await?
    .ok_or_else(|| AppError::NotFound("Moderation action not found".into()))
}

/// Actions recorded while the target was offline, awaiting enforcement at
/// its next successful auth. Oldest first.
pub async fn pending_for_user(
    pool: &SqlitePool,
    target_user_id: Uuid,
) -> AppResult<Vec<ModerationAction>> {
    let actions = sqlx::query_as::<_, ModerationAction>(&format!(
        "SELECT {ACTION_COLUMNS} FROM moderation_actions
         WHERE target_user_id = ?1 AND enforced = 0
         ORDER BY created_at ASC"
    ))
    .bind(target_user_id)
    .fetch_all(pool)
    .await?;
    Ok(actions)
}

/// Flip the write-once enforced bit. A second call on the same action is a
/// no-op so `enforced_at` keeps its first value.
pub async fn mark_enforced(pool: &SqlitePool, action_id: Uuid) -> AppResult<()> {
    sqlx::query(
        "UPDATE moderation_actions SET enforced = 1, enforced_at = ?1
         WHERE id = ?2 AND enforced = 0",
    )
    .bind(Utc::now())
    .bind(action_id)
    .execute(pool)
    .await?;
    Ok(())
}

pub struct NewBanRule<'a> {
    pub target_user_id: Option<Uuid>,
    pub target_public_key: Option<&'a str>,
    pub target_ip: Option<&'a str>,
    pub blacklist_identity: bool,
    pub blacklist_ip: bool,
    pub reason: Option<&'a str>,
    pub moderator_user_id: Option<Uuid>,
}

pub async fn create_ban_rule(pool: &SqlitePool, rule: NewBanRule<'_>) -> AppResult<BanRule> {
    if !rule.blacklist_identity && !rule.blacklist_ip {
        return Err(AppError::Validation(
            "A ban rule must blacklist identity, IP, or both".into(),
        ));
    }

    let id = Uuid::new_v4();
    sqlx::query(
        "INSERT INTO ban_rules
             (id, target_user_id, target_public_key, target_ip, blacklist_identity,
              blacklist_ip, reason, moderator_user_id, active, created_at)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, 1, ?9)",
    )
    .bind(id)
    .bind(rule.target_user_id)
    .bind(rule.target_public_key)
    .bind(rule.target_ip)
    .bind(rule.blacklist_identity)
    .bind(rule.blacklist_ip)
    .bind(rule.reason)
    .bind(rule.moderator_user_id)
    .bind(Utc::now())
    .execute(pool)
    .await?;

    let rule = sqlx::query_as::<_, BanRule>(&format!(
        "SELECT {BAN_COLUMNS} FROM ban_rules WHERE id = ?1"
    ))
    .bind(id)
    .fetch_one(pool)
    .await?;
    Ok(rule)
}

/// Evaluate active ban rules against a connecting identity.
///
/// Identity and network blacklists are orthogonal: an identity match needs
/// a user-id or public-key hit, a network match needs an IP hit. The most
/// recent matching rule wins.
pub async fn find_active_ban(
    pool: &SqlitePool,
    user_id: Option<Uuid>,
    public_key: Option<&str>,
    ip: Option<&str>,
) -> AppResult<Option<BanRule>> {
    let rule = sqlx::query_as::<_, BanRule>(&format!(
        "SELECT {BAN_COLUMNS} FROM ban_rules
         WHERE active = 1
           AND ((blacklist_identity = 1
                 AND ((target_user_id IS NOT NULL AND target_user_id = ?1)
                      OR (target_public_key IS NOT NULL AND target_public_key = ?2)))
                OR (blacklist_ip = 1 AND target_ip IS NOT NULL AND target_ip = ?3))
         ORDER BY created_at DESC
         LIMIT 1"
    ))
    .bind(user_id)
    .bind(public_key)
    .bind(ip)
    .fetch_optional(pool)
    .await?;
    Ok(rule)
}
