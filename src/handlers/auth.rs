//! Challenge-response authentication flow.
//!
//! `auth:request` evaluates ban rules against `(publicKey, ip)`, looks up
//! or creates the user, and issues a challenge. `auth:response` verifies
//! the signature, re-evaluates ban rules with the user id known, drains
//! pending moderation actions, and only then transitions the session to
//! the authenticated stage.

use std::sync::Arc;

use serde::{Deserialize, Serialize};
use serde_json::json;
use uuid::Uuid;
use validator::Validate;

use super::{parse_payload, validation_error};
use crate::auth as identity;
use crate::db;
use crate::error::{AppError, AppResult};
use crate::models::{ModerationActionDto, ServerDto, UserDto};
use crate::state::AppState;
use crate::ws::events::{
    EVENT_AUTHENTICATED, EVENT_AUTH_BANNED, EVENT_AUTH_CHALLENGE, EVENT_MEMBER_LIST,
    EVENT_MODERATION_ACTION_ENFORCED, EVENT_NEW_MESSAGE, EVENT_USER_ONLINE, EVENT_USER_UPDATED,
    EVENT_VOICE_PARTICIPANTS_LIST,
};
use crate::ws::handler::AuthStage;
use crate::ws::{
    broadcast_event, reply, SessionHandle, CLOSE_MODERATION, CLOSE_MODERATION_REASON,
};

// ============================================================================
// Payloads
// ============================================================================

#[derive(Debug, Deserialize, Validate)]
#[serde(rename_all = "camelCase")]
pub struct AuthRequest {
    #[validate(length(min = 1, max = 32, message = "Username must be 1–32 characters"))]
    pub username: String,
    pub public_key: String,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AuthResponse {
    pub signature: String,
}

/// Roster entry: user profile plus live presence.
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct MemberDto {
    #[serde(flatten)]
    user: UserDto,
    online: bool,
}

// ============================================================================
// auth:request
// ============================================================================

pub async fn handle_auth_request(
    state: &AppState,
    session: &Arc<SessionHandle>,
    stage: &mut AuthStage,
    payload: serde_json::Value,
) -> AppResult<()> {
    let req: AuthRequest = parse_payload(payload)?;
    req.validate().map_err(validation_error)?;
    let username = req.username.trim().to_string();

    let public_key = identity::canonical_public_key(&req.public_key)?;
    let ip = identity::normalize_ip(session.remote_addr);

    // At-connect ban evaluation: the user id is not known yet, so only the
    // announced key and the network address can match.
    if let Some(rule) =
        db::moderation::find_active_ban(&state.pool, None, Some(&public_key), Some(&ip)).await?
    {
        reply(
            session,
            EVENT_AUTH_BANNED,
            json!({
                "reason": rule.reason,
                "blacklistIdentity": rule.blacklist_identity,
                "blacklistIp": rule.blacklist_ip,
                "targetIp": rule.target_ip,
            }),
        );
        return Ok(());
    }

    let (user, is_new_user) = db::users::get_or_create(&state.pool, &username, &public_key).await?;

    let challenge = identity::generate_challenge();
    *stage = AuthStage::Challenged {
        challenge,
        public_key,
        user_id: user.id,
        is_new_user,
        requested_username: username,
    };

    reply(
        session,
        EVENT_AUTH_CHALLENGE,
        json!({ "challenge": hex::encode(challenge) }),
    );
    Ok(())
}

// ============================================================================
// auth:response
// ============================================================================

pub async fn handle_auth_response(
    state: &AppState,
    session: &Arc<SessionHandle>,
    stage: &mut AuthStage,
    payload: serde_json::Value,
) -> AppResult<()> {
    let (challenge, public_key, user_id, is_new_user, requested_username) = match stage {
        AuthStage::Challenged {
            challenge,
            public_key,
            user_id,
            is_new_user,
            requested_username,
        } => (
            *challenge,
            public_key.clone(),
            *user_id,
            *is_new_user,
            requested_username.clone(),
        ),
        AuthStage::Authenticated { .. } => {
            return Err(AppError::Validation("Already authenticated".into()));
        }
        AuthStage::Connected => {
            return Err(AppError::Auth("No authentication in progress".into()));
        }
    };

    let req: AuthResponse = parse_payload(payload)?;

    // Challenges are single-use: any outcome below requires a fresh
    // auth:request to retry.
    *stage = AuthStage::Connected;

    identity::verify_signature(&public_key, &challenge, &req.signature)?;

    let ip = identity::normalize_ip(session.remote_addr);
    db::users::update_last_ip(&state.pool, user_id, &ip).await?;

    // Re-evaluate ban rules now that the identity is proven.
    if let Some(rule) =
        db::moderation::find_active_ban(&state.pool, Some(user_id), Some(&public_key), Some(&ip))
            .await?
    {
        reply(
            session,
            EVENT_AUTH_BANNED,
            json!({
                "reason": rule.reason,
                "blacklistIdentity": rule.blacklist_identity,
                "blacklistIp": rule.blacklist_ip,
                "targetIp": rule.target_ip,
            }),
        );
        session.close(CLOSE_MODERATION, CLOSE_MODERATION_REASON);
        return Ok(());
    }

    // Drain moderation actions recorded while the target was offline.
    let pending = db::moderation::pending_for_user(&state.pool, user_id).await?;
    if !pending.is_empty() {
        for action in &pending {
            db::moderation::mark_enforced(&state.pool, action.id).await?;
            reply(
                session,
                EVENT_MODERATION_ACTION_ENFORCED,
                ModerationActionDto::from(action),
            );
        }
        session.close(CLOSE_MODERATION, CLOSE_MODERATION_REASON);
        return Ok(());
    }

    let mut user = db::users::get(&state.pool, user_id).await?;
    if user.username != requested_username {
        db::users::update_username(&state.pool, user_id, &requested_username).await?;
        user.username = requested_username;
        broadcast_event(state, EVENT_USER_UPDATED, UserDto::from(&user)).await;
    }

    let was_online = state.connections.is_online(user_id, None).await;
    *stage = AuthStage::Authenticated { user_id };
    state.connections.set_user(session, user_id);

    // Seed read states so pre-existing history is not reported unread.
    db::read_states::seed_for_user(&state.pool, user_id).await?;

    let server = db::servers::get(&state.pool).await?;
    reply(
        session,
        EVENT_AUTHENTICATED,
        json!({
            "user": UserDto::from(&user),
            "server": ServerDto::from(&server),
        }),
    );

    send_member_roster(state, session).await?;

    let snapshot = state.rooms.participants_snapshot().await;
    reply(
        session,
        EVENT_VOICE_PARTICIPANTS_LIST,
        json!({ "channels": snapshot }),
    );

    if !was_online {
        broadcast_event(state, EVENT_USER_ONLINE, UserDto::from(&user)).await;
    }

    if is_new_user {
        post_welcome_message(state, &user.username).await;
    }

    Ok(())
}

/// Full member roster with presence flags, sent to the fresh session.
async fn send_member_roster(state: &AppState, session: &SessionHandle) -> AppResult<()> {
    let users = db::users::all(&state.pool).await?;
    let mut members = Vec::with_capacity(users.len());
    for user in &users {
        members.push(MemberDto {
            user: UserDto::from(user),
            online: state.connections.is_online(user.id, None).await,
        });
    }

    reply(session, EVENT_MEMBER_LIST, json!({ "members": members }));
    Ok(())
}

/// Post the synthetic welcome message for a first-time user. Failures are
/// logged and swallowed; authentication has already succeeded.
async fn post_welcome_message(state: &AppState, username: &str) {
    let result: AppResult<()> = async {
        let server = db::servers::get(&state.pool).await?;
        let Some(channel_id) = server.welcome_channel_id else {
            return Ok(());
        };
        let Some(system) =
            db::users::get_by_public_key(&state.pool, db::SYSTEM_PUBLIC_KEY).await?
        else {
            return Ok(());
        };

        let content = format!("Welcome {username} to the server!");
        let message = db::messages::insert(&state.pool, channel_id, system.id, &content).await?;
        broadcast_event(
            state,
            EVENT_NEW_MESSAGE,
            crate::models::MessageDto::from(message),
        )
        .await;
        Ok(())
    }
    .await;

    if let Err(e) = result {
        tracing::warn!(
            username = %username,
            error = %e,
            "Failed to post welcome message; continuing without it"
        );
    }
}
