//! Kick and ban commands.
//!
//! Ordering is part of the contract: the message purge runs before the
//! target's sessions close so the target cannot race another message in,
//! and a ban rule is written before the target is notified.

use std::sync::Arc;

use serde::Deserialize;
use serde_json::json;
use uuid::Uuid;

use super::{parse_payload, require_moderator};
use crate::auth::normalize_ip;
use crate::db;
use crate::error::{AppError, AppResult};
use crate::models::{ActionType, DeleteMode, ModerationActionDto, User};
use crate::state::AppState;
use crate::ws::events::{
    EVENT_MEMBER_REMOVED, EVENT_MODERATION_ACTION_APPLIED, EVENT_MODERATION_ACTION_ENFORCED,
};
use crate::ws::{broadcast_event, reply, send_event_to_user, SessionHandle};

// ============================================================================
// Payloads
// ============================================================================

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ModerationRequest {
    pub user_id: Uuid,
    pub reason: Option<String>,
    #[serde(default)]
    pub delete_mode: DeleteMode,
    pub delete_hours: Option<i64>,
    /// Ban only; defaults to blacklisting the identity.
    pub blacklist_identity: Option<bool>,
    /// Ban only; requires a known target IP.
    pub blacklist_ip: Option<bool>,
}

// ============================================================================
// Handlers
// ============================================================================

pub async fn kick_member(
    state: &AppState,
    session: &Arc<SessionHandle>,
    caller: &User,
    payload: serde_json::Value,
) -> AppResult<()> {
    let req: ModerationRequest = parse_payload(payload)?;
    apply_action(state, session, caller, req, ActionType::Kick).await
}

pub async fn ban_member(
    state: &AppState,
    session: &Arc<SessionHandle>,
    caller: &User,
    payload: serde_json::Value,
) -> AppResult<()> {
    let req: ModerationRequest = parse_payload(payload)?;
    apply_action(state, session, caller, req, ActionType::Ban).await
}

async fn apply_action(
    state: &AppState,
    session: &Arc<SessionHandle>,
    caller: &User,
    req: ModerationRequest,
    action_type: ActionType,
) -> AppResult<()> {
    require_moderator(caller)?;
    if req.user_id == caller.id {
        return Err(AppError::Validation("You cannot target yourself".into()));
    }

    let target = db::users::get(&state.pool, req.user_id).await?;

    if req.delete_mode == DeleteMode::Hours {
        match req.delete_hours {
            Some(hours) if hours >= 1 => {}
            _ => {
                return Err(AppError::Validation(
                    "deleteHours must be at least 1 when deleteMode is hours".into(),
                ));
            }
        }
    }

    // Live remote address wins over the last recorded one.
    let target_ip = match state.connections.get_user_ip(target.id).await {
        Some(addr) => Some(normalize_ip(addr)),
        None => target.last_ip.clone(),
    };

    let (blacklist_identity, blacklist_ip) = match action_type {
        ActionType::Ban => {
            let identity = req.blacklist_identity.unwrap_or(true);
            let ip = req.blacklist_ip.unwrap_or(false);
            if !identity && !ip {
                return Err(AppError::Validation(
                    "A ban must blacklist identity, IP, or both".into(),
                ));
            }
            if ip && target_ip.is_none() {
                return Err(AppError::Validation(
                    "Cannot blacklist IP: no known address for the target".into(),
                ));
            }
            (identity, ip)
        }
        ActionType::Kick => (false, false),
    };

    // Purge before anything observable happens to the target's sessions.
    let purged =
        db::messages::purge_user_messages(&state.pool, target.id, req.delete_mode, req.delete_hours)
            .await?;

    let action = db::moderation::create_action(
        &state.pool,
        db::moderation::NewAction {
            target_user_id: target.id,
            moderator_user_id: caller.id,
            action_type,
            reason: req.reason.as_deref(),
            delete_mode: req.delete_mode,
            delete_hours: req.delete_hours,
            blacklist_identity,
            blacklist_ip,
            target_ip: target_ip.as_deref(),
        },
    )
    .await?;

    if action_type == ActionType::Ban {
        db::moderation::create_ban_rule(
            &state.pool,
            db::moderation::NewBanRule {
                target_user_id: Some(target.id),
                target_public_key: Some(&target.public_key),
                target_ip: target_ip.as_deref(),
                blacklist_identity,
                blacklist_ip,
                reason: req.reason.as_deref(),
                moderator_user_id: Some(caller.id),
            },
        )
        .await?;
    }

    let online = state.connections.is_online(target.id, None).await;
    if online {
        db::moderation::mark_enforced(&state.pool, action.id).await?;
    }
    let action = db::moderation::get_action(&state.pool, action.id).await?;

    tracing::info!(
        action_id = %action.id,
        target = %target.id,
        moderator = %caller.id,
        action_type = ?action_type,
        purged,
        online,
        "Moderation action applied"
    );

    broadcast_event(
        state,
        EVENT_MEMBER_REMOVED,
        json!({ "userId": target.id, "actionType": action.action_type }),
    )
    .await;

    if online {
        send_event_to_user(
            state,
            target.id,
            EVENT_MODERATION_ACTION_ENFORCED,
            ModerationActionDto::from(&action),
        )
        .await;
        state.connections.close_user_connections(target.id).await;
    }

    reply(
        session,
        EVENT_MODERATION_ACTION_APPLIED,
        json!({
            "action": ModerationActionDto::from(&action),
            "enforced": action.enforced,
            "purgedMessages": purged,
        }),
    );
    Ok(())
}
