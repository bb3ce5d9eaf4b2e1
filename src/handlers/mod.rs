//! Gateway request handlers.
//!
//! Each handler consumes one envelope payload, touches the DAL / storage /
//! SFU as needed, replies to the calling session, and fans events out
//! through the connection manager. Validation and authorization failures
//! surface as `error{message}` replies; the session always survives them.

pub mod auth;
pub mod channels;
pub mod folder;
pub mod messages;
pub mod moderation;
pub mod server_settings;
pub mod voice;

use serde::de::DeserializeOwned;

use crate::error::{AppError, AppResult};
use crate::models::{Role, User};

/// Deserialize an envelope payload into its typed request.
pub fn parse_payload<T: DeserializeOwned>(payload: serde_json::Value) -> AppResult<T> {
    serde_json::from_value(payload)
        .map_err(|e| AppError::Validation(format!("Invalid payload: {e}")))
}

/// Distinguish an absent field from an explicit null: absent stays `None`
/// (via `#[serde(default)]`), null becomes `Some(None)`.
pub fn double_option<'de, T, D>(deserializer: D) -> Result<Option<Option<T>>, D::Error>
where
    T: serde::Deserialize<'de>,
    D: serde::Deserializer<'de>,
{
    serde::Deserialize::deserialize(deserializer).map(Some)
}

/// Convert [`validator::ValidationErrors`] into an [`AppError::Validation`]
/// with a human-readable message.
pub fn validation_error(e: validator::ValidationErrors) -> AppError {
    AppError::Validation(
        e.field_errors()
            .values()
            .flat_map(|v| v.iter())
            .filter_map(|e| e.message.as_ref())
            .map(|m| m.to_string())
            .collect::<Vec<_>>()
            .join(", "),
    )
}

/// Admin-gated operations: channel management, folder writes, settings.
pub fn require_admin(caller: &User) -> AppResult<()> {
    if !caller.role.is_admin() {
        return Err(AppError::Forbidden("Admin role required".into()));
    }
    Ok(())
}

/// Moderation commands accept moderators and above.
pub fn require_moderator(caller: &User) -> AppResult<()> {
    if !caller.role.can_moderate() {
        return Err(AppError::Forbidden("Moderator role required".into()));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use uuid::Uuid;

    fn user_with_role(role: Role) -> User {
        User {
            id: Uuid::new_v4(),
            username: "tester".into(),
            public_key: "pk".into(),
            avatar_url: None,
            last_ip: None,
            role,
            created_at: Utc::now(),
        }
    }

    #[test]
    fn admin_gate() {
        assert!(require_admin(&user_with_role(Role::Admin)).is_ok());
        assert!(require_admin(&user_with_role(Role::Owner)).is_ok());
        assert!(require_admin(&user_with_role(Role::Mod)).is_err());
        assert!(require_admin(&user_with_role(Role::User)).is_err());
    }

    #[test]
    fn moderator_gate() {
        assert!(require_moderator(&user_with_role(Role::Mod)).is_ok());
        assert!(require_moderator(&user_with_role(Role::Admin)).is_ok());
        assert!(require_moderator(&user_with_role(Role::Bot)).is_err());
        assert!(require_moderator(&user_with_role(Role::User)).is_err());
    }
}
