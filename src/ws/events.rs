use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Envelope for all gateway traffic, both directions:
/// `{"type": "...", "payload": {...}}`.
#[derive(Debug, Serialize, Deserialize)]
pub struct Envelope {
    pub r#type: String,
    #[serde(default)]
    pub payload: Value,
}

impl Envelope {
    /// Serialize an outbound event. Serialization of our own DTOs cannot
    /// fail; a failure here is a programming error and yields an `error`
    /// frame instead of a crash.
    pub fn event(event_type: &str, payload: impl Serialize) -> String {
        match serde_json::to_value(payload) {
            Ok(value) => serde_json::to_string(&Envelope {
                r#type: event_type.to_owned(),
                payload: value,
            })
            .unwrap_or_else(|_| error_frame("Internal server error")),
            Err(e) => {
                tracing::error!(event_type = %event_type, error = ?e, "Failed to serialize event payload; this is a programming error");
                error_frame("Internal server error")
            }
        }
    }
}

/// Shorthand for the `error{message}` reply frame.
pub fn error_frame(message: &str) -> String {
    format!(
        "{{\"type\":\"error\",\"payload\":{{\"message\":{}}}}}",
        serde_json::Value::String(message.to_owned())
    )
}

/// Map legacy uppercase envelope types onto their current form. Everything
/// else passes through unchanged.
pub fn normalize_type(raw: &str) -> &str {
    match raw {
        "UPDATE_SERVER_SETTINGS" | "CREATE_SERVER" => "update_server_settings",
        "JOIN_SERVER" => "get_channels",
        other => other,
    }
}

// ── Server-to-client event type strings ──────────────────────────────────────

pub const EVENT_AUTH_CHALLENGE: &str = "auth:challenge";
pub const EVENT_AUTH_BANNED: &str = "auth:banned";
pub const EVENT_AUTHENTICATED: &str = "authenticated";
pub const EVENT_MEMBER_LIST: &str = "member_list";
pub const EVENT_USER_ONLINE: &str = "user_online";
pub const EVENT_USER_OFFLINE: &str = "user_offline";
pub const EVENT_USER_UPDATED: &str = "user_updated";
pub const EVENT_CHANNELS_LIST: &str = "channels_list";
pub const EVENT_CHANNEL_CREATED: &str = "channel_created";
pub const EVENT_CHANNEL_DELETED: &str = "channel_deleted";
pub const EVENT_MESSAGES_LIST: &str = "messages_list";
pub const EVENT_NEW_MESSAGE: &str = "new_message";
pub const EVENT_FOLDER_FILES_LIST: &str = "folder_files_list";
pub const EVENT_FOLDER_FILE_UPLOADED: &str = "folder_file_uploaded";
pub const EVENT_FOLDER_FILE_DOWNLOAD: &str = "folder_file_download";
pub const EVENT_FOLDER_FILE_DELETED: &str = "folder_file_deleted";
pub const EVENT_FOLDER_UPLOAD_SUCCESS: &str = "folder_upload_success";
pub const EVENT_FOLDER_DELETE_SUCCESS: &str = "folder_delete_success";
pub const EVENT_VOICE_PARTICIPANTS_LIST: &str = "voice_participants_list";
pub const EVENT_VOICE_CHANNEL_JOINED: &str = "voice_channel_joined";
pub const EVENT_USER_JOINED_VOICE: &str = "user_joined_voice";
pub const EVENT_USER_LEFT_VOICE: &str = "user_left_voice";
pub const EVENT_WEBRTC_TRANSPORT_CREATED: &str = "webrtc_transport_created";
pub const EVENT_WEBRTC_TRANSPORT_CONNECTED: &str = "webrtc_transport_connected";
pub const EVENT_PRODUCED: &str = "produced";
pub const EVENT_NEW_PRODUCER: &str = "new_producer";
pub const EVENT_PRODUCER_CLOSED: &str = "producer_closed";
pub const EVENT_CONSUMED: &str = "consumed";
pub const EVENT_VOICE_STATE_UPDATED: &str = "voice_state_updated";
pub const EVENT_SERVER_SETTINGS_UPDATED: &str = "server_settings_updated";
/// Legacy alias broadcast alongside `server_settings_updated`.
pub const EVENT_SERVER_UPDATED_LEGACY: &str = "SERVER_UPDATED";
pub const EVENT_SERVER_STORAGE_SETTINGS: &str = "server_storage_settings";
pub const EVENT_SERVER_STORAGE_TEST_RESULT: &str = "server_storage_test_result";
pub const EVENT_MODERATION_ACTION_ENFORCED: &str = "moderation_action_enforced";
pub const EVENT_MODERATION_ACTION_APPLIED: &str = "moderation_action_applied";
pub const EVENT_MEMBER_REMOVED: &str = "member_removed";
pub const EVENT_ROLE_UPDATED: &str = "role_updated";
pub const EVENT_PONG: &str = "pong";

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn envelope_round_trips() {
        let frame = Envelope::event(EVENT_PONG, json!({}));
        let parsed: Envelope = serde_json::from_str(&frame).unwrap();
        assert_eq!(parsed.r#type, "pong");
    }

    #[test]
    fn missing_payload_defaults_to_null() {
        let parsed: Envelope = serde_json::from_str(r#"{"type":"ping"}"#).unwrap();
        assert_eq!(parsed.r#type, "ping");
        assert!(parsed.payload.is_null());
    }

    #[test]
    fn legacy_aliases_are_normalized() {
        assert_eq!(normalize_type("UPDATE_SERVER_SETTINGS"), "update_server_settings");
        assert_eq!(normalize_type("CREATE_SERVER"), "update_server_settings");
        assert_eq!(normalize_type("JOIN_SERVER"), "get_channels");
        assert_eq!(normalize_type("send_message"), "send_message");
    }

    #[test]
    fn error_frame_escapes_message() {
        let frame = error_frame("a \"quoted\" message");
        let parsed: Envelope = serde_json::from_str(&frame).unwrap();
        assert_eq!(parsed.r#type, "error");
        assert_eq!(parsed.payload["message"], "a \"quoted\" message");
    }
}
