use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use uuid::Uuid;

use crate::embeds::Embed;

// ============================================================================
// Enums
// ============================================================================

/// User role. `mod` and above may moderate; `bot` and `system` are the two
/// synthetic identities that post RSS items and welcome messages.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, sqlx::Type, strum::Display,
)]
#[serde(rename_all = "snake_case")]
#[sqlx(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum Role {
    User,
    Mod,
    Admin,
    Owner,
    Bot,
    System,
}

impl Role {
    /// Roles allowed to post into rss channels.
    pub fn can_post_rss(self) -> bool {
        matches!(
            self,
            Role::Admin | Role::Owner | Role::Mod | Role::Bot | Role::System
        )
    }

    /// Roles allowed to issue kick/ban commands.
    pub fn can_moderate(self) -> bool {
        matches!(self, Role::Admin | Role::Owner | Role::Mod)
    }

    /// Roles allowed to manage channels, files, and server settings.
    pub fn is_admin(self) -> bool {
        matches!(self, Role::Admin | Role::Owner)
    }
}

#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, sqlx::Type, strum::Display,
)]
#[serde(rename_all = "snake_case")]
#[sqlx(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum ChannelType {
    Text,
    Voice,
    Rss,
    Folder,
}

impl ChannelType {
    /// Only text and rss channels persist messages and carry read state.
    pub fn has_messages(self) -> bool {
        matches!(self, ChannelType::Text | ChannelType::Rss)
    }
}

/// Where file bytes live. Historical files keep their provider binding even
/// after the server switches.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, sqlx::Type, strum::Display,
)]
#[serde(rename_all = "snake_case")]
#[sqlx(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum StorageType {
    LocalDir,
    RemoteObjectStore,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, sqlx::Type)]
#[serde(rename_all = "snake_case")]
#[sqlx(rename_all = "snake_case")]
pub enum ActionType {
    Kick,
    Ban,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, sqlx::Type, Default)]
#[serde(rename_all = "snake_case")]
#[sqlx(rename_all = "snake_case")]
pub enum DeleteMode {
    #[default]
    None,
    Hours,
    All,
}

// ============================================================================
// Server
// ============================================================================

#[derive(Debug, Clone, FromRow)]
pub struct Server {
    pub id: Uuid,
    pub name: String,
    pub title: String,
    pub rules_channel_id: Option<Uuid>,
    pub welcome_channel_id: Option<Uuid>,
    pub icon_ref: Option<String>,
    pub storage_type: StorageType,
    pub s3_config: Option<String>,
    pub storage_last_error: Option<String>,
    pub storage_updated_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Server {
    /// Public URL for the current icon, or `None` when no icon is set.
    ///
    /// Local refs are already URL paths; remote refs carry an `s3:` marker
    /// and are exposed through the `/server-icons/s3/<key>` route.
    pub fn icon_url(&self) -> Option<String> {
        self.icon_ref.as_deref().map(|r| match r.strip_prefix("s3:") {
            Some(key) => format!("/server-icons/s3/{}", urlencoding::encode(key)),
            None => r.to_string(),
        })
    }

    pub fn parsed_s3_config(&self) -> Option<S3Config> {
        self.s3_config
            .as_deref()
            .and_then(|raw| serde_json::from_str(raw).ok())
    }
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ServerDto {
    pub id: Uuid,
    pub name: String,
    pub title: String,
    pub rules_channel_id: Option<Uuid>,
    pub welcome_channel_id: Option<Uuid>,
    pub icon_url: Option<String>,
}

impl From<&Server> for ServerDto {
    fn from(s: &Server) -> Self {
        ServerDto {
            id: s.id,
            name: s.name.clone(),
            title: s.title.clone(),
            rules_channel_id: s.rules_channel_id,
            welcome_channel_id: s.welcome_channel_id,
            icon_url: s.icon_url(),
        }
    }
}

/// Remote object store configuration, persisted as JSON in the server row.
/// The secret never leaves the server: `StorageSettingsDto` masks it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct S3Config {
    pub endpoint: String,
    pub region: String,
    pub bucket: String,
    pub access_key_id: String,
    pub secret_access_key: String,
    #[serde(default)]
    pub prefix: Option<String>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct StorageSettingsDto {
    pub storage_type: StorageType,
    pub endpoint: Option<String>,
    pub region: Option<String>,
    pub bucket: Option<String>,
    pub access_key_id: Option<String>,
    /// Always `"********"` when a secret is configured.
    pub secret_access_key: Option<String>,
    pub prefix: Option<String>,
    pub storage_last_error: Option<String>,
    pub storage_updated_at: Option<DateTime<Utc>>,
}

impl StorageSettingsDto {
    pub fn from_server(server: &Server) -> Self {
        let cfg = server.parsed_s3_config();
        StorageSettingsDto {
            storage_type: server.storage_type,
            endpoint: cfg.as_ref().map(|c| c.endpoint.clone()),
            region: cfg.as_ref().map(|c| c.region.clone()),
            bucket: cfg.as_ref().map(|c| c.bucket.clone()),
            access_key_id: cfg.as_ref().map(|c| c.access_key_id.clone()),
            secret_access_key: cfg.as_ref().map(|_| "********".to_string()),
            prefix: cfg.and_then(|c| c.prefix),
            storage_last_error: server.storage_last_error.clone(),
            storage_updated_at: server.storage_updated_at,
        }
    }
}

// ============================================================================
// User
// ============================================================================

#[derive(Debug, Clone, FromRow)]
pub struct User {
    pub id: Uuid,
    pub username: String,
    pub public_key: String,
    pub avatar_url: Option<String>,
    pub last_ip: Option<String>,
    pub role: Role,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct UserDto {
    pub id: Uuid,
    pub username: String,
    pub avatar_url: Option<String>,
    pub role: Role,
    pub created_at: DateTime<Utc>,
}

impl From<&User> for UserDto {
    fn from(u: &User) -> Self {
        UserDto {
            id: u.id,
            username: u.username.clone(),
            avatar_url: u.avatar_url.clone(),
            role: u.role,
            created_at: u.created_at,
        }
    }
}

// ============================================================================
// Categories & channels
// ============================================================================

#[derive(Debug, Clone, FromRow, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Category {
    pub id: Uuid,
    pub name: String,
    pub position: i64,
}

#[derive(Debug, Clone, FromRow)]
pub struct Channel {
    pub id: Uuid,
    pub category_id: Option<Uuid>,
    pub name: String,
    #[sqlx(rename = "type")]
    pub channel_type: ChannelType,
    pub position: i64,
    pub feed_url: Option<String>,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ChannelDto {
    pub id: Uuid,
    pub category_id: Option<Uuid>,
    pub name: String,
    #[serde(rename = "type")]
    pub channel_type: ChannelType,
    pub position: i64,
    pub feed_url: Option<String>,
    pub created_at: DateTime<Utc>,
}

impl From<&Channel> for ChannelDto {
    fn from(c: &Channel) -> Self {
        ChannelDto {
            id: c.id,
            category_id: c.category_id,
            name: c.name.clone(),
            channel_type: c.channel_type,
            position: c.position,
            feed_url: c.feed_url.clone(),
            created_at: c.created_at,
        }
    }
}

// ============================================================================
// Messages
// ============================================================================

#[derive(Debug, Clone, FromRow)]
pub struct Message {
    pub id: Uuid,
    pub channel_id: Uuid,
    pub user_id: Uuid,
    pub content: String,
    pub created_at: DateTime<Utc>,
}

/// Message joined with its author, as fetched for history pages and
/// broadcast payloads.
#[derive(Debug, Clone, FromRow)]
pub struct MessageWithAuthor {
    pub id: Uuid,
    pub channel_id: Uuid,
    pub user_id: Uuid,
    pub content: String,
    pub created_at: DateTime<Utc>,
    pub username: String,
    pub avatar_url: Option<String>,
    pub role: Role,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct MessageDto {
    pub id: Uuid,
    pub channel_id: Uuid,
    pub user_id: Uuid,
    pub username: String,
    pub avatar_url: Option<String>,
    pub role: Role,
    pub content: String,
    pub created_at: DateTime<Utc>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub embeds: Vec<Embed>,
}

impl From<MessageWithAuthor> for MessageDto {
    fn from(m: MessageWithAuthor) -> Self {
        let embeds = crate::embeds::extract_embeds(&m.content);
        MessageDto {
            id: m.id,
            channel_id: m.channel_id,
            user_id: m.user_id,
            username: m.username,
            avatar_url: m.avatar_url,
            role: m.role,
            content: m.content,
            created_at: m.created_at,
            embeds,
        }
    }
}

// ============================================================================
// Read states
// ============================================================================

#[derive(Debug, Clone, FromRow)]
pub struct ChannelReadState {
    pub user_id: Uuid,
    pub channel_id: Uuid,
    pub last_read_message_id: Option<Uuid>,
    pub last_read_created_at: Option<DateTime<Utc>>,
    pub updated_at: DateTime<Utc>,
}

/// Server-side unread derivation for one `(user, channel)`, reported only
/// for text and rss channels.
#[derive(Debug, Clone, FromRow, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct UnreadStateDto {
    pub channel_id: Uuid,
    pub unread: bool,
    pub last_read_message_id: Option<Uuid>,
    pub last_read_created_at: Option<DateTime<Utc>>,
}

// ============================================================================
// Moderation
// ============================================================================

#[derive(Debug, Clone, FromRow)]
pub struct ModerationAction {
    pub id: Uuid,
    pub target_user_id: Uuid,
    pub moderator_user_id: Uuid,
    pub action_type: ActionType,
    pub reason: Option<String>,
    pub delete_mode: DeleteMode,
    pub delete_hours: Option<i64>,
    pub blacklist_identity: bool,
    pub blacklist_ip: bool,
    pub target_ip: Option<String>,
    pub enforced: bool,
    pub created_at: DateTime<Utc>,
    pub enforced_at: Option<DateTime<Utc>>,
}

/// Payload of `moderation_action_enforced`, delivered to the target right
/// before its session closes with code 4003.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ModerationActionDto {
    pub id: Uuid,
    pub target_user_id: Uuid,
    pub action_type: ActionType,
    pub reason: Option<String>,
    pub delete_mode: DeleteMode,
    pub delete_hours: Option<i64>,
    pub created_at: DateTime<Utc>,
}

impl From<&ModerationAction> for ModerationActionDto {
    fn from(a: &ModerationAction) -> Self {
        ModerationActionDto {
            id: a.id,
            target_user_id: a.target_user_id,
            action_type: a.action_type,
            reason: a.reason.clone(),
            delete_mode: a.delete_mode,
            delete_hours: a.delete_hours,
            created_at: a.created_at,
        }
    }
}

#[derive(Debug, Clone, FromRow)]
pub struct BanRule {
    pub id: Uuid,
    pub target_user_id: Option<Uuid>,
    pub target_public_key: Option<String>,
    pub target_ip: Option<String>,
    pub blacklist_identity: bool,
    pub blacklist_ip: bool,
    pub reason: Option<String>,
    pub moderator_user_id: Option<Uuid>,
    pub active: bool,
    pub created_at: DateTime<Utc>,
    pub revoked_at: Option<DateTime<Utc>>,
}

// ============================================================================
// Folder files
// ============================================================================

#[derive(Debug, Clone, FromRow)]
pub struct FolderFile {
    pub id: Uuid,
    pub channel_id: Uuid,
    pub original_name: String,
    pub storage_name: String,
    pub storage_provider: StorageType,
    pub storage_key: Option<String>,
    pub mime_type: Option<String>,
    pub size_bytes: i64,
    pub uploader_user_id: Option<Uuid>,
    pub migrated_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct FolderFileDto {
    pub id: Uuid,
    pub channel_id: Uuid,
    pub original_name: String,
    pub mime_type: Option<String>,
    pub size_bytes: i64,
    pub uploader_user_id: Option<Uuid>,
    pub created_at: DateTime<Utc>,
}

impl From<&FolderFile> for FolderFileDto {
    fn from(f: &FolderFile) -> Self {
        FolderFileDto {
            id: f.id,
            channel_id: f.channel_id,
            original_name: f.original_name.clone(),
            mime_type: f.mime_type.clone(),
            size_bytes: f.size_bytes,
            uploader_user_id: f.uploader_user_id,
            created_at: f.created_at,
        }
    }
}

// ============================================================================
// RSS dedupe rows
// ============================================================================

#[derive(Debug, Clone, FromRow)]
pub struct RssItem {
    pub channel_id: Uuid,
    pub item_key: String,
    pub content_fingerprint: Option<String>,
    pub message_id: Option<Uuid>,
    pub created_at: DateTime<Utc>,
}
