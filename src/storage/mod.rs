//! Pluggable object storage.
//!
//! File bytes live either under the local data directory or in a remote
//! S3-compatible bucket. The server row selects the provider for new
//! writes; every file row keeps its own provider binding so historical
//! files stay readable after a switch.

pub mod local;
pub mod migration;
pub mod s3;

use std::path::PathBuf;

use once_cell::sync::Lazy;
use regex::Regex;
use tokio::sync::RwLock;

use crate::error::{AppError, AppResult};
use crate::models::S3Config;

/// Extensions refused on upload. Matching is case-insensitive on the final
/// dot-separated segment of the sanitized name.
const BLOCKED_EXTENSIONS: &[&str] = &[
    "exe", "dll", "so", "bat", "cmd", "com", "msi", "scr", "pif", "ps1", "psm1", "sh", "bash",
    "zsh", "csh", "jar", "app", "apk", "deb", "rpm", "vbs", "js", "mjs", "wsf", "cpl", "msc",
    "hta", "gadget",
];

/// Gate for any user-visible server id that reaches the filesystem.
static SAFE_ID_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^[A-Za-z0-9-]+$").expect("valid safe-id regex"));

/// Icon extensions accepted for server icons; jpeg normalizes to jpg.
const ICON_EXTENSIONS: &[&str] = &["png", "jpg", "jpeg", "webp", "gif"];

// ============================================================================
// Manager
// ============================================================================

/// Shared storage handle: the local backend plus a cached remote client
/// rebuilt whenever the active configuration changes.
pub struct StorageManager {
    pub local: local::LocalStorage,
    s3_cache: RwLock<Option<(S3Config, s3::S3Storage)>>,
}

impl StorageManager {
    pub fn new(data_dir: PathBuf) -> Self {
        StorageManager {
            local: local::LocalStorage::new(data_dir),
            s3_cache: RwLock::new(None),
        }
    }

    /// Remote backend for the given configuration, reusing the cached
    /// client when the configuration is unchanged.
    pub async fn s3(&self, config: &S3Config) -> AppResult<s3::S3Storage> {
        {
            let cache = self.s3_cache.read().await;
            if let Some((cached_config, storage)) = cache.as_ref() {
                if cached_config == config {
                    return Ok(storage.clone());
                }
            }
        }

        let storage = s3::S3Storage::connect(config).await?;
        *self.s3_cache.write().await = Some((config.clone(), storage.clone()));
        Ok(storage)
    }
}

// ============================================================================
// Key derivation
// ============================================================================

/// Remote key for a folder file: `<prefix?>/channels/<channelId>/<name>`.
pub fn folder_remote_key(prefix: Option<&str>, channel_id: uuid::Uuid, storage_name: &str) -> String {
    match prefix {
        Some(p) => format!("{p}/channels/{channel_id}/{storage_name}"),
        None => format!("channels/{channel_id}/{storage_name}"),
    }
}

/// Local path for a folder file, relative to the data root.
pub fn folder_local_rel_path(channel_id: uuid::Uuid, storage_name: &str) -> String {
    format!("files/{channel_id}/{storage_name}")
}

/// Remote key for a server icon:
/// `<prefix?>/channels/server-icons/<serverId>/<name>`.
pub fn icon_remote_key(prefix: Option<&str>, server_id: &str, storage_name: &str) -> String {
    match prefix {
        Some(p) => format!("{p}/channels/server-icons/{server_id}/{storage_name}"),
        None => format!("channels/server-icons/{server_id}/{storage_name}"),
    }
}

/// Local path for a server icon, relative to the data root.
pub fn icon_local_rel_path(server_id: &str, storage_name: &str) -> String {
    format!("server-icons/{server_id}/{storage_name}")
}

// ============================================================================
// Name and id safety
// ============================================================================

/// True when the id is safe to embed in a filesystem path.
pub fn is_safe_id(id: &str) -> bool {
    SAFE_ID_RE.is_match(id)
}

/// Strip path separators and control characters from a client-supplied
/// filename and cap its length. An emptied name falls back to `file`.
pub fn sanitize_filename(name: &str) -> String {
    let sanitized: String = name
        .chars()
        .filter(|c| !c.is_control())
        .map(|c| match c {
            '/' | '\\' | ':' => '_',
            other => other,
        })
        .take(128)
        .collect();

    // Trailing dots and spaces confuse both Windows and extension checks.
    let trimmed = sanitized.trim_start_matches(' ').trim_end_matches([' ', '.']);
    if trimmed.is_empty() {
        "file".to_string()
    } else {
        trimmed.to_string()
    }
}

/// Lowercased final extension of a sanitized filename, if any.
pub fn file_extension(name: &str) -> Option<String> {
    let (stem, ext) = name.rsplit_once('.')?;
    if stem.is_empty() || ext.is_empty() {
        return None;
    }
    Some(ext.to_ascii_lowercase())
}

/// Reject executable-like uploads by extension.
pub fn check_extension_allowed(name: &str) -> AppResult<()> {
    if let Some(ext) = file_extension(name) {
        if BLOCKED_EXTENSIONS.contains(&ext.as_str()) {
            return Err(AppError::Validation(format!(
                "Files with the .{ext} extension are not allowed"
            )));
        }
    }
    Ok(())
}

/// Normalized icon extension for a data-URL MIME type; jpeg becomes jpg.
pub fn icon_extension_for_mime(mime: &str) -> Option<&'static str> {
    match mime {
        "image/png" => Some("png"),
        "image/jpeg" | "image/jpg" => Some("jpg"),
        "image/webp" => Some("webp"),
        "image/gif" => Some("gif"),
        _ => None,
    }
}

/// Content type served for a stored icon name, derived from its extension.
pub fn icon_content_type(storage_name: &str) -> Option<&'static str> {
    let ext = file_extension(storage_name)?;
    if !ICON_EXTENSIONS.contains(&ext.as_str()) {
        return None;
    }
    match ext.as_str() {
        "png" => Some("image/png"),
        "jpg" | "jpeg" => Some("image/jpeg"),
        "webp" => Some("image/webp"),
        "gif" => Some("image/gif"),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sanitize_strips_separators_and_controls() {
        assert_eq!(sanitize_filename("report.pdf"), "report.pdf");
        assert_eq!(sanitize_filename("../../etc/passwd"), ".._.._etc_passwd");
        assert_eq!(sanitize_filename("a\\b:c.txt"), "a_b_c.txt");
        assert_eq!(sanitize_filename("bad\u{0000}name\u{0007}.txt"), "badname.txt");
        assert_eq!(sanitize_filename(""), "file");
        assert_eq!(sanitize_filename("..."), "file");
    }

    #[test]
    fn blocked_extensions_are_rejected() {
        assert!(check_extension_allowed("setup.exe").is_err());
        assert!(check_extension_allowed("SCRIPT.SH").is_err());
        assert!(check_extension_allowed("notes.txt").is_ok());
        assert!(check_extension_allowed("archive.tar.gz").is_ok());
        assert!(check_extension_allowed("no-extension").is_ok());
    }

    #[test]
    fn safe_id_gate() {
        assert!(is_safe_id("550e8400-e29b-41d4-a716-446655440000"));
        assert!(!is_safe_id("../escape"));
        assert!(!is_safe_id("id with spaces"));
        assert!(!is_safe_id(""));
    }

    #[test]
    fn folder_keys_include_optional_prefix() {
        let channel = uuid::Uuid::nil();
        assert_eq!(
            folder_remote_key(None, channel, "a.txt"),
            format!("channels/{channel}/a.txt")
        );
        assert_eq!(
            folder_remote_key(Some("hub"), channel, "a.txt"),
            format!("hub/channels/{channel}/a.txt")
        );
        assert_eq!(
            folder_local_rel_path(channel, "a.txt"),
            format!("files/{channel}/a.txt")
        );
    }

    #[test]
    fn icon_mime_and_extension_mapping() {
        assert_eq!(icon_extension_for_mime("image/jpeg"), Some("jpg"));
        assert_eq!(icon_extension_for_mime("image/png"), Some("png"));
        assert_eq!(icon_extension_for_mime("text/html"), None);

        assert_eq!(icon_content_type("icon.jpg"), Some("image/jpeg"));
        assert_eq!(icon_content_type("icon.webp"), Some("image/webp"));
        assert_eq!(icon_content_type("icon.svg"), None);
    }
}
