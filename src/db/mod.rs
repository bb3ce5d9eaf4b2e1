//! Data-access layer.
//!
//! Typed operations over the hub's entities, one module per entity family.
//! All writes serialize through SQLite; dedupe reservations rely on the
//! engine's unique-constraint atomicity (`INSERT OR IGNORE`).

pub mod channels;
pub mod folder_files;
pub mod messages;
pub mod moderation;
pub mod read_states;
pub mod rss_items;
pub mod servers;
pub mod users;

use std::path::Path;
use std::time::Duration;

use sqlx::sqlite::{SqliteConnectOptions, SqlitePoolOptions};
use sqlx::SqlitePool;
use tracing::info;

use crate::error::{AppError, AppResult};
use crate::models::Role;

/// Synthetic identity that signs welcome and housekeeping messages.
pub const SYSTEM_USERNAME: &str = "System";
pub const SYSTEM_PUBLIC_KEY: &str = "internal:system";

/// Synthetic identity that signs published feed items.
pub const RSS_BOT_USERNAME: &str = "RSS Bot";
pub const RSS_BOT_PUBLIC_KEY: &str = "internal:rss-bot";

pub async fn create_pool(database_path: &Path) -> AppResult<SqlitePool> {
    info!("🔌 Connecting to database...");

    if let Some(parent) = database_path.parent() {
        if !parent.as_os_str().is_empty() {
            std::fs::create_dir_all(parent).map_err(|e| {
                tracing::error!(path = %parent.display(), error = ?e, "Failed to create database directory");
                AppError::Internal
            })?;
        }
    }

    let options = SqliteConnectOptions::new()
        .filename(database_path)
        .create_if_missing(true)
        .foreign_keys(true)
        .journal_mode(sqlx::sqlite::SqliteJournalMode::Wal)
        .busy_timeout(Duration::from_secs(5));

    let pool = SqlitePoolOptions::new()
        .max_connections(5)
        .acquire_timeout(Duration::from_secs(5))
        .connect_with(options)
        .await
        .map_err(|e| {
            tracing::error!("Failed to connect to database: {:?}", e);
            AppError::Database(e)
        })?;

    info!("✅ Database connection pool created");
    Ok(pool)
}

/// Single-connection in-memory pool for tests. One connection only, since
/// every SQLite `:memory:` connection is its own database.
pub async fn create_memory_pool() -> AppResult<SqlitePool> {
    let options = SqliteConnectOptions::new()
        .filename(":memory:")
        .foreign_keys(true);

    let pool = SqlitePoolOptions::new()
        .max_connections(1)
        .connect_with(options)
        .await
        .map_err(AppError::Database)?;

    Ok(pool)
}

pub async fn health_check(pool: &SqlitePool) -> AppResult<()> {
    sqlx::query("SELECT 1")
        .execute(pool)
        .await
        .map_err(AppError::Database)?;

    Ok(())
}

/// Ensure the singleton server row and the two synthetic identities exist.
/// Idempotent; runs after migrations, before the listener binds.
pub async fn bootstrap(pool: &SqlitePool) -> AppResult<()> {
    servers::ensure(pool).await?;
    users::ensure_synthetic(pool, SYSTEM_USERNAME, SYSTEM_PUBLIC_KEY, Role::System).await?;
    users::ensure_synthetic(pool, RSS_BOT_USERNAME, RSS_BOT_PUBLIC_KEY, Role::Bot).await?;
    Ok(())
}
