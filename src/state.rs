use std::sync::Arc;

use sqlx::SqlitePool;

use crate::config::Config;
use crate::media::VoiceRooms;
use crate::storage::StorageManager;
use crate::ws::ConnectionManager;

/// Shared application state passed to the gateway dispatcher, background
/// tasks, and the HTTP surface.
///
/// `ConnectionManager` wraps an `Arc` internally; everything else is held
/// behind explicit `Arc`s, so cloning `AppState` is inexpensive.
#[derive(Clone)]
pub struct AppState {
    pub pool: SqlitePool,
    pub connections: ConnectionManager,
    /// In-memory voice rooms, owned by the SFU coordinator.
    pub rooms: Arc<VoiceRooms>,
    /// Local data-directory backend plus the cached remote client.
    pub storage: Arc<StorageManager>,
    /// Process-scoped admin elevation key.
    pub admin_key: Arc<str>,
    pub config: Arc<Config>,
}
