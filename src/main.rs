use axum::{
    http::{header, HeaderValue, Method},
    routing::get,
    Router,
};
use tower_http::cors::{AllowOrigin, CorsLayer};
use tower_http::set_header::SetResponseHeaderLayer;
use tower_http::trace::TraceLayer;
use tracing::info;
use tracing_subscriber::EnvFilter;

use std::net::SocketAddr;
use std::sync::Arc;

use bastion_server::config::Config;
use bastion_server::media::{MediaEngine, VoiceRooms};
use bastion_server::state::AppState;
use bastion_server::storage::StorageManager;
use bastion_server::ws::ConnectionManager;
use bastion_server::{db, http, rss, ws};

#[tokio::main]
async fn main() {
    // Initialize tracing — JSON in production, human-readable in dev.
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| {
        "bastion_server=info,tower_http=info,sqlx=warn"
            .parse()
            .unwrap()
    });

    if std::env::var("APP_ENV").as_deref() == Ok("production") {
        tracing_subscriber::fmt()
            .json()
            .with_env_filter(filter)
            .init();
    } else {
        tracing_subscriber::fmt().with_env_filter(filter).init();
    }

    info!("🚀 Bastion hub starting...");

    let config = Config::from_env().expect("Failed to load configuration");
    info!("📝 Configuration loaded");

    if config.admin_key_from_env {
        info!("🔑 Admin key taken from ADMIN_KEY");
    } else {
        // Logged exactly once; the key changes on every restart.
        info!("🔑 Admin key for this process: {}", config.admin_key);
    }

    tokio::fs::create_dir_all(&config.data_dir)
        .await
        .expect("Failed to create data directory");
    info!("📂 Data directory: {}", config.data_dir.display());

    let pool = db::create_pool(&config.database_path)
        .await
        .expect("Failed to create database pool");

    // Schema-ready barrier: the listener does not bind until every
    // migration has been applied.
    sqlx::migrate!("./migrations")
        .run(&pool)
        .await
        .expect("Failed to run database migrations");
    info!("✅ Database migrations applied");

    db::health_check(&pool)
        .await
        .expect("Database health check failed");

    db::bootstrap(&pool)
        .await
        .expect("Failed to bootstrap server row and synthetic users");
    info!("✅ Database ready");

    // The SFU worker is fatal infrastructure: no worker, no hub.
    let engine = MediaEngine::new(&config)
        .await
        .expect("Failed to start SFU worker");
    info!("🎙️ SFU worker running");

    // CORS: permissive in dev, origin-restricted in production.
    let cors = if config.is_dev {
        info!("🔓 CORS: permissive (dev mode)");
        CorsLayer::permissive()
    } else {
        let origins: Vec<HeaderValue> = config
            .allowed_origins
            .iter()
            .filter_map(|o| o.parse().ok())
            .collect();
        if origins.is_empty() {
            tracing::warn!(
                "🔒 CORS: no ALLOWED_ORIGINS configured — all cross-origin requests will be denied"
            );
        } else {
            info!(
                "🔒 CORS: production mode, allowing origins: {:?}",
                config.allowed_origins
            );
        }
        CorsLayer::new()
            .allow_origin(AllowOrigin::list(origins))
            .allow_methods([Method::GET])
            .allow_headers([header::CONTENT_TYPE])
    };

    let bind_addr = config.bind_addr;
    let app_state = AppState {
        pool,
        connections: ConnectionManager::new(),
        rooms: Arc::new(VoiceRooms::new(engine)),
        storage: Arc::new(StorageManager::new(config.data_dir.clone())),
        admin_key: Arc::from(config.admin_key.as_str()),
        config: Arc::new(config),
    };

    // Background tasks: keep-alive ticker and RSS poller.
    ws::spawn_keepalive(app_state.clone());
    rss::spawn(app_state.clone());

    let app = Router::new()
        .route("/health", get(http::health_check))
        // Auth-free icon read path; both the local and the s3 form.
        .route(
            "/server-icons/:server_id/:file_name",
            get(http::icons::serve_icon),
        )
        // WebSocket gateway
        .route("/ws", get(ws::websocket_handler))
        // ── Security response headers ──────────────────────────────────────
        .layer(SetResponseHeaderLayer::if_not_present(
            header::HeaderName::from_static("x-content-type-options"),
            HeaderValue::from_static("nosniff"),
        ))
        .layer(SetResponseHeaderLayer::if_not_present(
            header::HeaderName::from_static("x-frame-options"),
            HeaderValue::from_static("DENY"),
        ))
        .layer(TraceLayer::new_for_http())
        .layer(cors)
        .with_state(app_state);

    info!("🎧 Hub listening on http://{}", bind_addr);

    let listener = tokio::net::TcpListener::bind(&bind_addr)
        .await
        .expect("Failed to bind to address");

    // `into_make_service_with_connect_info` populates
    // `ConnectInfo<SocketAddr>`, which the gateway needs for ban rules and
    // moderation IP capture.
    axum::serve(
        listener,
        app.into_make_service_with_connect_info::<SocketAddr>(),
    )
    .await
    .expect("Server failed to start");
}
