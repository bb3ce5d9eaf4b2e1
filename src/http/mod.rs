pub mod icons;

use axum::{http::StatusCode, response::IntoResponse};

/// GET /health — liveness probe for supervisors and load balancers.
pub async fn health_check() -> impl IntoResponse {
    (StatusCode::OK, "ok")
}
