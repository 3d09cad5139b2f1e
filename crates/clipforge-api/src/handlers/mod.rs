//! Request handlers.

pub mod admin;
pub mod collections;
pub mod files;
pub mod projects;

use axum::http::StatusCode;
use axum::Json;
use serde_json::json;

/// `GET /health`
pub async fn health() -> Json<serde_json::Value> {
    Json(json!({ "status": "ok" }))
}

/// `GET /ready`
pub async fn ready(
    axum::extract::State(state): axum::extract::State<crate::state::AppState>,
) -> Result<Json<serde_json::Value>, StatusCode> {
    // Readiness means the broker answers; the pool already connected at boot.
    match state.queue.dlq_len().await {
        Ok(_) => Ok(Json(json!({ "status": "ready" }))),
        Err(_) => Err(StatusCode::SERVICE_UNAVAILABLE),
    }
}
