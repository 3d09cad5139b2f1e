//! API routes.

use axum::extract::DefaultBodyLimit;
use axum::routing::{delete, get, patch, post};
use axum::Router;
use metrics_exporter_prometheus::PrometheusHandle;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;

use crate::handlers::admin::queue_status;
use crate::handlers::collections::{
    delete_clip, delete_collection, export_collection, list_clips, list_collections,
    reorder_collection,
};
use crate::handlers::files::{stream_clip, stream_collection};
use crate::handlers::projects::{
    bulk_delete_projects, cancel_project, create_project, delete_project, get_project,
    list_projects, process_project, retry_project, sync_project,
};
use crate::handlers::{health, ready};
use crate::state::AppState;
use crate::ws::ws_handler;

/// Create the API router.
pub fn create_router(state: AppState, metrics_handle: Option<PrometheusHandle>) -> Router {
    let project_routes = Router::new()
        .route("/projects", post(create_project))
        .route("/projects", get(list_projects))
        .route("/projects", delete(bulk_delete_projects))
        .route("/projects/:id", get(get_project))
        .route("/projects/:id", delete(delete_project))
        .route("/projects/:id/process", post(process_project))
        .route("/projects/:id/retry", post(retry_project))
        .route("/projects/:id/cancel", post(cancel_project))
        .route("/projects/:id/sync", post(sync_project))
        .route("/projects/:id/clips", get(list_clips))
        .route("/projects/:id/collections", get(list_collections));

    let collection_routes = Router::new()
        .route("/collections/:id/reorder", patch(reorder_collection))
        .route("/collections/:id", delete(delete_collection))
        .route("/collections/:id/export", post(export_collection))
        .route("/clips/:id", delete(delete_clip));

    let file_routes = Router::new()
        .route("/files/projects/:id/clips/:cid", get(stream_clip))
        .route(
            "/files/projects/:id/collections/:cid",
            get(stream_collection),
        );

    let admin_routes = Router::new().route("/admin/queue/status", get(queue_status));

    let api_routes = Router::new()
        .merge(project_routes)
        .merge(collection_routes)
        .merge(file_routes)
        .merge(admin_routes)
        .layer(DefaultBodyLimit::max(state.config.max_body_size));

    let health_routes = Router::new()
        .route("/health", get(health))
        .route("/ready", get(ready));

    let metrics_routes = if let Some(handle) = metrics_handle {
        Router::new().route("/metrics", get(move || async move { handle.render() }))
    } else {
        Router::new()
    };

    Router::new()
        .nest("/api/v1", api_routes)
        .route("/ws", get(ws_handler))
        .merge(health_routes)
        .merge(metrics_routes)
        .layer(TraceLayer::new_for_http())
        .layer(cors_layer(&state.config.cors_origins))
        .with_state(state)
}

fn cors_layer(origins: &[String]) -> CorsLayer {
    if origins.iter().any(|o| o == "*") {
        CorsLayer::new()
            .allow_origin(Any)
            .allow_methods(Any)
            .allow_headers(Any)
    } else {
        let parsed: Vec<axum::http::HeaderValue> = origins
            .iter()
            .filter_map(|o| o.parse().ok())
            .collect();
        CorsLayer::new()
            .allow_origin(parsed)
            .allow_methods(Any)
            .allow_headers(Any)
    }
}
