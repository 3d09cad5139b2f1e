//! Queue introspection.

use axum::extract::State;
use axum::Json;
use serde::Serialize;

use clipforge_queue::Priority;

use crate::error::ApiResult;
use crate::state::AppState;

#[derive(Debug, Serialize)]
pub struct QueueStatus {
    pub processing: u64,
    pub export: u64,
    pub maintenance: u64,
    pub dlq: u64,
}

/// `GET /admin/queue/status`
pub async fn queue_status(State(state): State<AppState>) -> ApiResult<Json<QueueStatus>> {
    Ok(Json(QueueStatus {
        processing: state.queue.len(Priority::Processing).await?,
        export: state.queue.len(Priority::Export).await?,
        maintenance: state.queue.len(Priority::Maintenance).await?,
        dlq: state.queue.dlq_len().await?,
    }))
}
