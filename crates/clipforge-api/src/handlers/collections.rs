//! Clip and collection handlers.

use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::Json;
use serde::{Deserialize, Serialize};
use validator::Validate;

use clipforge_models::{
    Clip, ClipId, Collection, CollectionId, CollectionStatus, ProjectId, Task, TaskKind, TaskStatus,
};
use clipforge_queue::RunJob;

use crate::error::{ApiError, ApiResult};
use crate::state::AppState;

/// `GET /projects/{id}/clips`
pub async fn list_clips(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> ApiResult<Json<Vec<Clip>>> {
    let id = ProjectId::from_string(id);
    // Listing a missing project is a 404, not an empty list.
    state.db.projects().get(&id).await?;
    Ok(Json(state.db.clips().list_for_project(&id).await?))
}

/// `GET /projects/{id}/collections`
pub async fn list_collections(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> ApiResult<Json<Vec<Collection>>> {
    let id = ProjectId::from_string(id);
    state.db.projects().get(&id).await?;
    Ok(Json(state.db.collections().list_for_project(&id).await?))
}

/// Reorder body: a bare JSON array of clip ids in the new order.
#[derive(Debug, Deserialize, Validate)]
#[serde(transparent)]
pub struct ReorderRequest {
    #[validate(length(min = 1, max = 500))]
    pub clip_ids: Vec<String>,
}

/// `PATCH /collections/{id}/reorder` — body is the full clip id list in the
/// new order; must be a permutation of the current members.
pub async fn reorder_collection(
    State(state): State<AppState>,
    Path(id): Path<String>,
    Json(request): Json<ReorderRequest>,
) -> ApiResult<Json<Collection>> {
    request
        .validate()
        .map_err(|e| ApiError::Validation(e.to_string()))?;

    let id = CollectionId::from_string(id);
    let clip_ids: Vec<ClipId> = request
        .clip_ids
        .into_iter()
        .map(ClipId::from_string)
        .collect();
    state.db.collections().reorder(&id, clip_ids).await?;
    Ok(Json(state.db.collections().get(&id).await?))
}

/// `DELETE /clips/{id}`
pub async fn delete_clip(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> ApiResult<StatusCode> {
    let id = ClipId::from_string(id);
    let clip = state.db.clips().get(&id).await?;

    // A clip referenced by a collection cannot silently disappear.
    let collections = state
        .db
        .collections()
        .list_for_project(&clip.project_id)
        .await?;
    if collections.iter().any(|c| c.clip_ids.contains(&id)) {
        return Err(ApiError::Conflict(
            "clip is a member of a collection; remove it there first".to_string(),
        ));
    }

    state.db.clips().delete(&id).await?;
    if let Some(path) = clip.output_path.as_deref() {
        tokio::fs::remove_file(path).await.ok();
    }
    Ok(StatusCode::NO_CONTENT)
}

/// `DELETE /collections/{id}`
pub async fn delete_collection(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> ApiResult<StatusCode> {
    let id = CollectionId::from_string(id);
    let collection = state.db.collections().get(&id).await?;
    state.db.collections().delete(&id).await?;
    if let Some(path) = collection.export_path.as_deref() {
        tokio::fs::remove_file(path).await.ok();
    }
    Ok(StatusCode::NO_CONTENT)
}

#[derive(Debug, Serialize)]
pub struct ExportResponse {
    pub task_id: String,
}

/// `POST /collections/{id}/export` — enqueue an export-class job that
/// concatenates the member clips.
pub async fn export_collection(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> ApiResult<(StatusCode, Json<ExportResponse>)> {
    let id = CollectionId::from_string(id);
    let collection = state.db.collections().get(&id).await?;
    if collection.clip_ids.is_empty() {
        return Err(ApiError::bad_request("collection has no clips to export"));
    }
    if collection.status == CollectionStatus::Exported {
        return Err(ApiError::Conflict("collection already exported".to_string()));
    }

    let task = Task::new(collection.project_id.clone(), TaskKind::Export);
    state.db.tasks().create(&task).await?;
    let job = RunJob::export(task.id.clone(), collection.project_id.clone(), id);
    if let Err(e) = state.queue.enqueue(&job).await {
        state
            .db
            .tasks()
            .finish(&task.id, TaskStatus::Failed, Some("enqueue failed"))
            .await
            .ok();
        return Err(e.into());
    }

    Ok((
        StatusCode::ACCEPTED,
        Json(ExportResponse {
            task_id: task.id.to_string(),
        }),
    ))
}
