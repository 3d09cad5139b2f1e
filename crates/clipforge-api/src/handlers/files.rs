//! Media file streaming.

use axum::body::Body;
use axum::extract::{Path, State};
use axum::http::header;
use axum::response::Response;
use tokio_util::io::ReaderStream;

use clipforge_models::{ClipId, CollectionId, ProjectId};

use crate::error::{ApiError, ApiResult};
use crate::state::AppState;

/// `GET /files/projects/{id}/clips/{cid}`
pub async fn stream_clip(
    State(state): State<AppState>,
    Path((project_id, clip_id)): Path<(String, String)>,
) -> ApiResult<Response> {
    let project_id = ProjectId::from_string(project_id);
    let clip = state.db.clips().get(&ClipId::from_string(clip_id)).await?;
    if clip.project_id != project_id {
        return Err(ApiError::not_found("clip does not belong to this project"));
    }
    let path = clip
        .output_path
        .as_deref()
        .ok_or_else(|| ApiError::not_found("clip has no cut file"))?;
    stream_file(&state, path).await
}

/// `GET /files/projects/{id}/collections/{cid}`
pub async fn stream_collection(
    State(state): State<AppState>,
    Path((project_id, collection_id)): Path<(String, String)>,
) -> ApiResult<Response> {
    let project_id = ProjectId::from_string(project_id);
    let collection = state
        .db
        .collections()
        .get(&CollectionId::from_string(collection_id))
        .await?;
    if collection.project_id != project_id {
        return Err(ApiError::not_found(
            "collection does not belong to this project",
        ));
    }
    let path = collection
        .export_path
        .as_deref()
        .ok_or_else(|| ApiError::not_found("collection has not been exported"))?;
    stream_file(&state, path).await
}

async fn stream_file(state: &AppState, path: &str) -> ApiResult<Response> {
    let file = state.store.open(std::path::Path::new(path)).await?;
    let size = file.metadata().await.ok().map(|m| m.len());

    let stream = ReaderStream::new(file);
    let mut response = Response::builder().header(header::CONTENT_TYPE, "video/mp4");
    if let Some(size) = size {
        response = response.header(header::CONTENT_LENGTH, size);
    }
    response
        .body(Body::from_stream(stream))
        .map_err(|e| ApiError::internal(format!("response build failed: {e}")))
}
