//! Project handlers: create, list, inspect, run, retry, cancel, delete.

use axum::extract::{FromRequest, Multipart, Path, Query, Request, State};
use axum::http::{header, StatusCode};
use axum::Json;
use serde::{Deserialize, Serialize};
use tracing::{info, warn};
use validator::Validate;

use clipforge_db::{NewProject, ProjectFilter};
use clipforge_models::{
    Project, ProjectCategory, ProjectId, ProjectSettings, ProjectSource, ProjectStatus, Task,
    TaskKind, TaskStatus,
};
use clipforge_queue::RunJob;

use crate::error::{ApiError, ApiResult};
use crate::security;
use crate::state::AppState;

#[derive(Debug, Deserialize, Validate)]
pub struct CreateProjectRequest {
    #[validate(length(min = 1, max = 200))]
    pub name: String,
    pub description: Option<String>,
    #[serde(default)]
    pub category: ProjectCategory,
    pub source: ProjectSource,
    #[serde(default)]
    pub settings: ProjectSettings,
}

#[derive(Debug, Serialize)]
pub struct ProjectDetail {
    #[serde(flatten)]
    pub project: Project,
    pub clips_count: u64,
}

/// `POST /projects` — JSON spec for remote sources, multipart for uploads.
pub async fn create_project(
    State(state): State<AppState>,
    request: Request,
) -> ApiResult<(StatusCode, Json<Project>)> {
    let content_type = request
        .headers()
        .get(header::CONTENT_TYPE)
        .and_then(|v| v.to_str().ok())
        .unwrap_or_default()
        .to_string();

    let project = if content_type.starts_with("multipart/form-data") {
        let multipart = Multipart::from_request(request, &())
            .await
            .map_err(|e| ApiError::bad_request(format!("invalid multipart body: {e}")))?;
        create_from_upload(&state, multipart).await?
    } else {
        let Json(body): Json<CreateProjectRequest> = Json::from_request(request, &())
            .await
            .map_err(|e| ApiError::bad_request(format!("invalid JSON body: {e}")))?;
        body.validate()
            .map_err(|e| ApiError::Validation(e.to_string()))?;
        let source = match body.source {
            ProjectSource::Upload { .. } => {
                return Err(ApiError::bad_request(
                    "upload sources require a multipart request",
                ));
            }
            ProjectSource::Remote {
                url,
                platform,
                cookie_jar_id,
            } => {
                // The URL reaches a downloader subprocess; it is validated
                // here, once, before anything is stored.
                let url = security::validate_remote_url(&url, platform)
                    .map_err(ApiError::Validation)?;
                ProjectSource::Remote {
                    url,
                    platform,
                    cookie_jar_id,
                }
            }
        };
        state
            .db
            .projects()
            .create(NewProject {
                name: body.name,
                description: body.description,
                category: body.category,
                source,
                settings: body.settings,
            })
            .await?
    };

    Ok((StatusCode::CREATED, Json(project)))
}

/// Multipart create: metadata fields plus the video (and optional SRT).
async fn create_from_upload(state: &AppState, mut multipart: Multipart) -> ApiResult<Project> {
    let mut name = None;
    let mut description = None;
    let mut category = ProjectCategory::default();
    let mut settings = ProjectSettings::default();
    let mut video: Option<(String, std::path::PathBuf)> = None;
    let mut subtitle: Option<std::path::PathBuf> = None;

    while let Some(field) = multipart
        .next_field()
        .await
        .map_err(|e| ApiError::bad_request(format!("multipart read failed: {e}")))?
    {
        match field.name().unwrap_or_default() {
            "name" => {
                name = Some(field.text().await.map_err(bad_field)?);
            }
            "description" => {
                description = Some(field.text().await.map_err(bad_field)?);
            }
            "category" => {
                let text = field.text().await.map_err(bad_field)?;
                category = serde_json::from_value(serde_json::Value::String(text.clone()))
                    .map_err(|_| ApiError::bad_request(format!("unknown category {text}")))?;
            }
            "settings" => {
                let text = field.text().await.map_err(bad_field)?;
                settings = serde_json::from_str(&text)
                    .map_err(|e| ApiError::bad_request(format!("invalid settings: {e}")))?;
            }
            "video" => {
                let file_name = field
                    .file_name()
                    .map(sanitize_file_name)
                    .filter(|n| !n.is_empty())
                    .ok_or_else(|| ApiError::bad_request("video field needs a file name"))?;
                let staged = stage_field_to_temp(state, field).await?;
                video = Some((file_name, staged));
            }
            "subtitle" => {
                let staged = stage_field_to_temp(state, field).await?;
                subtitle = Some(staged);
            }
            other => {
                warn!("ignoring unknown multipart field {other}");
            }
        }
    }

    let name = name.ok_or_else(|| ApiError::bad_request("missing field: name"))?;
    if name.trim().is_empty() {
        return Err(ApiError::bad_request("project name must not be empty"));
    }
    let (file_name, staged_video) =
        video.ok_or_else(|| ApiError::bad_request("missing field: video"))?;

    let project = state
        .db
        .projects()
        .create(NewProject {
            name,
            description,
            category,
            source: ProjectSource::Upload {
                file_name: file_name.clone(),
            },
            settings,
        })
        .await?;

    // Move the staged files into the per-project upload area the ingest
    // stage adopts from.
    let upload_dir = state.store.uploads_dir().join(project.id.as_str());
    state
        .store
        .adopt_upload(&staged_video, &upload_dir.join(&file_name))
        .await?;
    if let Some(staged_srt) = subtitle {
        state
            .store
            .adopt_upload(&staged_srt, &upload_dir.join("subtitle.srt"))
            .await?;
    }

    info!(project_id = %project.id, "project created from upload");
    Ok(project)
}

/// Stream one multipart field into a temp file.
async fn stage_field_to_temp(
    state: &AppState,
    mut field: axum::extract::multipart::Field<'_>,
) -> ApiResult<std::path::PathBuf> {
    use tokio::io::AsyncWriteExt;

    let path = state.store.scratch_path("upload");
    let mut file = tokio::fs::File::create(&path)
        .await
        .map_err(|e| ApiError::internal(format!("failed to stage upload: {e}")))?;

    while let Some(chunk) = field
        .chunk()
        .await
        .map_err(|e| ApiError::bad_request(format!("upload interrupted: {e}")))?
    {
        file.write_all(&chunk)
            .await
            .map_err(|e| ApiError::internal(format!("failed to stage upload: {e}")))?;
    }
    file.flush()
        .await
        .map_err(|e| ApiError::internal(format!("failed to stage upload: {e}")))?;

    Ok(path)
}

fn bad_field(e: axum::extract::multipart::MultipartError) -> ApiError {
    ApiError::bad_request(format!("multipart field read failed: {e}"))
}

fn sanitize_file_name(name: &str) -> String {
    std::path::Path::new(name)
        .file_name()
        .and_then(|n| n.to_str())
        .unwrap_or("video.mp4")
        .to_string()
}

#[derive(Debug, Deserialize)]
pub struct ListQuery {
    pub status: Option<String>,
    #[serde(default)]
    pub limit: u32,
    #[serde(default)]
    pub offset: u32,
}

/// `GET /projects`
pub async fn list_projects(
    State(state): State<AppState>,
    Query(query): Query<ListQuery>,
) -> ApiResult<Json<Vec<Project>>> {
    let status = match query.status.as_deref() {
        Some(s) => Some(
            ProjectStatus::parse(s)
                .ok_or_else(|| ApiError::bad_request(format!("unknown status {s}")))?,
        ),
        None => None,
    };

    let projects = state
        .db
        .projects()
        .list(ProjectFilter {
            status,
            limit: query.limit,
            offset: query.offset,
        })
        .await?;
    Ok(Json(projects))
}

/// `GET /projects/{id}`
pub async fn get_project(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> ApiResult<Json<ProjectDetail>> {
    let id = ProjectId::from_string(id);
    let project = state.db.projects().get(&id).await?;
    let clips_count = state.db.clips().count_for_project(&id).await?;
    Ok(Json(ProjectDetail {
        project,
        clips_count,
    }))
}

#[derive(Debug, Serialize)]
pub struct EnqueueResponse {
    pub task_id: String,
}

/// `POST /projects/{id}/process`
pub async fn process_project(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> ApiResult<(StatusCode, Json<EnqueueResponse>)> {
    let id = ProjectId::from_string(id);
    let project = state.db.projects().get(&id).await?;
    if project.status == ProjectStatus::Completed {
        return Err(ApiError::Conflict("project already completed".to_string()));
    }
    enqueue_run(&state, &project, false).await
}

/// `POST /projects/{id}/retry`
pub async fn retry_project(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> ApiResult<(StatusCode, Json<EnqueueResponse>)> {
    let id = ProjectId::from_string(id);
    let project = state.db.projects().get(&id).await?;
    if !matches!(
        project.status,
        ProjectStatus::Failed | ProjectStatus::Cancelled
    ) {
        return Err(ApiError::Conflict(format!(
            "retry requires a failed or cancelled project, found {}",
            project.status.as_str()
        )));
    }
    enqueue_run(&state, &project, true).await
}

async fn enqueue_run(
    state: &AppState,
    project: &Project,
    resume: bool,
) -> ApiResult<(StatusCode, Json<EnqueueResponse>)> {
    if state.db.tasks().has_active(&project.id).await? {
        return Err(ApiError::Busy(
            "a run for this project is already queued or in flight".to_string(),
        ));
    }

    // A fresh cancel flag must not kill the run we are about to start.
    state.queue.clear_cancel(&project.id).await.ok();

    let task = Task::new(project.id.clone(), TaskKind::Process);
    state.db.tasks().create(&task).await?;

    let mut job = RunJob::new(task.id.clone(), project.id.clone(), TaskKind::Process);
    if resume {
        job = job.resuming();
    }
    if let Err(e) = state.queue.enqueue(&job).await {
        // Do not leave an orphaned pending row behind a failed push.
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
        Json(EnqueueResponse {
            task_id: task.id.to_string(),
        }),
    ))
}

#[derive(Debug, Serialize)]
pub struct CancelResponse {
    pub cancelled: bool,
}

/// `POST /projects/{id}/cancel` — cooperative; a terminal project is a
/// no-op returning `cancelled: false`.
pub async fn cancel_project(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> ApiResult<Json<CancelResponse>> {
    let id = ProjectId::from_string(id);
    let project = state.db.projects().get(&id).await?;
    if project.status.is_terminal() {
        return Ok(Json(CancelResponse { cancelled: false }));
    }

    let active = state.db.tasks().has_active(&id).await?;
    if !active && project.status == ProjectStatus::Pending {
        return Ok(Json(CancelResponse { cancelled: false }));
    }

    // The flag reaches whichever worker owns the run; pending tasks observe
    // it before their first stage.
    state.queue.request_cancel(&id).await?;
    Ok(Json(CancelResponse { cancelled: true }))
}

/// `DELETE /projects/{id}` — 409 while a task is running.
pub async fn delete_project(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> ApiResult<StatusCode> {
    let id = ProjectId::from_string(id);
    state.db.projects().delete(&id).await?;

    // Content and snapshot removal is best-effort after the rows are gone.
    if let Err(e) = state.store.remove_project(&id).await {
        warn!(project_id = %id, "content removal failed: {e}");
    }
    state.fabric.drop_snapshot(&id).await.ok();

    Ok(StatusCode::NO_CONTENT)
}

#[derive(Debug, Deserialize)]
pub struct BulkDeleteRequest {
    pub ids: Vec<String>,
}

#[derive(Debug, Serialize)]
pub struct BulkDeleteResponse {
    pub deleted: Vec<String>,
    pub failed: Vec<String>,
}

/// `DELETE /projects` — bulk delete; busy or missing projects are reported,
/// not fatal.
pub async fn bulk_delete_projects(
    State(state): State<AppState>,
    Json(request): Json<BulkDeleteRequest>,
) -> ApiResult<Json<BulkDeleteResponse>> {
    let mut deleted = Vec::new();
    let mut failed = Vec::new();

    for raw_id in request.ids {
        let id = ProjectId::from_string(&raw_id);
        match state.db.projects().delete(&id).await {
            Ok(()) => {
                state.store.remove_project(&id).await.ok();
                state.fabric.drop_snapshot(&id).await.ok();
                deleted.push(raw_id);
            }
            Err(e) => {
                warn!(project_id = %id, "bulk delete skipped: {e}");
                failed.push(raw_id);
            }
        }
    }

    Ok(Json(BulkDeleteResponse { deleted, failed }))
}

/// `POST /projects/{id}/sync` — manual data-sync re-run. Flags the project;
/// the worker's sync sweeper picks it up.
pub async fn sync_project(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> ApiResult<StatusCode> {
    let id = ProjectId::from_string(id);
    let project = state.db.projects().get(&id).await?;
    if project.status != ProjectStatus::Completed {
        return Err(ApiError::Conflict(
            "data sync requires a completed project".to_string(),
        ));
    }
    state.db.projects().set_sync_pending(&id, true).await?;
    Ok(StatusCode::ACCEPTED)
}
