//! Project repository.

use chrono::{DateTime, Utc};
use metrics::counter;
use sqlx::any::AnyRow;
use sqlx::{AnyPool, Row};
use tracing::info;

use clipforge_models::{
    ErrorInfo, Project, ProjectCategory, ProjectId, ProjectSettings, ProjectSource, ProjectStatus,
};

use crate::error::{DbError, DbResult};
use crate::time;

/// Specification for a new project row.
#[derive(Debug, Clone)]
pub struct NewProject {
    pub name: String,
    pub description: Option<String>,
    pub category: ProjectCategory,
    pub source: ProjectSource,
    pub settings: ProjectSettings,
}

/// Listing filter.
#[derive(Debug, Clone, Default)]
pub struct ProjectFilter {
    pub status: Option<ProjectStatus>,
    pub limit: u32,
    pub offset: u32,
}

impl ProjectFilter {
    pub fn page(limit: u32, offset: u32) -> Self {
        Self {
            status: None,
            limit,
            offset,
        }
    }
}

/// Optional row fields written together with a status transition.
#[derive(Debug, Clone, Default)]
pub struct StatusFields {
    pub progress: Option<u8>,
    pub current_stage: Option<u8>,
    pub error: Option<ErrorInfo>,
    /// Clear a stored error record (retry path).
    pub clear_error: bool,
    pub completed_at: Option<DateTime<Utc>>,
}

/// Repository for project rows.
#[derive(Debug, Clone)]
pub struct ProjectRepository {
    pool: AnyPool,
}

impl ProjectRepository {
    pub fn new(pool: AnyPool) -> Self {
        Self { pool }
    }

    /// Create a project row. Fails with `InvalidArgument` on a malformed spec.
    pub async fn create(&self, spec: NewProject) -> DbResult<Project> {
        if spec.name.trim().is_empty() {
            return Err(DbError::invalid_argument("project name must not be empty"));
        }
        if let ProjectSource::Remote { url, .. } = &spec.source {
            if url.trim().is_empty() {
                return Err(DbError::invalid_argument("remote source url must not be empty"));
            }
        }

        let mut project = Project::new(spec.name, spec.source).with_settings(spec.settings);
        project.category = spec.category;
        project.description = spec.description;

        sqlx::query(
            "INSERT INTO projects \
             (id, name, description, category, source, status, current_stage, progress, \
              error, video_path, subtitle_path, video_duration, settings, sync_pending, \
              created_at, updated_at, completed_at) \
             VALUES (?, ?, ?, ?, ?, ?, ?, ?, NULL, NULL, NULL, NULL, ?, 0, ?, ?, NULL)",
        )
        .bind(project.id.as_str())
        .bind(&project.name)
        .bind(project.description.as_deref())
        .bind(project.category.as_str())
        .bind(serde_json::to_string(&project.source)?)
        .bind(project.status.as_str())
        .bind(project.current_stage as i64)
        .bind(project.progress as i64)
        .bind(serde_json::to_string(&project.settings)?)
        .bind(time::encode(project.created_at))
        .bind(time::encode(project.updated_at))
        .execute(&self.pool)
        .await?;

        counter!("clipforge_projects_created_total").increment(1);
        info!(project_id = %project.id, "created project");
        Ok(project)
    }

    pub async fn get(&self, id: &ProjectId) -> DbResult<Project> {
        let row = sqlx::query("SELECT * FROM projects WHERE id = ?")
            .bind(id.as_str())
            .fetch_optional(&self.pool)
            .await?;

        row.map(|r| project_from_row(&r))
            .transpose()?
            .ok_or_else(|| DbError::not_found(format!("project {id}")))
    }

    pub async fn list(&self, filter: ProjectFilter) -> DbResult<Vec<Project>> {
        let limit = if filter.limit == 0 { 50 } else { filter.limit.min(200) };

        let rows = match filter.status {
            Some(status) => {
                sqlx::query(
                    "SELECT * FROM projects WHERE status = ? \
                     ORDER BY created_at DESC LIMIT ? OFFSET ?",
                )
                .bind(status.as_str())
                .bind(limit as i64)
                .bind(filter.offset as i64)
                .fetch_all(&self.pool)
                .await?
            }
            None => {
                sqlx::query("SELECT * FROM projects ORDER BY created_at DESC LIMIT ? OFFSET ?")
                    .bind(limit as i64)
                    .bind(filter.offset as i64)
                    .fetch_all(&self.pool)
                    .await?
            }
        };

        rows.iter().map(project_from_row).collect()
    }

    /// Compare-and-swap status transition. Every status change in the system
    /// goes through here; a row whose status no longer equals `from` yields
    /// `Conflict`.
    pub async fn update_status(
        &self,
        id: &ProjectId,
        from: ProjectStatus,
        to: ProjectStatus,
        fields: StatusFields,
    ) -> DbResult<()> {
        if !from.can_transition_to(to) {
            return Err(DbError::invalid_argument(format!(
                "illegal status transition {} -> {}",
                from.as_str(),
                to.as_str()
            )));
        }

        let mut builder = sqlx::QueryBuilder::<sqlx::Any>::new("UPDATE projects SET status = ");
        builder.push_bind(to.as_str());
        builder.push(", updated_at = ");
        builder.push_bind(time::encode(Utc::now()));

        if let Some(progress) = fields.progress {
            builder.push(", progress = ");
            builder.push_bind(progress.min(100) as i64);
        }
        if let Some(stage) = fields.current_stage {
            builder.push(", current_stage = ");
            builder.push_bind(stage as i64);
        }
        if let Some(error) = &fields.error {
            builder.push(", error = ");
            builder.push_bind(serde_json::to_string(error)?);
        } else if fields.clear_error {
            builder.push(", error = NULL");
        }
        if let Some(completed_at) = fields.completed_at {
            builder.push(", completed_at = ");
            builder.push_bind(time::encode(completed_at));
        }

        builder.push(" WHERE id = ");
        builder.push_bind(id.as_str());
        builder.push(" AND status = ");
        builder.push_bind(from.as_str());

        let result = builder.build().execute(&self.pool).await?;
        if result.rows_affected() == 0 {
            // Distinguish a lost race from a missing row.
            let current = self.get(id).await?;
            return Err(DbError::conflict(format!(
                "project {id} is {} (expected {})",
                current.status.as_str(),
                from.as_str()
            )));
        }

        info!(project_id = %id, from = from.as_str(), to = to.as_str(), "project status changed");
        Ok(())
    }

    /// Update progress/stage counters without a status change. Used by the
    /// orchestrator between stage boundaries.
    pub async fn update_progress(
        &self,
        id: &ProjectId,
        progress: u8,
        current_stage: u8,
    ) -> DbResult<()> {
        let result = sqlx::query(
            "UPDATE projects SET progress = ?, current_stage = ?, updated_at = ? WHERE id = ?",
        )
        .bind(progress.min(100) as i64)
        .bind(current_stage as i64)
        .bind(time::encode(Utc::now()))
        .bind(id.as_str())
        .execute(&self.pool)
        .await?;

        if result.rows_affected() == 0 {
            return Err(DbError::not_found(format!("project {id}")));
        }
        Ok(())
    }

    /// Record the materialised media paths after ingest.
    pub async fn set_media(
        &self,
        id: &ProjectId,
        video_path: &str,
        subtitle_path: &str,
        video_duration: Option<f64>,
    ) -> DbResult<()> {
        let result = sqlx::query(
            "UPDATE projects SET video_path = ?, subtitle_path = ?, video_duration = ?, \
             updated_at = ? WHERE id = ?",
        )
        .bind(video_path)
        .bind(subtitle_path)
        .bind(video_duration)
        .bind(time::encode(Utc::now()))
        .bind(id.as_str())
        .execute(&self.pool)
        .await?;

        if result.rows_affected() == 0 {
            return Err(DbError::not_found(format!("project {id}")));
        }
        Ok(())
    }

    /// Flag or clear a pending data sync.
    pub async fn set_sync_pending(&self, id: &ProjectId, pending: bool) -> DbResult<()> {
        sqlx::query("UPDATE projects SET sync_pending = ?, updated_at = ? WHERE id = ?")
            .bind(if pending { 1i64 } else { 0i64 })
            .bind(time::encode(Utc::now()))
            .bind(id.as_str())
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    pub async fn list_sync_pending(&self) -> DbResult<Vec<Project>> {
        let rows = sqlx::query("SELECT * FROM projects WHERE sync_pending = 1")
            .fetch_all(&self.pool)
            .await?;
        rows.iter().map(project_from_row).collect()
    }

    /// Auto-prunable completed projects finished before `cutoff`.
    pub async fn list_prunable(&self, cutoff: DateTime<Utc>) -> DbResult<Vec<Project>> {
        let rows = sqlx::query(
            "SELECT * FROM projects WHERE status = 'completed' AND completed_at < ?",
        )
        .bind(time::encode(cutoff))
        .fetch_all(&self.pool)
        .await?;

        let projects: DbResult<Vec<Project>> = rows.iter().map(project_from_row).collect();
        Ok(projects?
            .into_iter()
            .filter(|p| p.settings.auto_prune)
            .collect())
    }

    /// Delete a project and everything it owns. Refuses with `Busy` while a
    /// task is running.
    pub async fn delete(&self, id: &ProjectId) -> DbResult<()> {
        let mut tx = self.pool.begin().await?;

        let running: i64 = sqlx::query(
            "SELECT COUNT(*) AS n FROM tasks WHERE project_id = ? AND status = 'running'",
        )
        .bind(id.as_str())
        .fetch_one(&mut *tx)
        .await?
        .try_get("n")?;

        if running > 0 {
            return Err(DbError::busy(format!("project {id} has a running task")));
        }

        // Children first; the cascade is kept explicit so the delete does not
        // depend on driver-level foreign-key enforcement.
        sqlx::query("DELETE FROM collections WHERE project_id = ?")
            .bind(id.as_str())
            .execute(&mut *tx)
            .await?;
        sqlx::query("DELETE FROM clips WHERE project_id = ?")
            .bind(id.as_str())
            .execute(&mut *tx)
            .await?;
        sqlx::query("DELETE FROM tasks WHERE project_id = ?")
            .bind(id.as_str())
            .execute(&mut *tx)
            .await?;
        let result = sqlx::query("DELETE FROM projects WHERE id = ?")
            .bind(id.as_str())
            .execute(&mut *tx)
            .await?;

        if result.rows_affected() == 0 {
            return Err(DbError::not_found(format!("project {id}")));
        }

        tx.commit().await?;
        counter!("clipforge_projects_deleted_total").increment(1);
        info!(project_id = %id, "deleted project");
        Ok(())
    }
}

pub(crate) fn project_from_row(row: &AnyRow) -> DbResult<Project> {
    let status: String = row.try_get("status")?;
    let category: String = row.try_get("category")?;
    let source: String = row.try_get("source")?;
    let settings: String = row.try_get("settings")?;
    let error: Option<String> = row.try_get("error")?;
    let created_at: String = row.try_get("created_at")?;
    let updated_at: String = row.try_get("updated_at")?;
    let completed_at: Option<String> = row.try_get("completed_at")?;

    Ok(Project {
        id: ProjectId::from_string(row.try_get::<String, _>("id")?),
        name: row.try_get("name")?,
        description: row.try_get("description")?,
        category: serde_json::from_value(serde_json::Value::String(category))
            .unwrap_or_default(),
        source: serde_json::from_str(&source)?,
        status: ProjectStatus::parse(&status)
            .ok_or_else(|| DbError::invalid_argument(format!("bad status {status}")))?,
        current_stage: row.try_get::<i64, _>("current_stage")? as u8,
        progress: row.try_get::<i64, _>("progress")? as u8,
        error: error.as_deref().map(serde_json::from_str).transpose()?,
        video_path: row.try_get("video_path")?,
        subtitle_path: row.try_get("subtitle_path")?,
        video_duration: row.try_get("video_duration")?,
        settings: serde_json::from_str(&settings)?,
        sync_pending: row.try_get::<i64, _>("sync_pending")? != 0,
        created_at: time::decode(&created_at),
        updated_at: time::decode(&updated_at),
        completed_at: time::decode_opt(completed_at),
    })
}
