//! Task repository.

use chrono::{DateTime, Utc};
use metrics::counter;
use sqlx::any::AnyRow;
use sqlx::{AnyPool, Row};
use tracing::info;

use clipforge_models::{ProjectId, Task, TaskId, TaskKind, TaskStatus};

use crate::error::{DbError, DbResult};
use crate::time;

/// Repository for task rows.
#[derive(Debug, Clone)]
pub struct TaskRepository {
    pool: AnyPool,
}

impl TaskRepository {
    pub fn new(pool: AnyPool) -> Self {
        Self { pool }
    }

    pub async fn create(&self, task: &Task) -> DbResult<()> {
        sqlx::query(
            "INSERT INTO tasks \
             (id, project_id, kind, status, progress, current_step, worker_id, error, \
              created_at, started_at, completed_at) \
             VALUES (?, ?, ?, ?, ?, NULL, NULL, NULL, ?, NULL, NULL)",
        )
        .bind(task.id.as_str())
        .bind(task.project_id.as_str())
        .bind(task.kind.as_str())
        .bind(task.status.as_str())
        .bind(task.progress as i64)
        .bind(time::encode(task.created_at))
        .execute(&self.pool)
        .await?;

        counter!("clipforge_tasks_created_total", "kind" => task.kind.as_str()).increment(1);
        Ok(())
    }

    pub async fn get(&self, id: &TaskId) -> DbResult<Task> {
        let row = sqlx::query("SELECT * FROM tasks WHERE id = ?")
            .bind(id.as_str())
            .fetch_optional(&self.pool)
            .await?;

        row.map(|r| task_from_row(&r))
            .transpose()?
            .ok_or_else(|| DbError::not_found(format!("task {id}")))
    }

    /// Claim a pending task for a worker: CAS Pending -> Running. The
    /// partial unique index rejects a second running task for the same
    /// (project, kind); both failure modes surface as `Conflict`.
    pub async fn claim(&self, id: &TaskId, worker_id: &str) -> DbResult<()> {
        let result = sqlx::query(
            "UPDATE tasks SET status = 'running', worker_id = ?, started_at = ? \
             WHERE id = ? AND status = 'pending'",
        )
        .bind(worker_id)
        .bind(time::encode(Utc::now()))
        .bind(id.as_str())
        .execute(&self.pool)
        .await
        .map_err(|e| match &e {
            sqlx::Error::Database(db) if db.is_unique_violation() => {
                DbError::conflict(format!("task {id}: another run is in flight"))
            }
            _ => DbError::Sqlx(e),
        })?;

        if result.rows_affected() == 0 {
            let current = self.get(id).await?;
            return Err(DbError::conflict(format!(
                "task {id} is {} (expected pending)",
                current.status.as_str()
            )));
        }

        info!(task_id = %id, worker_id, "claimed task");
        Ok(())
    }

    /// Move a running task to a terminal status.
    pub async fn finish(
        &self,
        id: &TaskId,
        status: TaskStatus,
        error: Option<&str>,
    ) -> DbResult<()> {
        if !status.is_terminal() {
            return Err(DbError::invalid_argument(format!(
                "finish requires a terminal status, got {}",
                status.as_str()
            )));
        }

        let result = sqlx::query(
            "UPDATE tasks SET status = ?, error = ?, completed_at = ? \
             WHERE id = ? AND status IN ('running', 'pending')",
        )
        .bind(status.as_str())
        .bind(error)
        .bind(time::encode(Utc::now()))
        .bind(id.as_str())
        .execute(&self.pool)
        .await?;

        if result.rows_affected() == 0 {
            let current = self.get(id).await?;
            return Err(DbError::conflict(format!(
                "task {id} already {}",
                current.status.as_str()
            )));
        }

        counter!("clipforge_tasks_finished_total", "status" => status.as_str()).increment(1);
        Ok(())
    }

    /// Return a claimed task to the queue: CAS Running -> Pending. Used when
    /// a delivery fails on infrastructure before the run recorded any state,
    /// so the broker redelivery can claim it again.
    pub async fn release(&self, id: &TaskId) -> DbResult<()> {
        let result = sqlx::query(
            "UPDATE tasks SET status = 'pending', worker_id = NULL, started_at = NULL \
             WHERE id = ? AND status = 'running'",
        )
        .bind(id.as_str())
        .execute(&self.pool)
        .await?;

        if result.rows_affected() == 0 {
            let current = self.get(id).await?;
            return Err(DbError::conflict(format!(
                "task {id} is {} (expected running)",
                current.status.as_str()
            )));
        }
        Ok(())
    }

    pub async fn set_progress(
        &self,
        id: &TaskId,
        progress: u8,
        current_step: Option<&str>,
    ) -> DbResult<()> {
        sqlx::query("UPDATE tasks SET progress = ?, current_step = ? WHERE id = ?")
            .bind(progress.min(100) as i64)
            .bind(current_step)
            .bind(id.as_str())
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    /// The running task for (project, kind), if any.
    pub async fn find_running(
        &self,
        project_id: &ProjectId,
        kind: TaskKind,
    ) -> DbResult<Option<Task>> {
        let row = sqlx::query(
            "SELECT * FROM tasks WHERE project_id = ? AND kind = ? AND status = 'running'",
        )
        .bind(project_id.as_str())
        .bind(kind.as_str())
        .fetch_optional(&self.pool)
        .await?;

        row.map(|r| task_from_row(&r)).transpose()
    }

    pub async fn has_active(&self, project_id: &ProjectId) -> DbResult<bool> {
        let n: i64 = sqlx::query(
            "SELECT COUNT(*) AS n FROM tasks \
             WHERE project_id = ? AND status IN ('pending', 'running')",
        )
        .bind(project_id.as_str())
        .fetch_one(&self.pool)
        .await?
        .try_get("n")?;
        Ok(n > 0)
    }

    /// All running tasks, for the stale-run detector.
    pub async fn list_running(&self) -> DbResult<Vec<Task>> {
        let rows = sqlx::query("SELECT * FROM tasks WHERE status = 'running'")
            .fetch_all(&self.pool)
            .await?;
        rows.iter().map(task_from_row).collect()
    }

    pub async fn list_for_project(&self, project_id: &ProjectId) -> DbResult<Vec<Task>> {
        let rows = sqlx::query(
            "SELECT * FROM tasks WHERE project_id = ? ORDER BY created_at DESC",
        )
        .bind(project_id.as_str())
        .fetch_all(&self.pool)
        .await?;
        rows.iter().map(task_from_row).collect()
    }

    /// Mark running tasks started before `cutoff` as failed ("orphaned").
    /// Returns the number of rows swept.
    pub async fn orphan_stuck(&self, cutoff: DateTime<Utc>) -> DbResult<u64> {
        let result = sqlx::query(
            "UPDATE tasks SET status = 'failed', error = 'orphaned', completed_at = ? \
             WHERE status = 'running' AND started_at < ?",
        )
        .bind(time::encode(Utc::now()))
        .bind(time::encode(cutoff))
        .execute(&self.pool)
        .await?;
        Ok(result.rows_affected())
    }

    /// Delete terminal tasks completed before `cutoff`.
    pub async fn delete_terminal_before(&self, cutoff: DateTime<Utc>) -> DbResult<u64> {
        let result = sqlx::query(
            "DELETE FROM tasks WHERE status IN ('completed', 'failed', 'cancelled') \
             AND completed_at < ?",
        )
        .bind(time::encode(cutoff))
        .execute(&self.pool)
        .await?;
        Ok(result.rows_affected())
    }
}

fn task_from_row(row: &AnyRow) -> DbResult<Task> {
    let kind: String = row.try_get("kind")?;
    let status: String = row.try_get("status")?;
    let created_at: String = row.try_get("created_at")?;
    let started_at: Option<String> = row.try_get("started_at")?;
    let completed_at: Option<String> = row.try_get("completed_at")?;

    Ok(Task {
        id: TaskId::from_string(row.try_get::<String, _>("id")?),
        project_id: ProjectId::from_string(row.try_get::<String, _>("project_id")?),
        kind: TaskKind::parse(&kind)
            .ok_or_else(|| DbError::invalid_argument(format!("bad task kind {kind}")))?,
        status: TaskStatus::parse(&status)
            .ok_or_else(|| DbError::invalid_argument(format!("bad task status {status}")))?,
        progress: row.try_get::<i64, _>("progress")? as u8,
        current_step: row.try_get("current_step")?,
        worker_id: row.try_get("worker_id")?,
        error: row.try_get("error")?,
        created_at: time::decode(&created_at),
        started_at: time::decode_opt(started_at),
        completed_at: time::decode_opt(completed_at),
    })
}
