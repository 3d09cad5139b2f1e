//! Clip repository.

use sqlx::any::AnyRow;
use sqlx::{AnyPool, Row};

use clipforge_models::{Clip, ClipId, ProjectId};

use crate::error::{DbError, DbResult};
use crate::time;

/// Repository for clip rows.
#[derive(Debug, Clone)]
pub struct ClipRepository {
    pool: AnyPool,
}

impl ClipRepository {
    pub fn new(pool: AnyPool) -> Self {
        Self { pool }
    }

    pub async fn get(&self, id: &ClipId) -> DbResult<Clip> {
        let row = sqlx::query("SELECT * FROM clips WHERE id = ?")
            .bind(id.as_str())
            .fetch_optional(&self.pool)
            .await?;

        row.map(|r| clip_from_row(&r))
            .transpose()?
            .ok_or_else(|| DbError::not_found(format!("clip {id}")))
    }

    pub async fn list_for_project(&self, project_id: &ProjectId) -> DbResult<Vec<Clip>> {
        let rows = sqlx::query(
            "SELECT * FROM clips WHERE project_id = ? ORDER BY start_time ASC",
        )
        .bind(project_id.as_str())
        .fetch_all(&self.pool)
        .await?;
        rows.iter().map(clip_from_row).collect()
    }

    pub async fn count_for_project(&self, project_id: &ProjectId) -> DbResult<u64> {
        let n: i64 = sqlx::query("SELECT COUNT(*) AS n FROM clips WHERE project_id = ?")
            .bind(project_id.as_str())
            .fetch_one(&self.pool)
            .await?
            .try_get("n")?;
        Ok(n as u64)
    }

    pub async fn delete(&self, id: &ClipId) -> DbResult<()> {
        let result = sqlx::query("DELETE FROM clips WHERE id = ?")
            .bind(id.as_str())
            .execute(&self.pool)
            .await?;
        if result.rows_affected() == 0 {
            return Err(DbError::not_found(format!("clip {id}")));
        }
        Ok(())
    }
}

pub(crate) fn clip_from_row(row: &AnyRow) -> DbResult<Clip> {
    let metadata: String = row.try_get("metadata")?;
    let created_at: String = row.try_get("created_at")?;

    Ok(Clip {
        id: ClipId::from_string(row.try_get::<String, _>("id")?),
        project_id: ProjectId::from_string(row.try_get::<String, _>("project_id")?),
        title: row.try_get("title")?,
        score: row.try_get("score")?,
        start_time: row.try_get("start_time")?,
        end_time: row.try_get("end_time")?,
        output_path: row.try_get("output_path")?,
        metadata: serde_json::from_str(&metadata)?,
        created_at: time::decode(&created_at),
    })
}
