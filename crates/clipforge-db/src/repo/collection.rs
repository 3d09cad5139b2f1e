//! Collection repository.

use std::collections::HashSet;

use sqlx::any::AnyRow;
use sqlx::{AnyPool, Row};
use tracing::info;

use clipforge_models::{ClipId, Collection, CollectionId, CollectionStatus, ProjectId};

use crate::error::{DbError, DbResult};
use crate::time;

/// Repository for collection rows.
#[derive(Debug, Clone)]
pub struct CollectionRepository {
    pool: AnyPool,
}

impl CollectionRepository {
    pub fn new(pool: AnyPool) -> Self {
        Self { pool }
    }

    pub async fn get(&self, id: &CollectionId) -> DbResult<Collection> {
        let row = sqlx::query("SELECT * FROM collections WHERE id = ?")
            .bind(id.as_str())
            .fetch_optional(&self.pool)
            .await?;

        row.map(|r| collection_from_row(&r))
            .transpose()?
            .ok_or_else(|| DbError::not_found(format!("collection {id}")))
    }

    pub async fn list_for_project(&self, project_id: &ProjectId) -> DbResult<Vec<Collection>> {
        let rows = sqlx::query(
            "SELECT * FROM collections WHERE project_id = ? ORDER BY created_at ASC",
        )
        .bind(project_id.as_str())
        .fetch_all(&self.pool)
        .await?;
        rows.iter().map(collection_from_row).collect()
    }

    /// Replace the clip ordering. The new list must be a permutation of the
    /// stored one; membership changes are a different operation.
    pub async fn reorder(&self, id: &CollectionId, clip_ids: Vec<ClipId>) -> DbResult<()> {
        let mut tx = self.pool.begin().await?;

        let row = sqlx::query("SELECT * FROM collections WHERE id = ?")
            .bind(id.as_str())
            .fetch_optional(&mut *tx)
            .await?
            .ok_or_else(|| DbError::not_found(format!("collection {id}")))?;
        let current = collection_from_row(&row)?;

        let stored: HashSet<&str> = current.clip_ids.iter().map(|c| c.as_str()).collect();
        let proposed: HashSet<&str> = clip_ids.iter().map(|c| c.as_str()).collect();
        if proposed.len() != clip_ids.len() {
            return Err(DbError::invalid_argument("duplicate clip id in reorder"));
        }
        if stored != proposed || current.clip_ids.len() != clip_ids.len() {
            return Err(DbError::invalid_argument(
                "reorder must be a permutation of the collection's clips",
            ));
        }

        sqlx::query("UPDATE collections SET clip_ids = ? WHERE id = ?")
            .bind(encode_clip_ids(&clip_ids)?)
            .bind(id.as_str())
            .execute(&mut *tx)
            .await?;

        tx.commit().await?;
        info!(collection_id = %id, "reordered collection");
        Ok(())
    }

    /// Record a finished export.
    pub async fn mark_exported(&self, id: &CollectionId, export_path: &str) -> DbResult<()> {
        let result = sqlx::query(
            "UPDATE collections SET status = 'exported', export_path = ? WHERE id = ?",
        )
        .bind(export_path)
        .bind(id.as_str())
        .execute(&self.pool)
        .await?;

        if result.rows_affected() == 0 {
            return Err(DbError::not_found(format!("collection {id}")));
        }
        Ok(())
    }

    pub async fn delete(&self, id: &CollectionId) -> DbResult<()> {
        let result = sqlx::query("DELETE FROM collections WHERE id = ?")
            .bind(id.as_str())
            .execute(&self.pool)
            .await?;
        if result.rows_affected() == 0 {
            return Err(DbError::not_found(format!("collection {id}")));
        }
        Ok(())
    }
}

pub(crate) fn encode_clip_ids(ids: &[ClipId]) -> DbResult<String> {
    Ok(serde_json::to_string(
        &ids.iter().map(|c| c.as_str()).collect::<Vec<_>>(),
    )?)
}

pub(crate) fn collection_from_row(row: &AnyRow) -> DbResult<Collection> {
    let status: String = row.try_get("status")?;
    let clip_ids: String = row.try_get("clip_ids")?;
    let created_at: String = row.try_get("created_at")?;

    let clip_ids: Vec<String> = serde_json::from_str(&clip_ids)?;

    Ok(Collection {
        id: CollectionId::from_string(row.try_get::<String, _>("id")?),
        project_id: ProjectId::from_string(row.try_get::<String, _>("project_id")?),
        title: row.try_get("title")?,
        description: row.try_get("description")?,
        clip_ids: clip_ids.into_iter().map(ClipId::from_string).collect(),
        status: CollectionStatus::parse(&status)
            .ok_or_else(|| DbError::invalid_argument(format!("bad collection status {status}")))?,
        export_path: row.try_get("export_path")?,
        created_at: time::decode(&created_at),
    })
}
