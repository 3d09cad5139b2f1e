//! Transactional writer used by the data-sync service.
//!
//! Replacing a project's clips and collections must be atomic so a re-sync
//! never leaves a mixed generation of rows behind; the translation from
//! natural artifact ids to row ids happens in the data-sync service, this
//! writer only owns the transaction.

use metrics::counter;
use sqlx::AnyPool;
use tracing::info;

use clipforge_models::{Clip, Collection, ProjectId};

use crate::error::{DbError, DbResult};
use crate::repo::collection::encode_clip_ids;
use crate::time;

/// Result of one sync transaction.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SyncOutcome {
    pub clips_inserted: u64,
    pub collections_inserted: u64,
}

/// Writes one project's reconciled artifact rows in a single transaction.
#[derive(Debug, Clone)]
pub struct SyncWriter {
    pool: AnyPool,
}

impl SyncWriter {
    pub fn new(pool: AnyPool) -> Self {
        Self { pool }
    }

    /// Delete the project's existing clip and collection rows and insert the
    /// reconciled replacements. Commits once; any failure rolls the whole
    /// replacement back.
    pub async fn replace_project_artifacts(
        &self,
        project_id: &ProjectId,
        clips: &[Clip],
        collections: &[Collection],
    ) -> DbResult<SyncOutcome> {
        for clip in clips {
            if clip.project_id != *project_id {
                return Err(DbError::invalid_argument(format!(
                    "clip {} belongs to project {}, not {}",
                    clip.id, clip.project_id, project_id
                )));
            }
        }
        for collection in collections {
            if collection.project_id != *project_id {
                return Err(DbError::invalid_argument(format!(
                    "collection {} belongs to project {}, not {}",
                    collection.id, collection.project_id, project_id
                )));
            }
        }

        let mut tx = self.pool.begin().await?;

        sqlx::query("DELETE FROM collections WHERE project_id = ?")
            .bind(project_id.as_str())
            .execute(&mut *tx)
            .await?;
        sqlx::query("DELETE FROM clips WHERE project_id = ?")
            .bind(project_id.as_str())
            .execute(&mut *tx)
            .await?;

        for clip in clips {
            sqlx::query(
                "INSERT INTO clips \
                 (id, project_id, title, score, start_time, end_time, output_path, metadata, created_at) \
                 VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?)",
            )
            .bind(clip.id.as_str())
            .bind(clip.project_id.as_str())
            .bind(&clip.title)
            .bind(clip.score)
            .bind(clip.start_time)
            .bind(clip.end_time)
            .bind(clip.output_path.as_deref())
            .bind(serde_json::to_string(&clip.metadata)?)
            .bind(time::encode(clip.created_at))
            .execute(&mut *tx)
            .await?;
        }

        for collection in collections {
            sqlx::query(
                "INSERT INTO collections \
                 (id, project_id, title, description, clip_ids, status, export_path, created_at) \
                 VALUES (?, ?, ?, ?, ?, ?, ?, ?)",
            )
            .bind(collection.id.as_str())
            .bind(collection.project_id.as_str())
            .bind(&collection.title)
            .bind(collection.description.as_deref())
            .bind(encode_clip_ids(&collection.clip_ids)?)
            .bind(collection.status.as_str())
            .bind(collection.export_path.as_deref())
            .bind(time::encode(collection.created_at))
            .execute(&mut *tx)
            .await?;
        }

        tx.commit().await?;

        counter!("clipforge_sync_runs_total").increment(1);
        info!(
            project_id = %project_id,
            clips = clips.len(),
            collections = collections.len(),
            "replaced project artifacts"
        );

        Ok(SyncOutcome {
            clips_inserted: clips.len() as u64,
            collections_inserted: collections.len() as u64,
        })
    }
}
