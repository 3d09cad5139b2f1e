//! Data-sync service: reconcile finished artifacts into the metadata store.
//!
//! Database ids minted here are the authoritative clip identities; the
//! artifact's natural id survives only under `metadata.original_id`. Running
//! the sync twice against unchanged artifacts yields the same rows (modulo
//! the minted ids).

use std::collections::HashMap;

use tracing::{info, warn};

use clipforge_content::ContentStore;
use clipforge_db::Db;
use clipforge_models::{
    ClipDraft, ClipId, Collection, CollectionDraft, CollectionId, CollectionStatus, ProjectId,
};

use crate::error::{PipelineError, PipelineResult};

/// Reconciles `metadata/*.json` into clip and collection rows.
pub struct DataSync {
    db: Db,
    store: ContentStore,
}

impl DataSync {
    pub fn new(db: Db, store: ContentStore) -> Self {
        Self { db, store }
    }

    /// Replace the project's clip/collection rows from its on-disk metadata.
    /// One transaction; idempotent per §laws.
    pub async fn sync_project(&self, project_id: &ProjectId) -> PipelineResult<()> {
        let layout = self.store.project(project_id);
        let project = self.db.projects().get(project_id).await?;

        let clip_drafts: Vec<ClipDraft> =
            self.store.read_json(&layout.clips_metadata()).await?;
        let collection_drafts: Vec<CollectionDraft> =
            match self.store.read_json(&layout.collections_metadata()).await {
                Ok(drafts) => drafts,
                Err(clipforge_content::ContentError::NotFound(_)) => Vec::new(),
                Err(e) => return Err(e.into()),
            };

        // Natural id -> minted row id.
        let mut id_map: HashMap<String, ClipId> = HashMap::new();
        let mut clips = Vec::with_capacity(clip_drafts.len());
        for draft in clip_drafts {
            if !draft.validate(project.video_duration) {
                warn!(
                    project_id = %project_id,
                    natural_id = %draft.id,
                    "dropping invalid clip draft"
                );
                continue;
            }
            let natural_id = draft.id.clone();
            let clip = draft.into_clip(project_id.clone());
            id_map.insert(natural_id, clip.id.clone());
            clips.push(clip);
        }
        if clips.is_empty() {
            return Err(PipelineError::unrecoverable(
                "clips metadata contains no valid clips",
            ));
        }

        let mut collections = Vec::with_capacity(collection_drafts.len());
        for draft in collection_drafts {
            let mut clip_ids = Vec::with_capacity(draft.clip_ids.len());
            for natural in &draft.clip_ids {
                match id_map.get(natural) {
                    Some(clip_id) => clip_ids.push(clip_id.clone()),
                    None => warn!(
                        project_id = %project_id,
                        natural_id = %natural,
                        "dropping unknown clip reference from collection"
                    ),
                }
            }
            collections.push(Collection {
                id: CollectionId::new(),
                project_id: project_id.clone(),
                title: draft.title,
                description: draft.description,
                clip_ids,
                status: CollectionStatus::Created,
                export_path: None,
                created_at: chrono::Utc::now(),
            });
        }

        let outcome = self
            .db
            .sync_writer()
            .replace_project_artifacts(project_id, &clips, &collections)
            .await?;
        self.db.projects().set_sync_pending(project_id, false).await?;

        info!(
            project_id = %project_id,
            clips = outcome.clips_inserted,
            collections = outcome.collections_inserted,
            "data sync complete"
        );
        Ok(())
    }

    /// Retry every project flagged by a failed post-pipeline sync.
    pub async fn retry_pending(&self) -> PipelineResult<u32> {
        let pending = self.db.projects().list_sync_pending().await?;
        let mut synced = 0u32;
        for project in pending {
            match self.sync_project(&project.id).await {
                Ok(()) => synced += 1,
                Err(e) => warn!(project_id = %project.id, "sync retry failed: {e}"),
            }
        }
        Ok(synced)
    }
}
