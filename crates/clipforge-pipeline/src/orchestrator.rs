//! Pipeline orchestrator: sequences the six stages for one project.

use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use chrono::Utc;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use clipforge_content::ContentStore;
use clipforge_db::{Db, DbError, StatusFields};
use clipforge_models::{
    CollectionId, ErrorInfo, Project, ProjectId, ProjectStatus, Stage, TaskId, ALL_STAGES,
};
use clipforge_queue::{JobQueue, ProgressFabric};

use crate::capabilities::Capabilities;
use crate::config::WorkerConfig;
use crate::error::{PipelineError, PipelineResult};
use crate::reporter::ProgressReporter;
use crate::retry::RetryPolicy;
use crate::stages::{run_stage, StageContext};
use crate::sync::DataSync;

/// Options for one run.
#[derive(Debug, Clone, Default)]
pub struct RunOptions {
    /// Resume from on-disk artifacts instead of starting over.
    pub resume: bool,
    /// Explicit first stage; overrides resume detection.
    pub start_at_stage: Option<Stage>,
    /// Task row mirroring this run, if any.
    pub task_id: Option<TaskId>,
}

/// Orchestrator dependencies are passed in explicitly; there are no
/// process-global singletons outside binary wiring.
pub struct Orchestrator {
    db: Db,
    store: ContentStore,
    fabric: ProgressFabric,
    queue: Arc<JobQueue>,
    caps: Capabilities,
    config: WorkerConfig,
    /// Cancel tokens of in-flight runs, keyed by project.
    inflight: Mutex<HashMap<ProjectId, CancellationToken>>,
}

impl Orchestrator {
    pub fn new(
        db: Db,
        store: ContentStore,
        fabric: ProgressFabric,
        queue: Arc<JobQueue>,
        caps: Capabilities,
        config: WorkerConfig,
    ) -> Self {
        Self {
            db,
            store,
            fabric,
            queue,
            caps,
            config,
            inflight: Mutex::new(HashMap::new()),
        }
    }

    /// Execute the pipeline for one project. Blocking; at most one run per
    /// project is admitted at a time.
    pub async fn run(&self, project_id: &ProjectId, opts: RunOptions) -> PipelineResult<()> {
        let project = self.db.projects().get(project_id).await?;
        if project.status == ProjectStatus::Completed && !opts.resume {
            info!(project_id = %project_id, "project already completed, nothing to run");
            return Ok(());
        }

        let cancel = self.admit(project_id)?;
        let result = self.run_admitted(project, opts, cancel.clone()).await;
        self.inflight
            .lock()
            .expect("inflight lock poisoned")
            .remove(project_id);
        self.queue.clear_cancel(project_id).await.ok();
        result
    }

    /// Cooperatively cancel an in-flight run. Returns whether a cancellation
    /// actually happened; cancelling a finished project is a no-op.
    pub fn cancel(&self, project_id: &ProjectId) -> bool {
        let inflight = self.inflight.lock().expect("inflight lock poisoned");
        match inflight.get(project_id) {
            Some(token) => {
                token.cancel();
                info!(project_id = %project_id, "cancel signalled");
                true
            }
            None => false,
        }
    }

    fn admit(&self, project_id: &ProjectId) -> PipelineResult<CancellationToken> {
        let mut inflight = self.inflight.lock().expect("inflight lock poisoned");
        if inflight.contains_key(project_id) {
            return Err(PipelineError::Busy(format!(
                "project {project_id} already has a run in flight"
            )));
        }
        let token = CancellationToken::new();
        inflight.insert(project_id.clone(), token.clone());
        Ok(token)
    }

    async fn run_admitted(
        &self,
        project: Project,
        opts: RunOptions,
        cancel: CancellationToken,
    ) -> PipelineResult<()> {
        let project_id = project.id.clone();
        let layout = self.store.project(&project_id);

        let start_stage = match opts.start_at_stage {
            Some(stage) => stage,
            None if opts.resume => self.detect_resume_stage(&project).await,
            None => Stage::Ingest,
        };

        // A fresh ingest of a remote source downloads first.
        let raw_present = project
            .video_path
            .as_deref()
            .map(PathBuf::from)
            .map(|p| p.exists())
            .unwrap_or(false);
        let running_status = if start_stage == Stage::Ingest && project.source.is_remote() && !raw_present
        {
            ProjectStatus::Downloading
        } else {
            ProjectStatus::Processing
        };

        match project.status {
            ProjectStatus::Pending | ProjectStatus::Failed | ProjectStatus::Cancelled => {
                self.db
                    .projects()
                    .update_status(
                        &project_id,
                        project.status,
                        running_status,
                        StatusFields {
                            clear_error: true,
                            current_stage: Some(start_stage.index().saturating_sub(1)),
                            ..Default::default()
                        },
                    )
                    .await
                    .map_err(yield_on_conflict)?;
            }
            // Recovery of a run that already moved to an active status.
            ProjectStatus::Downloading | ProjectStatus::Processing => {}
            ProjectStatus::Completed => {}
        }

        let reporter = ProgressReporter::new(
            project_id.clone(),
            opts.task_id.clone(),
            self.db.clone(),
            self.fabric.clone(),
            running_status,
            if opts.resume { project.progress } else { 0 },
        );

        // Cross-node cancels arrive via the broker flag; fold them into the
        // in-process token.
        let watcher = self.spawn_cancel_watcher(project_id.clone(), cancel.clone());

        let ctx = StageContext {
            project: self.db.projects().get(&project_id).await?,
            layout,
            store: self.store.clone(),
            db: self.db.clone(),
            caps: self.caps.clone(),
            reporter: reporter.clone(),
            cancel: cancel.clone(),
            retry: RetryPolicy::default(),
        };

        let result = self.run_stages(&ctx, start_stage, running_status).await;
        watcher.abort();

        match result {
            Ok(()) => {
                // Data sync happens after completion and never re-fails the
                // project; a failed sync is flagged for the retry sweeper.
                let sync = DataSync::new(self.db.clone(), self.store.clone());
                if let Err(e) = sync.sync_project(&project_id).await {
                    warn!(project_id = %project_id, "data sync failed, flagged for retry: {e}");
                    self.db
                        .projects()
                        .set_sync_pending(&project_id, true)
                        .await
                        .ok();
                }
                Ok(())
            }
            Err(e) => self.record_failure(&ctx, e).await,
        }
    }

    async fn run_stages(
        &self,
        ctx: &StageContext,
        start_stage: Stage,
        mut status: ProjectStatus,
    ) -> PipelineResult<()> {
        let project_id = &ctx.project.id;

        for stage in ALL_STAGES
            .into_iter()
            .filter(|s| s.index() >= start_stage.index())
        {
            ctx.reporter.enter_stage(stage).await;

            let deadline = self.config.stage_timeouts.for_stage(stage);
            let summary = match tokio::time::timeout(deadline, run_stage(stage, ctx)).await {
                Ok(result) => result?,
                Err(_) => return Err(PipelineError::Timeout(stage)),
            };
            for warning in &summary.warnings {
                warn!(project_id = %project_id, stage = stage.as_str(), "{warning}");
            }

            // A remote ingest finishes the download phase.
            if stage == Stage::Ingest && status == ProjectStatus::Downloading {
                self.db
                    .projects()
                    .update_status(
                        project_id,
                        ProjectStatus::Downloading,
                        ProjectStatus::Processing,
                        StatusFields::default(),
                    )
                    .await
                    .map_err(yield_on_conflict)?;
                status = ProjectStatus::Processing;
                ctx.reporter.set_status(status);
            }

            if stage == Stage::Done {
                // Completion precedes the final frame so the 100% event
                // already carries the terminal status.
                self.db
                    .projects()
                    .update_status(
                        project_id,
                        ProjectStatus::Processing,
                        ProjectStatus::Completed,
                        StatusFields {
                            progress: Some(100),
                            current_stage: Some(Stage::Done.index()),
                            completed_at: Some(Utc::now()),
                            ..Default::default()
                        },
                    )
                    .await
                    .map_err(yield_on_conflict)?;
                ctx.reporter.set_status(ProjectStatus::Completed);
            }

            ctx.reporter.leave_stage(stage).await;
        }

        Ok(())
    }

    /// Map a run error onto the project state machine and the fabric.
    async fn record_failure(&self, ctx: &StageContext, error: PipelineError) -> PipelineResult<()> {
        let project_id = &ctx.project.id;
        let current = self.db.projects().get(project_id).await?.status;
        if current.is_terminal() {
            // Another actor already finished the project; nothing to record.
            return Err(error);
        }

        let stage = Stage::from_index(
            self.db
                .projects()
                .get(project_id)
                .await
                .map(|p| p.current_stage)
                .unwrap_or(0),
        )
        .unwrap_or(Stage::Ingest);

        match &error {
            PipelineError::Cancelled => {
                ctx.reporter.set_status(ProjectStatus::Cancelled);
                ctx.reporter.error("cancelled").await;
                self.db
                    .projects()
                    .update_status(project_id, current, ProjectStatus::Cancelled, StatusFields::default())
                    .await
                    .map_err(yield_on_conflict)?;
            }
            PipelineError::Busy(_) => return Err(error),
            _ => {
                let reason = error.reason();
                ctx.reporter.set_status(ProjectStatus::Failed);
                ctx.reporter.error(&reason).await;
                self.db
                    .projects()
                    .update_status(
                        project_id,
                        current,
                        ProjectStatus::Failed,
                        StatusFields {
                            error: Some(ErrorInfo::new(stage, &reason)),
                            ..Default::default()
                        },
                    )
                    .await
                    .map_err(yield_on_conflict)?;
            }
        }

        Err(error)
    }

    /// Pick the first stage whose outputs are missing.
    async fn detect_resume_stage(&self, project: &Project) -> Stage {
        let layout = self.store.project(&project.id);

        let raw_ok = project
            .video_path
            .as_deref()
            .map(PathBuf::from)
            .map(|p| p.exists())
            .unwrap_or(false)
            && layout.raw_subtitle().exists();
        if !raw_ok {
            return Stage::Ingest;
        }

        for stage in [Stage::Subtitle, Stage::Analyze, Stage::Highlight] {
            for artifact in layout.stage_artifacts(stage) {
                if !artifact.exists() {
                    return stage;
                }
            }
        }
        // Export leaves no JSON artifact; re-run it unless the final
        // metadata already exists.
        if !layout.clips_metadata().exists() {
            return Stage::Export;
        }
        Stage::Done
    }

    fn spawn_cancel_watcher(
        &self,
        project_id: ProjectId,
        cancel: CancellationToken,
    ) -> tokio::task::JoinHandle<()> {
        let queue = Arc::clone(&self.queue);
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(Duration::from_secs(2));
            loop {
                ticker.tick().await;
                if cancel.is_cancelled() {
                    break;
                }
                match queue.cancel_requested(&project_id).await {
                    Ok(true) => {
                        cancel.cancel();
                        break;
                    }
                    Ok(false) => {}
                    Err(e) => warn!("cancel flag poll failed: {e}"),
                }
            }
        })
    }

    /// Export one collection by concatenating its member clips' cut files.
    /// Used by `export`-class jobs after the pipeline has completed.
    pub async fn export_collection(
        &self,
        project_id: &ProjectId,
        collection_id: &CollectionId,
    ) -> PipelineResult<()> {
        let collection = self.db.collections().get(collection_id).await?;
        if collection.project_id != *project_id {
            return Err(PipelineError::unrecoverable(format!(
                "collection {collection_id} does not belong to project {project_id}"
            )));
        }

        let mut inputs = Vec::with_capacity(collection.clip_ids.len());
        for clip_id in &collection.clip_ids {
            let clip = self.db.clips().get(clip_id).await?;
            let path = clip.output_path.as_deref().map(PathBuf::from).ok_or_else(|| {
                PipelineError::unrecoverable(format!("clip {clip_id} has no cut file"))
            })?;
            inputs.push(path);
        }

        let layout = self.store.project(project_id);
        let dest = layout.collection_output(collection_id);
        if let Some(parent) = dest.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }

        let cancel = CancellationToken::new();
        self.caps.cutter.concat(&inputs, &dest, &cancel).await?;
        self.db
            .collections()
            .mark_exported(collection_id, &dest.display().to_string())
            .await?;

        info!(collection_id = %collection_id, dest = %dest.display(), "collection exported");
        Ok(())
    }
}

/// A lost CAS race means another worker acted; surface it as Busy so the
/// caller yields instead of retrying.
fn yield_on_conflict(e: DbError) -> PipelineError {
    match e {
        DbError::Conflict(msg) => PipelineError::Busy(msg),
        other => PipelineError::Db(other),
    }
}
