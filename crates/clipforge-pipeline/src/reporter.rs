//! Monotone progress reporter for one pipeline run.
//!
//! Every stage boundary and sub-progress tick goes through here. The
//! reporter clamps progress to be non-decreasing for the run, mirrors the
//! value onto the project and task rows, and publishes to the fabric.
//! Progress reporting never fails a run: store/broker hiccups are logged
//! and dropped.

use std::sync::atomic::{AtomicU8, Ordering};
use std::sync::{Arc, Mutex};

use metrics::counter;
use tracing::warn;

use clipforge_db::Db;
use clipforge_models::{
    ProgressStage, ProgressUpdate, ProjectId, ProjectStatus, Stage, TaskId,
};
use clipforge_queue::ProgressFabric;

/// Progress reporter shared by the orchestrator and the stages of one run.
#[derive(Clone)]
pub struct ProgressReporter {
    project_id: ProjectId,
    task_id: Option<TaskId>,
    db: Db,
    fabric: ProgressFabric,
    last_percent: Arc<AtomicU8>,
    status: Arc<Mutex<ProjectStatus>>,
}

impl ProgressReporter {
    pub fn new(
        project_id: ProjectId,
        task_id: Option<TaskId>,
        db: Db,
        fabric: ProgressFabric,
        initial_status: ProjectStatus,
        initial_percent: u8,
    ) -> Self {
        Self {
            project_id,
            task_id,
            db,
            fabric,
            last_percent: Arc::new(AtomicU8::new(initial_percent.min(100))),
            status: Arc::new(Mutex::new(initial_status)),
        }
    }

    pub fn project_id(&self) -> &ProjectId {
        &self.project_id
    }

    /// Record a status change so subsequent frames carry it.
    pub fn set_status(&self, status: ProjectStatus) {
        *self.status.lock().expect("status lock poisoned") = status;
    }

    fn current_status(&self) -> ProjectStatus {
        *self.status.lock().expect("status lock poisoned")
    }

    /// Clamp to the monotone floor: a lower percent is silently upgraded to
    /// the last published value.
    fn clamp(&self, percent: u8) -> u8 {
        let percent = percent.min(100);
        let mut current = self.last_percent.load(Ordering::Acquire);
        loop {
            let next = percent.max(current);
            match self.last_percent.compare_exchange_weak(
                current,
                next,
                Ordering::AcqRel,
                Ordering::Acquire,
            ) {
                Ok(_) => return next,
                Err(observed) => current = observed,
            }
        }
    }

    pub fn last_percent(&self) -> u8 {
        self.last_percent.load(Ordering::Acquire)
    }

    /// Publish a frame and mirror it to the metadata rows.
    pub async fn publish(&self, stage: ProgressStage, percent: u8, message: impl Into<String>) {
        let percent = self.clamp(percent);
        let update = ProgressUpdate::new(
            self.project_id.clone(),
            stage,
            percent,
            message,
            self.current_status(),
        );

        if let Err(e) = self.fabric.publish(&update).await {
            warn!(project_id = %self.project_id, "progress publish failed: {e}");
        }
        counter!("clipforge_progress_events_total", "stage" => stage.as_str()).increment(1);

        let stage_index = Stage::parse(stage.as_str()).map(|s| s.index()).unwrap_or(0);
        if stage_index > 0 {
            if let Err(e) = self
                .db
                .projects()
                .update_progress(&self.project_id, percent, stage_index)
                .await
            {
                warn!(project_id = %self.project_id, "progress row update failed: {e}");
            }
        }
        if let Some(task_id) = &self.task_id {
            if let Err(e) = self
                .db
                .tasks()
                .set_progress(task_id, percent, Some(stage.as_str()))
                .await
            {
                warn!(task_id = %task_id, "task progress update failed: {e}");
            }
        }
    }

    /// Boundary event on entering a stage.
    pub async fn enter_stage(&self, stage: Stage) {
        self.publish(
            stage.into(),
            stage.enter_percent(),
            format!("{} started", stage.as_str()),
        )
        .await;
    }

    /// Boundary event on leaving a stage.
    pub async fn leave_stage(&self, stage: Stage) {
        self.publish(
            stage.into(),
            stage.leave_percent(),
            format!("{} finished", stage.as_str()),
        )
        .await;
    }

    /// Sub-progress within a stage, scaled into its weight window.
    pub async fn stage_progress(&self, stage: Stage, sub_percent: u8, message: impl Into<String>) {
        self.publish(stage.into(), stage.scaled_percent(sub_percent), message)
            .await;
    }

    /// Terminal error event at the current boundary percent.
    pub async fn error(&self, message: impl Into<String>) {
        let percent = self.last_percent();
        self.publish(ProgressStage::Error, percent, message).await;
    }
}
