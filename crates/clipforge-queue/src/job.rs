//! Queue message types.

use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

use clipforge_models::{CollectionId, ProjectId, Stage, TaskId, TaskKind};

/// Priority class of a queued job. Workers drain classes in this order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, JsonSchema, Default)]
#[serde(rename_all = "snake_case")]
pub enum Priority {
    #[default]
    Processing,
    Export,
    Maintenance,
}

/// All classes, highest priority first.
pub const ALL_PRIORITIES: [Priority; 3] = [Priority::Processing, Priority::Export, Priority::Maintenance];

impl Priority {
    pub fn as_str(&self) -> &'static str {
        match self {
            Priority::Processing => "processing",
            Priority::Export => "export",
            Priority::Maintenance => "maintenance",
        }
    }

    /// Default class for a task kind.
    pub fn for_kind(kind: TaskKind) -> Self {
        match kind {
            TaskKind::Process | TaskKind::Download => Priority::Processing,
            TaskKind::Export => Priority::Export,
        }
    }
}

/// A pipeline invocation pushed to the broker. The task id doubles as the
/// idempotency key: duplicate deliveries of the same task are dropped by the
/// executor.
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
pub struct RunJob {
    pub task_id: TaskId,
    pub project_id: ProjectId,
    pub kind: TaskKind,

    /// Resume from on-disk artifacts instead of starting over.
    #[serde(default)]
    pub resume: bool,

    /// First stage to execute; `None` means start from the beginning (or,
    /// with `resume`, from the first stage whose artifact is missing).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub start_at_stage: Option<Stage>,

    /// Collection to export, for `Export` jobs.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub collection_id: Option<CollectionId>,
}

impl RunJob {
    pub fn new(task_id: TaskId, project_id: ProjectId, kind: TaskKind) -> Self {
        Self {
            task_id,
            project_id,
            kind,
            resume: false,
            start_at_stage: None,
            collection_id: None,
        }
    }

    /// An export job for one collection.
    pub fn export(task_id: TaskId, project_id: ProjectId, collection_id: CollectionId) -> Self {
        let mut job = Self::new(task_id, project_id, TaskKind::Export);
        job.collection_id = Some(collection_id);
        job
    }

    pub fn resuming(mut self) -> Self {
        self.resume = true;
        self
    }

    pub fn starting_at(mut self, stage: Stage) -> Self {
        self.start_at_stage = Some(stage);
        self
    }

    pub fn priority(&self) -> Priority {
        Priority::for_kind(self.kind)
    }

    /// Key used to short-circuit duplicate broker deliveries.
    pub fn idempotency_key(&self) -> &str {
        self.task_id.as_str()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn export_jobs_use_export_class() {
        let job = RunJob::new(TaskId::new(), ProjectId::new(), TaskKind::Export);
        assert_eq!(job.priority(), Priority::Export);
    }

    #[test]
    fn job_round_trips_through_json() {
        let job = RunJob::new(TaskId::new(), ProjectId::new(), TaskKind::Process)
            .resuming()
            .starting_at(Stage::Export);
        let json = serde_json::to_string(&job).unwrap();
        let back: RunJob = serde_json::from_str(&json).unwrap();
        assert_eq!(back.task_id, job.task_id);
        assert!(back.resume);
        assert_eq!(back.start_at_stage, Some(Stage::Export));
    }
}
