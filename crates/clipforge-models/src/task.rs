//! Task model: one queued or running unit of work against a project.

use chrono::{DateTime, Utc};
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

use crate::ids::{ProjectId, TaskId};

/// What kind of work a task performs.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "snake_case")]
pub enum TaskKind {
    /// Full pipeline run
    Process,
    /// Source download only
    Download,
    /// Collection export
    Export,
}

impl TaskKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            TaskKind::Process => "process",
            TaskKind::Download => "download",
            TaskKind::Export => "export",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "process" => Some(TaskKind::Process),
            "download" => Some(TaskKind::Download),
            "export" => Some(TaskKind::Export),
            _ => None,
        }
    }
}

/// Queue-level state of a task.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, JsonSchema, Default)]
#[serde(rename_all = "snake_case")]
pub enum TaskStatus {
    #[default]
    Pending,
    Running,
    Completed,
    Failed,
    Cancelled,
}

impl TaskStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            TaskStatus::Pending => "pending",
            TaskStatus::Running => "running",
            TaskStatus::Completed => "completed",
            TaskStatus::Failed => "failed",
            TaskStatus::Cancelled => "cancelled",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "pending" => Some(TaskStatus::Pending),
            "running" => Some(TaskStatus::Running),
            "completed" => Some(TaskStatus::Completed),
            "failed" => Some(TaskStatus::Failed),
            "cancelled" => Some(TaskStatus::Cancelled),
            _ => None,
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            TaskStatus::Completed | TaskStatus::Failed | TaskStatus::Cancelled
        )
    }
}

/// A single queued unit of work. At most one task per (project, kind) may be
/// Running at a time.
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
pub struct Task {
    pub id: TaskId,
    pub project_id: ProjectId,
    pub kind: TaskKind,

    #[serde(default)]
    pub status: TaskStatus,

    /// Progress percent mirrored from the pipeline, 0-100
    #[serde(default)]
    pub progress: u8,

    /// Name of the step currently executing
    #[serde(skip_serializing_if = "Option::is_none")]
    pub current_step: Option<String>,

    /// Identity of the worker that claimed this task
    #[serde(skip_serializing_if = "Option::is_none")]
    pub worker_id: Option<String>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,

    pub created_at: DateTime<Utc>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub started_at: Option<DateTime<Utc>>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub completed_at: Option<DateTime<Utc>>,
}

impl Task {
    pub fn new(project_id: ProjectId, kind: TaskKind) -> Self {
        Self {
            id: TaskId::new(),
            project_id,
            kind,
            status: TaskStatus::Pending,
            progress: 0,
            current_step: None,
            worker_id: None,
            error: None,
            created_at: Utc::now(),
            started_at: None,
            completed_at: None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn kind_round_trips() {
        for kind in [TaskKind::Process, TaskKind::Download, TaskKind::Export] {
            assert_eq!(TaskKind::parse(kind.as_str()), Some(kind));
        }
    }

    #[test]
    fn new_task_is_pending() {
        let task = Task::new(ProjectId::new(), TaskKind::Process);
        assert_eq!(task.status, TaskStatus::Pending);
        assert!(task.started_at.is_none());
    }
}
