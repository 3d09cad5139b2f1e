//! Progress events published by the orchestrator.

use chrono::Utc;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

use crate::ids::ProjectId;
use crate::project::ProjectStatus;
use crate::stage::Stage;

/// Wire-level stage of a progress event. Extends [`Stage`] with an error
/// marker used for failure and cancellation events.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "snake_case")]
pub enum ProgressStage {
    Ingest,
    Subtitle,
    Analyze,
    Highlight,
    Export,
    Done,
    Error,
}

impl ProgressStage {
    pub fn as_str(&self) -> &'static str {
        match self {
            ProgressStage::Ingest => "ingest",
            ProgressStage::Subtitle => "subtitle",
            ProgressStage::Analyze => "analyze",
            ProgressStage::Highlight => "highlight",
            ProgressStage::Export => "export",
            ProgressStage::Done => "done",
            ProgressStage::Error => "error",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "ingest" => Some(ProgressStage::Ingest),
            "subtitle" => Some(ProgressStage::Subtitle),
            "analyze" => Some(ProgressStage::Analyze),
            "highlight" => Some(ProgressStage::Highlight),
            "export" => Some(ProgressStage::Export),
            "done" => Some(ProgressStage::Done),
            "error" => Some(ProgressStage::Error),
            _ => None,
        }
    }
}

impl From<Stage> for ProgressStage {
    fn from(stage: Stage) -> Self {
        match stage {
            Stage::Ingest => ProgressStage::Ingest,
            Stage::Subtitle => ProgressStage::Subtitle,
            Stage::Analyze => ProgressStage::Analyze,
            Stage::Highlight => ProgressStage::Highlight,
            Stage::Export => ProgressStage::Export,
            Stage::Done => ProgressStage::Done,
        }
    }
}

/// A progress event as produced by the orchestrator and carried through the
/// fabric. The snapshot stored per channel has the same shape with
/// `snapshot` forced to true on replay.
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
pub struct ProgressUpdate {
    pub project_id: ProjectId,
    pub stage: ProgressStage,
    /// 0-100, clamped by the fabric on publish
    pub percent: u8,
    pub message: String,
    /// Coarse run state for clients
    pub status: ProjectStatus,
    /// Milliseconds since epoch, set by the producer and overwritten with
    /// server time when the snapshot is written
    pub timestamp_ms: i64,
    /// True when this event is a snapshot replay, not a live publication
    #[serde(default, skip_serializing_if = "is_false")]
    pub snapshot: bool,
}

fn is_false(b: &bool) -> bool {
    !*b
}

impl ProgressUpdate {
    pub fn new(
        project_id: ProjectId,
        stage: impl Into<ProgressStage>,
        percent: u8,
        message: impl Into<String>,
        status: ProjectStatus,
    ) -> Self {
        Self {
            project_id,
            stage: stage.into(),
            percent: percent.min(100),
            message: message.into(),
            status,
            timestamp_ms: Utc::now().timestamp_millis(),
            snapshot: false,
        }
    }

    /// An error event at the current stage boundary.
    pub fn error(project_id: ProjectId, percent: u8, message: impl Into<String>, status: ProjectStatus) -> Self {
        Self::new(project_id, ProgressStage::Error, percent, message, status)
    }

    /// Mark this event as a snapshot replay.
    pub fn as_snapshot(mut self) -> Self {
        self.snapshot = true;
        self
    }
}

/// Alias used where the snapshot role matters for readability.
pub type ProgressSnapshot = ProgressUpdate;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn percent_clamped_at_construction() {
        let update = ProgressUpdate::new(
            ProjectId::from_string("p1"),
            Stage::Analyze,
            255,
            "analyzing",
            ProjectStatus::Processing,
        );
        assert_eq!(update.percent, 100);
    }

    #[test]
    fn snapshot_flag_omitted_when_false() {
        let update = ProgressUpdate::new(
            ProjectId::from_string("p1"),
            Stage::Done,
            100,
            "done",
            ProjectStatus::Completed,
        );
        let json = serde_json::to_string(&update).unwrap();
        assert!(!json.contains("snapshot"));

        let json = serde_json::to_string(&update.as_snapshot()).unwrap();
        assert!(json.contains("\"snapshot\":true"));
    }

    #[test]
    fn stage_string_round_trips() {
        for s in [
            ProgressStage::Ingest,
            ProgressStage::Subtitle,
            ProgressStage::Analyze,
            ProgressStage::Highlight,
            ProgressStage::Export,
            ProgressStage::Done,
            ProgressStage::Error,
        ] {
            assert_eq!(ProgressStage::parse(s.as_str()), Some(s));
        }
    }
}
