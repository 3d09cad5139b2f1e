//! WebSocket gateway frames.
//!
//! Clients send [`WsClientFrame`]; the gateway replies with
//! [`WsServerFrame`]. Progress frames are a simplified projection of the
//! internal [`crate::ProgressUpdate`]: clients see a coarse run state, not
//! the full error taxonomy.

use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

use crate::progress::{ProgressStage, ProgressUpdate};
use crate::project::ProjectStatus;

/// Coarse run state carried on client-facing frames.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "snake_case")]
pub enum RunState {
    Running,
    Completed,
    Failed,
    Cancelled,
}

impl RunState {
    pub fn as_str(&self) -> &'static str {
        match self {
            RunState::Running => "running",
            RunState::Completed => "completed",
            RunState::Failed => "failed",
            RunState::Cancelled => "cancelled",
        }
    }
}

impl From<ProjectStatus> for RunState {
    fn from(status: ProjectStatus) -> Self {
        match status {
            ProjectStatus::Completed => RunState::Completed,
            ProjectStatus::Failed => RunState::Failed,
            ProjectStatus::Cancelled => RunState::Cancelled,
            ProjectStatus::Pending | ProjectStatus::Downloading | ProjectStatus::Processing => {
                RunState::Running
            }
        }
    }
}

/// Frames sent by the client.
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum WsClientFrame {
    /// Replace the desired subscription set with these projects.
    SyncSubscriptions {
        /// Project ids in any accepted channel spelling
        project_ids: Vec<String>,
    },
    /// Heartbeat; the gateway replies with `pong` immediately.
    Ping,
}

/// Frames sent by the gateway.
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum WsServerFrame {
    /// Simplified progress frame.
    Progress {
        project_id: String,
        stage: ProgressStage,
        percent: u8,
        status: RunState,
        /// Present and true only on snapshot replays
        #[serde(default, skip_serializing_if = "is_false")]
        snapshot: bool,
    },
    Pong,
    /// Terminal notice before the gateway closes a misbehaving connection.
    Error { message: String },
}

fn is_false(b: &bool) -> bool {
    !*b
}

impl WsServerFrame {
    /// Project a rich internal event onto the client frame.
    pub fn from_update(update: &ProgressUpdate) -> Self {
        WsServerFrame::Progress {
            project_id: update.project_id.to_string(),
            stage: update.stage,
            percent: update.percent,
            status: update.status.into(),
            snapshot: update.snapshot,
        }
    }

    pub fn error(message: impl Into<String>) -> Self {
        WsServerFrame::Error {
            message: message.into(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ids::ProjectId;
    use crate::stage::Stage;

    #[test]
    fn client_frame_parses() {
        let frame: WsClientFrame =
            serde_json::from_str(r#"{"type":"sync_subscriptions","project_ids":["p1","p2"]}"#)
                .unwrap();
        match frame {
            WsClientFrame::SyncSubscriptions { project_ids } => {
                assert_eq!(project_ids, vec!["p1", "p2"]);
            }
            _ => panic!("expected sync_subscriptions"),
        }

        let frame: WsClientFrame = serde_json::from_str(r#"{"type":"ping"}"#).unwrap();
        assert!(matches!(frame, WsClientFrame::Ping));
    }

    #[test]
    fn progress_frame_serialization() {
        let update = ProgressUpdate::new(
            ProjectId::from_string("p1"),
            Stage::Highlight,
            45,
            "scoring",
            ProjectStatus::Processing,
        );
        let json = serde_json::to_string(&WsServerFrame::from_update(&update)).unwrap();
        assert!(json.contains("\"type\":\"progress\""));
        assert!(json.contains("\"stage\":\"highlight\""));
        assert!(json.contains("\"status\":\"running\""));
        assert!(!json.contains("snapshot"));

        let json =
            serde_json::to_string(&WsServerFrame::from_update(&update.as_snapshot())).unwrap();
        assert!(json.contains("\"snapshot\":true"));
    }

    #[test]
    fn run_state_projection() {
        assert_eq!(RunState::from(ProjectStatus::Pending), RunState::Running);
        assert_eq!(RunState::from(ProjectStatus::Downloading), RunState::Running);
        assert_eq!(RunState::from(ProjectStatus::Failed), RunState::Failed);
    }
}
