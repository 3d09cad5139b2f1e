//! Project model and status state machine.

use chrono::{DateTime, Utc};
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

use crate::ids::ProjectId;
use crate::stage::Stage;

/// Lifecycle status of a project.
///
/// Transitions are enforced by the orchestrator via compare-and-swap updates;
/// see [`ProjectStatus::can_transition_to`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, JsonSchema, Default)]
#[serde(rename_all = "snake_case")]
pub enum ProjectStatus {
    /// Created, no run enqueued yet
    #[default]
    Pending,
    /// Remote source is being materialised
    Downloading,
    /// Pipeline stages are executing
    Processing,
    /// Pipeline finished, clips and collections exist
    Completed,
    /// A stage failed; the error record carries details
    Failed,
    /// A cooperative cancel was observed
    Cancelled,
}

impl ProjectStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            ProjectStatus::Pending => "pending",
            ProjectStatus::Downloading => "downloading",
            ProjectStatus::Processing => "processing",
            ProjectStatus::Completed => "completed",
            ProjectStatus::Failed => "failed",
            ProjectStatus::Cancelled => "cancelled",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "pending" => Some(ProjectStatus::Pending),
            "downloading" => Some(ProjectStatus::Downloading),
            "processing" => Some(ProjectStatus::Processing),
            "completed" => Some(ProjectStatus::Completed),
            "failed" => Some(ProjectStatus::Failed),
            "cancelled" => Some(ProjectStatus::Cancelled),
            _ => None,
        }
    }

    /// Completed, Failed and Cancelled are terminal.
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            ProjectStatus::Completed | ProjectStatus::Failed | ProjectStatus::Cancelled
        )
    }

    /// Whether the status transition diagram allows `self -> to`.
    pub fn can_transition_to(&self, to: ProjectStatus) -> bool {
        use ProjectStatus::*;
        match (self, to) {
            (Pending, Downloading) | (Pending, Processing) => true,
            (Downloading, Processing) => true,
            (Processing, Completed) => true,
            // Any non-terminal state can be cancelled or failed.
            (from, Cancelled) | (from, Failed) if !from.is_terminal() => true,
            // Retry re-enters the pipeline from a failed or cancelled state.
            (Failed, Processing) | (Failed, Downloading) => true,
            (Cancelled, Processing) | (Cancelled, Downloading) => true,
            _ => false,
        }
    }
}

/// Fixed category tag assigned at creation time.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, JsonSchema, Default)]
#[serde(rename_all = "snake_case")]
pub enum ProjectCategory {
    #[default]
    Default,
    Knowledge,
    Business,
    Opinion,
    Experience,
    Speech,
    Content,
    Entertainment,
}

impl ProjectCategory {
    pub fn as_str(&self) -> &'static str {
        match self {
            ProjectCategory::Default => "default",
            ProjectCategory::Knowledge => "knowledge",
            ProjectCategory::Business => "business",
            ProjectCategory::Opinion => "opinion",
            ProjectCategory::Experience => "experience",
            ProjectCategory::Speech => "speech",
            ProjectCategory::Content => "content",
            ProjectCategory::Entertainment => "entertainment",
        }
    }
}

/// Supported remote video platforms.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "snake_case")]
pub enum RemotePlatform {
    Youtube,
    Bilibili,
    Douyin,
}

impl RemotePlatform {
    pub fn as_str(&self) -> &'static str {
        match self {
            RemotePlatform::Youtube => "youtube",
            RemotePlatform::Bilibili => "bilibili",
            RemotePlatform::Douyin => "douyin",
        }
    }
}

/// Where the source video comes from.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum ProjectSource {
    /// A local multipart upload; the file lands in the uploads area first.
    Upload {
        file_name: String,
    },
    /// A remote URL fetched by the downloader capability.
    Remote {
        url: String,
        platform: RemotePlatform,
        /// Cookie jar for platforms that need authenticated downloads.
        #[serde(skip_serializing_if = "Option::is_none")]
        cookie_jar_id: Option<String>,
    },
}

impl ProjectSource {
    pub fn is_remote(&self) -> bool {
        matches!(self, ProjectSource::Remote { .. })
    }

    /// The status a fresh run starts in: remote sources download first.
    pub fn initial_run_status(&self) -> ProjectStatus {
        if self.is_remote() {
            ProjectStatus::Downloading
        } else {
            ProjectStatus::Processing
        }
    }
}

/// Captured failure details, stored as JSON on the project row.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
pub struct ErrorInfo {
    /// Stage that failed
    pub stage: String,
    /// Safe, human-readable message
    pub message: String,
}

impl ErrorInfo {
    pub fn new(stage: Stage, message: impl Into<String>) -> Self {
        Self {
            stage: stage.as_str().to_string(),
            message: message.into(),
        }
    }
}

/// Per-project pipeline settings blob.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
pub struct ProjectSettings {
    /// Subtitle window size fed to the language model, in seconds.
    #[serde(default = "default_chunk_seconds")]
    pub chunk_seconds: u32,

    /// Upper bound on clips selected per project.
    #[serde(default = "default_max_clips")]
    pub max_clips: u32,

    /// Minimum score an interval needs to become a clip.
    #[serde(default = "default_min_score")]
    pub min_score: f64,

    /// Whether the retention janitor may delete this project once completed.
    #[serde(default)]
    pub auto_prune: bool,
}

fn default_chunk_seconds() -> u32 {
    300
}

fn default_max_clips() -> u32 {
    10
}

fn default_min_score() -> f64 {
    0.5
}

impl Default for ProjectSettings {
    fn default() -> Self {
        Self {
            chunk_seconds: default_chunk_seconds(),
            max_clips: default_max_clips(),
            min_score: default_min_score(),
            auto_prune: false,
        }
    }
}

/// A single processing run of one source video.
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
pub struct Project {
    /// Unique project id
    pub id: ProjectId,

    /// Human-readable name
    pub name: String,

    /// Optional description
    #[serde(skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,

    /// Category tag
    #[serde(default)]
    pub category: ProjectCategory,

    /// Source descriptor
    pub source: ProjectSource,

    /// Current status
    #[serde(default)]
    pub status: ProjectStatus,

    /// Index of the last stage entered (0 before INGEST, 6 after DONE)
    #[serde(default)]
    pub current_stage: u8,

    /// Progress percent, 0-100, monotone while a run is active
    #[serde(default)]
    pub progress: u8,

    /// Failure details when status is Failed
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<ErrorInfo>,

    /// Canonical absolute path of the materialised video, once ingested
    #[serde(skip_serializing_if = "Option::is_none")]
    pub video_path: Option<String>,

    /// Canonical absolute path of the subtitle file, once ingested
    #[serde(skip_serializing_if = "Option::is_none")]
    pub subtitle_path: Option<String>,

    /// Source video duration in seconds, known after ingest
    #[serde(skip_serializing_if = "Option::is_none")]
    pub video_duration: Option<f64>,

    /// Pipeline settings
    #[serde(default)]
    pub settings: ProjectSettings,

    /// Set when the post-pipeline data sync failed and needs a retry
    #[serde(default)]
    pub sync_pending: bool,

    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub completed_at: Option<DateTime<Utc>>,
}

impl Project {
    /// Create a new pending project.
    pub fn new(name: impl Into<String>, source: ProjectSource) -> Self {
        let now = Utc::now();
        Self {
            id: ProjectId::new(),
            name: name.into(),
            description: None,
            category: ProjectCategory::default(),
            source,
            status: ProjectStatus::Pending,
            current_stage: 0,
            progress: 0,
            error: None,
            video_path: None,
            subtitle_path: None,
            video_duration: None,
            settings: ProjectSettings::default(),
            sync_pending: false,
            created_at: now,
            updated_at: now,
            completed_at: None,
        }
    }

    pub fn with_category(mut self, category: ProjectCategory) -> Self {
        self.category = category;
        self
    }

    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = Some(description.into());
        self
    }

    pub fn with_settings(mut self, settings: ProjectSettings) -> Self {
        self.settings = settings;
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn terminal_states() {
        assert!(ProjectStatus::Completed.is_terminal());
        assert!(ProjectStatus::Failed.is_terminal());
        assert!(ProjectStatus::Cancelled.is_terminal());
        assert!(!ProjectStatus::Processing.is_terminal());
    }

    #[test]
    fn transition_diagram() {
        use ProjectStatus::*;
        assert!(Pending.can_transition_to(Downloading));
        assert!(Pending.can_transition_to(Processing));
        assert!(Downloading.can_transition_to(Processing));
        assert!(Processing.can_transition_to(Completed));
        assert!(Processing.can_transition_to(Cancelled));
        assert!(Downloading.can_transition_to(Failed));
        assert!(Failed.can_transition_to(Processing));
        assert!(Cancelled.can_transition_to(Downloading));

        // Terminal states cannot be cancelled or failed again.
        assert!(!Completed.can_transition_to(Cancelled));
        assert!(!Completed.can_transition_to(Failed));
        assert!(!Failed.can_transition_to(Cancelled));
        assert!(!Completed.can_transition_to(Processing));
    }

    #[test]
    fn remote_source_downloads_first() {
        let remote = ProjectSource::Remote {
            url: "https://youtube.com/watch?v=abc".into(),
            platform: RemotePlatform::Youtube,
            cookie_jar_id: None,
        };
        assert_eq!(remote.initial_run_status(), ProjectStatus::Downloading);

        let upload = ProjectSource::Upload {
            file_name: "video.mp4".into(),
        };
        assert_eq!(upload.initial_run_status(), ProjectStatus::Processing);
    }
}
