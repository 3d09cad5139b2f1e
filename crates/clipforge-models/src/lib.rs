//! Shared data models for the ClipForge backend.
//!
//! This crate provides Serde-serializable types for:
//! - Projects, tasks and their status state machines
//! - Clips and collections (database rows and on-disk metadata drafts)
//! - Pipeline stages and their fixed progress weights
//! - Progress events and their canonical channel names
//! - WebSocket gateway frames

pub mod channel;
pub mod clip;
pub mod collection;
pub mod ids;
pub mod progress;
pub mod project;
pub mod stage;
pub mod task;
pub mod ws;

pub use channel::{normalize_channel, project_id_of_channel, CHANNEL_PREFIX};
pub use clip::{Clip, ClipDraft, ClipMetadata};
pub use collection::{Collection, CollectionDraft, CollectionStatus};
pub use ids::{ClipId, CollectionId, ProjectId, TaskId};
pub use progress::{ProgressSnapshot, ProgressStage, ProgressUpdate};
pub use project::{
    ErrorInfo, Project, ProjectCategory, ProjectSettings, ProjectSource, ProjectStatus,
    RemotePlatform,
};
pub use stage::{Stage, StageSummary, ALL_STAGES};
pub use task::{Task, TaskKind, TaskStatus};
pub use ws::{RunState, WsClientFrame, WsServerFrame};
