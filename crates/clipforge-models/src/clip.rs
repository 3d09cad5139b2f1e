//! Clip models: database rows and on-disk metadata drafts.

use chrono::{DateTime, Utc};
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

use crate::ids::{ClipId, ProjectId};

/// Extra clip fields kept as a JSON blob on the row.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize, JsonSchema)]
pub struct ClipMetadata {
    /// Natural id from the pipeline artifact, recorded during data sync
    #[serde(skip_serializing_if = "Option::is_none")]
    pub original_id: Option<String>,

    /// Outline excerpt the interval was drawn from
    #[serde(skip_serializing_if = "Option::is_none")]
    pub outline: Option<String>,

    /// Why the model recommended this interval
    #[serde(skip_serializing_if = "Option::is_none")]
    pub recommend_reason: Option<String>,

    /// Index of the subtitle chunk the interval came from
    #[serde(skip_serializing_if = "Option::is_none")]
    pub chunk_index: Option<u32>,

    /// Path of the detailed per-clip JSON artifact in the content store
    #[serde(skip_serializing_if = "Option::is_none")]
    pub detail_path: Option<String>,
}

/// A highlight clip row. `start_time < end_time` always holds; both are
/// seconds into the source video.
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
pub struct Clip {
    pub id: ClipId,
    pub project_id: ProjectId,
    pub title: String,

    /// Model score in [0,1]
    pub score: f64,

    pub start_time: f64,
    pub end_time: f64,

    /// Canonical absolute path of the cut file, once exported
    #[serde(skip_serializing_if = "Option::is_none")]
    pub output_path: Option<String>,

    #[serde(default)]
    pub metadata: ClipMetadata,

    pub created_at: DateTime<Utc>,
}

impl Clip {
    /// Derived duration in seconds.
    pub fn duration(&self) -> f64 {
        self.end_time - self.start_time
    }
}

/// A clip entry as written to `metadata/clips_metadata.json` by the DONE
/// stage. Identified by its natural id until data sync assigns a row id.
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
pub struct ClipDraft {
    /// Natural id, unique within the artifact
    pub id: String,
    pub title: String,
    pub score: f64,
    pub start_time: f64,
    pub end_time: f64,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub output_path: Option<String>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub outline: Option<String>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub recommend_reason: Option<String>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub chunk_index: Option<u32>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub detail_path: Option<String>,
}

impl ClipDraft {
    /// Whether the interval is well-formed against the source duration.
    pub fn validate(&self, video_duration: Option<f64>) -> bool {
        if !(self.start_time >= 0.0 && self.start_time < self.end_time) {
            return false;
        }
        if !(0.0..=1.0).contains(&self.score) {
            return false;
        }
        match video_duration {
            Some(duration) => self.end_time <= duration,
            None => true,
        }
    }
}

/// Materialise a database row from a draft during data sync.
impl ClipDraft {
    pub fn into_clip(self, project_id: ProjectId) -> Clip {
        Clip {
            id: ClipId::new(),
            project_id,
            title: self.title,
            score: self.score,
            start_time: self.start_time,
            end_time: self.end_time,
            output_path: self.output_path,
            metadata: ClipMetadata {
                original_id: Some(self.id),
                outline: self.outline,
                recommend_reason: self.recommend_reason,
                chunk_index: self.chunk_index,
                detail_path: self.detail_path,
            },
            created_at: Utc::now(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn draft(start: f64, end: f64, score: f64) -> ClipDraft {
        ClipDraft {
            id: "c1".into(),
            title: "t".into(),
            score,
            start_time: start,
            end_time: end,
            output_path: None,
            outline: None,
            recommend_reason: None,
            chunk_index: None,
            detail_path: None,
        }
    }

    #[test]
    fn draft_validation() {
        assert!(draft(0.0, 10.0, 0.5).validate(Some(60.0)));
        assert!(!draft(10.0, 10.0, 0.5).validate(Some(60.0)));
        assert!(!draft(-1.0, 10.0, 0.5).validate(Some(60.0)));
        assert!(!draft(0.0, 61.0, 0.5).validate(Some(60.0)));
        assert!(!draft(0.0, 10.0, 1.5).validate(Some(60.0)));
        // Unknown duration only checks ordering.
        assert!(draft(0.0, 1e9, 0.5).validate(None));
    }

    #[test]
    fn draft_keeps_natural_id_in_metadata() {
        let clip = draft(0.0, 12.5, 0.9).into_clip(ProjectId::from_string("p1"));
        assert_eq!(clip.metadata.original_id.as_deref(), Some("c1"));
        assert!((clip.duration() - 12.5).abs() < f64::EPSILON);
    }
}
