//! Collection models: ordered thematic groupings of clips.

use chrono::{DateTime, Utc};
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

use crate::ids::{ClipId, CollectionId, ProjectId};

/// Export lifecycle of a collection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, JsonSchema, Default)]
#[serde(rename_all = "snake_case")]
pub enum CollectionStatus {
    #[default]
    Created,
    Exported,
}

impl CollectionStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            CollectionStatus::Created => "created",
            CollectionStatus::Exported => "exported",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "created" => Some(CollectionStatus::Created),
            "exported" => Some(CollectionStatus::Exported),
            _ => None,
        }
    }
}

/// An ordered grouping of clips under a common theme. Order is observable
/// and user-editable; clip ids are unique within the list and reference
/// clips of the same project.
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
pub struct Collection {
    pub id: CollectionId,
    pub project_id: ProjectId,
    pub title: String,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,

    pub clip_ids: Vec<ClipId>,

    #[serde(default)]
    pub status: CollectionStatus,

    /// Canonical absolute path of the concatenated export, once produced
    #[serde(skip_serializing_if = "Option::is_none")]
    pub export_path: Option<String>,

    pub created_at: DateTime<Utc>,
}

/// A collection entry as written to `metadata/collections_metadata.json`.
/// Member clips are referenced by natural id; data sync rewrites them to
/// database ids.
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
pub struct CollectionDraft {
    pub id: String,
    pub title: String,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,

    /// Natural ids of member clips, in display order
    pub clip_ids: Vec<String>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn status_round_trips() {
        assert_eq!(CollectionStatus::parse("created"), Some(CollectionStatus::Created));
        assert_eq!(CollectionStatus::parse("exported"), Some(CollectionStatus::Exported));
        assert_eq!(CollectionStatus::parse("bogus"), None);
    }
}
