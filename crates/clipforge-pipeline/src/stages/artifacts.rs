//! On-disk JSON artifact shapes, one per stage output.
//!
//! Stages communicate exclusively through these files; the next stage reads
//! only what the previous one wrote to disk, which is what makes resuming
//! from an arbitrary stage meaningful.

use serde::{Deserialize, Serialize};

use crate::subtitle::SubtitleChunk;

/// `processing/subtitle_chunks.json`
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SubtitleChunksArtifact {
    pub video_duration: f64,
    pub chunks: Vec<SubtitleChunk>,
}

/// One outline entry extracted from a chunk.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OutlineEntry {
    pub chunk_index: u32,
    pub heading: String,
    pub summary: String,
}

/// `processing/step1_outline.json`
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OutlineArtifact {
    pub entries: Vec<OutlineEntry>,
}

/// Response shape of the `outline` prompt.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OutlineResponse {
    pub entries: Vec<OutlineResponseEntry>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OutlineResponseEntry {
    pub heading: String,
    pub summary: String,
}

/// A topic interval proposed by the `timeline` prompt.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TopicInterval {
    /// Natural id, unique within the run.
    pub id: u32,
    pub start: f64,
    pub end: f64,
    pub topic: String,
    pub chunk_index: u32,
}

/// `processing/step2_timeline.json`
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TimelineArtifact {
    pub intervals: Vec<TopicInterval>,
}

/// Response shape of the `timeline` prompt.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TimelineResponse {
    pub intervals: Vec<TopicInterval>,
}

/// A scored interval.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ScoredInterval {
    #[serde(flatten)]
    pub interval: TopicInterval,
    /// Model score in [0,1].
    pub score: f64,
    pub reasons: Vec<String>,
}

/// `processing/step3_scoring.json`
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ScoringArtifact {
    pub scored: Vec<ScoredInterval>,
}

/// Response shape of the `scoring` prompt.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ScoreResponse {
    pub score: f64,
    #[serde(default)]
    pub reasons: Vec<String>,
}

/// A selected interval with its generated title.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TitledInterval {
    #[serde(flatten)]
    pub scored: ScoredInterval,
    pub title: String,
}

/// `processing/step4_title.json`
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TitlesArtifact {
    pub selected: Vec<TitledInterval>,
}

/// Response shape of the `title` prompt.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TitleResponse {
    pub title: String,
}

/// One clustered collection over selected intervals.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CollectionCluster {
    /// Natural id, unique within the run.
    pub id: u32,
    pub title: String,
    #[serde(default)]
    pub description: Option<String>,
    /// Natural ids of member intervals, in display order.
    pub interval_ids: Vec<u32>,
}

/// `processing/step5_clustering.json`
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ClusteringArtifact {
    pub collections: Vec<CollectionCluster>,
}

/// Response shape of the `clustering` prompt.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ClusteringResponse {
    pub collections: Vec<CollectionCluster>,
}
