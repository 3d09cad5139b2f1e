//! Canonical per-project path layout.

use std::path::{Path, PathBuf};

use clipforge_models::{ClipId, CollectionId, ProjectId, Stage};

/// Path helpers for one project's directory tree. Constructed by
/// [`crate::ContentStore`]; the root is already canonical and absolute.
#[derive(Debug, Clone)]
pub struct ProjectLayout {
    project_dir: PathBuf,
}

impl ProjectLayout {
    pub(crate) fn new(projects_root: &Path, project_id: &ProjectId) -> Self {
        Self {
            project_dir: projects_root.join(project_id.as_str()),
        }
    }

    pub fn project_dir(&self) -> &Path {
        &self.project_dir
    }

    pub fn raw_dir(&self) -> PathBuf {
        self.project_dir.join("raw")
    }

    pub fn processing_dir(&self) -> PathBuf {
        self.project_dir.join("processing")
    }

    pub fn output_dir(&self) -> PathBuf {
        self.project_dir.join("output")
    }

    pub fn metadata_dir(&self) -> PathBuf {
        self.project_dir.join("metadata")
    }

    /// Raw video file; the extension follows the source container.
    pub fn raw_video(&self, ext: &str) -> PathBuf {
        self.raw_dir().join(format!("video.{}", ext.trim_start_matches('.')))
    }

    pub fn raw_subtitle(&self) -> PathBuf {
        self.raw_dir().join("subtitle.srt")
    }

    /// Time-indexed subtitle chunks produced by the subtitle stage.
    pub fn subtitle_chunks(&self) -> PathBuf {
        self.processing_dir().join("subtitle_chunks.json")
    }

    pub fn outline(&self) -> PathBuf {
        self.processing_dir().join("step1_outline.json")
    }

    pub fn timeline(&self) -> PathBuf {
        self.processing_dir().join("step2_timeline.json")
    }

    pub fn scoring(&self) -> PathBuf {
        self.processing_dir().join("step3_scoring.json")
    }

    pub fn titles(&self) -> PathBuf {
        self.processing_dir().join("step4_title.json")
    }

    pub fn clustering(&self) -> PathBuf {
        self.processing_dir().join("step5_clustering.json")
    }

    pub fn clips_output_dir(&self) -> PathBuf {
        self.output_dir().join("clips")
    }

    pub fn collections_output_dir(&self) -> PathBuf {
        self.output_dir().join("collections")
    }

    pub fn clip_output(&self, clip_id: &ClipId) -> PathBuf {
        self.clips_output_dir().join(format!("{}.mp4", clip_id))
    }

    /// Output path for a clip identified by its natural (artifact) id.
    pub fn clip_output_natural(&self, natural_id: &str) -> PathBuf {
        self.clips_output_dir().join(format!("{natural_id}.mp4"))
    }

    pub fn collection_output(&self, collection_id: &CollectionId) -> PathBuf {
        self.collections_output_dir()
            .join(format!("{}.mp4", collection_id))
    }

    pub fn collection_output_natural(&self, natural_id: &str) -> PathBuf {
        self.collections_output_dir().join(format!("{natural_id}.mp4"))
    }

    pub fn clips_metadata(&self) -> PathBuf {
        self.metadata_dir().join("clips_metadata.json")
    }

    pub fn collections_metadata(&self) -> PathBuf {
        self.metadata_dir().join("collections_metadata.json")
    }

    /// The artifacts a stage must find on disk before it can run.
    pub fn stage_preconditions(&self, stage: Stage) -> Vec<PathBuf> {
        match stage {
            Stage::Ingest => Vec::new(),
            // The subtitle stage reads the raw subtitle written by ingest.
            Stage::Subtitle => vec![self.raw_subtitle()],
            Stage::Analyze => vec![self.subtitle_chunks()],
            Stage::Highlight => vec![self.outline(), self.timeline()],
            Stage::Export => vec![self.scoring(), self.titles(), self.clustering()],
            Stage::Done => vec![self.scoring(), self.titles(), self.clustering()],
        }
    }

    /// The JSON artifacts a stage writes on success.
    pub fn stage_artifacts(&self, stage: Stage) -> Vec<PathBuf> {
        match stage {
            Stage::Ingest => Vec::new(),
            Stage::Subtitle => vec![self.subtitle_chunks()],
            Stage::Analyze => vec![self.outline(), self.timeline()],
            Stage::Highlight => vec![self.scoring(), self.titles(), self.clustering()],
            Stage::Export => Vec::new(),
            Stage::Done => vec![self.clips_metadata(), self.collections_metadata()],
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn layout_paths() {
        let layout = ProjectLayout::new(Path::new("/data/projects"), &ProjectId::from_string("p1"));
        assert_eq!(
            layout.raw_video("mp4"),
            PathBuf::from("/data/projects/p1/raw/video.mp4")
        );
        assert_eq!(
            layout.outline(),
            PathBuf::from("/data/projects/p1/processing/step1_outline.json")
        );
        assert_eq!(
            layout.clips_metadata(),
            PathBuf::from("/data/projects/p1/metadata/clips_metadata.json")
        );
    }

    #[test]
    fn extension_dot_is_stripped() {
        let layout = ProjectLayout::new(Path::new("/d"), &ProjectId::from_string("p"));
        assert_eq!(layout.raw_video(".mkv"), layout.raw_video("mkv"));
    }

    #[test]
    fn highlight_needs_analyze_artifacts() {
        let layout = ProjectLayout::new(Path::new("/d"), &ProjectId::from_string("p"));
        let pre = layout.stage_preconditions(Stage::Highlight);
        assert!(pre.contains(&layout.outline()));
        assert!(pre.contains(&layout.timeline()));
    }
}
