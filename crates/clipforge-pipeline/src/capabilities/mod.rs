//! External capabilities invoked by the stages.
//!
//! The orchestrator treats these as opaque: a language model that maps a
//! named prompt plus input text to text, a downloader that materialises a
//! media file, a transcriber that produces a subtitle file, and a cutter
//! that writes frame-cut output files. Stages depend on the traits only, so
//! tests swap in mocks.

mod llm;
mod media;

use std::path::{Path, PathBuf};
use std::sync::Arc;

use async_trait::async_trait;
use tokio_util::sync::CancellationToken;

use crate::error::PipelineResult;

pub use llm::HttpLlmClient;
pub use media::{FfmpegCutter, WhisperTranscriber, YtDlpDownloader};

/// Named prompts the pipeline uses. The prompt text itself lives with the
/// provider; stages only pick the kind and supply input.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum LlmKind {
    Outline,
    Timeline,
    Scoring,
    Title,
    Clustering,
    /// One-shot fixup of a schema-invalid response.
    Repair,
}

impl LlmKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            LlmKind::Outline => "outline",
            LlmKind::Timeline => "timeline",
            LlmKind::Scoring => "scoring",
            LlmKind::Title => "title",
            LlmKind::Clustering => "clustering",
            LlmKind::Repair => "repair",
        }
    }
}

/// Opaque language model call.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait LlmClient: Send + Sync {
    /// Run the named prompt over `input` and return the raw response text.
    async fn call(&self, kind: LlmKind, input: &str) -> PipelineResult<String>;
}

/// Fetches a remote source video into the content store.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait MediaDownloader: Send + Sync {
    /// Download `url` to `dest`. Implementations check `cancel` at their
    /// subprocess boundaries.
    async fn download<'a>(
        &self,
        url: &str,
        cookie_jar: Option<&'a Path>,
        dest: &Path,
        cancel: &CancellationToken,
    ) -> PipelineResult<()>;
}

/// Speech recognition producing a subtitle file.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait Transcriber: Send + Sync {
    async fn transcribe(
        &self,
        video: &Path,
        dest_srt: &Path,
        cancel: &CancellationToken,
    ) -> PipelineResult<()>;
}

/// Frame-accurate cutting and concatenation.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait ClipCutter: Send + Sync {
    /// Cut `[start, end]` seconds of `source` into `dest`.
    async fn cut(
        &self,
        source: &Path,
        start: f64,
        end: f64,
        dest: &Path,
        cancel: &CancellationToken,
    ) -> PipelineResult<()>;

    /// Concatenate `inputs` in order into `dest`.
    async fn concat(
        &self,
        inputs: &[PathBuf],
        dest: &Path,
        cancel: &CancellationToken,
    ) -> PipelineResult<()>;

    /// Container duration of `source` in seconds.
    async fn probe_duration(&self, source: &Path) -> PipelineResult<f64>;
}

/// Bundle of capabilities handed to the stages.
#[derive(Clone)]
pub struct Capabilities {
    pub llm: Arc<dyn LlmClient>,
    pub downloader: Arc<dyn MediaDownloader>,
    pub transcriber: Arc<dyn Transcriber>,
    pub cutter: Arc<dyn ClipCutter>,
}

impl Capabilities {
    pub fn new(
        llm: Arc<dyn LlmClient>,
        downloader: Arc<dyn MediaDownloader>,
        transcriber: Arc<dyn Transcriber>,
        cutter: Arc<dyn ClipCutter>,
    ) -> Self {
        Self {
            llm,
            downloader,
            transcriber,
            cutter,
        }
    }
}
