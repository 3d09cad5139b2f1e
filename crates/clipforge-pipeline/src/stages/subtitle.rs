//! SUBTITLE: parse the SRT and chunk it into language model windows.

use clipforge_models::{Stage, StageSummary};

use crate::error::PipelineResult;
use crate::stages::artifacts::SubtitleChunksArtifact;
use crate::stages::StageContext;
use crate::subtitle::{chunk_cues, parse_srt};

pub async fn run(ctx: &StageContext) -> PipelineResult<StageSummary> {
    let raw = ctx.store.read(&ctx.layout.raw_subtitle()).await?;
    let content = String::from_utf8_lossy(&raw);

    let cues = parse_srt(&content)?;
    ctx.check_cancel()?;
    ctx.reporter
        .stage_progress(Stage::Subtitle, 40, format!("parsed {} cues", cues.len()))
        .await;

    let chunks = chunk_cues(&cues, ctx.project.settings.chunk_seconds);

    let project = ctx.fresh_project().await?;
    let video_duration = project
        .video_duration
        .unwrap_or_else(|| cues.last().map(|c| c.end).unwrap_or(0.0));

    let artifact = SubtitleChunksArtifact {
        video_duration,
        chunks,
    };
    ctx.store
        .write_json(&ctx.layout.subtitle_chunks(), &artifact)
        .await?;

    Ok(StageSummary::with_items(artifact.chunks.len() as u32))
}
