//! ANALYZE: outline each chunk, then derive a topic timeline.

use clipforge_models::{Stage, StageSummary};

use crate::capabilities::LlmKind;
use crate::error::{PipelineError, PipelineResult};
use crate::retry::call_typed;
use crate::stages::artifacts::{
    OutlineArtifact, OutlineEntry, OutlineResponse, SubtitleChunksArtifact, TimelineArtifact,
    TimelineResponse,
};
use crate::stages::StageContext;

pub async fn run(ctx: &StageContext) -> PipelineResult<StageSummary> {
    let chunks: SubtitleChunksArtifact =
        ctx.store.read_json(&ctx.layout.subtitle_chunks()).await?;
    if chunks.chunks.is_empty() {
        return Err(PipelineError::unrecoverable("no subtitle chunks to analyze"));
    }

    let mut warnings = Vec::new();

    // Outline pass, one model call per chunk.
    let mut entries = Vec::new();
    let total = chunks.chunks.len();
    for (i, chunk) in chunks.chunks.iter().enumerate() {
        ctx.check_cancel()?;

        let response: OutlineResponse =
            call_typed(&ctx.caps.llm, &ctx.retry, LlmKind::Outline, &chunk.text).await?;
        if response.entries.is_empty() {
            warnings.push(format!("chunk {} produced no outline entries", chunk.index));
        }
        for entry in response.entries {
            entries.push(OutlineEntry {
                chunk_index: chunk.index,
                heading: entry.heading,
                summary: entry.summary,
            });
        }

        // First half of the stage window covers the outline pass.
        let sub = ((i + 1) * 50 / total) as u8;
        ctx.reporter
            .stage_progress(
                Stage::Analyze,
                sub,
                format!("outlined chunk {}/{}", i + 1, total),
            )
            .await;
    }

    let outline = OutlineArtifact { entries };
    ctx.store
        .write_json(&ctx.layout.outline(), &outline)
        .await?;
    ctx.check_cancel()?;

    // Timeline pass over the whole outline.
    let outline_json = serde_json::to_string(&outline)
        .map_err(|e| PipelineError::internal(format!("outline serialization: {e}")))?;
    let response: TimelineResponse =
        call_typed(&ctx.caps.llm, &ctx.retry, LlmKind::Timeline, &outline_json).await?;

    let duration = chunks.video_duration;
    let mut intervals = Vec::new();
    for interval in response.intervals {
        let valid = interval.start >= 0.0
            && interval.start < interval.end
            && (duration <= 0.0 || interval.end <= duration + 0.5);
        if valid {
            intervals.push(interval);
        } else {
            warnings.push(format!(
                "dropped malformed interval {} [{:.1}, {:.1}]",
                interval.id, interval.start, interval.end
            ));
        }
    }
    if intervals.is_empty() {
        return Err(PipelineError::unrecoverable(
            "timeline produced no usable intervals",
        ));
    }

    ctx.store
        .write_json(&ctx.layout.timeline(), &TimelineArtifact { intervals: intervals.clone() })
        .await?;

    Ok(StageSummary {
        items: intervals.len() as u32,
        warnings,
    })
}
