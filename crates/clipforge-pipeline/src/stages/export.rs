//! EXPORT: cut the selected intervals and concatenate collections.

use std::path::PathBuf;

use clipforge_models::{Stage, StageSummary};

use crate::error::{PipelineError, PipelineResult};
use crate::stages::artifacts::{ClusteringArtifact, TitlesArtifact};
use crate::stages::StageContext;

pub async fn run(ctx: &StageContext) -> PipelineResult<StageSummary> {
    let titles: TitlesArtifact = ctx.store.read_json(&ctx.layout.titles()).await?;
    let clustering: ClusteringArtifact = ctx.store.read_json(&ctx.layout.clustering()).await?;

    let project = ctx.fresh_project().await?;
    let video_path = project
        .video_path
        .as_deref()
        .map(PathBuf::from)
        .ok_or_else(|| PipelineError::unrecoverable("project has no ingested video"))?;
    if !ctx.store.exists(&video_path).await {
        return Err(PipelineError::missing_artifact(
            Stage::Export,
            video_path.display().to_string(),
        ));
    }

    let mut warnings = Vec::new();

    // Cut each selected interval. Work is split so clip cuts cover the
    // first 70% of the stage window and concatenation the rest.
    let total = titles.selected.len();
    let mut clip_count = 0u32;
    for (i, clip) in titles.selected.iter().enumerate() {
        ctx.check_cancel()?;

        let natural_id = clip.scored.interval.id.to_string();
        let dest = ctx.layout.clip_output_natural(&natural_id);
        if let Some(parent) = dest.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }
        ctx.caps
            .cutter
            .cut(
                &video_path,
                clip.scored.interval.start,
                clip.scored.interval.end,
                &dest,
                &ctx.cancel,
            )
            .await?;
        clip_count += 1;

        let sub = ((i + 1) * 70 / total) as u8;
        ctx.reporter
            .stage_progress(Stage::Export, sub, format!("cut clip {}/{}", i + 1, total))
            .await;
    }

    // Concatenate each collection from its member cuts.
    let total = clustering.collections.len().max(1);
    for (i, collection) in clustering.collections.iter().enumerate() {
        ctx.check_cancel()?;

        let inputs: Vec<PathBuf> = collection
            .interval_ids
            .iter()
            .map(|id| ctx.layout.clip_output_natural(&id.to_string()))
            .collect();
        let mut missing = false;
        for input in &inputs {
            if !ctx.store.exists(input).await {
                warnings.push(format!(
                    "collection {} skipped: missing cut {}",
                    collection.id,
                    input.display()
                ));
                missing = true;
                break;
            }
        }
        if missing {
            continue;
        }

        let dest = ctx
            .layout
            .collection_output_natural(&collection.id.to_string());
        if let Some(parent) = dest.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }
        ctx.caps.cutter.concat(&inputs, &dest, &ctx.cancel).await?;

        let sub = 70 + ((i + 1) * 30 / total) as u8;
        ctx.reporter
            .stage_progress(
                Stage::Export,
                sub,
                format!("assembled collection {}/{}", i + 1, clustering.collections.len()),
            )
            .await;
    }

    Ok(StageSummary {
        items: clip_count,
        warnings,
    })
}
