//! DONE: finalise the metadata artifacts the data-sync service reads.

use clipforge_models::{ClipDraft, CollectionDraft, StageSummary};

use crate::error::PipelineResult;
use crate::stages::artifacts::{ClusteringArtifact, TitlesArtifact};
use crate::stages::StageContext;

pub async fn run(ctx: &StageContext) -> PipelineResult<StageSummary> {
    let titles: TitlesArtifact = ctx.store.read_json(&ctx.layout.titles()).await?;
    let clustering: ClusteringArtifact = ctx.store.read_json(&ctx.layout.clustering()).await?;

    let mut clips = Vec::with_capacity(titles.selected.len());
    for clip in &titles.selected {
        ctx.check_cancel()?;

        let natural_id = clip.scored.interval.id.to_string();
        let output = ctx.layout.clip_output_natural(&natural_id);
        let output_path = ctx
            .store
            .exists(&output)
            .await
            .then(|| output.display().to_string());

        // Per-clip detail artifact: the full scored/titled record.
        let detail_path = ctx
            .layout
            .metadata_dir()
            .join("clips")
            .join(format!("{natural_id}.json"));
        ctx.store.write_json(&detail_path, clip).await?;

        clips.push(ClipDraft {
            id: natural_id,
            title: clip.title.clone(),
            score: clip.scored.score,
            start_time: clip.scored.interval.start,
            end_time: clip.scored.interval.end,
            output_path,
            outline: Some(clip.scored.interval.topic.clone()),
            recommend_reason: Some(clip.scored.reasons.join("; ")),
            chunk_index: Some(clip.scored.interval.chunk_index),
            detail_path: Some(detail_path.display().to_string()),
        });
    }

    let collections: Vec<CollectionDraft> = clustering
        .collections
        .iter()
        .map(|c| CollectionDraft {
            id: c.id.to_string(),
            title: c.title.clone(),
            description: c.description.clone(),
            clip_ids: c.interval_ids.iter().map(|id| id.to_string()).collect(),
        })
        .collect();

    ctx.store
        .write_json(&ctx.layout.clips_metadata(), &clips)
        .await?;
    ctx.store
        .write_json(&ctx.layout.collections_metadata(), &collections)
        .await?;

    Ok(StageSummary::with_items(clips.len() as u32))
}
