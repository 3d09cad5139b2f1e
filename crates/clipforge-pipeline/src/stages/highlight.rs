//! HIGHLIGHT: score intervals, title the winners, cluster into collections.

use std::collections::HashSet;

use clipforge_models::{Stage, StageSummary};

use crate::capabilities::LlmKind;
use crate::error::{PipelineError, PipelineResult};
use crate::retry::call_typed;
use crate::stages::artifacts::{
    ClusteringArtifact, ClusteringResponse, OutlineArtifact, ScoreResponse, ScoredInterval,
    ScoringArtifact, TimelineArtifact, TitleResponse, TitledInterval, TitlesArtifact,
};
use crate::stages::StageContext;

pub async fn run(ctx: &StageContext) -> PipelineResult<StageSummary> {
    let outline: OutlineArtifact = ctx.store.read_json(&ctx.layout.outline()).await?;
    let timeline: TimelineArtifact = ctx.store.read_json(&ctx.layout.timeline()).await?;

    let mut warnings = Vec::new();
    let settings = &ctx.project.settings;

    // Scoring pass: one call per interval.
    let total = timeline.intervals.len();
    let mut scored = Vec::new();
    for (i, interval) in timeline.intervals.into_iter().enumerate() {
        ctx.check_cancel()?;

        let excerpt = outline
            .entries
            .iter()
            .filter(|e| e.chunk_index == interval.chunk_index)
            .map(|e| format!("{}: {}", e.heading, e.summary))
            .collect::<Vec<_>>()
            .join("\n");
        let input = serde_json::to_string(&serde_json::json!({
            "interval": &interval,
            "outline": excerpt,
        }))
        .map_err(|e| PipelineError::internal(format!("scoring input: {e}")))?;

        let response: ScoreResponse =
            call_typed(&ctx.caps.llm, &ctx.retry, LlmKind::Scoring, &input).await?;
        scored.push(ScoredInterval {
            interval,
            score: response.score.clamp(0.0, 1.0),
            reasons: response.reasons,
        });

        let sub = ((i + 1) * 50 / total.max(1)) as u8;
        ctx.reporter
            .stage_progress(
                Stage::Highlight,
                sub,
                format!("scored interval {}/{}", i + 1, total),
            )
            .await;
    }

    ctx.store
        .write_json(&ctx.layout.scoring(), &ScoringArtifact { scored: scored.clone() })
        .await?;
    ctx.check_cancel()?;

    // Selection: score threshold, then best-first up to the cap.
    let mut candidates: Vec<ScoredInterval> = scored
        .into_iter()
        .filter(|s| s.score >= settings.min_score)
        .collect();
    candidates.sort_by(|a, b| b.score.total_cmp(&a.score));
    candidates.truncate(settings.max_clips as usize);
    if candidates.is_empty() {
        return Err(PipelineError::unrecoverable(format!(
            "no interval scored above {:.2}",
            settings.min_score
        )));
    }
    // Selected clips play out in source order.
    candidates.sort_by(|a, b| a.interval.start.total_cmp(&b.interval.start));

    // Title pass over the selected intervals.
    let mut selected = Vec::new();
    let total = candidates.len();
    for (i, scored) in candidates.into_iter().enumerate() {
        ctx.check_cancel()?;

        let input = serde_json::to_string(&scored)
            .map_err(|e| PipelineError::internal(format!("title input: {e}")))?;
        let response: TitleResponse =
            call_typed(&ctx.caps.llm, &ctx.retry, LlmKind::Title, &input).await?;
        let title = response.title.trim().to_string();
        if title.is_empty() {
            warnings.push(format!("empty title for interval {}", scored.interval.id));
        }
        selected.push(TitledInterval {
            scored,
            title: if title.is_empty() { "Untitled".to_string() } else { title },
        });

        let sub = 50 + ((i + 1) * 30 / total) as u8;
        ctx.reporter
            .stage_progress(
                Stage::Highlight,
                sub,
                format!("titled clip {}/{}", i + 1, total),
            )
            .await;
    }

    ctx.store
        .write_json(&ctx.layout.titles(), &TitlesArtifact { selected: selected.clone() })
        .await?;
    ctx.check_cancel()?;

    // Clustering pass over the titled list.
    let input = serde_json::to_string(&selected)
        .map_err(|e| PipelineError::internal(format!("clustering input: {e}")))?;
    let response: ClusteringResponse =
        call_typed(&ctx.caps.llm, &ctx.retry, LlmKind::Clustering, &input).await?;

    let known: HashSet<u32> = selected.iter().map(|t| t.scored.interval.id).collect();
    let mut collections = Vec::new();
    for mut cluster in response.collections {
        let before = cluster.interval_ids.len();
        let mut seen = HashSet::new();
        cluster
            .interval_ids
            .retain(|id| known.contains(id) && seen.insert(*id));
        if cluster.interval_ids.len() != before {
            warnings.push(format!(
                "collection {} referenced unknown or duplicate intervals",
                cluster.id
            ));
        }
        if !cluster.interval_ids.is_empty() {
            collections.push(cluster);
        }
    }

    ctx.store
        .write_json(&ctx.layout.clustering(), &ClusteringArtifact { collections })
        .await?;

    Ok(StageSummary {
        items: selected.len() as u32,
        warnings,
    })
}
