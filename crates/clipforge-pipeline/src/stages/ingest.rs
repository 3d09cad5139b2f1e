//! INGEST: materialise `raw/video.*` and `raw/subtitle.srt`.

use std::path::{Path, PathBuf};

use clipforge_models::{ProjectSource, Stage, StageSummary};

use crate::error::{PipelineError, PipelineResult};
use crate::stages::StageContext;

pub async fn run(ctx: &StageContext) -> PipelineResult<StageSummary> {
    let mut warnings = Vec::new();

    let video_path = match &ctx.project.source {
        ProjectSource::Upload { file_name } => adopt_upload(ctx, file_name).await?,
        ProjectSource::Remote {
            url, cookie_jar_id, ..
        } => download_remote(ctx, url, cookie_jar_id.as_deref()).await?,
    };
    ctx.check_cancel()?;
    ctx.reporter
        .stage_progress(Stage::Ingest, 60, "source video ready")
        .await;

    let subtitle_path = ctx.layout.raw_subtitle();
    if !ctx.store.exists(&subtitle_path).await {
        // No user-provided SRT: synthesise one.
        ctx.reporter
            .stage_progress(Stage::Ingest, 70, "transcribing audio")
            .await;
        ctx.caps
            .transcriber
            .transcribe(&video_path, &subtitle_path, &ctx.cancel)
            .await?;
        if !ctx.store.exists(&subtitle_path).await {
            return Err(PipelineError::unrecoverable(
                "transcriber produced no subtitle file",
            ));
        }
        warnings.push("subtitle synthesised via speech recognition".to_string());
    }
    ctx.check_cancel()?;

    let duration = ctx.caps.cutter.probe_duration(&video_path).await?;
    ctx.db
        .projects()
        .set_media(
            &ctx.project.id,
            &video_path.display().to_string(),
            &subtitle_path.display().to_string(),
            Some(duration),
        )
        .await?;

    ctx.reporter
        .stage_progress(Stage::Ingest, 95, "media recorded")
        .await;

    Ok(StageSummary {
        items: 1,
        warnings,
    })
}

/// Move an uploaded file from the staging area into `raw/`.
async fn adopt_upload(ctx: &StageContext, file_name: &str) -> PipelineResult<PathBuf> {
    let staged = ctx
        .store
        .uploads_dir()
        .join(ctx.project.id.as_str())
        .join(file_name);
    if !ctx.store.exists(&staged).await {
        // Already adopted by a previous attempt?
        let ext = extension_of(file_name);
        let dest = ctx.layout.raw_video(&ext);
        if ctx.store.exists(&dest).await {
            return Ok(dest);
        }
        return Err(PipelineError::unrecoverable(format!(
            "uploaded file missing: {}",
            staged.display()
        )));
    }

    let ext = extension_of(file_name);
    let dest = ctx.layout.raw_video(&ext);
    ctx.store.adopt_upload(&staged, &dest).await?;

    // A subtitle uploaded alongside the video moves with it.
    let staged_srt = ctx
        .store
        .uploads_dir()
        .join(ctx.project.id.as_str())
        .join("subtitle.srt");
    if ctx.store.exists(&staged_srt).await {
        ctx.store
            .adopt_upload(&staged_srt, &ctx.layout.raw_subtitle())
            .await?;
    }

    Ok(dest)
}

async fn download_remote(
    ctx: &StageContext,
    url: &str,
    cookie_jar_id: Option<&str>,
) -> PipelineResult<PathBuf> {
    let dest = ctx.layout.raw_video("mp4");
    if ctx.store.exists(&dest).await {
        // Retry with raw/ intact skips the download.
        return Ok(dest);
    }

    let jar_path = cookie_jar_id.map(|id| cookie_jar_path(ctx, id));
    ctx.reporter
        .stage_progress(Stage::Ingest, 10, "downloading source")
        .await;
    ctx.caps
        .downloader
        .download(url, jar_path.as_deref(), &dest, &ctx.cancel)
        .await?;
    Ok(dest)
}

fn cookie_jar_path(ctx: &StageContext, id: &str) -> PathBuf {
    ctx.store.root().join("cache").join("cookies").join(format!("{id}.txt"))
}

fn extension_of(file_name: &str) -> String {
    Path::new(file_name)
        .extension()
        .and_then(|e| e.to_str())
        .unwrap_or("mp4")
        .to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn extension_fallback() {
        assert_eq!(extension_of("talk.mkv"), "mkv");
        assert_eq!(extension_of("noext"), "mp4");
    }
}
