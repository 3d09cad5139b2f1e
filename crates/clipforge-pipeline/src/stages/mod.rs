//! Stage handlers.
//!
//! Each stage is a function `(ctx) -> StageSummary` structured as
//! precondition-check, work, postcondition-write. The dispatcher owns the
//! generic precondition check (required artifacts on disk) so handlers only
//! implement the work.

pub mod artifacts;

mod analyze;
mod done;
mod export;
mod highlight;
mod ingest;
mod subtitle;

use tokio_util::sync::CancellationToken;
use tracing::info;

use clipforge_content::{ContentStore, ProjectLayout};
use clipforge_db::Db;
use clipforge_models::{Project, Stage, StageSummary};

use crate::capabilities::Capabilities;
use crate::error::{PipelineError, PipelineResult};
use crate::reporter::ProgressReporter;
use crate::retry::RetryPolicy;

/// Everything a stage needs: the project snapshot, path layout, stores,
/// external capabilities, progress reporter and the run's cancel token.
pub struct StageContext {
    pub project: Project,
    pub layout: ProjectLayout,
    pub store: ContentStore,
    pub db: Db,
    pub caps: Capabilities,
    pub reporter: ProgressReporter,
    pub cancel: CancellationToken,
    pub retry: RetryPolicy,
}

impl StageContext {
    /// Bail out if cancellation was observed. Stages call this after every
    /// I/O boundary.
    pub fn check_cancel(&self) -> PipelineResult<()> {
        if self.cancel.is_cancelled() {
            return Err(PipelineError::Cancelled);
        }
        Ok(())
    }

    /// Re-read the project row (stages that need fields written by earlier
    /// stages, e.g. the probed video duration).
    pub async fn fresh_project(&self) -> PipelineResult<Project> {
        Ok(self.db.projects().get(&self.project.id).await?)
    }
}

/// Run one stage: generic precondition check, then the handler.
pub async fn run_stage(stage: Stage, ctx: &StageContext) -> PipelineResult<StageSummary> {
    ctx.check_cancel()?;

    for required in ctx.layout.stage_preconditions(stage) {
        if !ctx.store.exists(&required).await {
            return Err(PipelineError::missing_artifact(
                stage,
                required.display().to_string(),
            ));
        }
    }

    let summary = match stage {
        Stage::Ingest => ingest::run(ctx).await?,
        Stage::Subtitle => subtitle::run(ctx).await?,
        Stage::Analyze => analyze::run(ctx).await?,
        Stage::Highlight => highlight::run(ctx).await?,
        Stage::Export => export::run(ctx).await?,
        Stage::Done => done::run(ctx).await?,
    };

    info!(
        project_id = %ctx.project.id,
        stage = stage.as_str(),
        items = summary.items,
        warnings = summary.warnings.len(),
        "stage finished"
    );
    Ok(summary)
}
