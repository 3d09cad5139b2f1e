//! Pipeline error types.
//!
//! The taxonomy the orchestrator acts on: transient errors are retried in
//! place, unrecoverable ones fail the stage and the project, cancellation
//! transitions to Cancelled, and everything unexpected is Internal.

use thiserror::Error;

use clipforge_models::Stage;

pub type PipelineResult<T> = Result<T, PipelineError>;

#[derive(Debug, Error)]
pub enum PipelineError {
    /// Network flake, 5xx, broker timeout. Retried in place up to 3 times.
    #[error("Transient failure: {0}")]
    Transient(String),

    /// HTTP 429 from the language model; retried honouring the server hint.
    #[error("Rate limited")]
    RateLimited {
        /// Server-provided `Retry-After`, in seconds.
        retry_after: Option<u64>,
    },

    /// Schema-invalid response after repair, subprocess non-zero exit, and
    /// similar. Fails the stage.
    #[error("Unrecoverable failure: {0}")]
    Unrecoverable(String),

    /// A required input artifact from a prior stage is missing on disk.
    #[error("Missing artifact for {stage:?}: {path}")]
    MissingArtifact { stage: Stage, path: String },

    /// Cooperative cancellation observed at a yield point.
    #[error("Cancelled")]
    Cancelled,

    /// A stage exceeded its configured deadline.
    #[error("Stage {0:?} timed out")]
    Timeout(Stage),

    /// A run for this project is already in flight; the caller yields.
    #[error("Busy: {0}")]
    Busy(String),

    /// Invariant violation.
    #[error("Internal error: {0}")]
    Internal(String),

    #[error("Store error: {0}")]
    Db(#[from] clipforge_db::DbError),

    #[error("Content error: {0}")]
    Content(#[from] clipforge_content::ContentError),

    #[error("Queue error: {0}")]
    Queue(#[from] clipforge_queue::QueueError),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl PipelineError {
    pub fn transient(msg: impl Into<String>) -> Self {
        Self::Transient(msg.into())
    }

    pub fn unrecoverable(msg: impl Into<String>) -> Self {
        Self::Unrecoverable(msg.into())
    }

    pub fn internal(msg: impl Into<String>) -> Self {
        Self::Internal(msg.into())
    }

    pub fn missing_artifact(stage: Stage, path: impl Into<String>) -> Self {
        Self::MissingArtifact {
            stage,
            path: path.into(),
        }
    }

    /// Whether a retry in place can help.
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            PipelineError::Transient(_) | PipelineError::RateLimited { .. }
        )
    }

    pub fn is_cancelled(&self) -> bool {
        matches!(self, PipelineError::Cancelled)
    }

    /// Human-readable reason recorded on the project row.
    pub fn reason(&self) -> String {
        match self {
            PipelineError::Timeout(_) => "timeout".to_string(),
            PipelineError::Internal(_) => "internal".to_string(),
            other => other.to_string(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn transient_classification() {
        assert!(PipelineError::transient("503").is_transient());
        assert!(!PipelineError::unrecoverable("bad schema").is_transient());
        assert!(!PipelineError::Cancelled.is_transient());
    }

    #[test]
    fn timeout_reason_is_stable() {
        assert_eq!(PipelineError::Timeout(Stage::Export).reason(), "timeout");
        assert_eq!(PipelineError::internal("boom").reason(), "internal");
    }
}
