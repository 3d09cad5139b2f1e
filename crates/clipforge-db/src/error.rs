//! Metadata store error types.

use thiserror::Error;

/// Result type for metadata store operations.
pub type DbResult<T> = Result<T, DbError>;

/// Errors that can occur against the metadata store.
#[derive(Debug, Error)]
pub enum DbError {
    /// Malformed input at the boundary; reported, never retried.
    #[error("Invalid argument: {0}")]
    InvalidArgument(String),

    /// Missing row.
    #[error("Not found: {0}")]
    NotFound(String),

    /// A compare-and-swap update lost its race; the caller yields.
    #[error("Conflict: {0}")]
    Conflict(String),

    /// The resource is held; retry later.
    #[error("Busy: {0}")]
    Busy(String),

    #[error("Database error: {0}")]
    Sqlx(#[from] sqlx::Error),

    #[error("Migration error: {0}")]
    Migrate(#[from] sqlx::migrate::MigrateError),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

impl DbError {
    pub fn invalid_argument(msg: impl Into<String>) -> Self {
        Self::InvalidArgument(msg.into())
    }

    pub fn not_found(msg: impl Into<String>) -> Self {
        Self::NotFound(msg.into())
    }

    pub fn conflict(msg: impl Into<String>) -> Self {
        Self::Conflict(msg.into())
    }

    pub fn busy(msg: impl Into<String>) -> Self {
        Self::Busy(msg.into())
    }
}
