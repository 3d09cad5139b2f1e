//! Periodic metadata sweeps.
//!
//! Orphans stuck running tasks, deletes aged terminal tasks, and prunes
//! auto-prunable completed projects past their retention window.

use std::time::Duration;

use chrono::Utc;
use tracing::{info, warn};

use crate::db::Db;
use crate::error::DbResult;

/// Janitor configuration.
#[derive(Debug, Clone)]
pub struct JanitorConfig {
    /// Running tasks older than this are considered stuck.
    pub stuck_threshold: Duration,
    /// Terminal tasks older than this are deleted.
    pub terminal_task_retention: Duration,
    /// Completed auto-prunable projects older than this are deleted.
    /// `None` disables pruning.
    pub project_retention: Option<Duration>,
    /// Sweep interval.
    pub interval: Duration,
}

impl Default for JanitorConfig {
    fn default() -> Self {
        Self {
            stuck_threshold: Duration::from_secs(6 * 3600),
            terminal_task_retention: Duration::from_secs(30 * 24 * 3600),
            project_retention: None,
            interval: Duration::from_secs(24 * 3600),
        }
    }
}

impl JanitorConfig {
    /// Read overrides from the environment.
    pub fn from_env() -> Self {
        let mut config = Self::default();
        if let Some(minutes) = std::env::var("STUCK_TASK_THRESHOLD_MINUTES")
            .ok()
            .and_then(|s| s.parse::<u64>().ok())
        {
            config.stuck_threshold = Duration::from_secs(minutes * 60);
        }
        if let Some(days) = std::env::var("PROJECT_RETENTION_DAYS")
            .ok()
            .and_then(|s| s.parse::<u64>().ok())
        {
            config.project_retention = Some(Duration::from_secs(days * 24 * 3600));
        }
        config
    }
}

/// What one sweep did.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct JanitorReport {
    pub tasks_orphaned: u64,
    pub tasks_deleted: u64,
    pub projects_pruned: u64,
}

/// Metadata janitor.
pub struct Janitor {
    db: Db,
    config: JanitorConfig,
}

impl Janitor {
    pub fn new(db: Db, config: JanitorConfig) -> Self {
        Self { db, config }
    }

    /// One sweep over tasks and projects.
    pub async fn run_once(&self) -> DbResult<JanitorReport> {
        let now = Utc::now();
        let mut report = JanitorReport::default();

        let stuck_cutoff = now
            - chrono::Duration::from_std(self.config.stuck_threshold)
                .unwrap_or_else(|_| chrono::Duration::hours(6));
        report.tasks_orphaned = self.db.tasks().orphan_stuck(stuck_cutoff).await?;

        let task_cutoff = now
            - chrono::Duration::from_std(self.config.terminal_task_retention)
                .unwrap_or_else(|_| chrono::Duration::days(30));
        report.tasks_deleted = self.db.tasks().delete_terminal_before(task_cutoff).await?;

        if let Some(retention) = self.config.project_retention {
            let project_cutoff = now
                - chrono::Duration::from_std(retention)
                    .unwrap_or_else(|_| chrono::Duration::days(365));
            for project in self.db.projects().list_prunable(project_cutoff).await? {
                match self.db.projects().delete(&project.id).await {
                    Ok(()) => report.projects_pruned += 1,
                    // A run may have started since the listing; skip it.
                    Err(e) => warn!(project_id = %project.id, "prune skipped: {e}"),
                }
            }
        }

        if report != JanitorReport::default() {
            info!(
                orphaned = report.tasks_orphaned,
                deleted = report.tasks_deleted,
                pruned = report.projects_pruned,
                "janitor sweep finished"
            );
        }
        Ok(report)
    }

    /// Run sweeps forever on the configured interval.
    pub async fn run(self) {
        let mut ticker = tokio::time::interval(self.config.interval);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
        loop {
            ticker.tick().await;
            if let Err(e) = self.run_once().await {
                warn!("janitor sweep failed: {e}");
            }
        }
    }
}
