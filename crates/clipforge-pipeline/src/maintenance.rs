//! Background maintenance for the worker process: metadata janitor sweeps,
//! temp cleanup, and data-sync retries.

use std::time::Duration;

use chrono::Utc;
use tracing::{info, warn};

use clipforge_content::ContentStore;
use clipforge_db::{Db, Janitor, JanitorConfig};
use clipforge_models::TaskStatus;
use clipforge_queue::ProgressFabric;

use crate::sync::DataSync;

/// Maintenance loop configuration.
#[derive(Debug, Clone)]
pub struct MaintenanceConfig {
    /// Temp files older than this are deleted.
    pub temp_max_age: Duration,
    /// Temp cleanup cadence.
    pub temp_interval: Duration,
    /// Data-sync retry cadence.
    pub sync_retry_interval: Duration,
    /// Stale-run detector cadence.
    pub stale_check_interval: Duration,
    /// A running task without a heartbeat keeps this long a grace period
    /// after starting before it is treated as orphaned.
    pub heartbeat_grace: Duration,
}

impl Default for MaintenanceConfig {
    fn default() -> Self {
        Self {
            temp_max_age: Duration::from_secs(24 * 3600),
            temp_interval: Duration::from_secs(3600),
            sync_retry_interval: Duration::from_secs(600),
            stale_check_interval: Duration::from_secs(60),
            heartbeat_grace: Duration::from_secs(120),
        }
    }
}

/// Spawns the maintenance loops and returns their join handles.
pub fn spawn_all(
    db: Db,
    store: ContentStore,
    fabric: ProgressFabric,
    config: MaintenanceConfig,
) -> Vec<tokio::task::JoinHandle<()>> {
    let mut handles = Vec::new();

    let janitor = Janitor::new(db.clone(), JanitorConfig::from_env());
    handles.push(tokio::spawn(janitor.run()));

    let stale_db = db.clone();
    let stale_config = config.clone();
    handles.push(tokio::spawn(async move {
        let mut ticker = tokio::time::interval(stale_config.stale_check_interval);
        loop {
            ticker.tick().await;
            if let Err(e) = sweep_stale_runs(&stale_db, &fabric, stale_config.heartbeat_grace).await
            {
                warn!("stale-run sweep failed: {e}");
            }
        }
    }));

    let temp_store = store.clone();
    let temp_config = config.clone();
    handles.push(tokio::spawn(async move {
        let mut ticker = tokio::time::interval(temp_config.temp_interval);
        loop {
            ticker.tick().await;
            match temp_store.cleanup_temp(temp_config.temp_max_age).await {
                Ok(0) => {}
                Ok(n) => info!("temp cleanup removed {n} entries"),
                Err(e) => warn!("temp cleanup failed: {e}"),
            }
        }
    }));

    let sync = DataSync::new(db, store);
    handles.push(tokio::spawn(async move {
        let mut ticker = tokio::time::interval(config.sync_retry_interval);
        loop {
            ticker.tick().await;
            match sync.retry_pending().await {
                Ok(0) => {}
                Ok(n) => info!("retried {n} pending data syncs"),
                Err(e) => warn!("sync retry sweep failed: {e}"),
            }
        }
    }));

    handles
}

/// Orphan running tasks whose worker stopped heartbeating. The started-at
/// grace period covers tasks claimed moments ago whose first heartbeat has
/// not landed yet.
async fn sweep_stale_runs(
    db: &Db,
    fabric: &ProgressFabric,
    grace: Duration,
) -> crate::error::PipelineResult<()> {
    let cutoff = Utc::now()
        - chrono::Duration::from_std(grace).unwrap_or_else(|_| chrono::Duration::seconds(120));

    for task in db.tasks().list_running().await? {
        let within_grace = task.started_at.map(|t| t > cutoff).unwrap_or(true);
        if within_grace {
            continue;
        }
        if fabric.is_alive(task.id.as_str()).await? {
            continue;
        }

        warn!(task_id = %task.id, project_id = %task.project_id, "orphaning heartbeat-less task");
        db.tasks()
            .finish(&task.id, TaskStatus::Failed, Some("orphaned"))
            .await
            .ok();
    }

    Ok(())
}
