//! Worker binary.

use std::sync::Arc;

use tracing::{error, info};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

use clipforge_content::ContentStore;
use clipforge_db::Db;
use clipforge_pipeline::capabilities::{
    Capabilities, FfmpegCutter, HttpLlmClient, WhisperTranscriber, YtDlpDownloader,
};
use clipforge_pipeline::maintenance::{self, MaintenanceConfig};
use clipforge_pipeline::{Orchestrator, WorkerConfig, WorkerExecutor};
use clipforge_queue::{JobQueue, ProgressFabric};

#[tokio::main]
async fn main() {
    dotenvy::dotenv().ok();
    init_tracing();

    info!("starting clipforge-worker");
    let config = WorkerConfig::from_env();

    let (db, store, queue, fabric, caps) = match bootstrap(&config).await {
        Ok(deps) => deps,
        Err(e) => {
            error!("failed to start worker: {e}");
            std::process::exit(1);
        }
    };

    let queue = Arc::new(queue);
    let orchestrator = Arc::new(Orchestrator::new(
        db.clone(),
        store.clone(),
        fabric.clone(),
        Arc::clone(&queue),
        caps,
        config.clone(),
    ));

    let maintenance_handles = maintenance::spawn_all(
        db.clone(),
        store.clone(),
        fabric.clone(),
        MaintenanceConfig::default(),
    );

    let executor = Arc::new(WorkerExecutor::new(
        config,
        db,
        queue,
        fabric,
        orchestrator,
    ));

    let shutdown_executor = Arc::clone(&executor);
    tokio::spawn(async move {
        tokio::signal::ctrl_c()
            .await
            .expect("failed to install CTRL+C handler");
        info!("received shutdown signal");
        shutdown_executor.shutdown();
    });

    if let Err(e) = executor.run().await {
        error!("executor failed: {e}");
        std::process::exit(1);
    }

    for handle in maintenance_handles {
        handle.abort();
    }
    info!("worker shutdown complete");
}

async fn bootstrap(
    config: &WorkerConfig,
) -> anyhow::Result<(Db, ContentStore, JobQueue, ProgressFabric, Capabilities)> {
    let db = Db::from_env().await?;
    let store = ContentStore::from_env().await?;
    let queue = JobQueue::from_env()?;
    let fabric = ProgressFabric::from_env()?;

    let caps = Capabilities::new(
        Arc::new(HttpLlmClient::from_env()?),
        Arc::new(YtDlpDownloader::discover()?),
        Arc::new(WhisperTranscriber::discover()?),
        Arc::new(FfmpegCutter::discover(config.kill_grace)?),
    );

    Ok((db, store, queue, fabric, caps))
}

fn init_tracing() {
    let use_json = std::env::var("LOG_FORMAT")
        .map(|v| v.to_lowercase() == "json")
        .unwrap_or(false);

    let level = std::env::var("LOG_LEVEL").unwrap_or_else(|_| "info".to_string());
    let env_filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(format!("clipforge={level}")));

    if use_json {
        tracing_subscriber::registry()
            .with(fmt::layer().json())
            .with(env_filter)
            .init();
    } else {
        tracing_subscriber::registry()
            .with(fmt::layer().with_ansi(true).with_target(true))
            .with(env_filter)
            .init();
    }
}
