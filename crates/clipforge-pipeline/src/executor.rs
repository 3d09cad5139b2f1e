//! Worker executor: pulls runs off the broker queue and drives the
//! orchestrator.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::Semaphore;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use clipforge_db::{Db, DbError};
use clipforge_models::TaskStatus;
use clipforge_queue::{JobQueue, Priority, ProgressFabric, RunJob};

use crate::config::WorkerConfig;
use crate::error::{PipelineError, PipelineResult};
use crate::orchestrator::{Orchestrator, RunOptions};

/// Executor that processes jobs from the queue.
pub struct WorkerExecutor {
    config: WorkerConfig,
    db: Db,
    queue: Arc<JobQueue>,
    fabric: ProgressFabric,
    orchestrator: Arc<Orchestrator>,
    semaphore: Arc<Semaphore>,
    shutdown: tokio::sync::watch::Sender<bool>,
    consumer_name: String,
}

impl WorkerExecutor {
    pub fn new(
        config: WorkerConfig,
        db: Db,
        queue: Arc<JobQueue>,
        fabric: ProgressFabric,
        orchestrator: Arc<Orchestrator>,
    ) -> Self {
        let semaphore = Arc::new(Semaphore::new(config.concurrency));
        let (shutdown, _) = tokio::sync::watch::channel(false);
        let consumer_name = format!("worker-{}", Uuid::new_v4());

        Self {
            config,
            db,
            queue,
            fabric,
            orchestrator,
            semaphore,
            shutdown,
            consumer_name,
        }
    }

    /// Run the consume loop until shutdown.
    pub async fn run(&self) -> PipelineResult<()> {
        info!(
            consumer = %self.consumer_name,
            concurrency = self.config.concurrency,
            "starting worker executor"
        );
        self.queue.init().await?;

        let mut shutdown_rx = self.shutdown.subscribe();

        // Periodically claim messages whose worker died mid-run.
        let claim_task = self.spawn_claim_loop();

        loop {
            tokio::select! {
                _ = shutdown_rx.changed() => {
                    if *shutdown_rx.borrow() {
                        info!("shutdown signal received, stopping executor");
                        break;
                    }
                }
                result = self.consume_once() => {
                    if let Err(e) = result {
                        error!("error consuming jobs: {e}");
                        tokio::time::sleep(Duration::from_secs(5)).await;
                    }
                }
            }
        }

        claim_task.abort();

        info!("waiting for in-flight runs to finish");
        let _ = tokio::time::timeout(Duration::from_secs(60), self.drain()).await;
        info!("worker executor stopped");
        Ok(())
    }

    pub fn shutdown(&self) {
        let _ = self.shutdown.send(true);
    }

    async fn consume_once(&self) -> PipelineResult<()> {
        let available = self.semaphore.available_permits();
        if available == 0 {
            tokio::time::sleep(Duration::from_millis(100)).await;
            return Ok(());
        }

        let jobs = self
            .queue
            .consume(
                &self.consumer_name,
                self.config.poll_block.as_millis() as u64,
                available.min(5),
            )
            .await?;

        for (priority, message_id, job) in jobs {
            self.dispatch(priority, message_id, job).await?;
        }
        Ok(())
    }

    async fn dispatch(
        &self,
        priority: Priority,
        message_id: String,
        job: RunJob,
    ) -> PipelineResult<()> {
        let permit = self
            .semaphore
            .clone()
            .acquire_owned()
            .await
            .map_err(|_| PipelineError::internal("semaphore closed"))?;

        let db = self.db.clone();
        let queue = Arc::clone(&self.queue);
        let fabric = self.fabric.clone();
        let orchestrator = Arc::clone(&self.orchestrator);
        let consumer = self.consumer_name.clone();
        let heartbeat_interval = self.config.heartbeat_interval;

        tokio::spawn(async move {
            let _permit = permit;
            execute_job(
                db,
                queue,
                fabric,
                orchestrator,
                consumer,
                heartbeat_interval,
                priority,
                message_id,
                job,
            )
            .await;
        });

        Ok(())
    }

    fn spawn_claim_loop(&self) -> tokio::task::JoinHandle<()> {
        let queue = Arc::clone(&self.queue);
        let db = self.db.clone();
        let fabric = self.fabric.clone();
        let orchestrator = Arc::clone(&self.orchestrator);
        let consumer = self.consumer_name.clone();
        let semaphore = Arc::clone(&self.semaphore);
        let heartbeat_interval = self.config.heartbeat_interval;
        let mut shutdown_rx = self.shutdown.subscribe();

        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(Duration::from_secs(60));
            loop {
                tokio::select! {
                    _ = shutdown_rx.changed() => {
                        if *shutdown_rx.borrow() {
                            break;
                        }
                    }
                    _ = ticker.tick() => {
                        match queue.claim_pending(&consumer, 5).await {
                            Ok(jobs) if !jobs.is_empty() => {
                                info!("claimed {} stale pending jobs", jobs.len());
                                for (priority, message_id, job) in jobs {
                                    let Ok(permit) = semaphore.clone().acquire_owned().await else {
                                        return;
                                    };
                                    let db = db.clone();
                                    let queue = Arc::clone(&queue);
                                    let fabric = fabric.clone();
                                    let orchestrator = Arc::clone(&orchestrator);
                                    let consumer = consumer.clone();
                                    tokio::spawn(async move {
                                        let _permit = permit;
                                        execute_job(
                                            db, queue, fabric, orchestrator, consumer,
                                            heartbeat_interval, priority, message_id, job,
                                        )
                                        .await;
                                    });
                                }
                            }
                            Ok(_) => {}
                            Err(e) => warn!("failed to claim pending jobs: {e}"),
                        }
                    }
                }
            }
        })
    }

    async fn drain(&self) {
        loop {
            if self.semaphore.available_permits() == self.config.concurrency {
                break;
            }
            tokio::time::sleep(Duration::from_millis(100)).await;
        }
    }
}

/// Execute one delivered job end to end: claim the task row, heartbeat while
/// running, finish the row, ack or dead-letter the message.
#[allow(clippy::too_many_arguments)]
async fn execute_job(
    db: Db,
    queue: Arc<JobQueue>,
    fabric: ProgressFabric,
    orchestrator: Arc<Orchestrator>,
    consumer: String,
    heartbeat_interval: Duration,
    priority: Priority,
    message_id: String,
    job: RunJob,
) {
    let task_id = job.task_id.clone();

    // The task-row CAS is the duplicate-delivery short circuit: a redelivered
    // message finds the row no longer pending and yields.
    match db.tasks().claim(&task_id, &consumer).await {
        Ok(()) => {}
        Err(DbError::Conflict(_)) => {
            debug!(task_id = %task_id, "duplicate delivery short-circuited");
            queue.ack(priority, &message_id).await.ok();
            return;
        }
        Err(DbError::NotFound(_)) => {
            warn!(task_id = %task_id, "task row missing, dropping message");
            queue.ack(priority, &message_id).await.ok();
            return;
        }
        Err(e) => {
            error!(task_id = %task_id, "task claim failed: {e}");
            retry_or_dlq(&queue, priority, &message_id, &job, &e.to_string()).await;
            return;
        }
    }

    let heartbeat = spawn_heartbeat(fabric.clone(), task_id.to_string(), heartbeat_interval);
    let result = run_job(&orchestrator, &job).await;
    heartbeat.abort();
    fabric.clear_heartbeat(task_id.as_str()).await.ok();

    match result {
        Ok(()) => {
            info!(task_id = %task_id, "job finished");
            db.tasks()
                .finish(&task_id, TaskStatus::Completed, None)
                .await
                .ok();
            queue.ack(priority, &message_id).await.ok();
            queue.clear_dedup(&job).await.ok();
        }
        Err(PipelineError::Busy(msg)) => {
            // Another worker owns this project; drop the duplicate quietly.
            debug!(task_id = %task_id, "yielding: {msg}");
            db.tasks()
                .finish(&task_id, TaskStatus::Cancelled, Some("superseded"))
                .await
                .ok();
            queue.ack(priority, &message_id).await.ok();
            queue.clear_dedup(&job).await.ok();
        }
        Err(PipelineError::Cancelled) => {
            info!(task_id = %task_id, "job cancelled");
            db.tasks()
                .finish(&task_id, TaskStatus::Cancelled, Some("cancelled"))
                .await
                .ok();
            queue.ack(priority, &message_id).await.ok();
            queue.clear_dedup(&job).await.ok();
        }
        Err(e) if is_infrastructure(&e) => {
            // The run never got far enough to record project state; let the
            // broker redeliver, then dead-letter.
            error!(task_id = %task_id, "job failed on infrastructure: {e}");
            let dead_lettered =
                retry_or_dlq(&queue, priority, &message_id, &job, &e.to_string()).await;
            if dead_lettered {
                db.tasks()
                    .finish(&task_id, TaskStatus::Failed, Some(&e.to_string()))
                    .await
                    .ok();
            } else {
                // The row goes back to pending so the redelivery can claim it.
                db.tasks().release(&task_id).await.ok();
            }
        }
        Err(e) => {
            // Domain failure: the orchestrator already moved the project to
            // Failed; the message is spent.
            warn!(task_id = %task_id, "job failed: {e}");
            db.tasks()
                .finish(&task_id, TaskStatus::Failed, Some(&e.to_string()))
                .await
                .ok();
            queue.ack(priority, &message_id).await.ok();
            queue.clear_dedup(&job).await.ok();
        }
    }
}

async fn run_job(orchestrator: &Arc<Orchestrator>, job: &RunJob) -> PipelineResult<()> {
    match (&job.kind, &job.collection_id) {
        (clipforge_models::TaskKind::Export, Some(collection_id)) => {
            orchestrator
                .export_collection(&job.project_id, collection_id)
                .await
        }
        _ => {
            orchestrator
                .run(
                    &job.project_id,
                    RunOptions {
                        resume: job.resume,
                        start_at_stage: job.start_at_stage,
                        task_id: Some(job.task_id.clone()),
                    },
                )
                .await
        }
    }
}

/// Returns true when the message was dead-lettered; otherwise it stays
/// pending and the claim loop redelivers it after the visibility timeout.
async fn retry_or_dlq(
    queue: &Arc<JobQueue>,
    priority: Priority,
    message_id: &str,
    job: &RunJob,
    error: &str,
) -> bool {
    let attempts = queue.increment_retry(message_id).await.unwrap_or(u32::MAX);
    if attempts >= queue.max_retries() {
        warn!(task_id = %job.task_id, "max retries exceeded, dead-lettering");
        queue.dlq(priority, message_id, job, error).await.ok();
        queue.clear_dedup(job).await.ok();
        return true;
    }
    false
}

fn spawn_heartbeat(
    fabric: ProgressFabric,
    task_id: String,
    interval: Duration,
) -> tokio::task::JoinHandle<()> {
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(interval);
        loop {
            ticker.tick().await;
            if let Err(e) = fabric.heartbeat(&task_id).await {
                debug!("heartbeat write failed: {e}");
            }
        }
    })
}

fn is_infrastructure(error: &PipelineError) -> bool {
    matches!(
        error,
        PipelineError::Db(_) | PipelineError::Queue(_) | PipelineError::Internal(_)
    )
}
