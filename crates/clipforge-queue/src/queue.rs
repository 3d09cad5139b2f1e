//! Job queue using Redis Streams.

use std::time::Duration;

use redis::AsyncCommands;
use tracing::{debug, info, warn};

use clipforge_models::ProjectId;

use crate::error::{QueueError, QueueResult};
use crate::job::{Priority, RunJob, ALL_PRIORITIES};

/// Queue configuration.
#[derive(Debug, Clone)]
pub struct QueueConfig {
    /// Broker URL
    pub broker_url: String,
    /// Prefix for the per-priority job streams
    pub stream_prefix: String,
    /// Consumer group name
    pub consumer_group: String,
    /// Dead letter queue stream name
    pub dlq_stream: String,
    /// Max delivery attempts before DLQ
    pub max_retries: u32,
    /// Idle time before a pending message may be claimed by another worker
    pub visibility_timeout: Duration,
}

impl Default for QueueConfig {
    fn default() -> Self {
        Self {
            broker_url: "redis://localhost:6379".to_string(),
            stream_prefix: "clipforge:jobs".to_string(),
            consumer_group: "clipforge:workers".to_string(),
            dlq_stream: "clipforge:dlq".to_string(),
            max_retries: 3,
            visibility_timeout: Duration::from_secs(1800),
        }
    }
}

impl QueueConfig {
    /// Create config from environment variables.
    pub fn from_env() -> Self {
        let defaults = Self::default();
        Self {
            broker_url: std::env::var("BROKER_URL").unwrap_or(defaults.broker_url),
            stream_prefix: std::env::var("QUEUE_STREAM_PREFIX").unwrap_or(defaults.stream_prefix),
            consumer_group: std::env::var("QUEUE_CONSUMER_GROUP")
                .unwrap_or(defaults.consumer_group),
            dlq_stream: std::env::var("QUEUE_DLQ_STREAM").unwrap_or(defaults.dlq_stream),
            max_retries: std::env::var("QUEUE_MAX_RETRIES")
                .ok()
                .and_then(|s| s.parse().ok())
                .unwrap_or(defaults.max_retries),
            visibility_timeout: Duration::from_secs(
                std::env::var("QUEUE_VISIBILITY_TIMEOUT")
                    .ok()
                    .and_then(|s| s.parse().ok())
                    .unwrap_or(defaults.visibility_timeout.as_secs()),
            ),
        }
    }
}

/// Job queue client. One instance per process; connections are multiplexed.
pub struct JobQueue {
    client: redis::Client,
    config: QueueConfig,
}

impl JobQueue {
    /// Create a new job queue.
    pub fn new(config: QueueConfig) -> QueueResult<Self> {
        let client = redis::Client::open(config.broker_url.as_str())?;
        Ok(Self { client, config })
    }

    /// Create from environment variables.
    pub fn from_env() -> QueueResult<Self> {
        Self::new(QueueConfig::from_env())
    }

    fn stream_name(&self, priority: Priority) -> String {
        format!("{}:{}", self.config.stream_prefix, priority.as_str())
    }

    /// Initialize the queue (create consumer groups if not exists).
    pub async fn init(&self) -> QueueResult<()> {
        let mut conn = self.client.get_multiplexed_async_connection().await?;

        for priority in ALL_PRIORITIES {
            let stream = self.stream_name(priority);
            let result: Result<(), redis::RedisError> = redis::cmd("XGROUP")
                .arg("CREATE")
                .arg(&stream)
                .arg(&self.config.consumer_group)
                .arg("$")
                .arg("MKSTREAM")
                .query_async(&mut conn)
                .await;

            match result {
                Ok(_) => info!("created consumer group on {stream}"),
                Err(e) if e.to_string().contains("BUSYGROUP") => {
                    debug!("consumer group already exists on {stream}");
                }
                Err(e) => return Err(QueueError::Redis(e)),
            }
        }

        Ok(())
    }

    /// Enqueue a run. Rejects duplicates of a task id that is already queued
    /// or in flight.
    pub async fn enqueue(&self, job: &RunJob) -> QueueResult<String> {
        let mut conn = self.client.get_multiplexed_async_connection().await?;

        let payload = serde_json::to_string(job)?;
        let dedup_key = format!("clipforge:dedup:{}", job.idempotency_key());

        // SET NX claims the key only for the first enqueue of this task.
        let fresh: bool = redis::cmd("SET")
            .arg(&dedup_key)
            .arg("1")
            .arg("NX")
            .arg("EX")
            .arg(self.config.visibility_timeout.as_secs().max(3600))
            .query_async(&mut conn)
            .await
            .unwrap_or(false);
        if !fresh {
            warn!("duplicate enqueue rejected for task {}", job.task_id);
            return Err(QueueError::duplicate(job.task_id.to_string()));
        }

        let stream = self.stream_name(job.priority());
        let message_id: String = redis::cmd("XADD")
            .arg(&stream)
            .arg("*")
            .arg("job")
            .arg(&payload)
            .arg("key")
            .arg(job.idempotency_key())
            .query_async(&mut conn)
            .await?;

        info!(task_id = %job.task_id, project_id = %job.project_id, %stream, %message_id, "enqueued job");
        Ok(message_id)
    }

    /// Clear the dedup key for a task, allowing a later re-enqueue.
    pub async fn clear_dedup(&self, job: &RunJob) -> QueueResult<()> {
        let mut conn = self.client.get_multiplexed_async_connection().await?;
        let dedup_key = format!("clipforge:dedup:{}", job.idempotency_key());
        conn.del::<_, ()>(&dedup_key).await?;
        Ok(())
    }

    /// Consume jobs. Drains priority classes in order with a non-blocking
    /// pass, then blocks across all streams for up to `block_ms`.
    /// Returns `(priority, message_id, job)` tuples.
    pub async fn consume(
        &self,
        consumer_name: &str,
        block_ms: u64,
        count: usize,
    ) -> QueueResult<Vec<(Priority, String, RunJob)>> {
        let mut conn = self.client.get_multiplexed_async_connection().await?;

        for priority in ALL_PRIORITIES {
            let jobs = self
                .read_stream(&mut conn, priority, consumer_name, None, count)
                .await?;
            if !jobs.is_empty() {
                return Ok(jobs);
            }
        }

        // Nothing ready: block across all classes until something arrives.
        let streams: Vec<String> = ALL_PRIORITIES.iter().map(|p| self.stream_name(*p)).collect();
        let mut cmd = redis::cmd("XREADGROUP");
        cmd.arg("GROUP")
            .arg(&self.config.consumer_group)
            .arg(consumer_name)
            .arg("COUNT")
            .arg(count)
            .arg("BLOCK")
            .arg(block_ms)
            .arg("STREAMS");
        for stream in &streams {
            cmd.arg(stream);
        }
        for _ in &streams {
            cmd.arg(">");
        }

        let reply: redis::streams::StreamReadReply = cmd.query_async(&mut conn).await?;
        self.parse_reply(reply).await
    }

    async fn read_stream(
        &self,
        conn: &mut redis::aio::MultiplexedConnection,
        priority: Priority,
        consumer_name: &str,
        block_ms: Option<u64>,
        count: usize,
    ) -> QueueResult<Vec<(Priority, String, RunJob)>> {
        let mut cmd = redis::cmd("XREADGROUP");
        cmd.arg("GROUP")
            .arg(&self.config.consumer_group)
            .arg(consumer_name)
            .arg("COUNT")
            .arg(count);
        if let Some(block) = block_ms {
            cmd.arg("BLOCK").arg(block);
        }
        cmd.arg("STREAMS").arg(self.stream_name(priority)).arg(">");

        let reply: redis::streams::StreamReadReply = cmd.query_async(conn).await?;
        self.parse_reply(reply).await
    }

    async fn parse_reply(
        &self,
        reply: redis::streams::StreamReadReply,
    ) -> QueueResult<Vec<(Priority, String, RunJob)>> {
        let mut jobs = Vec::new();

        for stream_key in reply.keys {
            let priority = ALL_PRIORITIES
                .iter()
                .copied()
                .find(|p| self.stream_name(*p) == stream_key.key)
                .unwrap_or_default();

            for entry in stream_key.ids {
                let message_id = entry.id.clone();
                if let Some(redis::Value::BulkString(payload)) = entry.map.get("job") {
                    let payload_str = String::from_utf8_lossy(payload);
                    match serde_json::from_str::<RunJob>(&payload_str) {
                        Ok(job) => {
                            debug!(task_id = %job.task_id, "consumed job");
                            jobs.push((priority, message_id, job));
                        }
                        Err(e) => {
                            warn!("failed to parse job payload: {e}");
                            // Ack the malformed message to prevent reprocessing.
                            self.ack(priority, &message_id).await.ok();
                        }
                    }
                }
            }
        }

        Ok(jobs)
    }

    /// Acknowledge a job (mark as completed) and drop it from the stream.
    pub async fn ack(&self, priority: Priority, message_id: &str) -> QueueResult<()> {
        let mut conn = self.client.get_multiplexed_async_connection().await?;
        let stream = self.stream_name(priority);

        redis::cmd("XACK")
            .arg(&stream)
            .arg(&self.config.consumer_group)
            .arg(message_id)
            .query_async::<()>(&mut conn)
            .await?;

        redis::cmd("XDEL")
            .arg(&stream)
            .arg(message_id)
            .query_async::<()>(&mut conn)
            .await?;

        debug!("acknowledged {message_id} on {stream}");
        Ok(())
    }

    /// Move a job to the dead letter queue and ack the original.
    pub async fn dlq(
        &self,
        priority: Priority,
        message_id: &str,
        job: &RunJob,
        error: &str,
    ) -> QueueResult<()> {
        let mut conn = self.client.get_multiplexed_async_connection().await?;
        let payload = serde_json::to_string(job)?;

        redis::cmd("XADD")
            .arg(&self.config.dlq_stream)
            .arg("*")
            .arg("job")
            .arg(&payload)
            .arg("error")
            .arg(error)
            .arg("original_id")
            .arg(message_id)
            .query_async::<()>(&mut conn)
            .await?;

        self.ack(priority, message_id).await?;
        warn!(task_id = %job.task_id, "moved job to DLQ: {error}");
        Ok(())
    }

    /// Claim pending jobs idle past the visibility timeout (crashed workers).
    pub async fn claim_pending(
        &self,
        consumer_name: &str,
        count: usize,
    ) -> QueueResult<Vec<(Priority, String, RunJob)>> {
        let mut conn = self.client.get_multiplexed_async_connection().await?;
        let min_idle_ms = self.config.visibility_timeout.as_millis() as u64;
        let mut claimed = Vec::new();

        for priority in ALL_PRIORITIES {
            let stream = self.stream_name(priority);

            // XAUTOCLAIM transfers idle pending entries in one round trip.
            let reply: redis::Value = redis::cmd("XAUTOCLAIM")
                .arg(&stream)
                .arg(&self.config.consumer_group)
                .arg(consumer_name)
                .arg(min_idle_ms)
                .arg("0-0")
                .arg("COUNT")
                .arg(count)
                .query_async(&mut conn)
                .await?;

            // Reply shape: [next_cursor, [[id, [field, value, ...]], ...], deleted]
            let redis::Value::Array(parts) = reply else { continue };
            let Some(redis::Value::Array(messages)) = parts.get(1) else {
                continue;
            };

            for message in messages {
                let redis::Value::Array(pair) = message else { continue };
                let (Some(redis::Value::BulkString(id_bytes)), Some(redis::Value::Array(fields))) =
                    (pair.first(), pair.get(1))
                else {
                    continue;
                };
                let Ok(message_id) = String::from_utf8(id_bytes.clone()) else {
                    continue;
                };

                let mut payload = None;
                let mut i = 0;
                while i + 1 < fields.len() {
                    if let (
                        Some(redis::Value::BulkString(field)),
                        Some(redis::Value::BulkString(value)),
                    ) = (fields.get(i), fields.get(i + 1))
                    {
                        if field.as_slice() == b"job" {
                            payload = String::from_utf8(value.clone()).ok();
                            break;
                        }
                    }
                    i += 2;
                }

                if let Some(payload) = payload {
                    match serde_json::from_str::<RunJob>(&payload) {
                        Ok(job) => {
                            info!(task_id = %job.task_id, "claimed stale pending job");
                            claimed.push((priority, message_id, job));
                        }
                        Err(e) => {
                            warn!("failed to parse claimed payload: {e}");
                            self.ack(priority, &message_id).await.ok();
                        }
                    }
                }
            }
        }

        Ok(claimed)
    }

    /// Delivery attempts recorded for a message.
    pub async fn get_retry_count(&self, message_id: &str) -> QueueResult<u32> {
        let mut conn = self.client.get_multiplexed_async_connection().await?;
        let key = format!("clipforge:retry:{message_id}");
        let count: Option<u32> = conn.get(&key).await?;
        Ok(count.unwrap_or(0))
    }

    pub async fn increment_retry(&self, message_id: &str) -> QueueResult<u32> {
        let mut conn = self.client.get_multiplexed_async_connection().await?;
        let key = format!("clipforge:retry:{message_id}");
        let count: u32 = conn.incr(&key, 1).await?;
        conn.expire::<_, ()>(&key, 86400).await?;
        Ok(count)
    }

    pub fn max_retries(&self) -> u32 {
        self.config.max_retries
    }

    // ------------------------------------------------------------------
    // Cross-node cancellation flags
    // ------------------------------------------------------------------

    fn cancel_key(project_id: &ProjectId) -> String {
        format!("clipforge:cancel:{project_id}")
    }

    /// Raise the cancel flag for a project's in-flight run. Any worker node
    /// polling the flag observes it at its next yield point.
    pub async fn request_cancel(&self, project_id: &ProjectId) -> QueueResult<()> {
        let mut conn = self.client.get_multiplexed_async_connection().await?;
        conn.set_ex::<_, _, ()>(Self::cancel_key(project_id), "1", 3600)
            .await?;
        info!(project_id = %project_id, "cancel requested");
        Ok(())
    }

    pub async fn cancel_requested(&self, project_id: &ProjectId) -> QueueResult<bool> {
        let mut conn = self.client.get_multiplexed_async_connection().await?;
        let exists: bool = conn.exists(Self::cancel_key(project_id)).await?;
        Ok(exists)
    }

    pub async fn clear_cancel(&self, project_id: &ProjectId) -> QueueResult<()> {
        let mut conn = self.client.get_multiplexed_async_connection().await?;
        conn.del::<_, ()>(Self::cancel_key(project_id)).await?;
        Ok(())
    }

    // ------------------------------------------------------------------
    // Introspection
    // ------------------------------------------------------------------

    /// Length of one priority stream.
    pub async fn len(&self, priority: Priority) -> QueueResult<u64> {
        let mut conn = self.client.get_multiplexed_async_connection().await?;
        let len: u64 = conn.xlen(self.stream_name(priority)).await?;
        Ok(len)
    }

    pub async fn dlq_len(&self) -> QueueResult<u64> {
        let mut conn = self.client.get_multiplexed_async_connection().await?;
        let len: u64 = conn.xlen(&self.config.dlq_stream).await?;
        Ok(len)
    }
}
