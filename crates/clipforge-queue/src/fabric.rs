//! Progress fabric: publish, snapshot, fan-out.
//!
//! Pub/sub delivery is best-effort; the snapshot hash written on every
//! publish is the durable truth a reconnecting client replays. Publishing is
//! idempotent with respect to `(project_id, stage)`: the snapshot is simply
//! overwritten.

use chrono::Utc;
use redis::AsyncCommands;
use tracing::{debug, warn};

use clipforge_models::{
    normalize_channel, ProgressStage, ProgressUpdate, ProjectId, ProjectStatus,
};

use crate::error::{QueueError, QueueResult};

/// Snapshot key for a canonical channel.
fn snapshot_key(channel: &str) -> String {
    format!("progress:last:{channel}")
}

fn heartbeat_key(task_id: &str) -> String {
    format!("heartbeat:task:{task_id}")
}

/// Fabric configuration.
#[derive(Debug, Clone)]
pub struct FabricConfig {
    pub broker_url: String,
    /// Snapshot retention.
    pub snapshot_ttl_seconds: u64,
}

impl Default for FabricConfig {
    fn default() -> Self {
        Self {
            broker_url: "redis://localhost:6379".to_string(),
            snapshot_ttl_seconds: 86_400,
        }
    }
}

impl FabricConfig {
    pub fn from_env() -> Self {
        let defaults = Self::default();
        Self {
            broker_url: std::env::var("BROKER_URL").unwrap_or(defaults.broker_url),
            snapshot_ttl_seconds: std::env::var("SNAPSHOT_TTL_SECONDS")
                .ok()
                .and_then(|s| s.parse().ok())
                .unwrap_or(defaults.snapshot_ttl_seconds),
        }
    }
}

/// Channel for publishing and subscribing to progress events.
#[derive(Clone)]
pub struct ProgressFabric {
    client: redis::Client,
    config: FabricConfig,
}

impl ProgressFabric {
    pub fn new(config: FabricConfig) -> QueueResult<Self> {
        let client = redis::Client::open(config.broker_url.as_str())?;
        Ok(Self { client, config })
    }

    pub fn from_env() -> QueueResult<Self> {
        Self::new(FabricConfig::from_env())
    }

    /// Canonical channel for a project.
    pub fn channel_for(project_id: &ProjectId) -> String {
        normalize_channel(project_id.as_str())
    }

    /// Publish a progress event: write the snapshot hash, then fan out.
    ///
    /// The percent is clamped to [0,100] and the snapshot timestamp is
    /// stamped with server time before either write.
    pub async fn publish(&self, update: &ProgressUpdate) -> QueueResult<()> {
        let mut update = update.clone();
        update.percent = update.percent.min(100);
        update.timestamp_ms = Utc::now().timestamp_millis();
        // Snapshots are marked on replay, never at rest.
        update.snapshot = false;

        let channel = Self::channel_for(&update.project_id);
        let key = snapshot_key(&channel);
        let payload = serde_json::to_string(&update)?;

        let mut conn = self.client.get_multiplexed_async_connection().await?;

        redis::pipe()
            .hset(&key, "project_id", update.project_id.as_str())
            .ignore()
            .hset(&key, "stage", update.stage.as_str())
            .ignore()
            .hset(&key, "percent", update.percent as i64)
            .ignore()
            .hset(&key, "message", &update.message)
            .ignore()
            .hset(&key, "status", update.status.as_str())
            .ignore()
            .hset(&key, "timestamp_ms", update.timestamp_ms)
            .ignore()
            .expire(&key, self.config.snapshot_ttl_seconds as i64)
            .ignore()
            .publish(&channel, &payload)
            .ignore()
            .exec_async(&mut conn)
            .await?;

        debug!(%channel, percent = update.percent, stage = update.stage.as_str(), "published progress");
        Ok(())
    }

    /// Latest event on a channel, if any. Accepts any channel spelling.
    pub async fn snapshot(&self, channel: &str) -> QueueResult<Option<ProgressUpdate>> {
        let channel = normalize_channel(channel);
        let mut conn = self.client.get_multiplexed_async_connection().await?;

        let fields: std::collections::HashMap<String, String> =
            conn.hgetall(snapshot_key(&channel)).await?;
        if fields.is_empty() {
            return Ok(None);
        }

        let stage = fields
            .get("stage")
            .and_then(|s| ProgressStage::parse(s))
            .ok_or_else(|| QueueError::invalid_payload("snapshot missing stage"))?;
        let status = fields
            .get("status")
            .and_then(|s| ProjectStatus::parse(s))
            .unwrap_or(ProjectStatus::Processing);
        let project_id = fields
            .get("project_id")
            .cloned()
            .ok_or_else(|| QueueError::invalid_payload("snapshot missing project_id"))?;

        let mut update = ProgressUpdate::new(
            ProjectId::from_string(project_id),
            stage,
            fields
                .get("percent")
                .and_then(|p| p.parse::<u8>().ok())
                .unwrap_or(0),
            fields.get("message").cloned().unwrap_or_default(),
            status,
        );
        update.timestamp_ms = fields
            .get("timestamp_ms")
            .and_then(|t| t.parse().ok())
            .unwrap_or(update.timestamp_ms);

        Ok(Some(update))
    }

    /// Subscribe to a channel. Returns a stream of parsed events; frames
    /// that fail to parse are dropped with a warning.
    pub async fn subscribe(
        &self,
        channel: &str,
    ) -> QueueResult<std::pin::Pin<Box<dyn futures_util::Stream<Item = ProgressUpdate> + Send>>>
    {
        use futures_util::StreamExt;

        let channel = normalize_channel(channel);
        let mut pubsub = self.client.get_async_pubsub().await?;
        pubsub.subscribe(&channel).await?;

        let stream = pubsub.into_on_message().filter_map(|msg| async move {
            let payload: String = msg.get_payload().ok()?;
            match serde_json::from_str(&payload) {
                Ok(update) => Some(update),
                Err(e) => {
                    warn!("dropping unparseable progress frame: {e}");
                    None
                }
            }
        });

        Ok(Box::pin(stream))
    }

    /// Remove a project's snapshot (project deletion).
    pub async fn drop_snapshot(&self, project_id: &ProjectId) -> QueueResult<()> {
        let channel = Self::channel_for(project_id);
        let mut conn = self.client.get_multiplexed_async_connection().await?;
        conn.del::<_, ()>(snapshot_key(&channel)).await?;
        Ok(())
    }

    // ------------------------------------------------------------------
    // Worker heartbeats
    // ------------------------------------------------------------------

    /// Refresh the heartbeat for a running task. Workers call this every
    /// 10 seconds; the key expires after 60, so a dead worker's task loses
    /// its heartbeat within a minute.
    pub async fn heartbeat(&self, task_id: &str) -> QueueResult<()> {
        let mut conn = self.client.get_multiplexed_async_connection().await?;
        conn.set_ex::<_, _, ()>(heartbeat_key(task_id), Utc::now().timestamp(), 60)
            .await?;
        Ok(())
    }

    pub async fn is_alive(&self, task_id: &str) -> QueueResult<bool> {
        let mut conn = self.client.get_multiplexed_async_connection().await?;
        let exists: bool = conn.exists(heartbeat_key(task_id)).await?;
        Ok(exists)
    }

    pub async fn clear_heartbeat(&self, task_id: &str) -> QueueResult<()> {
        let mut conn = self.client.get_multiplexed_async_connection().await?;
        conn.del::<_, ()>(heartbeat_key(task_id)).await?;
        Ok(())
    }
}
