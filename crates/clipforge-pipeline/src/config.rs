//! Worker configuration.

use std::time::Duration;

use clipforge_models::Stage;

/// Worker pool and stage configuration.
#[derive(Debug, Clone)]
pub struct WorkerConfig {
    /// Concurrent runs per worker process.
    pub concurrency: usize,
    /// How long to block waiting for broker messages per poll.
    pub poll_block: Duration,
    /// Heartbeat refresh interval for running tasks.
    pub heartbeat_interval: Duration,
    /// Stage deadlines; hitting one fails the run with reason "timeout".
    pub stage_timeouts: StageTimeouts,
    /// Grace between soft and hard kill of a subprocess.
    pub kill_grace: Duration,
}

/// Per-stage deadlines.
#[derive(Debug, Clone)]
pub struct StageTimeouts {
    pub ingest: Duration,
    pub subtitle: Duration,
    pub analyze: Duration,
    pub highlight: Duration,
    pub export: Duration,
    pub done: Duration,
}

impl Default for StageTimeouts {
    fn default() -> Self {
        Self {
            ingest: Duration::from_secs(30 * 60),
            subtitle: Duration::from_secs(10 * 60),
            analyze: Duration::from_secs(20 * 60),
            highlight: Duration::from_secs(20 * 60),
            export: Duration::from_secs(30 * 60),
            done: Duration::from_secs(60),
        }
    }
}

impl StageTimeouts {
    pub fn for_stage(&self, stage: Stage) -> Duration {
        match stage {
            Stage::Ingest => self.ingest,
            Stage::Subtitle => self.subtitle,
            Stage::Analyze => self.analyze,
            Stage::Highlight => self.highlight,
            Stage::Export => self.export,
            Stage::Done => self.done,
        }
    }
}

impl Default for WorkerConfig {
    fn default() -> Self {
        Self {
            concurrency: std::thread::available_parallelism()
                .map(|n| n.get())
                .unwrap_or(4),
            poll_block: Duration::from_secs(1),
            heartbeat_interval: Duration::from_secs(10),
            stage_timeouts: StageTimeouts::default(),
            kill_grace: Duration::from_secs(5),
        }
    }
}

impl WorkerConfig {
    /// Create config from environment variables.
    pub fn from_env() -> Self {
        let mut config = Self::default();
        if let Some(n) = std::env::var("WORKER_CONCURRENCY")
            .ok()
            .and_then(|s| s.parse::<usize>().ok())
        {
            if n > 0 {
                config.concurrency = n;
            }
        }
        config
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_timeouts_match_contract() {
        let timeouts = StageTimeouts::default();
        assert_eq!(timeouts.for_stage(Stage::Ingest), Duration::from_secs(1800));
        assert_eq!(timeouts.for_stage(Stage::Done), Duration::from_secs(60));
    }
}
