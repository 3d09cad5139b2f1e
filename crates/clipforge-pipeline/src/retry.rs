//! Retry helper for language model calls.
//!
//! Up to three attempts with exponential backoff on transient errors; a 429
//! honours the server's `Retry-After`. Permanent failures abort immediately.
//! A schema-invalid response gets exactly one repair round trip before it is
//! treated as unrecoverable.

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use serde::de::DeserializeOwned;
use tracing::{debug, warn};

use crate::capabilities::{LlmClient, LlmKind};
use crate::error::{PipelineError, PipelineResult};

/// Retry policy.
#[derive(Debug, Clone)]
pub struct RetryPolicy {
    /// Total attempts, including the first.
    pub max_attempts: u32,
    /// Base delay, doubled per attempt.
    pub base_delay: Duration,
    /// Ceiling on any single delay.
    pub max_delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            base_delay: Duration::from_millis(500),
            max_delay: Duration::from_secs(30),
        }
    }
}

impl RetryPolicy {
    fn delay_for_attempt(&self, attempt: u32) -> Duration {
        let delay = self.base_delay.saturating_mul(2u32.saturating_pow(attempt));
        delay.min(self.max_delay)
    }
}

/// Run `operation` with transient-error retries.
pub async fn retry_transient<F, Fut, T>(
    policy: &RetryPolicy,
    what: &str,
    operation: F,
) -> PipelineResult<T>
where
    F: Fn() -> Fut,
    Fut: Future<Output = PipelineResult<T>>,
{
    let mut attempt = 0u32;

    loop {
        match operation().await {
            Ok(value) => return Ok(value),
            Err(e) if e.is_transient() && attempt + 1 < policy.max_attempts => {
                let delay = match &e {
                    PipelineError::RateLimited {
                        retry_after: Some(secs),
                    } => Duration::from_secs(*secs).min(policy.max_delay),
                    _ => policy.delay_for_attempt(attempt),
                };
                attempt += 1;
                debug!("{what} attempt {attempt} failed, retrying in {delay:?}: {e}");
                tokio::time::sleep(delay).await;
            }
            Err(e) => return Err(e),
        }
    }
}

/// Call the model and parse its response as `T`, with transient retries and
/// one schema repair attempt.
pub async fn call_typed<T: DeserializeOwned>(
    llm: &Arc<dyn LlmClient>,
    policy: &RetryPolicy,
    kind: LlmKind,
    input: &str,
) -> PipelineResult<T> {
    let text = retry_transient(policy, kind.as_str(), || llm.call(kind, input)).await?;

    match serde_json::from_str(&text) {
        Ok(value) => Ok(value),
        Err(first_err) => {
            warn!(
                kind = kind.as_str(),
                "schema-invalid response, attempting repair: {first_err}"
            );
            let repaired =
                retry_transient(policy, "repair", || llm.call(LlmKind::Repair, &text)).await?;
            serde_json::from_str(&repaired).map_err(|e| {
                PipelineError::unrecoverable(format!(
                    "{} response invalid after repair: {e}",
                    kind.as_str()
                ))
            })
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};

    #[tokio::test]
    async fn retries_transient_then_succeeds() {
        let policy = RetryPolicy {
            base_delay: Duration::from_millis(1),
            ..Default::default()
        };
        let calls = AtomicU32::new(0);

        let result = retry_transient(&policy, "test", || {
            let n = calls.fetch_add(1, Ordering::SeqCst);
            async move {
                if n < 2 {
                    Err(PipelineError::transient("503"))
                } else {
                    Ok(42)
                }
            }
        })
        .await;

        assert_eq!(result.unwrap(), 42);
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn gives_up_after_max_attempts() {
        let policy = RetryPolicy {
            base_delay: Duration::from_millis(1),
            ..Default::default()
        };
        let calls = AtomicU32::new(0);

        let result: PipelineResult<()> = retry_transient(&policy, "test", || {
            calls.fetch_add(1, Ordering::SeqCst);
            async { Err(PipelineError::transient("503")) }
        })
        .await;

        assert!(result.is_err());
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn permanent_errors_abort_immediately() {
        let policy = RetryPolicy::default();
        let calls = AtomicU32::new(0);

        let result: PipelineResult<()> = retry_transient(&policy, "test", || {
            calls.fetch_add(1, Ordering::SeqCst);
            async { Err(PipelineError::unrecoverable("400")) }
        })
        .await;

        assert!(result.is_err());
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn typed_call_repairs_once() {
        use crate::capabilities::MockLlmClient;

        let mut mock = MockLlmClient::new();
        mock.expect_call()
            .withf(|kind, _| *kind == LlmKind::Scoring)
            .times(1)
            .returning(|_, _| Ok("not json".to_string()));
        mock.expect_call()
            .withf(|kind, _| *kind == LlmKind::Repair)
            .times(1)
            .returning(|_, _| Ok("[1, 2]".to_string()));

        let llm: Arc<dyn LlmClient> = Arc::new(mock);
        let parsed: Vec<u32> = call_typed(&llm, &RetryPolicy::default(), LlmKind::Scoring, "x")
            .await
            .unwrap();
        assert_eq!(parsed, vec![1, 2]);
    }
}
