use backon::{ExponentialBuilder, Retryable};
use serde::{Deserialize, Serialize};
use std::future::Future;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;
use tracing::warn;

use crate::error::{PipelineError, Result};

/// Backoff policy for transient producer failures
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RetryPolicy {
    /// Total attempts including the first call
    pub max_attempts: usize,
    pub initial_delay_ms: u64,
    pub max_delay_secs: u64,
    pub jitter: bool,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 4,
            initial_delay_ms: 2000,
            max_delay_secs: 60,
            jitter: true,
        }
    }
}

impl RetryPolicy {
    fn backoff(&self) -> ExponentialBuilder {
        let builder = ExponentialBuilder::default()
            .with_min_delay(Duration::from_millis(self.initial_delay_ms))
            .with_max_delay(Duration::from_secs(self.max_delay_secs))
            .with_max_times(self.max_attempts.saturating_sub(1));
        if self.jitter {
            builder.with_jitter()
        } else {
            builder
        }
    }
}

/// Run `op`, retrying transient errors under `policy`.
///
/// Exhausted transient errors are escalated to fatal ones. Other errors are
/// returned on first occurrence.
pub async fn retry_producer<T, F, Fut>(policy: &RetryPolicy, label: &str, mut op: F) -> Result<T>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T>>,
{
    let attempts = AtomicUsize::new(0);

    let outcome = (|| {
        attempts.fetch_add(1, Ordering::Relaxed);
        op()
    })
    .retry(policy.backoff())
    .notify(|err: &PipelineError, dur: Duration| {
        warn!(
            task = label,
            error = %err,
            retry_delay_ms = dur.as_millis() as u64,
            "retrying after transient failure"
        );
    })
    .when(|err: &PipelineError| err.is_transient())
    .await;

    outcome.map_err(|err| err.escalate(attempts.load(Ordering::Relaxed)))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn fast_policy(max_attempts: usize) -> RetryPolicy {
        RetryPolicy {
            max_attempts,
            initial_delay_ms: 1,
            max_delay_secs: 1,
            jitter: false,
        }
    }

    #[tokio::test]
    async fn test_transient_errors_are_retried_until_success() {
        let calls = AtomicUsize::new(0);
        let counter = &calls;
        let result = retry_producer(&fast_policy(4), "summary", || async move {
            if counter.fetch_add(1, Ordering::SeqCst) < 2 {
                Err(PipelineError::transient("summary", "429"))
            } else {
                Ok("done")
            }
        })
        .await;

        assert_eq!(result.unwrap(), "done");
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn test_exhausted_retries_escalate_to_fatal() {
        let calls = AtomicUsize::new(0);
        let counter = &calls;
        let result: Result<()> = retry_producer(&fast_policy(3), "summary", || async move {
            counter.fetch_add(1, Ordering::SeqCst);
            Err(PipelineError::transient("summary", "503 Service Unavailable"))
        })
        .await;

        let err = result.unwrap_err();
        assert!(matches!(err, PipelineError::ProducerFatal { .. }));
        assert!(err.reason().contains("gave up after 3 attempts"));
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn test_fatal_errors_are_not_retried() {
        let calls = AtomicUsize::new(0);
        let counter = &calls;
        let result: Result<()> = retry_producer(&fast_policy(5), "frames", || async move {
            counter.fetch_add(1, Ordering::SeqCst);
            Err(PipelineError::fatal("frames", "no such file"))
        })
        .await;

        assert!(result.is_err());
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_single_attempt_policy_escalates_immediately() {
        let result: Result<()> =
            tokio_test::block_on(retry_producer(&fast_policy(1), "summary", || async {
                Err(PipelineError::transient("summary", "429"))
            }));

        let err = result.unwrap_err();
        assert!(matches!(err, PipelineError::ProducerFatal { .. }));
        assert_eq!(err.reason(), "429 (gave up after 1 attempts)");
    }
}
