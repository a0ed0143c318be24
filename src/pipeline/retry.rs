//! Bounded retry for provider calls.
//!
//! HTTP 429 / 5xx errors from generation APIs are transient under load.
//! Exponential backoff (`retry_backoff_ms * 2^attempt`) spaces retries out:
//! with 500 ms base and 2 retries the wait sequence is 500 ms → 1 s.
//!
//! Each attempt is bounded by the per-call timeout and raced against the
//! run's cancellation token, so a stuck provider cannot hold a run forever.

use crate::config::PipelineConfig;
use crate::providers::ProviderError;
use std::future::Future;
use std::time::Duration;
use tokio::time::{sleep, timeout};
use tokio_util::sync::CancellationToken;
use tracing::warn;

/// Retry parameters for one stage.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    pub max_retries: u32,
    pub backoff_ms: u64,
    pub call_timeout: Duration,
}

impl RetryPolicy {
    pub fn from_config(config: &PipelineConfig) -> Self {
        Self {
            max_retries: config.max_retries,
            backoff_ms: config.retry_backoff_ms,
            call_timeout: Duration::from_secs(config.api_timeout_secs),
        }
    }

    /// Delay before retry number `attempt` (1-based).
    pub fn backoff_for(&self, attempt: u32) -> Duration {
        let factor = 2u64.saturating_pow(attempt.saturating_sub(1));
        Duration::from_millis(self.backoff_ms.saturating_mul(factor))
    }
}

/// Why a retried call gave up.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CallFailure {
    /// Every attempt failed, or the failure was not retryable.
    Exhausted { retries: u32, detail: String },
    /// The run was cancelled while waiting.
    Cancelled,
}

/// Run `op` until it succeeds, the retries run out, or `cancel` fires.
///
/// `label` names the item in log lines, e.g. `"speech page 3"`.
pub async fn call_with_retry<T, F, Fut>(
    label: &str,
    policy: &RetryPolicy,
    cancel: &CancellationToken,
    mut op: F,
) -> Result<T, CallFailure>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, ProviderError>>,
{
    let mut last_err = String::from("Unknown error");

    for attempt in 0..=policy.max_retries {
        if attempt > 0 {
            let backoff = policy.backoff_for(attempt);
            warn!(
                "{}: retry {}/{} after {}ms",
                label,
                attempt,
                policy.max_retries,
                backoff.as_millis()
            );
            tokio::select! {
                _ = cancel.cancelled() => return Err(CallFailure::Cancelled),
                _ = sleep(backoff) => {}
            }
        }

        let outcome = tokio::select! {
            _ = cancel.cancelled() => return Err(CallFailure::Cancelled),
            r = timeout(policy.call_timeout, op()) => r,
        };

        match outcome {
            Ok(Ok(value)) => return Ok(value),
            Ok(Err(e)) => {
                warn!("{}: attempt {} failed: {}", label, attempt + 1, e);
                let retryable = e.is_retryable();
                last_err = e.to_string();
                if !retryable {
                    return Err(CallFailure::Exhausted {
                        retries: attempt,
                        detail: last_err,
                    });
                }
            }
            Err(_) => {
                warn!(
                    "{}: attempt {} timed out after {}s",
                    label,
                    attempt + 1,
                    policy.call_timeout.as_secs()
                );
                last_err = format!("timed out after {}s", policy.call_timeout.as_secs());
            }
        }
    }

    Err(CallFailure::Exhausted {
        retries: policy.max_retries,
        detail: last_err,
    })
}
