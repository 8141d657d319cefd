//! Exponential-backoff retry for the connection phase of a model call.
//!
//! Only the request/response handshake is retried. Once a response body is
//! streaming, events have been handed to the caller and the call cannot be replayed.

use std::future::Future;
use std::time::Duration;

use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use quill_core::config::RetryConfig;

use crate::error::AdapterError;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RetryPolicy {
    pub max_retries: u32,
    pub base_delay: Duration,
    pub max_delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::from(&RetryConfig::default())
    }
}

impl From<&RetryConfig> for RetryPolicy {
    fn from(config: &RetryConfig) -> Self {
        Self {
            max_retries: config.max_retries,
            base_delay: Duration::from_millis(config.base_delay_ms),
            max_delay: Duration::from_secs(30),
        }
    }
}

impl RetryPolicy {
    pub fn none() -> Self {
        Self {
            max_retries: 0,
            ..Self::default()
        }
    }

    /// Delay before retry `attempt` (1-based): base × 2^(attempt−1), capped.
    pub fn delay_for(&self, attempt: u32) -> Duration {
        let factor = 2u32.saturating_pow(attempt.saturating_sub(1));
        self.base_delay.saturating_mul(factor).min(self.max_delay)
    }
}

/// Run `op` until it succeeds, fails with a non-retryable error, or retries run out.
///
/// Cancellation wins over both the operation and the backoff sleep.
pub async fn with_retry<T, F, Fut>(
    policy: &RetryPolicy,
    cancel: &CancellationToken,
    label: &str,
    mut op: F,
) -> Result<T, AdapterError>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, AdapterError>>,
{
    let mut attempt = 0u32;
    loop {
        let result = tokio::select! {
            biased;
            () = cancel.cancelled() => return Err(AdapterError::cancelled()),
            result = op() => result,
        };

        let err = match result {
            Ok(value) => {
                if attempt > 0 {
                    info!(adapter = label, attempt = attempt + 1, "Retry succeeded");
                }
                return Ok(value);
            }
            Err(err) => err,
        };

        if !err.is_retryable() || attempt >= policy.max_retries {
            return Err(err);
        }

        attempt += 1;
        let delay = policy.delay_for(attempt);
        warn!(
            adapter = label,
            attempt,
            max_retries = policy.max_retries,
            delay_ms = delay.as_millis() as u64,
            code = %err.code(),
            %err,
            "Model call failed, retrying"
        );
        metrics::counter!("quill_model_retries_total", "adapter" => label.to_string(), "code" => err.code())
            .increment(1);

        tokio::select! {
            biased;
            () = cancel.cancelled() => return Err(AdapterError::cancelled()),
            () = tokio::time::sleep(delay) => {}
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::AdapterErrorKind;
    use std::sync::Arc;
    use std::sync::atomic::{AtomicU32, Ordering};

    fn fast(max_retries: u32) -> RetryPolicy {
        RetryPolicy {
            max_retries,
            base_delay: Duration::from_millis(1),
            max_delay: Duration::from_millis(5),
        }
    }

    #[test]
    fn test_backoff_doubles_and_caps() {
        let policy = RetryPolicy {
            max_retries: 5,
            base_delay: Duration::from_millis(100),
            max_delay: Duration::from_millis(350),
        };
        assert_eq!(policy.delay_for(1), Duration::from_millis(100));
        assert_eq!(policy.delay_for(2), Duration::from_millis(200));
        assert_eq!(policy.delay_for(3), Duration::from_millis(350));
    }

    #[tokio::test]
    async fn test_retries_transient_then_succeeds() {
        let calls = Arc::new(AtomicU32::new(0));
        let counter = calls.clone();
        let result = with_retry(&fast(3), &CancellationToken::new(), "test", || {
            let counter = counter.clone();
            async move {
                if counter.fetch_add(1, Ordering::SeqCst) < 2 {
                    Err(AdapterError::from_status(503, "busy"))
                } else {
                    Ok("ok")
                }
            }
        })
        .await;
        assert_eq!(result.unwrap(), "ok");
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn test_non_retryable_fails_immediately() {
        let calls = Arc::new(AtomicU32::new(0));
        let counter = calls.clone();
        let result: Result<(), _> = with_retry(&fast(3), &CancellationToken::new(), "test", || {
            counter.fetch_add(1, Ordering::SeqCst);
            async { Err(AdapterError::from_status(401, "bad key")) }
        })
        .await;
        assert_eq!(result.unwrap_err().kind, AdapterErrorKind::Auth);
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_exhausted_retries_return_last_error() {
        let result: Result<(), _> = with_retry(&fast(2), &CancellationToken::new(), "test", || async {
            Err(AdapterError::network("refused"))
        })
        .await;
        assert_eq!(result.unwrap_err().kind, AdapterErrorKind::Network);
    }

    #[tokio::test]
    async fn test_cancelled_before_start() {
        let cancel = CancellationToken::new();
        cancel.cancel();
        let result: Result<(), _> = with_retry(&fast(2), &cancel, "test", || async { Ok(()) }).await;
        assert_eq!(result.unwrap_err().kind, AdapterErrorKind::Cancelled);
    }
}
