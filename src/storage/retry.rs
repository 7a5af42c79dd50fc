//! Bounded retries for remote store operations.

use std::future::Future;
use std::time::Duration;

use tokio_retry::strategy::ExponentialBackoff;
use tokio_retry::RetryIf;
use tracing::warn;

use crate::error::StoreError;

/// Default number of attempts (first try included).
pub const DEFAULT_RETRY_ATTEMPTS: usize = 3;

/// Retry settings for a remote backend.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Total attempts, including the first one. Zero behaves like one.
    pub attempts: usize,

    /// Upper bound for a single backoff delay
    pub max_delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            attempts: DEFAULT_RETRY_ATTEMPTS,
            max_delay: Duration::from_secs(2),
        }
    }
}

impl RetryPolicy {
    pub fn new(attempts: usize) -> Self {
        Self {
            attempts,
            ..Self::default()
        }
    }

    /// A policy that makes a single attempt.
    pub fn none() -> Self {
        Self::new(1)
    }

    // 100ms, 200ms, 400ms, ... capped at max_delay
    fn strategy(&self) -> impl Iterator<Item = Duration> {
        ExponentialBackoff::from_millis(2)
            .factor(50)
            .max_delay(self.max_delay)
            .take(self.attempts.saturating_sub(1))
    }
}

/// Run `action` until it succeeds, fails permanently, or the policy's
/// attempts are exhausted.
///
/// Only [`StoreError::is_transient`] errors are retried. The last error is
/// returned unchanged.
pub async fn with_retry<T, F, Fut>(
    policy: &RetryPolicy,
    operation: &str,
    mut action: F,
) -> Result<T, StoreError>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, StoreError>>,
{
    let mut attempt = 0usize;
    let result = RetryIf::spawn(
        policy.strategy(),
        || {
            attempt += 1;
            action()
        },
        |err: &StoreError| {
            let retry = err.is_transient();
            if retry {
                warn!(operation, error = %err, "Transient upstream failure, retrying");
            }
            retry
        },
    )
    .await;

    if let Err(err) = &result {
        if err.is_transient() && attempt > 1 {
            warn!(operation, attempts = attempt, error = %err, "Giving up after retries");
        }
    }
    result
}
