//! Bounded retry with exponential backoff.
//!
//! Both pipelines reach the completion endpoint through [`retry_with`], so a
//! transient failure is retried the same way no matter which step issued it.

use crate::{Error, Result};
use std::future::Future;
use std::time::Duration;
use tokio_retry::RetryIf;

const DEFAULT_MAX_ATTEMPTS: u32 = 3;
const DEFAULT_BASE_DELAY: Duration = Duration::from_secs(2);
const DEFAULT_MAX_DELAY: Duration = Duration::from_secs(30);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Total attempts, including the first one.
    pub max_attempts: u32,
    pub base_delay: Duration,
    pub max_delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: DEFAULT_MAX_ATTEMPTS,
            base_delay: DEFAULT_BASE_DELAY,
            max_delay: DEFAULT_MAX_DELAY,
        }
    }
}

impl RetryPolicy {
    pub fn new(max_attempts: u32) -> Self {
        Self {
            max_attempts,
            ..Self::default()
        }
    }

    /// A single attempt with no backoff.
    pub fn no_retry() -> Self {
        Self::new(1)
    }

    pub fn with_base_delay(mut self, base_delay: Duration) -> Self {
        self.base_delay = base_delay;
        self
    }

    pub fn with_max_delay(mut self, max_delay: Duration) -> Self {
        self.max_delay = max_delay;
        self
    }

    /// Sleep durations between consecutive attempts: `base`, `2 * base`,
    /// `4 * base`, ... capped at `max_delay`.
    pub fn delays(&self) -> impl Iterator<Item = Duration> {
        let base = self.base_delay;
        let max = self.max_delay;
        (0..self.max_attempts.saturating_sub(1)).map(move |n| backoff(base, max, n))
    }
}

fn backoff(base: Duration, max: Duration, exponent: u32) -> Duration {
    2u32.checked_pow(exponent)
        .and_then(|factor| base.checked_mul(factor))
        .map_or(max, |delay| delay.min(max))
}

/// Run `operation` under `policy`, retrying only errors for which
/// [`Error::is_retryable`] holds.
///
/// The closure receives the 1-based attempt number. A terminal error is
/// returned unchanged; running out of attempts wraps the last cause in
/// [`Error::RetriesExhausted`].
pub async fn retry_with<T, F, Fut>(policy: &RetryPolicy, label: &str, mut operation: F) -> Result<T>
where
    F: FnMut(u32) -> Fut,
    Fut: Future<Output = Result<T>>,
{
    let max_attempts = policy.max_attempts.max(1);
    let mut attempt = 0u32;

    let result = RetryIf::spawn(
        policy.delays(),
        || {
            attempt += 1;
            let current = attempt;
            let fut = operation(current);
            async move {
                fut.await.map_err(|e| {
                    if e.is_retryable() {
                        tracing::warn!(
                            "{} attempt {}/{} failed: {}",
                            label,
                            current,
                            max_attempts,
                            e
                        );
                    } else {
                        tracing::error!("{} failed with terminal error: {}", label, e);
                    }
                    e
                })
            }
        },
        |e: &Error| e.is_retryable(),
    )
    .await;

    match result {
        Ok(value) => Ok(value),
        Err(e) if e.is_retryable() => {
            tracing::error!("{} gave up after {} attempts", label, attempt);
            Err(Error::RetriesExhausted {
                attempts: attempt,
                last: Box::new(e),
            })
        }
        Err(e) => Err(e),
    }
}
