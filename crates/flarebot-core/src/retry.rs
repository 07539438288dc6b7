//! Bounded, rate-limit aware retry of a single remote operation.
//!
//! Each attempt ends in one of four states: success, a retryable error, a
//! rate-limit signal, or a fatal error. Rate-limit waits are honored exactly
//! and never count against the attempt budget. Retryable errors back off
//! exponentially until `max_attempts` ordinary attempts have been spent.

use std::future::Future;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tokio::time::Instant;
use tracing::{debug, warn};

use crate::error::Disposition;
use crate::CoreError;

/// Immutable retry parameters.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Total ordinary attempts, including the first. Clamped to at least 1.
    pub max_attempts: u32,
    pub base_delay: Duration,
    pub multiplier: u32,
    /// Overall budget for one invocation, checked before every sleep.
    pub deadline: Option<Duration>,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            base_delay: Duration::from_secs(1),
            multiplier: 2,
            deadline: None,
        }
    }
}

impl RetryPolicy {
    /// Backoff before the retry that follows failed attempt `attempt_index`
    /// (zero-based): `base_delay * multiplier^attempt_index`.
    pub fn delay_for(&self, attempt_index: u32) -> Duration {
        let factor = self.multiplier.saturating_pow(attempt_index);
        self.base_delay.saturating_mul(factor)
    }
}

/// The `retry` section of a config file.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct RetrySettings {
    pub max_attempts: u32,
    pub base_delay_ms: u64,
    pub multiplier: u32,
    /// Omit for no overall deadline.
    pub deadline_secs: Option<u64>,
}

impl Default for RetrySettings {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            base_delay_ms: 1000,
            multiplier: 2,
            deadline_secs: None,
        }
    }
}

impl RetrySettings {
    /// Converts the settings into a policy.
    pub fn policy(&self) -> RetryPolicy {
        RetryPolicy {
            max_attempts: self.max_attempts.max(1),
            base_delay: Duration::from_millis(self.base_delay_ms),
            multiplier: self.multiplier,
            deadline: self.deadline_secs.map(Duration::from_secs),
        }
    }
}

/// Runs operations under a [`RetryPolicy`].
///
/// # Examples
///
/// ```
/// use flarebot_core::{CoreError, RetryExecutor, RetryPolicy};
///
/// # let rt = tokio::runtime::Builder::new_current_thread().enable_time().build().unwrap();
/// # rt.block_on(async {
/// let retry = RetryExecutor::new(RetryPolicy::default());
/// let value = retry
///     .run("answer", || async { Ok::<_, CoreError>(42) })
///     .await
///     .unwrap();
/// assert_eq!(value, 42);
/// # });
/// ```
#[derive(Debug, Clone, Default)]
pub struct RetryExecutor {
    policy: RetryPolicy,
}

impl RetryExecutor {
    pub fn new(policy: RetryPolicy) -> Self {
        Self { policy }
    }

    pub fn policy(&self) -> &RetryPolicy {
        &self.policy
    }

    /// Calls `f` until it succeeds, fails fatally, or the budget is spent.
    ///
    /// `operation` names the call in log output.
    ///
    /// # Errors
    ///
    /// Returns the first fatal error, the last retryable error once
    /// `max_attempts` is reached, or `CoreError::DeadlineExceeded` when the
    /// next wait would overrun the policy deadline.
    pub async fn run<T, F, Fut>(&self, operation: &str, mut f: F) -> Result<T, CoreError>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, CoreError>>,
    {
        let started = Instant::now();
        let max_attempts = self.policy.max_attempts.max(1);
        let mut attempts = 0u32;

        loop {
            let err = match f().await {
                Ok(value) => return Ok(value),
                Err(err) => err,
            };

            let wait = match err.disposition() {
                Disposition::Fatal => return Err(err),
                Disposition::RateLimited(wait) => {
                    debug!(
                        operation,
                        wait_ms = wait.as_millis() as u64,
                        "Rate limited, waiting before retry"
                    );
                    wait
                }
                Disposition::Retry => {
                    let index = attempts;
                    attempts += 1;
                    if attempts >= max_attempts {
                        warn!(operation, attempts, error = %err, "Giving up after retries");
                        return Err(err);
                    }
                    let delay = self.policy.delay_for(index);
                    debug!(
                        operation,
                        attempt = attempts,
                        delay_ms = delay.as_millis() as u64,
                        error = %err,
                        "Retrying after transient error"
                    );
                    delay
                }
            };

            if let Some(deadline) = self.policy.deadline {
                if started.elapsed() + wait > deadline {
                    warn!(operation, error = %err, "Retry deadline exceeded");
                    return Err(CoreError::DeadlineExceeded {
                        deadline,
                        last: Box::new(err),
                    });
                }
            }

            tokio::time::sleep(wait).await;
        }
    }
}
