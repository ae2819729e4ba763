//! Retry with exponential backoff for orchestrator calls.
//!
//! `create` and `update` use [`RetryPolicy::run`], which gives up after
//! `max_attempts`. `remove` uses [`RetryPolicy::run_forever`]: a stale
//! instance left running is worse than retry noise.

use std::future::Future;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tracing::warn;

use crate::error::OrchestratorResult;

/// Backoff parameters for orchestrator calls.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct RetryPolicy {
    /// Total attempts for bounded operations (1 = no retry).
    pub max_attempts: u32,
    /// Delay before the second attempt.
    pub initial_backoff_ms: u64,
    /// Upper bound for the doubling delay.
    pub max_backoff_ms: u64,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 5,
            initial_backoff_ms: 200,
            max_backoff_ms: 10_000,
        }
    }
}

impl RetryPolicy {
    /// Delay after the given failed attempt (1-based): doubles each time, capped.
    pub fn backoff(&self, attempt: u32) -> Duration {
        let factor = 2u64.saturating_pow(attempt.saturating_sub(1));
        let ms = self
            .initial_backoff_ms
            .saturating_mul(factor)
            .min(self.max_backoff_ms);
        Duration::from_millis(ms)
    }

    /// Run `f` until it succeeds, returns a non-retryable error, or
    /// `max_attempts` is exhausted.
    pub async fn run<T, F, Fut>(&self, op: &str, mut f: F) -> OrchestratorResult<T>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = OrchestratorResult<T>>,
    {
        let max_attempts = self.max_attempts.max(1);
        let mut attempt = 1;
        loop {
            match f().await {
                Ok(value) => return Ok(value),
                Err(e) if e.is_retryable() && attempt < max_attempts => {
                    let delay = self.backoff(attempt);
                    warn!(%op, attempt, max_attempts, delay_ms = delay.as_millis() as u64, error = %e, "orchestrator call failed, retrying");
                    tokio::time::sleep(delay).await;
                    attempt += 1;
                }
                Err(e) => return Err(e),
            }
        }
    }

    /// Run `f` until it succeeds, retrying every error.
    pub async fn run_forever<T, F, Fut>(&self, op: &str, mut f: F) -> T
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = OrchestratorResult<T>>,
    {
        let mut attempt = 1;
        loop {
            match f().await {
                Ok(value) => return value,
                Err(e) => {
                    let delay = self.backoff(attempt);
                    warn!(%op, attempt, delay_ms = delay.as_millis() as u64, error = %e, "orchestrator call failed, retrying");
                    tokio::time::sleep(delay).await;
                    attempt = attempt.saturating_add(1);
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;
    use std::sync::atomic::{AtomicU32, Ordering};

    use super::*;
    use crate::error::OrchestratorError;

    #[test]
    fn backoff_doubles_and_caps() {
        let policy = RetryPolicy {
            max_attempts: 10,
            initial_backoff_ms: 100,
            max_backoff_ms: 1000,
        };
        assert_eq!(policy.backoff(1), Duration::from_millis(100));
        assert_eq!(policy.backoff(2), Duration::from_millis(200));
        assert_eq!(policy.backoff(4), Duration::from_millis(800));
        assert_eq!(policy.backoff(5), Duration::from_millis(1000));
        assert_eq!(policy.backoff(60), Duration::from_millis(1000));
    }

    #[tokio::test(start_paused = true)]
    async fn run_retries_transient_errors() {
        let calls = Arc::new(AtomicU32::new(0));
        let policy = RetryPolicy::default();

        let c = calls.clone();
        let result = policy
            .run("create", || {
                let c = c.clone();
                async move {
                    if c.fetch_add(1, Ordering::SeqCst) < 2 {
                        Err(OrchestratorError::Unavailable("busy".into()))
                    } else {
                        Ok("web.000001")
                    }
                }
            })
            .await;

        assert_eq!(result, Ok("web.000001"));
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn run_gives_up_after_max_attempts() {
        let calls = Arc::new(AtomicU32::new(0));
        let policy = RetryPolicy {
            max_attempts: 3,
            ..Default::default()
        };

        let c = calls.clone();
        let result: OrchestratorResult<()> = policy
            .run("update", || {
                let c = c.clone();
                async move {
                    c.fetch_add(1, Ordering::SeqCst);
                    Err(OrchestratorError::Unavailable("down".into()))
                }
            })
            .await;

        assert!(result.is_err());
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn run_does_not_retry_rejections() {
        let calls = Arc::new(AtomicU32::new(0));
        let c = calls.clone();
        let result: OrchestratorResult<()> = RetryPolicy::default()
            .run("create", || {
                let c = c.clone();
                async move {
                    c.fetch_add(1, Ordering::SeqCst);
                    Err(OrchestratorError::Rejected("no such image".into()))
                }
            })
            .await;

        assert_eq!(result, Err(OrchestratorError::Rejected("no such image".into())));
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn run_forever_outlasts_max_attempts() {
        let calls = Arc::new(AtomicU32::new(0));
        let policy = RetryPolicy {
            max_attempts: 2,
            ..Default::default()
        };

        let c = calls.clone();
        policy
            .run_forever("remove", || {
                let c = c.clone();
                async move {
                    if c.fetch_add(1, Ordering::SeqCst) < 9 {
                        Err(OrchestratorError::Rejected("locked".into()))
                    } else {
                        Ok(())
                    }
                }
            })
            .await;

        assert_eq!(calls.load(Ordering::SeqCst), 10);
    }
}
