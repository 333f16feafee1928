use std::future::Future;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use thiserror::Error;
use tokio::time::sleep;
use tracing::{debug, warn};

/// Bounded exponential backoff without jitter.
///
/// The delay after failed attempt `n` is `base_delay_ms * 2^(n-1)`, so the
/// total forced wait for a call that never succeeds is fully determined by
/// the two fields.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct RetryPolicy {
    /// Total attempts, including the first one.
    pub max_attempts: u32,
    /// Base delay in milliseconds for exponential backoff.
    pub base_delay_ms: u64,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            base_delay_ms: 1000,
        }
    }
}

/// The final failure of a retried call.
#[derive(Debug, Error)]
#[error("{operation} failed after {attempts} attempt(s): {last_error:#}")]
pub struct RetryError {
    pub operation: String,
    pub attempts: u32,
    pub last_error: anyhow::Error,
}

impl RetryError {
    pub fn into_inner(self) -> anyhow::Error {
        self.last_error
    }
}

impl RetryPolicy {
    pub fn new(max_attempts: u32, base_delay_ms: u64) -> Self {
        Self {
            max_attempts,
            base_delay_ms,
        }
    }

    /// A policy that makes exactly one attempt.
    pub fn once() -> Self {
        Self::new(1, 0)
    }

    fn attempts(&self) -> u32 {
        self.max_attempts.max(1)
    }

    /// Delay to wait after failed attempt `attempt` (1-based).
    pub fn delay_for_attempt(&self, attempt: u32) -> Duration {
        let factor = 2u64.saturating_pow(attempt.saturating_sub(1));
        Duration::from_millis(self.base_delay_ms.saturating_mul(factor))
    }

    /// Total wait incurred when every attempt fails.
    pub fn total_delay(&self) -> Duration {
        (1..self.attempts())
            .map(|attempt| self.delay_for_attempt(attempt))
            .sum()
    }

    /// Run `op` until it succeeds or the attempts are used up.
    ///
    /// The operation must be safe to repeat. Nothing it did on a failed
    /// attempt is undone.
    pub async fn run<T, E, F, Fut>(&self, operation: &str, mut op: F) -> Result<T, RetryError>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, E>>,
        E: Into<anyhow::Error>,
    {
        let max = self.attempts();
        let mut attempt = 1;
        loop {
            match op().await {
                Ok(value) => {
                    if attempt > 1 {
                        debug!(operation, attempt, "succeeded after retry");
                    }
                    return Ok(value);
                }
                Err(err) => {
                    let err: anyhow::Error = err.into();
                    if attempt >= max {
                        return Err(RetryError {
                            operation: operation.to_string(),
                            attempts: attempt,
                            last_error: err,
                        });
                    }
                    let delay = self.delay_for_attempt(attempt);
                    warn!(
                        operation,
                        attempt,
                        max_attempts = max,
                        delay_ms = delay.as_millis() as u64,
                        error = %format!("{err:#}"),
                        "attempt failed, retrying"
                    );
                    sleep(delay).await;
                    attempt += 1;
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use anyhow::anyhow;
    use std::cell::Cell;
    use tokio::time::Instant;

    #[test]
    fn exponential_backoff_delays() {
        let policy = RetryPolicy::new(5, 1000);
        assert_eq!(policy.delay_for_attempt(1), Duration::from_millis(1000));
        assert_eq!(policy.delay_for_attempt(2), Duration::from_millis(2000));
        assert_eq!(policy.delay_for_attempt(3), Duration::from_millis(4000));
        assert_eq!(policy.delay_for_attempt(4), Duration::from_millis(8000));
    }

    #[test]
    fn total_delay_is_geometric_sum() {
        assert_eq!(RetryPolicy::new(4, 100).total_delay(), Duration::from_millis(700));
        assert_eq!(RetryPolicy::new(1, 100).total_delay(), Duration::ZERO);
        assert_eq!(RetryPolicy::default().total_delay(), Duration::from_millis(3000));
    }

    #[tokio::test(start_paused = true)]
    async fn always_failing_makes_every_attempt() {
        let policy = RetryPolicy::new(4, 100);
        let calls = Cell::new(0u32);
        let start = Instant::now();

        let result: Result<(), _> = policy
            .run("scrape", || {
                calls.set(calls.get() + 1);
                async { Err(anyhow!("connection reset")) }
            })
            .await;

        let err = result.unwrap_err();
        assert_eq!(calls.get(), 4);
        assert_eq!(err.attempts, 4);
        // 100 * (2^0 + 2^1 + 2^2)
        assert_eq!(start.elapsed(), Duration::from_millis(700));
        assert_eq!(
            err.to_string(),
            "scrape failed after 4 attempt(s): connection reset"
        );
    }

    #[tokio::test(start_paused = true)]
    async fn success_on_attempt_k_stops_retrying() {
        let policy = RetryPolicy::new(5, 100);
        let calls = Cell::new(0u32);
        let start = Instant::now();

        let value = policy
            .run("tts", || {
                calls.set(calls.get() + 1);
                let n = calls.get();
                async move {
                    if n < 3 {
                        Err(anyhow!("503"))
                    } else {
                        Ok(n * 10)
                    }
                }
            })
            .await
            .unwrap();

        assert_eq!(value, 30);
        assert_eq!(calls.get(), 3);
        assert_eq!(start.elapsed(), Duration::from_millis(300));
    }

    #[tokio::test(start_paused = true)]
    async fn first_attempt_success_has_no_delay() {
        let policy = RetryPolicy::default();
        let start = Instant::now();
        let value = policy
            .run("noop", || async { Ok::<_, anyhow::Error>("done") })
            .await
            .unwrap();
        assert_eq!(value, "done");
        assert_eq!(start.elapsed(), Duration::ZERO);
    }

    #[tokio::test(start_paused = true)]
    async fn zero_attempts_still_runs_once() {
        let policy = RetryPolicy::new(0, 100);
        let calls = Cell::new(0u32);
        let result: Result<(), _> = policy
            .run("once", || {
                calls.set(calls.get() + 1);
                async { Err(std::io::Error::other("nope")) }
            })
            .await;
        assert_eq!(calls.get(), 1);
        assert_eq!(result.unwrap_err().attempts, 1);
    }
}
