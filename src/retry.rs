// =============================================================================
// retry.rs - THE SECOND (AND THIRD) CHANCE DEPARTMENT
// =============================================================================
//
// EDGAR is reliable right up until it isn't: a 429 here, a reset connection
// there, a submissions JSON that ends halfway through a bracket. Instead of
// giving up on the first hiccup we retry with exponential backoff:
//
//   delay(n) = clamp(multiplier * 2^(n-1), base, cap)     n = failed attempt
//
// With the defaults (3 attempts, 2s base, 10s cap, multiplier 1) that is
// fail, wait 2s, fail, wait 2s, fail, give up.
//
// The policy is a plain value handed to whoever needs it, and the waiting is
// done through a Sleeper so tests can run the whole dance without actually
// sleeping.
// =============================================================================

use std::future::Future;
use std::time::Duration;

use tracing::{debug, warn};

use crate::config::Config;
use crate::error::FetchError;

/// Something that can wait. The real one defers to tokio; tests record the
/// requested delays and return immediately.
pub trait Sleeper {
    fn sleep(&self, duration: Duration) -> impl Future<Output = ()>;
}

/// Wall-clock sleeping via `tokio::time::sleep`.
#[derive(Debug, Clone, Copy, Default)]
pub struct TokioSleeper;

impl Sleeper for TokioSleeper {
    fn sleep(&self, duration: Duration) -> impl Future<Output = ()> {
        tokio::time::sleep(duration)
    }
}

/// How many times to try, and how long to wait in between.
#[derive(Debug, Clone, PartialEq)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    pub base_delay: Duration,
    pub max_delay: Duration,
    pub multiplier: f64,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            base_delay: Duration::from_secs(2),
            max_delay: Duration::from_secs(10),
            multiplier: 1.0,
        }
    }
}

impl RetryPolicy {
    pub fn from_config(config: &Config) -> Self {
        Self {
            max_attempts: config.retry_max_attempts.max(1),
            base_delay: config.retry_base_delay,
            max_delay: config.retry_max_delay.max(config.retry_base_delay),
            multiplier: config.retry_multiplier,
        }
    }

    /// Backoff after the `attempt`-th failure (1-based).
    pub fn delay_for(&self, attempt: u32) -> Duration {
        let exponent = attempt.saturating_sub(1).min(30) as i32;
        let raw = self.multiplier * 2f64.powi(exponent);
        if !raw.is_finite() {
            return self.max_delay;
        }
        let secs = raw.clamp(self.base_delay.as_secs_f64(), self.max_delay.as_secs_f64());
        Duration::from_secs_f64(secs)
    }

    /// Run `operation` until it succeeds, fails with a non-transient error,
    /// or runs out of attempts. The last error is returned on exhaustion.
    ///
    /// `operation` receives the 1-based attempt number.
    pub async fn run<T, S, F, Fut>(
        &self,
        label: &str,
        sleeper: &S,
        mut operation: F,
    ) -> Result<T, FetchError>
    where
        S: Sleeper,
        F: FnMut(u32) -> Fut,
        Fut: Future<Output = Result<T, FetchError>>,
    {
        let max_attempts = self.max_attempts.max(1);
        let mut attempt = 1;

        loop {
            debug!(label = label, attempt = attempt, max_attempts = max_attempts, "Attempting request");

            match operation(attempt).await {
                Ok(value) => return Ok(value),
                Err(e) if !e.is_transient() => {
                    warn!(label = label, attempt = attempt, error = %e, "Non-transient failure, not retrying");
                    return Err(e);
                }
                Err(e) if attempt >= max_attempts => {
                    warn!(
                        label = label,
                        attempts = attempt,
                        error = %e,
                        "Retries exhausted"
                    );
                    return Err(e);
                }
                Err(e) => {
                    let delay = self.delay_for(attempt);
                    warn!(
                        label = label,
                        attempt = attempt,
                        max_attempts = max_attempts,
                        delay_ms = delay.as_millis() as u64,
                        error = %e,
                        "Transient failure, backing off"
                    );
                    sleeper.sleep(delay).await;
                    attempt += 1;
                }
            }
        }
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use std::cell::{Cell, RefCell};

    /// Records every requested delay and returns immediately.
    #[derive(Default)]
    pub(crate) struct RecordingSleeper {
        pub delays: RefCell<Vec<Duration>>,
    }

    impl Sleeper for RecordingSleeper {
        fn sleep(&self, duration: Duration) -> impl Future<Output = ()> {
            self.delays.borrow_mut().push(duration);
            std::future::ready(())
        }
    }

    fn transient() -> FetchError {
        FetchError::Status {
            status: reqwest::StatusCode::SERVICE_UNAVAILABLE,
            url: "https://data.sec.gov/submissions/CIK0001287750.json".to_string(),
        }
    }

    #[test]
    fn test_backoff_schedule_is_clamped() {
        let policy = RetryPolicy::default();
        assert_eq!(policy.delay_for(1), Duration::from_secs(2));
        assert_eq!(policy.delay_for(2), Duration::from_secs(2));
        assert_eq!(policy.delay_for(3), Duration::from_secs(4));
        assert_eq!(policy.delay_for(4), Duration::from_secs(8));
        assert_eq!(policy.delay_for(5), Duration::from_secs(10));
        assert_eq!(policy.delay_for(40), Duration::from_secs(10));
    }

    #[tokio::test]
    async fn test_gives_up_after_max_attempts() {
        let policy = RetryPolicy::default();
        let sleeper = RecordingSleeper::default();
        let calls = Cell::new(0u32);

        let result: Result<(), FetchError> = policy
            .run("test", &sleeper, |_| {
                calls.set(calls.get() + 1);
                async { Err(transient()) }
            })
            .await;

        assert!(result.is_err());
        assert_eq!(calls.get(), 3);
        assert_eq!(
            *sleeper.delays.borrow(),
            vec![Duration::from_secs(2), Duration::from_secs(2)]
        );
    }

    #[tokio::test]
    async fn test_recovers_on_later_attempt() {
        let policy = RetryPolicy::default();
        let sleeper = RecordingSleeper::default();

        let result = policy
            .run("test", &sleeper, |attempt| async move {
                if attempt < 2 {
                    Err(transient())
                } else {
                    Ok(attempt)
                }
            })
            .await;

        assert_eq!(result.unwrap(), 2);
        assert_eq!(sleeper.delays.borrow().len(), 1);
    }

    #[tokio::test]
    async fn test_non_transient_error_is_not_retried() {
        let policy = RetryPolicy::default();
        let sleeper = RecordingSleeper::default();
        let calls = Cell::new(0u32);

        let result: Result<(), FetchError> = policy
            .run("test", &sleeper, |_| {
                calls.set(calls.get() + 1);
                async {
                    Err(FetchError::Cache {
                        path: "/nowhere".into(),
                        source: std::io::Error::new(std::io::ErrorKind::Other, "disk on fire"),
                    })
                }
            })
            .await;

        assert!(result.is_err());
        assert_eq!(calls.get(), 1);
        assert!(sleeper.delays.borrow().is_empty());
    }
}
