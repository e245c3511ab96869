use engine_config::settings::{Backoff, EngineSettings};
use std::future::Future;
use std::time::Duration;
use tokio::time::sleep;

/// Indicates whether an error should be retried or treated as fatal.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RetryDisposition {
    Retry,
    Stop,
}

/// Result of running an operation under the retry policy.
#[derive(Debug)]
pub enum RetryError<E> {
    /// The error was considered fatal and should bubble up immediately.
    Fatal(E),
    /// The error was retryable, but the configured attempts were exhausted.
    AttemptsExceeded(E),
}

impl<E> RetryError<E> {
    pub fn into_inner(self) -> E {
        match self {
            RetryError::Fatal(e) | RetryError::AttemptsExceeded(e) => e,
        }
    }
}

/// Where a single unit of retried work currently stands.
///
/// ```text
/// Pending -> Attempting(1) -> Succeeded
///                          -> Retrying(1, delay) -> Attempting(2) -> ...
///                          -> PermanentlyFailed
/// ```
///
/// The state carries no timer: whoever drives it decides how to wait out
/// `Retrying::delay` without blocking other work.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RetryState {
    Pending,
    Attempting { attempt: u32 },
    Retrying { attempt: u32, delay: Duration },
    Succeeded { attempts: u32 },
    PermanentlyFailed { attempts: u32, exhausted: bool },
}

impl RetryState {
    /// Moves `Pending` or `Retrying` into the next attempt.
    pub fn begin(self) -> Self {
        match self {
            RetryState::Pending => RetryState::Attempting { attempt: 1 },
            RetryState::Retrying { attempt, .. } => RetryState::Attempting {
                attempt: attempt + 1,
            },
            other => other,
        }
    }

    pub fn succeed(self) -> Self {
        match self {
            RetryState::Attempting { attempt } => RetryState::Succeeded { attempts: attempt },
            other => other,
        }
    }

    /// Applies a failed attempt, classified by `disposition`.
    pub fn fail(self, policy: &RetryPolicy, disposition: RetryDisposition) -> Self {
        let RetryState::Attempting { attempt } = self else {
            return self;
        };

        match disposition {
            RetryDisposition::Stop => RetryState::PermanentlyFailed {
                attempts: attempt,
                exhausted: false,
            },
            RetryDisposition::Retry if attempt >= policy.max_attempts => {
                RetryState::PermanentlyFailed {
                    attempts: attempt,
                    exhausted: true,
                }
            }
            RetryDisposition::Retry => RetryState::Retrying {
                attempt,
                delay: policy.delay_for(attempt),
            },
        }
    }

    /// Attempts made so far.
    pub fn attempts(&self) -> u32 {
        match *self {
            RetryState::Pending => 0,
            RetryState::Attempting { attempt } | RetryState::Retrying { attempt, .. } => attempt,
            RetryState::Succeeded { attempts } | RetryState::PermanentlyFailed { attempts, .. } => {
                attempts
            }
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            RetryState::Succeeded { .. } | RetryState::PermanentlyFailed { .. }
        )
    }
}

#[derive(Debug, Clone)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    pub base_delay: Duration,
    pub max_delay: Duration,
    pub backoff: Backoff,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            base_delay: Duration::from_secs(5),
            max_delay: Duration::from_secs(5),
            backoff: Backoff::Fixed,
        }
    }
}

impl RetryPolicy {
    pub fn new(max_attempts: u32, base_delay: Duration, max_delay: Duration) -> Self {
        Self {
            max_attempts: max_attempts.max(1),
            base_delay,
            max_delay: if max_delay.is_zero() {
                base_delay
            } else {
                max_delay
            },
            backoff: Backoff::Exponential,
        }
    }

    /// Same delay before every retry.
    pub fn fixed(max_attempts: u32, delay: Duration) -> Self {
        Self {
            max_attempts: max_attempts.max(1),
            base_delay: delay,
            max_delay: delay,
            backoff: Backoff::Fixed,
        }
    }

    pub fn from_settings(settings: &EngineSettings) -> Self {
        Self {
            max_attempts: settings.max_attempts.max(1),
            base_delay: settings.retry_delay,
            max_delay: settings.max_retry_delay.max(settings.retry_delay),
            backoff: settings.backoff,
        }
    }

    /// Executes the operation with the configured retry policy.
    pub async fn run<F, Fut, T, E, Classifier>(
        &self,
        mut op: F,
        classify: Classifier,
    ) -> Result<T, RetryError<E>>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, E>>,
        Classifier: Fn(&E) -> RetryDisposition,
    {
        let mut state = RetryState::Pending.begin();

        loop {
            match op().await {
                Ok(result) => return Ok(result),
                Err(err) => match state.fail(self, classify(&err)) {
                    next @ RetryState::Retrying { delay, .. } => {
                        sleep(delay).await;
                        state = next.begin();
                    }
                    RetryState::PermanentlyFailed {
                        exhausted: true, ..
                    } => return Err(RetryError::AttemptsExceeded(err)),
                    _ => return Err(RetryError::Fatal(err)),
                },
            }
        }
    }

    /// Delay after the `attempt`-th failed attempt (1-based).
    pub fn delay_for(&self, attempt: u32) -> Duration {
        if self.base_delay.is_zero() {
            return Duration::from_millis(0);
        }

        match self.backoff {
            Backoff::Fixed => self.base_delay,
            Backoff::Exponential => {
                let factor = 1u128 << attempt.saturating_sub(1).min(6);
                let base_ms = self.base_delay.as_millis();
                let delay_ms = base_ms.saturating_mul(factor);
                let capped = delay_ms.min(self.max_delay.as_millis());
                Duration::from_millis(capped as u64)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};

    fn policy(attempts: u32) -> RetryPolicy {
        RetryPolicy::fixed(attempts, Duration::from_millis(10))
    }

    #[test]
    fn walks_to_success() {
        let p = policy(3);
        let state = RetryState::Pending.begin();
        assert_eq!(state, RetryState::Attempting { attempt: 1 });

        let state = state.fail(&p, RetryDisposition::Retry);
        assert_eq!(
            state,
            RetryState::Retrying {
                attempt: 1,
                delay: Duration::from_millis(10)
            }
        );

        let state = state.begin().succeed();
        assert_eq!(state, RetryState::Succeeded { attempts: 2 });
        assert!(state.is_terminal());
    }

    #[test]
    fn stop_fails_without_retrying() {
        let state = RetryState::Pending
            .begin()
            .fail(&policy(3), RetryDisposition::Stop);
        assert_eq!(
            state,
            RetryState::PermanentlyFailed {
                attempts: 1,
                exhausted: false
            }
        );
    }

    #[test]
    fn exhausts_after_max_attempts() {
        let p = policy(2);
        let state = RetryState::Pending
            .begin()
            .fail(&p, RetryDisposition::Retry)
            .begin()
            .fail(&p, RetryDisposition::Retry);
        assert_eq!(
            state,
            RetryState::PermanentlyFailed {
                attempts: 2,
                exhausted: true
            }
        );
    }

    #[test]
    fn exponential_delay_is_capped() {
        let p = RetryPolicy::new(5, Duration::from_millis(100), Duration::from_millis(300));
        assert_eq!(p.delay_for(1), Duration::from_millis(100));
        assert_eq!(p.delay_for(2), Duration::from_millis(200));
        assert_eq!(p.delay_for(3), Duration::from_millis(300));
    }

    #[test]
    fn settings_cap_never_undercuts_retry_delay() {
        let settings = EngineSettings::default()
            .with_retry_delay(Duration::from_secs(5))
            .with_backoff(Backoff::Exponential, Duration::ZERO);
        let p = RetryPolicy::from_settings(&settings);
        assert_eq!(p.delay_for(1), Duration::from_secs(5));
        assert_eq!(p.delay_for(2), Duration::from_secs(5));

        let settings = settings.with_backoff(Backoff::Exponential, Duration::from_secs(1));
        let p = RetryPolicy::from_settings(&settings);
        assert_eq!(p.delay_for(1), Duration::from_secs(5));

        let settings = settings.with_backoff(Backoff::Exponential, Duration::from_secs(12));
        let p = RetryPolicy::from_settings(&settings);
        assert_eq!(p.delay_for(1), Duration::from_secs(5));
        assert_eq!(p.delay_for(2), Duration::from_secs(10));
        assert_eq!(p.delay_for(3), Duration::from_secs(12));
    }

    #[tokio::test(start_paused = true)]
    async fn run_retries_transient_errors() {
        let calls = AtomicU32::new(0);
        let result = policy(3)
            .run(
                || async {
                    if calls.fetch_add(1, Ordering::SeqCst) < 2 {
                        Err("flaky")
                    } else {
                        Ok(7)
                    }
                },
                |_| RetryDisposition::Retry,
            )
            .await;

        assert_eq!(result.unwrap(), 7);
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn run_reports_exhaustion() {
        let calls = AtomicU32::new(0);
        let result: Result<(), _> = policy(3)
            .run(
                || async {
                    calls.fetch_add(1, Ordering::SeqCst);
                    Err("down")
                },
                |_| RetryDisposition::Retry,
            )
            .await;

        assert!(matches!(result, Err(RetryError::AttemptsExceeded("down"))));
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn run_stops_on_fatal() {
        let result: Result<(), _> = policy(3)
            .run(|| async { Err("bad request") }, |_| RetryDisposition::Stop)
            .await;
        assert!(matches!(result, Err(RetryError::Fatal("bad request"))));
    }
}
