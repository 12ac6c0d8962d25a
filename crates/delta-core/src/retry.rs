use rand::Rng;
use std::future::Future;
use std::time::Duration;
use tokio::time::sleep;
use tokio_util::sync::CancellationToken;

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
    /// The supplied cancellation token fired before the operation settled.
    Cancelled,
}

#[derive(Debug, Clone)]
pub struct RetryPolicy {
    pub max_attempts: usize,
    pub base_delay: Duration,
    pub max_delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 5,
            base_delay: Duration::from_millis(250),
            max_delay: Duration::from_secs(30),
        }
    }
}

impl RetryPolicy {
    pub fn new(max_attempts: usize, base_delay: Duration, max_delay: Duration) -> Self {
        Self {
            max_attempts: max_attempts.max(1),
            base_delay,
            max_delay: if max_delay.is_zero() { base_delay } else { max_delay },
        }
    }

    /// Runs `op` until it succeeds, `classify` reports `Stop`, attempts are
    /// exhausted, or `cancel` fires. Delay between attempts is exponential
    /// backoff with up to +/-10% jitter, so a thundering herd of tables
    /// retrying a warehouse outage doesn't resynchronize on every attempt.
    pub async fn run<F, Fut, T, E, Classifier>(
        &self,
        cancel: &CancellationToken,
        mut op: F,
        classify: Classifier,
    ) -> Result<T, RetryError<E>>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, E>>,
        Classifier: Fn(&E) -> RetryDisposition,
    {
        let mut attempt = 0;

        loop {
            if cancel.is_cancelled() {
                return Err(RetryError::Cancelled);
            }

            let outcome = tokio::select! {
                biased;
                _ = cancel.cancelled() => return Err(RetryError::Cancelled),
                outcome = op() => outcome,
            };

            match outcome {
                Ok(result) => return Ok(result),
                Err(err) => match classify(&err) {
                    RetryDisposition::Stop => return Err(RetryError::Fatal(err)),
                    RetryDisposition::Retry => {
                        if attempt + 1 >= self.max_attempts {
                            return Err(RetryError::AttemptsExceeded(err));
                        }

                        let delay = self.jittered_backoff_delay(attempt);
                        tokio::select! {
                            biased;
                            _ = cancel.cancelled() => return Err(RetryError::Cancelled),
                            _ = sleep(delay) => {}
                        }
                        attempt += 1;
                    }
                },
            }
        }
    }

    fn backoff_delay(&self, attempt: usize) -> Duration {
        if self.base_delay.is_zero() {
            return Duration::from_millis(0);
        }
        let factor = 1u128 << attempt.min(10);
        let base_ms = self.base_delay.as_millis();
        let delay_ms = base_ms.saturating_mul(factor);
        let capped = delay_ms.min(self.max_delay.as_millis());
        Duration::from_millis(capped as u64)
    }

    fn jittered_backoff_delay(&self, attempt: usize) -> Duration {
        let base = self.backoff_delay(attempt);
        if base.is_zero() {
            return base;
        }
        let jitter_frac = rand::thread_rng().gen_range(-0.1..=0.1);
        let jittered_ms = (base.as_millis() as f64) * (1.0 + jitter_frac);
        Duration::from_millis(jittered_ms.max(0.0) as u64)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::{
        atomic::{AtomicUsize, Ordering},
        Arc,
    };

    #[derive(Debug, Clone)]
    struct TestError(&'static str);

    #[tokio::test]
    async fn retries_transient_failure_and_succeeds() {
        let policy = RetryPolicy::new(5, Duration::from_millis(0), Duration::from_millis(0));
        let attempts = Arc::new(AtomicUsize::new(0));
        let op_attempts = attempts.clone();
        let cancel = CancellationToken::new();

        let result = policy
            .run(
                &cancel,
                move || {
                    let op_attempts = op_attempts.clone();
                    async move {
                        let attempt = op_attempts.fetch_add(1, Ordering::SeqCst);
                        if attempt < 2 {
                            Err(TestError("transient"))
                        } else {
                            Ok::<&'static str, TestError>("done")
                        }
                    }
                },
                |err: &TestError| match err.0 {
                    "transient" => RetryDisposition::Retry,
                    _ => RetryDisposition::Stop,
                },
            )
            .await;

        assert!(result.is_ok());
        assert_eq!(attempts.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn fatal_error_stops_immediately() {
        let policy = RetryPolicy::new(5, Duration::from_millis(0), Duration::from_millis(0));
        let attempts = Arc::new(AtomicUsize::new(0));
        let op_attempts = attempts.clone();
        let cancel = CancellationToken::new();

        let result: Result<(), RetryError<TestError>> = policy
            .run(
                &cancel,
                move || {
                    let op_attempts = op_attempts.clone();
                    async move {
                        op_attempts.fetch_add(1, Ordering::SeqCst);
                        Err(TestError("fatal"))
                    }
                },
                |_err: &TestError| RetryDisposition::Stop,
            )
            .await;

        assert!(matches!(result, Err(RetryError::Fatal(_))));
        assert_eq!(attempts.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn cancellation_aborts_before_next_attempt() {
        let policy = RetryPolicy::new(10, Duration::from_secs(10), Duration::from_secs(10));
        let cancel = CancellationToken::new();
        cancel.cancel();

        let result: Result<(), RetryError<TestError>> = policy
            .run(&cancel, || async { Err(TestError("transient")) }, |_| RetryDisposition::Retry)
            .await;

        assert!(matches!(result, Err(RetryError::Cancelled)));
    }
}
