//! Bounded retry with a fixed delay between attempts.

use std::future::Future;
use std::time::Duration;

/// Store writes: 3 attempts in total, 20 s apart.
pub const STORE_MAX_ATTEMPTS: u32 = 3;
pub const STORE_RETRY_DELAY: Duration = Duration::from_secs(20);

#[derive(Debug, Clone, PartialEq)]
pub struct RetryPolicy {
    /// Total attempts including the first one. 0 is treated as 1.
    pub max_attempts: u32,
    /// Pause before every retry.
    pub delay: Duration,
}

/// The last error of a failed [`RetryPolicy::run`] and how many attempts
/// were made.
#[derive(Debug, Clone, PartialEq)]
pub struct Exhausted<E> {
    pub error: E,
    pub attempts: u32,
}

impl RetryPolicy {
    pub fn fixed(max_attempts: u32, delay: Duration) -> Self {
        Self { max_attempts, delay }
    }

    pub fn store() -> Self {
        Self::fixed(STORE_MAX_ATTEMPTS, STORE_RETRY_DELAY)
    }

    pub fn attempts(&self) -> u32 {
        self.max_attempts.max(1)
    }

    /// Delay before attempt `n` (0-indexed). Attempt 0 is never delayed.
    pub fn delay_for_attempt(&self, attempt: u32) -> Duration {
        if attempt == 0 { Duration::ZERO } else { self.delay }
    }

    /// Run `op` until it succeeds, fails with a non-retryable error, or the
    /// attempt ceiling is reached.
    pub async fn run<T, E, F, Fut>(
        &self,
        op: F,
        retryable: impl Fn(&E) -> bool,
    ) -> Result<T, Exhausted<E>>
    where
        E: std::fmt::Display,
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, E>>,
    {
        self.run_with(op, retryable, |_, _| {}).await
    }

    /// [`run`](Self::run) with a hook called for every failure that is
    /// about to be retried, with the attempt number that failed.
    pub async fn run_with<T, E, F, Fut>(
        &self,
        mut op: F,
        retryable: impl Fn(&E) -> bool,
        mut on_retry: impl FnMut(&E, u32),
    ) -> Result<T, Exhausted<E>>
    where
        E: std::fmt::Display,
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, E>>,
    {
        let max = self.attempts();
        let mut attempt = 0;
        loop {
            let delay = self.delay_for_attempt(attempt);
            if !delay.is_zero() {
                tokio::time::sleep(delay).await;
            }
            attempt += 1;

            match op().await {
                Ok(v) => {
                    if attempt > 1 {
                        tracing::info!(attempt, "recovered after retry");
                    }
                    return Ok(v);
                }
                Err(e) if attempt < max && retryable(&e) => {
                    tracing::warn!(
                        attempt,
                        max_attempts = max,
                        delay_ms = self.delay_for_attempt(attempt).as_millis() as u64,
                        error = %e,
                        "transient failure, retrying",
                    );
                    on_retry(&e, attempt);
                }
                Err(e) => return Err(Exhausted { error: e, attempts: attempt }),
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};

    #[test]
    fn fixed_delay() {
        let p = RetryPolicy::store();
        assert_eq!(p.delay_for_attempt(0), Duration::ZERO);
        assert_eq!(p.delay_for_attempt(1), Duration::from_secs(20));
        assert_eq!(p.delay_for_attempt(2), Duration::from_secs(20));
    }

    #[tokio::test(start_paused = true)]
    async fn stops_at_ceiling() {
        let calls = &AtomicU32::new(0);
        let retried = AtomicU32::new(0);
        let started = tokio::time::Instant::now();

        let res: Result<(), _> = RetryPolicy::store()
            .run_with(
                move || async move {
                    calls.fetch_add(1, Ordering::SeqCst);
                    Err::<(), _>("timeout")
                },
                |_| true,
                |_, _| {
                    retried.fetch_add(1, Ordering::SeqCst);
                },
            )
            .await;

        let err = res.unwrap_err();
        assert_eq!(err.attempts, 3);
        assert_eq!(calls.load(Ordering::SeqCst), 3);
        assert_eq!(retried.load(Ordering::SeqCst), 2);
        let elapsed = started.elapsed();
        assert!(elapsed >= Duration::from_secs(40) && elapsed < Duration::from_secs(41));
    }

    #[tokio::test(start_paused = true)]
    async fn non_retryable_fails_once() {
        let calls = &AtomicU32::new(0);
        let err = RetryPolicy::store()
            .run(
                move || async move {
                    calls.fetch_add(1, Ordering::SeqCst);
                    Err::<(), _>("constraint violation")
                },
                |_| false,
            )
            .await
            .unwrap_err();
        assert_eq!(err.attempts, 1);
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn recovers_after_transient_failure() {
        let calls = &AtomicU32::new(0);
        let v = RetryPolicy::fixed(3, Duration::from_millis(10))
            .run(
                move || async move {
                    if calls.fetch_add(1, Ordering::SeqCst) == 0 {
                        Err("reset")
                    } else {
                        Ok(7)
                    }
                },
                |_| true,
            )
            .await
            .unwrap();
        assert_eq!(v, 7);
        assert_eq!(calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn zero_attempts_means_one() {
        let p = RetryPolicy::fixed(0, Duration::ZERO);
        let err = p.run(|| async { Err::<(), _>("x") }, |_| true).await.unwrap_err();
        assert_eq!(err.attempts, 1);
    }
}
