//! Bounded exponential backoff shared by reconnect and resend logic.

use std::future::Future;
use std::time::Duration;

use tokio_util::sync::CancellationToken;
use tracing::warn;

use crate::error::{TransportError, TransportResult};

/// Retry policy with exponential backoff.
#[derive(Debug, Clone, PartialEq)]
pub struct RetryPolicy {
    /// Maximum number of retries after the first attempt (None = infinite).
    pub max_retries: Option<u32>,
    /// Delay before the first retry.
    pub initial_delay: Duration,
    /// Upper bound for any single delay.
    pub max_delay: Duration,
    /// Backoff multiplier.
    pub backoff_multiplier: f64,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_retries: Some(3),
            initial_delay: Duration::from_secs(1),
            max_delay: Duration::from_secs(30),
            backoff_multiplier: 2.0,
        }
    }
}

impl RetryPolicy {
    /// A policy that never retries.
    pub fn none() -> Self {
        Self {
            max_retries: Some(0),
            ..Default::default()
        }
    }

    /// Sets the maximum retry count.
    pub fn with_max_retries(mut self, max: Option<u32>) -> Self {
        self.max_retries = max;
        self
    }

    /// Delay before retry number `retry` (0-based).
    pub fn delay_for(&self, retry: u32) -> Duration {
        let factor = self.backoff_multiplier.powi(retry.min(i32::MAX as u32) as i32);
        let secs = self.initial_delay.as_secs_f64() * factor;
        if !secs.is_finite() || secs >= self.max_delay.as_secs_f64() {
            self.max_delay
        } else {
            Duration::from_secs_f64(secs)
        }
    }

    /// Starts a fresh backoff sequence.
    pub fn backoff(&self) -> Backoff {
        Backoff {
            policy: self.clone(),
            retries: 0,
        }
    }
}

/// Stateful view of a [`RetryPolicy`].
#[derive(Debug, Clone)]
pub struct Backoff {
    policy: RetryPolicy,
    retries: u32,
}

impl Backoff {
    /// Returns the next delay, or `None` once the retry budget is spent.
    pub fn next_delay(&mut self) -> Option<Duration> {
        if let Some(max) = self.policy.max_retries
            && self.retries >= max
        {
            return None;
        }
        let delay = self.policy.delay_for(self.retries);
        self.retries += 1;
        Some(delay)
    }

    /// Number of retries handed out so far.
    pub fn retries(&self) -> u32 {
        self.retries
    }

    /// Resets after a success.
    pub fn reset(&mut self) {
        self.retries = 0;
    }
}

/// Runs `op` until it succeeds, fails permanently, or the policy gives up.
///
/// Only [`TransportError::is_transient`] failures are retried. The wait
/// between attempts is aborted by `shutdown`.
pub async fn retry<T, F, Fut>(
    policy: &RetryPolicy,
    shutdown: &CancellationToken,
    op: F,
) -> TransportResult<T>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = TransportResult<T>>,
{
    retry_if(policy, shutdown, TransportError::is_transient, op).await
}

/// Like [`retry`], but only failures accepted by `should_retry` are retried.
///
/// Use this for operations that are not idempotent, where a failure that
/// may have reached the server must not be repeated.
pub async fn retry_if<T, F, Fut, P>(
    policy: &RetryPolicy,
    shutdown: &CancellationToken,
    should_retry: P,
    mut op: F,
) -> TransportResult<T>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = TransportResult<T>>,
    P: Fn(&TransportError) -> bool,
{
    let mut backoff = policy.backoff();
    loop {
        let result = tokio::select! {
            _ = shutdown.cancelled() => return Err(TransportError::Cancelled),
            result = op() => result,
        };

        let err = match result {
            Ok(value) => return Ok(value),
            Err(err) if should_retry(&err) => err,
            Err(err) => return Err(err),
        };

        let Some(delay) = backoff.next_delay() else {
            return Err(err);
        };
        warn!(error = %err, delay = ?delay, attempt = backoff.retries(), "Retrying after transient failure");

        tokio::select! {
            _ = shutdown.cancelled() => return Err(TransportError::Cancelled),
            _ = tokio::time::sleep(delay) => {}
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicU32, Ordering};

    use super::*;

    #[test]
    fn test_delays_grow_and_cap() {
        let policy = RetryPolicy {
            max_retries: None,
            initial_delay: Duration::from_millis(100),
            max_delay: Duration::from_millis(500),
            backoff_multiplier: 2.0,
        };
        assert_eq!(policy.delay_for(0), Duration::from_millis(100));
        assert_eq!(policy.delay_for(1), Duration::from_millis(200));
        assert_eq!(policy.delay_for(2), Duration::from_millis(400));
        assert_eq!(policy.delay_for(3), Duration::from_millis(500));
        assert_eq!(policy.delay_for(200), Duration::from_millis(500));
    }

    #[test]
    fn test_backoff_budget() {
        let mut backoff = RetryPolicy::default().with_max_retries(Some(2)).backoff();
        assert!(backoff.next_delay().is_some());
        assert!(backoff.next_delay().is_some());
        assert!(backoff.next_delay().is_none());

        backoff.reset();
        assert_eq!(backoff.next_delay(), Some(Duration::from_secs(1)));
    }

    #[tokio::test(start_paused = true)]
    async fn test_retry_recovers_from_transient() {
        let attempts = AtomicU32::new(0);
        let token = CancellationToken::new();
        let result = retry(&RetryPolicy::default(), &token, || async {
            if attempts.fetch_add(1, Ordering::SeqCst) < 2 {
                Err(TransportError::Timeout)
            } else {
                Ok("sent")
            }
        })
        .await;

        assert_eq!(result.unwrap(), "sent");
        assert_eq!(attempts.load(Ordering::SeqCst), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn test_retry_stops_on_permanent() {
        let attempts = AtomicU32::new(0);
        let token = CancellationToken::new();
        let result: TransportResult<()> = retry(&RetryPolicy::default(), &token, || async {
            attempts.fetch_add(1, Ordering::SeqCst);
            Err(TransportError::Http {
                status: 400,
                body: "bad request".into(),
            })
        })
        .await;

        assert!(matches!(result, Err(TransportError::Http { status: 400, .. })));
        assert_eq!(attempts.load(Ordering::SeqCst), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_retry_if_uses_predicate() {
        let attempts = AtomicU32::new(0);
        let token = CancellationToken::new();
        let result: TransportResult<()> = retry_if(
            &RetryPolicy::default(),
            &token,
            |e| e.status() == Some(429),
            || async {
                attempts.fetch_add(1, Ordering::SeqCst);
                Err(TransportError::Timeout)
            },
        )
        .await;

        assert!(matches!(result, Err(TransportError::Timeout)));
        assert_eq!(attempts.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_retry_honours_cancellation() {
        let token = CancellationToken::new();
        token.cancel();
        let result: TransportResult<()> =
            retry(&RetryPolicy::default(), &token, || std::future::pending()).await;
        assert!(matches!(result, Err(TransportError::Cancelled)));
    }
}
