//! Retry with exponential backoff and bounded, paced concurrency.
//!
//! Every remote call made by the engine goes through [`retry`]; fan-out over
//! lists of remote calls goes through [`parallel`].

use std::future::Future;
use std::time::Duration;

use futures::stream::{FuturesUnordered, StreamExt};
use notion_sync_core::{SyncError, SyncOptions};
use tokio::time::{sleep, sleep_until, Instant};
use tracing::{debug, warn};

/// How often and how patiently a remote call is retried.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Total attempts, first try included.
    pub max_attempts: u32,
    pub initial_delay: Duration,
}

impl RetryPolicy {
    pub fn new(max_attempts: u32, initial_delay: Duration) -> Self {
        Self {
            max_attempts,
            initial_delay,
        }
    }

    pub fn from_options(options: &SyncOptions) -> Self {
        Self::new(options.max_retry_attempts, options.retry_initial_delay)
    }

    /// Backoff after the failed attempt number `attempt` (1-based):
    /// `initial_delay * 2^(attempt-1)`.
    pub fn delay_after(&self, attempt: u32) -> Duration {
        let factor = 2u32.saturating_pow(attempt.saturating_sub(1));
        self.initial_delay.saturating_mul(factor)
    }
}

/// Run `operation`, retrying transient failures with exponential backoff.
pub async fn retry<T, F, Fut>(
    label: &str,
    policy: RetryPolicy,
    operation: F,
) -> Result<T, SyncError>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, SyncError>>,
{
    retry_if(label, policy, SyncError::is_transient, operation).await
}

/// Like [`retry`], with an explicit classification of retryable failures.
pub async fn retry_if<T, F, Fut, P>(
    label: &str,
    policy: RetryPolicy,
    is_retryable: P,
    mut operation: F,
) -> Result<T, SyncError>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, SyncError>>,
    P: Fn(&SyncError) -> bool,
{
    let max_attempts = policy.max_attempts.max(1);
    let mut attempt = 1;

    loop {
        match operation().await {
            Ok(value) => {
                if attempt > 1 {
                    debug!(operation = label, attempt, "Remote call succeeded after retry");
                }
                return Ok(value);
            }
            Err(err) if attempt < max_attempts && is_retryable(&err) => {
                let delay = policy.delay_after(attempt);
                warn!(
                    operation = label,
                    attempt,
                    delay_ms = delay.as_millis() as u64,
                    error = %err,
                    "Transient remote failure, retrying"
                );
                sleep(delay).await;
                attempt += 1;
            }
            Err(err) => return Err(err),
        }
    }
}

/// Spaces dispatches at least `delay` apart while other work is in flight.
#[derive(Debug)]
pub struct Pacer {
    delay: Duration,
    next_slot: Option<Instant>,
}

impl Pacer {
    pub fn new(delay: Duration) -> Self {
        Self {
            delay,
            next_slot: None,
        }
    }

    /// Start instant for the next dispatch. An idle pipeline starts at once.
    pub fn next_slot(&mut self, busy: bool) -> Instant {
        let now = Instant::now();
        let start = match self.next_slot {
            Some(slot) if busy => slot.max(now),
            _ => now,
        };
        self.next_slot = Some(start + self.delay);
        start
    }
}

/// Run `worker` over `items` with at most `limit` in flight, results in input
/// order.
///
/// On the first failure no further items are dispatched; tasks already in
/// flight are allowed to settle before the error is returned.
pub async fn parallel<T, R, F, Fut>(
    items: Vec<T>,
    limit: usize,
    pacing: Duration,
    mut worker: F,
) -> Result<Vec<R>, SyncError>
where
    F: FnMut(T) -> Fut,
    Fut: Future<Output = Result<R, SyncError>>,
{
    let limit = limit.max(1);
    let mut results: Vec<Option<R>> = items.iter().map(|_| None).collect();
    let mut queue = items.into_iter().enumerate();
    let mut in_flight = FuturesUnordered::new();
    let mut pacer = Pacer::new(pacing);
    let mut failure: Option<SyncError> = None;

    loop {
        while failure.is_none() && in_flight.len() < limit {
            let Some((index, item)) = queue.next() else {
                break;
            };
            let start = pacer.next_slot(!in_flight.is_empty());
            let task = worker(item);
            in_flight.push(async move {
                sleep_until(start).await;
                (index, task.await)
            });
        }

        match in_flight.next().await {
            Some((index, Ok(value))) => results[index] = Some(value),
            Some((index, Err(err))) => {
                if failure.is_none() {
                    failure = Some(err);
                } else {
                    debug!(index, error = %err, "Additional failure while draining");
                }
            }
            None => break,
        }
    }

    match failure {
        Some(err) => Err(err),
        None => Ok(results.into_iter().flatten().collect()),
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::{Arc, Mutex};

    use super::*;

    fn policy(attempts: u32) -> RetryPolicy {
        RetryPolicy::new(attempts, Duration::from_millis(100))
    }

    #[test]
    fn test_backoff_schedule() {
        let p = policy(5);
        assert_eq!(p.delay_after(1), Duration::from_millis(100));
        assert_eq!(p.delay_after(2), Duration::from_millis(200));
        assert_eq!(p.delay_after(3), Duration::from_millis(400));
        assert_eq!(p.delay_after(4), Duration::from_millis(800));
    }

    #[tokio::test(start_paused = true)]
    async fn test_retry_ceiling_and_delays() {
        let attempts = Arc::new(Mutex::new(Vec::new()));
        let started = Instant::now();

        let result: Result<(), SyncError> = retry("always_overloaded", policy(4), || {
            let attempts = attempts.clone();
            async move {
                attempts.lock().unwrap().push(started.elapsed());
                Err(SyncError::Transient("429".to_string()))
            }
        })
        .await;

        assert!(result.unwrap_err().is_transient());
        let attempts = attempts.lock().unwrap();
        assert_eq!(
            *attempts,
            vec![
                Duration::from_millis(0),
                Duration::from_millis(100),
                Duration::from_millis(300),
                Duration::from_millis(700),
            ]
        );
    }

    #[tokio::test(start_paused = true)]
    async fn test_non_transient_fails_immediately() {
        let calls = AtomicUsize::new(0);
        let result: Result<(), SyncError> = retry("malformed", policy(5), || {
            calls.fetch_add(1, Ordering::SeqCst);
            async { Err(SyncError::Malformed("no title".to_string())) }
        })
        .await;

        assert!(result.unwrap_err().is_malformed());
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_retry_recovers() {
        let calls = AtomicUsize::new(0);
        let value = retry("flaky", policy(3), || {
            let n = calls.fetch_add(1, Ordering::SeqCst);
            async move {
                if n < 2 {
                    Err(SyncError::Transient("503".to_string()))
                } else {
                    Ok(n)
                }
            }
        })
        .await
        .unwrap();
        assert_eq!(value, 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_parallel_keeps_order_and_limit() {
        let in_flight = Arc::new(AtomicUsize::new(0));
        let peak = Arc::new(AtomicUsize::new(0));

        let items: Vec<u64> = (0..10).collect();
        let results = parallel(items, 3, Duration::ZERO, |n| {
            let in_flight = in_flight.clone();
            let peak = peak.clone();
            async move {
                let now = in_flight.fetch_add(1, Ordering::SeqCst) + 1;
                peak.fetch_max(now, Ordering::SeqCst);
                // Later items finish first.
                sleep(Duration::from_millis(100 - n * 10)).await;
                in_flight.fetch_sub(1, Ordering::SeqCst);
                Ok(n * 2)
            }
        })
        .await
        .unwrap();

        assert_eq!(results, (0..10).map(|n| n * 2).collect::<Vec<_>>());
        assert_eq!(peak.load(Ordering::SeqCst), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn test_parallel_paces_dispatches() {
        let starts = Arc::new(Mutex::new(Vec::new()));
        let origin = Instant::now();

        parallel(vec![(); 3], 3, Duration::from_millis(50), |_| {
            let starts = starts.clone();
            async move {
                starts.lock().unwrap().push(origin.elapsed());
                sleep(Duration::from_millis(500)).await;
                Ok(())
            }
        })
        .await
        .unwrap();

        assert_eq!(
            *starts.lock().unwrap(),
            vec![
                Duration::from_millis(0),
                Duration::from_millis(50),
                Duration::from_millis(100),
            ]
        );
    }

    #[tokio::test(start_paused = true)]
    async fn test_parallel_drains_in_flight_before_failing() {
        let finished = Arc::new(AtomicUsize::new(0));
        let dispatched = Arc::new(AtomicUsize::new(0));

        let result = parallel((0..6).collect::<Vec<u64>>(), 3, Duration::ZERO, |n| {
            let finished = finished.clone();
            let dispatched = dispatched.clone();
            async move {
                dispatched.fetch_add(1, Ordering::SeqCst);
                if n == 0 {
                    return Err(SyncError::Remote("boom".to_string()));
                }
                sleep(Duration::from_millis(100)).await;
                finished.fetch_add(1, Ordering::SeqCst);
                Ok(n)
            }
        })
        .await;

        assert!(result.is_err());
        // Items 1 and 2 were in flight and settled; nothing after was started.
        assert_eq!(dispatched.load(Ordering::SeqCst), 3);
        assert_eq!(finished.load(Ordering::SeqCst), 2);
    }
}
