//! Per-domain rate limiter for polite crawling.

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{AcquireError, OwnedSemaphorePermit, Semaphore};
use tokio::time::Instant;

/// Concurrency gate plus minimum spacing between dispatches for one host.
pub struct RateLimiter {
    semaphore: Arc<Semaphore>,
    min_delay: Duration,
    last_request: tokio::sync::Mutex<Option<Instant>>,
}

impl RateLimiter {
    /// Create a new rate limiter.
    ///
    /// - `max_concurrent`: maximum number of in-flight requests
    /// - `min_delay_ms`: minimum milliseconds between consecutive dispatches
    pub fn new(max_concurrent: usize, min_delay_ms: u64) -> Self {
        Self {
            semaphore: Arc::new(Semaphore::new(max_concurrent.max(1))),
            min_delay: Duration::from_millis(min_delay_ms),
            last_request: tokio::sync::Mutex::new(None),
        }
    }

    /// Take one of the host's concurrency slots. Does not touch the delay clock.
    pub async fn acquire_slot(&self) -> Result<OwnedSemaphorePermit, AcquireError> {
        self.semaphore.clone().acquire_owned().await
    }

    /// Wait until `min_delay` has passed since the previous dispatch, then
    /// wait for `ready` and record the moment it resolves as the latest
    /// dispatch.
    ///
    /// The host lock is held throughout, so callers for the same host queue
    /// up in order, while `ready` (typically a global permit) is only awaited
    /// once the host's spacing has elapsed.
    pub async fn turn_with<T, E>(
        &self,
        ready: impl Future<Output = Result<T, E>>,
    ) -> Result<(T, Instant), E> {
        let mut last = self.last_request.lock().await;
        if let Some(prev) = *last {
            let elapsed = prev.elapsed();
            if elapsed < self.min_delay {
                tokio::time::sleep(self.min_delay - elapsed).await;
            }
        }
        let value = ready.await?;
        let now = Instant::now();
        *last = Some(now);
        Ok((value, now))
    }

    /// Acquire permission to make a request. Blocks until the rate limit allows.
    pub async fn acquire(&self) -> Result<RateLimitGuard, AcquireError> {
        let permit = self.acquire_slot().await?;
        let ((), dispatched_at) = self
            .turn_with(async { Ok::<_, AcquireError>(()) })
            .await?;
        Ok(RateLimitGuard {
            _permit: permit,
            dispatched_at,
        })
    }
}

/// Guard that releases the rate limiter permit when dropped.
pub struct RateLimitGuard {
    _permit: OwnedSemaphorePermit,
    dispatched_at: Instant,
}

impl RateLimitGuard {
    pub fn dispatched_at(&self) -> Instant {
        self.dispatched_at
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_rate_limiter_basic() {
        let limiter = RateLimiter::new(2, 0);
        let _g1 = limiter.acquire().await.unwrap();
        let _g2 = limiter.acquire().await.unwrap();
        assert_eq!(limiter.semaphore.available_permits(), 0);
    }

    #[tokio::test]
    async fn test_first_dispatch_is_immediate() {
        let limiter = RateLimiter::new(1, 60_000);
        let start = Instant::now();
        let _g = limiter.acquire().await.unwrap();
        assert!(start.elapsed() < Duration::from_secs(1));
    }

    #[tokio::test(start_paused = true)]
    async fn test_delay_between_dispatches() {
        let limiter = RateLimiter::new(4, 500);
        let first = limiter.acquire().await.unwrap();
        let second = limiter.acquire().await.unwrap();
        assert!(second.dispatched_at() - first.dispatched_at() >= Duration::from_millis(500));
    }

    #[tokio::test]
    async fn test_slot_released_on_drop() {
        let limiter = RateLimiter::new(1, 0);
        {
            let _g = limiter.acquire().await.unwrap();
            assert_eq!(limiter.semaphore.available_permits(), 0);
        }
        assert_eq!(limiter.semaphore.available_permits(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_ready_awaited_after_spacing() {
        let limiter = RateLimiter::new(4, 1000);
        let _first = limiter.acquire().await.unwrap();
        let start = Instant::now();
        let (ready_at, stamped) = limiter
            .turn_with(async { Ok::<_, AcquireError>(Instant::now()) })
            .await
            .unwrap();
        assert!(ready_at - start >= Duration::from_millis(1000));
        assert_eq!(ready_at, stamped);
    }
}
