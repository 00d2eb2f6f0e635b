use governor::{clock::DefaultClock, state::InMemoryState, Quota, RateLimiter};
use std::num::NonZeroU32;
use tracing::info;

use crate::error::{BenchError, Result};

type DirectRateLimiter = RateLimiter<governor::state::direct::NotKeyed, InMemoryState, DefaultClock>;

/// Aggregate request pacing shared by every worker
#[derive(Debug)]
pub struct RequestLimiter {
    inner: Option<DirectRateLimiter>,
}

impl RequestLimiter {
    /// No cap, `acquire` never waits
    pub fn unlimited() -> Self {
        Self { inner: None }
    }

    /// Token bucket refilled at `requests_per_second`, holding up to `burst` tokens
    pub fn per_second(requests_per_second: u32, burst: u32) -> Result<Self> {
        let rate = NonZeroU32::new(requests_per_second)
            .ok_or_else(|| BenchError::Config("rate limit must be greater than 0".to_string()))?;
        let burst = NonZeroU32::new(burst)
            .ok_or_else(|| BenchError::Config("rate limit burst must be greater than 0".to_string()))?;

        info!(
            requests_per_second = rate.get(),
            burst = burst.get(),
            "Aggregate rate limit enabled"
        );

        Ok(Self {
            inner: Some(RateLimiter::direct(Quota::per_second(rate).allow_burst(burst))),
        })
    }

    /// Limiter for an optional cap, with one token of burst per worker
    pub fn from_cap(cap: Option<u32>, workers: u64) -> Result<Self> {
        match cap {
            None => Ok(Self::unlimited()),
            Some(rps) => {
                let burst = workers.clamp(1, u32::MAX as u64) as u32;
                Self::per_second(rps, burst)
            }
        }
    }

    pub fn is_limited(&self) -> bool {
        self.inner.is_some()
    }

    /// Wait until one request may be issued
    pub async fn acquire(&self) {
        if let Some(limiter) = &self.inner {
            limiter.until_ready().await;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::time::{Duration, Instant};

    #[tokio::test]
    async fn test_unlimited_never_waits() {
        let limiter = RequestLimiter::unlimited();
        assert!(!limiter.is_limited());

        let start = Instant::now();
        for _ in 0..10_000 {
            limiter.acquire().await;
        }
        assert!(start.elapsed() < Duration::from_secs(1));
    }

    #[test]
    fn test_zero_rate_is_rejected() {
        assert!(RequestLimiter::per_second(0, 1).unwrap_err().is_config());
        assert!(RequestLimiter::per_second(10, 0).unwrap_err().is_config());
        assert!(RequestLimiter::from_cap(None, 4).is_ok());
        assert!(RequestLimiter::from_cap(Some(100), 0).unwrap().is_limited());
    }

    #[tokio::test]
    async fn test_acquire_pends_once_burst_is_spent() {
        let limiter = RequestLimiter::per_second(1, 2).unwrap();
        limiter.acquire().await;
        limiter.acquire().await;

        let mut next = tokio_test::task::spawn(limiter.acquire());
        tokio_test::assert_pending!(next.poll());
    }

    #[tokio::test]
    async fn test_aggregate_rate_is_bounded_across_workers() {
        // 50 rps with a burst of 5: 30 tokens need at least ~0.5s after the burst
        let limiter = Arc::new(RequestLimiter::per_second(50, 5).unwrap());
        let start = Instant::now();

        let mut handles = Vec::new();
        for _ in 0..3 {
            let limiter = Arc::clone(&limiter);
            handles.push(tokio::spawn(async move {
                for _ in 0..10 {
                    limiter.acquire().await;
                }
            }));
        }
        for handle in handles {
            handle.await.unwrap();
        }

        let elapsed = start.elapsed();
        assert!(
            elapsed >= Duration::from_millis(450),
            "30 acquisitions at 50 rps finished in {:?}",
            elapsed
        );
    }
}
