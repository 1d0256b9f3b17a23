//! Client-side throttle for hosting API calls.
//!
//! One limiter is shared by every worker so the whole run stays under the
//! configured request rate, no matter how many tasks are in flight. Only the
//! repository provisioning calls go through it; git traffic is not an API
//! call and is not throttled here.

use std::num::NonZeroU32;
use std::sync::atomic::{AtomicU64, Ordering};

use governor::clock::DefaultClock;
use governor::state::{InMemoryState, NotKeyed};
use governor::{Quota, RateLimiter};
use tracing::{debug, trace};

type DirectLimiter = RateLimiter<NotKeyed, InMemoryState, DefaultClock>;

/// Token bucket shared across workers.
pub struct ApiRateLimiter {
    inner: DirectLimiter,
    requests_per_minute: NonZeroU32,
    burst: NonZeroU32,
    granted: AtomicU64,
}

impl ApiRateLimiter {
    /// Allow `requests_per_minute` sustained with bursts of up to `burst`.
    ///
    /// Zero values are clamped to one; config validation rejects them earlier.
    pub fn new(requests_per_minute: u32, burst: u32) -> Self {
        let rpm = NonZeroU32::new(requests_per_minute).unwrap_or(NonZeroU32::MIN);
        let burst = NonZeroU32::new(burst).unwrap_or(NonZeroU32::MIN);
        let quota = Quota::per_minute(rpm).allow_burst(burst);
        debug!(requests_per_minute = rpm.get(), burst = burst.get(), "API rate limiter ready");
        Self {
            inner: RateLimiter::direct(quota),
            requests_per_minute: rpm,
            burst,
            granted: AtomicU64::new(0),
        }
    }

    /// Wait until a request may be sent.
    pub async fn acquire(&self) {
        if self.inner.check().is_err() {
            trace!("rate limiter saturated, waiting for a permit");
            self.inner.until_ready().await;
        }
        self.granted.fetch_add(1, Ordering::Relaxed);
    }

    /// Take a permit if one is available right now.
    pub fn try_acquire(&self) -> bool {
        let ok = self.inner.check().is_ok();
        if ok {
            self.granted.fetch_add(1, Ordering::Relaxed);
        }
        ok
    }

    /// Permits handed out so far.
    pub fn permits_granted(&self) -> u64 {
        self.granted.load(Ordering::Relaxed)
    }

    pub fn requests_per_minute(&self) -> u32 {
        self.requests_per_minute.get()
    }

    pub fn burst(&self) -> u32 {
        self.burst.get()
    }
}

impl std::fmt::Debug for ApiRateLimiter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ApiRateLimiter")
            .field("requests_per_minute", &self.requests_per_minute)
            .field("burst", &self.burst)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_burst_then_throttle() {
        let limiter = ApiRateLimiter::new(1, 3);
        assert!(limiter.try_acquire());
        assert!(limiter.try_acquire());
        assert!(limiter.try_acquire());
        assert!(!limiter.try_acquire());
        assert_eq!(limiter.permits_granted(), 3);
    }

    #[test]
    fn test_zero_values_are_clamped() {
        let limiter = ApiRateLimiter::new(0, 0);
        assert_eq!(limiter.requests_per_minute(), 1);
        assert_eq!(limiter.burst(), 1);
        assert!(limiter.try_acquire());
        assert!(!limiter.try_acquire());
    }

    #[tokio::test]
    async fn test_acquire_within_burst_does_not_wait() {
        let limiter = ApiRateLimiter::new(60, 5);
        let started = std::time::Instant::now();
        for _ in 0..5 {
            limiter.acquire().await;
        }
        assert!(started.elapsed() < std::time::Duration::from_millis(500));
        assert_eq!(limiter.permits_granted(), 5);
    }

    #[tokio::test]
    async fn test_acquire_waits_once_burst_is_spent() {
        // 1200/min is one permit every 50ms.
        let limiter = ApiRateLimiter::new(1200, 1);
        let started = std::time::Instant::now();
        for _ in 0..4 {
            limiter.acquire().await;
        }
        assert!(started.elapsed() >= std::time::Duration::from_millis(120));
        assert_eq!(limiter.permits_granted(), 4);
    }
}
