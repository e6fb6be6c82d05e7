//! Token bucket shared by all classification workers.

use std::sync::{Mutex, PoisonError};
use std::time::{Duration, Instant};

/// Upper bound on a single wait, whatever the configured rate.
const MAX_WAIT: Duration = Duration::from_secs(60);

#[derive(Debug)]
struct Bucket {
    tokens: f64,
    last: Instant,
}

/// Grants permission to call the remote service. Only the bookkeeping is
/// serialized; callers sleep outside the lock.
#[derive(Debug)]
pub struct RateLimiter {
    per_second: f64,
    burst: f64,
    bucket: Mutex<Bucket>,
}

impl RateLimiter {
    /// `per_second <= 0` (or NaN) disables limiting.
    pub fn new(per_second: f64, burst: usize) -> Self {
        let burst = burst.max(1) as f64;
        Self {
            per_second,
            burst,
            bucket: Mutex::new(Bucket {
                tokens: burst,
                last: Instant::now(),
            }),
        }
    }

    pub fn unlimited() -> Self {
        Self::new(0.0, 1)
    }

    pub fn is_unlimited(&self) -> bool {
        self.per_second.is_nan() || self.per_second <= 0.0
    }

    /// Takes a token if one is available, otherwise returns how long to wait.
    fn try_take(&self) -> Result<(), Duration> {
        let mut bucket = self.bucket.lock().unwrap_or_else(PoisonError::into_inner);
        let now = Instant::now();
        let refill = now.duration_since(bucket.last).as_secs_f64() * self.per_second;
        bucket.tokens = (bucket.tokens + refill).min(self.burst);
        bucket.last = now;
        if bucket.tokens >= 1.0 {
            bucket.tokens -= 1.0;
            Ok(())
        } else {
            let wait = (1.0 - bucket.tokens) / self.per_second;
            Err(Duration::try_from_secs_f64(wait).map_or(MAX_WAIT, |d| d.min(MAX_WAIT)))
        }
    }

    pub async fn acquire(&self) {
        if self.is_unlimited() {
            return;
        }
        while let Err(wait) = self.try_take() {
            tokio::time::sleep(wait).await;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn unlimited_never_waits() {
        let limiter = RateLimiter::unlimited();
        let start = Instant::now();
        for _ in 0..1000 {
            limiter.acquire().await;
        }
        assert!(start.elapsed() < Duration::from_secs(1));
    }

    #[test]
    fn burst_is_granted_then_throttled() {
        let limiter = RateLimiter::new(1.0, 3);
        assert!(limiter.try_take().is_ok());
        assert!(limiter.try_take().is_ok());
        assert!(limiter.try_take().is_ok());
        let wait = limiter.try_take().unwrap_err();
        assert!(wait > Duration::ZERO && wait <= Duration::from_secs(1));
    }

    #[test]
    fn extreme_rates_do_not_panic() {
        assert!(RateLimiter::new(f64::NAN, 1).is_unlimited());

        let slow = RateLimiter::new(1e-300, 1);
        assert!(slow.try_take().is_ok());
        assert_eq!(slow.try_take().unwrap_err(), MAX_WAIT);

        let fast = RateLimiter::new(f64::INFINITY, 1);
        fast.try_take().ok();
        assert!(fast.try_take().err().unwrap_or(Duration::ZERO) <= MAX_WAIT);
    }

    #[tokio::test]
    async fn acquire_waits_for_refill() {
        let limiter = RateLimiter::new(50.0, 1);
        let start = Instant::now();
        limiter.acquire().await;
        limiter.acquire().await;
        limiter.acquire().await;
        assert!(start.elapsed() >= Duration::from_millis(30));
    }
}
