//! Token bucket rate limiter for outbound research calls.
//!
//! Callers reserve tokens up front: the bucket may go negative, and each
//! caller sleeps until its own reservation is covered by refill. This keeps
//! grants in reservation order, so no caller waits longer than the tokens
//! reserved ahead of it take to refill.

use crate::error::{Error, Result};
use std::time::Duration;
use tokio::sync::Mutex;
use tokio::time::{sleep_until, Instant};
use tracing::debug;

/// Limits for the token bucket.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RateLimitConfig {
    /// Continuous refill rate.
    pub requests_per_second: f64,
    /// Bucket capacity.
    pub burst: u32,
}

impl Default for RateLimitConfig {
    fn default() -> Self {
        Self {
            requests_per_second: 2.0,
            burst: 4,
        }
    }
}

#[derive(Debug)]
struct Bucket {
    tokens: f64,
    last_refill: Instant,
}

impl Bucket {
    fn refill(&mut self, now: Instant, config: &RateLimitConfig) {
        let elapsed = now.saturating_duration_since(self.last_refill).as_secs_f64();
        self.tokens =
            (self.tokens + elapsed * config.requests_per_second).min(config.burst as f64);
        self.last_refill = now;
    }
}

/// Process-wide limiter shared by every gathering task.
#[derive(Debug)]
pub struct RateLimiter {
    config: RateLimitConfig,
    bucket: Mutex<Bucket>,
}

impl RateLimiter {
    /// Create a limiter with a full bucket.
    pub fn new(config: RateLimitConfig) -> Result<Self> {
        if !config.requests_per_second.is_finite() || config.requests_per_second <= 0.0 {
            return Err(Error::Config(
                "requests per second must be a positive number".to_string(),
            ));
        }
        if config.burst == 0 {
            return Err(Error::Config("burst must be at least 1".to_string()));
        }

        Ok(Self {
            config,
            bucket: Mutex::new(Bucket {
                tokens: config.burst as f64,
                last_refill: Instant::now(),
            }),
        })
    }

    /// Acquire `n` tokens, waiting for refill if needed.
    ///
    /// Returns how long the caller waited. Fails with `RateLimitTimeout`
    /// without consuming anything if the grant would land after `deadline`.
    pub async fn acquire(&self, n: u32, deadline: Instant) -> Result<Duration> {
        if n == 0 {
            return Ok(Duration::ZERO);
        }
        if n > self.config.burst {
            return Err(Error::Validation(format!(
                "cannot acquire {} tokens from a bucket of {}",
                n, self.config.burst
            )));
        }

        let (now, ready_at) = {
            let mut bucket = self.bucket.lock().await;
            let now = Instant::now();
            bucket.refill(now, &self.config);

            let deficit = n as f64 - bucket.tokens;
            let wait = if deficit > 0.0 {
                Duration::from_secs_f64(deficit / self.config.requests_per_second)
            } else {
                Duration::ZERO
            };

            let ready_at = now + wait;
            if ready_at > deadline {
                return Err(Error::RateLimitTimeout { wait });
            }

            bucket.tokens -= n as f64;
            (now, ready_at)
        };

        if ready_at > now {
            debug!(wait_ms = (ready_at - now).as_millis() as u64, "waiting for rate limit");
            sleep_until(ready_at).await;
        }

        Ok(ready_at - now)
    }

    /// Tokens currently available (negative while reservations are pending).
    pub async fn available(&self) -> f64 {
        let mut bucket = self.bucket.lock().await;
        bucket.refill(Instant::now(), &self.config);
        bucket.tokens
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    fn limiter(rps: f64, burst: u32) -> Arc<RateLimiter> {
        Arc::new(
            RateLimiter::new(RateLimitConfig {
                requests_per_second: rps,
                burst,
            })
            .unwrap(),
        )
    }

    #[test]
    fn test_rejects_invalid_config() {
        assert!(RateLimiter::new(RateLimitConfig {
            requests_per_second: 0.0,
            burst: 1
        })
        .is_err());
        assert!(RateLimiter::new(RateLimitConfig {
            requests_per_second: 1.0,
            burst: 0
        })
        .is_err());
    }

    #[tokio::test(start_paused = true)]
    async fn test_burst_plus_one_is_delayed() {
        let rps = 2.0;
        let burst = 4;
        let limiter = limiter(rps, burst);
        let start = Instant::now();
        let deadline = start + Duration::from_secs(10);

        let mut handles = Vec::new();
        for _ in 0..=burst {
            let limiter = limiter.clone();
            handles.push(tokio::spawn(async move {
                limiter.acquire(1, deadline).await.unwrap();
                Instant::now() - start
            }));
        }

        let mut granted = Vec::new();
        for handle in handles {
            granted.push(handle.await.unwrap());
        }
        granted.sort();

        let immediate = granted.iter().filter(|d| d.is_zero()).count();
        assert_eq!(immediate, burst as usize);
        assert!(granted[burst as usize] >= Duration::from_secs_f64(1.0 / rps));
    }

    #[tokio::test(start_paused = true)]
    async fn test_deadline_is_never_exceeded() {
        let limiter = limiter(1.0, 1);
        let now = Instant::now();

        limiter.acquire(1, now + Duration::from_secs(5)).await.unwrap();

        let err = limiter
            .acquire(1, now + Duration::from_millis(100))
            .await
            .unwrap_err();
        assert!(matches!(err, Error::RateLimitTimeout { .. }));

        // The failed attempt must not have consumed a reservation.
        let waited = limiter
            .acquire(1, now + Duration::from_secs(2))
            .await
            .unwrap();
        assert_eq!(waited, Duration::from_secs(1));
    }

    #[tokio::test(start_paused = true)]
    async fn test_continuous_refill() {
        let limiter = limiter(4.0, 4);
        let deadline = Instant::now() + Duration::from_secs(60);
        for _ in 0..4 {
            limiter.acquire(1, deadline).await.unwrap();
        }

        tokio::time::advance(Duration::from_millis(250)).await;
        let available = limiter.available().await;
        assert!((available - 1.0).abs() < 1e-6);
    }

    #[tokio::test]
    async fn test_oversized_request_is_rejected() {
        let limiter = limiter(1.0, 2);
        let result = limiter
            .acquire(3, Instant::now() + Duration::from_secs(60))
            .await;
        assert!(matches!(result, Err(Error::Validation(_))));
    }

    #[tokio::test(start_paused = true)]
    async fn test_grants_follow_reservation_order() {
        let limiter = limiter(1.0, 1);
        let start = Instant::now();
        let deadline = start + Duration::from_secs(30);

        let mut waits = Vec::new();
        for _ in 0..4 {
            waits.push(limiter.acquire(1, deadline).await.unwrap());
        }

        assert_eq!(waits[0], Duration::ZERO);
        for wait in &waits[1..] {
            assert!(*wait <= Duration::from_secs_f64(1.0 * 1.01));
        }
        assert_eq!(Instant::now() - start, Duration::from_secs(3));
    }
}
