//! Token-bucket admission control per dependency.
//!
//! Tokens refill in whole intervals: after `k` full refill intervals the
//! bucket gains `k * refill_tokens`, capped at capacity. Callers either
//! `try_acquire` and back off on the returned wait, or `acquire` and block
//! up to a ceiling.

use std::sync::Mutex;
use std::time::Duration;

use tokio::time::Instant;
use tracing::debug;

use super::Dependency;
use crate::config::RateLimitConfig;

#[derive(Debug)]
pub struct TokenBucket {
    capacity: u32,
    refill_tokens: u32,
    refill_interval: Duration,
    tokens: u32,
    last_refill: Instant,
}

impl TokenBucket {
    pub fn new(config: &RateLimitConfig, now: Instant) -> Self {
        Self {
            capacity: config.capacity,
            refill_tokens: config.refill_tokens,
            refill_interval: config.refill_interval().max(Duration::from_millis(1)),
            tokens: config.capacity,
            last_refill: now,
        }
    }

    pub fn available(&self) -> u32 {
        self.tokens
    }

    fn refill(&mut self, now: Instant) {
        let elapsed = now.saturating_duration_since(self.last_refill);
        let intervals = (elapsed.as_nanos() / self.refill_interval.as_nanos()) as u32;
        if intervals == 0 {
            return;
        }
        let added = intervals.saturating_mul(self.refill_tokens);
        self.tokens = self.tokens.saturating_add(added).min(self.capacity);
        self.last_refill += self.refill_interval * intervals;
    }

    /// Take one token, or return how long until the next refill.
    pub fn try_acquire_at(&mut self, now: Instant) -> Result<(), Duration> {
        self.refill(now);
        if self.tokens > 0 {
            self.tokens -= 1;
            return Ok(());
        }
        let next = self.last_refill + self.refill_interval;
        Err(next.saturating_duration_since(now))
    }
}

pub struct RateLimiter {
    dependency: Dependency,
    bucket: Mutex<TokenBucket>,
}

impl RateLimiter {
    pub fn new(dependency: Dependency, config: &RateLimitConfig) -> Self {
        Self {
            dependency,
            bucket: Mutex::new(TokenBucket::new(config, Instant::now())),
        }
    }

    pub fn try_acquire(&self) -> Result<(), Duration> {
        match self.bucket.lock() {
            Ok(mut bucket) => bucket.try_acquire_at(Instant::now()),
            // A poisoned bucket admits rather than stalls the pipeline.
            Err(_) => Ok(()),
        }
    }

    /// Block until a token is available or `max_wait` would be exceeded.
    /// On give-up returns the wait that would have been needed.
    pub async fn acquire(&self, max_wait: Duration) -> Result<(), Duration> {
        let deadline = Instant::now() + max_wait;
        loop {
            let retry_after = match self.try_acquire() {
                Ok(()) => return Ok(()),
                Err(retry_after) => retry_after,
            };
            let now = Instant::now();
            if now + retry_after > deadline {
                debug!(service = %self.dependency, ?retry_after, "Rate limit wait exceeds ceiling");
                return Err(retry_after);
            }
            tokio::time::sleep(retry_after).await;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn config(capacity: u32, refill_tokens: u32, interval_ms: u64) -> RateLimitConfig {
        RateLimitConfig {
            capacity,
            refill_tokens,
            refill_interval_ms: interval_ms,
            max_wait_ms: 1_000,
        }
    }

    #[test]
    fn drains_then_reports_wait_until_refill() {
        let start = Instant::now();
        let mut bucket = TokenBucket::new(&config(2, 1, 1_000), start);
        assert!(bucket.try_acquire_at(start).is_ok());
        assert!(bucket.try_acquire_at(start).is_ok());
        let wait = bucket.try_acquire_at(start + Duration::from_millis(400)).unwrap_err();
        assert_eq!(wait, Duration::from_millis(600));
    }

    #[test]
    fn refills_in_whole_intervals_up_to_capacity() {
        let start = Instant::now();
        let mut bucket = TokenBucket::new(&config(3, 1, 100), start);
        for _ in 0..3 {
            bucket.try_acquire_at(start).unwrap();
        }
        // 2.5 intervals -> 2 tokens.
        bucket.refill(start + Duration::from_millis(250));
        assert_eq!(bucket.available(), 2);
        // Long idle never exceeds capacity.
        bucket.refill(start + Duration::from_secs(60));
        assert_eq!(bucket.available(), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn acquire_waits_for_refill_within_ceiling() {
        let limiter = RateLimiter::new(Dependency::CaseLaw, &config(1, 1, 200));
        limiter.acquire(Duration::from_secs(1)).await.unwrap();
        limiter.acquire(Duration::from_secs(1)).await.unwrap();
    }

    #[tokio::test(start_paused = true)]
    async fn acquire_gives_up_past_ceiling() {
        let limiter = RateLimiter::new(Dependency::CaseLaw, &config(1, 1, 5_000));
        limiter.acquire(Duration::from_secs(1)).await.unwrap();
        let wait = limiter.acquire(Duration::from_secs(1)).await.unwrap_err();
        assert!(wait > Duration::from_secs(1));
    }
}
