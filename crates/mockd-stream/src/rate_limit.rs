//! Token-bucket rate limiting for event emission.

use crate::error::StreamError;
use mockd_core::sse::{RateLimitConfig, RateLimitStrategy};
use parking_lot::Mutex;
use std::time::{Duration, Instant};
use tokio_util::sync::CancellationToken;

/// Outcome of an acquisition attempt, dispatched by strategy.
#[derive(Debug, PartialEq, Eq)]
pub enum Acquire {
    /// A token was consumed; emit the event.
    Granted,
    /// Drop strategy: skip the event without emitting.
    Dropped,
}

/// Token bucket refilled at `events_per_second`, capped at `burst_size`
/// (defaulting to `events_per_second` when zero).
pub struct RateLimiter {
    events_per_second: f64,
    burst_size: f64,
    strategy: RateLimitStrategy,
    emit_headers: bool,
    state: Mutex<BucketState>,
}

struct BucketState {
    tokens: f64,
    last_refill: Instant,
}

impl RateLimiter {
    pub fn new(config: &RateLimitConfig) -> Self {
        let burst_size = if config.burst_size == 0 {
            config.events_per_second.max(1.0)
        } else {
            f64::from(config.burst_size)
        };
        RateLimiter {
            events_per_second: config.events_per_second,
            burst_size,
            strategy: config.strategy,
            emit_headers: config.emit_headers,
            state: Mutex::new(BucketState {
                tokens: burst_size,
                last_refill: Instant::now(),
            }),
        }
    }

    pub fn strategy(&self) -> RateLimitStrategy {
        self.strategy
    }

    /// Refill from the wall clock and consume one token if available.
    pub fn try_acquire(&self) -> bool {
        let mut state = self.state.lock();
        self.refill(&mut state);
        if state.tokens >= 1.0 {
            state.tokens -= 1.0;
            true
        } else {
            false
        }
    }

    /// Acquire a token according to the configured strategy.
    ///
    /// `wait` sleeps until a token accrues (or cancellation); `drop` reports
    /// [`Acquire::Dropped`] immediately; `error` fails with
    /// [`StreamError::RateLimited`].
    pub async fn acquire(&self, cancel: &CancellationToken) -> Result<Acquire, StreamError> {
        if self.try_acquire() {
            return Ok(Acquire::Granted);
        }
        match self.strategy {
            RateLimitStrategy::Drop => Ok(Acquire::Dropped),
            RateLimitStrategy::Error => Err(StreamError::RateLimited),
            RateLimitStrategy::Wait => loop {
                let wait = self.time_to_next_token();
                tokio::select! {
                    _ = cancel.cancelled() => return Err(StreamError::Closed),
                    _ = tokio::time::sleep(wait) => {}
                }
                if self.try_acquire() {
                    return Ok(Acquire::Granted);
                }
            },
        }
    }

    /// Refill the bucket to capacity.
    pub fn reset(&self) {
        let mut state = self.state.lock();
        state.tokens = self.burst_size;
        state.last_refill = Instant::now();
    }

    /// Whole tokens currently available.
    pub fn remaining(&self) -> u64 {
        let mut state = self.state.lock();
        self.refill(&mut state);
        state.tokens.floor() as u64
    }

    /// `X-RateLimit-*` headers, present only when enabled on the config.
    pub fn headers(&self) -> Option<Vec<(&'static str, String)>> {
        if !self.emit_headers {
            return None;
        }
        let remaining = self.remaining();
        let reset_secs = self.time_to_next_token().as_secs_f64().ceil() as u64;
        Some(vec![
            ("X-RateLimit-Limit", format!("{}", self.burst_size as u64)),
            ("X-RateLimit-Remaining", remaining.to_string()),
            ("X-RateLimit-Reset", reset_secs.to_string()),
        ])
    }

    fn refill(&self, state: &mut BucketState) {
        let now = Instant::now();
        let elapsed = now.duration_since(state.last_refill).as_secs_f64();
        state.tokens = (state.tokens + elapsed * self.events_per_second).min(self.burst_size);
        state.last_refill = now;
    }

    fn time_to_next_token(&self) -> Duration {
        let state = self.state.lock();
        if state.tokens >= 1.0 {
            return Duration::ZERO;
        }
        let missing = 1.0 - state.tokens;
        Duration::from_secs_f64(missing / self.events_per_second)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn config(eps: f64, burst: u32, strategy: RateLimitStrategy) -> RateLimitConfig {
        RateLimitConfig {
            events_per_second: eps,
            burst_size: burst,
            strategy,
            emit_headers: false,
        }
    }

    #[test]
    fn test_burst_defaults_to_rate() {
        let limiter = RateLimiter::new(&config(5.0, 0, RateLimitStrategy::Wait));
        // Full bucket of 5 tokens available up front.
        for _ in 0..5 {
            assert!(limiter.try_acquire());
        }
        assert!(!limiter.try_acquire());
    }

    #[test]
    fn test_reset_refills() {
        let limiter = RateLimiter::new(&config(2.0, 2, RateLimitStrategy::Wait));
        assert!(limiter.try_acquire());
        assert!(limiter.try_acquire());
        assert!(!limiter.try_acquire());
        limiter.reset();
        assert!(limiter.try_acquire());
    }

    #[test]
    fn test_refill_over_time() {
        let limiter = RateLimiter::new(&config(100.0, 1, RateLimitStrategy::Wait));
        assert!(limiter.try_acquire());
        assert!(!limiter.try_acquire());
        // 100 events/s accrues a token within ~10ms of wall clock.
        std::thread::sleep(Duration::from_millis(30));
        assert!(limiter.try_acquire());
    }

    #[tokio::test]
    async fn test_wait_strategy_sleeps_for_token() {
        let limiter = RateLimiter::new(&config(50.0, 1, RateLimitStrategy::Wait));
        let cancel = CancellationToken::new();
        assert!(limiter.try_acquire());

        let start = Instant::now();
        let outcome = limiter.acquire(&cancel).await.unwrap();
        assert_eq!(outcome, Acquire::Granted);
        // 50 events/s => roughly 20ms to the next token.
        assert!(start.elapsed() >= Duration::from_millis(10));
    }

    #[tokio::test]
    async fn test_drop_strategy_returns_immediately() {
        let limiter = RateLimiter::new(&config(1.0, 1, RateLimitStrategy::Drop));
        let cancel = CancellationToken::new();
        assert_eq!(limiter.acquire(&cancel).await.unwrap(), Acquire::Granted);
        assert_eq!(limiter.acquire(&cancel).await.unwrap(), Acquire::Dropped);
    }

    #[tokio::test]
    async fn test_error_strategy_fails() {
        let limiter = RateLimiter::new(&config(1.0, 1, RateLimitStrategy::Error));
        let cancel = CancellationToken::new();
        assert!(limiter.acquire(&cancel).await.is_ok());
        assert!(matches!(
            limiter.acquire(&cancel).await,
            Err(StreamError::RateLimited)
        ));
    }

    #[tokio::test]
    async fn test_wait_strategy_observes_cancellation() {
        let limiter = RateLimiter::new(&config(0.1, 1, RateLimitStrategy::Wait));
        let cancel = CancellationToken::new();
        assert!(limiter.try_acquire());

        let cancel_clone = cancel.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(20)).await;
            cancel_clone.cancel();
        });
        assert!(matches!(
            limiter.acquire(&cancel).await,
            Err(StreamError::Closed)
        ));
    }

    #[test]
    fn test_headers_only_when_enabled() {
        let limiter = RateLimiter::new(&config(5.0, 5, RateLimitStrategy::Wait));
        assert!(limiter.headers().is_none());

        let mut cfg = config(5.0, 5, RateLimitStrategy::Wait);
        cfg.emit_headers = true;
        let limiter = RateLimiter::new(&cfg);
        let headers = limiter.headers().unwrap();
        assert_eq!(headers[0].0, "X-RateLimit-Limit");
        assert_eq!(headers[0].1, "5");
        assert_eq!(headers[1].0, "X-RateLimit-Remaining");
        assert_eq!(headers[2].0, "X-RateLimit-Reset");
    }
}
