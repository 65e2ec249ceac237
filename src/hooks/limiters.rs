//! Rate limiters installed as `pre_request` hooks.
//!
//! Both algorithms keep their state behind one lock per limiter. The wait, when
//! one is needed, happens while the lock is held, so concurrent callers are
//! admitted one at a time.
//!
//! - Leaky bucket: requests leave at a constant rate, at most one every `1/rate`
//!   seconds.
//! - Token bucket: tokens refill at `rate` per second up to `capacity` and each
//!   request takes one, allowing bursts of up to `capacity` requests.
//!
//! [`LeakyBucketLimiter`] and [`TokenBucketLimiter`] block the calling thread;
//! [`AsyncLeakyBucketLimiter`] and [`AsyncTokenBucketLimiter`] suspend the task.

use crate::clock::{default_clock, ClockHandle};
use crate::errors::Result;
use crate::hooks::{AsyncHook, Hook, HookContext};
use crate::models::PreparedRequest;
use async_trait::async_trait;
use std::sync::{Mutex, PoisonError};
use std::time::{Duration, Instant};

fn seconds(secs: f64) -> Duration {
    Duration::try_from_secs_f64(secs).unwrap_or(Duration::MAX)
}

#[derive(Debug)]
struct LeakyBucket {
    interval: Duration,
    last_emission: Option<Instant>,
}

impl LeakyBucket {
    fn new(rate: f64) -> Self {
        LeakyBucket {
            interval: seconds(1.0 / rate),
            last_emission: None,
        }
    }

    /// Time left before the next emission is allowed.
    fn delay(&self, now: Instant) -> Option<Duration> {
        let last = self.last_emission?;
        let wait = self.interval.saturating_sub(now.saturating_duration_since(last));
        (!wait.is_zero()).then_some(wait)
    }

    fn record(&mut self, now: Instant) {
        self.last_emission = Some(now);
    }
}

#[derive(Debug)]
struct TokenBucket {
    rate: f64,
    capacity: f64,
    tokens: f64,
    last_update: Instant,
}

impl TokenBucket {
    fn new(rate: f64, capacity: Option<f64>, now: Instant) -> Self {
        let capacity = capacity.unwrap_or(rate);
        TokenBucket {
            rate,
            capacity,
            tokens: capacity,
            last_update: now,
        }
    }

    /// Refills and takes a token. Returns the wait needed when none is left.
    fn acquire(&mut self, now: Instant) -> Option<Duration> {
        let elapsed = now.saturating_duration_since(self.last_update).as_secs_f64();
        self.tokens = self.capacity.min(self.tokens + elapsed * self.rate);
        self.last_update = now;

        if self.tokens < 1.0 {
            Some(seconds((1.0 - self.tokens) / self.rate))
        } else {
            self.tokens -= 1.0;
            None
        }
    }

    /// The token that was waited for is spent immediately.
    fn after_wait(&mut self, now: Instant) {
        self.tokens = 0.0;
        self.last_update = now;
    }
}

/// Blocking leaky bucket limiter.
#[derive(Debug)]
pub struct LeakyBucketLimiter {
    state: Mutex<LeakyBucket>,
    clock: ClockHandle,
}

impl LeakyBucketLimiter {
    /// `rate` is the maximum number of requests per second.
    pub fn new(rate: f64) -> Self {
        Self::with_clock(rate, default_clock())
    }

    pub fn with_clock(rate: f64, clock: ClockHandle) -> Self {
        LeakyBucketLimiter {
            state: Mutex::new(LeakyBucket::new(rate)),
            clock,
        }
    }
}

impl Default for LeakyBucketLimiter {
    fn default() -> Self {
        Self::new(10.0)
    }
}

impl Hook for LeakyBucketLimiter {
    fn pre_request(&self, _request: &mut PreparedRequest, _ctx: &HookContext<'_>) -> Result<Option<PreparedRequest>> {
        let mut state = self.state.lock().unwrap_or_else(PoisonError::into_inner);
        let mut now = self.clock.now();
        if let Some(wait) = state.delay(now) {
            log::debug!("leaky bucket: waiting {wait:?}");
            std::thread::sleep(wait);
            now = self.clock.now();
        }
        state.record(now);
        Ok(None)
    }
}

/// Blocking token bucket limiter.
#[derive(Debug)]
pub struct TokenBucketLimiter {
    state: Mutex<TokenBucket>,
    clock: ClockHandle,
}

impl TokenBucketLimiter {
    /// `rate` tokens per second, `capacity` defaults to `rate` (one second of burst).
    pub fn new(rate: f64, capacity: Option<f64>) -> Self {
        Self::with_clock(rate, capacity, default_clock())
    }

    pub fn with_clock(rate: f64, capacity: Option<f64>, clock: ClockHandle) -> Self {
        TokenBucketLimiter {
            state: Mutex::new(TokenBucket::new(rate, capacity, clock.now())),
            clock,
        }
    }
}

impl Hook for TokenBucketLimiter {
    fn pre_request(&self, _request: &mut PreparedRequest, _ctx: &HookContext<'_>) -> Result<Option<PreparedRequest>> {
        let mut state = self.state.lock().unwrap_or_else(PoisonError::into_inner);
        if let Some(wait) = state.acquire(self.clock.now()) {
            log::debug!("token bucket: waiting {wait:?}");
            std::thread::sleep(wait);
            state.after_wait(self.clock.now());
        }
        Ok(None)
    }
}

/// Leaky bucket limiter for async sessions.
#[derive(Debug)]
pub struct AsyncLeakyBucketLimiter {
    state: tokio::sync::Mutex<LeakyBucket>,
    clock: ClockHandle,
}

impl AsyncLeakyBucketLimiter {
    pub fn new(rate: f64) -> Self {
        Self::with_clock(rate, default_clock())
    }

    pub fn with_clock(rate: f64, clock: ClockHandle) -> Self {
        AsyncLeakyBucketLimiter {
            state: tokio::sync::Mutex::new(LeakyBucket::new(rate)),
            clock,
        }
    }
}

#[async_trait]
impl AsyncHook for AsyncLeakyBucketLimiter {
    async fn pre_request(
        &self,
        _request: &mut PreparedRequest,
        _ctx: &HookContext<'_>,
    ) -> Result<Option<PreparedRequest>> {
        let mut state = self.state.lock().await;
        let mut now = self.clock.now();
        if let Some(wait) = state.delay(now) {
            tokio::time::sleep(wait).await;
            now = self.clock.now();
        }
        state.record(now);
        Ok(None)
    }
}

/// Token bucket limiter for async sessions.
#[derive(Debug)]
pub struct AsyncTokenBucketLimiter {
    state: tokio::sync::Mutex<TokenBucket>,
    clock: ClockHandle,
}

impl AsyncTokenBucketLimiter {
    pub fn new(rate: f64, capacity: Option<f64>) -> Self {
        Self::with_clock(rate, capacity, default_clock())
    }

    pub fn with_clock(rate: f64, capacity: Option<f64>, clock: ClockHandle) -> Self {
        AsyncTokenBucketLimiter {
            state: tokio::sync::Mutex::new(TokenBucket::new(rate, capacity, clock.now())),
            clock,
        }
    }
}

#[async_trait]
impl AsyncHook for AsyncTokenBucketLimiter {
    async fn pre_request(
        &self,
        _request: &mut PreparedRequest,
        _ctx: &HookContext<'_>,
    ) -> Result<Option<PreparedRequest>> {
        let mut state = self.state.lock().await;
        let wait = state.acquire(self.clock.now());
        if let Some(wait) = wait {
            tokio::time::sleep(wait).await;
            state.after_wait(self.clock.now());
        }
        Ok(None)
    }
}
