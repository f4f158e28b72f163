use std::collections::{HashMap, VecDeque};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use tracing::debug;

use super::clock::{Clock, SystemClock};

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct RateLimitConfig {
    pub max_requests: i64,
    pub window_seconds: i64,
}

impl Default for RateLimitConfig {
    fn default() -> Self {
        Self { max_requests: 30, window_seconds: 60 }
    }
}

/// Structured outcome of a rate check. Denial is a value, not an error; the
/// boundary turns it into a "try again shortly" reply.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct RateDecision {
    pub allowed: bool,
    pub limit: u32,
    pub remaining: u32,
    pub reset_seconds: u64,
}

impl RateDecision {
    fn unlimited() -> Self {
        Self { allowed: true, limit: 0, remaining: 0, reset_seconds: 0 }
    }
}

/// Per-key request throttle over a rolling window. Admitted-request
/// timestamps are kept per key and evicted lazily on each check; one
/// registry mutex serializes concurrent checks against the same key.
///
/// A config with non-positive `max_requests` or `window_seconds` produces a
/// no-op limiter that always allows.
pub struct SlidingWindowRateLimiter {
    limit: usize,
    window: Duration,
    enabled: bool,
    clock: Arc<dyn Clock>,
    windows: Mutex<HashMap<String, VecDeque<std::time::Instant>>>,
}

impl SlidingWindowRateLimiter {
    pub fn new(config: RateLimitConfig) -> Self {
        Self::with_clock(config, Arc::new(SystemClock))
    }

    pub fn with_clock(config: RateLimitConfig, clock: Arc<dyn Clock>) -> Self {
        let enabled = config.max_requests > 0 && config.window_seconds > 0;
        Self {
            limit: config.max_requests.max(0) as usize,
            window: Duration::from_secs(config.window_seconds.max(0) as u64),
            enabled,
            clock,
            windows: Mutex::new(HashMap::new()),
        }
    }

    pub fn check(&self, key: &str) -> RateDecision {
        if !self.enabled {
            return RateDecision::unlimited();
        }

        let now = self.clock.now();
        let mut windows = self.windows.lock().expect("rate limiter lock");
        let window = windows.entry(key.to_string()).or_default();

        while let Some(oldest) = window.front() {
            if now.duration_since(*oldest) >= self.window {
                window.pop_front();
            } else {
                break;
            }
        }

        if window.len() >= self.limit {
            let oldest = *window.front().expect("window at capacity has a front entry");
            let until_free = self.window.saturating_sub(now.duration_since(oldest));
            let reset_seconds = until_free.as_secs().max(1);
            debug!(
                event_name = "resilience.rate_limit.denied",
                key,
                limit = self.limit,
                reset_seconds,
                "rate limit exceeded"
            );
            return RateDecision {
                allowed: false,
                limit: self.limit as u32,
                remaining: 0,
                reset_seconds,
            };
        }

        window.push_back(now);
        RateDecision {
            allowed: true,
            limit: self.limit as u32,
            remaining: (self.limit - window.len()) as u32,
            reset_seconds: self.window.as_secs(),
        }
    }

    /// Administrative clear. Returns the number of tracked keys dropped.
    pub fn clear(&self) -> usize {
        let mut windows = self.windows.lock().expect("rate limiter lock");
        let count = windows.len();
        windows.clear();
        count
    }
}
