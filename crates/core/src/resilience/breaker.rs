use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use tracing::{debug, warn};

use super::clock::{Clock, SystemClock};

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct BreakerConfig {
    pub failure_threshold: u32,
    pub reset_timeout: Duration,
}

impl Default for BreakerConfig {
    fn default() -> Self {
        Self { failure_threshold: 5, reset_timeout: Duration::from_secs(60) }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum BreakerState {
    Closed,
    Open,
    HalfOpen,
}

impl BreakerState {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Closed => "closed",
            Self::Open => "open",
            Self::HalfOpen => "half_open",
        }
    }
}

/// Failure-counting state machine guarding calls to one named external
/// resource. Open state relaxes to half-open purely as a function of elapsed
/// time since the last failure, evaluated lazily on read.
pub struct CircuitBreaker {
    name: String,
    config: BreakerConfig,
    clock: Arc<dyn Clock>,
    failures: u32,
    open: bool,
    last_failure_at: Option<Instant>,
    last_success_at: Option<Instant>,
}

impl CircuitBreaker {
    pub fn new(name: impl Into<String>, config: BreakerConfig, clock: Arc<dyn Clock>) -> Self {
        Self {
            name: name.into(),
            config,
            clock,
            failures: 0,
            open: false,
            last_failure_at: None,
            last_success_at: None,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn failures(&self) -> u32 {
        self.failures
    }

    pub fn last_success_at(&self) -> Option<Instant> {
        self.last_success_at
    }

    /// Current state, with the lazy open → half-open transition applied.
    pub fn state(&self) -> BreakerState {
        if !self.open {
            return BreakerState::Closed;
        }
        match self.last_failure_at {
            Some(at) if self.clock.now().duration_since(at) >= self.config.reset_timeout => {
                BreakerState::HalfOpen
            }
            _ => BreakerState::Open,
        }
    }

    /// True for closed and half-open; a half-open breaker admits the probe
    /// call that decides whether it closes again.
    pub fn can_execute(&self) -> bool {
        self.state() != BreakerState::Open
    }

    pub fn record_success(&mut self) {
        self.failures = 0;
        self.open = false;
        self.last_success_at = Some(self.clock.now());
        debug!(event_name = "resilience.breaker.success", breaker = %self.name, "breaker reset to closed");
    }

    pub fn record_failure(&mut self) {
        self.failures = self.failures.saturating_add(1);
        self.last_failure_at = Some(self.clock.now());
        if self.failures >= self.config.failure_threshold && !self.open {
            self.open = true;
            warn!(
                event_name = "resilience.breaker.opened",
                breaker = %self.name,
                failures = self.failures,
                "breaker opened after consecutive failures"
            );
        } else if self.open {
            // A failed half-open probe lands here: the threshold is already
            // met, so the fresh failure timestamp re-arms the open window.
            debug!(event_name = "resilience.breaker.reopened", breaker = %self.name, "probe failed, breaker stays open");
        }
    }
}

/// Process-wide registry of breakers, keyed by resource name. Breakers are
/// created lazily on first reference and live until an explicit clear.
pub struct BreakerRegistry {
    defaults: BreakerConfig,
    clock: Arc<dyn Clock>,
    breakers: Mutex<HashMap<String, Arc<Mutex<CircuitBreaker>>>>,
}

impl BreakerRegistry {
    pub fn new(defaults: BreakerConfig) -> Self {
        Self::with_clock(defaults, Arc::new(SystemClock))
    }

    pub fn with_clock(defaults: BreakerConfig, clock: Arc<dyn Clock>) -> Self {
        Self { defaults, clock, breakers: Mutex::new(HashMap::new()) }
    }

    pub fn get(&self, name: &str) -> Arc<Mutex<CircuitBreaker>> {
        self.get_with(name, self.defaults)
    }

    /// Fetch the breaker for `name`, creating it with `config` if absent.
    /// The config only applies on first creation.
    pub fn get_with(&self, name: &str, config: BreakerConfig) -> Arc<Mutex<CircuitBreaker>> {
        let mut breakers = self.breakers.lock().expect("breaker registry lock");
        breakers
            .entry(name.to_string())
            .or_insert_with(|| {
                Arc::new(Mutex::new(CircuitBreaker::new(name, config, self.clock.clone())))
            })
            .clone()
    }

    /// Administrative clear. Returns the number of breakers dropped.
    pub fn clear(&self) -> usize {
        let mut breakers = self.breakers.lock().expect("breaker registry lock");
        let count = breakers.len();
        breakers.clear();
        count
    }

    pub fn len(&self) -> usize {
        self.breakers.lock().expect("breaker registry lock").len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
