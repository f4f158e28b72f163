pub mod breaker;
pub mod clock;
pub mod rate_limit;

pub use breaker::{BreakerConfig, BreakerRegistry, BreakerState, CircuitBreaker};
pub use clock::{Clock, ManualClock, SystemClock};
pub use rate_limit::{RateDecision, RateLimitConfig, SlidingWindowRateLimiter};
