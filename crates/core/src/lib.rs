pub mod config;
pub mod errors;
pub mod resilience;
pub mod retrieval;
pub mod routing;

pub use errors::{ApplicationError, DispatchError, InterfaceError};
pub use resilience::{
    BreakerConfig, BreakerRegistry, BreakerState, CircuitBreaker, Clock, ManualClock,
    RateDecision, RateLimitConfig, SlidingWindowRateLimiter, SystemClock,
};
pub use retrieval::{query_pattern_hash, ComboCacheEntry, FeedbackSignal, ToolOutcome};
pub use routing::{
    action_rules, knowledge_rules, ActionRoute, ContextSignals, KnowledgeRoute, RouteKind,
    RuleOutcome, RuleRouter, UnknownRoute,
};
