// library entry
pub mod algorithms;
pub mod clock;
pub mod config;
pub mod error;
pub mod limiter;
pub mod logging;
pub mod resilience;
pub mod storage;

#[cfg(test)]
mod test_utils;

#[cfg(test)]
mod tests;

// Re-export key components for convenience
pub use algorithms::{LimitDecision, RateLimitAlgorithm, Strategy};
pub use clock::{Clock, ManualClock, MonotonicClock, SharedClock, SystemClock};
pub use config::{AdmissionConfig, FailurePolicy, LimiterConfig, Rate};
pub use error::{AdmissionError, Result, StorageError};
pub use limiter::{ExceededHook, LimiterStats, RateLimiter};
pub use logging::init as init_logging;
pub use resilience::{
    BreakerRegistry, CircuitBreaker, CircuitBreakerConfig, CircuitState, RetryConfig, RetryError,
    RetryExecutor, RetryPolicy,
};
pub use storage::{CounterStore, FallbackStore, MemoryStore, RedisStore};
