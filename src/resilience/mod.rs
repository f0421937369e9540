// src/resilience/mod.rs
//! Protection for calls to an unreliable dependency.
//!
//! 1. **Circuit Breaking** - stop calling a dependency that keeps failing, try it again after a cool-down
//! 2. **Retry with Exponential Backoff** - capped, jittered retries for transient failures
//! 3. **Registry** - one breaker per named dependency

mod circuit_breaker;
mod exponential_backoff;
mod registry;
mod retry;

#[cfg(test)]
mod tests;

// Re-export key components
pub use circuit_breaker::{
    BreakerSnapshot, CircuitBreaker, CircuitBreakerConfig, CircuitState, StateListener,
};
pub use exponential_backoff::{ExponentialBackoff, RetryConfig};
pub use registry::BreakerRegistry;
pub use retry::{RetryError, RetryExecutor, RetryPolicy};
