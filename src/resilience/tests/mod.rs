// src/resilience/tests/mod.rs
//! Tests for resilience features

mod exponential_backoff_tests;
mod registry_tests;

// Common test utilities for resilience testing
pub(crate) mod utils {
    use std::fmt;
    use std::sync::{Arc, Mutex};
    use std::time::Duration;

    use crate::clock::ManualClock;
    use crate::resilience::{CircuitBreaker, CircuitBreakerConfig, CircuitState, StateListener};

    pub type Transitions = Arc<Mutex<Vec<(String, CircuitState, CircuitState)>>>;

    /// Listener that records every transition it sees
    pub fn recording_listener() -> (StateListener, Transitions) {
        let seen: Transitions = Arc::new(Mutex::new(Vec::new()));
        let sink = Arc::clone(&seen);
        let listener: StateListener = Arc::new(move |name, from, to| {
            sink.lock().unwrap().push((name.to_string(), from, to));
        });
        (listener, seen)
    }

    /// Breaker opening after 3 failures, closing after 2 trial successes,
    /// cooling down for 10 seconds of `clock` time
    pub fn test_breaker(clock: &ManualClock) -> CircuitBreaker {
        let config = CircuitBreakerConfig {
            failure_threshold: 3,
            success_threshold: 2,
            timeout: Duration::from_secs(10),
        };
        CircuitBreaker::with_clock("test", config, clock.shared())
    }

    /// Error for operations under retry
    #[derive(Debug, Clone, PartialEq, Eq)]
    pub enum TestError {
        Transient(u32),
        Fatal,
    }

    impl fmt::Display for TestError {
        fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
            match self {
                TestError::Transient(n) => write!(f, "transient failure #{}", n),
                TestError::Fatal => f.write_str("fatal failure"),
            }
        }
    }
}
