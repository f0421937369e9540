use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, TryLockError};
use std::time::Duration;
use tracing::{debug, info, warn};

use crate::clock::{MonotonicClock, SharedClock};
use crate::error::{AdmissionError, Result};

/// The state of the circuit breaker
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CircuitState {
    /// Circuit is closed, requests flow normally
    Closed,
    /// Circuit is open, requests are rejected without reaching the dependency
    Open,
    /// Cool-down elapsed, trial requests decide whether to close again
    HalfOpen,
}

impl fmt::Display for CircuitState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            CircuitState::Closed => "closed",
            CircuitState::Open => "open",
            CircuitState::HalfOpen => "half-open",
        };
        f.write_str(name)
    }
}

/// Configuration for circuit breaker
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct CircuitBreakerConfig {
    /// Consecutive failures that open the circuit
    pub failure_threshold: u32,
    /// Consecutive half-open successes that close the circuit
    pub success_threshold: u32,
    /// How long the circuit stays open before admitting a trial call
    #[serde(with = "crate::config::duration_serde")]
    pub timeout: Duration,
}

impl Default for CircuitBreakerConfig {
    fn default() -> Self {
        Self {
            failure_threshold: 5,
            success_threshold: 3,
            timeout: Duration::from_secs(30),
        }
    }
}

impl CircuitBreakerConfig {
    pub fn validate(&self) -> Result<()> {
        if self.failure_threshold == 0 {
            return Err(AdmissionError::Config(
                "breaker.failure_threshold must be at least 1".into(),
            ));
        }
        if self.success_threshold == 0 {
            return Err(AdmissionError::Config(
                "breaker.success_threshold must be at least 1".into(),
            ));
        }
        Ok(())
    }
}

/// Callback invoked with `(breaker name, from, to)` on every transition
pub type StateListener = Arc<dyn Fn(&str, CircuitState, CircuitState) + Send + Sync>;

/// Point-in-time view of a breaker
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct BreakerSnapshot {
    pub name: String,
    pub state: CircuitState,
    pub failure_count: u32,
    pub success_count: u32,
    /// Clock time the circuit opened, while open
    pub opened_at: Option<Duration>,
    pub total_successes: u64,
    pub total_failures: u64,
    pub total_rejections: u64,
}

#[derive(Debug)]
struct BreakerInner {
    state: CircuitState,
    /// Consecutive failures while closed
    failure_count: u32,
    /// Consecutive successes while half-open
    success_count: u32,
    /// Clock time the circuit opened, only while open
    opened_at: Option<Duration>,
    total_successes: u64,
    total_failures: u64,
    total_rejections: u64,
    /// Transitions not yet announced, in the order they happened
    pending: Vec<(CircuitState, CircuitState)>,
}

impl BreakerInner {
    fn transition(&mut self, to: CircuitState, now: Duration) {
        let from = self.state;
        self.state = to;
        self.failure_count = 0;
        self.success_count = 0;
        self.opened_at = (to == CircuitState::Open).then_some(now);
        self.pending.push((from, to));
    }
}

/// Circuit breaker guarding one dependency.
///
/// All state lives behind one short-lived lock so that a report and a
/// transition are observed together. Reports never block on I/O.
///
/// Transitions are announced (logged and passed to the listener) outside
/// that lock, one thread at a time, in the order they happened. A listener
/// may call back into the breaker.
pub struct CircuitBreaker {
    name: String,
    config: CircuitBreakerConfig,
    clock: SharedClock,
    inner: Mutex<BreakerInner>,
    announcing: Mutex<()>,
    listener: Option<StateListener>,
}

impl fmt::Debug for CircuitBreaker {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CircuitBreaker")
            .field("name", &self.name)
            .field("state", &self.state())
            .field("config", &self.config)
            .finish()
    }
}

impl CircuitBreaker {
    /// Create a new circuit breaker with the given configuration
    pub fn new(name: impl Into<String>, config: CircuitBreakerConfig) -> Self {
        Self::with_clock(name, config, MonotonicClock::shared())
    }

    pub fn with_clock(name: impl Into<String>, config: CircuitBreakerConfig, clock: SharedClock) -> Self {
        Self {
            name: name.into(),
            config,
            clock,
            inner: Mutex::new(BreakerInner {
                state: CircuitState::Closed,
                failure_count: 0,
                success_count: 0,
                opened_at: None,
                total_successes: 0,
                total_failures: 0,
                total_rejections: 0,
                pending: Vec::new(),
            }),
            announcing: Mutex::new(()),
            listener: None,
        }
    }

    /// Register a callback for state transitions
    pub fn with_listener(mut self, listener: StateListener) -> Self {
        self.listener = Some(listener);
        self
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn config(&self) -> &CircuitBreakerConfig {
        &self.config
    }

    // A panic elsewhere cannot leave the counters half-updated.
    fn lock(&self) -> MutexGuard<'_, BreakerInner> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Deliver pending transitions in order.
    ///
    /// Whoever holds `announcing` drains the queue; a caller that finds it
    /// held leaves its transitions to that thread, which re-checks the queue
    /// after letting go.
    fn publish(&self) {
        loop {
            let _announcing = match self.announcing.try_lock() {
                Ok(guard) => guard,
                Err(TryLockError::Poisoned(poisoned)) => poisoned.into_inner(),
                Err(TryLockError::WouldBlock) => return,
            };
            loop {
                let batch = std::mem::take(&mut self.lock().pending);
                if batch.is_empty() {
                    break;
                }
                for (from, to) in batch {
                    self.announce(from, to);
                }
            }
            drop(_announcing);
            if self.lock().pending.is_empty() {
                return;
            }
        }
    }

    fn announce(&self, from: CircuitState, to: CircuitState) {
        match to {
            CircuitState::Open => warn!(breaker = %self.name, %from, "Circuit breaker opened"),
            CircuitState::HalfOpen => info!(breaker = %self.name, "Circuit breaker half-open, admitting trial calls"),
            CircuitState::Closed => info!(breaker = %self.name, %from, "Circuit breaker closed"),
        }
        if let Some(listener) = &self.listener {
            listener(&self.name, from, to);
        }
    }

    /// Admit a call, or return the remaining cool-down.
    ///
    /// An open circuit whose cool-down has elapsed moves to half-open here.
    fn acquire(&self) -> std::result::Result<(), Duration> {
        let outcome = {
            let mut inner = self.lock();
            let now = self.clock.now();
            match inner.state {
                CircuitState::Closed | CircuitState::HalfOpen => Ok(()),
                CircuitState::Open => {
                    let reopen_at = inner.opened_at.unwrap_or(now) + self.config.timeout;
                    if now >= reopen_at {
                        inner.transition(CircuitState::HalfOpen, now);
                        Ok(())
                    } else {
                        inner.total_rejections += 1;
                        Err(reopen_at - now)
                    }
                }
            }
        };
        self.publish();
        outcome
    }

    /// Check if the circuit breaker allows the call to proceed
    pub fn allow(&self) -> bool {
        self.acquire().is_ok()
    }

    /// Like [`allow`](Self::allow), with the cool-down left on rejection
    pub fn try_acquire(&self) -> Result<()> {
        self.acquire().map_err(|retry_after| AdmissionError::BreakerOpen {
            name: self.name.clone(),
            retry_after,
        })
    }

    /// Record a successful call
    pub fn record_success(&self) {
        {
            let mut inner = self.lock();
            let now = self.clock.now();
            inner.total_successes += 1;
            match inner.state {
                CircuitState::Closed => inner.failure_count = 0,
                CircuitState::HalfOpen => {
                    inner.success_count += 1;
                    if inner.success_count >= self.config.success_threshold {
                        inner.transition(CircuitState::Closed, now);
                    }
                }
                CircuitState::Open => {
                    debug!(breaker = %self.name, "Ignoring success reported while open");
                }
            }
        }
        self.publish();
    }

    /// Record a failed call
    pub fn record_failure(&self) {
        {
            let mut inner = self.lock();
            let now = self.clock.now();
            inner.total_failures += 1;
            match inner.state {
                CircuitState::Closed => {
                    inner.failure_count += 1;
                    if inner.failure_count >= self.config.failure_threshold {
                        inner.transition(CircuitState::Open, now);
                    }
                }
                // any failure during the trial reopens
                CircuitState::HalfOpen => inner.transition(CircuitState::Open, now),
                CircuitState::Open => {
                    debug!(breaker = %self.name, "Ignoring failure reported while open");
                }
            }
        }
        self.publish();
    }

    /// Current state, without applying a pending open to half-open move
    pub fn state(&self) -> CircuitState {
        self.lock().state
    }

    pub fn snapshot(&self) -> BreakerSnapshot {
        let inner = self.lock();
        BreakerSnapshot {
            name: self.name.clone(),
            state: inner.state,
            failure_count: inner.failure_count,
            success_count: inner.success_count,
            opened_at: inner.opened_at,
            total_successes: inner.total_successes,
            total_failures: inner.total_failures,
            total_rejections: inner.total_rejections,
        }
    }

    /// Force the circuit closed and clear the consecutive counters
    pub fn reset(&self) {
        {
            let mut inner = self.lock();
            let now = self.clock.now();
            if inner.state == CircuitState::Closed {
                inner.failure_count = 0;
            } else {
                inner.transition(CircuitState::Closed, now);
            }
        }
        self.publish();
    }
}
