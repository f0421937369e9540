use dashmap::DashMap;
use std::sync::Arc;

use crate::clock::{MonotonicClock, SharedClock};
use crate::resilience::{BreakerSnapshot, CircuitBreaker, CircuitBreakerConfig, StateListener};

/// Named circuit breakers sharing one configuration, created on first use.
#[derive(Debug)]
pub struct BreakerRegistry {
    config: CircuitBreakerConfig,
    clock: SharedClock,
    breakers: DashMap<String, Arc<CircuitBreaker>>,
    listener: Option<ListenerSlot>,
}

// StateListener has no Debug
#[derive(Clone)]
struct ListenerSlot(StateListener);

impl std::fmt::Debug for ListenerSlot {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str("StateListener")
    }
}

impl BreakerRegistry {
    pub fn new(config: CircuitBreakerConfig) -> Self {
        Self::with_clock(config, MonotonicClock::shared())
    }

    pub fn with_clock(config: CircuitBreakerConfig, clock: SharedClock) -> Self {
        Self {
            config,
            clock,
            breakers: DashMap::new(),
            listener: None,
        }
    }

    /// Listener attached to every breaker created afterwards
    pub fn with_listener(mut self, listener: StateListener) -> Self {
        self.listener = Some(ListenerSlot(listener));
        self
    }

    /// The breaker for `name`, created closed if it does not exist yet
    pub fn get_or_create(&self, name: &str) -> Arc<CircuitBreaker> {
        if let Some(existing) = self.breakers.get(name) {
            return Arc::clone(existing.value());
        }
        self.breakers
            .entry(name.to_string())
            .or_insert_with(|| {
                let breaker =
                    CircuitBreaker::with_clock(name, self.config.clone(), Arc::clone(&self.clock));
                let breaker = match &self.listener {
                    Some(ListenerSlot(listener)) => breaker.with_listener(Arc::clone(listener)),
                    None => breaker,
                };
                Arc::new(breaker)
            })
            .value()
            .clone()
    }

    pub fn get(&self, name: &str) -> Option<Arc<CircuitBreaker>> {
        self.breakers.get(name).map(|entry| Arc::clone(entry.value()))
    }

    /// Snapshots of every breaker, ordered by name
    pub fn snapshots(&self) -> Vec<BreakerSnapshot> {
        let mut snapshots: Vec<_> = self
            .breakers
            .iter()
            .map(|entry| entry.value().snapshot())
            .collect();
        snapshots.sort_by(|a, b| a.name.cmp(&b.name));
        snapshots
    }

    pub fn len(&self) -> usize {
        self.breakers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.breakers.is_empty()
    }
}
