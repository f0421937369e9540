// src/limiter.rs

use dashmap::DashSet;
use serde::Serialize;
use std::fmt;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use tracing::warn;

use crate::algorithms::{LimitDecision, RateLimitAlgorithm, Strategy};
use crate::clock::{SharedClock, SystemClock};
use crate::config::{FailurePolicy, LimiterConfig};
use crate::error::{AdmissionError, Result};
use crate::limit_event;
use crate::storage::CounterStore;

/// Counters describing what a limiter has decided so far
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct LimiterStats {
    pub allowed: u64,
    pub denied: u64,
    pub store_errors: u64,
    /// Decisions made by the failure policy
    pub degraded: u64,
    pub exempt_keys: usize,
    pub blocked_keys: usize,
}

#[derive(Debug, Default)]
struct Counters {
    allowed: AtomicU64,
    denied: AtomicU64,
    store_errors: AtomicU64,
    degraded: AtomicU64,
}

impl Counters {
    fn record(&self, decision: &LimitDecision) {
        let counter = if decision.allowed {
            &self.allowed
        } else {
            &self.denied
        };
        counter.fetch_add(1, Ordering::Relaxed);
    }
}

/// Callback invoked with `(key, decision)` for every denied check
pub type ExceededHook = Arc<dyn Fn(&str, &LimitDecision) + Send + Sync>;

// ExceededHook has no Debug
#[derive(Clone)]
struct HookSlot(ExceededHook);

impl fmt::Debug for HookSlot {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("ExceededHook")
    }
}

/// Rate limiter bound to one strategy and one counter store.
///
/// The limiter keeps no per-key state of its own; every decision is a single
/// atomic operation against the store, so any number of limiter instances
/// (in one process or many) can share a store safely.
#[derive(Debug)]
pub struct RateLimiter<S: CounterStore> {
    store: S,
    algorithm: Box<dyn RateLimitAlgorithm>,
    config: LimiterConfig,
    clock: SharedClock,
    exempt: DashSet<String>,
    blocked: DashSet<String>,
    counters: Counters,
    enabled: AtomicBool,
    on_exceeded: Option<HookSlot>,
}

impl<S: CounterStore> RateLimiter<S> {
    /// Creates a rate limiter reading system time
    pub fn new(store: S, config: LimiterConfig) -> Result<Self> {
        Self::with_clock(store, config, SystemClock::shared())
    }

    pub fn with_clock(store: S, config: LimiterConfig, clock: SharedClock) -> Result<Self> {
        config.validate()?;
        let algorithm = config.strategy.build(config.max_cas_attempts);
        let exempt = config.exempt_keys.iter().cloned().collect();
        let blocked = config.blocked_keys.iter().cloned().collect();

        Ok(Self {
            store,
            algorithm,
            clock,
            exempt,
            blocked,
            counters: Counters::default(),
            enabled: AtomicBool::new(config.enabled),
            on_exceeded: None,
            config,
        })
    }

    /// Call `hook` with every denied decision, blocked keys and failure-policy
    /// refusals included
    pub fn with_on_exceeded(mut self, hook: ExceededHook) -> Self {
        self.on_exceeded = Some(HookSlot(hook));
        self
    }

    /// Turn limiting on or off at runtime
    pub fn set_enabled(&self, enabled: bool) {
        self.enabled.store(enabled, Ordering::Relaxed);
    }

    pub fn is_enabled(&self) -> bool {
        self.enabled.load(Ordering::Relaxed)
    }

    fn exceeded(&self, key: &str, decision: &LimitDecision) {
        if decision.allowed {
            return;
        }
        if let Some(HookSlot(hook)) = &self.on_exceeded {
            hook(key, decision);
        }
    }

    pub fn strategy(&self) -> &Strategy {
        &self.config.strategy
    }

    pub fn config(&self) -> &LimiterConfig {
        &self.config
    }

    pub fn store(&self) -> &S {
        &self.store
    }

    fn storage_key(&self, key: &str) -> String {
        format!(
            "{}:{}:{}",
            self.config.key_prefix,
            self.algorithm.namespace(),
            key
        )
    }

    /// Decide whether `cost` units for `key` are admitted, recording them if so.
    ///
    /// A denial is an `Ok` decision. The only error is a failing store.
    pub async fn check(&self, key: &str, cost: u64) -> Result<LimitDecision> {
        let now = self.clock.now();
        let limit = self.algorithm.limit();

        let decision = if !self.is_enabled() || self.exempt.contains(key) {
            LimitDecision::unrestricted(limit, now)
        } else if self.blocked.contains(key) {
            LimitDecision::refused(limit, now)
        } else {
            let storage_key = self.storage_key(key);
            match self
                .algorithm
                .check(&self.store, &storage_key, cost, now)
                .await
            {
                Ok(decision) => decision,
                Err(e) => {
                    self.counters.store_errors.fetch_add(1, Ordering::Relaxed);
                    warn!(key, strategy = self.algorithm.name(), error = %e, "Rate limit check failed");
                    return Err(AdmissionError::StoreUnavailable(e));
                }
            }
        };

        limit_event!(self.algorithm.name(), key, cost, decision);
        self.counters.record(&decision);
        self.exceeded(key, &decision);
        Ok(decision)
    }

    /// [`check`](Self::check) with a cost of one
    pub async fn check_one(&self, key: &str) -> Result<LimitDecision> {
        self.check(key, 1).await
    }

    /// Like [`check`](Self::check), but a store failure is resolved by the
    /// configured [`FailurePolicy`] into a decision marked `degraded`
    pub async fn admit(&self, key: &str, cost: u64) -> LimitDecision {
        match self.check(key, cost).await {
            Ok(decision) => decision,
            Err(_) => {
                let now = self.clock.now();
                let limit = self.algorithm.limit();
                let decision = match self.config.failure_policy {
                    FailurePolicy::FailOpen => LimitDecision::unrestricted(limit, now),
                    FailurePolicy::FailClosed => LimitDecision::refused(limit, now),
                };
                self.counters.degraded.fetch_add(1, Ordering::Relaxed);
                self.counters.record(&decision);
                let decision = decision.into_degraded();
                self.exceeded(key, &decision);
                decision
            }
        }
    }

    /// Always admit `key` without consulting the store
    pub fn exempt_key(&self, key: impl Into<String>) {
        self.exempt.insert(key.into());
    }

    /// Always deny `key` without consulting the store
    pub fn block_key(&self, key: impl Into<String>) {
        self.blocked.insert(key.into());
    }

    pub fn remove_exempt_key(&self, key: &str) -> bool {
        self.exempt.remove(key).is_some()
    }

    pub fn unblock_key(&self, key: &str) -> bool {
        self.blocked.remove(key).is_some()
    }

    pub fn stats(&self) -> LimiterStats {
        LimiterStats {
            allowed: self.counters.allowed.load(Ordering::Relaxed),
            denied: self.counters.denied.load(Ordering::Relaxed),
            store_errors: self.counters.store_errors.load(Ordering::Relaxed),
            degraded: self.counters.degraded.load(Ordering::Relaxed),
            exempt_keys: self.exempt.len(),
            blocked_keys: self.blocked.len(),
        }
    }
}
