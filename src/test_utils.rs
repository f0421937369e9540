// src/test_utils.rs

use async_trait::async_trait;
use std::sync::atomic::{AtomicBool, AtomicU32, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use crate::algorithms::Strategy;
use crate::clock::ManualClock;
use crate::config::{InMemoryConfig, LimiterConfig};
use crate::error::StorageError;
use crate::limiter::RateLimiter;
use crate::storage::{CounterStore, MemoryStore, StoreResult};

/// Memory store without a sweeper, following `clock`
pub fn memory_store(clock: &ManualClock) -> MemoryStore {
    let config = InMemoryConfig {
        use_background_task: false,
        ..InMemoryConfig::default()
    };
    MemoryStore::with_clock(config, clock.shared())
}

/// Limiter over a fresh memory store, both driven by `clock`
pub fn create_test_rate_limiter(strategy: Strategy, clock: &ManualClock) -> RateLimiter<MemoryStore> {
    RateLimiter::with_clock(memory_store(clock), LimiterConfig::new(strategy), clock.shared())
        .expect("valid limiter config")
}

/// Run `requests` single-cost checks and count how many were allowed
pub async fn test_rate_limit_scenario<S: CounterStore>(
    limiter: &RateLimiter<S>,
    key: &str,
    requests: usize,
) -> usize {
    let mut allowed = 0;
    for _ in 0..requests {
        if limiter.check(key, 1).await.expect("check failed").allowed {
            allowed += 1;
        }
    }
    allowed
}

/// Wraps a store and fails every call while switched off
#[derive(Debug, Clone)]
pub struct FlakyStore<S> {
    inner: S,
    failing: Arc<AtomicBool>,
    calls: Arc<AtomicUsize>,
}

impl<S: CounterStore> FlakyStore<S> {
    pub fn new(inner: S) -> Self {
        Self {
            inner,
            failing: Arc::new(AtomicBool::new(false)),
            calls: Arc::new(AtomicUsize::new(0)),
        }
    }

    pub fn set_failing(&self, failing: bool) {
        self.failing.store(failing, Ordering::SeqCst);
    }

    /// Calls that reached this store, failed ones included
    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    fn enter(&self) -> StoreResult<()> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if self.failing.load(Ordering::SeqCst) {
            Err(StorageError::RedisConnection("simulated outage".into()))
        } else {
            Ok(())
        }
    }
}

#[async_trait]
impl<S: CounterStore> CounterStore for FlakyStore<S> {
    async fn get(&self, key: &str) -> StoreResult<Option<Vec<u8>>> {
        self.enter()?;
        self.inner.get(key).await
    }

    async fn compare_and_set(
        &self,
        key: &str,
        expected: Option<&[u8]>,
        new: &[u8],
        ttl: Option<Duration>,
    ) -> StoreResult<bool> {
        self.enter()?;
        self.inner.compare_and_set(key, expected, new, ttl).await
    }

    async fn increment(&self, key: &str, delta: i64, ttl: Option<Duration>) -> StoreResult<i64> {
        self.enter()?;
        self.inner.increment(key, delta, ttl).await
    }

    async fn delete(&self, key: &str) -> StoreResult<bool> {
        self.enter()?;
        self.inner.delete(key).await
    }

    async fn ping(&self) -> StoreResult<()> {
        self.enter()?;
        self.inner.ping().await
    }
}

/// Loses the first `losses` compare-and-set races, as if another writer got there first
#[derive(Debug, Clone)]
pub struct ContendedStore<S> {
    inner: S,
    losses: Arc<AtomicU32>,
}

impl<S: CounterStore> ContendedStore<S> {
    pub fn new(inner: S, losses: u32) -> Self {
        Self {
            inner,
            losses: Arc::new(AtomicU32::new(losses)),
        }
    }

    pub fn losses_left(&self) -> u32 {
        self.losses.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl<S: CounterStore> CounterStore for ContendedStore<S> {
    async fn get(&self, key: &str) -> StoreResult<Option<Vec<u8>>> {
        self.inner.get(key).await
    }

    async fn compare_and_set(
        &self,
        key: &str,
        expected: Option<&[u8]>,
        new: &[u8],
        ttl: Option<Duration>,
    ) -> StoreResult<bool> {
        let lost = self
            .losses
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |left| left.checked_sub(1))
            .is_ok();
        if lost {
            return Ok(false);
        }
        self.inner.compare_and_set(key, expected, new, ttl).await
    }

    async fn increment(&self, key: &str, delta: i64, ttl: Option<Duration>) -> StoreResult<i64> {
        self.inner.increment(key, delta, ttl).await
    }

    async fn delete(&self, key: &str) -> StoreResult<bool> {
        self.inner.delete(key).await
    }

    async fn ping(&self) -> StoreResult<()> {
        self.inner.ping().await
    }
}
