// src/storage/fallback.rs

use async_trait::async_trait;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, warn};

use crate::resilience::CircuitBreaker;
use crate::storage::{CounterStore, StoreResult};

/// Store that prefers a primary backend and degrades to a secondary one.
///
/// Calls to the primary are guarded by a circuit breaker: connectivity
/// failures count against it, and while it is open every call goes straight
/// to the secondary. Counters are not copied between the two, so limits are
/// enforced per backend while degraded.
///
/// ```plaintext
/// caller ──► FallbackStore ──► breaker ──► primary (Redis)
///                  │
///                  └─────────────────────► secondary (memory)
/// ```
#[derive(Debug, Clone)]
pub struct FallbackStore<P, S> {
    primary: P,
    secondary: S,
    breaker: Arc<CircuitBreaker>,
}

impl<P, S> FallbackStore<P, S>
where
    P: CounterStore,
    S: CounterStore,
{
    pub fn new(primary: P, secondary: S, breaker: Arc<CircuitBreaker>) -> Self {
        Self {
            primary,
            secondary,
            breaker,
        }
    }

    pub fn breaker(&self) -> &Arc<CircuitBreaker> {
        &self.breaker
    }

    pub fn primary(&self) -> &P {
        &self.primary
    }

    pub fn secondary(&self) -> &S {
        &self.secondary
    }

    fn use_primary(&self, operation: &str, key: &str) -> bool {
        let admitted = self.breaker.allow();
        if !admitted {
            debug!(operation, key, "Primary store bypassed, breaker is open");
        }
        admitted
    }

    /// `Some` when the primary's answer stands, `None` to fall back.
    fn settle<T>(&self, operation: &str, key: &str, result: StoreResult<T>) -> Option<StoreResult<T>> {
        match result {
            Err(e) if e.is_connectivity() => {
                self.breaker.record_failure();
                warn!(operation, key, error = %e, "Primary store failed, using fallback");
                None
            }
            // the backend answered, even if the answer is an error
            other => {
                self.breaker.record_success();
                Some(other)
            }
        }
    }
}

#[async_trait]
impl<P, S> CounterStore for FallbackStore<P, S>
where
    P: CounterStore,
    S: CounterStore,
{
    async fn get(&self, key: &str) -> StoreResult<Option<Vec<u8>>> {
        if self.use_primary("get", key) {
            if let Some(result) = self.settle("get", key, self.primary.get(key).await) {
                return result;
            }
        }
        self.secondary.get(key).await
    }

    async fn compare_and_set(
        &self,
        key: &str,
        expected: Option<&[u8]>,
        new: &[u8],
        ttl: Option<Duration>,
    ) -> StoreResult<bool> {
        if self.use_primary("compare_and_set", key) {
            let result = self.primary.compare_and_set(key, expected, new, ttl).await;
            if let Some(result) = self.settle("compare_and_set", key, result) {
                return result;
            }
        }
        self.secondary.compare_and_set(key, expected, new, ttl).await
    }

    async fn increment(&self, key: &str, delta: i64, ttl: Option<Duration>) -> StoreResult<i64> {
        if self.use_primary("increment", key) {
            let result = self.primary.increment(key, delta, ttl).await;
            if let Some(result) = self.settle("increment", key, result) {
                return result;
            }
        }
        self.secondary.increment(key, delta, ttl).await
    }

    async fn delete(&self, key: &str) -> StoreResult<bool> {
        if self.use_primary("delete", key) {
            if let Some(result) = self.settle("delete", key, self.primary.delete(key).await) {
                return result;
            }
        }
        self.secondary.delete(key).await
    }

    async fn ping(&self) -> StoreResult<()> {
        if self.use_primary("ping", "") {
            if let Some(result) = self.settle("ping", "", self.primary.ping().await) {
                return result;
            }
        }
        self.secondary.ping().await
    }
}
