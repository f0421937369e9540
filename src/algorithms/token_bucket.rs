// src/algorithms/token_bucket.rs

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::time::Duration;

use crate::algorithms::{cas_update, LimitDecision, RateLimitAlgorithm};
use crate::config::TokenBucketConfig;
use crate::storage::{CounterStore, StoreResult};

/// Stored bucket: fractional tokens and the time they were last topped up
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct TokenBucketState {
    pub tokens: f64,
    /// Nanoseconds since the epoch
    pub last_refill_ns: u64,
}

impl TokenBucketState {
    pub fn last_refill(&self) -> Duration {
        Duration::from_nanos(self.last_refill_ns)
    }
}

fn as_nanos(at: Duration) -> u64 {
    u64::try_from(at.as_nanos()).unwrap_or(u64::MAX)
}

/// Token Bucket rate limiting algorithm
///
/// The token bucket algorithm works by maintaining a "bucket" of tokens that are
/// replenished at a constant rate. Each request consumes `cost` tokens, and if
/// there are not enough, the request is rejected. Refill is computed lazily
/// from the time elapsed since the last update.
#[derive(Debug, Clone)]
pub struct TokenBucket {
    /// Configuration for the token bucket
    config: TokenBucketConfig,
    max_cas_attempts: u32,
}

impl TokenBucket {
    pub fn new(config: TokenBucketConfig, max_cas_attempts: u32) -> Self {
        Self {
            config,
            max_cas_attempts: max_cas_attempts.max(1),
        }
    }

    pub fn config(&self) -> &TokenBucketConfig {
        &self.config
    }

    fn capacity(&self) -> f64 {
        self.config.capacity as f64
    }

    /// Tokens available at `now`, never above capacity
    pub fn refill(&self, state: Option<TokenBucketState>, now: Duration) -> TokenBucketState {
        let capacity = self.capacity();
        match state {
            Some(state) => {
                let elapsed = now.saturating_sub(state.last_refill());
                TokenBucketState {
                    tokens: (state.tokens + elapsed.as_secs_f64() * self.config.refill_rate)
                        .clamp(0.0, capacity),
                    last_refill_ns: as_nanos(now).max(state.last_refill_ns),
                }
            }
            None => TokenBucketState {
                tokens: self
                    .config
                    .initial_tokens
                    .map_or(capacity, |initial| (initial as f64).min(capacity)),
                last_refill_ns: as_nanos(now),
            },
        }
    }

    /// Time for the bucket to go from `tokens` to `wanted`, if it ever gets there.
    ///
    /// Rounded up to the next nanosecond so that waiting exactly this long
    /// is always enough.
    fn time_to(&self, tokens: f64, wanted: f64) -> Option<Duration> {
        if tokens >= wanted {
            return Some(Duration::ZERO);
        }
        if self.config.refill_rate <= 0.0 || wanted > self.capacity() {
            return None;
        }
        let nanos = ((wanted - tokens) / self.config.refill_rate * 1e9).ceil();
        if !nanos.is_finite() || nanos >= u64::MAX as f64 {
            return None;
        }
        Some(Duration::from_nanos(nanos as u64))
    }

    /// Pure evaluation: the state to store (if any) and the decision
    pub fn step(
        &self,
        state: Option<TokenBucketState>,
        now: Duration,
        cost: u64,
    ) -> (Option<TokenBucketState>, LimitDecision) {
        let limit = self.config.capacity;
        let mut state = self.refill(state, now);
        let wanted = cost as f64;
        let allowed = state.tokens >= wanted;

        let left = if allowed { state.tokens - wanted } else { state.tokens };
        let reset_at = now + self.time_to(left, wanted.max(1.0)).unwrap_or(Duration::ZERO);
        let retry_after = self.time_to(state.tokens, wanted);
        let decision = LimitDecision::new(
            allowed,
            limit,
            left.floor() as u64,
            now,
            reset_at,
            retry_after,
        );

        if allowed && cost > 0 {
            state.tokens = left;
            (Some(state), decision)
        } else {
            (None, decision)
        }
    }

    /// Long enough to refill from empty; a bucket that never refills keeps a day
    fn ttl(&self) -> Duration {
        if self.config.refill_rate > 0.0 {
            let full_secs = (self.capacity() / self.config.refill_rate).min(86_400.0 * 365.0);
            Duration::from_secs_f64(full_secs) + Duration::from_secs(1)
        } else {
            Duration::from_secs(60 * 60 * 24)
        }
    }
}

#[async_trait]
impl RateLimitAlgorithm for TokenBucket {
    fn name(&self) -> &'static str {
        "token_bucket"
    }

    fn namespace(&self) -> &'static str {
        "tb"
    }

    fn limit(&self) -> u64 {
        self.config.capacity
    }

    async fn check(
        &self,
        store: &dyn CounterStore,
        key: &str,
        cost: u64,
        now: Duration,
    ) -> StoreResult<LimitDecision> {
        cas_update(store, key, self.max_cas_attempts, self.ttl(), |state| {
            self.step(state, now, cost)
        })
        .await
    }
}
