// src/algorithms/mod.rs

pub mod fixed_window;
pub mod sliding_window;
pub mod token_bucket;

#[cfg(test)]
mod tests;

pub use fixed_window::FixedWindow;
pub use sliding_window::{SlidingWindow, SlidingWindowState};
pub use token_bucket::{TokenBucket, TokenBucketState};

use async_trait::async_trait;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use std::fmt::Debug;
use std::time::Duration;
use tracing::{debug, warn};

use crate::config::{FixedWindowConfig, SlidingWindowConfig, TokenBucketConfig};
use crate::error::{AdmissionError, Result, StorageError};
use crate::storage::{CounterStore, StoreResult};

/// Limiting strategy with its parameters
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Strategy {
    FixedWindow(FixedWindowConfig),
    SlidingWindow(SlidingWindowConfig),
    TokenBucket(TokenBucketConfig),
}

impl Strategy {
    pub fn name(&self) -> &'static str {
        match self {
            Strategy::FixedWindow(_) => "fixed_window",
            Strategy::SlidingWindow(_) => "sliding_window",
            Strategy::TokenBucket(_) => "token_bucket",
        }
    }

    /// Advertised limit: requests per window, or bucket capacity
    pub fn limit(&self) -> u64 {
        match self {
            Strategy::FixedWindow(config) => config.max_requests,
            Strategy::SlidingWindow(config) => config.max_requests,
            Strategy::TokenBucket(config) => config.capacity,
        }
    }

    pub fn validate(&self) -> Result<()> {
        match self {
            Strategy::FixedWindow(FixedWindowConfig { window, .. })
            | Strategy::SlidingWindow(SlidingWindowConfig { window, .. }) => {
                if window.as_millis() == 0 {
                    return Err(AdmissionError::Config(format!(
                        "{} window must be at least 1ms",
                        self.name()
                    )));
                }
            }
            Strategy::TokenBucket(config) => {
                if config.capacity == 0 {
                    return Err(AdmissionError::Config(
                        "token_bucket capacity must be at least 1".into(),
                    ));
                }
                if !config.refill_rate.is_finite() || config.refill_rate < 0.0 {
                    return Err(AdmissionError::Config(format!(
                        "token_bucket refill_rate must be a non-negative number, got {}",
                        config.refill_rate
                    )));
                }
            }
        }
        Ok(())
    }

    /// Build the algorithm that evaluates this strategy
    pub fn build(&self, max_cas_attempts: u32) -> Box<dyn RateLimitAlgorithm> {
        match self {
            Strategy::FixedWindow(config) => Box::new(FixedWindow::new(config.clone())),
            Strategy::SlidingWindow(config) => {
                Box::new(SlidingWindow::new(config.clone(), max_cas_attempts))
            }
            Strategy::TokenBucket(config) => {
                Box::new(TokenBucket::new(config.clone(), max_cas_attempts))
            }
        }
    }
}

/// Outcome of one rate limit check
#[derive(Debug, Clone, PartialEq)]
pub struct LimitDecision {
    /// Whether the request was allowed
    pub allowed: bool,

    /// Total capacity of the rate limiter
    pub limit: u64,

    /// Remaining allowed cost after this decision
    pub remaining: u64,

    /// When the limit resets, as time since the UNIX epoch
    pub reset_at: Duration,

    /// Time from the decision until `reset_at`
    pub reset_after: Duration,

    /// Earliest wait after which a denied request could pass.
    /// `None` when allowed, or when no amount of waiting helps.
    pub retry_after: Option<Duration>,

    /// Produced by the failure policy instead of the store
    pub degraded: bool,
}

impl LimitDecision {
    pub(crate) fn new(
        allowed: bool,
        limit: u64,
        remaining: u64,
        now: Duration,
        reset_at: Duration,
        retry_after: Option<Duration>,
    ) -> Self {
        Self {
            allowed,
            limit,
            remaining,
            reset_at,
            reset_after: reset_at.saturating_sub(now),
            retry_after: if allowed { None } else { retry_after },
            degraded: false,
        }
    }

    /// Admission that consumed nothing
    pub fn unrestricted(limit: u64, now: Duration) -> Self {
        Self::new(true, limit, limit, now, now, None)
    }

    /// Denial that no wait will lift
    pub fn refused(limit: u64, now: Duration) -> Self {
        Self::new(false, limit, 0, now, now, None)
    }

    pub(crate) fn into_degraded(mut self) -> Self {
        self.degraded = true;
        self
    }

    /// Standard rate limit response headers
    pub fn headers(&self) -> Vec<(&'static str, String)> {
        let mut headers = vec![
            ("X-RateLimit-Limit", self.limit.to_string()),
            ("X-RateLimit-Remaining", self.remaining.to_string()),
            ("X-RateLimit-Reset", ceil_secs(self.reset_at).to_string()),
        ];
        if !self.allowed {
            let wait = self.retry_after.unwrap_or(self.reset_after);
            headers.push(("Retry-After", ceil_secs(wait).max(1).to_string()));
        }
        headers
    }
}

fn ceil_secs(duration: Duration) -> u64 {
    let secs = duration.as_secs();
    if duration.subsec_nanos() > 0 {
        secs + 1
    } else {
        secs
    }
}

/// Core trait that all rate limiting algorithms must implement
#[async_trait]
pub trait RateLimitAlgorithm: Send + Sync + Debug {
    /// Strategy name used in logs and storage keys
    fn name(&self) -> &'static str;

    /// Namespace segment keeping each strategy's state apart
    fn namespace(&self) -> &'static str;

    fn limit(&self) -> u64;

    /// Evaluate and record `cost` against the state stored at `key`.
    ///
    /// Denial is a decision; only store failures are errors.
    async fn check(
        &self,
        store: &dyn CounterStore,
        key: &str,
        cost: u64,
        now: Duration,
    ) -> StoreResult<LimitDecision>;
}

/// Read-modify-write of a JSON state blob through compare-and-set.
///
/// `step` sees the decoded state (`None` when absent) and returns the state
/// to write, or `None` to leave the store untouched, along with the decision.
/// A lost race re-reads and re-evaluates, up to `max_attempts` times.
pub(crate) async fn cas_update<T, F>(
    store: &dyn CounterStore,
    key: &str,
    max_attempts: u32,
    ttl: Duration,
    mut step: F,
) -> StoreResult<LimitDecision>
where
    T: Serialize + DeserializeOwned + Send,
    F: FnMut(Option<T>) -> (Option<T>, LimitDecision) + Send,
{
    for attempt in 1..=max_attempts {
        let current = store.get(key).await?;
        let state = match &current {
            Some(bytes) => match serde_json::from_slice::<T>(bytes) {
                Ok(state) => Some(state),
                Err(e) => {
                    // overwritten by the swap below, which still expects these bytes
                    warn!(key, error = %e, "Discarding undecodable limiter state");
                    None
                }
            },
            None => None,
        };

        let (next, decision) = step(state);
        let Some(next) = next else {
            return Ok(decision);
        };

        let encoded = serde_json::to_vec(&next)?;
        if store
            .compare_and_set(key, current.as_deref(), &encoded, Some(ttl))
            .await?
        {
            return Ok(decision);
        }
        debug!(key, attempt, "Compare-and-set lost a race, retrying");
    }

    Err(StorageError::Contention {
        key: key.to_string(),
        attempts: max_attempts,
    })
}

/// Window length in whole milliseconds, never zero
pub(crate) fn window_millis(window: Duration) -> u64 {
    (window.as_millis() as u64).max(1)
}
