// src/algorithms/fixed_window.rs

use async_trait::async_trait;
use std::time::Duration;

use crate::algorithms::{window_millis, LimitDecision, RateLimitAlgorithm};
use crate::config::FixedWindowConfig;
use crate::storage::{decode_counter, CounterStore, StoreResult};

/// Fixed Window rate limiting algorithm
///
/// Time is divided into epoch-aligned windows and each window has its own
/// counter key, so a new window starts from zero without any reset step.
/// Every attempt is counted, denied ones included. Up to twice the limit can
/// pass across a window boundary.
#[derive(Debug, Clone)]
pub struct FixedWindow {
    /// Configuration for the fixed window
    config: FixedWindowConfig,
}

impl FixedWindow {
    pub fn new(config: FixedWindowConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &FixedWindowConfig {
        &self.config
    }

    /// Start of the window containing `now`, in milliseconds
    pub fn window_start(&self, now: Duration) -> u64 {
        let now_ms = now.as_millis() as u64;
        now_ms - now_ms % window_millis(self.config.window)
    }

    fn counter_key(key: &str, window_start: u64) -> String {
        format!("{}:{}", key, window_start)
    }

    /// Counter keys outlive their window by a second
    fn ttl(&self) -> Duration {
        self.config.window + Duration::from_secs(1)
    }

    /// Decision given the window total including this request's cost
    fn decide(&self, total: u64, cost: u64, window_start: u64, now: Duration) -> LimitDecision {
        let limit = self.config.max_requests;
        let reset_at = Duration::from_millis(window_start + window_millis(self.config.window));
        let allowed = total <= limit;
        // a cost above the limit never fits in any window
        let retry_after = (cost <= limit).then(|| reset_at.saturating_sub(now));
        LimitDecision::new(
            allowed,
            limit,
            limit.saturating_sub(total),
            now,
            reset_at,
            retry_after,
        )
    }
}

#[async_trait]
impl RateLimitAlgorithm for FixedWindow {
    fn name(&self) -> &'static str {
        "fixed_window"
    }

    fn namespace(&self) -> &'static str {
        "fw"
    }

    fn limit(&self) -> u64 {
        self.config.max_requests
    }

    async fn check(
        &self,
        store: &dyn CounterStore,
        key: &str,
        cost: u64,
        now: Duration,
    ) -> StoreResult<LimitDecision> {
        let window_start = self.window_start(now);
        let counter_key = Self::counter_key(key, window_start);

        let total = if cost == 0 {
            store
                .get(&counter_key)
                .await?
                .as_deref()
                .and_then(decode_counter)
                .unwrap_or(0)
        } else {
            let delta = i64::try_from(cost).unwrap_or(i64::MAX);
            store
                .increment(&counter_key, delta, Some(self.ttl()))
                .await?
        };

        Ok(self.decide(total.max(0) as u64, cost, window_start, now))
    }
}
