// src/algorithms/sliding_window.rs

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::time::Duration;

use crate::algorithms::{cas_update, window_millis, LimitDecision, RateLimitAlgorithm};
use crate::config::SlidingWindowConfig;
use crate::storage::{CounterStore, StoreResult};

/// Counters for the current and previous windows of one key
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct SlidingWindowState {
    /// Start of the current window, milliseconds since the epoch
    pub window_start: u64,
    /// Cost admitted in the current window
    pub current: u64,
    /// Cost admitted in the window before it
    pub previous: u64,
}

impl SlidingWindowState {
    /// Weighted count at `now_ms`: the previous window's share shrinks
    /// linearly as the current window elapses
    pub fn estimate_at(&self, now_ms: u64, window_ms: u64) -> f64 {
        let elapsed = now_ms.saturating_sub(self.window_start).min(window_ms);
        let remaining_fraction = 1.0 - elapsed as f64 / window_ms as f64;
        self.current as f64 + self.previous as f64 * remaining_fraction
    }
}

/// Sliding Window rate limiting algorithm
///
/// Approximates a rolling window from two fixed-window counters, kept in a
/// single state blob updated through compare-and-set.
#[derive(Debug, Clone)]
pub struct SlidingWindow {
    /// Configuration for the sliding window
    config: SlidingWindowConfig,
    max_cas_attempts: u32,
}

impl SlidingWindow {
    pub fn new(config: SlidingWindowConfig, max_cas_attempts: u32) -> Self {
        Self {
            config,
            max_cas_attempts: max_cas_attempts.max(1),
        }
    }

    pub fn config(&self) -> &SlidingWindowConfig {
        &self.config
    }

    fn window_ms(&self) -> u64 {
        window_millis(self.config.window)
    }

    /// State shifted so that it describes the window containing `now_ms`
    pub fn roll(&self, state: Option<SlidingWindowState>, now_ms: u64) -> SlidingWindowState {
        let window_ms = self.window_ms();
        let start = now_ms - now_ms % window_ms;
        match state {
            // a clock that stepped back keeps counting in the stored window
            Some(state) if state.window_start >= start => state,
            Some(state) if state.window_start + window_ms == start => SlidingWindowState {
                window_start: start,
                current: 0,
                previous: state.current,
            },
            _ => SlidingWindowState {
                window_start: start,
                current: 0,
                previous: 0,
            },
        }
    }

    /// Pure evaluation: the state to store (if any) and the decision
    pub fn step(
        &self,
        state: Option<SlidingWindowState>,
        now: Duration,
        cost: u64,
    ) -> (Option<SlidingWindowState>, LimitDecision) {
        let limit = self.config.max_requests;
        let window_ms = self.window_ms();
        let now_ms = now.as_millis() as u64;

        let mut state = self.roll(state, now_ms);
        let estimate = state.estimate_at(now_ms, window_ms);
        let allowed = estimate + cost as f64 <= limit as f64;

        let used = if allowed { estimate + cost as f64 } else { estimate };
        let remaining = (limit as f64 - used).max(0.0).floor() as u64;
        let reset_at = Duration::from_millis(state.window_start + window_ms);

        let retry_after = if allowed || cost > limit {
            None
        } else {
            Some(self.retry_after(&state, estimate, cost, now_ms, reset_at.saturating_sub(now)))
        };

        let decision = LimitDecision::new(allowed, limit, remaining, now, reset_at, retry_after);

        if allowed && cost > 0 {
            state.current += cost;
            (Some(state), decision)
        } else {
            (None, decision)
        }
    }

    /// Lower bound on the wait: the previous window's weight decays at
    /// `previous / window` per millisecond until the window ends
    fn retry_after(
        &self,
        state: &SlidingWindowState,
        estimate: f64,
        cost: u64,
        now_ms: u64,
        until_reset: Duration,
    ) -> Duration {
        let excess = estimate + cost as f64 - self.config.max_requests as f64;
        if state.previous == 0 || excess <= 0.0 {
            return until_reset;
        }
        let decay_per_ms = state.previous as f64 / self.window_ms() as f64;
        let wait_ms = (excess / decay_per_ms).ceil() as u64;
        let window_left_ms = (state.window_start + self.window_ms()).saturating_sub(now_ms);
        Duration::from_millis(wait_ms.min(window_left_ms))
    }

    /// State stays useful for two windows
    fn ttl(&self) -> Duration {
        self.config.window * 2 + Duration::from_secs(1)
    }
}

#[async_trait]
impl RateLimitAlgorithm for SlidingWindow {
    fn name(&self) -> &'static str {
        "sliding_window"
    }

    fn namespace(&self) -> &'static str {
        "sw"
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
        cas_update(store, key, self.max_cas_attempts, self.ttl(), |state| {
            self.step(state, now, cost)
        })
        .await
    }
}
