use serde::{Deserialize, Serialize};
use std::time::Duration;

use crate::error::{AdmissionError, Result};

/// Configuration for retry strategy
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RetryConfig {
    /// Total attempts, the first call included
    pub max_attempts: u32,
    /// Delay after the first failure
    #[serde(with = "crate::config::duration_serde")]
    pub base_delay: Duration,
    /// Cap applied before jitter
    #[serde(with = "crate::config::duration_serde")]
    pub max_delay: Duration,
    /// Fraction of each delay that is randomized, in `[0, 1]`
    pub jitter_factor: f64,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            base_delay: Duration::from_millis(100),
            max_delay: Duration::from_secs(5),
            jitter_factor: 0.5,
        }
    }
}

impl RetryConfig {
    pub fn validate(&self) -> Result<()> {
        if self.max_attempts == 0 {
            return Err(AdmissionError::Config(
                "retry.max_attempts must be at least 1".into(),
            ));
        }
        if !(0.0..=1.0).contains(&self.jitter_factor) {
            return Err(AdmissionError::Config(format!(
                "retry.jitter_factor must be within [0, 1], got {}",
                self.jitter_factor
            )));
        }
        Ok(())
    }

    /// Same config without randomization
    pub fn without_jitter(mut self) -> Self {
        self.jitter_factor = 0.0;
        self
    }
}

/// Exponential backoff implementation for retries
#[derive(Debug, Clone)]
pub struct ExponentialBackoff {
    /// Attempts that have failed so far
    current_attempt: u32,
    config: RetryConfig,
}

impl ExponentialBackoff {
    /// Create a new exponential backoff with the given configuration
    pub fn new(config: RetryConfig) -> Self {
        Self {
            current_attempt: 0,
            config,
        }
    }

    /// `min(max_delay, base_delay * 2^(attempt - 1))` for 1-based `attempt`
    pub fn capped_delay(config: &RetryConfig, attempt: u32) -> Duration {
        let exp = attempt.saturating_sub(1);
        2u32.checked_pow(exp)
            .and_then(|factor| config.base_delay.checked_mul(factor))
            .map_or(config.max_delay, |delay| delay.min(config.max_delay))
    }

    /// Scale `delay` into `[delay * (1 - jitter), delay]` using `sample` in `[0, 1)`
    ///
    /// A jitter factor above 1 acts as 1; a NaN or non-positive one disables
    /// jitter.
    pub fn apply_jitter(delay: Duration, jitter_factor: f64, sample: f64) -> Duration {
        if !(jitter_factor > 0.0) {
            return delay;
        }
        let factor = jitter_factor.min(1.0);
        let sample = if sample.is_nan() { 1.0 } else { sample.clamp(0.0, 1.0) };
        delay.mul_f64(1.0 - factor + factor * sample)
    }

    /// Delay to wait after the current failure, or `None` once no attempts remain
    pub fn next_backoff(&mut self) -> Option<Duration> {
        self.current_attempt += 1;

        if self.current_attempt >= self.config.max_attempts {
            return None;
        }

        let delay = Self::capped_delay(&self.config, self.current_attempt);
        Some(Self::apply_jitter(
            delay,
            self.config.jitter_factor,
            rand::random::<f64>(),
        ))
    }

    /// Attempts consumed so far
    pub fn attempts(&self) -> u32 {
        self.current_attempt
    }

    /// Reset the backoff to start from the beginning
    pub fn reset(&mut self) {
        self.current_attempt = 0;
    }
}
