// src/config/rate.rs

use std::fmt;
use std::str::FromStr;
use std::time::Duration;
use thiserror::Error;

use crate::algorithms::Strategy;
use crate::config::{FixedWindowConfig, SlidingWindowConfig, TokenBucketConfig};

/// Errors produced while parsing a rate string
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum RateParseError {
    #[error("Invalid rate format: '{0}'. Use 'count/period' like '10/minute'")]
    Format(String),

    #[error("Invalid count in rate '{0}'")]
    Count(String),

    #[error("Unknown time period: '{0}'. Use second/minute/hour/day")]
    Period(String),
}

/// A request budget such as `100/minute`
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Rate {
    pub count: u64,
    pub per: Duration,
}

impl Rate {
    pub fn new(count: u64, per: Duration) -> Self {
        Self { count, per }
    }

    pub fn fixed_window(self) -> Strategy {
        Strategy::FixedWindow(FixedWindowConfig {
            max_requests: self.count,
            window: self.per,
        })
    }

    pub fn sliding_window(self) -> Strategy {
        Strategy::SlidingWindow(SlidingWindowConfig {
            max_requests: self.count,
            window: self.per,
        })
    }

    /// Bucket holding `count` tokens, refilled at `count / per`
    pub fn token_bucket(self) -> Strategy {
        let per_secs = self.per.as_secs_f64();
        let refill_rate = if per_secs > 0.0 {
            self.count as f64 / per_secs
        } else {
            0.0
        };
        Strategy::TokenBucket(TokenBucketConfig {
            capacity: self.count,
            refill_rate,
            initial_tokens: None,
        })
    }
}

impl FromStr for Rate {
    type Err = RateParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let (count, period) = s
            .trim()
            .split_once('/')
            .ok_or_else(|| RateParseError::Format(s.to_string()))?;
        if period.contains('/') {
            return Err(RateParseError::Format(s.to_string()));
        }

        let count: u64 = count
            .trim()
            .parse()
            .map_err(|_| RateParseError::Count(s.to_string()))?;

        let period = period.trim().to_lowercase();
        let seconds = match period.as_str() {
            "s" | "sec" | "second" => 1,
            "m" | "min" | "minute" => 60,
            "h" | "hr" | "hour" => 3600,
            "d" | "day" => 86_400,
            _ => return Err(RateParseError::Period(period)),
        };

        Ok(Self::new(count, Duration::from_secs(seconds)))
    }
}

impl fmt::Display for Rate {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let period = match self.per.as_secs() {
            1 => "second".to_string(),
            60 => "minute".to_string(),
            3600 => "hour".to_string(),
            86_400 => "day".to_string(),
            _ => format!("{:?}", self.per),
        };
        write!(f, "{}/{}", self.count, period)
    }
}
