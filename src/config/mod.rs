// src/config/mod.rs

mod rate;

pub use rate::{Rate, RateParseError};

use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;

use crate::algorithms::Strategy;
use crate::error::{AdmissionError, Result};
use crate::resilience::{CircuitBreakerConfig, RetryConfig};

/// What a limiter answers when the counter store fails
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FailurePolicy {
    /// Admit the request (availability over strictness)
    #[default]
    FailOpen,
    /// Deny the request
    FailClosed,
}

/// Configuration for a single rate limiter instance
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LimiterConfig {
    /// When false every check is admitted without touching the store
    #[serde(default = "default_enabled")]
    pub enabled: bool,

    /// Key prefix to use for all keys in storage
    #[serde(default = "default_key_prefix")]
    pub key_prefix: String,

    /// Limiting strategy and its parameters
    pub strategy: Strategy,

    /// Behaviour when the store is unavailable
    #[serde(default)]
    pub failure_policy: FailurePolicy,

    /// Upper bound on compare-and-set retries for a single check
    #[serde(default = "default_max_cas_attempts")]
    pub max_cas_attempts: u32,

    /// Keys that are always admitted
    #[serde(default)]
    pub exempt_keys: Vec<String>,

    /// Keys that are always denied
    #[serde(default)]
    pub blocked_keys: Vec<String>,
}

impl LimiterConfig {
    /// Config with defaults for everything but the strategy
    pub fn new(strategy: Strategy) -> Self {
        Self {
            enabled: default_enabled(),
            key_prefix: default_key_prefix(),
            strategy,
            failure_policy: FailurePolicy::default(),
            max_cas_attempts: default_max_cas_attempts(),
            exempt_keys: Vec::new(),
            blocked_keys: Vec::new(),
        }
    }

    pub fn with_key_prefix(mut self, prefix: impl Into<String>) -> Self {
        self.key_prefix = prefix.into();
        self
    }

    pub fn with_failure_policy(mut self, policy: FailurePolicy) -> Self {
        self.failure_policy = policy;
        self
    }

    pub fn validate(&self) -> Result<()> {
        if self.key_prefix.is_empty() {
            return Err(AdmissionError::Config("key_prefix must not be empty".into()));
        }
        if self.max_cas_attempts == 0 {
            return Err(AdmissionError::Config(
                "max_cas_attempts must be at least 1".into(),
            ));
        }
        self.strategy.validate()
    }
}

fn default_enabled() -> bool {
    true
}

fn default_key_prefix() -> String {
    "ratelimit".to_string()
}

fn default_max_cas_attempts() -> u32 {
    64
}

/// Configuration for token bucket algorithm
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct TokenBucketConfig {
    /// Capacity of the token bucket
    pub capacity: u64,

    /// Rate at which tokens are refilled (tokens per second)
    pub refill_rate: f64,

    /// Initial token count, full capacity when absent
    #[serde(default)]
    pub initial_tokens: Option<u64>,
}

/// Configuration for fixed window algorithm
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct FixedWindowConfig {
    /// Maximum cost admitted per window
    pub max_requests: u64,

    /// Window duration
    #[serde(with = "duration_serde")]
    pub window: Duration,
}

/// Configuration for sliding window algorithm
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct SlidingWindowConfig {
    /// Maximum cost admitted in any window-sized span (approximately)
    pub max_requests: u64,

    /// Window duration
    #[serde(with = "duration_serde")]
    pub window: Duration,
}

/// Configuration for Redis storage backend
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RedisConfig {
    /// Redis connection URL
    pub url: String,

    /// Connection timeout
    #[serde(default = "default_conn_timeout", with = "duration_serde")]
    pub connection_timeout: Duration,

    /// Per-command timeout
    #[serde(default = "default_command_timeout", with = "duration_serde")]
    pub command_timeout: Duration,
}

impl RedisConfig {
    pub fn new(url: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            connection_timeout: default_conn_timeout(),
            command_timeout: default_command_timeout(),
        }
    }
}

fn default_conn_timeout() -> Duration {
    Duration::from_secs(2)
}

fn default_command_timeout() -> Duration {
    Duration::from_millis(500)
}

/// Configuration for in-memory storage backend
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct InMemoryConfig {
    /// Maximum number of entries to store
    #[serde(default = "default_max_entries")]
    pub max_entries: usize,

    /// Whether to use a background task for expiration
    #[serde(default = "default_use_background_task")]
    pub use_background_task: bool,

    /// How often to run the background expiration task
    #[serde(default = "default_cleanup_interval", with = "duration_serde")]
    pub cleanup_interval: Duration,
}

// serde defaults only apply when deserializing, so Default mirrors them
impl Default for InMemoryConfig {
    fn default() -> Self {
        Self {
            max_entries: default_max_entries(),
            use_background_task: default_use_background_task(),
            cleanup_interval: default_cleanup_interval(),
        }
    }
}

fn default_max_entries() -> usize {
    10_000
}

fn default_use_background_task() -> bool {
    true
}

fn default_cleanup_interval() -> Duration {
    Duration::from_secs(60)
}

/// Everything needed to assemble the admission stack
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AdmissionConfig {
    pub limiter: LimiterConfig,

    #[serde(default)]
    pub breaker: CircuitBreakerConfig,

    #[serde(default)]
    pub retry: RetryConfig,

    #[serde(default)]
    pub memory: InMemoryConfig,

    /// Distributed store; the in-memory store is used alone when absent
    #[serde(default)]
    pub redis: Option<RedisConfig>,
}

impl AdmissionConfig {
    pub fn new(limiter: LimiterConfig) -> Self {
        Self {
            limiter,
            breaker: CircuitBreakerConfig::default(),
            retry: RetryConfig::default(),
            memory: InMemoryConfig::default(),
            redis: None,
        }
    }

    /// Parse and validate a JSON document
    pub fn from_json_str(json: &str) -> Result<Self> {
        let config: Self = serde_json::from_str(json)
            .map_err(|e| AdmissionError::Config(format!("invalid configuration: {}", e)))?;
        config.validate()?;
        Ok(config)
    }

    /// Read, parse and validate a JSON file
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let contents = std::fs::read_to_string(path).map_err(|e| {
            AdmissionError::Config(format!("cannot read {}: {}", path.display(), e))
        })?;
        Self::from_json_str(&contents)
    }

    pub fn validate(&self) -> Result<()> {
        self.limiter.validate()?;
        self.breaker.validate()?;
        self.retry.validate()?;
        if self.memory.max_entries == 0 {
            return Err(AdmissionError::Config(
                "memory.max_entries must be at least 1".into(),
            ));
        }
        Ok(())
    }
}

// Helper module to serialize/deserialize Duration with serde
pub(crate) mod duration_serde {
    use serde::{Deserialize, Deserializer, Serializer};
    use std::time::Duration;

    pub fn serialize<S>(duration: &Duration, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        serializer.serialize_u64(duration.as_millis() as u64)
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Duration, D::Error>
    where
        D: Deserializer<'de>,
    {
        let millis = u64::deserialize(deserializer)?;
        Ok(Duration::from_millis(millis))
    }
}
