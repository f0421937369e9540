// for error definitions
use std::time::Duration;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum AdmissionError {
    /// The counter store could not complete an operation
    #[error("Counter store unavailable: {0}")]
    StoreUnavailable(#[from] StorageError),

    /// A circuit breaker rejected the call without attempting it
    #[error("Circuit breaker '{name}' is open, retry after {retry_after:?}")]
    BreakerOpen { name: String, retry_after: Duration },

    /// Every permitted attempt failed
    #[error("Retry exhausted after {attempts} attempts: {last_error}")]
    RetryExhausted { attempts: u32, last_error: String },

    /// The caller cancelled the operation while it was waiting to retry
    #[error("Cancelled after {attempts} attempts")]
    Cancelled { attempts: u32 },

    /// Configuration-related errors
    #[error("Configuration error: {0}")]
    Config(String),
}

/// Storage-specific errors
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum StorageError {
    /// Redis connection errors
    #[error("Redis connection error: {0}")]
    RedisConnection(String),

    // Redis authentication errors
    #[error("Redis authentication error: {0}")]
    RedisAuth(String),

    /// Redis command errors
    #[error("Redis command error: {0}")]
    RedisCommand(String),

    /// Data serialization/deserialization errors
    #[error("Data serialization error: {0}")]
    Serialization(String),

    /// The in-memory store refused a new key
    #[error("Maximum entries limit exceeded ({0})")]
    CapacityExceeded(usize),

    /// A compare-and-set loop kept losing races
    #[error("Compare-and-set on '{key}' failed after {attempts} attempts")]
    Contention { key: String, attempts: u32 },
}

impl StorageError {
    /// Whether the error reflects the backend being unreachable rather than bad data
    pub fn is_connectivity(&self) -> bool {
        matches!(
            self,
            StorageError::RedisConnection(_) | StorageError::RedisAuth(_)
        )
    }
}

// Implement conversions from redis::RedisError to StorageError
impl From<redis::RedisError> for StorageError {
    fn from(err: redis::RedisError) -> Self {
        match err.kind() {
            redis::ErrorKind::AuthenticationFailed => StorageError::RedisAuth(err.to_string()),
            redis::ErrorKind::IoError | redis::ErrorKind::ClientError => {
                // Connection-related errors
                StorageError::RedisConnection(err.to_string())
            }
            _ => StorageError::RedisCommand(err.to_string()),
        }
    }
}

impl From<serde_json::Error> for StorageError {
    fn from(err: serde_json::Error) -> Self {
        StorageError::Serialization(err.to_string())
    }
}

impl From<redis::RedisError> for AdmissionError {
    fn from(err: redis::RedisError) -> Self {
        AdmissionError::StoreUnavailable(err.into())
    }
}

impl From<serde_json::Error> for AdmissionError {
    fn from(err: serde_json::Error) -> Self {
        AdmissionError::StoreUnavailable(err.into())
    }
}

// define a Result type alias for convenience
pub type Result<T> = std::result::Result<T, AdmissionError>;
