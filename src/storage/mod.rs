// src/storage/mod.rs

pub mod fallback;
pub mod memory;
pub mod redis;

#[cfg(test)]
mod tests;

pub use fallback::FallbackStore;
pub use memory::MemoryStore;
pub use redis::RedisStore;

use crate::error::StorageError;
use async_trait::async_trait;
use std::fmt::Debug;
use std::sync::Arc;
use std::time::Duration;

/// Result type for store operations
pub type StoreResult<T> = std::result::Result<T, StorageError>;

/// Key-value capability the limiter is built on.
///
/// Values are opaque blobs, except for keys driven through [`increment`],
/// which hold a decimal integer. Every mutating call is atomic with respect to
/// other calls on the same key.
///
/// [`increment`]: CounterStore::increment
#[async_trait]
pub trait CounterStore: Send + Sync + Debug {
    /// Retrieves a value by key, `None` when absent or expired
    async fn get(&self, key: &str) -> StoreResult<Option<Vec<u8>>>;

    /// Stores `new` only if the current value equals `expected`.
    ///
    /// `expected == None` means "only if the key is absent". Returns whether
    /// the swap happened. A successful swap replaces the key's expiry with `ttl`.
    async fn compare_and_set(
        &self,
        key: &str,
        expected: Option<&[u8]>,
        new: &[u8],
        ttl: Option<Duration>,
    ) -> StoreResult<bool>;

    /// Atomically adds `delta` to an integer counter and returns the new value.
    ///
    /// A missing or expired key starts from zero and receives `ttl`; an existing
    /// key keeps its expiry.
    async fn increment(&self, key: &str, delta: i64, ttl: Option<Duration>) -> StoreResult<i64>;

    /// Deletes a key
    async fn delete(&self, key: &str) -> StoreResult<bool>;

    /// Checks that the backend is reachable
    async fn ping(&self) -> StoreResult<()>;
}

#[async_trait]
impl<T> CounterStore for Arc<T>
where
    T: CounterStore + ?Sized,
{
    async fn get(&self, key: &str) -> StoreResult<Option<Vec<u8>>> {
        (**self).get(key).await
    }

    async fn compare_and_set(
        &self,
        key: &str,
        expected: Option<&[u8]>,
        new: &[u8],
        ttl: Option<Duration>,
    ) -> StoreResult<bool> {
        (**self).compare_and_set(key, expected, new, ttl).await
    }

    async fn increment(&self, key: &str, delta: i64, ttl: Option<Duration>) -> StoreResult<i64> {
        (**self).increment(key, delta, ttl).await
    }

    async fn delete(&self, key: &str) -> StoreResult<bool> {
        (**self).delete(key).await
    }

    async fn ping(&self) -> StoreResult<()> {
        (**self).ping().await
    }
}

/// Parse a counter written by [`CounterStore::increment`]
pub fn decode_counter(bytes: &[u8]) -> Option<i64> {
    std::str::from_utf8(bytes).ok()?.trim().parse().ok()
}

/// Encode a counter the way Redis stores integers
pub fn encode_counter(value: i64) -> Vec<u8> {
    value.to_string().into_bytes()
}
