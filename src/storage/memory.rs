// src/storage/memory.rs

// In-process counter store, sharded so unrelated keys never contend.
use async_trait::async_trait;
use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use std::sync::{Arc, Weak};
use std::time::Duration;
use tokio::runtime::Handle;
use tokio::time;
use tracing::debug;

use crate::clock::{SharedClock, SystemClock};
use crate::config::InMemoryConfig;
use crate::error::StorageError;
use crate::storage::{decode_counter, encode_counter, CounterStore, StoreResult};

/// Entry in the in-memory storage
#[derive(Debug, Clone)]
struct MemoryEntry {
    value: Vec<u8>,
    /// Clock time after which the entry is gone
    expires_at: Option<Duration>,
}

impl MemoryEntry {
    fn new(value: Vec<u8>, now: Duration, ttl: Option<Duration>) -> Self {
        Self {
            value,
            expires_at: ttl.map(|ttl| now + ttl),
        }
    }

    fn is_expired(&self, now: Duration) -> bool {
        matches!(self.expires_at, Some(at) if at <= now)
    }
}

#[derive(Debug)]
struct Inner {
    data: DashMap<String, MemoryEntry>,
    config: InMemoryConfig,
    clock: SharedClock,
}

impl Inner {
    fn purge_expired(&self) -> usize {
        let now = self.clock.now();
        let before = self.data.len();
        self.data.retain(|_, entry| !entry.is_expired(now));
        before.saturating_sub(self.data.len())
    }

    /// Whether a new `key` would exceed `max_entries` live entries.
    ///
    /// Expired entries are purged before refusing. Must be called before
    /// taking an entry guard: `len` and `retain` visit every shard.
    fn at_capacity_for(&self, key: &str) -> bool {
        let full = || self.data.len() >= self.config.max_entries && !self.data.contains_key(key);
        if !full() {
            return false;
        }
        let removed = self.purge_expired();
        if removed > 0 {
            debug!(removed, "Purged expired entries to make room");
        }
        full()
    }
}

/// In-memory storage backend implementation
///
/// Cloning yields another handle to the same data.
#[derive(Debug, Clone)]
pub struct MemoryStore {
    inner: Arc<Inner>,
}

impl MemoryStore {
    /// Creates a new in-memory store reading system time
    pub fn new(config: InMemoryConfig) -> Self {
        Self::with_clock(config, SystemClock::shared())
    }

    /// Creates a new in-memory store whose expiry follows `clock`
    ///
    /// The background sweeper is only started when a tokio runtime is
    /// available; expired entries are dropped lazily either way.
    pub fn with_clock(config: InMemoryConfig, clock: SharedClock) -> Self {
        let inner = Arc::new(Inner {
            data: DashMap::with_capacity(config.max_entries.min(10_000)),
            config,
            clock,
        });

        if inner.config.use_background_task {
            if let Ok(handle) = Handle::try_current() {
                Self::spawn_sweeper(&handle, Arc::downgrade(&inner), inner.config.cleanup_interval);
            }
        }

        Self { inner }
    }

    // The task holds a weak reference and exits once the store is dropped.
    fn spawn_sweeper(handle: &Handle, inner: Weak<Inner>, period: Duration) {
        handle.spawn(async move {
            let mut interval = time::interval(period);
            // the first tick completes immediately
            interval.tick().await;
            loop {
                interval.tick().await;
                match inner.upgrade() {
                    Some(inner) => {
                        let removed = inner.purge_expired();
                        if removed > 0 {
                            debug!(removed, "Purged expired entries from memory store");
                        }
                    }
                    None => break,
                }
            }
        });
    }

    /// Remove every expired entry now, returning how many were dropped
    pub fn purge_expired(&self) -> usize {
        self.inner.purge_expired()
    }

    /// Number of stored entries, including expired ones not yet purged
    pub fn len(&self) -> usize {
        self.inner.data.len()
    }

    pub fn is_empty(&self) -> bool {
        self.inner.data.is_empty()
    }
}

#[async_trait]
impl CounterStore for MemoryStore {
    async fn get(&self, key: &str) -> StoreResult<Option<Vec<u8>>> {
        let now = self.inner.clock.now();

        let expired = match self.inner.data.get(key) {
            Some(entry) if !entry.is_expired(now) => return Ok(Some(entry.value.clone())),
            Some(_) => true,
            None => false,
        };

        if expired {
            self.inner
                .data
                .remove_if(key, |_, entry| entry.is_expired(now));
        }
        Ok(None)
    }

    async fn compare_and_set(
        &self,
        key: &str,
        expected: Option<&[u8]>,
        new: &[u8],
        ttl: Option<Duration>,
    ) -> StoreResult<bool> {
        let now = self.inner.clock.now();
        let at_capacity = self.inner.at_capacity_for(key);

        match self.inner.data.entry(key.to_string()) {
            Entry::Occupied(mut occupied) => {
                let current = if occupied.get().is_expired(now) {
                    None
                } else {
                    Some(occupied.get().value.as_slice())
                };
                if current != expected {
                    return Ok(false);
                }
                occupied.insert(MemoryEntry::new(new.to_vec(), now, ttl));
                Ok(true)
            }
            Entry::Vacant(vacant) => {
                if expected.is_some() {
                    return Ok(false);
                }
                if at_capacity {
                    return Err(StorageError::CapacityExceeded(
                        self.inner.config.max_entries,
                    ));
                }
                vacant.insert(MemoryEntry::new(new.to_vec(), now, ttl));
                Ok(true)
            }
        }
    }

    async fn increment(&self, key: &str, delta: i64, ttl: Option<Duration>) -> StoreResult<i64> {
        let now = self.inner.clock.now();
        let at_capacity = self.inner.at_capacity_for(key);

        match self.inner.data.entry(key.to_string()) {
            Entry::Occupied(mut occupied) => {
                if occupied.get().is_expired(now) {
                    occupied.insert(MemoryEntry::new(encode_counter(delta), now, ttl));
                    return Ok(delta);
                }

                let entry = occupied.get_mut();
                let current = decode_counter(&entry.value).ok_or_else(|| {
                    StorageError::Serialization(format!("value at '{}' is not an integer", key))
                })?;
                let updated = current.checked_add(delta).ok_or_else(|| {
                    StorageError::Serialization(format!("increment of '{}' overflows", key))
                })?;
                entry.value = encode_counter(updated);
                Ok(updated)
            }
            Entry::Vacant(vacant) => {
                if at_capacity {
                    return Err(StorageError::CapacityExceeded(
                        self.inner.config.max_entries,
                    ));
                }
                vacant.insert(MemoryEntry::new(encode_counter(delta), now, ttl));
                Ok(delta)
            }
        }
    }

    async fn delete(&self, key: &str) -> StoreResult<bool> {
        Ok(self.inner.data.remove(key).is_some())
    }

    async fn ping(&self) -> StoreResult<()> {
        Ok(())
    }
}
