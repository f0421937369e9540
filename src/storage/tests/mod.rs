// src/storage/tests/mod.rs

mod memory_tests;
mod redis_tests;

// Behaviour every CounterStore must share
pub(crate) mod common {
    use crate::storage::{decode_counter, CounterStore, StoreResult};
    use std::time::Duration;

    pub async fn test_compare_and_set<S: CounterStore>(store: &S, key: &str) -> StoreResult<()> {
        // absent key: only an "expect absent" swap succeeds
        assert!(!store.compare_and_set(key, Some(&b"x"[..]), b"v1", None).await?);
        assert!(store.compare_and_set(key, None, b"v1", None).await?);
        assert_eq!(store.get(key).await?.as_deref(), Some(&b"v1"[..]));

        // present key: stale expectations lose
        assert!(!store.compare_and_set(key, None, b"v2", None).await?);
        assert!(!store.compare_and_set(key, Some(&b"v0"[..]), b"v2", None).await?);
        assert!(store.compare_and_set(key, Some(&b"v1"[..]), b"v2", None).await?);
        assert_eq!(store.get(key).await?.as_deref(), Some(&b"v2"[..]));

        assert!(store.delete(key).await?);
        assert!(!store.delete(key).await?);
        assert_eq!(store.get(key).await?, None);
        Ok(())
    }

    pub async fn test_increment<S: CounterStore>(store: &S, key: &str) -> StoreResult<()> {
        let ttl = Some(Duration::from_secs(60));
        assert_eq!(store.increment(key, 1, ttl).await?, 1);
        assert_eq!(store.increment(key, 3, ttl).await?, 4);
        assert_eq!(store.increment(key, -2, ttl).await?, 2);

        let stored = store.get(key).await?;
        assert_eq!(stored.as_deref().and_then(decode_counter), Some(2));

        store.delete(key).await?;
        Ok(())
    }
}
