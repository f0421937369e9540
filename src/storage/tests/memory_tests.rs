use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Barrier;

use crate::clock::ManualClock;
use crate::config::InMemoryConfig;
use crate::error::StorageError;
use crate::storage::{CounterStore, MemoryStore};
use crate::test_utils::memory_store;

use super::common;

fn small_store(clock: &ManualClock, max_entries: usize) -> MemoryStore {
    let config = InMemoryConfig {
        max_entries,
        use_background_task: false,
        ..InMemoryConfig::default()
    };
    MemoryStore::with_clock(config, clock.shared())
}

#[tokio::test]
async fn test_memory_compare_and_set() {
    let store = memory_store(&ManualClock::at_epoch_hour(1));
    common::test_compare_and_set(&store, "cas").await.unwrap();
}

#[tokio::test]
async fn test_memory_increment() {
    let store = memory_store(&ManualClock::at_epoch_hour(1));
    common::test_increment(&store, "counter").await.unwrap();
}

#[tokio::test]
async fn test_expired_entries_read_as_absent() {
    let clock = ManualClock::at_epoch_hour(1);
    let store = memory_store(&clock);
    let ttl = Some(Duration::from_millis(100));

    assert!(store.compare_and_set("k", None, b"v", ttl).await.unwrap());
    clock.advance(Duration::from_millis(99));
    assert_eq!(store.get("k").await.unwrap().as_deref(), Some(&b"v"[..]));

    clock.advance(Duration::from_millis(1));
    assert_eq!(store.get("k").await.unwrap(), None);
    assert!(store.is_empty(), "expired entry should be dropped on read");

    // an expired key can be claimed again with an "absent" expectation
    assert!(store.compare_and_set("k", None, b"w", ttl).await.unwrap());
}

#[tokio::test]
async fn test_increment_keeps_expiry_of_existing_counter() {
    let clock = ManualClock::at_epoch_hour(1);
    let store = memory_store(&clock);

    store
        .increment("c", 1, Some(Duration::from_secs(1)))
        .await
        .unwrap();
    clock.advance(Duration::from_millis(600));
    // a later ttl does not push the expiry out
    store
        .increment("c", 1, Some(Duration::from_secs(1)))
        .await
        .unwrap();
    clock.advance(Duration::from_millis(400));

    assert_eq!(store.increment("c", 5, None).await.unwrap(), 5);
}

#[tokio::test]
async fn test_increment_rejects_non_integer_value() {
    let store = memory_store(&ManualClock::at_epoch_hour(1));
    store
        .compare_and_set("blob", None, b"{\"tokens\":1}", None)
        .await
        .unwrap();

    let result = store.increment("blob", 1, None).await;
    assert!(matches!(result, Err(StorageError::Serialization(_))));
}

#[tokio::test]
async fn test_capacity_limit_refuses_new_keys_only() {
    let clock = ManualClock::at_epoch_hour(1);
    let store = small_store(&clock, 2);

    store.increment("a", 1, None).await.unwrap();
    store.increment("b", 1, None).await.unwrap();

    assert_eq!(
        store.increment("c", 1, None).await,
        Err(StorageError::CapacityExceeded(2))
    );
    assert_eq!(
        store.compare_and_set("c", None, b"v", None).await,
        Err(StorageError::CapacityExceeded(2))
    );
    // existing keys keep working at capacity
    assert_eq!(store.increment("a", 1, None).await.unwrap(), 2);
}

#[tokio::test]
async fn test_purge_expired_frees_capacity() {
    let clock = ManualClock::at_epoch_hour(1);
    let store = small_store(&clock, 2);
    let ttl = Some(Duration::from_secs(1));

    store.increment("a", 1, ttl).await.unwrap();
    store.increment("b", 1, None).await.unwrap();
    clock.advance(Duration::from_secs(2));

    assert_eq!(store.purge_expired(), 1);
    assert_eq!(store.len(), 1);
    assert_eq!(store.increment("c", 1, None).await.unwrap(), 1);
}

#[tokio::test]
async fn test_expired_entries_do_not_count_against_capacity() {
    let clock = ManualClock::at_epoch_hour(1);
    let store = small_store(&clock, 2);
    let ttl = Some(Duration::from_secs(1));

    store.increment("a", 1, ttl).await.unwrap();
    store.increment("b", 1, ttl).await.unwrap();
    clock.advance(Duration::from_secs(2));

    // no sweeper ran; the full store must still make room
    assert_eq!(store.increment("c", 1, ttl).await.unwrap(), 1);
    assert!(store.compare_and_set("d", None, b"v", ttl).await.unwrap());
    assert_eq!(store.len(), 2);

    // live entries still fill it
    assert_eq!(
        store.increment("e", 1, ttl).await,
        Err(StorageError::CapacityExceeded(2))
    );
}

#[tokio::test(start_paused = true)]
async fn test_background_sweeper_purges_and_stops_with_store() {
    let clock = ManualClock::at_epoch_hour(1);
    let config = InMemoryConfig {
        max_entries: 10,
        use_background_task: true,
        cleanup_interval: Duration::from_secs(1),
    };
    let store = MemoryStore::with_clock(config, clock.shared());
    store
        .increment("short", 1, Some(Duration::from_millis(10)))
        .await
        .unwrap();

    clock.advance(Duration::from_secs(1));
    tokio::time::sleep(Duration::from_millis(1100)).await;
    assert_eq!(store.len(), 0, "sweeper should have removed the expired key");

    drop(store);
    // the sweeper's next tick finds the store gone and exits
    tokio::time::sleep(Duration::from_secs(2)).await;
}

#[tokio::test]
async fn test_concurrent_increments_are_atomic() {
    let store = memory_store(&ManualClock::at_epoch_hour(1));
    let tasks = 50;
    let barrier = Arc::new(Barrier::new(tasks));

    let handles: Vec<_> = (0..tasks)
        .map(|_| {
            let store = store.clone();
            let barrier = Arc::clone(&barrier);
            tokio::spawn(async move {
                barrier.wait().await;
                store.increment("shared", 2, None).await.unwrap()
            })
        })
        .collect();

    let mut seen: Vec<i64> = futures::future::join_all(handles)
        .await
        .into_iter()
        .map(|r| r.unwrap())
        .collect();
    seen.sort_unstable();

    let expected: Vec<i64> = (1..=tasks as i64).map(|i| i * 2).collect();
    assert_eq!(seen, expected, "every increment must observe a distinct total");
}

#[tokio::test]
async fn test_concurrent_compare_and_set_has_one_winner() {
    let store = memory_store(&ManualClock::at_epoch_hour(1));
    store.compare_and_set("k", None, b"0", None).await.unwrap();

    let handles: Vec<_> = (0..20)
        .map(|i| {
            let store = store.clone();
            tokio::spawn(async move {
                let value = format!("{}", i + 1);
                store
                    .compare_and_set("k", Some(&b"0"[..]), value.as_bytes(), None)
                    .await
                    .unwrap()
            })
        })
        .collect();

    let winners = futures::future::join_all(handles)
        .await
        .into_iter()
        .filter(|r| *r.as_ref().unwrap())
        .count();
    assert_eq!(winners, 1);
}

#[test]
fn test_store_without_runtime_skips_sweeper() {
    // no tokio runtime here; construction must still succeed
    let store = MemoryStore::new(InMemoryConfig::default());
    assert!(store.is_empty());
}
