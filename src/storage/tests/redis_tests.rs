// Tests against a live Redis at localhost:6379; each test returns early when
// none is reachable.
use std::time::Duration;

use crate::config::RedisConfig;
use crate::error::StorageError;
use crate::storage::{CounterStore, RedisStore};

use super::common;

fn test_config(url: &str) -> RedisConfig {
    RedisConfig {
        url: url.to_string(),
        connection_timeout: Duration::from_millis(300),
        command_timeout: Duration::from_millis(500),
    }
}

async fn available_redis() -> Option<RedisStore> {
    let redis = RedisStore::new(test_config("redis://localhost:6379")).await.ok()?;
    redis.ping().await.ok()?;
    Some(redis)
}

fn unique_key(name: &str) -> String {
    format!("admission_test:{}:{}", name, rand::random::<u64>())
}

#[tokio::test]
async fn test_redis_compare_and_set() {
    let Some(redis) = available_redis().await else {
        println!("Redis not available, skipping test_redis_compare_and_set");
        return;
    };
    common::test_compare_and_set(&redis, &unique_key("cas"))
        .await
        .unwrap();
}

#[tokio::test]
async fn test_redis_increment() {
    let Some(redis) = available_redis().await else {
        println!("Redis not available, skipping test_redis_increment");
        return;
    };
    common::test_increment(&redis, &unique_key("incr")).await.unwrap();
}

#[tokio::test]
async fn test_redis_ttl_is_applied() {
    let Some(redis) = available_redis().await else {
        println!("Redis not available, skipping test_redis_ttl_is_applied");
        return;
    };
    let key = unique_key("ttl");

    redis
        .increment(&key, 1, Some(Duration::from_millis(200)))
        .await
        .unwrap();
    tokio::time::sleep(Duration::from_millis(400)).await;
    assert_eq!(redis.get(&key).await.unwrap(), None);
}

#[tokio::test]
async fn test_unreachable_redis_is_a_connection_error() {
    let result = RedisStore::new(test_config("redis://127.0.0.1:1")).await;
    match result {
        Err(e) => assert!(e.is_connectivity(), "unexpected error {:?}", e),
        // some connection managers connect lazily; then the first command fails
        Ok(redis) => {
            let err = redis.ping().await.unwrap_err();
            assert!(
                matches!(err, StorageError::RedisConnection(_) | StorageError::RedisCommand(_)),
                "unexpected error {:?}",
                err
            );
        }
    }
}

#[tokio::test]
async fn test_invalid_url_is_rejected() {
    let result = RedisStore::new(test_config("not a url")).await;
    assert!(matches!(result, Err(StorageError::RedisConnection(_))));
}
