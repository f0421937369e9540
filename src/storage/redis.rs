// src/storage/redis.rs

use async_trait::async_trait;
use redis::{aio::ConnectionManager, AsyncCommands, Client, RedisResult, Script};
use std::fmt;
use std::future::Future;
use std::sync::Arc;
use std::time::{Duration, Instant};

use crate::config::RedisConfig;
use crate::error::StorageError;
use crate::storage::{CounterStore, StoreResult};

// ARGV: expected-present flag, expected value, new value, ttl in ms (0 = none)
const COMPARE_AND_SET: &str = r#"
local current = redis.call('GET', KEYS[1])
if ARGV[1] == '0' then
  if current then return 0 end
elseif current ~= ARGV[2] then
  return 0
end
local ttl = tonumber(ARGV[4])
if ttl > 0 then
  redis.call('SET', KEYS[1], ARGV[3], 'PX', ttl)
else
  redis.call('SET', KEYS[1], ARGV[3])
end
return 1
"#;

// ARGV: delta, ttl in ms applied only when the key has no expiry yet
const INCREMENT: &str = r#"
local value = redis.call('INCRBY', KEYS[1], ARGV[1])
local ttl = tonumber(ARGV[2])
if ttl > 0 and redis.call('PTTL', KEYS[1]) == -1 then
  redis.call('PEXPIRE', KEYS[1], ttl)
end
return value
"#;

/// Counter store shared by every process that points at the same Redis.
///
/// Both mutating operations run as server-side scripts, so each is a single
/// atomic step no matter how many clients race on the key.
#[derive(Clone)]
pub struct RedisStore {
    connection: ConnectionManager,
    config: RedisConfig,
    cas_script: Arc<Script>,
    increment_script: Arc<Script>,
}

impl fmt::Debug for RedisStore {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RedisStore")
            .field("url", &self.config.url)
            .field("command_timeout", &self.config.command_timeout)
            .finish()
    }
}

impl RedisStore {
    /// Connects to Redis, failing if no connection is made within
    /// `connection_timeout`
    pub async fn new(config: RedisConfig) -> StoreResult<Self> {
        // Open the client - this doesn't actually connect to Redis yet
        let client = Client::open(config.url.as_str())
            .map_err(|e| StorageError::RedisConnection(e.to_string()))?;

        let connection =
            match tokio::time::timeout(config.connection_timeout, ConnectionManager::new(client))
                .await
            {
                Ok(result) => result.map_err(StorageError::from)?,
                Err(_) => {
                    return Err(StorageError::RedisConnection(format!(
                        "Connection to Redis at {} timed out after {:?}",
                        config.url, config.connection_timeout
                    )));
                }
            };

        Ok(Self {
            connection,
            config,
            cas_script: Arc::new(Script::new(COMPARE_AND_SET)),
            increment_script: Arc::new(Script::new(INCREMENT)),
        })
    }

    pub fn config(&self) -> &RedisConfig {
        &self.config
    }

    /// Runs one command under the configured command timeout
    async fn timed<T, F>(&self, operation: &'static str, key: &str, command: F) -> StoreResult<T>
    where
        F: Future<Output = RedisResult<T>>,
    {
        let started = Instant::now();
        let result = match tokio::time::timeout(self.config.command_timeout, command).await {
            Ok(result) => result.map_err(StorageError::from),
            Err(_) => Err(StorageError::RedisConnection(format!(
                "Redis {} timed out after {:?}",
                operation, self.config.command_timeout
            ))),
        };
        crate::storage_op!(operation, key, result, started.elapsed().as_millis() as u64);
        result
    }
}

fn ttl_millis(ttl: Option<Duration>) -> u64 {
    // a zero-millisecond TTL would mean "no expiry" to the scripts
    ttl.map_or(0, |ttl| (ttl.as_millis() as u64).max(1))
}

#[async_trait]
impl CounterStore for RedisStore {
    async fn get(&self, key: &str) -> StoreResult<Option<Vec<u8>>> {
        let mut conn = self.connection.clone();
        self.timed("get", key, async move { conn.get(key).await })
            .await
    }

    async fn compare_and_set(
        &self,
        key: &str,
        expected: Option<&[u8]>,
        new: &[u8],
        ttl: Option<Duration>,
    ) -> StoreResult<bool> {
        let mut conn = self.connection.clone();
        let flag = if expected.is_some() { "1" } else { "0" };
        let expected = expected.unwrap_or_default();
        let ttl = ttl_millis(ttl);
        let script = Arc::clone(&self.cas_script);

        let swapped: i64 = self
            .timed("compare_and_set", key, async move {
                script
                    .key(key)
                    .arg(flag)
                    .arg(expected)
                    .arg(new)
                    .arg(ttl)
                    .invoke_async(&mut conn)
                    .await
            })
            .await?;
        Ok(swapped == 1)
    }

    async fn increment(&self, key: &str, delta: i64, ttl: Option<Duration>) -> StoreResult<i64> {
        let mut conn = self.connection.clone();
        let ttl = ttl_millis(ttl);
        let script = Arc::clone(&self.increment_script);

        self.timed("increment", key, async move {
            script
                .key(key)
                .arg(delta)
                .arg(ttl)
                .invoke_async(&mut conn)
                .await
        })
        .await
    }

    async fn delete(&self, key: &str) -> StoreResult<bool> {
        let mut conn = self.connection.clone();
        let removed: i64 = self
            .timed("delete", key, async move { conn.del(key).await })
            .await?;
        Ok(removed > 0)
    }

    async fn ping(&self) -> StoreResult<()> {
        let mut conn = self.connection.clone();
        let reply: String = self
            .timed("ping", "", async move {
                redis::cmd("PING").query_async(&mut conn).await
            })
            .await?;

        if reply == "PONG" {
            Ok(())
        } else {
            Err(StorageError::RedisCommand(format!(
                "Unexpected response from Redis PING: {}",
                reply
            )))
        }
    }
}
