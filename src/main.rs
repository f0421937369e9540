use dotenv::dotenv;
use std::sync::Arc;
use tracing::{error, info, warn};

use admission_control::algorithms::Strategy;
use admission_control::config::{AdmissionConfig, FixedWindowConfig, LimiterConfig};
use admission_control::storage::{CounterStore, FallbackStore, MemoryStore, RedisStore};
use admission_control::{init_logging, BreakerRegistry, RateLimiter};

// Configuration file path, read from the environment (or .env)
const CONFIG_VAR: &str = "ADMISSION_CONFIG";

fn load_config() -> admission_control::Result<AdmissionConfig> {
    match std::env::var(CONFIG_VAR) {
        Ok(path) => {
            info!(path = %path, "Loading configuration");
            AdmissionConfig::from_file(path)
        }
        Err(_) => {
            warn!("{} not set, using a 100 requests/minute fixed window", CONFIG_VAR);
            Ok(AdmissionConfig::new(LimiterConfig::new(Strategy::FixedWindow(
                FixedWindowConfig {
                    max_requests: 100,
                    window: std::time::Duration::from_secs(60),
                },
            ))))
        }
    }
}

async fn build_store(
    config: &AdmissionConfig,
    breakers: &BreakerRegistry,
) -> Arc<dyn CounterStore> {
    let memory = MemoryStore::new(config.memory.clone());

    let Some(redis_config) = config.redis.clone() else {
        info!("Using in-memory counter store");
        return Arc::new(memory);
    };

    match RedisStore::new(redis_config).await {
        Ok(redis) => {
            info!(url = %redis.config().url, "Using Redis counter store with in-memory fallback");
            Arc::new(FallbackStore::new(redis, memory, breakers.get_or_create("redis")))
        }
        Err(e) => {
            error!(error = %e, "Redis unreachable at startup, using in-memory counter store");
            Arc::new(memory)
        }
    }
}

#[tokio::main]
async fn main() {
    dotenv().ok();
    init_logging();
    info!("Admission control starting up");

    let config = match load_config() {
        Ok(config) => config,
        Err(e) => {
            error!(error = %e, "Invalid configuration");
            std::process::exit(1);
        }
    };

    let breakers = BreakerRegistry::new(config.breaker.clone());
    let store = build_store(&config, &breakers).await;

    if let Err(e) = store.ping().await {
        warn!(error = %e, "Counter store did not answer ping");
    }

    let limiter = match RateLimiter::new(store, config.limiter.clone()) {
        Ok(limiter) => limiter,
        Err(e) => {
            error!(error = %e, "Could not build rate limiter");
            std::process::exit(1);
        }
    };

    info!(
        strategy = limiter.strategy().name(),
        limit = limiter.strategy().limit(),
        key_prefix = %limiter.config().key_prefix,
        failure_policy = ?limiter.config().failure_policy,
        breaker_failure_threshold = config.breaker.failure_threshold,
        breaker_timeout_ms = config.breaker.timeout.as_millis() as u64,
        retry_max_attempts = config.retry.max_attempts,
        "Admission stack initialized"
    );
}
