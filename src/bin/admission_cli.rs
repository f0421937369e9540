// src/bin/admission_cli.rs

use chrono::{DateTime, Utc};
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use structopt::StructOpt;
use tokio::time;
use tracing::{error, info, warn};
use tracing_subscriber::{EnvFilter, FmtSubscriber};

use admission_control::config::{InMemoryConfig, LimiterConfig, Rate};
use admission_control::resilience::{
    CircuitBreaker, CircuitBreakerConfig, RetryConfig, RetryError, RetryExecutor, RetryPolicy,
};
use admission_control::storage::MemoryStore;
use admission_control::{LimitDecision, RateLimiter};

#[derive(Debug, StructOpt)]
#[structopt(
    name = "admission_cli",
    about = "Simulate traffic against a rate limiter, or watch a retry loop with a circuit breaker"
)]
struct Opt {
    /// Rate limiting algorithm to use
    #[structopt(short, long, possible_values = &["fixed_window", "sliding_window", "token_bucket"], default_value = "fixed_window")]
    algorithm: String,

    /// Budget such as 10/minute or 5/s
    #[structopt(short, long, default_value = "10/minute")]
    rate: Rate,

    /// Key to use for rate limiting
    #[structopt(short, long, default_value = "default_user")]
    key: String,

    /// Cost of each simulated request
    #[structopt(long, default_value = "1")]
    cost: u64,

    /// Simulation mode
    #[structopt(long, possible_values = &["burst", "steady", "sine_wave", "retry"], default_value = "burst")]
    simulation: String,

    /// Number of requests to simulate
    #[structopt(short = "n", long, default_value = "20")]
    num_requests: usize,

    /// Time between requests in milliseconds (for steady and sine_wave modes)
    #[structopt(short = "t", long, default_value = "100")]
    request_interval_ms: u64,

    /// Failures the retry demo's operation produces before succeeding
    #[structopt(long, default_value = "3")]
    failures: u32,

    /// Attempts the retry demo may make
    #[structopt(long, default_value = "5")]
    max_attempts: u32,

    /// Verbosity level
    #[structopt(short, long, parse(from_occurrences))]
    verbose: usize,

    /// Disable logs
    #[structopt(long)]
    disable_logs: bool,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let opt = Opt::from_args();

    let filter = if opt.disable_logs {
        "admission_cli=error,admission_control=error".to_string()
    } else {
        let log_level = match opt.verbose {
            0 => "info",
            1 => "debug",
            _ => "trace",
        };
        format!("admission_cli={},admission_control={}", log_level, log_level)
    };
    let subscriber = FmtSubscriber::builder()
        .with_env_filter(EnvFilter::new(filter))
        .finish();
    tracing::subscriber::set_global_default(subscriber)?;

    if opt.simulation == "retry" {
        return run_retry_demo(&opt).await;
    }

    let strategy = match opt.algorithm.as_str() {
        "fixed_window" => opt.rate.fixed_window(),
        "sliding_window" => opt.rate.sliding_window(),
        "token_bucket" => opt.rate.token_bucket(),
        other => {
            error!("Unknown algorithm: {}", other);
            return Err("Unknown algorithm".into());
        }
    };

    let store = MemoryStore::new(InMemoryConfig::default());
    let limiter = RateLimiter::new(store, LimiterConfig::new(strategy).with_key_prefix("cli"))?;
    info!("Starting admission CLI with {} at {}", opt.algorithm, opt.rate);

    let start_time = Instant::now();
    let (allowed, denied) = match opt.simulation.as_str() {
        "burst" => simulate(&opt, &limiter, |_| Duration::ZERO).await?,
        "steady" => {
            let interval = Duration::from_millis(opt.request_interval_ms);
            simulate(&opt, &limiter, |_| interval).await?
        }
        "sine_wave" => {
            let base = Duration::from_millis(opt.request_interval_ms);
            let total = opt.num_requests.max(1) as f64;
            simulate(&opt, &limiter, |i| {
                // one full cycle, between 0.5x and 1.5x the base interval
                let phase = i as f64 * std::f64::consts::PI * 2.0 / total;
                base.mul_f64(1.0 + 0.5 * phase.sin())
            })
            .await?
        }
        other => {
            error!("Unknown simulation mode: {}", other);
            return Err("Unknown simulation mode".into());
        }
    };

    let stats = limiter.stats();
    println!("\n{} Simulation Results:", opt.simulation);
    println!("---------------------------");
    println!("Total requests: {}", opt.num_requests);
    println!("Allowed: {}", allowed);
    println!("Denied: {}", denied);
    println!("Store errors: {}", stats.store_errors);
    println!("Time elapsed: {:?}", start_time.elapsed());

    Ok(())
}

fn format_reset(decision: &LimitDecision) -> String {
    let secs = decision.reset_at.as_secs() as i64;
    DateTime::<Utc>::from_timestamp(secs, decision.reset_at.subsec_nanos())
        .map(|at| at.format("%H:%M:%S%.3f").to_string())
        .unwrap_or_else(|| "unknown".to_string())
}

async fn simulate<F>(
    opt: &Opt,
    limiter: &RateLimiter<MemoryStore>,
    interval: F,
) -> Result<(usize, usize), Box<dyn std::error::Error>>
where
    F: Fn(usize) -> Duration,
{
    let mut allowed_count = 0;
    let mut denied_count = 0;

    for i in 0..opt.num_requests {
        let request_time = Instant::now();
        let decision = limiter.check(&opt.key, opt.cost).await?;

        if decision.allowed {
            allowed_count += 1;
            info!(
                "Request {}: ALLOWED (remaining: {}, resets {})",
                i + 1,
                decision.remaining,
                format_reset(&decision)
            );
        } else {
            denied_count += 1;
            let headers: Vec<String> = decision
                .headers()
                .into_iter()
                .map(|(name, value)| format!("{}: {}", name, value))
                .collect();
            warn!("Request {}: DENIED [{}]", i + 1, headers.join(", "));
        }

        let wait = interval(i);
        let elapsed = request_time.elapsed();
        if elapsed < wait {
            time::sleep(wait - elapsed).await;
        }
    }

    Ok((allowed_count, denied_count))
}

#[derive(Debug)]
struct SimulatedFailure(u32);

impl std::fmt::Display for SimulatedFailure {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "simulated failure #{}", self.0)
    }
}

// Press Ctrl-C during a backoff to cancel the loop.
async fn run_retry_demo(opt: &Opt) -> Result<(), Box<dyn std::error::Error>> {
    let executor = RetryExecutor::new();
    let token = executor.cancellation_token().clone();
    ctrlc::set_handler(move || token.cancel())?;

    let breaker = CircuitBreaker::new(
        "demo",
        CircuitBreakerConfig {
            failure_threshold: opt.max_attempts + 1,
            ..CircuitBreakerConfig::default()
        },
    );
    let policy = RetryPolicy::new(RetryConfig {
        max_attempts: opt.max_attempts,
        base_delay: Duration::from_millis(opt.request_interval_ms),
        ..RetryConfig::default()
    });

    let calls = Arc::new(AtomicU32::new(0));
    let failures = opt.failures;
    let started = Instant::now();

    let result = executor
        .run(
            || {
                let calls = Arc::clone(&calls);
                async move {
                    let call = calls.fetch_add(1, Ordering::SeqCst) + 1;
                    info!("Attempt {} at {:?}", call, started.elapsed());
                    if call <= failures {
                        Err(SimulatedFailure(call))
                    } else {
                        Ok(call)
                    }
                }
            },
            &policy,
            Some(&breaker),
        )
        .await;

    match result {
        Ok(call) => println!("Succeeded on attempt {} after {:?}", call, started.elapsed()),
        Err(RetryError::Cancelled { attempts }) => {
            println!("Cancelled after {} attempts", attempts)
        }
        Err(e) => println!("Failed: {}", e),
    }
    println!("Breaker: {:?}", breaker.snapshot());

    Ok(())
}
