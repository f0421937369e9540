// src/bin/admission_bench.rs

use futures::future::join_all;
use indicatif::{ProgressBar, ProgressStyle};
use prettytable::{row, Table};
use std::sync::Arc;
use std::time::{Duration, Instant};
use structopt::StructOpt;
use tokio::sync::{Barrier, Semaphore};
use tracing::{error, info, warn};
use tracing_subscriber::{EnvFilter, FmtSubscriber};

use admission_control::algorithms::Strategy;
use admission_control::config::{InMemoryConfig, LimiterConfig, Rate, RedisConfig};
use admission_control::storage::{CounterStore, MemoryStore, RedisStore};
use admission_control::RateLimiter;

#[derive(Debug, Clone, StructOpt)]
#[structopt(
    name = "admission_bench",
    about = "A benchmarking tool for rate limiting strategies"
)]
struct Opt {
    /// Rate limiting algorithm to benchmark
    #[structopt(short, long, possible_values = &["fixed_window", "sliding_window", "token_bucket", "all"], default_value = "all")]
    algorithm: String,

    /// Storage backend to use
    #[structopt(short, long, possible_values = &["memory", "redis"], default_value = "memory")]
    storage: String,

    /// Redis URL (when using Redis storage)
    #[structopt(long, default_value = "redis://localhost:6379")]
    redis_url: String,

    /// Budget per user, e.g. 1000/minute
    #[structopt(short, long, default_value = "1000/minute")]
    rate: Rate,

    /// Number of concurrent users to simulate
    #[structopt(short = "u", long, default_value = "10")]
    num_users: usize,

    /// Number of requests per user
    #[structopt(short = "r", long, default_value = "100")]
    requests_per_user: usize,

    /// Number of iterations to run
    #[structopt(short, long, default_value = "3")]
    iterations: usize,

    /// Maximum concurrency level
    #[structopt(short = "c", long, default_value = "100")]
    concurrency: usize,

    /// Verbosity level
    #[structopt(short, long, parse(from_occurrences))]
    verbose: usize,

    /// Disable logs
    #[structopt(long)]
    disable_logs: bool,
}

/// Totals for one strategy across all iterations
struct BenchResult {
    name: String,
    allowed: usize,
    denied: usize,
    errors: usize,
    total_duration: Duration,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let opt = Opt::from_args();

    let filter = if opt.disable_logs {
        "admission_bench=error,admission_control=error".to_string()
    } else {
        let log_level = match opt.verbose {
            0 => "info",
            1 => "debug",
            _ => "trace",
        };
        format!("admission_bench={},admission_control={}", log_level, log_level)
    };
    let subscriber = FmtSubscriber::builder()
        .with_env_filter(EnvFilter::new(filter))
        .finish();
    tracing::subscriber::set_global_default(subscriber)?;

    let strategies: Vec<Strategy> = match opt.algorithm.as_str() {
        "all" => vec![
            opt.rate.fixed_window(),
            opt.rate.sliding_window(),
            opt.rate.token_bucket(),
        ],
        "fixed_window" => vec![opt.rate.fixed_window()],
        "sliding_window" => vec![opt.rate.sliding_window()],
        "token_bucket" => vec![opt.rate.token_bucket()],
        other => return Err(format!("Unknown algorithm: {}", other).into()),
    };

    let mut results = Vec::with_capacity(strategies.len());
    for strategy in strategies {
        let name = format!("{} ({})", strategy.name(), opt.storage);
        let config = LimiterConfig::new(strategy).with_key_prefix("bench");

        let result = match opt.storage.as_str() {
            "memory" => {
                let store = MemoryStore::new(InMemoryConfig {
                    max_entries: 100_000, // Large capacity for benchmarking
                    ..InMemoryConfig::default()
                });
                run_benchmark(RateLimiter::new(store, config)?, name, &opt).await?
            }
            "redis" => {
                let store = match RedisStore::new(RedisConfig::new(opt.redis_url.clone())).await {
                    Ok(store) => store,
                    Err(e) => {
                        error!("Failed to connect to Redis: {}", e);
                        return Err(format!("Failed to connect to Redis: {}", e).into());
                    }
                };
                run_benchmark(RateLimiter::new(store, config)?, name, &opt).await?
            }
            other => return Err(format!("Unknown storage backend: {}", other).into()),
        };
        results.push(result);
    }

    print_results(&results);
    Ok(())
}

async fn run_benchmark<S>(
    rate_limiter: RateLimiter<S>,
    name: String,
    opt: &Opt,
) -> Result<BenchResult, Box<dyn std::error::Error>>
where
    S: CounterStore + 'static,
{
    info!("Benchmarking {} at {}", name, opt.rate);

    let rate_limiter = Arc::new(rate_limiter);
    let progress = ProgressBar::new((opt.iterations * opt.num_users) as u64);
    progress.set_style(
        ProgressStyle::with_template("{prefix} [{bar:40.cyan/blue}] {pos}/{len} {msg}")?
            .progress_chars("=>-"),
    );
    progress.set_prefix(name.clone());

    let mut result = BenchResult {
        name,
        allowed: 0,
        denied: 0,
        errors: 0,
        total_duration: Duration::ZERO,
    };

    for iteration in 0..opt.iterations {
        let start_time = Instant::now();

        // Create a barrier to start all tasks at once
        let barrier = Arc::new(Barrier::new(opt.num_users));
        let semaphore = Arc::new(Semaphore::new(opt.concurrency.max(1)));
        let mut handles = Vec::with_capacity(opt.num_users);

        for user_id in 0..opt.num_users {
            let rate_limiter = Arc::clone(&rate_limiter);
            let barrier = Arc::clone(&barrier);
            let semaphore = Arc::clone(&semaphore);
            let progress = progress.clone();
            // fresh keys per iteration, so earlier iterations don't eat the budget
            let key = format!("user_{}_iter_{}", user_id, iteration);
            let requests_per_user = opt.requests_per_user;

            handles.push(tokio::spawn(async move {
                barrier.wait().await;

                let (mut allowed, mut denied, mut errors) = (0, 0, 0);
                for _ in 0..requests_per_user {
                    let Ok(_permit) = semaphore.acquire().await else {
                        break;
                    };
                    match rate_limiter.check(&key, 1).await {
                        Ok(decision) if decision.allowed => allowed += 1,
                        Ok(_) => denied += 1,
                        Err(e) => {
                            errors += 1;
                            warn!("Error in rate limiting: {}", e);
                        }
                    }
                }
                progress.inc(1);
                (allowed, denied, errors)
            }));
        }

        for outcome in join_all(handles).await {
            match outcome {
                Ok((allowed, denied, errors)) => {
                    result.allowed += allowed;
                    result.denied += denied;
                    result.errors += errors;
                }
                Err(e) => error!("Benchmark task failed: {}", e),
            }
        }

        let elapsed = start_time.elapsed();
        result.total_duration += elapsed;
        progress.set_message(format!("iteration {} took {:?}", iteration + 1, elapsed));
    }

    progress.finish_with_message("done");
    Ok(result)
}

fn print_results(results: &[BenchResult]) {
    let mut table = Table::new();
    table.add_row(row![
        "Strategy", "Requests", "Allowed", "Denied", "Errors", "Duration", "Req/sec"
    ]);

    for result in results {
        let total = result.allowed + result.denied + result.errors;
        let secs = result.total_duration.as_secs_f64();
        let throughput = if secs > 0.0 { total as f64 / secs } else { 0.0 };
        table.add_row(row![
            result.name,
            total,
            result.allowed,
            result.denied,
            result.errors,
            format!("{:?}", result.total_duration),
            format!("{:.2}", throughput)
        ]);
    }

    table.printstd();
}
