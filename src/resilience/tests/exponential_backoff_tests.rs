// src/resilience/tests/exponential_backoff_tests.rs

use std::time::Duration;

use crate::resilience::{ExponentialBackoff, RetryConfig};

fn config(max_attempts: u32) -> RetryConfig {
    RetryConfig {
        max_attempts,
        base_delay: Duration::from_millis(100),
        max_delay: Duration::from_secs(1),
        jitter_factor: 0.0,
    }
}

#[test]
fn test_backoff_increases_exponentially() {
    let mut backoff = ExponentialBackoff::new(config(5));

    assert_eq!(backoff.next_backoff(), Some(Duration::from_millis(100)));
    assert_eq!(backoff.next_backoff(), Some(Duration::from_millis(200)));
    assert_eq!(backoff.next_backoff(), Some(Duration::from_millis(400)));
    assert_eq!(backoff.next_backoff(), Some(Duration::from_millis(800)));

    // the fifth failure is the last attempt
    assert_eq!(backoff.next_backoff(), None);
    assert_eq!(backoff.attempts(), 5);
}

#[test]
fn test_backoff_is_capped() {
    let cfg = config(10);
    assert_eq!(
        ExponentialBackoff::capped_delay(&cfg, 5),
        Duration::from_secs(1),
        "1600ms is above the cap"
    );
    // shifting this far would overflow
    assert_eq!(ExponentialBackoff::capped_delay(&cfg, 200), Duration::from_secs(1));
}

#[test]
fn test_single_attempt_never_backs_off() {
    let mut backoff = ExponentialBackoff::new(config(1));
    assert_eq!(backoff.next_backoff(), None);
}

#[test]
fn test_reset_starts_over() {
    let mut backoff = ExponentialBackoff::new(config(3));
    backoff.next_backoff();
    backoff.next_backoff();
    backoff.reset();

    assert_eq!(backoff.attempts(), 0);
    assert_eq!(backoff.next_backoff(), Some(Duration::from_millis(100)));
}

#[test]
fn test_jitter_bounds() {
    let delay = Duration::from_millis(1000);
    assert_eq!(ExponentialBackoff::apply_jitter(delay, 0.5, 0.0), Duration::from_millis(500));
    assert_eq!(ExponentialBackoff::apply_jitter(delay, 0.5, 0.5), Duration::from_millis(750));
    assert_eq!(ExponentialBackoff::apply_jitter(delay, 0.0, 0.3), delay);
}

#[test]
fn test_out_of_range_jitter_does_not_panic() {
    let delay = Duration::from_secs(1);
    assert_eq!(ExponentialBackoff::apply_jitter(delay, 1.5, 0.0), Duration::ZERO);
    assert_eq!(ExponentialBackoff::apply_jitter(delay, 1.5, 0.5), Duration::from_millis(500));
    assert_eq!(ExponentialBackoff::apply_jitter(delay, f64::NAN, 0.5), delay);
    assert_eq!(ExponentialBackoff::apply_jitter(delay, -2.0, 0.5), delay);
    assert_eq!(ExponentialBackoff::apply_jitter(delay, f64::INFINITY, 0.5), Duration::from_millis(500));
}

#[test]
fn test_jittered_delays_stay_in_range() {
    let cfg = RetryConfig {
        jitter_factor: 0.5,
        ..config(4)
    };
    for _ in 0..50 {
        let mut backoff = ExponentialBackoff::new(cfg.clone());
        let first = backoff.next_backoff().unwrap();
        assert!(first >= Duration::from_millis(50) && first <= Duration::from_millis(100));
        let second = backoff.next_backoff().unwrap();
        assert!(second >= Duration::from_millis(100) && second <= Duration::from_millis(200));
    }
}

#[test]
fn test_invalid_retry_config() {
    assert!(RetryConfig {
        max_attempts: 0,
        ..RetryConfig::default()
    }
    .validate()
    .is_err());
    assert!(RetryConfig {
        jitter_factor: 1.5,
        ..RetryConfig::default()
    }
    .validate()
    .is_err());
    assert!(RetryConfig::default().without_jitter().validate().is_ok());
}
