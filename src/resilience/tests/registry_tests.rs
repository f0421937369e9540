use std::sync::Arc;
use std::time::Duration;

use super::utils::recording_listener;
use crate::clock::ManualClock;
use crate::resilience::{BreakerRegistry, CircuitBreakerConfig, CircuitState};

fn registry(clock: &ManualClock) -> BreakerRegistry {
    let config = CircuitBreakerConfig {
        failure_threshold: 1,
        success_threshold: 1,
        timeout: Duration::from_secs(5),
    };
    BreakerRegistry::with_clock(config, clock.shared())
}

#[test]
fn test_same_name_same_breaker() {
    let clock = ManualClock::at_epoch_hour(2);
    let registry = registry(&clock);
    assert!(registry.is_empty());

    let a = registry.get_or_create("redis");
    let b = registry.get_or_create("redis");
    assert!(Arc::ptr_eq(&a, &b));
    assert_eq!(registry.len(), 1);

    a.record_failure();
    assert_eq!(b.state(), CircuitState::Open);
    assert!(registry.get("missing").is_none());
}

#[test]
fn test_breakers_are_independent() {
    let clock = ManualClock::at_epoch_hour(2);
    let registry = registry(&clock);

    registry.get_or_create("payments").record_failure();
    registry.get_or_create("inventory").record_success();

    let snapshots = registry.snapshots();
    let names: Vec<_> = snapshots.iter().map(|s| s.name.as_str()).collect();
    assert_eq!(names, vec!["inventory", "payments"]);
    assert_eq!(snapshots[0].state, CircuitState::Closed);
    assert_eq!(snapshots[1].state, CircuitState::Open);
}

#[test]
fn test_listener_reaches_created_breakers() {
    let clock = ManualClock::at_epoch_hour(2);
    let (listener, seen) = recording_listener();
    let registry = registry(&clock).with_listener(listener);

    registry.get_or_create("db").record_failure();
    clock.advance(Duration::from_secs(5));
    assert!(registry.get_or_create("db").allow());

    let seen = seen.lock().unwrap();
    assert_eq!(seen.len(), 2);
    assert_eq!(seen[0].0, "db");
    assert_eq!(seen[1].2, CircuitState::HalfOpen);
}
