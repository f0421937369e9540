// src/clock.rs

//! Time sources.
//!
//! Timestamps are [`Duration`]s since the UNIX epoch. Window alignment has to
//! agree between processes that share a counter store, so the production clock
//! reads wall time; every consumer uses saturating arithmetic so a clock that
//! steps backwards never underflows.
//!
//! Circuit breakers only measure cool-downs within one process and default to
//! [`MonotonicClock`], which keeps the epoch scale but never steps backwards.

use std::fmt::Debug;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant, SystemTime, UNIX_EPOCH};

/// Source of the current time for limiters, breakers and stores.
pub trait Clock: Send + Sync + Debug {
    /// Time elapsed since the UNIX epoch.
    fn now(&self) -> Duration;

    /// Current time in whole milliseconds.
    fn now_millis(&self) -> u64 {
        self.now().as_millis() as u64
    }
}

/// Shared handle to a clock.
pub type SharedClock = Arc<dyn Clock>;

/// Wall clock backed by [`SystemTime`].
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemClock;

impl SystemClock {
    pub fn new() -> Self {
        Self
    }

    /// A [`SharedClock`] reading system time.
    pub fn shared() -> SharedClock {
        Arc::new(Self)
    }
}

impl Clock for SystemClock {
    fn now(&self) -> Duration {
        SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .unwrap_or(Duration::from_secs(0))
    }
}

/// Wall time read once at creation, advanced by [`Instant`] from then on.
#[derive(Debug, Clone, Copy)]
pub struct MonotonicClock {
    anchor: Duration,
    started: Instant,
}

impl MonotonicClock {
    pub fn new() -> Self {
        Self {
            anchor: SystemClock.now(),
            started: Instant::now(),
        }
    }

    /// A [`SharedClock`] anchored at the current wall time.
    pub fn shared() -> SharedClock {
        Arc::new(Self::new())
    }
}

impl Default for MonotonicClock {
    fn default() -> Self {
        Self::new()
    }
}

impl Clock for MonotonicClock {
    fn now(&self) -> Duration {
        self.anchor + self.started.elapsed()
    }
}

/// Clock that only moves when told to.
///
/// Clones share the same time, so a test can hand one clone to a limiter and
/// keep another to advance time.
#[derive(Debug, Clone)]
pub struct ManualClock {
    nanos: Arc<AtomicU64>,
}

impl ManualClock {
    /// Create a clock reading `start`.
    pub fn new(start: Duration) -> Self {
        Self {
            nanos: Arc::new(AtomicU64::new(start.as_nanos() as u64)),
        }
    }

    /// Create a clock at an arbitrary fixed instant aligned to a whole hour.
    pub fn at_epoch_hour(hours: u64) -> Self {
        Self::new(Duration::from_secs(hours * 3600))
    }

    pub fn advance(&self, by: Duration) {
        self.nanos.fetch_add(by.as_nanos() as u64, Ordering::SeqCst);
    }

    pub fn set(&self, to: Duration) {
        self.nanos.store(to.as_nanos() as u64, Ordering::SeqCst);
    }

    /// Shared handle to this clock (same underlying time).
    pub fn shared(&self) -> SharedClock {
        Arc::new(self.clone())
    }
}

impl Clock for ManualClock {
    fn now(&self) -> Duration {
        Duration::from_nanos(self.nanos.load(Ordering::SeqCst))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_system_clock_is_past_2020() {
        let clock = SystemClock::new();
        assert!(clock.now() > Duration::from_secs(1_577_836_800));
    }

    #[test]
    fn test_monotonic_clock_starts_at_wall_time_and_never_goes_back() {
        let clock = MonotonicClock::new();
        let wall = SystemClock::new().now();
        let first = clock.now();
        assert!(first.abs_diff(wall) < Duration::from_secs(1));

        let mut previous = first;
        for _ in 0..1_000 {
            let next = clock.now();
            assert!(next >= previous, "{:?} went back to {:?}", previous, next);
            previous = next;
        }
    }

    #[test]
    fn test_manual_clock_clones_share_time() {
        let clock = ManualClock::new(Duration::from_secs(10));
        let other = clock.clone();
        let shared = clock.shared();

        other.advance(Duration::from_millis(1500));
        assert_eq!(clock.now(), Duration::from_millis(11_500));
        assert_eq!(shared.now_millis(), 11_500);

        clock.set(Duration::from_secs(3));
        assert_eq!(other.now(), Duration::from_secs(3));
    }
}
