//! Clock abstraction so retry scheduling and attempt timing can be tested
//! deterministically.
//!
//! Production code uses [`RealClock`]. Tests inject a [`TestClock`] and move
//! time forward explicitly, which lets a test assert an exact `next_retry_at`
//! instead of an approximate one.

use std::{
    future::Future,
    pin::Pin,
    sync::{
        atomic::{AtomicI64, AtomicU64, Ordering},
        Arc,
    },
    time::{Duration, Instant},
};

use chrono::{DateTime, TimeZone, Utc};

/// Source of wall-clock and monotonic time.
pub trait Clock: Send + Sync + std::fmt::Debug {
    /// Monotonic instant, used for measuring attempt durations.
    fn now(&self) -> Instant;

    /// Wall-clock time, used for `next_retry_at` and log timestamps.
    fn now_utc(&self) -> DateTime<Utc>;

    /// Suspends for `duration`. Test clocks advance instead of waiting.
    fn sleep(&self, duration: Duration) -> Pin<Box<dyn Future<Output = ()> + Send + '_>>;
}

/// Clock backed by the operating system and tokio timers.
#[derive(Debug, Clone, Copy, Default)]
pub struct RealClock;

impl RealClock {
    /// Creates a new real clock.
    pub fn new() -> Self {
        Self
    }
}

impl Clock for RealClock {
    fn now(&self) -> Instant {
        Instant::now()
    }

    fn now_utc(&self) -> DateTime<Utc> {
        Utc::now()
    }

    fn sleep(&self, duration: Duration) -> Pin<Box<dyn Future<Output = ()> + Send + '_>> {
        Box::pin(tokio::time::sleep(duration))
    }
}

/// Manually driven clock for tests.
///
/// Wall-clock time is kept with millisecond precision, which matches the
/// resolution of retry delays. Clones share the same underlying time.
#[derive(Debug, Clone)]
pub struct TestClock {
    wall_ms: Arc<AtomicI64>,
    elapsed_ns: Arc<AtomicU64>,
    base_instant: Instant,
}

impl TestClock {
    /// Creates a test clock starting at the current wall-clock time.
    pub fn new() -> Self {
        Self::starting_at(Utc::now())
    }

    /// Creates a test clock frozen at `start`.
    pub fn starting_at(start: DateTime<Utc>) -> Self {
        Self {
            wall_ms: Arc::new(AtomicI64::new(start.timestamp_millis())),
            elapsed_ns: Arc::new(AtomicU64::new(0)),
            base_instant: Instant::now(),
        }
    }

    /// Moves both wall-clock and monotonic time forward.
    pub fn advance(&self, duration: Duration) {
        let ms = i64::try_from(duration.as_millis()).unwrap_or(i64::MAX);
        let ns = u64::try_from(duration.as_nanos()).unwrap_or(u64::MAX);
        self.wall_ms.fetch_add(ms, Ordering::AcqRel);
        self.elapsed_ns.fetch_add(ns, Ordering::AcqRel);
    }

    /// Sets the wall-clock time. Monotonic time is unaffected.
    pub fn set(&self, time: DateTime<Utc>) {
        self.wall_ms.store(time.timestamp_millis(), Ordering::Release);
    }
}

impl Default for TestClock {
    fn default() -> Self {
        Self::new()
    }
}

impl Clock for TestClock {
    fn now(&self) -> Instant {
        self.base_instant + Duration::from_nanos(self.elapsed_ns.load(Ordering::Acquire))
    }

    fn now_utc(&self) -> DateTime<Utc> {
        let ms = self.wall_ms.load(Ordering::Acquire);
        Utc.timestamp_millis_opt(ms).single().unwrap_or(DateTime::<Utc>::MIN_UTC)
    }

    fn sleep(&self, duration: Duration) -> Pin<Box<dyn Future<Output = ()> + Send + '_>> {
        self.advance(duration);
        Box::pin(tokio::task::yield_now())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn fixed_start() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 3, 1, 12, 0, 0).single().unwrap()
    }

    #[test]
    fn test_clock_is_frozen_until_advanced() {
        let clock = TestClock::starting_at(fixed_start());
        assert_eq!(clock.now_utc(), fixed_start());
        assert_eq!(clock.now_utc(), fixed_start());

        clock.advance(Duration::from_secs(5));
        assert_eq!(clock.now_utc(), fixed_start() + chrono::Duration::seconds(5));
    }

    #[test]
    fn advancing_moves_monotonic_time() {
        let clock = TestClock::new();
        let start = clock.now();

        clock.advance(Duration::from_millis(250));

        assert_eq!(clock.now().duration_since(start), Duration::from_millis(250));
    }

    #[test]
    fn clones_share_time() {
        let clock = TestClock::starting_at(fixed_start());
        let other = clock.clone();

        other.advance(Duration::from_secs(60));

        assert_eq!(clock.now_utc(), fixed_start() + chrono::Duration::minutes(1));
    }

    #[test]
    fn set_jumps_wall_clock_only() {
        let clock = TestClock::starting_at(fixed_start());
        let start = clock.now();
        let target = fixed_start() - chrono::Duration::hours(1);

        clock.set(target);

        assert_eq!(clock.now_utc(), target);
        assert_eq!(clock.now(), start);
    }

    #[tokio::test]
    async fn sleep_advances_instead_of_waiting() {
        let clock = TestClock::starting_at(fixed_start());

        clock.sleep(Duration::from_secs(30)).await;

        assert_eq!(clock.now_utc(), fixed_start() + chrono::Duration::seconds(30));
    }
}
