#![deny(rustdoc::broken_intra_doc_links, rust_2018_idioms)]
#![warn(
    missing_debug_implementations,
    clippy::explicit_iter_loop,
    clippy::use_self,
    clippy::clone_on_ref_ptr
)]

//! A UTC wall-clock timestamp and an injectable clock source.
//!
//! Production code reads the clock through [`TimeProvider`] so tests can
//! substitute a [`MockProvider`] and drive time by hand.

use chrono::{DateTime, Utc};
use parking_lot::RwLock;
use std::ops::{Add, Sub};
use std::time::Duration;

/// A UTC timestamp with millisecond orientation.
///
/// Sample timestamps in this workspace are millisecond-precision, so the
/// constructors and accessors lean that way. Construction from raw values is
/// intended for tests and serialization boundaries; everything else should
/// obtain a `Time` from a [`TimeProvider`].
#[derive(Copy, Clone, Ord, PartialOrd, Eq, PartialEq, Hash)]
pub struct Time(DateTime<Utc>);

impl Time {
    /// The minimum representable `Time`.
    pub const MIN: Self = Self(DateTime::<Utc>::MIN_UTC);

    /// The maximum representable `Time`.
    pub const MAX: Self = Self(DateTime::<Utc>::MAX_UTC);

    /// Builds a `Time` from non-leap milliseconds since the unix epoch.
    ///
    /// # Panics
    ///
    /// Panics if `millis` is outside the representable range.
    pub fn from_timestamp_millis(millis: i64) -> Self {
        Self(
            DateTime::from_timestamp_millis(millis)
                .expect("millisecond timestamp out of range"),
        )
    }

    /// Builds a `Time` from non-leap seconds since the unix epoch.
    ///
    /// # Panics
    ///
    /// Panics if `secs` is outside the representable range.
    pub fn from_timestamp_secs(secs: i64) -> Self {
        Self(DateTime::from_timestamp(secs, 0).expect("second timestamp out of range"))
    }

    /// Non-leap milliseconds since the unix epoch.
    pub fn timestamp_millis(&self) -> i64 {
        self.0.timestamp_millis()
    }

    /// Non-leap seconds since the unix epoch.
    pub fn timestamp(&self) -> i64 {
        self.0.timestamp()
    }

    /// The elapsed wall-clock span since `other`, or `None` if `other` is
    /// later than `self`.
    pub fn checked_duration_since(&self, other: Self) -> Option<Duration> {
        self.0.signed_duration_since(other.0).to_std().ok()
    }

    /// `self + duration`, or `None` on overflow.
    pub fn checked_add(&self, duration: Duration) -> Option<Self> {
        let duration = chrono::Duration::from_std(duration).ok()?;
        Some(Self(self.0.checked_add_signed(duration)?))
    }

    /// `self - duration`, or `None` on underflow.
    pub fn checked_sub(&self, duration: Duration) -> Option<Self> {
        let duration = chrono::Duration::from_std(duration).ok()?;
        Some(Self(self.0.checked_sub_signed(duration)?))
    }
}

impl Add<Duration> for Time {
    type Output = Self;

    /// # Panics
    ///
    /// Panics on overflow.
    fn add(self, rhs: Duration) -> Self::Output {
        self.checked_add(rhs).expect("time overflow")
    }
}

impl Sub<Duration> for Time {
    type Output = Self;

    /// # Panics
    ///
    /// Panics on underflow.
    fn sub(self, rhs: Duration) -> Self::Output {
        self.checked_sub(rhs).expect("time underflow")
    }
}

impl Sub<Self> for Time {
    type Output = Duration;

    /// Wall-clock difference. Because wall clocks are not monotonic, prefer
    /// [`Time::checked_duration_since`] when the ordering is not certain.
    ///
    /// # Panics
    ///
    /// Panics if `rhs` is later than `self`.
    fn sub(self, rhs: Self) -> Self::Output {
        self.checked_duration_since(rhs)
            .expect("negative time difference")
    }
}

impl std::fmt::Debug for Time {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        std::fmt::Display::fmt(self, f)
    }
}

impl std::fmt::Display for Time {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0.to_rfc3339())
    }
}

/// A source of the current wall-clock time.
pub trait TimeProvider: std::fmt::Debug + Send + Sync + 'static {
    /// The current `Time`. No monotonicity guarantees are made.
    fn now(&self) -> Time;
}

/// A [`TimeProvider`] backed by the system clock.
#[derive(Debug, Default)]
pub struct SystemProvider;

impl SystemProvider {
    pub fn new() -> Self {
        Self
    }
}

impl TimeProvider for SystemProvider {
    fn now(&self) -> Time {
        Time(Utc::now())
    }
}

/// A [`TimeProvider`] that returns a fixed `Time` until told otherwise.
#[derive(Debug)]
pub struct MockProvider {
    now: RwLock<Time>,
}

impl MockProvider {
    pub fn new(start: Time) -> Self {
        Self {
            now: RwLock::new(start),
        }
    }

    /// Pins the clock to `time`.
    pub fn set(&self, time: Time) {
        *self.now.write() = time;
    }

    /// Advances the clock by `duration` and returns the new reading.
    pub fn inc(&self, duration: Duration) -> Time {
        let mut now = self.now.write();
        *now = *now + duration;
        *now
    }
}

impl TimeProvider for MockProvider {
    fn now(&self) -> Time {
        *self.now.read()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn system_provider_advances() {
        let provider = SystemProvider::new();
        let a = provider.now();
        std::thread::sleep(Duration::from_millis(10));
        let b = provider.now();
        assert!(b.checked_duration_since(a).unwrap() >= Duration::from_millis(5));
    }

    #[test]
    fn mock_provider_is_pinned() {
        let provider = MockProvider::new(Time::from_timestamp_millis(0));
        assert_eq!(provider.now().timestamp_millis(), 0);
        assert_eq!(provider.now().timestamp_millis(), 0);

        provider.set(Time::from_timestamp_millis(42));
        assert_eq!(provider.now().timestamp_millis(), 42);

        provider.inc(Duration::from_secs(1));
        assert_eq!(provider.now().timestamp_millis(), 1042);
    }

    #[test]
    fn millis_round_trip() {
        let t = Time::from_timestamp_millis(1_234_567);
        assert_eq!(t.timestamp_millis(), 1_234_567);
        assert_eq!(t.timestamp(), 1_234);

        assert_eq!(
            Time::from_timestamp_secs(60).timestamp_millis(),
            60_000
        );
    }

    #[test]
    fn arithmetic() {
        let t = Time::from_timestamp_millis(10_000);
        assert_eq!((t + Duration::from_secs(5)).timestamp_millis(), 15_000);
        assert_eq!((t - Duration::from_secs(5)).timestamp_millis(), 5_000);
        assert_eq!(
            t - Time::from_timestamp_millis(4_000),
            Duration::from_secs(6)
        );

        assert!(Time::MAX.checked_add(Duration::from_secs(1)).is_none());
        assert!(Time::MIN.checked_sub(Duration::from_secs(1)).is_none());
        assert!(Time::from_timestamp_millis(0)
            .checked_duration_since(Time::from_timestamp_millis(1))
            .is_none());
    }
}
