//! Clocks used to stamp contact rows.
//!
//! Creation time decides which contact stays primary during a merge, so the
//! resolver reads time through [`Clock`] rather than calling `Utc::now()` directly.

use std::fmt;
use std::sync::Mutex;

use chrono::{DateTime, Duration, Utc};

/// Source of timestamps.
pub trait Clock: Send + Sync + fmt::Debug {
    /// Current time.
    fn now(&self) -> DateTime<Utc>;
}

/// Wall-clock time.
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> DateTime<Utc> {
        Utc::now()
    }
}

/// A clock that only moves when told to.
///
/// Each call to [`Clock::now`] returns the current reading and then advances it by
/// `step`, so successive contacts get strictly increasing timestamps.
///
/// # Examples
///
/// ```
/// use chrono::{Duration, TimeZone, Utc};
/// use contact_identity::time::{Clock, ManualClock};
///
/// let start = Utc.with_ymd_and_hms(2023, 4, 1, 0, 0, 0).unwrap();
/// let clock = ManualClock::new(start, Duration::seconds(1));
/// assert_eq!(clock.now(), start);
/// assert_eq!(clock.now(), start + Duration::seconds(1));
/// ```
#[derive(Debug)]
pub struct ManualClock {
    current: Mutex<DateTime<Utc>>,
    step: Duration,
}

impl ManualClock {
    /// Starts at `start`, advancing by `step` after each reading.
    #[must_use]
    pub fn new(start: DateTime<Utc>, step: Duration) -> Self {
        Self {
            current: Mutex::new(start),
            step,
        }
    }

    /// A clock frozen at `at`.
    #[must_use]
    pub fn frozen(at: DateTime<Utc>) -> Self {
        Self::new(at, Duration::zero())
    }

    /// Moves the clock to `at`.
    pub fn set(&self, at: DateTime<Utc>) {
        let mut guard = self
            .current
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner);
        *guard = at;
    }
}

impl Clock for ManualClock {
    fn now(&self) -> DateTime<Utc> {
        let mut guard = self
            .current
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner);
        let reading = *guard;
        *guard = reading + self.step;
        reading
    }
}
