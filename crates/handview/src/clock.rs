//! Frame timestamps.

use std::{
    fmt,
    time::{Duration, Instant},
};

/// Point in time of a video frame, relative to the origin of the [`Clock`] that produced it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default)]
pub struct Timestamp(Duration);

impl Timestamp {
    pub const ZERO: Self = Self(Duration::ZERO);

    pub const fn from_duration(since_origin: Duration) -> Self {
        Self(since_origin)
    }

    pub const fn from_millis(ms: u64) -> Self {
        Self(Duration::from_millis(ms))
    }

    pub fn as_duration(&self) -> Duration {
        self.0
    }

    pub fn as_millis_f64(&self) -> f64 {
        self.0.as_secs_f64() * 1000.0
    }
}

impl fmt::Display for Timestamp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:.3}ms", self.as_millis_f64())
    }
}

/// A source of the current time.
pub trait Clock {
    fn now(&mut self) -> Timestamp;
}

/// A [`Clock`] measuring time since its creation using [`Instant`].
pub struct MonotonicClock {
    origin: Instant,
}

impl MonotonicClock {
    pub fn new() -> Self {
        Self {
            origin: Instant::now(),
        }
    }
}

impl Default for MonotonicClock {
    fn default() -> Self {
        Self::new()
    }
}

impl Clock for MonotonicClock {
    fn now(&mut self) -> Timestamp {
        Timestamp(self.origin.elapsed())
    }
}

/// Turns clock readings into a strictly increasing sequence of timestamps.
///
/// Video-mode detectors reject timestamps that do not advance. When the clock reading is not later
/// than the previous timestamp, the sequencer advances by [`TimestampSequencer::MIN_STEP`] instead.
#[derive(Debug, Default)]
pub struct TimestampSequencer {
    last: Option<Timestamp>,
}

impl TimestampSequencer {
    /// Minimum distance between two consecutive timestamps.
    ///
    /// Detectors commonly work with millisecond resolution, so smaller steps could collapse into
    /// the same value.
    pub const MIN_STEP: Duration = Duration::from_millis(1);

    pub fn new() -> Self {
        Self::default()
    }

    /// Returns the timestamp to use for a frame captured at clock reading `now`.
    pub fn next(&mut self, now: Timestamp) -> Timestamp {
        let ts = match self.last {
            Some(last) if now.0 < last.0 + Self::MIN_STEP => {
                log::trace!("clock did not advance ({now} after {last}), bumping timestamp");
                Timestamp(last.0 + Self::MIN_STEP)
            }
            _ => now,
        };
        self.last = Some(ts);
        ts
    }

    pub fn last(&self) -> Option<Timestamp> {
        self.last
    }
}
