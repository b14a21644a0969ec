// ABOUTME: Utilities for working with times and timestamps.
// ABOUTME: Provides RFC3339 formatting and monotonic timers.
use chrono::{DateTime, Utc};
use std::time::{Duration, Instant};

/// Get the current UTC time.
pub fn utc_now() -> DateTime<Utc> {
    Utc::now()
}

/// Convert a `DateTime<Utc>` to an RFC3339 timestamp string.
///
/// # Examples
///
/// ```
/// use bk_core::to_rfc3339;
/// use chrono::{TimeZone, Utc};
///
/// let time = Utc.timestamp_opt(1_609_459_200, 0).unwrap(); // 2021-01-01
/// let timestamp = to_rfc3339(time);
/// assert_eq!(timestamp, "2021-01-01T00:00:00+00:00");
/// ```
pub fn to_rfc3339(time: DateTime<Utc>) -> String {
    time.to_rfc3339()
}

/// Get the current time as an RFC3339 formatted string.
pub fn now_iso8601() -> String {
    to_rfc3339(utc_now())
}

/// A monotonic duration measurer, unaffected by wall-clock adjustments.
pub struct MonotonicTimer {
    start: Instant,
}

impl MonotonicTimer {
    pub fn new() -> Self {
        Self {
            start: Instant::now(),
        }
    }

    pub fn elapsed(&self) -> Duration {
        self.start.elapsed()
    }

    pub fn reset(&mut self) {
        self.start = Instant::now();
    }
}

impl Default for MonotonicTimer {
    fn default() -> Self {
        Self::new()
    }
}
