//! Saturating conversions between `std::time::Duration` and chrono instants.

use std::time::Duration;

use chrono::{DateTime, TimeDelta, Utc};

/// Converts a std duration to a chrono delta, saturating at `TimeDelta::MAX`.
#[must_use]
pub fn to_time_delta(duration: Duration) -> TimeDelta {
    TimeDelta::from_std(duration).unwrap_or(TimeDelta::MAX)
}

/// Returns `instant + duration`, saturating at the maximum representable time.
#[must_use]
pub fn add_duration(instant: DateTime<Utc>, duration: Duration) -> DateTime<Utc> {
    instant
        .checked_add_signed(to_time_delta(duration))
        .unwrap_or(DateTime::<Utc>::MAX_UTC)
}

/// Returns `later - earlier` as a std duration, or zero if `later` is not after `earlier`.
#[must_use]
pub fn duration_between(earlier: DateTime<Utc>, later: DateTime<Utc>) -> Duration {
    (later - earlier).to_std().unwrap_or(Duration::ZERO)
}

/// Converts milliseconds since the Unix epoch back to an instant.
#[must_use]
pub fn from_millis(millis: i64) -> DateTime<Utc> {
    DateTime::from_timestamp_millis(millis).unwrap_or(DateTime::<Utc>::MIN_UTC)
}
