//! Utilities related to time.

use time::OffsetDateTime;

/// Returns the current instant in UTC.
///
/// All engine bookkeeping (cookie expiry, dormant TTLs, trail freshness) is
/// compared in UTC; offsets only matter at display time, which is the host's
/// concern.
#[inline]
#[must_use]
pub fn now() -> OffsetDateTime {
    OffsetDateTime::now_utc()
}

/// Converts a `std::time::Duration` into a `time::Duration`.
///
/// Configuration carries `std` durations (they pair with tokio timers); jar
/// and trail arithmetic happens in `time` durations.
#[inline]
#[must_use]
pub fn to_time_duration(d: std::time::Duration) -> time::Duration {
    time::Duration::new(d.as_secs() as i64, d.subsec_nanos() as i32)
}
