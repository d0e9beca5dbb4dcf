//! Internal time arithmetic.
//!
//! Helpers for turning FFmpeg stream timestamps into [`Duration`] values
//! without a floating-point detour, and for formatting durations the way the
//! engine arguments and the chapter table expect them.

use std::time::Duration;

use ffmpeg_next::Rational;

const NANOS_PER_SECOND: u128 = 1_000_000_000;
const NANOS_PER_MILLI: u128 = 1_000_000;

/// Convert a timestamp in `time_base` units to a [`Duration`].
///
/// The result is rounded to the nearest nanosecond. Returns `None` for
/// negative timestamps (including `AV_NOPTS_VALUE`) or a degenerate time base.
pub fn timestamp_to_duration(timestamp: i64, time_base: Rational) -> Option<Duration> {
    let timestamp = u128::try_from(timestamp).ok()?;
    let numerator = u128::try_from(time_base.numerator()).ok()?;
    let denominator = u128::try_from(time_base.denominator())
        .ok()
        .filter(|&d| d > 0)?;

    let scaled = timestamp.checked_mul(numerator)?.checked_mul(NANOS_PER_SECOND)?;
    let nanos = (scaled + denominator / 2) / denominator;
    u64::try_from(nanos).ok().map(Duration::from_nanos)
}

/// Convert a container-level duration in `AV_TIME_BASE` (microseconds).
pub fn micros_to_duration(micros: i64) -> Option<Duration> {
    u64::try_from(micros).ok().map(Duration::from_micros)
}

/// Round a duration to whole milliseconds.
pub fn duration_to_millis(duration: Duration) -> u64 {
    let millis = (duration.as_nanos() + NANOS_PER_MILLI / 2) / NANOS_PER_MILLI;
    u64::try_from(millis).unwrap_or(u64::MAX)
}

/// Format a duration as decimal seconds with microsecond precision
/// (`"210.500000"`), the form passed to the engine's `-t` option.
pub fn format_seconds(duration: Duration) -> String {
    format!("{}.{:06}", duration.as_secs(), duration.subsec_micros())
}

/// Format a duration as `HH:MM:SS.mmm` for human-facing output.
pub fn format_timecode(duration: Duration) -> String {
    let millis = duration_to_millis(duration);
    let hours = millis / 3_600_000;
    let minutes = (millis / 60_000) % 60;
    let seconds = (millis / 1_000) % 60;
    format!("{hours:02}:{minutes:02}:{seconds:02}.{:03}", millis % 1_000)
}

/// `true` when `actual` is within `tolerance` of `expected` in either direction.
pub fn within_tolerance(actual: Duration, expected: Duration, tolerance: Duration) -> bool {
    actual.abs_diff(expected) <= tolerance
}
