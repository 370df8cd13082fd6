//! Time unit conversions and the process-wide monotonic clock
//!
//! All timestamps inside the player are signed 64-bit integers. Seconds,
//! milliseconds, microseconds and nanoseconds are converted with plain integer
//! arithmetic (truncating towards zero), matching how presentation timestamps
//! are carried by demultiplexers and decoders.

use std::sync::OnceLock;
use std::time::{Instant, SystemTime, UNIX_EPOCH};

/// Milliseconds per second
pub const MS_PER_S: i64 = 1_000;
/// Microseconds per second
pub const US_PER_S: i64 = 1_000_000;
/// Nanoseconds per second
pub const NS_PER_S: i64 = 1_000_000_000;
/// Microseconds per millisecond
pub const US_PER_MS: i64 = 1_000;
/// Nanoseconds per microsecond
pub const NS_PER_US: i64 = 1_000;

/// Reference instant for the monotonic clock. Initialised on first use.
static REFERENCE_INSTANT: OnceLock<Instant> = OnceLock::new();

/// Seconds to milliseconds
pub const fn s_to_ms(s: i64) -> i64 {
    s * MS_PER_S
}

/// Fractional seconds to milliseconds
pub fn s_to_ms_f(s: f64) -> i64 {
    (s * MS_PER_S as f64) as i64
}

/// Seconds to microseconds
pub const fn s_to_us(s: i64) -> i64 {
    s * US_PER_S
}

/// Fractional seconds to fractional microseconds
pub fn s_to_us_f(s: f64) -> f64 {
    s * US_PER_S as f64
}

/// Seconds to nanoseconds
pub const fn s_to_ns(s: i64) -> i64 {
    s * NS_PER_S
}

/// Milliseconds to seconds
pub const fn ms_to_s(ms: i64) -> i64 {
    ms / MS_PER_S
}

/// Fractional milliseconds to fractional seconds
pub fn ms_to_s_f(ms: f64) -> f64 {
    ms / MS_PER_S as f64
}

/// Milliseconds to microseconds
pub const fn ms_to_us(ms: i64) -> i64 {
    ms * US_PER_MS
}

/// Microseconds to seconds
pub const fn us_to_s(us: i64) -> i64 {
    us / US_PER_S
}

/// Fractional microseconds to fractional seconds
pub fn us_to_s_f(us: f64) -> f64 {
    us / US_PER_S as f64
}

/// Microseconds to milliseconds
pub const fn us_to_ms(us: i64) -> i64 {
    us / US_PER_MS
}

/// Microseconds to nanoseconds
pub const fn us_to_ns(us: i64) -> i64 {
    us * NS_PER_US
}

/// Nanoseconds to microseconds
pub const fn ns_to_us(ns: i64) -> i64 {
    ns / NS_PER_US
}

/// Nanoseconds elapsed on the process-wide monotonic clock.
///
/// This is the time base for every release timestamp, vsync sample and
/// audio timestamp the player deals with. It never goes backwards and is
/// unaffected by wall-clock adjustments.
#[allow(clippy::cast_possible_truncation)]
pub fn monotonic_now_ns() -> i64 {
    let reference = REFERENCE_INSTANT.get_or_init(Instant::now);
    // Offset by one second so that zero stays free as a "no sample" sentinel.
    reference.elapsed().as_nanos() as i64 + NS_PER_S
}

/// Microseconds elapsed on the process-wide monotonic clock
pub fn monotonic_now_us() -> i64 {
    ns_to_us(monotonic_now_ns())
}

/// Microseconds since the Unix epoch, at millisecond resolution.
///
/// Only meant for logging and reporting; synchronisation uses
/// [`monotonic_now_us`].
pub fn current_time_us() -> i64 {
    let ms = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as i64)
        .unwrap_or(0);
    ms_to_us(ms)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_integer_conversions() {
        assert_eq!(s_to_ms(3), 3_000);
        assert_eq!(s_to_us(2), 2_000_000);
        assert_eq!(s_to_ns(1), 1_000_000_000);
        assert_eq!(ms_to_s(2_999), 2);
        assert_eq!(ms_to_us(7), 7_000);
        assert_eq!(us_to_s(1_500_000), 1);
        assert_eq!(us_to_ms(33_366), 33);
        assert_eq!(us_to_ns(16_667), 16_667_000);
        assert_eq!(ns_to_us(16_666_667), 16_666);
    }

    #[test]
    fn test_negative_values_truncate_towards_zero() {
        assert_eq!(ns_to_us(-1_999), -1);
        assert_eq!(us_to_ms(-30_500), -30);
    }

    #[test]
    fn test_fractional_conversions() {
        assert_eq!(s_to_ms_f(1.25), 1_250);
        assert!((s_to_us_f(0.5) - 500_000.0).abs() < f64::EPSILON);
        assert!((ms_to_s_f(250.0) - 0.25).abs() < f64::EPSILON);
        assert!((us_to_s_f(1_500_000.0) - 1.5).abs() < f64::EPSILON);
    }

    #[test]
    fn test_monotonic_clock_advances() {
        let first = monotonic_now_ns();
        std::thread::sleep(std::time::Duration::from_millis(2));
        let second = monotonic_now_ns();
        assert!(first > 0);
        assert!(second > first);
        assert!(monotonic_now_us() >= ns_to_us(second));
    }

    #[test]
    fn test_current_time_is_after_2020() {
        // 2020-01-01T00:00:00Z
        assert!(current_time_us() > 1_577_836_800_000_000);
    }
}
