//! General time utility functions

use std::time::Duration;

use chrono;

/// Number of nanoseconds in a second
pub const NANOS_PER_SECOND: i64 = 1_000_000_000;

/// Convert a duration into a number of seconds, or `None` if overflow
pub fn duration_to_seconds(duration: chrono::Duration) -> Option<f64> {
    if let Some(ns) = duration.num_nanoseconds() {
        Some(ns as f64 / NANOS_PER_SECOND as f64)
    }
    else {
        None
    }
}

/// Get the period of the given rate in hertz.
///
/// A rate of zero (or any non-positive or non-finite rate) has no period, so `None` is returned.
pub fn rate_to_period(rate_hz: f64) -> Option<Duration> {
    if rate_hz > 0.0 && rate_hz.is_finite() {
        Some(Duration::from_secs_f64(1.0 / rate_hz))
    }
    else {
        None
    }
}

/// Convert a number of seconds into a std duration, clamping negative values to zero.
pub fn secs_to_duration(secs: f64) -> Duration {
    if secs.is_finite() && secs > 0.0 {
        Duration::from_secs_f64(secs)
    }
    else {
        Duration::from_secs(0)
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn test_rate_to_period() {
        assert_eq!(rate_to_period(0.0), None);
        assert_eq!(rate_to_period(-1.0), None);
        assert_eq!(rate_to_period(f64::INFINITY), None);
        assert_eq!(rate_to_period(2.0), Some(Duration::from_millis(500)));
        assert_eq!(rate_to_period(1.0), Some(Duration::from_secs(1)));
    }

    #[test]
    fn test_duration_conversions() {
        assert_eq!(duration_to_seconds(chrono::Duration::milliseconds(1500)), Some(1.5));
        assert_eq!(secs_to_duration(-2.0), Duration::from_secs(0));
        assert_eq!(secs_to_duration(0.25), Duration::from_millis(250));
    }
}
